// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! JSON HTTP API.
//!
//! | Method | Path | Action |
//! |--------|------|--------|
//! | `GET` | `/health` | Liveness |
//! | `GET` | `/api/functions/{owner}` | List functions |
//! | `POST` | `/api/functions/{owner}` | Create function |
//! | `GET` | `/api/functions/{owner}/{function}` | Get function |
//! | `PUT` | `/api/functions/{owner}/{function}` | Update and rebuild function |
//! | `DELETE` | `/api/functions/{owner}/{function}` | Delete function |
//! | `GET` | `/api/functions/{owner}/{function}/executions` | Execution history |
//! | `POST` | `/api/call/{owner}/{function}` | Invoke with the raw body as parameters |
//!
//! The call endpoint always answers `200 OK`; failures are reported in the
//! body's `message`. `result` stays the pod status when the pod settled
//! before the failure, and is `"Error"` otherwise.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use kexec_store::{ExecutionRecord, FunctionRecord, StoreError};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::coordinator::{Coordinator, ERROR_STATUS};
use crate::error::Error;

/// API error response: an HTTP status and a message.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    /// Create an error response.
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// HTTP status of this error.
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        let status = match &e {
            Error::InvalidInput(_) | Error::UnsupportedRuntime(_) => StatusCode::BAD_REQUEST,
            Error::FunctionNotFound { .. } | Error::Store(StoreError::FunctionNotFound { .. }) => {
                StatusCode::NOT_FOUND
            }
            Error::FunctionExists { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, message = %self.message, "API error");
        } else {
            debug!(status = %self.status, message = %self.message, "API request rejected");
        }
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Body of `POST /api/functions/{owner}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateFunctionRequest {
    /// Function name; also the name of the entrypoint in `code`.
    pub name: String,
    /// Runtime identifier (e.g. `python27`).
    pub runtime: String,
    /// Raw source code.
    pub code: String,
}

/// Body of `PUT /api/functions/{owner}/{function}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateFunctionRequest {
    /// Runtime identifier.
    pub runtime: String,
    /// Raw source code.
    pub code: String,
}

/// Query of the execution history endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecutionsQuery {
    /// Maximum number of entries.
    pub limit: Option<i64>,
}

/// Body returned by the call endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallResult {
    /// Final status, or `"Error"` if no pod settled.
    pub result: String,
    /// Captured log, possibly empty on failure.
    pub log: String,
    /// Error message, empty on success.
    pub message: String,
}

/// Build the API router.
pub fn router(coordinator: Arc<Coordinator>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/functions/{owner}",
            get(list_functions).post(create_function),
        )
        .route(
            "/api/functions/{owner}/{function}",
            get(get_function)
                .put(update_function)
                .delete(delete_function),
        )
        .route(
            "/api/functions/{owner}/{function}/executions",
            get(list_executions),
        )
        .route("/api/call/{owner}/{function}", post(call_function))
        .with_state(coordinator)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn list_functions(
    State(coordinator): State<Arc<Coordinator>>,
    Path(owner): Path<String>,
) -> ApiResult<Json<Vec<FunctionRecord>>> {
    Ok(Json(coordinator.list_functions(&owner).await?))
}

async fn create_function(
    State(coordinator): State<Arc<Coordinator>>,
    Path(owner): Path<String>,
    Json(body): Json<CreateFunctionRequest>,
) -> ApiResult<(StatusCode, Json<FunctionRecord>)> {
    let record = coordinator
        .create_function(&owner, &body.name, &body.runtime, &body.code)
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn get_function(
    State(coordinator): State<Arc<Coordinator>>,
    Path((owner, function)): Path<(String, String)>,
) -> ApiResult<Json<FunctionRecord>> {
    Ok(Json(coordinator.get_function(&owner, &function).await?))
}

async fn update_function(
    State(coordinator): State<Arc<Coordinator>>,
    Path((owner, function)): Path<(String, String)>,
    Json(body): Json<UpdateFunctionRequest>,
) -> ApiResult<Json<FunctionRecord>> {
    let record = coordinator
        .update_function(&owner, &function, &body.runtime, &body.code)
        .await?;
    Ok(Json(record))
}

async fn delete_function(
    State(coordinator): State<Arc<Coordinator>>,
    Path((owner, function)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    coordinator.delete_function(&owner, &function).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_executions(
    State(coordinator): State<Arc<Coordinator>>,
    Path((owner, function)): Path<(String, String)>,
    Query(query): Query<ExecutionsQuery>,
) -> ApiResult<Json<Vec<ExecutionRecord>>> {
    let history = coordinator
        .list_executions(&owner, &function, query.limit.unwrap_or(0))
        .await?;
    Ok(Json(history))
}

async fn call_function(
    State(coordinator): State<Arc<Coordinator>>,
    Path((owner, function)): Path<(String, String)>,
    params: String,
) -> Json<CallResult> {
    if params.is_empty() {
        info!(owner = %owner, function = %function, "Calling function");
    } else {
        info!(owner = %owner, function = %function, params = %params, "Calling function");
    }

    let result = match coordinator.invoke(&owner, &function, &params).await {
        Ok(outcome) => CallResult {
            result: outcome.status().to_string(),
            log: outcome.log().to_string(),
            message: String::new(),
        },
        Err(e) => CallResult {
            result: e
                .settled_status()
                .map(|status| status.to_string())
                .unwrap_or_else(|| ERROR_STATUS.to_string()),
            log: e.partial_log().unwrap_or_default().to_string(),
            message: e.to_string(),
        },
    };

    Json(result)
}
