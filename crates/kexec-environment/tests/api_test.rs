// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! JSON API tests against the router with mock backends.

mod common;

use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use common::TestContext;
use kexec_environment::api::{CallResult, router};

async fn send(app: &Router, method: &str, uri: &str, body: Body) -> (StatusCode, Vec<u8>) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body)
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, bytes.to_vec())
}

async fn send_json(app: &Router, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
    let (status, bytes) = send(app, method, uri, Body::from(body.to_string())).await;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn call(app: &Router, uri: &str, params: &str) -> CallResult {
    let (status, bytes) = send(app, "POST", uri, Body::from(params.to_string())).await;
    assert_eq!(status, StatusCode::OK);
    serde_json::from_slice(&bytes).unwrap()
}

fn echo_body() -> Value {
    json!({
        "name": "echo",
        "runtime": "python27",
        "code": "def echo(p): print(p)"
    })
}

#[tokio::test]
async fn test_health() {
    let ctx = TestContext::new().await;
    let app = router(ctx.coordinator.clone());

    let (status, body) = send_json(&app, "GET", "/health", Value::Null).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_function_crud() {
    let ctx = TestContext::new().await;
    let app = router(ctx.coordinator.clone());

    let (status, created) = send_json(&app, "POST", "/api/functions/alice", echo_body()).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["name"], "echo");
    assert_eq!(created["runtime"], "python27");

    let (status, _) = send_json(&app, "POST", "/api/functions/alice", echo_body()).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, list) = send_json(&app, "GET", "/api/functions/alice", Value::Null).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);

    let (status, updated) = send_json(
        &app,
        "PUT",
        "/api/functions/alice/echo",
        json!({ "runtime": "python3", "code": "def echo(p): print(p)" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["runtime"], "python3");

    let (status, fetched) =
        send_json(&app, "GET", "/api/functions/alice/echo", Value::Null).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["runtime"], "python3");

    let (status, _) = send_json(&app, "DELETE", "/api/functions/alice/echo", Value::Null).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send_json(&app, "GET", "/api/functions/alice/echo", Value::Null).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("not found"));
}

#[tokio::test]
async fn test_create_validation_errors() {
    let ctx = TestContext::new().await;
    let app = router(ctx.coordinator.clone());

    let (status, _) = send_json(
        &app,
        "POST",
        "/api/functions/alice",
        json!({ "name": "echo", "runtime": "cobol", "code": "x" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send_json(
        &app,
        "POST",
        "/api/functions/alice",
        json!({ "name": "not-an-identifier", "runtime": "python27", "code": "x" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_call_reports_status_and_log() {
    let ctx = TestContext::new().await;
    let app = router(ctx.coordinator.clone());
    send_json(&app, "POST", "/api/functions/alice", echo_body()).await;

    let result = call(&app, "/api/call/alice/echo", r#"{"x":1}"#).await;
    assert_eq!(result.result, "Succeeded");
    assert!(result.log.contains("{'x': 1}"));
    assert!(result.message.is_empty());

    let result = call(&app, "/api/call/alice/echo", "{not json").await;
    assert_eq!(result.result, "Failed");
    assert!(result.log.contains("Invalid JSON parameters"));

    let (status, history) = send_json(
        &app,
        "GET",
        "/api/functions/alice/echo/executions?limit=1",
        Value::Null,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let history = history.as_array().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["status"], "Failed");
}

#[tokio::test]
async fn test_call_unknown_function_is_ok_with_error_result() {
    let ctx = TestContext::new().await;
    let app = router(ctx.coordinator.clone());

    let result = call(&app, "/api/call/alice/missing", "{}").await;
    assert_eq!(result.result, "Error");
    assert!(result.log.is_empty());
    assert!(result.message.contains("not found"));
    assert!(ctx.cluster.submitted_jobs().is_empty());
}

#[tokio::test]
async fn test_executions_of_unknown_function() {
    let ctx = TestContext::new().await;
    let app = router(ctx.coordinator.clone());

    let (status, _) = send_json(
        &app,
        "GET",
        "/api/functions/alice/missing/executions",
        Value::Null,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_call_keeps_outcome_when_cleanup_fails() {
    let mut cluster = common::python_cluster();
    cluster.fail_cleanup = true;
    let ctx = TestContext::with_cluster(cluster, Duration::from_secs(10)).await;
    let app = router(ctx.coordinator.clone());
    send_json(&app, "POST", "/api/functions/alice", echo_body()).await;

    let result = call(&app, "/api/call/alice/echo", r#"{"x":1}"#).await;
    assert_eq!(result.result, "Succeeded");
    assert!(result.log.contains("{'x': 1}"));
    assert!(result.message.contains("Failed to clean up job"));
}

#[tokio::test]
async fn test_call_reports_status_when_log_is_unavailable() {
    let mut cluster = common::python_cluster();
    cluster.fail_logs = true;
    let ctx = TestContext::with_cluster(cluster, Duration::from_secs(10)).await;
    let app = router(ctx.coordinator.clone());
    send_json(&app, "POST", "/api/functions/alice", echo_body()).await;

    let result = call(&app, "/api/call/alice/echo", r#"{"x":1}"#).await;
    assert_eq!(result.result, "Succeeded");
    assert!(result.log.is_empty());
    assert!(result.message.contains("Failed to retrieve log"));
}
