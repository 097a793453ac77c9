// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Metadata store interface and backend implementations.
//!
//! The orchestrator only depends on [`MetadataStore`]; PostgreSQL and SQLite
//! backends are interchangeable behind it.

pub mod postgres;
pub mod sqlite;

pub use self::postgres::PostgresStore;
pub use self::sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default page size for execution history queries.
pub const DEFAULT_EXECUTION_LIMIT: i64 = 50;

/// A registered function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct FunctionRecord {
    /// Database primary key.
    pub id: i64,
    /// User that owns the function.
    pub owner: String,
    /// Function name as last written (lookups ignore case).
    pub name: String,
    /// Runtime identifier the function was built with (e.g. `python27`).
    pub runtime: String,
    /// Raw user source code, without the generated wrapper.
    pub content: String,
    /// When the function was created or last rebuilt.
    pub updated_at: DateTime<Utc>,
}

/// One recorded invocation of a function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ExecutionRecord {
    /// Database primary key.
    pub id: i64,
    /// Function this execution belongs to.
    pub function_id: i64,
    /// Raw parameter payload passed to the invocation.
    pub params: String,
    /// Terminal status (`Succeeded`, `Failed`, `Unknown`) or `Error`.
    pub status: String,
    /// Unique invocation id, also embedded in the job name.
    pub invocation_id: String,
    /// Captured log text (may be partial or empty on failures).
    pub log: String,
    /// When the invocation started.
    pub created_at: DateTime<Utc>,
}

/// Execution history entry to be recorded.
#[derive(Debug, Clone)]
pub struct NewExecution<'a> {
    /// Raw parameter payload.
    pub params: &'a str,
    /// Terminal status or `Error`.
    pub status: &'a str,
    /// Invocation id.
    pub invocation_id: &'a str,
    /// Captured log text.
    pub log: &'a str,
    /// Invocation start time.
    pub timestamp: DateTime<Utc>,
}

/// Lookup key shared by both backends: names are unique per owner, ignoring case.
pub(crate) fn name_key(name: &str) -> String {
    name.to_lowercase()
}

/// Storage for function definitions and execution history.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// List an owner's functions ordered by name.
    async fn list_functions(&self, owner: &str) -> Result<Vec<FunctionRecord>>;

    /// Insert a function or replace the existing one with the same name.
    async fn put_function(
        &self,
        owner: &str,
        name: &str,
        runtime: &str,
        content: &str,
    ) -> Result<FunctionRecord>;

    /// Get a function by owner and case-insensitive name.
    async fn get_function(&self, owner: &str, name: &str) -> Result<Option<FunctionRecord>>;

    /// Delete a function and its history. Returns whether a row was removed.
    async fn delete_function(&self, owner: &str, name: &str) -> Result<bool>;

    /// Record one execution against an existing function.
    ///
    /// Fails with [`StoreError::FunctionNotFound`](crate::StoreError::FunctionNotFound)
    /// if the function is not registered.
    async fn put_execution(
        &self,
        owner: &str,
        name: &str,
        execution: &NewExecution<'_>,
    ) -> Result<i64>;

    /// Most recent executions of a function, newest first.
    async fn list_executions(
        &self,
        owner: &str,
        name: &str,
        limit: i64,
    ) -> Result<Vec<ExecutionRecord>>;
}
