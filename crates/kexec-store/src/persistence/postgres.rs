// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-backed metadata store.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use super::{ExecutionRecord, FunctionRecord, MetadataStore, NewExecution, name_key};
use crate::error::{Result, StoreError};

/// PostgreSQL-backed metadata store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a store from an existing pool. Migrations are not applied.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `database_url` and apply all pending migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        crate::migrations::run_postgres(&pool).await?;

        Ok(Self { pool })
    }

    /// Underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for PostgresStore {
    async fn list_functions(&self, owner: &str) -> Result<Vec<FunctionRecord>> {
        let rows = sqlx::query_as::<_, FunctionRecord>(
            r#"
            SELECT id, owner, name, runtime, content, updated_at
            FROM functions
            WHERE owner = $1
            ORDER BY name_key
            "#,
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn put_function(
        &self,
        owner: &str,
        name: &str,
        runtime: &str,
        content: &str,
    ) -> Result<FunctionRecord> {
        let record = sqlx::query_as::<_, FunctionRecord>(
            r#"
            INSERT INTO functions (owner, name, name_key, runtime, content, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (owner, name_key) DO UPDATE SET
                name = EXCLUDED.name,
                runtime = EXCLUDED.runtime,
                content = EXCLUDED.content,
                updated_at = EXCLUDED.updated_at
            RETURNING id, owner, name, runtime, content, updated_at
            "#,
        )
        .bind(owner)
        .bind(name)
        .bind(name_key(name))
        .bind(runtime)
        .bind(content)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!(owner = %owner, function = %name, id = record.id, "Stored function");

        Ok(record)
    }

    async fn get_function(&self, owner: &str, name: &str) -> Result<Option<FunctionRecord>> {
        let record = sqlx::query_as::<_, FunctionRecord>(
            r#"
            SELECT id, owner, name, runtime, content, updated_at
            FROM functions
            WHERE owner = $1 AND name_key = $2
            "#,
        )
        .bind(owner)
        .bind(name_key(name))
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn delete_function(&self, owner: &str, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM functions WHERE owner = $1 AND name_key = $2")
            .bind(owner)
            .bind(name_key(name))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn put_execution(
        &self,
        owner: &str,
        name: &str,
        execution: &NewExecution<'_>,
    ) -> Result<i64> {
        let id: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO executions (function_id, params, status, invocation_id, log, created_at)
            SELECT id, $3, $4, $5, $6, $7
            FROM functions
            WHERE owner = $1 AND name_key = $2
            RETURNING id
            "#,
        )
        .bind(owner)
        .bind(name_key(name))
        .bind(execution.params)
        .bind(execution.status)
        .bind(execution.invocation_id)
        .bind(execution.log)
        .bind(execution.timestamp)
        .fetch_optional(&self.pool)
        .await?;

        id.ok_or_else(|| StoreError::FunctionNotFound {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }

    async fn list_executions(
        &self,
        owner: &str,
        name: &str,
        limit: i64,
    ) -> Result<Vec<ExecutionRecord>> {
        let rows = sqlx::query_as::<_, ExecutionRecord>(
            r#"
            SELECT e.id, e.function_id, e.params, e.status, e.invocation_id, e.log, e.created_at
            FROM executions e
            JOIN functions f ON f.id = e.function_id
            WHERE f.owner = $1 AND f.name_key = $2
            ORDER BY e.created_at DESC, e.id DESC
            LIMIT $3
            "#,
        )
        .bind(owner)
        .bind(name_key(name))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
