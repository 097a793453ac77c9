// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed metadata store.

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use super::{ExecutionRecord, FunctionRecord, MetadataStore, NewExecution, name_key};
use crate::error::{Result, StoreError};

/// SQLite-backed metadata store, for single-node deployments and tests.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a store from an existing pool. Migrations are not applied.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create and initialize a store from a database file path.
    ///
    /// Creates parent directories and the database file if they don't exist,
    /// then runs all migrations.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        Self::from_url(&url).await
    }

    /// Connect with a `sqlite:` URL and run all migrations.
    pub async fn from_url(url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;

        crate::migrations::run_sqlite(&pool).await?;

        Ok(Self { pool })
    }

    /// Fresh in-memory database with migrations applied.
    ///
    /// Uses a single connection so every query sees the same database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        crate::migrations::run_sqlite(&pool).await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn list_functions(&self, owner: &str) -> Result<Vec<FunctionRecord>> {
        let rows = sqlx::query_as::<_, FunctionRecord>(
            r#"
            SELECT id, owner, name, runtime, content, updated_at
            FROM functions
            WHERE owner = ?
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
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (owner, name_key) DO UPDATE SET
                name = excluded.name,
                runtime = excluded.runtime,
                content = excluded.content,
                updated_at = excluded.updated_at
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

        Ok(record)
    }

    async fn get_function(&self, owner: &str, name: &str) -> Result<Option<FunctionRecord>> {
        let record = sqlx::query_as::<_, FunctionRecord>(
            r#"
            SELECT id, owner, name, runtime, content, updated_at
            FROM functions
            WHERE owner = ? AND name_key = ?
            "#,
        )
        .bind(owner)
        .bind(name_key(name))
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn delete_function(&self, owner: &str, name: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        // Explicit so history goes away even when foreign keys are off.
        sqlx::query(
            r#"
            DELETE FROM executions
            WHERE function_id IN (SELECT id FROM functions WHERE owner = ? AND name_key = ?)
            "#,
        )
        .bind(owner)
        .bind(name_key(name))
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query("DELETE FROM functions WHERE owner = ? AND name_key = ?")
            .bind(owner)
            .bind(name_key(name))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

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
            SELECT id, ?, ?, ?, ?, ?
            FROM functions
            WHERE owner = ? AND name_key = ?
            RETURNING id
            "#,
        )
        .bind(execution.params)
        .bind(execution.status)
        .bind(execution.invocation_id)
        .bind(execution.log)
        .bind(execution.timestamp)
        .bind(owner)
        .bind(name_key(name))
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
            WHERE f.owner = ? AND f.name_key = ?
            ORDER BY e.created_at DESC, e.id DESC
            LIMIT ?
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

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> SqliteStore {
        SqliteStore::in_memory()
            .await
            .expect("Failed to create in-memory SQLite store")
    }

    fn execution<'a>(status: &'a str, invocation_id: &'a str) -> NewExecution<'a> {
        NewExecution {
            params: r#"{"x":1}"#,
            status,
            invocation_id,
            log: "{u'x': 1}\n",
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_put_and_get_function() {
        let store = test_store().await;

        let stored = store
            .put_function("alice", "echo", "python27", "def echo(p): print(p)")
            .await
            .expect("Failed to put function");

        let fetched = store
            .get_function("alice", "echo")
            .await
            .expect("Query should succeed")
            .expect("Function should exist");

        assert_eq!(fetched, stored);
        assert_eq!(fetched.runtime, "python27");
    }

    #[tokio::test]
    async fn test_get_function_ignores_case() {
        let store = test_store().await;
        store
            .put_function("alice", "Echo", "python27", "code")
            .await
            .unwrap();

        let fetched = store.get_function("alice", "ECHO").await.unwrap();
        assert_eq!(fetched.map(|f| f.name), Some("Echo".to_string()));
    }

    #[tokio::test]
    async fn test_put_function_replaces_same_name() {
        let store = test_store().await;
        let first = store
            .put_function("alice", "echo", "python27", "v1")
            .await
            .unwrap();
        let second = store
            .put_function("alice", "ECHO", "python3", "v2")
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.content, "v2");
        assert_eq!(second.runtime, "python3");
        assert_eq!(store.list_functions("alice").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_functions_are_scoped_by_owner() {
        let store = test_store().await;
        store.put_function("alice", "echo", "python27", "a").await.unwrap();
        store.put_function("bob", "echo", "python27", "b").await.unwrap();

        let alice = store.list_functions("alice").await.unwrap();
        assert_eq!(alice.len(), 1);
        assert_eq!(alice[0].content, "a");
        assert!(store.get_function("carol", "echo").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_function_removes_history() {
        let store = test_store().await;
        store.put_function("alice", "echo", "python27", "a").await.unwrap();
        store
            .put_execution("alice", "echo", &execution("Succeeded", "inv-1"))
            .await
            .unwrap();

        assert!(store.delete_function("alice", "echo").await.unwrap());
        assert!(!store.delete_function("alice", "echo").await.unwrap());

        // Re-creating the function must not resurrect old executions
        store.put_function("alice", "echo", "python27", "a").await.unwrap();
        let history = store.list_executions("alice", "echo", 10).await.unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn test_put_execution_unknown_function() {
        let store = test_store().await;

        let err = store
            .put_execution("alice", "missing", &execution("Succeeded", "inv-1"))
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::FunctionNotFound { .. }));
    }

    #[tokio::test]
    async fn test_list_executions_newest_first_with_limit() {
        let store = test_store().await;
        store.put_function("alice", "echo", "python27", "a").await.unwrap();

        for (i, status) in ["Succeeded", "Failed", "Unknown"].iter().enumerate() {
            let invocation_id = format!("inv-{}", i);
            let mut entry = execution(status, &invocation_id);
            entry.timestamp = Utc::now() + chrono::Duration::seconds(i as i64);
            store.put_execution("alice", "echo", &entry).await.unwrap();
        }

        let history = store.list_executions("alice", "Echo", 2).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].invocation_id, "inv-2");
        assert_eq!(history[0].status, "Unknown");
        assert_eq!(history[1].invocation_id, "inv-1");
    }
}
