// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! kexec store - function definitions and execution history.
//!
//! Records which functions each owner has registered (name, runtime and raw
//! source) and a history of their invocations. Function names are unique per
//! owner, ignoring case.
//!
//! Two backends implement [`MetadataStore`]:
//!
//! | Backend | URL scheme | Use |
//! |---------|------------|-----|
//! | [`PostgresStore`] | `postgres://`, `postgresql://` | Shared deployments |
//! | [`SqliteStore`] | `sqlite:` | Single node, local development, tests |
//!
//! ```ignore
//! let store = kexec_store::connect("sqlite:.data/kexec.db?mode=rwc").await?;
//! store.put_function("alice", "echo", "python27", "def echo(p): return p").await?;
//! ```

#![deny(missing_docs)]

pub mod error;
pub mod migrations;
pub mod persistence;

use std::sync::Arc;

pub use error::{Result, StoreError};
pub use persistence::{
    DEFAULT_EXECUTION_LIMIT, ExecutionRecord, FunctionRecord, MetadataStore, NewExecution,
    PostgresStore, SqliteStore,
};

/// Open a store for `database_url`, choosing the backend by URL scheme.
///
/// Migrations are applied before the store is returned.
pub async fn connect(database_url: &str) -> Result<Arc<dyn MetadataStore>> {
    if database_url.starts_with("postgres://") || database_url.starts_with("postgresql://") {
        tracing::info!("Using PostgreSQL metadata store");
        let store = PostgresStore::connect(database_url).await?;
        Ok(Arc::new(store))
    } else if database_url.starts_with("sqlite:") {
        tracing::info!("Using SQLite metadata store");
        if let Some(path) = sqlite_file_path(database_url)
            && let Some(parent) = std::path::Path::new(path).parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let store = SqliteStore::from_url(database_url).await?;
        Ok(Arc::new(store))
    } else {
        Err(StoreError::UnsupportedUrl(database_url.to_string()))
    }
}

/// File path part of a `sqlite:` URL, or `None` for in-memory databases.
fn sqlite_file_path(url: &str) -> Option<&str> {
    let rest = url.strip_prefix("sqlite:")?;
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let path = rest.split('?').next().unwrap_or(rest);
    if path.is_empty() || path == ":memory:" {
        None
    } else {
        Some(path)
    }
}
