// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for kexec-store.

use thiserror::Error;

/// Result type using StoreError.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Metadata store errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Applying embedded migrations failed.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// No function with this name exists for the owner.
    #[error("Function '{name}' not found for owner '{owner}'")]
    FunctionNotFound {
        /// Owner of the function.
        owner: String,
        /// Function name as requested.
        name: String,
    },

    /// The connection URL names a backend this crate does not ship.
    #[error("Unsupported database URL: {0}")]
    UnsupportedUrl(String),

    /// I/O operation failed (creating the SQLite database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
