// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-build context directories.
//!
//! Each build gets a fresh `{build_root}/{owner}-{uuid v7}` directory holding
//! the packaged artifact. The directory is never reused. The coordinator
//! removes it after a successful build; failed builds leave it in place for
//! inspection until the [`ContextReaper`](crate::context_reaper::ContextReaper)
//! removes it.

use std::path::{Path, PathBuf};

use tracing::debug;
use uuid::Uuid;

/// File name of the packaged artifact inside a build context.
pub const ARTIFACT_FILE: &str = "exec";

/// File name of the build descriptor inside a build context.
pub const BUILD_DESCRIPTOR_FILE: &str = "Dockerfile";

/// A freshly created build context directory.
#[derive(Debug)]
pub struct BuildContext {
    path: PathBuf,
}

impl BuildContext {
    /// Create a new context under `build_root` and write `artifact` into it.
    pub async fn create(build_root: &Path, owner: &str, artifact: &str) -> std::io::Result<Self> {
        tokio::fs::create_dir_all(build_root).await?;

        let path = build_root.join(format!("{}-{}", sanitize(owner), Uuid::now_v7()));
        // create_dir (not _all) so an existing directory is an error
        tokio::fs::create_dir(&path).await?;
        tokio::fs::write(path.join(ARTIFACT_FILE), artifact).await?;

        debug!(path = %path.display(), "Created build context");

        Ok(Self { path })
    }

    /// Context directory path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the context directory and everything in it.
    pub async fn remove(self) -> std::io::Result<()> {
        tokio::fs::remove_dir_all(&self.path).await
    }
}

fn sanitize(owner: &str) -> String {
    owner
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
