// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker for removing old build contexts.
//!
//! Build contexts (`{build_root}/{owner}-{id}/`) contain the packaged `exec`
//! artifact and the generated `Dockerfile`. Successful builds delete their
//! context right away; failed builds leave it behind for inspection. This
//! worker periodically removes contexts older than the configured age.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::config::DEFAULT_BUILD_ROOT;

/// Configuration for the context reaper.
#[derive(Debug, Clone)]
pub struct ContextReaperConfig {
    /// Directory holding one subdirectory per build context.
    pub build_root: PathBuf,
    /// How often to scan.
    pub poll_interval: Duration,
    /// Minimum age of a context before it is removed.
    pub max_age: Duration,
}

impl Default for ContextReaperConfig {
    fn default() -> Self {
        Self {
            build_root: PathBuf::from(DEFAULT_BUILD_ROOT),
            poll_interval: Duration::from_secs(3600), // 1 hour
            max_age: Duration::from_secs(24 * 3600),  // 24 hours
        }
    }
}

/// Background worker that removes retained build contexts.
pub struct ContextReaper {
    config: ContextReaperConfig,
    shutdown: Arc<Notify>,
}

impl ContextReaper {
    /// Create a new reaper.
    pub fn new(config: ContextReaperConfig) -> Self {
        Self {
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the reaper loop until shutdown is signalled.
    pub async fn run(&self) {
        info!(
            build_root = %self.config.build_root.display(),
            poll_interval_secs = self.config.poll_interval.as_secs(),
            max_age_hours = self.config.max_age.as_secs() / 3600,
            "Context reaper started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Context reaper received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.reap_old_contexts().await {
                        error!(error = %e, "Failed to reap build contexts");
                    }
                }
            }
        }

        info!("Context reaper stopped");
    }

    /// Remove contexts older than `max_age`. Returns how many were removed.
    pub async fn reap_old_contexts(&self) -> std::io::Result<u64> {
        let cutoff = SystemTime::now()
            .checked_sub(self.config.max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut cleaned = 0u64;
        let mut errors = 0u64;

        let mut contexts = match tokio::fs::read_dir(&self.config.build_root).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Build root does not exist, nothing to reap");
                return Ok(0);
            }
            Err(e) => return Err(e),
        };

        while let Some(entry) = contexts.next_entry().await? {
            let path = entry.path();

            let metadata = match entry.metadata().await {
                Ok(m) if m.is_dir() => m,
                Ok(_) => continue,
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "Failed to stat build context");
                    errors += 1;
                    continue;
                }
            };

            let modified = match metadata.modified() {
                Ok(t) => t,
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "Failed to get modification time");
                    errors += 1;
                    continue;
                }
            };

            if modified > cutoff {
                continue;
            }

            match tokio::fs::remove_dir_all(&path).await {
                Ok(()) => {
                    debug!(
                        path = %path.display(),
                        age_secs = modified.elapsed().map(|d| d.as_secs()).unwrap_or(0),
                        "Removed old build context"
                    );
                    cleaned += 1;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to remove build context");
                    errors += 1;
                }
            }
        }

        if cleaned > 0 || errors > 0 {
            info!(cleaned = cleaned, errors = errors, "Reap cycle completed");
        } else {
            debug!("Reap cycle completed, no old contexts found");
        }

        Ok(cleaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn reaper(build_root: PathBuf, max_age: Duration) -> ContextReaper {
        ContextReaper::new(ContextReaperConfig {
            build_root,
            poll_interval: Duration::from_millis(10),
            max_age,
        })
    }

    #[test]
    fn test_config_default() {
        let config = ContextReaperConfig::default();
        assert_eq!(config.build_root, PathBuf::from(DEFAULT_BUILD_ROOT));
        assert_eq!(config.poll_interval, Duration::from_secs(3600));
        assert_eq!(config.max_age, Duration::from_secs(24 * 3600));
    }

    #[tokio::test]
    async fn test_reap_nonexistent_root() {
        let worker = reaper(
            PathBuf::from("/nonexistent/path/that/does/not/exist"),
            Duration::ZERO,
        );
        assert_eq!(worker.reap_old_contexts().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reap_removes_old_contexts_only() {
        let temp_dir = TempDir::new().unwrap();
        let context = temp_dir.path().join("alice-0190");
        tokio::fs::create_dir_all(&context).await.unwrap();
        tokio::fs::write(context.join("exec"), "print(1)").await.unwrap();
        tokio::fs::write(temp_dir.path().join("stray-file"), "x")
            .await
            .unwrap();

        // Too young to reap
        let worker = reaper(temp_dir.path().to_path_buf(), Duration::from_secs(3600));
        assert_eq!(worker.reap_old_contexts().await.unwrap(), 0);
        assert!(context.exists());

        let worker = reaper(temp_dir.path().to_path_buf(), Duration::ZERO);
        assert_eq!(worker.reap_old_contexts().await.unwrap(), 1);
        assert!(!context.exists());
        assert!(temp_dir.path().join("stray-file").exists());
        assert!(temp_dir.path().exists());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let temp_dir = TempDir::new().unwrap();
        let context = temp_dir.path().join("bob-0190");
        tokio::fs::create_dir_all(&context).await.unwrap();

        let worker = Arc::new(reaper(temp_dir.path().to_path_buf(), Duration::ZERO));
        let shutdown = worker.shutdown_handle();
        let task = {
            let worker = worker.clone();
            tokio::spawn(async move { worker.run().await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!context.exists());

        shutdown.notify_one();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("reaper should stop")
            .unwrap();
    }
}
