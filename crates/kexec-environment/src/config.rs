// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for kexec-environment.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default root for build context directories.
pub const DEFAULT_BUILD_ROOT: &str = "/tmp/faas-imagebuild-context";

/// Environment configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Metadata store URL (`postgres://...` or `sqlite:...`)
    pub database_url: String,
    /// Bind address for the JSON API
    pub http_addr: SocketAddr,
    /// Docker endpoint; local defaults when unset
    pub docker_host: Option<String>,
    /// Registry prefix for function images
    pub registry: String,
    /// Explicit kubeconfig path; inferred (in-cluster or ~/.kube/config) when unset
    pub kubeconfig: Option<PathBuf>,
    /// Directory holding per-build context directories
    pub build_root: PathBuf,
    /// Deadline for a single invocation to settle
    pub exec_timeout: Duration,
    /// Age after which retained build contexts are removed
    pub context_max_age: Duration,
    /// How often the build context reaper runs
    pub context_poll_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database_url = non_empty("KEXEC_DATABASE_URL")
            .unwrap_or_else(|| "sqlite:.data/kexec.db?mode=rwc".to_string());

        let port: u16 = non_empty("KEXEC_HTTP_PORT")
            .unwrap_or_else(|| "8080".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let http_addr = SocketAddr::from(([0, 0, 0, 0], port));

        let docker_host = non_empty("KEXEC_DOCKER_HOST");

        let registry = non_empty("KEXEC_REGISTRY")
            .unwrap_or_else(|| "localhost:5000".to_string())
            .trim_end_matches('/')
            .to_string();

        let kubeconfig = non_empty("KEXEC_KUBECONFIG").map(PathBuf::from);

        let build_root = PathBuf::from(
            non_empty("KEXEC_BUILD_ROOT").unwrap_or_else(|| DEFAULT_BUILD_ROOT.to_string()),
        );

        let exec_timeout = parse_secs(&non_empty, "KEXEC_EXEC_TIMEOUT_SECS", 120)?;
        if exec_timeout.is_zero() {
            return Err(ConfigError::InvalidDuration("KEXEC_EXEC_TIMEOUT_SECS"));
        }

        let context_max_age = parse_secs(&non_empty, "KEXEC_CONTEXT_MAX_AGE_SECS", 24 * 3600)?;
        if context_max_age.is_zero() {
            return Err(ConfigError::InvalidDuration("KEXEC_CONTEXT_MAX_AGE_SECS"));
        }

        let context_poll_interval = parse_secs(&non_empty, "KEXEC_CONTEXT_POLL_SECS", 3600)?;
        if context_poll_interval.is_zero() {
            return Err(ConfigError::InvalidDuration("KEXEC_CONTEXT_POLL_SECS"));
        }

        Ok(Self {
            database_url,
            http_addr,
            docker_host,
            registry,
            kubeconfig,
            build_root,
            exec_timeout,
            context_max_age,
            context_poll_interval,
        })
    }
}

fn parse_secs<F>(lookup: &F, key: &'static str, default: u64) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::InvalidDuration(key)),
        None => Ok(Duration::from_secs(default)),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The port number is invalid.
    #[error("Invalid port number")]
    InvalidPort,
    /// A duration variable is not a valid number of seconds.
    #[error("Invalid duration in {0}: expected a positive number of seconds")]
    InvalidDuration(&'static str),
}
