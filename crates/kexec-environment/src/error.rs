// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for kexec-environment.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::cluster::{ClusterError, PodPhase};
use crate::orchestrator::ExecutionOutcome;

/// Environment errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Request validation failed.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// No template is registered for this runtime identifier.
    #[error("Runtime '{0}' is invalid or not supported")]
    UnsupportedRuntime(String),

    /// The build context has no packaged artifact.
    #[error("Execution file not found: {}", .0.display())]
    MissingArtifact(PathBuf),

    /// The build service rejected the image build.
    #[error("Failed to build image {tag}: {message}")]
    BuildFailed {
        /// Image tag being built.
        tag: String,
        /// Error reported by the build service.
        message: String,
        /// Build output collected before the failure.
        output: String,
    },

    /// The image was built locally but could not be pushed to the registry.
    #[error("Failed to publish image {tag}: {message}")]
    PublishFailed {
        /// Image tag being pushed.
        tag: String,
        /// Error reported by the registry.
        message: String,
        /// Push output collected before the failure.
        output: String,
    },

    /// The owner has no function with this name.
    #[error("Function '{name}' not found for owner '{owner}'")]
    FunctionNotFound {
        /// Function owner.
        owner: String,
        /// Requested function name.
        name: String,
    },

    /// A function with this name is already registered for the owner.
    #[error("Function '{name}' already exists for owner '{owner}'")]
    FunctionExists {
        /// Function owner.
        owner: String,
        /// Requested function name.
        name: String,
    },

    /// No pod of the job settled before the deadline.
    #[error("Timed out after {}s waiting for job {job_name} to complete", .timeout.as_secs())]
    ExecutionTimeout {
        /// Job that was being watched.
        job_name: String,
        /// The deadline that elapsed.
        timeout: Duration,
    },

    /// The job settled but its log could not be read.
    #[error("Failed to retrieve log of job {job_name} (status {status}): {message}")]
    LogRetrieval {
        /// Final status, already decided when log retrieval failed.
        status: PodPhase,
        /// Job whose log was requested.
        job_name: String,
        /// Failure description.
        message: String,
    },

    /// A cluster API call failed.
    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    /// Deleting the job and its pods failed after an otherwise successful run.
    #[error("Failed to clean up job {job_name} (status {}): {source}", .outcome.status)]
    Cleanup {
        /// Job that could not be removed.
        job_name: String,
        /// Underlying cluster error.
        source: ClusterError,
        /// What the run produced before cleanup failed.
        outcome: Box<ExecutionOutcome>,
    },

    /// An invocation failed and the following cleanup failed as well.
    #[error("{primary}; cleanup also failed: {cleanup}")]
    CleanupAfterFailure {
        /// The error that ended the invocation.
        primary: Box<Error>,
        /// The error returned by the cleanup step.
        cleanup: ClusterError,
    },

    /// Metadata store operation failed.
    #[error("Store error: {0}")]
    Store(#[from] kexec_store::StoreError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Status that was already decided when this error happened, if any.
    pub fn settled_status(&self) -> Option<PodPhase> {
        match self {
            Error::LogRetrieval { status, .. } => Some(*status),
            Error::Cleanup { outcome, .. } => Some(outcome.status),
            Error::CleanupAfterFailure { primary, .. } => primary.settled_status(),
            _ => None,
        }
    }

    /// Execution log captured before this error happened, if any.
    pub fn partial_log(&self) -> Option<&str> {
        match self {
            Error::Cleanup { outcome, .. } => Some(outcome.log.as_str()),
            Error::CleanupAfterFailure { primary, .. } => primary.partial_log(),
            _ => None,
        }
    }

    /// Diagnostic output from the build service, if this is a build or publish failure.
    pub fn service_output(&self) -> Option<&str> {
        match self {
            Error::BuildFailed { output, .. } | Error::PublishFailed { output, .. } => {
                Some(output.as_str())
            }
            _ => None,
        }
    }
}

/// Result type using Environment Error.
pub type Result<T> = std::result::Result<T, Error>;
