// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Container build and registry service.
//!
//! [`ImageService`] is the seam to the container daemon: build an image from a
//! tar archive, push it, remove it. [`DockerImageService`] talks to a Docker
//! daemon; [`MockImageService`] records calls for tests.

pub mod docker;
pub mod mock;

pub use docker::DockerImageService;
pub use mock::MockImageService;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Error from the container build service, with whatever output it produced.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ImageServiceError {
    /// Failure description.
    pub message: String,
    /// Output collected before the failure (build steps, push progress).
    pub output: String,
}

impl ImageServiceError {
    /// Create an error without collected output.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            output: String::new(),
        }
    }
}

/// Container build and registry operations.
#[async_trait]
pub trait ImageService: Send + Sync {
    /// Service type identifier (e.g. "docker", "mock").
    fn service_type(&self) -> &'static str;

    /// Build an image tagged `tag` from a tar archive of the build context.
    ///
    /// Returns the build output.
    async fn build_image(&self, tag: &str, context: Bytes) -> Result<String, ImageServiceError>;

    /// Push a locally built image to its registry. Returns the push output.
    async fn push_image(&self, tag: &str) -> Result<String, ImageServiceError>;

    /// Remove a local image. Removing an image that does not exist succeeds.
    async fn remove_image(&self, tag: &str) -> Result<(), ImageServiceError>;
}

/// Deterministic image reference for a function: `registry/owner/lowercase(function)`.
pub fn image_tag(registry: &str, owner: &str, function: &str) -> String {
    format!(
        "{}/{}/{}",
        registry.trim_end_matches('/'),
        owner,
        function.to_lowercase()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_tag() {
        assert_eq!(
            image_tag("localhost:5000", "alice", "Echo"),
            "localhost:5000/alice/echo"
        );
        assert_eq!(
            image_tag("registry.example.com/", "bob", "sum"),
            "registry.example.com/bob/sum"
        );
    }
}
