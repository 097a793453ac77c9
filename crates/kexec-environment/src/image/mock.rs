// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock image service for testing.
//!
//! Records builds, pushes and removals in memory instead of talking to a
//! container daemon. Failures can be switched on per operation.

use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;

use super::{ImageService, ImageServiceError};

#[derive(Debug, Default)]
struct MockImages {
    /// Files of the last build context per tag, name -> contents
    builds: HashMap<String, HashMap<String, String>>,
    build_order: Vec<String>,
    pushed: Vec<String>,
    removed: Vec<String>,
}

/// Mock image service for testing.
#[derive(Default)]
pub struct MockImageService {
    images: Arc<Mutex<MockImages>>,
    /// If true, every build fails.
    pub fail_build: bool,
    /// If true, every push fails.
    pub fail_push: bool,
    /// If true, every removal fails.
    pub fail_remove: bool,
}

impl MockImageService {
    /// Create a mock service where every operation succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock service whose builds fail.
    pub fn failing_build() -> Self {
        Self {
            fail_build: true,
            ..Self::default()
        }
    }

    /// Create a mock service whose pushes fail.
    pub fn failing_push() -> Self {
        Self {
            fail_push: true,
            ..Self::default()
        }
    }

    /// Tags built so far, in order.
    pub async fn built_tags(&self) -> Vec<String> {
        self.images.lock().await.build_order.clone()
    }

    /// Tags pushed so far, in order.
    pub async fn pushed_tags(&self) -> Vec<String> {
        self.images.lock().await.pushed.clone()
    }

    /// Tags removed so far, in order.
    pub async fn removed_tags(&self) -> Vec<String> {
        self.images.lock().await.removed.clone()
    }

    /// Contents of a file in the most recent build context for `tag`.
    pub async fn build_file(&self, tag: &str, name: &str) -> Option<String> {
        self.images
            .lock()
            .await
            .builds
            .get(tag)
            .and_then(|files| files.get(name).cloned())
    }
}

fn unpack(context: &[u8]) -> Result<HashMap<String, String>, ImageServiceError> {
    let mut archive = tar::Archive::new(context);
    let mut files = HashMap::new();

    let entries = archive
        .entries()
        .map_err(|e| ImageServiceError::new(format!("invalid build context: {}", e)))?;
    for entry in entries {
        let mut entry =
            entry.map_err(|e| ImageServiceError::new(format!("invalid build context: {}", e)))?;
        let name = entry
            .path()
            .map_err(|e| ImageServiceError::new(format!("invalid entry path: {}", e)))?
            .to_string_lossy()
            .to_string();
        let mut contents = String::new();
        entry
            .read_to_string(&mut contents)
            .map_err(|e| ImageServiceError::new(format!("unreadable entry {}: {}", name, e)))?;
        files.insert(name, contents);
    }

    Ok(files)
}

#[async_trait]
impl ImageService for MockImageService {
    fn service_type(&self) -> &'static str {
        "mock"
    }

    async fn build_image(&self, tag: &str, context: Bytes) -> Result<String, ImageServiceError> {
        let files = unpack(&context)?;

        if self.fail_build {
            return Err(ImageServiceError {
                message: "The command '/bin/sh -c pip install' returned a non-zero code: 1"
                    .to_string(),
                output: "Step 1/3 : FROM python:2.7\n".to_string(),
            });
        }

        if !files.contains_key("Dockerfile") {
            return Err(ImageServiceError::new("Cannot locate specified Dockerfile"));
        }

        let mut images = self.images.lock().await;
        images.builds.insert(tag.to_string(), files);
        images.build_order.push(tag.to_string());

        Ok(format!("Successfully tagged {}\n", tag))
    }

    async fn push_image(&self, tag: &str) -> Result<String, ImageServiceError> {
        if self.fail_push {
            return Err(ImageServiceError {
                message: "unauthorized: authentication required".to_string(),
                output: String::new(),
            });
        }

        let mut images = self.images.lock().await;
        if !images.builds.contains_key(tag) {
            return Err(ImageServiceError::new(format!(
                "An image does not exist locally with the tag: {}",
                tag
            )));
        }
        images.pushed.push(tag.to_string());

        Ok("latest: digest: sha256:mock size: 1\n".to_string())
    }

    async fn remove_image(&self, tag: &str) -> Result<(), ImageServiceError> {
        if self.fail_remove {
            return Err(ImageServiceError::new("conflict: image is in use"));
        }

        let mut images = self.images.lock().await;
        images.builds.remove(tag);
        images.removed.push(tag.to_string());
        Ok(())
    }
}
