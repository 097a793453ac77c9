// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Image registry publisher.

use std::sync::Arc;

use tracing::{error, info};

use crate::error::{Error, Result};
use crate::image::{ImageService, image_tag};

/// Pushes built function images to the registry.
#[derive(Clone)]
pub struct ImagePublisher {
    service: Arc<dyn ImageService>,
}

impl ImagePublisher {
    /// Create a publisher on top of an image service.
    pub fn new(service: Arc<dyn ImageService>) -> Self {
        Self { service }
    }

    /// Push the image previously built for `function`. Returns the tag.
    ///
    /// A [`Error::PublishFailed`] means the image exists locally but cannot
    /// be pulled by the cluster, so the function is not invocable yet.
    pub async fn publish(&self, registry: &str, owner: &str, function: &str) -> Result<String> {
        let tag = image_tag(registry, owner, function);

        match self.service.push_image(&tag).await {
            Ok(_) => {
                info!(tag = %tag, "Function image published");
                Ok(tag)
            }
            Err(e) => {
                error!(tag = %tag, error = %e, "Failed to publish function image");
                Err(Error::PublishFailed {
                    tag,
                    message: e.message,
                    output: e.output,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::MockImageService;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_publish_pushes_tag() {
        let service = Arc::new(MockImageService::new());
        let mut archive = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(4);
        header.set_cksum();
        archive
            .append_data(&mut header, "Dockerfile", "FROM".as_bytes())
            .unwrap();
        service
            .build_image(
                "localhost:5000/alice/echo",
                Bytes::from(archive.into_inner().unwrap()),
            )
            .await
            .unwrap();

        let publisher = ImagePublisher::new(service.clone());
        let tag = publisher
            .publish("localhost:5000", "alice", "Echo")
            .await
            .unwrap();

        assert_eq!(tag, "localhost:5000/alice/echo");
        assert_eq!(service.pushed_tags().await, vec![tag]);
    }

    #[tokio::test]
    async fn test_publish_failure_is_distinct() {
        let publisher = ImagePublisher::new(Arc::new(MockImageService::failing_push()));

        let err = publisher
            .publish("localhost:5000", "alice", "echo")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::PublishFailed { .. }));
        assert!(err.to_string().contains("authentication required"));
    }
}
