// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Docker daemon backend for [`ImageService`].

use async_trait::async_trait;
use bollard::Docker;
use bollard::body_full;
use bollard::query_parameters::{BuildImageOptionsBuilder, PushImageOptions, RemoveImageOptions};
use bytes::Bytes;
use futures::StreamExt;
use tracing::{debug, info};

use super::{ImageService, ImageServiceError};

/// Seconds before a daemon request times out.
const DOCKER_TIMEOUT_SECS: u64 = 600;

/// Image service backed by a Docker daemon.
pub struct DockerImageService {
    docker: Docker,
}

impl DockerImageService {
    /// Connect to the local Docker daemon (`DOCKER_HOST` or the default socket).
    pub fn connect_local() -> Result<Self, ImageServiceError> {
        let docker = Docker::connect_with_local_defaults().map_err(|e| {
            ImageServiceError::new(format!("Failed to connect to Docker daemon: {}", e))
        })?;
        Ok(Self { docker })
    }

    /// Connect to a specific Docker address.
    ///
    /// Supported address formats:
    /// - Unix socket: `unix:///var/run/docker.sock` or `/var/run/docker.sock`
    /// - HTTP: `http://localhost:2375` or `tcp://localhost:2375`
    pub fn with_address(address: &str) -> Result<Self, ImageServiceError> {
        let connected = if address.starts_with("http://") || address.starts_with("tcp://") {
            let addr = address
                .trim_start_matches("http://")
                .trim_start_matches("tcp://");
            Docker::connect_with_http(
                &format!("http://{}", addr),
                DOCKER_TIMEOUT_SECS,
                bollard::API_DEFAULT_VERSION,
            )
        } else {
            let socket_path = address.trim_start_matches("unix://");
            Docker::connect_with_socket(
                socket_path,
                DOCKER_TIMEOUT_SECS,
                bollard::API_DEFAULT_VERSION,
            )
        };

        let docker = connected.map_err(|e| {
            ImageServiceError::new(format!(
                "Failed to connect to Docker daemon at {}: {}",
                address, e
            ))
        })?;
        Ok(Self { docker })
    }

    /// Connect to `address` when given, otherwise to the local daemon.
    pub fn connect(address: Option<&str>) -> Result<Self, ImageServiceError> {
        match address {
            Some(address) => Self::with_address(address),
            None => Self::connect_local(),
        }
    }
}

#[async_trait]
impl ImageService for DockerImageService {
    fn service_type(&self) -> &'static str {
        "docker"
    }

    async fn build_image(&self, tag: &str, context: Bytes) -> Result<String, ImageServiceError> {
        let options = BuildImageOptionsBuilder::default()
            .dockerfile("Dockerfile")
            .t(tag)
            .rm(true)
            .build();

        let mut stream = self
            .docker
            .build_image(options, None, Some(body_full(context)));

        let mut output = String::new();
        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(line) = info.stream {
                        debug!(tag = %tag, line = %line.trim_end(), "Build progress");
                        output.push_str(&line);
                    }
                }
                Err(e) => {
                    return Err(ImageServiceError {
                        message: e.to_string(),
                        output,
                    });
                }
            }
        }

        info!(tag = %tag, "Image built");
        Ok(output)
    }

    async fn push_image(&self, tag: &str) -> Result<String, ImageServiceError> {
        let mut stream = self.docker.push_image(tag, None::<PushImageOptions>, None);

        let mut output = String::new();
        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!(tag = %tag, status = %status, "Push progress");
                        output.push_str(&status);
                        output.push('\n');
                    }
                }
                Err(e) => {
                    return Err(ImageServiceError {
                        message: e.to_string(),
                        output,
                    });
                }
            }
        }

        info!(tag = %tag, "Image pushed");
        Ok(output)
    }

    async fn remove_image(&self, tag: &str) -> Result<(), ImageServiceError> {
        let options = RemoveImageOptions {
            force: true,
            ..Default::default()
        };

        match self.docker.remove_image(tag, Some(options), None).await {
            Ok(_) => {
                info!(tag = %tag, "Image removed");
                Ok(())
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                debug!(tag = %tag, "Image already absent");
                Ok(())
            }
            Err(e) => Err(ImageServiceError::new(e.to_string())),
        }
    }
}
