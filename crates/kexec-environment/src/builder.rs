// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Image builder.
//!
//! Turns a build context directory into a locally built image: writes the
//! runtime Dockerfile, archives the directory and submits it to the
//! [`ImageService`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use tracing::{error, info};

use crate::build_context::{ARTIFACT_FILE, BUILD_DESCRIPTOR_FILE};
use crate::error::{Error, Result};
use crate::image::{ImageService, image_tag};
use crate::templates;

/// Builds function images through an [`ImageService`].
#[derive(Clone)]
pub struct ImageBuilder {
    service: Arc<dyn ImageService>,
}

impl ImageBuilder {
    /// Create a builder on top of an image service.
    pub fn new(service: Arc<dyn ImageService>) -> Self {
        Self { service }
    }

    /// Build the image for `function` from `context_dir`.
    ///
    /// Returns the image tag. The image only exists in the local daemon
    /// afterwards; see [`ImagePublisher`](crate::publisher::ImagePublisher).
    pub async fn build(
        &self,
        registry: &str,
        owner: &str,
        function: &str,
        runtime_id: &str,
        context_dir: &Path,
    ) -> Result<String> {
        let artifact = context_dir.join(ARTIFACT_FILE);
        if !tokio::fs::try_exists(&artifact).await.unwrap_or(false) {
            error!(path = %artifact.display(), "Build context has no execution file");
            return Err(Error::MissingArtifact(artifact));
        }

        let template = templates::lookup(runtime_id)?;
        tokio::fs::write(context_dir.join(BUILD_DESCRIPTOR_FILE), template.dockerfile).await?;

        let dir = context_dir.to_path_buf();
        let archive = tokio::task::spawn_blocking(move || archive_context(&dir))
            .await
            .map_err(|e| std::io::Error::other(format!("archive task failed: {}", e)))??;

        let tag = image_tag(registry, owner, function);
        info!(
            tag = %tag,
            runtime = %runtime_id,
            context_bytes = archive.len(),
            "Building function image"
        );

        match self.service.build_image(&tag, Bytes::from(archive)).await {
            Ok(output) => {
                info!(tag = %tag, output_lines = output.lines().count(), "Function image built");
                Ok(tag)
            }
            Err(e) => {
                error!(tag = %tag, error = %e, output = %e.output, "Function image build failed");
                Err(Error::BuildFailed {
                    tag,
                    message: e.message,
                    output: e.output,
                })
            }
        }
    }
}

/// Tar every regular file under `dir`, with paths relative to `dir`.
///
/// Entries are sorted so the same context always yields the same archive order.
pub fn archive_context(dir: &Path) -> std::io::Result<Vec<u8>> {
    let mut files = Vec::new();
    collect_files(dir, dir, &mut files)?;
    files.sort();

    let mut builder = tar::Builder::new(Vec::new());
    for relative in &files {
        builder.append_path_with_name(dir.join(relative), relative)?;
    }
    builder.into_inner()
}

fn collect_files(root: &Path, dir: &Path, files: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let path = entry.path();

        if file_type.is_dir() {
            collect_files(root, &path, files)?;
        } else if file_type.is_file()
            && let Ok(relative) = path.strip_prefix(root)
        {
            files.push(relative.to_path_buf());
        }
    }
    Ok(())
}
