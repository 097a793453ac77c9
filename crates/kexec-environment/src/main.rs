// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! kexec Environment - Function Build and Execution Server
//!
//! An HTTP server responsible for:
//! - Function registry (create, update, delete, list functions)
//! - Image builds and registry publishing (Docker)
//! - Invocations as single-run Kubernetes jobs
//! - Execution history

use std::sync::Arc;
use tracing::{info, warn};

use kexec_environment::cluster::{ClusterApi, KubeCluster};
use kexec_environment::config::Config;
use kexec_environment::image::{DockerImageService, ImageService};
use kexec_environment::runtime::EnvironmentRuntime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kexec_environment=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    // Load configuration
    let config = Config::from_env()?;

    info!(
        http_addr = %config.http_addr,
        registry = %config.registry,
        build_root = %config.build_root.display(),
        exec_timeout_secs = config.exec_timeout.as_secs(),
        "Starting kexec Environment"
    );

    // Connect to the metadata store (runs migrations)
    let store = kexec_store::connect(&config.database_url).await?;
    info!("Connected to metadata store");

    // Container build service
    let images = Arc::new(DockerImageService::connect(config.docker_host.as_deref())?);
    info!(image_service = images.service_type(), "Image service initialized");

    // Cluster backend
    let cluster = Arc::new(KubeCluster::connect(config.kubeconfig.as_deref()).await?);
    info!(cluster = cluster.backend(), "Cluster client initialized");

    // Start the runtime
    let runtime = EnvironmentRuntime::builder()
        .config(&config)
        .store(store)
        .image_service(images)
        .cluster(cluster)
        .build()?
        .start()
        .await?;

    info!(addr = %runtime.local_addr(), "Environment server ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    // Graceful shutdown
    runtime.shutdown().await?;

    info!("kexec Environment shut down");

    Ok(())
}
