// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for kexec-environment.
//!
//! [`EnvironmentRuntime`] wires the metadata store, image service and cluster
//! backend into a [`Coordinator`], then serves the JSON API and runs the
//! build-context reaper until [`shutdown`](EnvironmentRuntime::shutdown).
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use kexec_environment::cluster::KubeCluster;
//! use kexec_environment::image::DockerImageService;
//! use kexec_environment::runtime::EnvironmentRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = kexec_store::connect("sqlite:.data/kexec.db?mode=rwc").await?;
//!     let images = Arc::new(DockerImageService::connect_local()?);
//!     let cluster = Arc::new(KubeCluster::connect(None).await?);
//!
//!     let runtime = EnvironmentRuntime::builder()
//!         .store(store)
//!         .image_service(images)
//!         .cluster(cluster)
//!         .bind_addr("0.0.0.0:8080".parse()?)
//!         .registry("localhost:5000")
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     // ... run your application ...
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use kexec_store::MetadataStore;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::cluster::ClusterApi;
use crate::config::{Config, DEFAULT_BUILD_ROOT};
use crate::context_reaper::{ContextReaper, ContextReaperConfig};
use crate::coordinator::{Coordinator, CoordinatorConfig};
use crate::image::ImageService;
use crate::orchestrator::DEFAULT_EXEC_TIMEOUT;

/// Builder for creating an [`EnvironmentRuntime`].
pub struct EnvironmentRuntimeBuilder {
    store: Option<Arc<dyn MetadataStore>>,
    images: Option<Arc<dyn ImageService>>,
    cluster: Option<Arc<dyn ClusterApi>>,
    bind_addr: SocketAddr,
    registry: String,
    build_root: PathBuf,
    exec_timeout: Duration,
    context_poll_interval: Duration,
    context_max_age: Duration,
}

impl Default for EnvironmentRuntimeBuilder {
    fn default() -> Self {
        Self {
            store: None,
            images: None,
            cluster: None,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            registry: "localhost:5000".to_string(),
            build_root: PathBuf::from(DEFAULT_BUILD_ROOT),
            exec_timeout: DEFAULT_EXEC_TIMEOUT,
            context_poll_interval: Duration::from_secs(3600), // 1 hour
            context_max_age: Duration::from_secs(24 * 3600),  // 24 hours
        }
    }
}

impl EnvironmentRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every setting from a loaded [`Config`]. Backends still need to be set.
    pub fn config(self, config: &Config) -> Self {
        self.bind_addr(config.http_addr)
            .registry(config.registry.clone())
            .build_root(config.build_root.clone())
            .exec_timeout(config.exec_timeout)
            .context_poll_interval(config.context_poll_interval)
            .context_max_age(config.context_max_age)
    }

    /// Set the metadata store (required).
    pub fn store(mut self, store: Arc<dyn MetadataStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the image build service (required).
    pub fn image_service(mut self, images: Arc<dyn ImageService>) -> Self {
        self.images = Some(images);
        self
    }

    /// Set the cluster backend (required).
    pub fn cluster(mut self, cluster: Arc<dyn ClusterApi>) -> Self {
        self.cluster = Some(cluster);
        self
    }

    /// Set the bind address for the HTTP API. Port 0 picks a free port.
    ///
    /// Default: `0.0.0.0:8080`
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the registry prefix for function images.
    ///
    /// Default: `localhost:5000`
    pub fn registry(mut self, registry: impl Into<String>) -> Self {
        self.registry = registry.into();
        self
    }

    /// Set the directory for build contexts.
    pub fn build_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.build_root = path.into();
        self
    }

    /// Set the invocation deadline.
    ///
    /// Default: 120 seconds
    pub fn exec_timeout(mut self, timeout: Duration) -> Self {
        self.exec_timeout = timeout;
        self
    }

    /// Set the context reaper poll interval.
    ///
    /// Default: 1 hour
    pub fn context_poll_interval(mut self, interval: Duration) -> Self {
        self.context_poll_interval = interval;
        self
    }

    /// Set the age after which retained build contexts are removed.
    ///
    /// Default: 24 hours
    pub fn context_max_age(mut self, max_age: Duration) -> Self {
        self.context_max_age = max_age;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if a backend is missing.
    pub fn build(self) -> Result<EnvironmentRuntimeConfig> {
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("store is required"))?;
        let images = self
            .images
            .ok_or_else(|| anyhow::anyhow!("image_service is required"))?;
        let cluster = self
            .cluster
            .ok_or_else(|| anyhow::anyhow!("cluster is required"))?;

        Ok(EnvironmentRuntimeConfig {
            store,
            images,
            cluster,
            bind_addr: self.bind_addr,
            coordinator: CoordinatorConfig {
                registry: self.registry,
                build_root: self.build_root.clone(),
                exec_timeout: self.exec_timeout,
            },
            reaper: ContextReaperConfig {
                build_root: self.build_root,
                poll_interval: self.context_poll_interval,
                max_age: self.context_max_age,
            },
        })
    }
}

/// Configuration for an [`EnvironmentRuntime`].
pub struct EnvironmentRuntimeConfig {
    store: Arc<dyn MetadataStore>,
    images: Arc<dyn ImageService>,
    cluster: Arc<dyn ClusterApi>,
    bind_addr: SocketAddr,
    coordinator: CoordinatorConfig,
    reaper: ContextReaperConfig,
}

impl EnvironmentRuntimeConfig {
    /// Start the runtime, spawning the HTTP server and context reaper tasks.
    pub async fn start(self) -> Result<EnvironmentRuntime> {
        let coordinator = Arc::new(Coordinator::new(
            self.store,
            self.images.clone(),
            self.cluster.clone(),
            self.coordinator,
        ));

        // Create context reaper
        let reaper = ContextReaper::new(self.reaper);
        let reaper_shutdown = reaper.shutdown_handle();
        let reaper_handle = tokio::spawn(async move {
            reaper.run().await;
        });

        // Start HTTP server task
        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        let (server_shutdown_tx, server_shutdown_rx) = watch::channel(false);

        let app = crate::api::router(coordinator.clone());
        let server_handle = tokio::spawn(run_http_server_with_shutdown(
            listener,
            app,
            server_shutdown_rx,
        ));

        info!(
            bind_addr = %local_addr,
            image_service = self.images.service_type(),
            cluster = self.cluster.backend(),
            "EnvironmentRuntime started"
        );

        Ok(EnvironmentRuntime {
            server_handle,
            reaper_handle,
            server_shutdown_tx,
            reaper_shutdown,
            coordinator,
            local_addr,
        })
    }
}

/// A running kexec-environment instance that can be embedded in an application.
///
/// The runtime manages:
/// - HTTP server for the JSON API
/// - Context reaper for removing retained build contexts
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct EnvironmentRuntime {
    server_handle: JoinHandle<Result<()>>,
    reaper_handle: JoinHandle<()>,
    server_shutdown_tx: watch::Sender<bool>,
    reaper_shutdown: Arc<Notify>,
    coordinator: Arc<Coordinator>,
    local_addr: SocketAddr,
}

impl EnvironmentRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> EnvironmentRuntimeBuilder {
        EnvironmentRuntimeBuilder::new()
    }

    /// Address the HTTP server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Get a reference to the shared coordinator.
    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Gracefully shut down the runtime.
    ///
    /// Stops accepting requests, lets in-flight requests finish, stops the
    /// context reaper and waits for both tasks.
    pub async fn shutdown(self) -> Result<()> {
        info!("EnvironmentRuntime shutting down...");

        // Signal server shutdown
        let _ = self.server_shutdown_tx.send(true);

        // Signal context reaper shutdown
        self.reaper_shutdown.notify_one();

        // Wait for context reaper
        if let Err(e) = self.reaper_handle.await {
            error!("Context reaper task panicked: {}", e);
        }

        // Wait for server
        match self.server_handle.await {
            Ok(Ok(())) => {
                info!("EnvironmentRuntime shutdown complete");
                Ok(())
            }
            Ok(Err(e)) => {
                error!("EnvironmentRuntime server error during shutdown: {}", e);
                Err(e)
            }
            Err(e) => {
                error!("EnvironmentRuntime server task panicked: {}", e);
                Err(anyhow::anyhow!("server task panicked: {}", e))
            }
        }
    }

    /// Check if the runtime is still running.
    pub fn is_running(&self) -> bool {
        !self.server_handle.is_finished() && !self.reaper_handle.is_finished()
    }
}

/// Serve the API until the shutdown flag flips to true.
async fn run_http_server_with_shutdown(
    listener: tokio::net::TcpListener,
    app: axum::Router,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    info!(addr = ?listener.local_addr().ok(), "HTTP API server starting");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            while !*shutdown_rx.borrow() {
                if shutdown_rx.changed().await.is_err() {
                    break;
                }
            }
            info!("HTTP API server received shutdown signal");
        })
        .await?;

    info!("HTTP API server stopped");
    Ok(())
}
