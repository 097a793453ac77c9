// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Invocation coordinator.
//!
//! Entry point for everything the API does with functions. It owns the build
//! pipeline (package, build context, build, publish, record) and the
//! invocation path (lookup, orchestrate, record history).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use kexec_store::{
    DEFAULT_EXECUTION_LIMIT, ExecutionRecord, FunctionRecord, MetadataStore, NewExecution,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::build_context::BuildContext;
use crate::builder::ImageBuilder;
use crate::cluster::{ClusterApi, PodPhase};
use crate::config::{Config, DEFAULT_BUILD_ROOT};
use crate::error::{Error, Result};
use crate::image::{ImageService, image_tag};
use crate::orchestrator::{
    DEFAULT_EXEC_TIMEOUT, ExecutionOutcome, ExecutionRequest, Orchestrator,
};
use crate::packager;
use crate::publisher::ImagePublisher;

/// Status recorded for invocations that ended before a pod settled.
pub const ERROR_STATUS: &str = "Error";

/// Coordinator settings.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Registry prefix for function images.
    pub registry: String,
    /// Directory for build contexts.
    pub build_root: PathBuf,
    /// Deadline for each invocation.
    pub exec_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            registry: "localhost:5000".to_string(),
            build_root: PathBuf::from(DEFAULT_BUILD_ROOT),
            exec_timeout: DEFAULT_EXEC_TIMEOUT,
        }
    }
}

impl From<&Config> for CoordinatorConfig {
    fn from(config: &Config) -> Self {
        Self {
            registry: config.registry.clone(),
            build_root: config.build_root.clone(),
            exec_timeout: config.exec_timeout,
        }
    }
}

/// Result of one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationOutcome {
    /// Id generated for this invocation.
    pub invocation_id: Uuid,
    /// When the invocation started.
    pub started_at: DateTime<Utc>,
    /// What the orchestrator observed.
    pub execution: ExecutionOutcome,
}

impl InvocationOutcome {
    /// Final pod phase.
    pub fn status(&self) -> PodPhase {
        self.execution.status
    }

    /// Captured log.
    pub fn log(&self) -> &str {
        &self.execution.log
    }
}

/// Coordinates function builds and invocations.
#[derive(Clone)]
pub struct Coordinator {
    store: Arc<dyn MetadataStore>,
    images: Arc<dyn ImageService>,
    builder: ImageBuilder,
    publisher: ImagePublisher,
    orchestrator: Orchestrator,
    config: CoordinatorConfig,
}

impl Coordinator {
    /// Wire a coordinator from its backends.
    pub fn new(
        store: Arc<dyn MetadataStore>,
        images: Arc<dyn ImageService>,
        cluster: Arc<dyn ClusterApi>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            store,
            builder: ImageBuilder::new(images.clone()),
            publisher: ImagePublisher::new(images.clone()),
            images,
            orchestrator: Orchestrator::new(cluster, config.exec_timeout),
            config,
        }
    }

    /// The orchestrator used for invocations.
    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Register a new function and build its image.
    ///
    /// Fails with [`Error::FunctionExists`] if the owner already has a function
    /// with this name (ignoring case).
    pub async fn create_function(
        &self,
        owner: &str,
        name: &str,
        runtime: &str,
        code: &str,
    ) -> Result<FunctionRecord> {
        validate_names(owner, name)?;

        if self.store.get_function(owner, name).await?.is_some() {
            return Err(Error::FunctionExists {
                owner: owner.to_string(),
                name: name.to_string(),
            });
        }

        self.deploy(owner, name, runtime, code).await
    }

    /// Rebuild a function with new code or runtime.
    pub async fn update_function(
        &self,
        owner: &str,
        name: &str,
        runtime: &str,
        code: &str,
    ) -> Result<FunctionRecord> {
        validate_names(owner, name)?;
        self.deploy(owner, name, runtime, code).await
    }

    /// Package, build, publish, then record the function.
    ///
    /// The record is only written once the image is in the registry.
    async fn deploy(
        &self,
        owner: &str,
        name: &str,
        runtime: &str,
        code: &str,
    ) -> Result<FunctionRecord> {
        let artifact = packager::package(runtime, code, name)?;

        let context = BuildContext::create(&self.config.build_root, owner, &artifact).await?;

        let built = self
            .builder
            .build(&self.config.registry, owner, name, runtime, context.path())
            .await;

        match built {
            Ok(_) => {
                let path = context.path().to_path_buf();
                if let Err(e) = context.remove().await {
                    warn!(path = %path.display(), error = %e, "Failed to remove build context");
                }
            }
            Err(e) => {
                warn!(
                    path = %context.path().display(),
                    owner = %owner,
                    function = %name,
                    "Keeping build context of failed build"
                );
                return Err(e);
            }
        }

        let image = self
            .publisher
            .publish(&self.config.registry, owner, name)
            .await?;

        let record = self.store.put_function(owner, name, runtime, code).await?;

        info!(
            owner = %owner,
            function = %name,
            runtime = %runtime,
            image = %image,
            "Function deployed"
        );

        Ok(record)
    }

    /// Delete a function's record and history, then its image.
    pub async fn delete_function(&self, owner: &str, name: &str) -> Result<()> {
        validate_names(owner, name)?;

        if !self.store.delete_function(owner, name).await? {
            return Err(Error::FunctionNotFound {
                owner: owner.to_string(),
                name: name.to_string(),
            });
        }

        let tag = image_tag(&self.config.registry, owner, name);
        match self.images.remove_image(&tag).await {
            Ok(()) => debug!(tag = %tag, "Removed function image"),
            Err(e) => warn!(tag = %tag, error = %e, "Failed to remove function image"),
        }

        info!(owner = %owner, function = %name, "Function deleted");
        Ok(())
    }

    /// Get one function.
    pub async fn get_function(&self, owner: &str, name: &str) -> Result<FunctionRecord> {
        validate_names(owner, name)?;
        self.store
            .get_function(owner, name)
            .await?
            .ok_or_else(|| Error::FunctionNotFound {
                owner: owner.to_string(),
                name: name.to_string(),
            })
    }

    /// List an owner's functions.
    pub async fn list_functions(&self, owner: &str) -> Result<Vec<FunctionRecord>> {
        if owner.trim().is_empty() {
            return Err(Error::InvalidInput("Owner is empty".to_string()));
        }
        Ok(self.store.list_functions(owner).await?)
    }

    /// Most recent executions of a function, newest first.
    ///
    /// A `limit` of zero or less uses [`DEFAULT_EXECUTION_LIMIT`].
    pub async fn list_executions(
        &self,
        owner: &str,
        name: &str,
        limit: i64,
    ) -> Result<Vec<ExecutionRecord>> {
        // Resolves to FunctionNotFound for unknown functions
        self.get_function(owner, name).await?;

        let limit = if limit > 0 { limit } else { DEFAULT_EXECUTION_LIMIT };
        Ok(self.store.list_executions(owner, name, limit).await?)
    }

    /// Run a function once with `params` and record the result.
    pub async fn invoke(&self, owner: &str, name: &str, params: &str) -> Result<InvocationOutcome> {
        validate_names(owner, name)?;

        let function = self
            .store
            .get_function(owner, name)
            .await?
            .ok_or_else(|| Error::FunctionNotFound {
                owner: owner.to_string(),
                name: name.to_string(),
            })?;

        let image = image_tag(&self.config.registry, owner, &function.name);
        let invocation_id = Uuid::now_v7();
        let started_at = Utc::now();

        info!(
            owner = %owner,
            function = %function.name,
            invocation_id = %invocation_id,
            "Invoking function"
        );

        let request = ExecutionRequest {
            owner,
            function: &function.name,
            image: &image,
            params,
            invocation_id,
        };

        let result = self.orchestrator.run(&request).await;

        match &result {
            Ok(outcome) => info!(
                owner = %owner,
                function = %function.name,
                job_name = %outcome.job_name,
                phase = %outcome.status,
                "Invocation finished"
            ),
            Err(e) => error!(
                owner = %owner,
                function = %function.name,
                invocation_id = %invocation_id,
                error = %e,
                "Invocation failed"
            ),
        }

        self.record_execution(owner, &function.name, params, invocation_id, started_at, &result)
            .await;

        result.map(|execution| InvocationOutcome {
            invocation_id,
            started_at,
            execution,
        })
    }

    /// Write an execution history entry. Failures are logged only.
    async fn record_execution(
        &self,
        owner: &str,
        name: &str,
        params: &str,
        invocation_id: Uuid,
        started_at: DateTime<Utc>,
        result: &Result<ExecutionOutcome>,
    ) {
        let error_text;
        let (status, log) = match result {
            Ok(outcome) => (outcome.status.as_str(), outcome.log.as_str()),
            Err(e) => {
                let status = e
                    .settled_status()
                    .map(PodPhase::as_str)
                    .unwrap_or(ERROR_STATUS);
                let log = match e.partial_log() {
                    Some(log) => log,
                    None => {
                        error_text = e.to_string();
                        error_text.as_str()
                    }
                };
                (status, log)
            }
        };

        let invocation_id = invocation_id.to_string();
        let entry = NewExecution {
            params,
            status,
            invocation_id: &invocation_id,
            log,
            timestamp: started_at,
        };

        if let Err(e) = self.store.put_execution(owner, name, &entry).await {
            warn!(
                owner = %owner,
                function = %name,
                invocation_id = %invocation_id,
                error = %e,
                "Failed to record execution"
            );
        }
    }
}

fn validate_names(owner: &str, name: &str) -> Result<()> {
    if owner.trim().is_empty() {
        return Err(Error::InvalidInput("Owner is empty".to_string()));
    }
    if name.trim().is_empty() {
        return Err(Error::InvalidInput("Function name is empty".to_string()));
    }
    Ok(())
}
