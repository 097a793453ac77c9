// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Execution orchestrator.
//!
//! Runs one function invocation as a single-run cluster job:
//!
//! 1. Ensure the owner's namespace exists
//! 2. Submit the job with the parameters in its environment
//! 3. Watch the job's pods until one settles or the deadline passes
//! 4. Read the settled pod's log
//! 5. Delete the job and its pods, whatever happened before

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cluster::{ClusterApi, ClusterError, JobSpec, NamespaceInfo, PodPhase, label_selector};
use crate::error::{Error, Result};
use crate::packager::PARAMS_ENV_VAR;

/// Label carrying the job name on every job and pod of an invocation.
pub const INVOCATION_LABEL: &str = "kexec.io/invocation";

/// Default deadline for a job to settle.
pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(120);

const NAMESPACE_SUFFIX: &str = "-serverless";

/// Maximum length of a DNS-1123 label.
const MAX_NAME_LEN: usize = 63;

/// One invocation to run.
#[derive(Debug, Clone)]
pub struct ExecutionRequest<'a> {
    /// Function owner, selects the namespace.
    pub owner: &'a str,
    /// Function name.
    pub function: &'a str,
    /// Published image reference.
    pub image: &'a str,
    /// Raw parameter payload, passed through untouched.
    pub params: &'a str,
    /// Unique invocation id, embedded in the job name.
    pub invocation_id: Uuid,
}

/// Result of a settled invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionOutcome {
    /// Job that ran the invocation.
    pub job_name: String,
    /// Namespace the job ran in.
    pub namespace: String,
    /// Final pod phase.
    pub status: PodPhase,
    /// Complete log of the settled pod.
    pub log: String,
}

/// Namespace for an owner: `<owner>-serverless`, as a valid DNS-1123 label.
pub fn namespace_for_owner(owner: &str) -> String {
    let budget = MAX_NAME_LEN - NAMESPACE_SUFFIX.len();
    let mut base = dns_label(&owner.replace('_', "-"), budget);
    if base.is_empty() {
        base.push_str("default");
    }
    format!("{}{}", base, NAMESPACE_SUFFIX)
}

/// Job name for an invocation: `<function>-<owner>-<invocation id>`.
///
/// The id part is kept whole; the readable prefix is shortened to fit 63 chars.
pub fn job_name(function: &str, owner: &str, invocation_id: &Uuid) -> String {
    let id = invocation_id.simple().to_string();
    let budget = MAX_NAME_LEN - id.len() - 1;
    let mut prefix = dns_label(&format!("{}-{}", function, owner.replace('_', "-")), budget);
    if prefix.is_empty() {
        prefix.push_str("job");
    }
    format!("{}-{}", prefix, id)
}

/// Lowercase, replace invalid characters with `-`, trim dashes, cap length.
fn dns_label(raw: &str, max_len: usize) -> String {
    let mapped: String = raw
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() { c } else { '-' }
        })
        .collect();

    let trimmed = mapped.trim_matches('-');
    let capped: String = trimmed.chars().take(max_len).collect();
    capped.trim_end_matches('-').to_string()
}

/// A submitted job that must be deleted.
///
/// [`release`](Self::release) is the normal path. If the invocation future is
/// dropped before that (client went away), cleanup is spawned from `Drop`.
struct SubmittedJob {
    cluster: Arc<dyn ClusterApi>,
    namespace: String,
    job_name: String,
    selector: String,
    released: bool,
}

impl SubmittedJob {
    async fn release(mut self) -> std::result::Result<(), ClusterError> {
        debug!(job_name = %self.job_name, namespace = %self.namespace, "Deleting job and pods");
        let result = self
            .cluster
            .delete_job_and_pods(&self.namespace, &self.job_name, &self.selector)
            .await;
        // Only after the call returned; a drop while awaiting still falls back to Drop
        self.released = true;
        result
    }
}

impl Drop for SubmittedJob {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            error!(job_name = %self.job_name, "No runtime to clean up abandoned job");
            return;
        };

        warn!(job_name = %self.job_name, "Invocation abandoned, cleaning up job in background");
        let cluster = self.cluster.clone();
        let namespace = std::mem::take(&mut self.namespace);
        let job_name = std::mem::take(&mut self.job_name);
        let selector = std::mem::take(&mut self.selector);
        handle.spawn(async move {
            if let Err(e) = cluster
                .delete_job_and_pods(&namespace, &job_name, &selector)
                .await
            {
                error!(job_name = %job_name, error = %e, "Failed to clean up abandoned job");
            }
        });
    }
}

/// Runs invocations as cluster jobs.
#[derive(Clone)]
pub struct Orchestrator {
    cluster: Arc<dyn ClusterApi>,
    timeout: Duration,
}

impl Orchestrator {
    /// Create an orchestrator. `timeout` bounds the wait for a pod to settle.
    pub fn new(cluster: Arc<dyn ClusterApi>, timeout: Duration) -> Self {
        Self { cluster, timeout }
    }

    /// Deadline applied to each invocation.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Make sure a namespace exists, creating it on first use.
    ///
    /// Safe to call concurrently: losing the creation race re-reads the
    /// namespace the winner created.
    pub async fn ensure_namespace(&self, name: &str) -> Result<NamespaceInfo> {
        match self.cluster.get_namespace(name).await {
            Ok(Some(ns)) => {
                debug!(namespace = %name, "Reusing namespace");
                return Ok(ns);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(namespace = %name, error = %e, "Namespace lookup failed, trying to create it");
            }
        }

        match self.cluster.create_namespace(name).await {
            Ok(ns) => {
                info!(namespace = %name, "Created namespace");
                Ok(ns)
            }
            Err(ClusterError::AlreadyExists { .. }) => {
                debug!(namespace = %name, "Namespace created concurrently");
                self.cluster.get_namespace(name).await?.ok_or_else(|| {
                    Error::Cluster(ClusterError::NotFound {
                        kind: "Namespace",
                        name: name.to_string(),
                    })
                })
            }
            Err(e) => {
                error!(namespace = %name, error = %e, "Failed to create namespace");
                Err(e.into())
            }
        }
    }

    /// Run one invocation to completion.
    ///
    /// The job and its pods are deleted before this returns, on success and on
    /// every error path.
    pub async fn run(&self, request: &ExecutionRequest<'_>) -> Result<ExecutionOutcome> {
        let namespace = namespace_for_owner(request.owner);
        self.ensure_namespace(&namespace).await?;

        let job_name = job_name(request.function, request.owner, &request.invocation_id);

        let mut labels = BTreeMap::new();
        labels.insert(INVOCATION_LABEL.to_string(), job_name.clone());
        let selector = label_selector(&labels);

        let mut env = BTreeMap::new();
        env.insert(PARAMS_ENV_VAR.to_string(), request.params.to_string());

        let spec = JobSpec {
            name: job_name.clone(),
            namespace: namespace.clone(),
            image: request.image.to_string(),
            env,
            labels,
        };

        let job = SubmittedJob {
            cluster: self.cluster.clone(),
            namespace: namespace.clone(),
            job_name: job_name.clone(),
            selector: selector.clone(),
            released: false,
        };

        let result = self.execute(&spec, &selector).await;
        let cleanup = job.release().await;

        merge_cleanup(result, cleanup, &job_name)
    }

    async fn execute(&self, spec: &JobSpec, selector: &str) -> Result<ExecutionOutcome> {
        self.cluster.create_job(spec).await.inspect_err(|e| {
            error!(job_name = %spec.name, namespace = %spec.namespace, error = %e, "Failed to create job");
        })?;

        info!(
            job_name = %spec.name,
            namespace = %spec.namespace,
            image = %spec.image,
            "Job submitted"
        );

        let status = self
            .wait_for_settled(&spec.namespace, &spec.name, selector)
            .await?;

        info!(job_name = %spec.name, phase = %status, "Job settled");

        let log = self
            .fetch_log(&spec.namespace, &spec.name, selector, status)
            .await?;

        Ok(ExecutionOutcome {
            job_name: spec.name.clone(),
            namespace: spec.namespace.clone(),
            status,
            log,
        })
    }

    /// Watch the job's pods until the first one settles or the deadline passes.
    async fn wait_for_settled(
        &self,
        namespace: &str,
        job_name: &str,
        selector: &str,
    ) -> Result<PodPhase> {
        let mut watch = self.cluster.watch_pods(namespace, selector).await?;

        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        let mut last_unknown = false;

        let outcome: Result<PodPhase> = loop {
            tokio::select! {
                biased;

                event = watch.next_event() => match event {
                    Some(Ok(pod)) => match pod.phase {
                        PodPhase::Pending | PodPhase::Running => {
                            debug!(job_name = %job_name, pod = %pod.name, phase = %pod.phase, "Pod update");
                            last_unknown = false;
                        }
                        PodPhase::Unknown => {
                            warn!(
                                job_name = %job_name,
                                pod = %pod.name,
                                reason = pod.reason.as_deref().unwrap_or(""),
                                "Pod state unknown"
                            );
                            last_unknown = true;
                        }
                        phase => break Ok(phase),
                    },
                    Some(Err(e)) => {
                        error!(job_name = %job_name, error = %e, "Pod watch failed");
                        break Err(Error::Cluster(e));
                    }
                    None if last_unknown => break Ok(PodPhase::Unknown),
                    None => {
                        break Err(Error::Cluster(ClusterError::Watch(format!(
                            "watch for job {} ended before any pod settled",
                            job_name
                        ))));
                    }
                },

                () = &mut deadline => {
                    warn!(job_name = %job_name, timeout_secs = self.timeout.as_secs(), "Job did not settle in time");
                    break Err(Error::ExecutionTimeout {
                        job_name: job_name.to_string(),
                        timeout: self.timeout,
                    });
                }
            }
        };

        watch.stop();
        outcome
    }

    /// Read the log of the first settled pod of the job.
    async fn fetch_log(
        &self,
        namespace: &str,
        job_name: &str,
        selector: &str,
        status: PodPhase,
    ) -> Result<String> {
        let log_error = |message: String| {
            error!(job_name = %job_name, phase = %status, error = %message, "Failed to read job log");
            Error::LogRetrieval {
                status,
                job_name: job_name.to_string(),
                message,
            }
        };

        let pods = self
            .cluster
            .list_pods(namespace, selector)
            .await
            .map_err(|e| log_error(e.to_string()))?;

        let pod = pods
            .into_iter()
            .find(|p| !p.phase.is_active())
            .ok_or_else(|| log_error("no settled pod found".to_string()))?;

        self.cluster
            .pod_log(namespace, &pod.name)
            .await
            .map_err(|e| log_error(e.to_string()))
    }
}

/// Combine the invocation result with the cleanup result.
fn merge_cleanup(
    result: Result<ExecutionOutcome>,
    cleanup: std::result::Result<(), ClusterError>,
    job_name: &str,
) -> Result<ExecutionOutcome> {
    match (result, cleanup) {
        (result, Ok(())) => result,
        (Ok(outcome), Err(source)) => {
            error!(job_name = %job_name, error = %source, "Job cleanup failed");
            Err(Error::Cleanup {
                job_name: job_name.to_string(),
                source,
                outcome: Box::new(outcome),
            })
        }
        (Err(primary), Err(cleanup)) => {
            error!(job_name = %job_name, error = %cleanup, "Job cleanup failed after error");
            Err(Error::CleanupAfterFailure {
                primary: Box::new(primary),
                cleanup,
            })
        }
    }
}
