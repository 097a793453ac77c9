// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cluster API seam.
//!
//! The orchestrator only talks to the cluster through [`ClusterApi`]:
//! namespaces, single-run jobs, pod watches, pod logs and cleanup.
//! [`KubeCluster`] implements it against Kubernetes; [`MockCluster`]
//! simulates jobs in memory for tests.

pub mod kubernetes;
pub mod mock;

pub use self::kubernetes::KubeCluster;
pub use self::mock::{MockCluster, MockPod, MockRun};

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors from cluster operations.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum ClusterError {
    /// Object already exists (HTTP 409).
    #[error("{kind} '{name}' already exists")]
    AlreadyExists {
        /// Object kind (e.g. "Namespace").
        kind: &'static str,
        /// Object name.
        name: String,
    },

    /// Object does not exist (HTTP 404).
    #[error("{kind} '{name}' not found")]
    NotFound {
        /// Object kind.
        kind: &'static str,
        /// Object name.
        name: String,
    },

    /// The API server rejected the request.
    #[error("Cluster API error ({code}): {message}")]
    Api {
        /// HTTP status code.
        code: u16,
        /// Server message.
        message: String,
    },

    /// The watch stream failed or ended unexpectedly.
    #[error("Watch error: {0}")]
    Watch(String),

    /// Transport or client configuration failure.
    #[error("Cluster client error: {0}")]
    Client(String),
}

/// Lifecycle phase of a pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PodPhase {
    /// Accepted but not all containers started.
    Pending,
    /// At least one container is running.
    Running,
    /// All containers exited with status 0.
    Succeeded,
    /// At least one container exited with a non-zero status.
    Failed,
    /// The pod state could not be obtained.
    Unknown,
}

impl PodPhase {
    /// Parse a phase as reported by the cluster. Unrecognized values map to `Unknown`.
    pub fn parse(phase: &str) -> Self {
        match phase {
            "Pending" => PodPhase::Pending,
            "Running" => PodPhase::Running,
            "Succeeded" => PodPhase::Succeeded,
            "Failed" => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }

    /// Whether the pod is still pending or running.
    pub fn is_active(self) -> bool {
        matches!(self, PodPhase::Pending | PodPhase::Running)
    }

    /// Phase name as reported by the cluster.
    pub fn as_str(self) -> &'static str {
        match self {
            PodPhase::Pending => "Pending",
            PodPhase::Running => "Running",
            PodPhase::Succeeded => "Succeeded",
            PodPhase::Failed => "Failed",
            PodPhase::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for PodPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observed state of one pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodInfo {
    /// Pod name.
    pub name: String,
    /// Current phase.
    pub phase: PodPhase,
    /// Reason reported with the phase, if any.
    pub reason: Option<String>,
}

/// A namespace as returned by the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceInfo {
    /// Namespace name.
    pub name: String,
    /// Server-assigned identity, when known.
    pub uid: Option<String>,
}

/// Single-run job submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    /// Job name, also used as the container name.
    pub name: String,
    /// Target namespace.
    pub namespace: String,
    /// Image reference.
    pub image: String,
    /// Container environment.
    pub env: BTreeMap<String, String>,
    /// Labels applied to the job and its pod template.
    pub labels: BTreeMap<String, String>,
}

/// Render labels as an equality-based label selector (`k1=v1,k2=v2`).
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// An active pod watch subscription.
///
/// Events arrive in order on a channel fed by the backend. Dropping the watch
/// or calling [`stop`](Self::stop) ends the subscription.
pub struct PodWatch {
    events: mpsc::Receiver<Result<PodInfo, ClusterError>>,
    stopper: Option<Box<dyn FnOnce() + Send>>,
}

impl PodWatch {
    /// Wrap an event channel; `stopper` runs once when the watch is stopped.
    pub fn new(
        events: mpsc::Receiver<Result<PodInfo, ClusterError>>,
        stopper: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            events,
            stopper: Some(Box::new(stopper)),
        }
    }

    /// Next observed pod state, or `None` once the stream has ended.
    pub async fn next_event(&mut self) -> Option<Result<PodInfo, ClusterError>> {
        self.events.recv().await
    }

    /// Stop the subscription.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.events.close();
        if let Some(stop) = self.stopper.take() {
            stop();
        }
    }
}

impl Drop for PodWatch {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Cluster operations used by the orchestrator.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Backend identifier (e.g. "kubernetes", "mock").
    fn backend(&self) -> &'static str;

    /// Get a namespace. `Ok(None)` when it does not exist.
    async fn get_namespace(&self, name: &str) -> Result<Option<NamespaceInfo>, ClusterError>;

    /// Create a namespace. Fails with [`ClusterError::AlreadyExists`] if present.
    async fn create_namespace(&self, name: &str) -> Result<NamespaceInfo, ClusterError>;

    /// Submit a job.
    async fn create_job(&self, spec: &JobSpec) -> Result<(), ClusterError>;

    /// Subscribe to state changes of pods matching `selector`.
    ///
    /// Pods that already exist are reported first.
    async fn watch_pods(&self, namespace: &str, selector: &str)
    -> Result<PodWatch, ClusterError>;

    /// List pods matching `selector`.
    async fn list_pods(&self, namespace: &str, selector: &str)
    -> Result<Vec<PodInfo>, ClusterError>;

    /// Read a pod's complete log.
    async fn pod_log(&self, namespace: &str, pod: &str) -> Result<String, ClusterError>;

    /// Delete a job and every pod matching `selector`. Missing objects are not an error.
    async fn delete_job_and_pods(
        &self,
        namespace: &str,
        job_name: &str,
        selector: &str,
    ) -> Result<(), ClusterError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_phase_parse() {
        assert_eq!(PodPhase::parse("Pending"), PodPhase::Pending);
        assert_eq!(PodPhase::parse("Succeeded"), PodPhase::Succeeded);
        assert_eq!(PodPhase::parse("Evicted"), PodPhase::Unknown);
        assert!(PodPhase::Running.is_active());
        assert!(!PodPhase::Unknown.is_active());
        assert_eq!(PodPhase::Failed.to_string(), "Failed");
    }

    #[test]
    fn test_label_selector() {
        let mut labels = BTreeMap::new();
        labels.insert("kexec.io/invocation".to_string(), "echo-1".to_string());
        labels.insert("app".to_string(), "kexec".to_string());

        assert_eq!(
            label_selector(&labels),
            "app=kexec,kexec.io/invocation=echo-1"
        );
    }

    #[tokio::test]
    async fn test_pod_watch_stops_once() {
        let (tx, rx) = mpsc::channel(4);
        let stops = Arc::new(AtomicUsize::new(0));
        let counter = stops.clone();
        let mut watch = PodWatch::new(rx, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tx.send(Ok(PodInfo {
            name: "p".to_string(),
            phase: PodPhase::Running,
            reason: None,
        }))
        .await
        .unwrap();

        let event = watch.next_event().await.unwrap().unwrap();
        assert_eq!(event.phase, PodPhase::Running);

        watch.stop();
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert!(tx.is_closed());
    }

    #[tokio::test]
    async fn test_pod_watch_stops_on_drop() {
        let (_tx, rx) = mpsc::channel(1);
        let stops = Arc::new(AtomicUsize::new(0));
        let counter = stops.clone();

        drop(PodWatch::new(rx, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }
}
