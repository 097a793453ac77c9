// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock cluster for testing.
//!
//! Simulates namespaces, jobs and pods in memory. Each submitted job is turned
//! into pods by a behaviour function, and the pods step through their scripted
//! phases on a background task. Watches receive the same events a real
//! watch would, including the current state of existing pods at subscription
//! time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{
    ClusterApi, ClusterError, JobSpec, NamespaceInfo, PodInfo, PodPhase, PodWatch, label_selector,
};

/// Watch channel capacity; events beyond this are dropped.
const MOCK_WATCH_BUFFER: usize = 64;

/// Scripted lifecycle of one pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockPod {
    /// Phases the pod moves through, in order.
    pub phases: Vec<PodPhase>,
    /// Reason reported with the last phase.
    pub reason: Option<String>,
    /// Log returned once the pod has run.
    pub log: String,
}

/// What a submitted job does: the pods it creates, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockRun {
    /// Pods created for the job.
    pub pods: Vec<MockPod>,
}

impl MockRun {
    /// One pod that runs and ends in `phase` with `log`.
    pub fn settles(phase: PodPhase, log: impl Into<String>) -> Self {
        Self::with_phases(
            vec![PodPhase::Pending, PodPhase::Running, phase],
            log,
        )
    }

    /// One pod that runs and succeeds.
    pub fn succeeded(log: impl Into<String>) -> Self {
        Self::settles(PodPhase::Succeeded, log)
    }

    /// One pod that runs and fails.
    pub fn failed(log: impl Into<String>) -> Self {
        Self::settles(PodPhase::Failed, log)
    }

    /// One pod that stays pending forever.
    pub fn never_completes() -> Self {
        Self::with_phases(vec![PodPhase::Pending], "")
    }

    /// One pod with explicit phases.
    pub fn with_phases(phases: Vec<PodPhase>, log: impl Into<String>) -> Self {
        Self {
            pods: vec![MockPod {
                phases,
                reason: None,
                log: log.into(),
            }],
        }
    }
}

type Behaviour = Arc<dyn Fn(&JobSpec) -> MockRun + Send + Sync>;

struct MockJob {
    spec: JobSpec,
    selector: String,
    pods: Vec<MockPodState>,
}

struct MockPodState {
    info: PodInfo,
    log: String,
}

struct MockWatcher {
    id: u64,
    namespace: String,
    selector: String,
    tx: mpsc::Sender<Result<PodInfo, ClusterError>>,
}

#[derive(Default)]
struct MockState {
    namespaces: HashMap<String, NamespaceInfo>,
    /// Live jobs keyed by (namespace, name)
    jobs: HashMap<(String, String), MockJob>,
    submitted: Vec<JobSpec>,
    deleted: Vec<String>,
    watchers: Vec<MockWatcher>,
    next_watch_id: u64,
    next_uid: u64,
}

impl MockState {
    fn broadcast(&mut self, namespace: &str, selector: &str, pod: &PodInfo) {
        for watcher in &self.watchers {
            if watcher.namespace == namespace && watcher.selector == selector {
                let _ = watcher.tx.try_send(Ok(pod.clone()));
            }
        }
    }
}

/// Mock cluster for testing.
pub struct MockCluster {
    state: Arc<Mutex<MockState>>,
    behaviour: Behaviour,
    active_watches: Arc<AtomicUsize>,
    stale_namespace_reads: AtomicUsize,
    /// Delay between pod phase transitions.
    pub step_delay: Duration,
    /// If true, `create_job` fails.
    pub fail_create_job: bool,
    /// If true, `pod_log` fails.
    pub fail_logs: bool,
    /// If true, `delete_job_and_pods` fails (and leaves everything in place).
    pub fail_cleanup: bool,
    /// Time `delete_job_and_pods` takes before it removes anything.
    pub cleanup_delay: Duration,
    /// If true, watch streams end right after the initial state is sent.
    pub close_watches: bool,
}

impl Default for MockCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCluster {
    /// Create a mock cluster where every job succeeds and logs its
    /// parameters (the first env var value).
    pub fn new() -> Self {
        Self::with_behaviour(|spec| {
            MockRun::succeeded(spec.env.values().next().cloned().unwrap_or_default())
        })
    }

    /// Create a mock cluster whose jobs run as decided by `behaviour`.
    pub fn with_behaviour<F>(behaviour: F) -> Self
    where
        F: Fn(&JobSpec) -> MockRun + Send + Sync + 'static,
    {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            behaviour: Arc::new(behaviour),
            active_watches: Arc::new(AtomicUsize::new(0)),
            stale_namespace_reads: AtomicUsize::new(0),
            step_delay: Duration::from_millis(5),
            fail_create_job: false,
            fail_logs: false,
            fail_cleanup: false,
            cleanup_delay: Duration::ZERO,
            close_watches: false,
        }
    }

    /// Create a mock cluster where jobs never leave Pending.
    pub fn never_completing() -> Self {
        Self::with_behaviour(|_| MockRun::never_completes())
    }

    /// Make the next `count` namespace reads report "not found" even if the
    /// namespace exists, as a concurrent first use would observe.
    pub fn with_stale_namespace_reads(self, count: usize) -> Self {
        self.stale_namespace_reads.store(count, Ordering::SeqCst);
        self
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Every job spec submitted so far.
    pub fn submitted_jobs(&self) -> Vec<JobSpec> {
        self.lock().submitted.clone()
    }

    /// Names of jobs that exist right now.
    pub fn live_jobs(&self) -> Vec<String> {
        self.lock().jobs.keys().map(|(_, name)| name.clone()).collect()
    }

    /// Pods that exist right now for `selector`.
    pub fn live_pods(&self, selector: &str) -> Vec<PodInfo> {
        self.lock()
            .jobs
            .values()
            .filter(|job| job.selector == selector)
            .flat_map(|job| job.pods.iter().map(|p| p.info.clone()))
            .collect()
    }

    /// Names of jobs deleted so far.
    pub fn deleted_jobs(&self) -> Vec<String> {
        self.lock().deleted.clone()
    }

    /// Namespaces that exist right now.
    pub fn namespaces(&self) -> Vec<NamespaceInfo> {
        self.lock().namespaces.values().cloned().collect()
    }

    /// Number of watch subscriptions that have not been stopped.
    pub fn active_watches(&self) -> usize {
        self.active_watches.load(Ordering::SeqCst)
    }

    /// Step a job's pods through their phases in the background.
    fn spawn_lifecycle(&self, key: (String, String), selector: String, run: MockRun) {
        let state = self.state.clone();
        let delay = self.step_delay;

        tokio::spawn(async move {
            for (index, pod) in run.pods.into_iter().enumerate() {
                let last = pod.phases.len().saturating_sub(1);
                for (step, phase) in pod.phases.into_iter().enumerate() {
                    tokio::time::sleep(delay).await;

                    let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
                    let Some(job) = state.jobs.get_mut(&key) else {
                        // Job deleted, stop simulating
                        return;
                    };

                    let name = format!("{}-{}", key.1, index);
                    let info = PodInfo {
                        name: name.clone(),
                        phase,
                        reason: if step == last { pod.reason.clone() } else { None },
                    };

                    match job.pods.iter_mut().find(|p| p.info.name == name) {
                        Some(existing) => existing.info = info.clone(),
                        None => job.pods.push(MockPodState {
                            info: info.clone(),
                            log: pod.log.clone(),
                        }),
                    }

                    state.broadcast(&key.0, &selector, &info);
                }
            }
        });
    }
}

#[async_trait]
impl ClusterApi for MockCluster {
    fn backend(&self) -> &'static str {
        "mock"
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<NamespaceInfo>, ClusterError> {
        let stale = self
            .stale_namespace_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if stale {
            return Ok(None);
        }
        Ok(self.lock().namespaces.get(name).cloned())
    }

    async fn create_namespace(&self, name: &str) -> Result<NamespaceInfo, ClusterError> {
        let mut state = self.lock();
        if state.namespaces.contains_key(name) {
            return Err(ClusterError::AlreadyExists {
                kind: "Namespace",
                name: name.to_string(),
            });
        }

        state.next_uid += 1;
        let ns = NamespaceInfo {
            name: name.to_string(),
            uid: Some(format!("mock-uid-{}", state.next_uid)),
        };
        state.namespaces.insert(name.to_string(), ns.clone());
        Ok(ns)
    }

    async fn create_job(&self, spec: &JobSpec) -> Result<(), ClusterError> {
        if self.fail_create_job {
            return Err(ClusterError::Api {
                code: 403,
                message: "jobs.batch is forbidden".to_string(),
            });
        }

        let key = (spec.namespace.clone(), spec.name.clone());
        let selector = label_selector(&spec.labels);
        {
            let mut state = self.lock();
            if !state.namespaces.contains_key(&spec.namespace) {
                return Err(ClusterError::NotFound {
                    kind: "Namespace",
                    name: spec.namespace.clone(),
                });
            }
            if state.jobs.contains_key(&key) {
                return Err(ClusterError::AlreadyExists {
                    kind: "Job",
                    name: spec.name.clone(),
                });
            }
            state.jobs.insert(
                key.clone(),
                MockJob {
                    spec: spec.clone(),
                    selector: selector.clone(),
                    pods: Vec::new(),
                },
            );
            state.submitted.push(spec.clone());
        }

        let run = (self.behaviour)(spec);
        self.spawn_lifecycle(key, selector, run);
        Ok(())
    }

    async fn watch_pods(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<PodWatch, ClusterError> {
        let (tx, rx) = mpsc::channel(MOCK_WATCH_BUFFER);

        let id = {
            let mut state = self.lock();

            // Current state first, then live updates, under one lock
            for job in state.jobs.values() {
                if job.spec.namespace == namespace && job.selector == selector {
                    for pod in &job.pods {
                        let _ = tx.try_send(Ok(pod.info.clone()));
                    }
                }
            }

            if self.close_watches {
                drop(tx);
                None
            } else {
                state.next_watch_id += 1;
                let id = state.next_watch_id;
                state.watchers.push(MockWatcher {
                    id,
                    namespace: namespace.to_string(),
                    selector: selector.to_string(),
                    tx,
                });
                Some(id)
            }
        };

        self.active_watches.fetch_add(1, Ordering::SeqCst);
        let state = self.state.clone();
        let active = self.active_watches.clone();

        Ok(PodWatch::new(rx, move || {
            if let Some(id) = id {
                let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
                state.watchers.retain(|w| w.id != id);
            }
            active.fetch_sub(1, Ordering::SeqCst);
        }))
    }

    async fn list_pods(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<PodInfo>, ClusterError> {
        let state = self.lock();
        Ok(state
            .jobs
            .values()
            .filter(|job| job.spec.namespace == namespace && job.selector == selector)
            .flat_map(|job| job.pods.iter().map(|p| p.info.clone()))
            .collect())
    }

    async fn pod_log(&self, namespace: &str, pod: &str) -> Result<String, ClusterError> {
        if self.fail_logs {
            return Err(ClusterError::Api {
                code: 500,
                message: "container log unavailable".to_string(),
            });
        }

        let state = self.lock();
        state
            .jobs
            .values()
            .filter(|job| job.spec.namespace == namespace)
            .flat_map(|job| job.pods.iter())
            .find(|p| p.info.name == pod)
            .map(|p| p.log.clone())
            .ok_or_else(|| ClusterError::NotFound {
                kind: "Pod",
                name: pod.to_string(),
            })
    }

    async fn delete_job_and_pods(
        &self,
        namespace: &str,
        job_name: &str,
        _selector: &str,
    ) -> Result<(), ClusterError> {
        if !self.cleanup_delay.is_zero() {
            tokio::time::sleep(self.cleanup_delay).await;
        }

        if self.fail_cleanup {
            return Err(ClusterError::Api {
                code: 503,
                message: "api server unavailable".to_string(),
            });
        }

        let mut state = self.lock();
        if state
            .jobs
            .remove(&(namespace.to_string(), job_name.to_string()))
            .is_some()
        {
            state.deleted.push(job_name.to_string());
        }
        Ok(())
    }
}
