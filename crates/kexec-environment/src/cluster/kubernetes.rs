// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Kubernetes backend for [`ClusterApi`].

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::batch::v1::{Job, JobSpec as KubeJobSpec};
use k8s_openapi::api::core::v1::{Container, EnvVar, Namespace, Pod, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, ListParams, LogParams, PostParams, WatchEvent, WatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{ClusterApi, ClusterError, JobSpec, NamespaceInfo, PodInfo, PodPhase, PodWatch};

/// Buffered watch events before the watch task waits for the consumer.
const WATCH_BUFFER: usize = 32;

/// Cluster backend talking to a Kubernetes API server.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    /// Use an existing client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using `kubeconfig` when given, otherwise the inferred
    /// configuration (in-cluster service account or `~/.kube/config`).
    pub async fn connect(kubeconfig: Option<&Path>) -> Result<Self, ClusterError> {
        let client = match kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                    ClusterError::Client(format!(
                        "Failed to read kubeconfig {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                let config =
                    Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                        .await
                        .map_err(|e| ClusterError::Client(e.to_string()))?;
                Client::try_from(config).map_err(|e| ClusterError::Client(e.to_string()))?
            }
            None => Client::try_default()
                .await
                .map_err(|e| ClusterError::Client(e.to_string()))?,
        };

        Ok(Self { client })
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn map_error(kind: &'static str, name: &str, err: kube::Error) -> ClusterError {
    match err {
        kube::Error::Api(resp) if resp.code == 409 => ClusterError::AlreadyExists {
            kind,
            name: name.to_string(),
        },
        kube::Error::Api(resp) if resp.code == 404 => ClusterError::NotFound {
            kind,
            name: name.to_string(),
        },
        kube::Error::Api(resp) => ClusterError::Api {
            code: resp.code,
            message: resp.message,
        },
        other => ClusterError::Client(other.to_string()),
    }
}

fn namespace_info(ns: &Namespace) -> NamespaceInfo {
    NamespaceInfo {
        name: ns.metadata.name.clone().unwrap_or_default(),
        uid: ns.metadata.uid.clone(),
    }
}

/// Current state of a pod. A pod without a reported phase is still pending.
fn pod_info(pod: &Pod) -> PodInfo {
    let status = pod.status.as_ref();
    PodInfo {
        name: pod.metadata.name.clone().unwrap_or_default(),
        phase: status
            .and_then(|s| s.phase.as_deref())
            .map(PodPhase::parse)
            .unwrap_or(PodPhase::Pending),
        reason: status.and_then(|s| s.reason.clone()),
    }
}

/// Job manifest: one container, never restarted, no retries.
fn job_manifest(spec: &JobSpec) -> Job {
    let env = spec
        .env
        .iter()
        .map(|(name, value)| EnvVar {
            name: name.clone(),
            value: Some(value.clone()),
            ..Default::default()
        })
        .collect();

    let labels: BTreeMap<String, String> = spec.labels.clone();

    Job {
        metadata: ObjectMeta {
            name: Some(spec.name.clone()),
            namespace: Some(spec.namespace.clone()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(KubeJobSpec {
            backoff_limit: Some(0),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some("Never".to_string()),
                    containers: vec![Container {
                        name: spec.name.clone(),
                        image: Some(spec.image.clone()),
                        env: Some(env),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    fn backend(&self) -> &'static str {
        "kubernetes"
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<NamespaceInfo>, ClusterError> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let ns = namespaces
            .get_opt(name)
            .await
            .map_err(|e| map_error("Namespace", name, e))?;
        Ok(ns.as_ref().map(namespace_info))
    }

    async fn create_namespace(&self, name: &str) -> Result<NamespaceInfo, ClusterError> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let mut labels = BTreeMap::new();
        labels.insert("name".to_string(), name.to_string());

        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            ..Default::default()
        };

        let created = namespaces
            .create(&PostParams::default(), &ns)
            .await
            .map_err(|e| map_error("Namespace", name, e))?;

        info!(namespace = %name, "Created namespace");
        Ok(namespace_info(&created))
    }

    async fn create_job(&self, spec: &JobSpec) -> Result<(), ClusterError> {
        let jobs: Api<Job> = Api::namespaced(self.client.clone(), &spec.namespace);
        jobs.create(&PostParams::default(), &job_manifest(spec))
            .await
            .map_err(|e| map_error("Job", &spec.name, e))?;
        Ok(())
    }

    async fn watch_pods(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<PodWatch, ClusterError> {
        let pods = self.pods(namespace);
        let params = WatchParams::default().labels(selector);
        let (tx, rx) = mpsc::channel(WATCH_BUFFER);

        let handle = tokio::spawn(async move {
            let stream = match pods.watch(&params, "0").await {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = tx.send(Err(ClusterError::Watch(e.to_string()))).await;
                    return;
                }
            };
            let mut stream = std::pin::pin!(stream);

            while let Some(event) = stream.next().await {
                let item = match event {
                    Ok(WatchEvent::Added(pod))
                    | Ok(WatchEvent::Modified(pod))
                    | Ok(WatchEvent::Deleted(pod)) => Ok(pod_info(&pod)),
                    Ok(WatchEvent::Bookmark(_)) => continue,
                    Ok(WatchEvent::Error(e)) => Err(ClusterError::Watch(e.message)),
                    Err(e) => Err(ClusterError::Watch(e.to_string())),
                };
                if tx.send(item).await.is_err() {
                    break;
                }
            }
        });

        debug!(namespace = %namespace, selector = %selector, "Pod watch started");
        Ok(PodWatch::new(rx, move || handle.abort()))
    }

    async fn list_pods(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<PodInfo>, ClusterError> {
        let list = self
            .pods(namespace)
            .list(&ListParams::default().labels(selector))
            .await
            .map_err(|e| map_error("Pod", selector, e))?;
        Ok(list.items.iter().map(pod_info).collect())
    }

    async fn pod_log(&self, namespace: &str, pod: &str) -> Result<String, ClusterError> {
        self.pods(namespace)
            .logs(pod, &LogParams::default())
            .await
            .map_err(|e| map_error("Pod", pod, e))
    }

    async fn delete_job_and_pods(
        &self,
        namespace: &str,
        job_name: &str,
        selector: &str,
    ) -> Result<(), ClusterError> {
        let jobs: Api<Job> = Api::namespaced(self.client.clone(), namespace);

        let job_result = match jobs.delete(job_name, &DeleteParams::background()).await {
            Ok(_) => Ok(()),
            Err(e) => match map_error("Job", job_name, e) {
                ClusterError::NotFound { .. } => Ok(()),
                other => Err(other),
            },
        };

        // Pods go even if the job delete failed
        let pods_result = self
            .pods(namespace)
            .delete_collection(
                &DeleteParams::background(),
                &ListParams::default().labels(selector),
            )
            .await
            .map(|_| ())
            .map_err(|e| map_error("Pod", selector, e));

        debug!(namespace = %namespace, job = %job_name, "Deleted job and pods");
        job_result.and(pods_result)
    }
}
