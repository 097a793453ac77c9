// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for kexec-environment integration tests.
//!
//! Provides TestContext wiring an in-memory store, the mock image service and
//! a mock cluster whose pods behave like the packaged Python wrapper.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use kexec_environment::cluster::{JobSpec, MockCluster, MockRun};
use kexec_environment::coordinator::{Coordinator, CoordinatorConfig};
use kexec_environment::image::MockImageService;
use kexec_environment::packager::PARAMS_ENV_VAR;
use kexec_store::{MetadataStore, SqliteStore};
use serde_json::Value;

/// Test context with mock backends.
pub struct TestContext {
    pub coordinator: Arc<Coordinator>,
    pub store: Arc<dyn MetadataStore>,
    pub images: Arc<MockImageService>,
    pub cluster: Arc<MockCluster>,
    pub build_root: tempfile::TempDir,
}

impl TestContext {
    /// Context whose jobs run like the Python wrapper.
    pub async fn new() -> Self {
        Self::with_cluster(python_cluster(), Duration::from_secs(10)).await
    }

    /// Context with a custom cluster and invocation deadline.
    pub async fn with_cluster(cluster: MockCluster, exec_timeout: Duration) -> Self {
        let store: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::in_memory()
                .await
                .expect("Failed to create in-memory store"),
        );
        let images = Arc::new(MockImageService::new());
        let cluster = Arc::new(cluster);
        let build_root = tempfile::TempDir::new().expect("Failed to create temp dir");

        let coordinator = Arc::new(Coordinator::new(
            store.clone(),
            images.clone(),
            cluster.clone(),
            CoordinatorConfig {
                registry: "localhost:5000".to_string(),
                build_root: build_root.path().to_path_buf(),
                exec_timeout,
            },
        ));

        Self {
            coordinator,
            store,
            images,
            cluster,
            build_root,
        }
    }

    /// Register the `echo` function for `owner`.
    pub async fn create_echo(&self, owner: &str) {
        self.coordinator
            .create_function(owner, "echo", "python27", "def echo(p): print(p)")
            .await
            .expect("Failed to create echo function");
    }
}

/// Mock cluster whose jobs decode the parameters like the wrapper does:
/// invalid JSON fails with the decode error, anything else prints the value.
pub fn python_cluster() -> MockCluster {
    MockCluster::with_behaviour(python_run)
}

fn python_run(spec: &JobSpec) -> MockRun {
    let raw = spec
        .env
        .get(PARAMS_ENV_VAR)
        .map(String::as_str)
        .unwrap_or("");
    let raw = if raw.is_empty() { "{}" } else { raw };

    match serde_json::from_str::<Value>(raw) {
        Ok(value) => MockRun::succeeded(format!("{}\n", python_repr(&value))),
        Err(e) => MockRun::failed(format!("Invalid JSON parameters: {}\n", e)),
    }
}

/// Render a JSON value the way Python prints the decoded object.
pub fn python_repr(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("'{}'", s),
        Value::Array(items) => format!(
            "[{}]",
            items.iter().map(python_repr).collect::<Vec<_>>().join(", ")
        ),
        Value::Object(map) => format!(
            "{{{}}}",
            map.iter()
                .map(|(k, v)| format!("'{}': {}", k, python_repr(v)))
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}
