// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Invocation scenarios through the coordinator with mock backends.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use common::TestContext;
use kexec_environment::Error;
use kexec_environment::cluster::{MockCluster, PodPhase, label_selector};
use kexec_environment::orchestrator::{INVOCATION_LABEL, namespace_for_owner};

#[tokio::test]
async fn test_echo_prints_params() {
    let ctx = TestContext::new().await;
    ctx.create_echo("alice").await;

    let outcome = ctx
        .coordinator
        .invoke("alice", "echo", r#"{"x":1}"#)
        .await
        .unwrap();

    assert_eq!(outcome.status(), PodPhase::Succeeded);
    assert!(outcome.log().contains("{'x': 1}"));
    assert_eq!(outcome.execution.namespace, "alice-serverless");
    assert!(ctx.cluster.live_jobs().is_empty());
}

#[tokio::test]
async fn test_invoke_without_params_settles() {
    let ctx = TestContext::new().await;
    ctx.create_echo("alice").await;

    let outcome = ctx.coordinator.invoke("alice", "echo", "").await.unwrap();

    assert_eq!(outcome.status(), PodPhase::Succeeded);
    assert_eq!(outcome.log(), "{}\n");
}

#[tokio::test]
async fn test_function_lookup_ignores_case() {
    let ctx = TestContext::new().await;
    ctx.create_echo("alice").await;

    let outcome = ctx.coordinator.invoke("alice", "ECHO", "[1]").await.unwrap();
    assert_eq!(outcome.log(), "[1]\n");

    let submitted = ctx.cluster.submitted_jobs();
    assert_eq!(submitted[0].image, "localhost:5000/alice/echo");
}

#[tokio::test]
async fn test_malformed_params_fail_with_decode_error() {
    let ctx = TestContext::new().await;
    ctx.create_echo("alice").await;

    let outcome = ctx
        .coordinator
        .invoke("alice", "echo", "{not json")
        .await
        .unwrap();

    assert_eq!(outcome.status(), PodPhase::Failed);
    assert!(outcome.log().contains("Invalid JSON parameters"));

    let history = ctx
        .coordinator
        .list_executions("alice", "echo", 10)
        .await
        .unwrap();
    assert_eq!(history[0].status, "Failed");
    assert_eq!(history[0].params, "{not json");
}

#[tokio::test]
async fn test_unregistered_function_creates_no_job() {
    let ctx = TestContext::new().await;

    let err = ctx
        .coordinator
        .invoke("alice", "missing", "{}")
        .await
        .unwrap_err();

    assert!(matches!(err, Error::FunctionNotFound { .. }));
    assert!(ctx.cluster.submitted_jobs().is_empty());
    assert!(ctx.cluster.namespaces().is_empty());
}

#[tokio::test]
async fn test_stuck_job_times_out_and_is_removed() {
    let ctx = TestContext::with_cluster(MockCluster::never_completing(), Duration::from_millis(200))
        .await;
    ctx.create_echo("alice").await;

    let err = ctx
        .coordinator
        .invoke("alice", "echo", "{}")
        .await
        .unwrap_err();

    assert!(matches!(err, Error::ExecutionTimeout { .. }));

    let submitted = ctx.cluster.submitted_jobs();
    assert_eq!(submitted.len(), 1);
    let selector = label_selector(&submitted[0].labels);
    assert!(ctx.cluster.live_jobs().is_empty());
    assert!(ctx.cluster.live_pods(&selector).is_empty());
    assert_eq!(ctx.cluster.active_watches(), 0);

    let history = ctx
        .coordinator
        .list_executions("alice", "echo", 10)
        .await
        .unwrap();
    assert_eq!(history[0].status, "Error");
}

#[tokio::test]
async fn test_concurrent_invocations_are_isolated() {
    let ctx = TestContext::new().await;
    ctx.create_echo("alice").await;
    let coordinator = ctx.coordinator.clone();

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .invoke("alice", "echo", &format!(r#"{{"n":{}}}"#, i))
                    .await
                    .map(|outcome| (i, outcome))
            })
        })
        .collect();

    let mut job_names = HashSet::new();
    for task in tasks {
        let (i, outcome) = task.await.unwrap().unwrap();
        assert_eq!(outcome.status(), PodPhase::Succeeded);
        // Each invocation sees only its own pod's log
        assert_eq!(outcome.log(), format!("{{'n': {}}}\n", i));
        job_names.insert(outcome.execution.job_name.clone());
    }

    assert_eq!(job_names.len(), 8);
    assert_eq!(ctx.cluster.namespaces().len(), 1);
    assert!(ctx.cluster.live_jobs().is_empty());

    let selectors: HashSet<_> = ctx
        .cluster
        .submitted_jobs()
        .iter()
        .map(|spec| spec.labels.get(INVOCATION_LABEL).cloned())
        .collect();
    assert_eq!(selectors.len(), 8);

    let history = ctx
        .coordinator
        .list_executions("alice", "echo", 100)
        .await
        .unwrap();
    assert_eq!(history.len(), 8);
}

#[tokio::test]
async fn test_concurrent_namespace_creation() {
    let ctx = TestContext::new().await;
    let orchestrator = Arc::new(ctx.coordinator.orchestrator().clone());
    let name = namespace_for_owner("Bob_Smith");

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let orchestrator = orchestrator.clone();
            let name = name.clone();
            tokio::spawn(async move { orchestrator.ensure_namespace(&name).await })
        })
        .collect();

    let mut uids = HashSet::new();
    for task in tasks {
        let ns = task.await.unwrap().unwrap();
        assert_eq!(ns.name, "bob-smith-serverless");
        uids.insert(ns.uid);
    }

    assert_eq!(uids.len(), 1);
    assert_eq!(ctx.cluster.namespaces().len(), 1);
}

#[tokio::test]
async fn test_owners_get_separate_namespaces() {
    let ctx = TestContext::new().await;
    ctx.create_echo("alice").await;
    ctx.create_echo("bob").await;

    ctx.coordinator.invoke("alice", "echo", "{}").await.unwrap();
    ctx.coordinator.invoke("bob", "echo", "{}").await.unwrap();

    let mut names: Vec<_> = ctx
        .cluster
        .namespaces()
        .into_iter()
        .map(|ns| ns.name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["alice-serverless", "bob-serverless"]);
}

#[tokio::test]
async fn test_history_survives_store_and_is_removed_with_function() {
    let ctx = TestContext::new().await;
    ctx.create_echo("alice").await;
    ctx.coordinator.invoke("alice", "echo", "{}").await.unwrap();

    assert_eq!(
        ctx.store.list_executions("alice", "echo", 10).await.unwrap().len(),
        1
    );

    ctx.coordinator.delete_function("alice", "echo").await.unwrap();
    ctx.create_echo("alice").await;

    assert!(
        ctx.coordinator
            .list_executions("alice", "echo", 10)
            .await
            .unwrap()
            .is_empty()
    );
}
