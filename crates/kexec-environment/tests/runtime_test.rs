// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runtime start/serve/shutdown over a real socket.

use std::sync::Arc;
use std::time::Duration;

use kexec_environment::cluster::MockCluster;
use kexec_environment::image::MockImageService;
use kexec_environment::runtime::EnvironmentRuntime;
use kexec_store::SqliteStore;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

async fn http_get(addr: std::net::SocketAddr, path: &str) -> String {
    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        path, addr
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

#[tokio::test]
async fn test_runtime_serves_health_and_reaps_contexts() {
    let build_root = tempfile::TempDir::new().unwrap();
    let stale = build_root.path().join("alice-stale");
    tokio::fs::create_dir_all(&stale).await.unwrap();

    let runtime = EnvironmentRuntime::builder()
        .store(Arc::new(SqliteStore::in_memory().await.unwrap()))
        .image_service(Arc::new(MockImageService::new()))
        .cluster(Arc::new(MockCluster::new()))
        .bind_addr("127.0.0.1:0".parse().unwrap())
        .build_root(build_root.path())
        .context_poll_interval(Duration::from_millis(20))
        .context_max_age(Duration::ZERO)
        .build()
        .unwrap()
        .start()
        .await
        .unwrap();

    let response = http_get(runtime.local_addr(), "/health").await;
    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains(r#""status":"ok""#));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!stale.exists());

    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_runtime_stops_accepting_after_shutdown() {
    let runtime = EnvironmentRuntime::builder()
        .store(Arc::new(SqliteStore::in_memory().await.unwrap()))
        .image_service(Arc::new(MockImageService::new()))
        .cluster(Arc::new(MockCluster::new()))
        .bind_addr("127.0.0.1:0".parse().unwrap())
        .build()
        .unwrap()
        .start()
        .await
        .unwrap();

    let addr = runtime.local_addr();
    runtime.shutdown().await.unwrap();

    assert!(tokio::net::TcpStream::connect(addr).await.is_err());
}
