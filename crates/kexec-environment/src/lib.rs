// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! kexec Environment - Function Build and Execution
//!
//! Turns user-submitted source code into container images and runs each
//! invocation as a single-run Kubernetes job.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        HTTP clients                              │
//! └──────────────────────────────────────────────────────────────────┘
//!                                │ JSON API (port 8080)
//!                                ▼
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                 kexec-environment (This Crate)                   │
//! │  ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌──────────────┐   │
//! │  │ Packager  │─▶│  Image    │─▶│  Image    │  │ Orchestrator │   │
//! │  │           │  │  Builder  │  │ Publisher │  │              │   │
//! │  └───────────┘  └───────────┘  └───────────┘  └──────────────┘   │
//! │                 └────── Coordinator ─────────────────┘           │
//! └──────────────────────────────────────────────────────────────────┘
//!          │                    │                       │
//!          ▼                    ▼                       ▼
//! ┌─────────────────┐  ┌─────────────────┐   ┌──────────────────────┐
//! │  kexec-store    │  │ Docker daemon + │   │  Kubernetes          │
//! │ (Postgres/SQLite│  │ image registry  │   │  (<owner>-serverless │
//! │  functions,     │  │                 │   │   namespaces, jobs)  │
//! │  executions)    │  │                 │   │                      │
//! └─────────────────┘  └─────────────────┘   └──────────────────────┘
//! ```
//!
//! # Invocation Lifecycle
//!
//! ```text
//! Submitted ─▶ Pending ─▶ Running ─▶ Succeeded | Failed | Unknown ─▶ Cleaned
//!     │                                                                ▲
//!     └──────────────── deadline elapsed (ExecutionTimeout) ───────────┘
//! ```
//!
//! The job and its pods are deleted on every path, including errors.
//!
//! # Runtimes
//!
//! | Runtime | Base image |
//! |---------|------------|
//! | `python27` | `python:2.7` |
//! | `python3` | `python:3.12-slim` |
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `KEXEC_DATABASE_URL` | `sqlite:.data/kexec.db?mode=rwc` | `postgres://` or `sqlite:` URL |
//! | `KEXEC_HTTP_PORT` | `8080` | JSON API port |
//! | `KEXEC_DOCKER_HOST` | local defaults | Docker endpoint |
//! | `KEXEC_REGISTRY` | `localhost:5000` | Image registry prefix |
//! | `KEXEC_KUBECONFIG` | inferred | Kubeconfig path |
//! | `KEXEC_BUILD_ROOT` | `/tmp/faas-imagebuild-context` | Build context root |
//! | `KEXEC_EXEC_TIMEOUT_SECS` | `120` | Invocation deadline |
//! | `KEXEC_CONTEXT_MAX_AGE_SECS` | `86400` | Age before retained contexts are removed |
//! | `KEXEC_CONTEXT_POLL_SECS` | `3600` | Context reaper interval |
//!
//! # Modules
//!
//! - [`api`]: JSON HTTP API
//! - [`coordinator`]: Function lifecycle and invocations
//! - [`orchestrator`]: Cluster job execution
//! - [`packager`], [`builder`], [`publisher`]: Build pipeline
//! - [`cluster`], [`image`]: Backend seams with real and mock implementations

#![warn(missing_docs)]

/// JSON HTTP API.
pub mod api;

/// Per-build context directories.
pub mod build_context;

/// Image builder.
pub mod builder;

/// Cluster API seam and backends (Kubernetes, mock).
pub mod cluster;

/// Configuration loaded from environment variables.
pub mod config;

/// Background worker for removing old build contexts.
pub mod context_reaper;

/// Function lifecycle and invocation coordination.
pub mod coordinator;

/// Error types for Environment operations.
pub mod error;

/// Container build service seam and backends (Docker, mock).
pub mod image;

/// Cluster job execution.
pub mod orchestrator;

/// Wraps user code into executable artifacts.
pub mod packager;

/// Pushes built images to the registry.
pub mod publisher;

/// Embeddable runtime (HTTP server plus background workers).
pub mod runtime;

/// Runtime template registry.
pub mod templates;

pub use coordinator::{Coordinator, CoordinatorConfig, InvocationOutcome};
pub use error::{Error, Result};
pub use orchestrator::{ExecutionOutcome, Orchestrator};
