// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! FormFlow Core - Journey Instance Engine
//!
//! This crate keeps the state of multi-page form journeys ("wizards") across
//! HTTP requests. Each run of a journey is a journey instance, identified by the
//! journey name, the route or query values the journey declares, and an
//! optional random token that keeps parallel runs apart.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           Web Framework                                  │
//! │         (route declares a journey, request carries route/query values)  │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │ RequestContext
//!                                    ▼
//! ┌───────────────────────┐    ┌─────────────────────────────────────────────┐
//! │   JourneyRegistry     │◄───│            InstanceResolver                 │
//! │ (name → descriptor)   │    │  resolve / create / get-or-create / is-current
//! └───────────────────────┘    └─────────────────────────────────────────────┘
//!                                    │                     │
//!                                    │ InstanceId          │ Instance<S>
//!                                    ▼                     ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          StateStore                                      │
//! │        InMemoryStateStore │ SqliteStateStore │ TrackingStateStore        │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    ▲
//!                                    │ purge finished instances
//!                          ┌───────────────────┐
//!                          │   CleanupWorker   │
//!                          └───────────────────┘
//! ```
//!
//! # Instance Identity
//!
//! An [`InstanceId`] serializes as `journey?key=value&key=value`. Equality
//! ignores key order. When a journey appends a unique key, every creation
//! adds a fresh `ffiid` token so two runs with the same route values never
//! collide.
//!
//! # Instance Lifecycle
//!
//! ```text
//!                ┌────────┐
//!     create ───►│ ACTIVE │◄─── update_state
//!                └───┬────┘
//!                    │
//!          complete  │  delete
//!          ┌─────────┴─────────┐
//!          ▼                   ▼
//!    ┌───────────┐       ┌─────────┐
//!    │ COMPLETED │       │ DELETED │
//!    └───────────┘       └─────────┘
//! ```
//!
//! | Status | Resolvable | Writable | Purged by cleanup |
//! |--------|------------|----------|-------------------|
//! | `ACTIVE` | Yes | Yes | No |
//! | `COMPLETED` | Yes | No | After retention |
//! | `DELETED` | No | No | After retention |
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `FORMFLOW_DATABASE_PATH` | `.data/formflow.db` | SQLite database file |
//! | `FORMFLOW_SQLITE_MAX_CONNECTIONS` | `5` | SQLite pool size |
//! | `FORMFLOW_CLEANUP_ENABLED` | `false` | Run the cleanup worker |
//! | `FORMFLOW_CLEANUP_POLL_INTERVAL_SECS` | `3600` | Seconds between cleanup runs |
//! | `FORMFLOW_CLEANUP_MAX_AGE_DAYS` | `30` | Retention of finished instances |
//! | `FORMFLOW_CLEANUP_BATCH_SIZE` | `100` | Instances removed per batch |
//!
//! # Modules
//!
//! - [`journey`]: Journey descriptors and the registry
//! - [`instance_id`]: Instance identity, derivation and serialization
//! - [`values`]: Request value providers
//! - [`persistence`]: State store contract and backends
//! - [`instance`]: Typed instance handle
//! - [`resolver`]: Per-request resolution
//! - [`cleanup_worker`]: Retention of finished instances
//! - [`config`]: Configuration from environment variables
//! - [`error`]: Error types with error codes

#![deny(missing_docs)]

/// Background purge of completed and deleted instances.
pub mod cleanup_worker;

/// Store configuration loaded from environment variables.
pub mod config;

/// Error types with stable error codes.
pub mod error;

/// Typed journey instance handle.
pub mod instance;

/// Instance identity: derivation, equality and the textual form.
pub mod instance_id;

/// Journey descriptors and the registry.
pub mod journey;

/// Embedded database migrations.
pub mod migrations;

/// State store contract with in-memory, SQLite and tracking backends.
pub mod persistence;

/// Request-scoped instance resolution.
pub mod resolver;

/// Sources of route and query values.
pub mod values;

pub use cleanup_worker::{CleanupWorker, CleanupWorkerConfig};
pub use error::{FormFlowError, Result};
pub use instance::Instance;
pub use instance_id::{InstanceId, UNIQUE_KEY};
pub use journey::{JourneyDescriptor, JourneyRegistry, JourneyRegistryBuilder, RequiredKey};
pub use persistence::{
    InMemoryStateStore, InstanceRecord, InstanceStatus, Properties, SqliteStateStore,
    StateStore, TrackingStateStore,
};
pub use resolver::{InstanceResolver, RequestContext};
pub use values::{CompositeValues, QueryValues, ValueProvider};
