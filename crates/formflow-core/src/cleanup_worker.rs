// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker that purges finished journey instances.
//!
//! Completed and deleted instances stay readable until they are older than the
//! configured retention period, then get physically removed in batches:
//!
//! 1. Query terminal instances with `finished_at` before `now - max_age`
//! 2. Delete them with [`StateStore::delete_instances_batch`]
//! 3. Repeat until a batch comes back short

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::persistence::StateStore;

/// Configuration for the cleanup worker.
#[derive(Debug, Clone)]
pub struct CleanupWorkerConfig {
    /// Whether cleanup is enabled.
    pub enabled: bool,
    /// How often to run cleanup.
    pub poll_interval: Duration,
    /// Minimum age of a terminal instance before it is removed.
    pub max_age: Duration,
    /// Maximum instances to delete per batch.
    pub batch_size: i64,
}

impl Default for CleanupWorkerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            poll_interval: Duration::from_secs(3600),     // 1 hour
            max_age: Duration::from_secs(30 * 24 * 3600), // 30 days
            batch_size: 100,
        }
    }
}

impl CleanupWorkerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `FORMFLOW_CLEANUP_ENABLED`: "true" or "1" to enable (default: false)
    /// - `FORMFLOW_CLEANUP_POLL_INTERVAL_SECS`: seconds between runs (default: 3600)
    /// - `FORMFLOW_CLEANUP_MAX_AGE_DAYS`: retention in days (default: 30)
    /// - `FORMFLOW_CLEANUP_BATCH_SIZE`: max instances per batch (default: 100)
    ///
    /// Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let enabled = std::env::var("FORMFLOW_CLEANUP_ENABLED")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(defaults.enabled);

        let poll_interval = std::env::var("FORMFLOW_CLEANUP_POLL_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.poll_interval);

        let max_age = std::env::var("FORMFLOW_CLEANUP_MAX_AGE_DAYS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(|days| Duration::from_secs(days * 24 * 3600))
            .unwrap_or(defaults.max_age);

        let batch_size = std::env::var("FORMFLOW_CLEANUP_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|n: &i64| *n > 0)
            .unwrap_or(defaults.batch_size);

        Self {
            enabled,
            poll_interval,
            max_age,
            batch_size,
        }
    }
}

/// Periodically removes terminal instances past their retention period.
pub struct CleanupWorker {
    store: Arc<dyn StateStore>,
    config: CleanupWorkerConfig,
    shutdown: Arc<Notify>,
}

impl CleanupWorker {
    /// Create a new cleanup worker.
    pub fn new(store: Arc<dyn StateStore>, config: CleanupWorkerConfig) -> Self {
        Self {
            store,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the cleanup loop until shutdown is signalled.
    ///
    /// Returns immediately when the worker is disabled.
    pub async fn run(&self) {
        if !self.config.enabled {
            info!("Cleanup worker disabled");
            return;
        }

        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            max_age_days = self.config.max_age.as_secs() / 86400,
            batch_size = self.config.batch_size,
            "Cleanup worker started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Cleanup worker received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.run_once().await {
                        error!(error = %e, "Failed to clean up finished instances");
                    }
                }
            }
        }

        info!("Cleanup worker stopped");
    }

    /// Run a single cleanup cycle and return the number of removed instances.
    pub async fn run_once(&self) -> Result<u64> {
        let Some(cutoff) = TimeDelta::from_std(self.config.max_age)
            .ok()
            .and_then(|max_age| Utc::now().checked_sub_signed(max_age))
        else {
            debug!("Retention period reaches before the epoch, nothing to clean up");
            return Ok(0);
        };

        let mut total_deleted = 0u64;

        loop {
            let instance_ids = self
                .store
                .get_terminal_instances_older_than(cutoff, self.config.batch_size)
                .await?;

            if instance_ids.is_empty() {
                break;
            }

            let batch_size = instance_ids.len();
            let deleted = self.store.delete_instances_batch(&instance_ids).await?;
            total_deleted += deleted;

            if deleted < batch_size as u64 {
                warn!(
                    batch_size = batch_size,
                    deleted = deleted,
                    "Some instances in the batch were already removed"
                );
            }

            debug!(
                batch_size = batch_size,
                deleted = deleted,
                total_deleted = total_deleted,
                "Cleaned up batch of instances"
            );

            if batch_size < self.config.batch_size as usize {
                break;
            }
        }

        if total_deleted > 0 {
            info!(
                total_deleted = total_deleted,
                cutoff = %cutoff,
                "Cleanup cycle completed"
            );
        } else {
            debug!("Cleanup cycle completed, no finished instances found");
        }

        Ok(total_deleted)
    }
}
