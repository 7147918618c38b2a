// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! FormFlow Cleanup - retention worker for the SQLite state store
//!
//! Opens (and migrates) the configured database, then removes completed and
//! deleted journey instances older than the retention period until Ctrl-C.

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};

use formflow_core::cleanup_worker::{CleanupWorker, CleanupWorkerConfig};
use formflow_core::config::Config;
use formflow_core::persistence::SqliteStateStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("formflow_core=info".parse()?),
        )
        .init();

    info!("Starting FormFlow cleanup");

    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;
    let worker_config = CleanupWorkerConfig::from_env();

    info!(
        database_path = %config.database_path.display(),
        max_connections = config.sqlite_max_connections,
        enabled = worker_config.enabled,
        "Configuration loaded"
    );

    if !worker_config.enabled {
        info!("Cleanup disabled, set FORMFLOW_CLEANUP_ENABLED=true to enable");
        return Ok(());
    }

    let store = SqliteStateStore::from_path_with_pool_size(
        &config.database_path,
        config.sqlite_max_connections,
    )
    .await?;
    let pool = store.pool().clone();
    info!("Database ready");

    let worker = Arc::new(CleanupWorker::new(Arc::new(store), worker_config));
    let shutdown = worker.shutdown_handle();

    let worker_handle = tokio::spawn({
        let worker = worker.clone();
        async move { worker.run().await }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    shutdown.notify_one();
    if let Err(e) = worker_handle.await {
        error!("Cleanup worker task failed: {}", e);
    }

    pool.close().await;
    info!("Shutdown complete");

    Ok(())
}
