// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::path::PathBuf;

use crate::persistence::sqlite::DEFAULT_MAX_CONNECTIONS;

/// Default location of the SQLite database file.
pub const DEFAULT_DATABASE_PATH: &str = ".data/formflow.db";

/// Store configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path of the SQLite database file
    pub database_path: PathBuf,
    /// Size of the SQLite connection pool
    pub sqlite_max_connections: u32,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Optional (with defaults):
    /// - `FORMFLOW_DATABASE_PATH`: SQLite database file (default: `.data/formflow.db`)
    /// - `FORMFLOW_SQLITE_MAX_CONNECTIONS`: pool size (default: 5)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_path = std::env::var("FORMFLOW_DATABASE_PATH")
            .ok()
            .filter(|path| !path.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DATABASE_PATH.to_string());

        let sqlite_max_connections: u32 = std::env::var("FORMFLOW_SQLITE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| DEFAULT_MAX_CONNECTIONS.to_string())
            .parse()
            .ok()
            .filter(|n| *n > 0)
            .ok_or(ConfigError::Invalid(
                "FORMFLOW_SQLITE_MAX_CONNECTIONS",
                "must be a positive integer",
            ))?;

        Ok(Self {
            database_path: PathBuf::from(database_path),
            sqlite_max_connections,
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
