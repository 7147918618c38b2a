// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed persistence implementation.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use crate::error::{FormFlowError, Result};
use crate::instance_id::InstanceId;
use crate::migrations;

use super::{
    InstanceRecord, InstanceStatus, Properties, StateStore, ensure_state_type, ensure_status,
    not_found,
};

/// Default pool size for [`SqliteStateStore::from_path`].
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Row shape of the `journey_instances` table.
#[derive(Debug, sqlx::FromRow)]
struct InstanceRow {
    instance_id: String,
    journey_name: String,
    state_type: String,
    state: String,
    properties: String,
    completed: bool,
    deleted: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl TryFrom<InstanceRow> for InstanceRecord {
    type Error = FormFlowError;

    fn try_from(row: InstanceRow) -> Result<Self> {
        Ok(Self {
            instance_id: row.instance_id.parse()?,
            journey_name: row.journey_name,
            state_type: row.state_type,
            state: serde_json::from_str(&row.state)?,
            properties: serde_json::from_str(&row.properties)?,
            completed: row.completed,
            deleted: row.deleted,
            created_at: row.created_at,
            updated_at: row.updated_at,
            finished_at: row.finished_at,
        })
    }
}

/// SQLite-backed state store.
#[derive(Clone)]
pub struct SqliteStateStore {
    pool: SqlitePool,
}

impl SqliteStateStore {
    /// Create a store over an existing pool. Migrations must already be applied.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create and initialize a store from a file path.
    ///
    /// This convenience constructor handles all setup:
    /// - Creates parent directories if they don't exist
    /// - Creates the database file if it doesn't exist
    /// - Connects with [`DEFAULT_MAX_CONNECTIONS`]
    /// - Runs all migrations
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_path_with_pool_size(path, DEFAULT_MAX_CONNECTIONS).await
    }

    /// Same as [`from_path`](Self::from_path) with an explicit pool size.
    pub async fn from_path_with_pool_size(
        path: impl AsRef<Path>,
        max_connections: u32,
    ) -> Result<Self> {
        let path = path.as_ref();

        // Create parent directories if needed
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| FormFlowError::DatabaseError {
                operation: "create_dir".to_string(),
                details: format!("Failed to create directory {:?}: {}", parent, e),
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(&url)
            .await
            .map_err(|e| FormFlowError::DatabaseError {
                operation: "connect".to_string(),
                details: format!("Failed to connect to SQLite at {:?}: {}", path, e),
            })?;

        Self::migrated(pool).await
    }

    /// Create a store over a private in-memory database.
    ///
    /// The pool holds a single connection that never expires, since the
    /// database disappears with it.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        Self::migrated(pool).await
    }

    async fn migrated(pool: SqlitePool) -> Result<Self> {
        migrations::run_sqlite(&pool)
            .await
            .map_err(|e| FormFlowError::DatabaseError {
                operation: "migrate".to_string(),
                details: format!("Failed to run migrations: {}", e),
            })?;

        Ok(Self { pool })
    }

    /// The underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch(&self, instance_id: &InstanceId) -> Result<Option<InstanceRecord>> {
        let row = sqlx::query_as::<_, InstanceRow>(
            r#"
            SELECT instance_id, journey_name, state_type, state, properties,
                   completed, deleted, created_at, updated_at, finished_at
            FROM journey_instances
            WHERE instance_key = ?
            "#,
        )
        .bind(instance_id.canonical_key())
        .fetch_optional(&self.pool)
        .await?;

        row.map(InstanceRecord::try_from).transpose()
    }

    /// Explain why a guarded update touched no rows.
    ///
    /// Always returns an error: not found, type mismatch, or wrong status.
    async fn rejected_update(
        &self,
        instance_id: &InstanceId,
        state_type: &str,
        expected: InstanceStatus,
    ) -> FormFlowError {
        let record = match self.fetch(instance_id).await {
            Ok(Some(record)) => record,
            Ok(None) => return not_found(instance_id),
            Err(e) => return e,
        };

        if let Err(e) = ensure_state_type(&record, state_type) {
            return e;
        }
        match ensure_status(&record, expected) {
            Err(e) => e,
            // Raced with another writer between the update and this read.
            Ok(()) => FormFlowError::DatabaseError {
                operation: "update".to_string(),
                details: format!("Instance '{}' changed concurrently", instance_id),
            },
        }
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn create_instance(
        &self,
        instance_id: &InstanceId,
        state_type: &str,
        state: Value,
        properties: &Properties,
    ) -> Result<InstanceRecord> {
        let now = Utc::now();
        let state_json = serde_json::to_string(&state)?;
        let properties_json = serde_json::to_string(properties)?;

        let result = sqlx::query(
            r#"
            INSERT INTO journey_instances
                (instance_key, instance_id, journey_name, state_type, state, properties,
                 completed, deleted, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, 0, 0, ?, ?)
            ON CONFLICT (instance_key) DO UPDATE SET
                instance_id = excluded.instance_id,
                journey_name = excluded.journey_name,
                state_type = excluded.state_type,
                state = excluded.state,
                properties = excluded.properties,
                completed = 0,
                deleted = 0,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                finished_at = NULL
            WHERE journey_instances.deleted = 1
            "#,
        )
        .bind(instance_id.canonical_key())
        .bind(instance_id.to_string())
        .bind(instance_id.journey_name())
        .bind(state_type)
        .bind(&state_json)
        .bind(&properties_json)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(FormFlowError::InstanceAlreadyExists {
                instance_id: instance_id.to_string(),
            });
        }

        Ok(InstanceRecord {
            instance_id: instance_id.clone(),
            journey_name: instance_id.journey_name().to_string(),
            state_type: state_type.to_string(),
            state,
            properties: properties.clone(),
            completed: false,
            deleted: false,
            created_at: now,
            updated_at: now,
            finished_at: None,
        })
    }

    async fn get_instance(
        &self,
        instance_id: &InstanceId,
        state_type: &str,
    ) -> Result<Option<InstanceRecord>> {
        let record = self.fetch(instance_id).await?;

        if let Some(ref record) = record {
            ensure_state_type(record, state_type)?;
        }

        Ok(record)
    }

    async fn update_instance_state(
        &self,
        instance_id: &InstanceId,
        state_type: &str,
        state: Value,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE journey_instances
            SET state = ?, updated_at = ?
            WHERE instance_key = ? AND state_type = ? AND completed = 0 AND deleted = 0
            "#,
        )
        .bind(serde_json::to_string(&state)?)
        .bind(Utc::now())
        .bind(instance_id.canonical_key())
        .bind(state_type)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self
                .rejected_update(instance_id, state_type, InstanceStatus::Active)
                .await);
        }

        Ok(())
    }

    async fn complete_instance(&self, instance_id: &InstanceId, state_type: &str) -> Result<()> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE journey_instances
            SET completed = 1, updated_at = ?, finished_at = ?
            WHERE instance_key = ? AND state_type = ? AND completed = 0 AND deleted = 0
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(instance_id.canonical_key())
        .bind(state_type)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return match self.fetch(instance_id).await? {
                Some(record) if record.completed && !record.deleted => {
                    ensure_state_type(&record, state_type)
                }
                _ => Err(self
                    .rejected_update(instance_id, state_type, InstanceStatus::Active)
                    .await),
            };
        }

        Ok(())
    }

    async fn delete_instance(&self, instance_id: &InstanceId, state_type: &str) -> Result<()> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE journey_instances
            SET deleted = 1, updated_at = ?, finished_at = ?
            WHERE instance_key = ? AND state_type = ? AND completed = 0 AND deleted = 0
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(instance_id.canonical_key())
        .bind(state_type)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return match self.fetch(instance_id).await? {
                Some(record) if record.deleted => ensure_state_type(&record, state_type),
                _ => Err(self
                    .rejected_update(instance_id, state_type, InstanceStatus::Active)
                    .await),
            };
        }

        Ok(())
    }

    async fn get_terminal_instances_older_than(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<InstanceId>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT instance_id
            FROM journey_instances
            WHERE finished_at IS NOT NULL AND finished_at < ?
            ORDER BY finished_at ASC
            LIMIT ?
            "#,
        )
        .bind(older_than)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|(id,)| id.parse()).collect()
    }

    async fn delete_instances_batch(&self, instance_ids: &[InstanceId]) -> Result<u64> {
        if instance_ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut deleted = 0u64;

        for instance_id in instance_ids {
            let result = sqlx::query("DELETE FROM journey_instances WHERE instance_key = ?")
                .bind(instance_id.canonical_key())
                .execute(&mut *tx)
                .await?;
            deleted += result.rows_affected();
        }

        tx.commit().await?;

        Ok(deleted)
    }
}
