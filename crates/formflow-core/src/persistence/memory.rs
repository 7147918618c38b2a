// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-process persistence implementation.
//!
//! Holds records in a map guarded by an async `RwLock`. Useful for tests and
//! single-process deployments where losing in-progress journeys on restart is
//! acceptable.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::{FormFlowError, Result};
use crate::instance_id::InstanceId;

use super::{
    InstanceRecord, InstanceStatus, Properties, StateStore, ensure_state_type, ensure_status,
    not_found,
};

/// In-memory state store.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    instances: RwLock<HashMap<InstanceId, InstanceRecord>>,
}

impl InMemoryStateStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records, including soft-deleted ones.
    pub async fn len(&self) -> usize {
        self.instances.read().await.len()
    }

    /// Returns true when the store holds no records.
    pub async fn is_empty(&self) -> bool {
        self.instances.read().await.is_empty()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn create_instance(
        &self,
        instance_id: &InstanceId,
        state_type: &str,
        state: Value,
        properties: &Properties,
    ) -> Result<InstanceRecord> {
        let mut instances = self.instances.write().await;

        if instances.get(instance_id).is_some_and(|r| !r.deleted) {
            return Err(FormFlowError::InstanceAlreadyExists {
                instance_id: instance_id.to_string(),
            });
        }

        let now = Utc::now();
        let record = InstanceRecord {
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
        };
        instances.insert(instance_id.clone(), record.clone());

        Ok(record)
    }

    async fn get_instance(
        &self,
        instance_id: &InstanceId,
        state_type: &str,
    ) -> Result<Option<InstanceRecord>> {
        let instances = self.instances.read().await;

        match instances.get(instance_id) {
            Some(record) => {
                ensure_state_type(record, state_type)?;
                Ok(Some(record.clone()))
            }
            None => Ok(None),
        }
    }

    async fn update_instance_state(
        &self,
        instance_id: &InstanceId,
        state_type: &str,
        state: Value,
    ) -> Result<()> {
        let mut instances = self.instances.write().await;
        let record = instances
            .get_mut(instance_id)
            .ok_or_else(|| not_found(instance_id))?;

        ensure_state_type(record, state_type)?;
        ensure_status(record, InstanceStatus::Active)?;

        record.state = state;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn complete_instance(&self, instance_id: &InstanceId, state_type: &str) -> Result<()> {
        let mut instances = self.instances.write().await;
        let record = instances
            .get_mut(instance_id)
            .ok_or_else(|| not_found(instance_id))?;

        ensure_state_type(record, state_type)?;
        if record.completed {
            return Ok(());
        }
        ensure_status(record, InstanceStatus::Active)?;

        let now = Utc::now();
        record.completed = true;
        record.updated_at = now;
        record.finished_at = Some(now);
        Ok(())
    }

    async fn delete_instance(&self, instance_id: &InstanceId, state_type: &str) -> Result<()> {
        let mut instances = self.instances.write().await;
        let record = instances
            .get_mut(instance_id)
            .ok_or_else(|| not_found(instance_id))?;

        ensure_state_type(record, state_type)?;
        if record.deleted {
            return Ok(());
        }
        ensure_status(record, InstanceStatus::Active)?;

        let now = Utc::now();
        record.deleted = true;
        record.updated_at = now;
        record.finished_at = Some(now);
        Ok(())
    }

    async fn get_terminal_instances_older_than(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<InstanceId>> {
        let instances = self.instances.read().await;

        let mut terminal: Vec<(DateTime<Utc>, InstanceId)> = instances
            .values()
            .filter_map(|r| match r.finished_at {
                Some(finished_at) if finished_at < older_than => {
                    Some((finished_at, r.instance_id.clone()))
                }
                _ => None,
            })
            .collect();
        terminal.sort_by_key(|(finished_at, _)| *finished_at);

        Ok(terminal
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|(_, id)| id)
            .collect())
    }

    async fn delete_instances_batch(&self, instance_ids: &[InstanceId]) -> Result<u64> {
        let mut instances = self.instances.write().await;

        let removed = instance_ids
            .iter()
            .filter(|id| instances.remove(*id).is_some())
            .count();

        Ok(removed as u64)
    }
}
