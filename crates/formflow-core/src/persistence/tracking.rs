// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Store decorator that remembers which instances it created.
//!
//! Integration tests wrap the real store with [`TrackingStateStore`], run
//! journeys through the resolver, then call [`TrackingStateStore::purge`] to
//! remove everything they created from a shared database.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::Result;
use crate::instance_id::InstanceId;

use super::{InstanceRecord, Properties, StateStore};

/// Delegating store that records created instance ids.
pub struct TrackingStateStore {
    inner: Arc<dyn StateStore>,
    created: Mutex<Vec<InstanceId>>,
}

impl TrackingStateStore {
    /// Wrap a store.
    pub fn new(inner: Arc<dyn StateStore>) -> Self {
        Self {
            inner,
            created: Mutex::new(Vec::new()),
        }
    }

    /// Ids created through this decorator and not yet purged, in creation order.
    pub async fn created_instances(&self) -> Vec<InstanceId> {
        self.created.lock().await.clone()
    }

    /// Physically delete every tracked instance from the wrapped store.
    pub async fn purge(&self) -> Result<u64> {
        let mut created = self.created.lock().await;
        let deleted = self.inner.delete_instances_batch(&created).await?;

        debug!(
            tracked = created.len(),
            deleted = deleted,
            "Purged tracked instances"
        );

        created.clear();
        Ok(deleted)
    }
}

#[async_trait]
impl StateStore for TrackingStateStore {
    async fn create_instance(
        &self,
        instance_id: &InstanceId,
        state_type: &str,
        state: Value,
        properties: &Properties,
    ) -> Result<InstanceRecord> {
        let record = self
            .inner
            .create_instance(instance_id, state_type, state, properties)
            .await?;
        let mut created = self.created.lock().await;
        if !created.contains(instance_id) {
            created.push(instance_id.clone());
        }
        Ok(record)
    }

    async fn get_instance(
        &self,
        instance_id: &InstanceId,
        state_type: &str,
    ) -> Result<Option<InstanceRecord>> {
        self.inner.get_instance(instance_id, state_type).await
    }

    async fn update_instance_state(
        &self,
        instance_id: &InstanceId,
        state_type: &str,
        state: Value,
    ) -> Result<()> {
        self.inner
            .update_instance_state(instance_id, state_type, state)
            .await
    }

    async fn complete_instance(&self, instance_id: &InstanceId, state_type: &str) -> Result<()> {
        self.inner.complete_instance(instance_id, state_type).await
    }

    async fn delete_instance(&self, instance_id: &InstanceId, state_type: &str) -> Result<()> {
        self.inner.delete_instance(instance_id, state_type).await
    }

    async fn get_terminal_instances_older_than(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<InstanceId>> {
        self.inner
            .get_terminal_instances_older_than(older_than, limit)
            .await
    }

    async fn delete_instances_batch(&self, instance_ids: &[InstanceId]) -> Result<u64> {
        self.inner.delete_instances_batch(instance_ids).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::persistence::InMemoryStateStore;

    const STATE_TYPE: &str = "tests::State";

    #[tokio::test]
    async fn test_tracks_and_purges_created_instances() {
        let inner = Arc::new(InMemoryStateStore::new());
        let tracking = TrackingStateStore::new(inner.clone());

        let untracked = InstanceId::from_parts("wizard", vec![("id".into(), "0".into())]);
        inner
            .create_instance(&untracked, STATE_TYPE, json!(0), &Properties::new())
            .await
            .unwrap();

        let first = InstanceId::from_parts("wizard", vec![("id".into(), "1".into())]);
        let second = InstanceId::from_parts("wizard", vec![("id".into(), "2".into())]);
        for id in [&first, &second] {
            tracking
                .create_instance(id, STATE_TYPE, json!(1), &Properties::new())
                .await
                .unwrap();
        }

        // Failed creations are not tracked
        assert!(
            tracking
                .create_instance(&first, STATE_TYPE, json!(1), &Properties::new())
                .await
                .is_err()
        );

        assert_eq!(
            tracking.created_instances().await,
            vec![first.clone(), second.clone()]
        );

        let deleted = tracking.purge().await.unwrap();
        assert_eq!(deleted, 2);
        assert!(tracking.created_instances().await.is_empty());
        assert_eq!(inner.len().await, 1);
        assert!(
            inner
                .get_instance(&untracked, STATE_TYPE)
                .await
                .unwrap()
                .is_some()
        );
    }
}
