// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Typed handle over a persisted journey instance.
//!
//! [`Instance`] pairs an [`InstanceId`] with the deserialized state and the two
//! terminal flags. Every mutation is written to the [`StateStore`] first and
//! only then applied to the handle, so a failed write leaves the handle
//! unchanged.
//!
//! The handle is a projection of the stored record. If another request may
//! have written to the same instance, call [`Instance::refresh`].

use std::any::type_name;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::info;

use crate::error::{FormFlowError, Result};
use crate::instance_id::InstanceId;
use crate::persistence::{InstanceRecord, InstanceStatus, Properties, StateStore};
use crate::resolver::{CacheSlot, CachedInstance};

/// A journey instance with state of type `S`.
pub struct Instance<S> {
    instance_id: InstanceId,
    state_type: String,
    state: S,
    properties: Properties,
    completed: bool,
    deleted: bool,
    store: Arc<dyn StateStore>,
    cache: Option<CacheSlot>,
}

impl<S> std::fmt::Debug for Instance<S>
where
    S: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("instance_id", &self.instance_id)
            .field("state_type", &self.state_type)
            .field("state", &self.state)
            .field("properties", &self.properties)
            .field("completed", &self.completed)
            .field("deleted", &self.deleted)
            .finish()
    }
}

impl<S> Instance<S>
where
    S: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Load an instance straight from a store, bypassing request resolution.
    ///
    /// Returns `None` if no record exists. Deleted records are returned so
    /// callers can inspect them.
    pub async fn load(
        store: Arc<dyn StateStore>,
        instance_id: &InstanceId,
    ) -> Result<Option<Self>> {
        match store.get_instance(instance_id, type_name::<S>()).await? {
            Some(record) => Ok(Some(Self::from_record(record, store, None)?)),
            None => Ok(None),
        }
    }

    pub(crate) fn from_record(
        record: InstanceRecord,
        store: Arc<dyn StateStore>,
        cache: Option<CacheSlot>,
    ) -> Result<Self> {
        let state = serde_json::from_value(record.state)?;
        Ok(Self {
            instance_id: record.instance_id,
            state_type: record.state_type,
            state,
            properties: record.properties,
            completed: record.completed,
            deleted: record.deleted,
            store,
            cache,
        })
    }

    /// Journey the instance belongs to.
    pub fn journey_name(&self) -> &str {
        self.instance_id.journey_name()
    }

    /// Identity of the instance.
    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    /// Type name of the state.
    pub fn state_type(&self) -> &str {
        &self.state_type
    }

    /// Current state. Readable in every status.
    pub fn state(&self) -> &S {
        &self.state
    }

    /// Creation-time metadata.
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Whether the business outcome was achieved.
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Whether the instance was abandoned.
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Current lifecycle status.
    pub fn status(&self) -> InstanceStatus {
        InstanceStatus::from_flags(self.completed, self.deleted)
    }

    /// Replace the state.
    ///
    /// # Errors
    ///
    /// `InvalidInstanceState` if the instance is completed or deleted; the
    /// store is not called in that case.
    pub async fn update_state(&mut self, state: S) -> Result<()> {
        self.ensure_active()?;

        let value = serde_json::to_value(&state)?;
        self.store
            .update_instance_state(&self.instance_id, &self.state_type, value.clone())
            .await?;

        self.state = state;
        self.sync_cache(|record| record.state = value).await;
        Ok(())
    }

    /// Modify a copy of the state and write it back.
    pub async fn update_state_with<F>(&mut self, update: F) -> Result<()>
    where
        S: Clone,
        F: FnOnce(&mut S),
    {
        let mut next = self.state.clone();
        update(&mut next);
        self.update_state(next).await
    }

    /// Mark the instance completed. A no-op if it already is.
    ///
    /// # Errors
    ///
    /// `InvalidInstanceState` if the instance was deleted.
    pub async fn complete(&mut self) -> Result<()> {
        if self.completed {
            return Ok(());
        }
        self.ensure_active()?;

        self.store
            .complete_instance(&self.instance_id, &self.state_type)
            .await?;

        self.completed = true;
        self.sync_cache(|record| record.completed = true).await;

        info!(instance_id = %self.instance_id, "Journey instance completed");
        Ok(())
    }

    /// Mark the instance deleted. A no-op if it already is.
    ///
    /// # Errors
    ///
    /// `InvalidInstanceState` if the instance was completed.
    pub async fn delete(&mut self) -> Result<()> {
        if self.deleted {
            return Ok(());
        }
        self.ensure_active()?;

        self.store
            .delete_instance(&self.instance_id, &self.state_type)
            .await?;

        self.deleted = true;
        self.sync_cache(|record| record.deleted = true).await;

        info!(instance_id = %self.instance_id, "Journey instance deleted");
        Ok(())
    }

    /// Re-read state and flags from the store.
    ///
    /// # Errors
    ///
    /// `InstanceNotFound` if the record was physically removed.
    pub async fn refresh(&mut self) -> Result<()> {
        let record = self
            .store
            .get_instance(&self.instance_id, &self.state_type)
            .await?
            .ok_or_else(|| FormFlowError::InstanceNotFound {
                instance_id: self.instance_id.to_string(),
            })?;

        self.state = serde_json::from_value(record.state.clone())?;
        self.completed = record.completed;
        self.deleted = record.deleted;

        if let Some(cache) = &self.cache {
            let mut cached = cache.lock().await;
            if cached.holds(&self.instance_id) {
                *cached = CachedInstance::Resolved(record);
            }
        }
        Ok(())
    }

    fn ensure_active(&self) -> Result<()> {
        let status = self.status();
        if status != InstanceStatus::Active {
            return Err(FormFlowError::InvalidInstanceState {
                instance_id: self.instance_id.to_string(),
                expected: InstanceStatus::Active.as_str().to_string(),
                actual: status.as_str().to_string(),
            });
        }
        Ok(())
    }

    /// Apply a successful write to the request cache this handle came from.
    async fn sync_cache(&self, apply: impl FnOnce(&mut InstanceRecord)) {
        let Some(cache) = &self.cache else {
            return;
        };

        let mut cached = cache.lock().await;
        if let CachedInstance::Resolved(record) = &mut *cached
            && record.instance_id == self.instance_id
        {
            apply(record);
            record.updated_at = chrono::Utc::now();
        }
    }
}

/// Serialize a fresh state for persistence.
pub(crate) fn state_to_value<S: Serialize>(state: &S) -> Result<Value> {
    Ok(serde_json::to_value(state)?)
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;
    use crate::persistence::InMemoryStateStore;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct QualificationState {
        provider: Option<String>,
        awarded_year: Option<u16>,
    }

    async fn setup() -> (Arc<dyn StateStore>, InstanceId) {
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
        let id = InstanceId::from_parts(
            "add-qualification",
            vec![("personId".to_string(), "42".to_string())],
        );
        let state = QualificationState {
            provider: None,
            awarded_year: None,
        };
        store
            .create_instance(
                &id,
                type_name::<QualificationState>(),
                state_to_value(&state).unwrap(),
                &Properties::new(),
            )
            .await
            .unwrap();
        (store, id)
    }

    async fn load(store: &Arc<dyn StateStore>, id: &InstanceId) -> Instance<QualificationState> {
        Instance::load(store.clone(), id)
            .await
            .unwrap()
            .expect("Instance should exist")
    }

    #[tokio::test]
    async fn test_update_state_persists() {
        let (store, id) = setup().await;
        let mut instance = load(&store, &id).await;

        instance
            .update_state_with(|s| s.provider = Some("University of Leeds".to_string()))
            .await
            .unwrap();

        let reloaded = load(&store, &id).await;
        assert_eq!(
            reloaded.state().provider.as_deref(),
            Some("University of Leeds")
        );
        assert_eq!(reloaded.journey_name(), "add-qualification");
    }

    #[tokio::test]
    async fn test_complete_then_update_fails() {
        let (store, id) = setup().await;
        let mut instance = load(&store, &id).await;

        instance
            .update_state_with(|s| s.awarded_year = Some(2019))
            .await
            .unwrap();
        instance.complete().await.unwrap();

        let err = instance
            .update_state_with(|s| s.awarded_year = Some(2020))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_INSTANCE_STATE");

        // Last written value stays readable
        assert_eq!(instance.state().awarded_year, Some(2019));
        assert_eq!(instance.status(), InstanceStatus::Completed);

        // Completing again is a no-op
        instance.complete().await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_then_complete_fails() {
        let (store, id) = setup().await;
        let mut instance = load(&store, &id).await;

        instance.delete().await.unwrap();
        instance.delete().await.unwrap();
        assert!(instance.is_deleted());

        let err = instance.complete().await.unwrap_err();
        assert_eq!(err.error_code(), "INVALID_INSTANCE_STATE");
    }

    #[tokio::test]
    async fn test_complete_then_delete_fails() {
        let (store, id) = setup().await;
        let mut instance = load(&store, &id).await;

        instance.complete().await.unwrap();
        let err = instance.delete().await.unwrap_err();
        assert!(matches!(
            err,
            FormFlowError::InvalidInstanceState { ref actual, .. } if actual == "completed"
        ));
    }

    #[tokio::test]
    async fn test_refresh_sees_other_writers() {
        let (store, id) = setup().await;
        let mut stale = load(&store, &id).await;
        let mut fresh = load(&store, &id).await;

        fresh
            .update_state_with(|s| s.awarded_year = Some(2001))
            .await
            .unwrap();
        assert_eq!(stale.state().awarded_year, None);

        stale.refresh().await.unwrap();
        assert_eq!(stale.state().awarded_year, Some(2001));
    }

    #[tokio::test]
    async fn test_load_with_wrong_type_fails() {
        let (store, id) = setup().await;
        let err = Instance::<String>::load(store, &id).await.unwrap_err();
        assert_eq!(err.error_code(), "STATE_TYPE_MISMATCH");
    }
}
