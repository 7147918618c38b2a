// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-request instance resolution.
//!
//! [`InstanceResolver`] answers "which journey instance does this request
//! belong to?" using the journey bound to the route, the request's values and
//! the [`StateStore`]. A [`RequestContext`] is created per request and caches
//! the answer, so repeated lookups during one request hit the store once.
//!
//! # Resolution
//!
//! ```text
//! bound journey ──► descriptor ──► cache? ──► try_resolve id ──► store.get_instance
//!       │                │                          │                    │
//!  NoJourneyBound   JourneyNotRegistered          None             None / deleted
//!     (error)           (error)                 (Ok(None))           (Ok(None))
//! ```
//!
//! Missing keys and unknown or deleted instances are ordinary outcomes and map
//! to `Ok(None)`. Misconfiguration (no bound journey, unknown journey, wrong
//! state type) is an error.

use std::any::type_name;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::error::{FormFlowError, Result};
use crate::instance::{Instance, state_to_value};
use crate::instance_id::InstanceId;
use crate::journey::{JourneyDescriptor, JourneyRegistry};
use crate::persistence::{InstanceRecord, Properties, StateStore};
use crate::values::ValueProvider;

/// What the current request resolved to so far.
#[derive(Debug, Default)]
pub(crate) enum CachedInstance {
    /// Nothing looked up yet.
    #[default]
    Unresolved,
    /// Looked up; no active instance for this id.
    Absent(InstanceId),
    /// Looked up or created.
    Resolved(InstanceRecord),
}

impl CachedInstance {
    pub(crate) fn holds(&self, instance_id: &InstanceId) -> bool {
        matches!(self, Self::Resolved(record) if record.instance_id == *instance_id)
    }
}

/// Cache shared by a request context and the handles resolved through it.
pub(crate) type CacheSlot = Arc<Mutex<CachedInstance>>;

/// Everything the engine needs from one inbound request.
///
/// Create one per request and drop it with the request; the cache it carries
/// must never serve a different request.
pub struct RequestContext {
    journey_name: Option<String>,
    values: Box<dyn ValueProvider>,
    cache: CacheSlot,
}

impl RequestContext {
    /// Context over the request's route and query values.
    pub fn new(values: impl ValueProvider + 'static) -> Self {
        Self {
            journey_name: None,
            values: Box::new(values),
            cache: CacheSlot::default(),
        }
    }

    /// Bind the journey declared by the executing route.
    pub fn with_journey(mut self, journey_name: impl Into<String>) -> Self {
        self.journey_name = Some(journey_name.into());
        self
    }

    /// Journey bound to the request, if any.
    pub fn journey_name(&self) -> Option<&str> {
        self.journey_name.as_deref()
    }

    /// Request values.
    pub fn values(&self) -> &dyn ValueProvider {
        self.values.as_ref()
    }
}

/// Finds or creates the journey instance for a request.
#[derive(Clone)]
pub struct InstanceResolver {
    registry: Arc<JourneyRegistry>,
    store: Arc<dyn StateStore>,
}

impl InstanceResolver {
    /// Create a resolver over a frozen registry and a store.
    pub fn new(registry: Arc<JourneyRegistry>, store: Arc<dyn StateStore>) -> Self {
        Self { registry, store }
    }

    /// The journey registry.
    pub fn registry(&self) -> &JourneyRegistry {
        &self.registry
    }

    /// The state store.
    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Resolve the active instance the request refers to.
    ///
    /// Returns `Ok(None)` when the request lacks a key or token, when no
    /// record exists, or when the record is deleted.
    ///
    /// # Errors
    ///
    /// - `NoJourneyBound` if the route declares no journey
    /// - `JourneyNotRegistered` if the bound journey is unknown
    /// - `StateTypeMismatch` if `S` is not the journey's registered state type
    #[instrument(skip(self, ctx), fields(journey = ?ctx.journey_name()))]
    pub async fn resolve_current_instance<S>(
        &self,
        ctx: &RequestContext,
    ) -> Result<Option<Instance<S>>>
    where
        S: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let descriptor = self.bound_descriptor(ctx)?;

        let Some(record) = self.resolve_record(ctx, descriptor).await? else {
            return Ok(None);
        };

        ensure_descriptor_type::<S>(descriptor)?;

        Instance::from_record(record, self.store.clone(), Some(ctx.cache.clone())).map(Some)
    }

    /// Identity of the active instance the request refers to, whatever its state type.
    #[instrument(skip(self, ctx), fields(journey = ?ctx.journey_name()))]
    pub async fn resolve_current_instance_id(
        &self,
        ctx: &RequestContext,
    ) -> Result<Option<InstanceId>> {
        let descriptor = self.bound_descriptor(ctx)?;
        let record = self.resolve_record(ctx, descriptor).await?;
        Ok(record.map(|r| r.instance_id))
    }

    /// Start a new instance for the request.
    ///
    /// Derives a fresh id (with a new token when the journey appends one),
    /// invokes `state_factory` and persists the result.
    ///
    /// # Errors
    ///
    /// - `NoJourneyBound` / `JourneyNotRegistered` as for resolution
    /// - `StateTypeMismatch` if `S` is not the registered state type
    /// - `MissingKey` if a mandatory key is absent from the request
    /// - `InstanceAlreadyExists` if an active or completed record exists for the derived id
    #[instrument(skip(self, ctx, state_factory, properties), fields(journey = ?ctx.journey_name()))]
    pub async fn create_instance<S, F>(
        &self,
        ctx: &RequestContext,
        state_factory: F,
        properties: Properties,
    ) -> Result<Instance<S>>
    where
        S: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnOnce() -> S,
    {
        let descriptor = self.bound_descriptor(ctx)?;
        ensure_descriptor_type::<S>(descriptor)?;

        let instance_id = InstanceId::create(descriptor, ctx.values())?;

        // A deleted record does not block starting the journey again
        if self
            .store
            .get_instance(&instance_id, descriptor.state_type())
            .await?
            .is_some_and(|record| !record.deleted)
        {
            return Err(FormFlowError::InstanceAlreadyExists {
                instance_id: instance_id.to_string(),
            });
        }

        let state = state_factory();
        let record = self
            .store
            .create_instance(
                &instance_id,
                descriptor.state_type(),
                state_to_value(&state)?,
                &properties,
            )
            .await?;

        info!(instance_id = %instance_id, "Journey instance created");

        *ctx.cache.lock().await = CachedInstance::Resolved(record.clone());

        Instance::from_record(record, self.store.clone(), Some(ctx.cache.clone()))
    }

    /// Resolve the current instance, creating one if there is none.
    ///
    /// `state_factory` only runs when a new instance is created.
    pub async fn get_or_create_instance<S, F>(
        &self,
        ctx: &RequestContext,
        state_factory: F,
        properties: Properties,
    ) -> Result<Instance<S>>
    where
        S: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnOnce() -> S,
    {
        match self.resolve_current_instance::<S>(ctx).await? {
            Some(instance) => Ok(instance),
            None => self.create_instance(ctx, state_factory, properties).await,
        }
    }

    /// True if the request's current instance has the given id.
    ///
    /// Pages use this to redirect to the canonical link of an instance before
    /// rendering, so one instance is never reachable under two URLs.
    pub async fn is_current_instance(
        &self,
        ctx: &RequestContext,
        candidate: &InstanceId,
    ) -> Result<bool> {
        Ok(self
            .resolve_current_instance_id(ctx)
            .await?
            .is_some_and(|current| current == *candidate))
    }

    fn bound_descriptor(&self, ctx: &RequestContext) -> Result<&JourneyDescriptor> {
        let journey_name = ctx.journey_name().ok_or(FormFlowError::NoJourneyBound)?;
        self.registry.lookup(journey_name)
    }

    /// Find the active record for the request, consulting the cache first.
    async fn resolve_record(
        &self,
        ctx: &RequestContext,
        descriptor: &JourneyDescriptor,
    ) -> Result<Option<InstanceRecord>> {
        let mut cached = ctx.cache.lock().await;

        // An instance created earlier in this request is current even though
        // the request's values do not carry its token yet.
        if let CachedInstance::Resolved(record) = &*cached
            && record.journey_name == descriptor.name()
        {
            debug!(instance_id = %record.instance_id, "Resolved instance from request cache");
            return Ok(active(record));
        }

        let Some(instance_id) = InstanceId::try_resolve(descriptor, ctx.values()) else {
            debug!("Request does not identify an instance");
            return Ok(None);
        };

        if let CachedInstance::Absent(absent) = &*cached
            && *absent == instance_id
        {
            return Ok(None);
        }

        let record = self
            .store
            .get_instance(&instance_id, descriptor.state_type())
            .await?;

        match record {
            Some(record) => {
                debug!(
                    instance_id = %instance_id,
                    status = %record.status(),
                    "Loaded instance from store"
                );
                let current = active(&record);
                *cached = CachedInstance::Resolved(record);
                Ok(current)
            }
            None => {
                debug!(instance_id = %instance_id, "No instance found");
                *cached = CachedInstance::Absent(instance_id);
                Ok(None)
            }
        }
    }
}

/// Deleted records do not count as current.
fn active(record: &InstanceRecord) -> Option<InstanceRecord> {
    (!record.deleted).then(|| record.clone())
}

fn ensure_descriptor_type<S: 'static>(descriptor: &JourneyDescriptor) -> Result<()> {
    let requested = type_name::<S>();
    if descriptor.state_type() != requested {
        return Err(FormFlowError::StateTypeMismatch {
            journey_name: descriptor.name().to_string(),
            expected: descriptor.state_type().to_string(),
            actual: requested.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde::Deserialize;

    use super::*;
    use crate::instance_id::UNIQUE_KEY;
    use crate::persistence::InMemoryStateStore;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct ConnectState {
        trn: Option<String>,
    }

    /// Store wrapper counting reads, to observe the request cache.
    struct CountingStore {
        inner: InMemoryStateStore,
        gets: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl StateStore for CountingStore {
        async fn create_instance(
            &self,
            instance_id: &InstanceId,
            state_type: &str,
            state: serde_json::Value,
            properties: &Properties,
        ) -> Result<InstanceRecord> {
            self.inner
                .create_instance(instance_id, state_type, state, properties)
                .await
        }

        async fn get_instance(
            &self,
            instance_id: &InstanceId,
            state_type: &str,
        ) -> Result<Option<InstanceRecord>> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            self.inner.get_instance(instance_id, state_type).await
        }

        async fn update_instance_state(
            &self,
            instance_id: &InstanceId,
            state_type: &str,
            state: serde_json::Value,
        ) -> Result<()> {
            self.inner
                .update_instance_state(instance_id, state_type, state)
                .await
        }

        async fn complete_instance(
            &self,
            instance_id: &InstanceId,
            state_type: &str,
        ) -> Result<()> {
            self.inner.complete_instance(instance_id, state_type).await
        }

        async fn delete_instance(&self, instance_id: &InstanceId, state_type: &str) -> Result<()> {
            self.inner.delete_instance(instance_id, state_type).await
        }
    }

    fn resolver_with(store: Arc<dyn StateStore>) -> InstanceResolver {
        let mut builder = JourneyRegistry::builder();
        builder
            .register(
                JourneyDescriptor::new::<ConnectState>("connect-account")
                    .with_keys(["personId"])
                    .append_unique_key(true),
            )
            .unwrap();
        InstanceResolver::new(Arc::new(builder.build()), store)
    }

    fn request(pairs: &[(&str, &str)]) -> RequestContext {
        let values: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RequestContext::new(values).with_journey("connect-account")
    }

    #[tokio::test]
    async fn test_repeated_resolution_hits_store_once() {
        let store = Arc::new(CountingStore {
            inner: InMemoryStateStore::new(),
            gets: AtomicUsize::new(0),
        });
        let resolver = resolver_with(store.clone());

        let created = resolver
            .create_instance(
                &request(&[("personId", "1")]),
                ConnectState::default,
                Properties::new(),
            )
            .await
            .unwrap();
        let token = created.instance_id().unique_key().unwrap().to_string();
        let gets_after_create = store.gets.load(Ordering::SeqCst);

        let ctx = request(&[("personId", "1"), (UNIQUE_KEY, token.as_str())]);
        for _ in 0..3 {
            let instance = resolver
                .resolve_current_instance::<ConnectState>(&ctx)
                .await
                .unwrap();
            assert!(instance.is_some());
        }

        assert_eq!(store.gets.load(Ordering::SeqCst), gets_after_create + 1);
    }

    #[tokio::test]
    async fn test_created_instance_is_current_within_request() {
        let resolver = resolver_with(Arc::new(InMemoryStateStore::new()));
        let ctx = request(&[("personId", "1")]);

        let created = resolver
            .create_instance(&ctx, ConnectState::default, Properties::new())
            .await
            .unwrap();

        let current = resolver
            .resolve_current_instance::<ConnectState>(&ctx)
            .await
            .unwrap()
            .expect("Created instance should be current");
        assert_eq!(current.instance_id(), created.instance_id());
        assert!(
            resolver
                .is_current_instance(&ctx, created.instance_id())
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_update_through_handle_refreshes_cache() {
        let resolver = resolver_with(Arc::new(InMemoryStateStore::new()));
        let ctx = request(&[("personId", "1")]);

        let mut instance = resolver
            .create_instance(&ctx, ConnectState::default, Properties::new())
            .await
            .unwrap();
        instance
            .update_state(ConnectState {
                trn: Some("1234567".to_string()),
            })
            .await
            .unwrap();

        let again = resolver
            .resolve_current_instance::<ConnectState>(&ctx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again.state().trn.as_deref(), Some("1234567"));

        instance.delete().await.unwrap();
        assert!(
            resolver
                .resolve_current_instance::<ConnectState>(&ctx)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_unbound_request_is_an_error() {
        let resolver = resolver_with(Arc::new(InMemoryStateStore::new()));
        let ctx = RequestContext::new(HashMap::<String, String>::new());

        let err = resolver
            .resolve_current_instance::<ConnectState>(&ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, FormFlowError::NoJourneyBound));
    }

    #[tokio::test]
    async fn test_unknown_journey_is_an_error() {
        let resolver = resolver_with(Arc::new(InMemoryStateStore::new()));
        let ctx = RequestContext::new(HashMap::<String, String>::new()).with_journey("nope");

        let err = resolver
            .resolve_current_instance_id(&ctx)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "JOURNEY_NOT_REGISTERED");
    }

    #[tokio::test]
    async fn test_create_with_wrong_type_fails() {
        let resolver = resolver_with(Arc::new(InMemoryStateStore::new()));
        let ctx = request(&[("personId", "1")]);

        let err = resolver
            .create_instance(&ctx, || 5u32, Properties::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FormFlowError::StateTypeMismatch { ref actual, .. } if actual == "u32"
        ));
    }
}
