// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for formflow-core integration tests.
//!
//! Provides a registry of sample journeys and helpers that build request
//! contexts the way a web adapter would (route values ahead of the query).

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use formflow_core::{
    CompositeValues, InstanceId, InstanceResolver, JourneyDescriptor, JourneyRegistry,
    QueryValues, RequestContext, StateStore,
};

/// Journey with a route key and a per-run token.
pub const ADD_QUALIFICATION: &str = "add-qualification";

/// Journey with a mandatory and an optional key and no token.
pub const EDIT_CONTACT: &str = "edit-contact";

/// Journey without keys, one instance per deployment.
pub const FEEDBACK: &str = "feedback";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualificationState {
    pub provider: Option<String>,
    pub subject: Option<String>,
    pub awarded_year: Option<u16>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactState {
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedbackState {
    pub rating: Option<u8>,
    pub comments: String,
}

pub fn registry() -> Arc<JourneyRegistry> {
    let mut builder = JourneyRegistry::builder();
    builder
        .register(
            JourneyDescriptor::new::<QualificationState>(ADD_QUALIFICATION)
                .with_keys(["personId"])
                .append_unique_key(true),
        )
        .unwrap()
        .register(
            JourneyDescriptor::new::<ContactState>(EDIT_CONTACT)
                .with_keys(["contactId", "section?"]),
        )
        .unwrap()
        .register(JourneyDescriptor::new::<FeedbackState>(FEEDBACK))
        .unwrap();
    Arc::new(builder.build())
}

pub fn resolver(store: Arc<dyn StateStore>) -> InstanceResolver {
    InstanceResolver::new(registry(), store)
}

/// Request bound to `journey` with the given route values and raw query string.
pub fn request(journey: &str, route: &[(&str, &str)], query: &str) -> RequestContext {
    let route: HashMap<String, String> = route
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    RequestContext::new(
        CompositeValues::new()
            .with(route)
            .with(QueryValues::parse(query)),
    )
    .with_journey(journey)
}

/// Request that follows the canonical link of an instance, as a redirect would.
pub fn follow_link(instance_id: &InstanceId) -> RequestContext {
    let link = instance_id.to_string();
    let query = link.split_once('?').map(|(_, q)| q).unwrap_or_default();
    request(instance_id.journey_name(), &[], query)
}
