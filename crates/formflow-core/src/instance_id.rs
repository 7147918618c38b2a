// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Journey instance identity.
//!
//! An [`InstanceId`] is derived from the request: the journey's declared keys
//! are read from a [`ValueProvider`], and journeys that allow several parallel
//! instances get a random token under the reserved [`UNIQUE_KEY`].
//!
//! # Serialized form
//!
//! ```text
//! add-qualification?personId=42&ffiid=Zx3k9Qv0TsyOQm1c8aN4Lw
//! └──── journey ───┘ └─ declared keys ─┘ └──── token (last) ───┘
//! ```
//!
//! The serialized form is what ends up in "continue", "change" and "cancel"
//! links, so a later request can resolve the same instance.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use uuid::Uuid;

use crate::error::{FormFlowError, Result};
use crate::journey::JourneyDescriptor;
use crate::values::ValueProvider;

/// Reserved key holding the random token.
pub const UNIQUE_KEY: &str = "ffiid";

/// Everything except RFC 3986 unreserved characters is escaped.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Resolved identity of one journey instance.
///
/// Keys keep their canonical order for serialization, but equality and hashing
/// treat them as a set.
#[derive(Debug, Clone)]
pub struct InstanceId {
    journey_name: String,
    keys: Vec<(String, String)>,
}

impl InstanceId {
    /// Build an id from parts. Callers are responsible for key order.
    pub fn from_parts(journey_name: impl Into<String>, keys: Vec<(String, String)>) -> Self {
        Self {
            journey_name: journey_name.into(),
            keys,
        }
    }

    /// Derive the id for a new instance.
    ///
    /// Every mandatory key must be present. When the descriptor appends a
    /// unique key, a fresh token is always generated; a token supplied by the
    /// request is never reused.
    ///
    /// # Errors
    ///
    /// `MissingKey` naming the first absent mandatory key.
    pub fn create(descriptor: &JourneyDescriptor, values: &dyn ValueProvider) -> Result<Self> {
        let mut keys = Self::declared_keys(descriptor, values).map_err(|key| {
            FormFlowError::MissingKey {
                journey_name: descriptor.name().to_string(),
                key,
            }
        })?;

        if descriptor.appends_unique_key() {
            keys.push((UNIQUE_KEY.to_string(), generate_token()));
        }

        Ok(Self {
            journey_name: descriptor.name().to_string(),
            keys,
        })
    }

    /// Derive the id of an existing instance from the request.
    ///
    /// Returns `None` when a mandatory key or the token is absent. Keys the
    /// descriptor does not declare are ignored.
    pub fn try_resolve(descriptor: &JourneyDescriptor, values: &dyn ValueProvider) -> Option<Self> {
        let mut keys = Self::declared_keys(descriptor, values).ok()?;

        if descriptor.appends_unique_key() {
            let token = read_value(values, UNIQUE_KEY)?;
            keys.push((UNIQUE_KEY.to_string(), token));
        }

        Some(Self {
            journey_name: descriptor.name().to_string(),
            keys,
        })
    }

    /// Read the declared keys in order. Err carries the missing key name.
    fn declared_keys(
        descriptor: &JourneyDescriptor,
        values: &dyn ValueProvider,
    ) -> std::result::Result<Vec<(String, String)>, String> {
        let mut keys = Vec::with_capacity(descriptor.required_keys().len() + 1);

        for key in descriptor.required_keys() {
            match read_value(values, &key.name) {
                Some(value) => keys.push((key.name.clone(), value)),
                None if key.optional => {}
                None => return Err(key.name.clone()),
            }
        }

        Ok(keys)
    }

    /// Parse a serialized id.
    pub fn parse(s: &str) -> Result<Self> {
        s.parse()
    }

    /// Serialized form, `journey?key=value&...`.
    pub fn serialize(&self) -> String {
        self.to_string()
    }

    /// Journey name.
    pub fn journey_name(&self) -> &str {
        &self.journey_name
    }

    /// Keys in canonical order.
    pub fn keys(&self) -> &[(String, String)] {
        &self.keys
    }

    /// Value of a key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.keys
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The random token, if the id carries one.
    pub fn unique_key(&self) -> Option<&str> {
        self.get(UNIQUE_KEY)
    }

    /// Order-independent serialized form; equal ids share the same key.
    ///
    /// Stores use it as the primary key so an id parsed from a reordered
    /// link still finds its record.
    pub fn canonical_key(&self) -> String {
        let mut sorted = self.clone();
        sorted.keys.sort();
        sorted.to_string()
    }

    fn sorted_keys(&self) -> Vec<&(String, String)> {
        let mut sorted: Vec<&(String, String)> = self.keys.iter().collect();
        sorted.sort();
        sorted
    }
}

/// Empty values count as absent.
fn read_value(values: &dyn ValueProvider, key: &str) -> Option<String> {
    values.try_get_value(key).filter(|v| !v.is_empty())
}

/// 122 random bits from a v4 UUID, URL-safe base64 without padding.
fn generate_token() -> String {
    URL_SAFE_NO_PAD.encode(Uuid::new_v4().as_bytes())
}

impl PartialEq for InstanceId {
    fn eq(&self, other: &Self) -> bool {
        self.journey_name == other.journey_name
            && self.keys.len() == other.keys.len()
            && self.sorted_keys() == other.sorted_keys()
    }
}

impl Eq for InstanceId {}

impl Hash for InstanceId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.journey_name.hash(state);
        self.sorted_keys().hash(state);
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.journey_name)?;

        for (i, (key, value)) in self.keys.iter().enumerate() {
            let separator = if i == 0 { '?' } else { '&' };
            write!(
                f,
                "{}{}={}",
                separator,
                utf8_percent_encode(key, COMPONENT),
                utf8_percent_encode(value, COMPONENT)
            )?;
        }

        Ok(())
    }
}

impl FromStr for InstanceId {
    type Err = FormFlowError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: &str| FormFlowError::InvalidInstanceId {
            value: s.to_string(),
            reason: reason.to_string(),
        };

        let (journey_name, query) = match s.split_once('?') {
            Some((journey, query)) => (journey, query),
            None => (s, ""),
        };

        if journey_name.is_empty() {
            return Err(invalid("journey name is empty"));
        }

        let mut keys: Vec<(String, String)> = Vec::new();
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (raw_key, raw_value) = pair
                .split_once('=')
                .ok_or_else(|| invalid("key without '=' separator"))?;

            let key = percent_decode_str(raw_key)
                .decode_utf8()
                .map_err(|_| invalid("key is not valid UTF-8"))?
                .into_owned();
            let value = percent_decode_str(raw_value)
                .decode_utf8()
                .map_err(|_| invalid("value is not valid UTF-8"))?
                .into_owned();

            if key.is_empty() {
                return Err(invalid("empty key"));
            }
            if keys.iter().any(|(k, _)| *k == key) {
                return Err(invalid("duplicate key"));
            }

            keys.push((key, value));
        }

        Ok(Self {
            journey_name: journey_name.to_string(),
            keys,
        })
    }
}
