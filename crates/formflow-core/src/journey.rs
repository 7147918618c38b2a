// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Journey descriptors and the startup-time registry.
//!
//! A [`JourneyDescriptor`] declares everything the engine needs to know about a
//! journey: its name, the Rust type of its state, which request keys
//! disambiguate instances and whether a random token is appended.
//!
//! Descriptors are collected with [`JourneyRegistryBuilder`] during startup and
//! frozen into a [`JourneyRegistry`]. The registry has no mutating API, so an
//! `Arc<JourneyRegistry>` can be shared across request handlers freely.

use std::any::type_name;
use std::collections::HashMap;
use std::collections::HashSet;

use tracing::debug;

use crate::error::{FormFlowError, Result};
use crate::instance_id::UNIQUE_KEY;

/// Suffix marking a declared key as optional (`"id?"`).
const OPTIONAL_MARKER: char = '?';

/// A request key that disambiguates instances of a journey.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequiredKey {
    /// Key name as read from route values or the query string.
    pub name: String,
    /// Whether the key may be absent.
    pub optional: bool,
}

impl RequiredKey {
    /// Parse a declared key, stripping the optional marker.
    pub fn parse(declared: &str) -> Self {
        match declared.strip_suffix(OPTIONAL_MARKER) {
            Some(name) => Self {
                name: name.to_string(),
                optional: true,
            },
            None => Self {
                name: declared.to_string(),
                optional: false,
            },
        }
    }
}

/// Static description of one journey.
#[derive(Debug, Clone)]
pub struct JourneyDescriptor {
    name: String,
    state_type: &'static str,
    required_keys: Vec<RequiredKey>,
    append_unique_key: bool,
}

impl JourneyDescriptor {
    /// Describe a journey whose state is `S`.
    ///
    /// ```ignore
    /// let descriptor = JourneyDescriptor::new::<AddQualificationState>("add-qualification")
    ///     .with_keys(["personId", "qualificationId?"])
    ///     .append_unique_key(true);
    /// ```
    pub fn new<S: 'static>(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state_type: type_name::<S>(),
            required_keys: Vec::new(),
            append_unique_key: false,
        }
    }

    /// Declare disambiguating keys in order. A trailing `?` marks a key optional.
    pub fn with_keys<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        self.required_keys
            .extend(keys.into_iter().map(|k| RequiredKey::parse(k.as_ref())));
        self
    }

    /// Append a fresh random token to every new instance id.
    pub fn append_unique_key(mut self, append: bool) -> Self {
        self.append_unique_key = append;
        self
    }

    /// Journey name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Type name of the journey's state.
    pub fn state_type(&self) -> &'static str {
        self.state_type
    }

    /// Declared keys in declaration order.
    pub fn required_keys(&self) -> &[RequiredKey] {
        &self.required_keys
    }

    /// Whether new ids carry a random token.
    pub fn appends_unique_key(&self) -> bool {
        self.append_unique_key
    }

    /// Check the descriptor is registrable.
    ///
    /// The name ends up verbatim in serialized ids, so it may not contain the
    /// query separators. Keys must be non-empty, distinct, and must not shadow
    /// the reserved token key.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| FormFlowError::InvalidDescriptor {
            journey_name: self.name.clone(),
            reason,
        };

        if self.name.is_empty() {
            return Err(invalid("journey name is empty".to_string()));
        }
        if self.name.contains(['?', '&']) {
            return Err(invalid(
                "journey name may not contain '?' or '&'".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for key in &self.required_keys {
            if key.name.is_empty() {
                return Err(invalid("key name is empty".to_string()));
            }
            if key.name == UNIQUE_KEY {
                return Err(invalid(format!("key '{}' is reserved", UNIQUE_KEY)));
            }
            if !seen.insert(key.name.as_str()) {
                return Err(invalid(format!("key '{}' is declared twice", key.name)));
            }
        }

        Ok(())
    }
}

/// Collects descriptors during startup.
#[derive(Debug, Default)]
pub struct JourneyRegistryBuilder {
    descriptors: HashMap<String, JourneyDescriptor>,
}

impl JourneyRegistryBuilder {
    /// Register a descriptor.
    ///
    /// # Errors
    ///
    /// - `InvalidDescriptor` if [`JourneyDescriptor::validate`] fails
    /// - `DuplicateJourney` if the name is already registered
    pub fn register(&mut self, descriptor: JourneyDescriptor) -> Result<&mut Self> {
        descriptor.validate()?;

        if self.descriptors.contains_key(descriptor.name()) {
            return Err(FormFlowError::DuplicateJourney {
                journey_name: descriptor.name().to_string(),
            });
        }

        debug!(
            journey = %descriptor.name(),
            state_type = descriptor.state_type(),
            keys = descriptor.required_keys().len(),
            unique_key = descriptor.appends_unique_key(),
            "Journey registered"
        );

        self.descriptors
            .insert(descriptor.name().to_string(), descriptor);
        Ok(self)
    }

    /// Freeze the registry.
    pub fn build(self) -> JourneyRegistry {
        JourneyRegistry {
            descriptors: self.descriptors,
        }
    }
}

/// Immutable catalogue of known journeys.
#[derive(Debug)]
pub struct JourneyRegistry {
    descriptors: HashMap<String, JourneyDescriptor>,
}

impl JourneyRegistry {
    /// Start collecting descriptors.
    pub fn builder() -> JourneyRegistryBuilder {
        JourneyRegistryBuilder::default()
    }

    /// Look up a descriptor, failing if the journey is unknown.
    pub fn lookup(&self, journey_name: &str) -> Result<&JourneyDescriptor> {
        self.get(journey_name)
            .ok_or_else(|| FormFlowError::JourneyNotRegistered {
                journey_name: journey_name.to_string(),
            })
    }

    /// Look up a descriptor.
    pub fn get(&self, journey_name: &str) -> Option<&JourneyDescriptor> {
        self.descriptors.get(journey_name)
    }

    /// Registered journey names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.descriptors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Returns the number of registered journeys.
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Returns true when no journeys are registered.
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct QualificationState;
    struct AccountState;

    #[test]
    fn test_required_key_parse() {
        assert_eq!(
            RequiredKey::parse("id"),
            RequiredKey {
                name: "id".to_string(),
                optional: false
            }
        );
        assert_eq!(
            RequiredKey::parse("id?"),
            RequiredKey {
                name: "id".to_string(),
                optional: true
            }
        );
    }

    #[test]
    fn test_descriptor_keeps_declaration_order() {
        let descriptor = JourneyDescriptor::new::<QualificationState>("add-qualification")
            .with_keys(["personId", "routeId?", "step"]);

        let names: Vec<&str> = descriptor
            .required_keys()
            .iter()
            .map(|k| k.name.as_str())
            .collect();
        assert_eq!(names, vec!["personId", "routeId", "step"]);
        assert!(descriptor.required_keys()[1].optional);
        assert!(descriptor.state_type().ends_with("QualificationState"));
        assert!(!descriptor.appends_unique_key());
    }

    #[test]
    fn test_register_and_lookup() {
        let mut builder = JourneyRegistry::builder();
        builder
            .register(JourneyDescriptor::new::<QualificationState>("add-qualification"))
            .unwrap()
            .register(JourneyDescriptor::new::<AccountState>("connect-account"))
            .unwrap();
        let registry = builder.build();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["add-qualification", "connect-account"]);
        assert_eq!(
            registry.lookup("connect-account").unwrap().name(),
            "connect-account"
        );
    }

    #[test]
    fn test_register_duplicate_fails() {
        let mut builder = JourneyRegistry::builder();
        builder
            .register(JourneyDescriptor::new::<QualificationState>("add-qualification"))
            .unwrap();

        let err = builder
            .register(JourneyDescriptor::new::<AccountState>("add-qualification"))
            .unwrap_err();
        assert!(matches!(
            err,
            FormFlowError::DuplicateJourney { ref journey_name } if journey_name == "add-qualification"
        ));
    }

    #[test]
    fn test_lookup_unknown_names_journey() {
        let registry = JourneyRegistry::builder().build();
        assert!(registry.is_empty());

        let err = registry.lookup("missing-journey").unwrap_err();
        assert_eq!(err.error_code(), "JOURNEY_NOT_REGISTERED");
        assert!(err.to_string().contains("missing-journey"));
        assert!(registry.get("missing-journey").is_none());
    }

    #[test]
    fn test_validate_rejects_bad_descriptors() {
        let cases = vec![
            JourneyDescriptor::new::<AccountState>(""),
            JourneyDescriptor::new::<AccountState>("bad?name"),
            JourneyDescriptor::new::<AccountState>("bad&name"),
            JourneyDescriptor::new::<AccountState>("j").with_keys(["id", "id?"]),
            JourneyDescriptor::new::<AccountState>("j").with_keys(["?"]),
            JourneyDescriptor::new::<AccountState>("j").with_keys([UNIQUE_KEY]),
        ];

        for descriptor in cases {
            let err = descriptor.validate().unwrap_err();
            assert_eq!(
                err.error_code(),
                "INVALID_DESCRIPTOR",
                "descriptor {:?} should be rejected",
                descriptor
            );
        }
    }
}
