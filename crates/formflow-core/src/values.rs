// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Request value sources.
//!
//! The engine never sees a framework request object. It only asks a
//! [`ValueProvider`] for the value of a named key, which web adapters back with
//! route values, the query string, or both.

use std::collections::{BTreeMap, HashMap};

use percent_encoding::percent_decode_str;

/// Capability to read a single request value by key.
pub trait ValueProvider: Send + Sync {
    /// Return the value for `key`, or `None` if the request does not carry it.
    fn try_get_value(&self, key: &str) -> Option<String>;
}

impl ValueProvider for HashMap<String, String> {
    fn try_get_value(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

impl ValueProvider for BTreeMap<String, String> {
    fn try_get_value(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

impl ValueProvider for Vec<(String, String)> {
    fn try_get_value(&self, key: &str) -> Option<String> {
        self.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
    }
}

/// Values parsed from a raw query string.
///
/// Both keys and values are percent-decoded and `+` is read as a space. When
/// a key repeats, the first occurrence wins.
#[derive(Debug, Clone, Default)]
pub struct QueryValues {
    pairs: Vec<(String, String)>,
}

impl QueryValues {
    /// Parse `a=1&b=2`. A leading `?` is ignored.
    pub fn parse(query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        let pairs = query
            .split('&')
            .filter(|segment| !segment.is_empty())
            .map(|segment| match segment.split_once('=') {
                Some((k, v)) => (decode_component(k), decode_component(v)),
                None => (decode_component(segment), String::new()),
            })
            .collect();
        Self { pairs }
    }
}

impl ValueProvider for QueryValues {
    fn try_get_value(&self, key: &str) -> Option<String> {
        self.pairs.try_get_value(key)
    }
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}

/// Chains providers; the first one holding a key answers.
///
/// The usual arrangement puts route values ahead of the query string.
#[derive(Default)]
pub struct CompositeValues {
    providers: Vec<Box<dyn ValueProvider>>,
}

impl CompositeValues {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a provider with lower precedence than those already added.
    pub fn with(mut self, provider: impl ValueProvider + 'static) -> Self {
        self.providers.push(Box::new(provider));
        self
    }
}

impl ValueProvider for CompositeValues {
    fn try_get_value(&self, key: &str) -> Option<String> {
        self.providers.iter().find_map(|p| p.try_get_value(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_values_parse() {
        let values = QueryValues::parse("?personId=42&name=Jane+Doe&note=a%26b&flag");

        assert_eq!(values.try_get_value("personId").as_deref(), Some("42"));
        assert_eq!(values.try_get_value("name").as_deref(), Some("Jane Doe"));
        assert_eq!(values.try_get_value("note").as_deref(), Some("a&b"));
        assert_eq!(values.try_get_value("flag").as_deref(), Some(""));
        assert_eq!(values.try_get_value("missing"), None);
    }

    #[test]
    fn test_query_values_first_occurrence_wins() {
        let values = QueryValues::parse("id=1&id=2");
        assert_eq!(values.try_get_value("id").as_deref(), Some("1"));
    }

    #[test]
    fn test_query_values_empty() {
        let values = QueryValues::parse("");
        assert_eq!(values.try_get_value("id"), None);
    }

    #[test]
    fn test_composite_precedence() {
        let route: HashMap<String, String> =
            HashMap::from([("personId".to_string(), "from-route".to_string())]);
        let query = QueryValues::parse("personId=from-query&ffiid=tok");

        let values = CompositeValues::new().with(route).with(query);

        assert_eq!(
            values.try_get_value("personId").as_deref(),
            Some("from-route")
        );
        assert_eq!(values.try_get_value("ffiid").as_deref(), Some("tok"));
        assert_eq!(values.try_get_value("other"), None);
    }
}
