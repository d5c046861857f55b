//! Event payloads
//!
//! A payload is a flat string-to-string record. Nested documents (contexts,
//! self-describing events) are serialized to strings by the caller before they
//! are added.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Event id field
pub const EVENT_ID: &str = "eid";
/// Device created timestamp field
pub const DEVICE_TIMESTAMP: &str = "dtm";
/// Device sent timestamp field, stamped by the emitter at send time
pub const SENT_TIMESTAMP: &str = "stm";
/// Tracker version field
pub const TRACKER_VERSION: &str = "tv";
/// Tracker namespace field
pub const NAMESPACE: &str = "tna";
/// Application id field
pub const APP_ID: &str = "aid";
/// Platform field
pub const PLATFORM: &str = "p";
/// Attached contexts field (JSON string)
pub const CONTEXTS: &str = "co";

/// A flat event record.
///
/// Entries with an empty key or an empty value are dropped on insert.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload {
    pairs: BTreeMap<String, String>,
}

impl Payload {
    /// Create an empty payload
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a single entry, replacing any previous value for the key
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if !key.is_empty() && !value.is_empty() {
            self.pairs.insert(key, value);
        }
    }

    /// Add every entry of `pairs`
    pub fn add_map<K, V>(&mut self, pairs: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in pairs {
            self.add(key, value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.pairs.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Encode as a URL query string (`k=v` pairs joined by `&`)
    pub fn to_query_string(&self) -> String {
        self.pairs
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Serialize as a JSON object
    pub fn to_json_string(&self) -> String {
        // A map of strings always serializes
        serde_json::to_string(&self.pairs).unwrap_or_default()
    }

    /// Borrow the payload as a JSON value
    pub fn to_json_value(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.pairs
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect(),
        )
    }
}

impl<K, V> FromIterator<(K, V)> for Payload
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut payload = Payload::new();
        payload.add_map(iter);
        payload
    }
}
