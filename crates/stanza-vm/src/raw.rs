//! Defaulting accessors over the parsed machine description.
//!
//! A missing key and a key holding the wrong JSON type are treated the same:
//! the caller's default is returned. Required-field checks live in the
//! builder, not here.

use crate::error::Result;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::io::Read;

/// An untyped JSON object, read-only once loaded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawConfig {
    map: Map<String, Value>,
}

impl RawConfig {
    /// Wrap an already-parsed JSON object.
    pub fn new(map: Map<String, Value>) -> Self {
        Self { map }
    }

    /// Parse a JSON document whose top level must be an object.
    pub fn parse(s: &str) -> Result<Self> {
        Ok(Self::new(serde_json::from_str(s)?))
    }

    /// Parse a JSON document from a reader (a file or stdin).
    pub fn from_reader(reader: impl Read) -> Result<Self> {
        Ok(Self::new(serde_json::from_reader(reader)?))
    }

    /// String at `key`, or `default`.
    pub fn get_str(&self, key: &str, default: &str) -> String {
        self.map
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or(default)
            .to_string()
    }

    /// Signed integer at `key`, or `default`.
    pub fn get_i64(&self, key: &str, default: i64) -> i64 {
        self.map.get(key).and_then(Value::as_i64).unwrap_or(default)
    }

    /// Unsigned integer at `key`, or `default`. Negative numbers mismatch.
    pub fn get_u64(&self, key: &str, default: u64) -> u64 {
        self.map.get(key).and_then(Value::as_u64).unwrap_or(default)
    }

    /// Array of objects at `key`, or an empty list.
    ///
    /// The whole array is treated as mismatched if any element is not an
    /// object.
    pub fn get_maps(&self, key: &str) -> Vec<RawConfig> {
        let Some(items) = self.map.get(key).and_then(Value::as_array) else {
            return Vec::new();
        };
        items
            .iter()
            .map(|v| v.as_object().cloned().map(RawConfig::new))
            .collect::<Option<Vec<_>>>()
            .unwrap_or_default()
    }

    /// Object of objects at `key`, or an empty map. Keys come back sorted.
    pub fn get_map_of_maps(&self, key: &str) -> BTreeMap<String, RawConfig> {
        let Some(entries) = self.map.get(key).and_then(Value::as_object) else {
            return BTreeMap::new();
        };
        entries
            .iter()
            .map(|(k, v)| {
                v.as_object()
                    .cloned()
                    .map(|m| (k.clone(), RawConfig::new(m)))
            })
            .collect::<Option<BTreeMap<_, _>>>()
            .unwrap_or_default()
    }

    /// `true` only when the value at `key` is the literal string `"yes"`.
    pub fn get_yes(&self, key: &str) -> bool {
        self.get_str(key, "no") == "yes"
    }
}
