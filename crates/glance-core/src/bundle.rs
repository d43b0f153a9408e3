use std::collections::BTreeMap;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// A primitive value stored inside a [`ValueBundle`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BundleValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<&str> for BundleValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for BundleValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for BundleValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for BundleValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Ordered mapping of primitive fields, persisted as an opaque string.
///
/// Used for the default values of items created from a widget and for the
/// extras of a custom navigation target. The encoding is a JSON object, so
/// a bundle written by one version stays readable by the next.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValueBundle(BTreeMap<String, BundleValue>);

impl ValueBundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<BundleValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<BundleValue>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&BundleValue> {
        self.0.get(key)
    }

    pub fn get_text(&self, key: &str) -> Option<&str> {
        match self.0.get(key) {
            Some(BundleValue::Text(text)) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.0.get(key) {
            Some(BundleValue::Int(value)) => Some(*value),
            _ => None,
        }
    }

    /// Copies every entry of `other` over this bundle.
    pub fn merge(&mut self, other: &ValueBundle) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &BundleValue)> {
        self.0.iter()
    }

    pub fn encode(&self) -> anyhow::Result<String> {
        serde_json::to_string(self).context("failed to serialize value bundle")
    }

    pub fn decode(raw: &str) -> anyhow::Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(raw).context("failed to parse value bundle")
    }
}

#[cfg(test)]
mod tests {
    use super::{BundleValue, ValueBundle};

    #[test]
    fn keeps_primitive_types_apart() {
        let bundle = ValueBundle::new()
            .with("tag", "Work")
            .with("tag_id", 42_i64)
            .with("starred", true);

        let raw = bundle.encode().expect("encode");
        let parsed = ValueBundle::decode(&raw).expect("decode");

        assert_eq!(parsed.get_text("tag"), Some("Work"));
        assert_eq!(parsed.get_int("tag_id"), Some(42));
        assert_eq!(parsed.get("starred"), Some(&BundleValue::Bool(true)));
    }

    #[test]
    fn blank_input_is_an_empty_bundle() {
        assert!(ValueBundle::decode("  ").expect("blank").is_empty());
        assert!(ValueBundle::decode("not json").is_err());
    }

    #[test]
    fn merge_overrides_existing_keys() {
        let mut base = ValueBundle::new().with("a", 1_i64).with("b", 2_i64);
        base.merge(&ValueBundle::new().with("b", 3_i64));
        assert_eq!(base.get_int("a"), Some(1));
        assert_eq!(base.get_int("b"), Some(3));
        assert_eq!(base.len(), 2);
    }
}
