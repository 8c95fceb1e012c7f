//! Decoded measurement snapshot.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single decoded measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Unscaled register value.
    Int(i64),
    /// Fixed-point register value after scaling.
    Float(f64),
    /// Label looked up from a code table.
    Text(String),
}

impl Value {
    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Text(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The zero of the same type. Text has no zero and is returned unchanged.
    pub fn zeroed(&self) -> Value {
        match self {
            Value::Int(_) => Value::Int(0),
            Value::Float(_) => Value::Float(0.0),
            Value::Text(s) => Value::Text(s.clone()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

/// The complete set of measurements decoded from one successful poll.
///
/// A snapshot is built in full by the decoder and then published as a
/// whole; it is never mutated after publication.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    values: BTreeMap<&'static str, Value>,

    /// Unix epoch milliseconds at which the hub published this snapshot.
    #[serde(skip_serializing_if = "Option::is_none")]
    captured_at: Option<i64>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a measurement by key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Value)> {
        self.values.iter().map(|(k, v)| (*k, v))
    }

    pub fn captured_at(&self) -> Option<i64> {
        self.captured_at
    }

    /// Stamp the snapshot with its publication time.
    pub fn with_timestamp(mut self, millis: i64) -> Self {
        self.captured_at = Some(millis);
        self
    }

    pub(crate) fn insert(&mut self, key: &'static str, value: impl Into<Value>) {
        self.values.insert(key, value.into());
    }

    pub(crate) fn zero(&mut self, key: &str) {
        if let Some(value) = self.values.get_mut(key) {
            *value = value.zeroed();
        }
    }
}
