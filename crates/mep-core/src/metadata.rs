//! Open-ended scalar metadata attached to an [`Attachment`](crate::attachment::Attachment).
//!
//! Values are restricted to strings, numbers and booleans. Anything decoded
//! from JSON goes through [`Metadata::from_json`], which rejects nested
//! structures and `null`.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::MetadataError;

/// Key used by garbage collectors to find the owner of an attachment.
pub const CONTEXT_KEY: &str = "context";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl MetadataValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetadataValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Convert a JSON value, refusing arrays, objects, `null` and non-finite numbers.
    pub fn from_json(key: &str, value: Value) -> Result<Self, MetadataError> {
        match value {
            Value::Bool(b) => Ok(MetadataValue::Bool(b)),
            Value::String(s) => Ok(MetadataValue::String(s)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(MetadataValue::Integer(i))
                } else {
                    match n.as_f64() {
                        Some(f) if f.is_finite() => Ok(MetadataValue::Float(f)),
                        _ => Err(MetadataError::NonFinite { key: key.to_string() }),
                    }
                }
            }
            Value::Null => Err(MetadataError::NotScalar {
                key: key.to_string(),
                kind: "null",
            }),
            Value::Array(_) => Err(MetadataError::NotScalar {
                key: key.to_string(),
                kind: "array",
            }),
            Value::Object(_) => Err(MetadataError::NotScalar {
                key: key.to_string(),
                kind: "object",
            }),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            MetadataValue::Bool(b) => Value::Bool(*b),
            MetadataValue::Integer(i) => Value::from(*i),
            MetadataValue::Float(f) => Value::from(*f),
            MetadataValue::String(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Bool(b) => write!(f, "{b}"),
            MetadataValue::Integer(i) => write!(f, "{i}"),
            MetadataValue::Float(x) => write!(f, "{x}"),
            MetadataValue::String(s) => f.write_str(s),
        }
    }
}

impl From<bool> for MetadataValue {
    fn from(b: bool) -> Self {
        MetadataValue::Bool(b)
    }
}

impl From<i64> for MetadataValue {
    fn from(i: i64) -> Self {
        MetadataValue::Integer(i)
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::String(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        MetadataValue::String(s)
    }
}

/// String-keyed map of scalar values.
///
/// Also used for processor options, which follow the same scalar rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Metadata(BTreeMap<String, MetadataValue>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(value: Value) -> Result<Self, MetadataError> {
        let Value::Object(map) = value else {
            return Err(MetadataError::NotAnObject);
        };
        let mut metadata = Self::new();
        for (key, value) in map {
            let value = MetadataValue::from_json(&key, value)?;
            metadata.insert(key, value)?;
        }
        Ok(metadata)
    }

    /// Parse the JSON text stored in a database column.
    pub fn from_json_str(raw: &str) -> Result<Self, MetadataError> {
        let value: Value = serde_json::from_str(raw).map_err(|_| MetadataError::NotAnObject)?;
        Self::from_json(value)
    }

    pub fn to_json(&self) -> Value {
        Value::Object(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }

    pub fn to_json_string(&self) -> String {
        self.to_json().to_string()
    }

    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<MetadataValue>,
    ) -> Result<Option<MetadataValue>, MetadataError> {
        let key = key.into();
        if key.is_empty() {
            return Err(MetadataError::EmptyKey);
        }
        let value = value.into();
        if let MetadataValue::Float(f) = value {
            if !f.is_finite() {
                return Err(MetadataError::NonFinite { key });
            }
        }
        Ok(self.0.insert(key, value))
    }

    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.0.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<MetadataValue> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// `true` only when the key holds the boolean `true`.
    pub fn flag(&self, key: &str) -> bool {
        self.get(key).and_then(MetadataValue::as_bool).unwrap_or(false)
    }

    pub fn context(&self) -> Option<&str> {
        self.get(CONTEXT_KEY).and_then(MetadataValue::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MetadataValue)> {
        self.0.iter()
    }
}

impl<'de> Deserialize<'de> for Metadata {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Metadata::from_json(value).map_err(serde::de::Error::custom)
    }
}

pub type ProcessorOptions = Metadata;
