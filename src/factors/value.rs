//! Tagged factor values.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Text used when a provider has no value for a factor.
pub const NOT_FOUND: &str = "Not found";

/// A single extracted value.
///
/// Providers hand back arbitrary JSON; it is decoded once at the boundary via
/// [`FactorValue::from_provider`] so nothing downstream re-parses text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FactorValue {
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<FactorValue>),
    Map(BTreeMap<String, FactorValue>),
}

impl FactorValue {
    pub fn text(s: impl Into<String>) -> Self {
        FactorValue::Text(s.into())
    }

    pub fn not_found() -> Self {
        FactorValue::Text(NOT_FOUND.to_string())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FactorValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Decode a provider value.
    ///
    /// `null` becomes [`NOT_FOUND`]. Text that is really a rendered list
    /// (`"[...]"`) is parsed back into a list when it is valid JSON, or valid
    /// JSON after swapping single quotes; otherwise it stays text.
    pub fn from_provider(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::not_found(),
            serde_json::Value::Bool(b) => FactorValue::Bool(b),
            serde_json::Value::Number(n) => FactorValue::Number(n.as_f64().unwrap_or_default()),
            serde_json::Value::String(s) => Self::decode_text(s),
            serde_json::Value::Array(items) => {
                FactorValue::List(items.into_iter().map(Self::from_provider).collect())
            }
            serde_json::Value::Object(map) => FactorValue::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Self::from_provider(v)))
                    .collect(),
            ),
        }
    }

    fn decode_text(s: String) -> Self {
        let trimmed = s.trim();
        if !(trimmed.starts_with('[') && trimmed.ends_with(']')) {
            return FactorValue::Text(s);
        }

        let parsed = serde_json::from_str::<serde_json::Value>(trimmed)
            .or_else(|_| serde_json::from_str::<serde_json::Value>(&trimmed.replace('\'', "\"")));

        match parsed {
            Ok(list @ serde_json::Value::Array(_)) => Self::from_provider(list),
            _ => FactorValue::Text(s),
        }
    }

    /// Convert back into JSON, for prompts and projections.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl std::fmt::Display for FactorValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FactorValue::Bool(b) => write!(f, "{}", b),
            FactorValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => {
                write!(f, "{}", *n as i64)
            }
            FactorValue::Number(n) => write!(f, "{}", n),
            FactorValue::Text(s) => f.write_str(s),
            FactorValue::List(_) | FactorValue::Map(_) => write!(f, "{}", self.to_json()),
        }
    }
}

impl From<&str> for FactorValue {
    fn from(s: &str) -> Self {
        FactorValue::Text(s.to_string())
    }
}

impl From<String> for FactorValue {
    fn from(s: String) -> Self {
        FactorValue::Text(s)
    }
}
