//! Parameter maps delivered through worker control mailboxes.
//!
//! A mailbox carries a flat `name → value` map.  Workers merge only the keys
//! they recognize; unknown keys are ignored so senders can broadcast a single
//! map to several workers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single dynamically-typed parameter value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// Boolean flag.
    Bool(bool),
    /// Integer value.
    I64(i64),
    /// Floating-point value.
    F64(f64),
    /// Free-form string (source selectors, method names).
    Str(String),
}

impl ParamValue {
    /// Integer view; `F64` values are truncated.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::I64(v) => Some(*v),
            ParamValue::F64(v) => Some(*v as i64),
            _ => None,
        }
    }

    /// Float view; `I64` values are widened.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::F64(v) => Some(*v),
            ParamValue::I64(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Boolean view.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// String view.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(v) => Some(v),
            _ => None,
        }
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::I64(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::F64(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Str(v.to_owned())
    }
}

/// A named parameter map, the payload of every control message.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamMap(HashMap<String, ParamValue>);

impl ParamMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a parameter; chainable for test construction.
    pub fn with(mut self, name: &str, value: impl Into<ParamValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Inserts or replaces a parameter.
    pub fn set(&mut self, name: &str, value: impl Into<ParamValue>) {
        self.0.insert(name.to_owned(), value.into());
    }

    /// Raw lookup.
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    /// Typed lookups; `None` when absent or the wrong type.
    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(ParamValue::as_i64)
    }

    /// Float lookup (integers widen).
    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(ParamValue::as_f64)
    }

    /// Boolean lookup.
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(ParamValue::as_bool)
    }

    /// String lookup.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(ParamValue::as_str)
    }

    /// Iterates all entries.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// True when the map carries no entries.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_lookups_coerce_numbers() {
        let map = ParamMap::new()
            .with("fps", 30i64)
            .with("deadline", 100.5)
            .with("ordered", true)
            .with("source", "synthetic");

        assert_eq!(map.get_i64("fps"), Some(30));
        assert_eq!(map.get_f64("fps"), Some(30.0));
        assert_eq!(map.get_i64("deadline"), Some(100));
        assert_eq!(map.get_bool("ordered"), Some(true));
        assert_eq!(map.get_str("source"), Some("synthetic"));
        assert_eq!(map.get_f64("missing"), None);
        assert_eq!(map.get_bool("fps"), None);
    }

    #[test]
    fn serde_round_trip() {
        let map = ParamMap::new().with("target_fps", 25i64).with("ordered", false);
        let json = serde_json::to_string(&map).unwrap();
        let back: ParamMap = serde_json::from_str(&json).unwrap();
        assert_eq!(back.get_i64("target_fps"), Some(25));
        assert_eq!(back.get_bool("ordered"), Some(false));
    }
}
