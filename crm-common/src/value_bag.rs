//! Type-checked read access to loosely-typed upstream payloads
//!
//! Upstream systems hand over arbitrary JSON documents. `ValueBag` is a
//! borrowed, read-only view that never assumes presence or shape: every
//! accessor returns `None` (or an empty collection) when a field is missing or
//! carries an unexpected type.

use crate::time::parse_timestamp_value;
use serde_json::{Map, Value};

static EMPTY: &[Value] = &[];

/// Borrowed view over a JSON object
#[derive(Debug, Clone, Copy, Default)]
pub struct ValueBag<'a> {
    map: Option<&'a Map<String, Value>>,
}

impl<'a> ValueBag<'a> {
    /// View a JSON value; anything other than an object reads as empty
    pub fn new(value: &'a Value) -> Self {
        Self {
            map: value.as_object(),
        }
    }

    pub fn from_map(map: &'a Map<String, Value>) -> Self {
        Self { map: Some(map) }
    }

    pub fn empty() -> ValueBag<'static> {
        ValueBag { map: None }
    }

    pub fn is_empty(&self) -> bool {
        self.map.map_or(true, |m| m.is_empty())
    }

    /// Raw field access, treating JSON null as absent
    pub fn raw(&self, key: &str) -> Option<&'a Value> {
        self.map
            .and_then(|m| m.get(key))
            .filter(|v| !v.is_null())
    }

    /// Nested object view (empty when missing or not an object)
    pub fn child(&self, key: &str) -> ValueBag<'a> {
        match self.raw(key) {
            Some(v) => ValueBag::new(v),
            None => ValueBag { map: None },
        }
    }

    /// Non-empty text; numbers are rendered as their decimal form
    pub fn text(&self, key: &str) -> Option<String> {
        self.raw(key).and_then(value_to_text)
    }

    /// First non-empty text among several keys
    pub fn first_text(&self, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|k| self.text(k))
    }

    /// Numeric field; numeric strings are accepted
    pub fn number(&self, key: &str) -> Option<f64> {
        match self.raw(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    pub fn first_number(&self, keys: &[&str]) -> Option<f64> {
        keys.iter().find_map(|k| self.number(k))
    }

    pub fn integer(&self, key: &str) -> Option<i64> {
        match self.raw(key)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        }
    }

    pub fn boolean(&self, key: &str) -> Option<bool> {
        self.raw(key).and_then(Value::as_bool)
    }

    /// Timestamp field as epoch milliseconds
    pub fn timestamp_ms(&self, key: &str) -> Option<i64> {
        self.raw(key).and_then(parse_timestamp_value)
    }

    pub fn first_timestamp(&self, keys: &[&str]) -> Option<i64> {
        keys.iter().find_map(|k| self.timestamp_ms(k))
    }

    /// Array field (empty slice when missing or not an array)
    pub fn list(&self, key: &str) -> &'a [Value] {
        match self.raw(key) {
            Some(Value::Array(items)) => items.as_slice(),
            _ => EMPTY,
        }
    }

    /// Object elements of an array field
    pub fn children(&self, key: &str) -> impl Iterator<Item = ValueBag<'a>> + 'a {
        self.list(key)
            .iter()
            .filter(|v| v.is_object())
            .map(ValueBag::new)
    }

    /// Text elements of an array field; a scalar field reads as a one-element list
    pub fn strings(&self, key: &str) -> Vec<String> {
        match self.raw(key) {
            Some(Value::Array(items)) => items.iter().filter_map(value_to_text).collect(),
            Some(other) => value_to_text(other).into_iter().collect(),
            None => Vec::new(),
        }
    }

    /// True when the field is a non-empty array
    pub fn has_items(&self, key: &str) -> bool {
        !self.list(key).is_empty()
    }
}

fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
