//! Raw device event records.
//!
//! Terminals describe the same access event in several shapes: flat JSON
//! search records, XML records with an `acsEventInfo` detail block, and
//! stream notifications that nest the detail under `AccessControllerEvent`.
//! [`RawDeviceEvent`] hides those shapes behind ordered field lookups so the
//! normalizer can treat every source the same way.

use crate::xml::XmlElement;
use serde_json::{Map, Value};

/// Nested detail blocks searched after the record's own fields, in order.
const DETAIL_BLOCKS: [&str; 3] = ["acsEventInfo", "AccessControllerEvent", "Info"];

/// One vendor event record, as received.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawDeviceEvent {
    fields: Map<String, Value>,
}

impl RawDeviceEvent {
    /// Wrap a decoded JSON value; anything but an object is rejected.
    #[must_use]
    pub fn from_json(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self { fields }),
            _ => None,
        }
    }

    /// Build a record from an XML event element.
    #[must_use]
    pub fn from_xml(element: &XmlElement) -> Self {
        Self {
            fields: element.to_json_map(),
        }
    }

    #[must_use]
    pub fn from_map(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// First present, non-null value for `key`: own fields, then detail blocks.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        let own = self.fields.get(key).filter(|v| !v.is_null());
        own.or_else(|| {
            DETAIL_BLOCKS.iter().find_map(|block| {
                self.fields
                    .get(*block)
                    .and_then(Value::as_object)
                    .and_then(|detail| detail.get(key))
                    .filter(|v| !v.is_null())
            })
        })
    }

    /// First non-empty textual value among `keys`; numbers are rendered.
    #[must_use]
    pub fn text(&self, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|key| match self.get(key)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
    }

    /// First integer value among `keys`, accepting numeric strings.
    #[must_use]
    pub fn integer(&self, keys: &[&str]) -> Option<i64> {
        keys.iter().find_map(|key| match self.get(key)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
    }

    /// Returns `true` if any of `keys` holds a non-empty value.
    #[must_use]
    pub fn has_any(&self, keys: &[&str]) -> bool {
        keys.iter().any(|key| match self.get(key) {
            Some(Value::String(s)) => !s.trim().is_empty(),
            Some(Value::Bool(b)) => *b,
            Some(_) => true,
            None => false,
        })
    }

    /// Set a top-level field, replacing any previous value.
    #[must_use]
    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    #[must_use]
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }
}
