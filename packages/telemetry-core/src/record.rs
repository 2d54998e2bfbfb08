//! Telemetry record types shared by every stage of the bridge.
//!
//! A [`RawFrame`] is what the broker session hands over; a
//! [`NormalizedRecord`] is what the rest of the bridge (fan-out and history)
//! works with. Records are immutable once built and are shared behind `Arc`
//! so fan-out never copies them per subscriber.

use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One message as received from the broker, before any parsing.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Topic the message was published on.
    pub topic: String,
    /// Opaque payload bytes.
    pub bytes: Bytes,
    /// Instant the bridge received the frame.
    pub received_at: DateTime<Utc>,
}

impl RawFrame {
    /// Creates a frame stamped with the current time.
    pub fn new(topic: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            bytes: bytes.into(),
            received_at: Utc::now(),
        }
    }

    /// Creates a frame with an explicit receive time.
    pub fn at(topic: impl Into<String>, bytes: impl Into<Bytes>, received_at: DateTime<Utc>) -> Self {
        Self {
            topic: topic.into(),
            bytes: bytes.into(),
            received_at,
        }
    }
}

/// A single extracted field value.
///
/// Numeric strings are folded into [`FieldValue::Number`] during
/// normalization; anything else textual stays [`FieldValue::Text`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl FieldValue {
    /// Returns the numeric value, or `None` for text fields.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(_) => None,
        }
    }
}

/// The decoded payload of a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    /// The bytes decoded as JSON.
    Structured(serde_json::Value),
    /// The bytes did not decode; kept verbatim as (lossy UTF-8) text.
    Text(String),
}

impl Payload {
    /// Returns the structured value if the payload decoded.
    #[must_use]
    pub fn as_structured(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Structured(v) => Some(v),
            Self::Text(_) => None,
        }
    }

    /// Returns the raw text if the payload did not decode.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Structured(_) => None,
            Self::Text(s) => Some(s),
        }
    }
}

/// Canonical, bridge-internal representation of one device message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedRecord {
    /// Device/sensor identifier (payload field, else last topic segment).
    pub identifier: String,
    /// Source topic.
    pub topic: String,
    /// Decoded payload, or the raw text when decoding failed.
    pub payload: Payload,
    /// Extracted fields (after unwrapping the wrapper key).
    pub fields: BTreeMap<String, FieldValue>,
    /// Fields computed by known formulas; omitted when inputs are missing.
    pub derived_fields: BTreeMap<String, f64>,
    /// Device-reported timestamp, if the payload carried one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_timestamp: Option<DateTime<Utc>>,
    /// When the bridge received the source frame.
    pub received_at: DateTime<Utc>,
}

impl NormalizedRecord {
    /// Looks up a numeric value by name across extracted and derived fields.
    ///
    /// Derived fields win if both exist.
    #[must_use]
    pub fn numeric(&self, name: &str) -> Option<f64> {
        self.derived_fields
            .get(name)
            .copied()
            .or_else(|| self.fields.get(name).and_then(FieldValue::as_f64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_value_serializes_untagged() {
        assert_eq!(
            serde_json::to_string(&FieldValue::Number(3.5)).unwrap(),
            "3.5"
        );
        assert_eq!(
            serde_json::to_string(&FieldValue::Text("ok".into())).unwrap(),
            "\"ok\""
        );
    }

    #[test]
    fn numeric_prefers_derived_fields() {
        let mut fields = BTreeMap::new();
        fields.insert("speed".to_string(), FieldValue::Number(1.0));
        fields.insert("label".to_string(), FieldValue::Text("x".into()));
        let mut derived_fields = BTreeMap::new();
        derived_fields.insert("speed".to_string(), 2.0);

        let record = NormalizedRecord {
            identifier: "data".into(),
            topic: "sensor/data".into(),
            payload: Payload::Text("".into()),
            fields,
            derived_fields,
            source_timestamp: None,
            received_at: Utc::now(),
        };

        assert_eq!(record.numeric("speed"), Some(2.0));
        assert_eq!(record.numeric("label"), None);
        assert_eq!(record.numeric("missing"), None);
    }

    #[test]
    fn record_serializes_camel_case() {
        let record = NormalizedRecord {
            identifier: "data".into(),
            topic: "sensor/data".into(),
            payload: Payload::Structured(serde_json::json!({"rpm": 1})),
            fields: BTreeMap::new(),
            derived_fields: BTreeMap::new(),
            source_timestamp: None,
            received_at: Utc::now(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("derivedFields").is_some());
        assert!(json.get("receivedAt").is_some());
        assert!(json.get("sourceTimestamp").is_none());
        assert_eq!(json["payload"]["rpm"], 1);
    }
}
