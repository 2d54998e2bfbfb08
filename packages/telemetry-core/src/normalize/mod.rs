//! Parsing of raw broker payloads into [`NormalizedRecord`]s.
//!
//! Normalization never fails: a payload that does not decode as JSON is kept
//! as text, so malformed input costs field-level fidelity but never the
//! message itself.

mod derived;

pub use derived::{speed_kmh, DerivedFormula};

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::record::{FieldValue, NormalizedRecord, Payload, RawFrame};
use crate::state::NormalizerConfig;
use crate::utils::{parse_numeric_str, parse_timestamp};

/// Field name used when the payload is a bare scalar rather than an object.
pub(crate) const SCALAR_FIELD: &str = "value";

/// Turns raw frames into normalized records and computes derived fields.
///
/// Holds no mutable state; one instance is shared by the pipeline.
#[derive(Debug)]
pub struct MessageNormalizer {
    config: NormalizerConfig,
    formulas: Vec<DerivedFormula>,
}

impl MessageNormalizer {
    /// Creates a normalizer with the built-in formulas (speed).
    pub fn new(config: NormalizerConfig) -> Self {
        let speed = DerivedFormula::speed(&config.rotational_rate_field, config.wheel_radius_m);
        Self {
            config,
            formulas: vec![speed],
        }
    }

    /// Adds a derived-field formula.
    #[must_use]
    pub fn with_formula(mut self, formula: DerivedFormula) -> Self {
        self.formulas.push(formula);
        self
    }

    /// Parses and enriches one frame.
    pub fn normalize(&self, frame: RawFrame) -> NormalizedRecord {
        let payload = match serde_json::from_slice::<Value>(&frame.bytes) {
            Ok(value) => Payload::Structured(value),
            Err(e) => {
                log::debug!(
                    "[Normalizer] Undecodable payload on {} ({} bytes): {}",
                    frame.topic,
                    frame.bytes.len(),
                    e
                );
                Payload::Text(String::from_utf8_lossy(&frame.bytes).into_owned())
            }
        };

        let (outer, body) = match &payload {
            Payload::Structured(value) => (value.as_object(), self.unwrap_body(value)),
            Payload::Text(_) => (None, None),
        };
        let inner = body.and_then(Value::as_object);
        // Metadata is looked up in the unwrapped body first, then the envelope.
        let scopes: Vec<&Map<String, Value>> = inner.into_iter().chain(outer).collect();

        let fields = body.map(|b| self.extract_fields(b)).unwrap_or_default();
        let derived_fields = self
            .formulas
            .iter()
            .filter_map(|f| f.evaluate(&fields).map(|v| (f.name().to_string(), v)))
            .collect();

        NormalizedRecord {
            identifier: self
                .explicit_identifier(&scopes)
                .unwrap_or_else(|| identifier_from_topic(&frame.topic)),
            source_timestamp: self.source_timestamp(&scopes),
            topic: frame.topic,
            payload,
            fields,
            derived_fields,
            received_at: frame.received_at,
        }
    }

    /// Unwraps one level if the actual fields sit under the wrapper key.
    fn unwrap_body<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        match value.get(&self.config.wrapper_key) {
            Some(inner @ Value::Object(_)) => Some(inner),
            _ => Some(value),
        }
    }

    fn extract_fields(&self, body: &Value) -> BTreeMap<String, FieldValue> {
        match body {
            Value::Object(map) => map
                .iter()
                .filter(|(k, _)| !self.is_metadata_key(k))
                .filter_map(|(k, v)| scalar_field(v).map(|fv| (k.clone(), fv)))
                .collect(),
            other => scalar_field(other)
                .map(|fv| BTreeMap::from([(SCALAR_FIELD.to_string(), fv)]))
                .unwrap_or_default(),
        }
    }

    fn is_metadata_key(&self, key: &str) -> bool {
        self.config.identifier_keys.iter().any(|k| k == key)
            || self.config.timestamp_keys.iter().any(|k| k == key)
    }

    fn explicit_identifier(&self, scopes: &[&Map<String, Value>]) -> Option<String> {
        scopes.iter().find_map(|map| {
            self.config.identifier_keys.iter().find_map(|key| {
                map.get(key)
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            })
        })
    }

    fn source_timestamp(&self, scopes: &[&Map<String, Value>]) -> Option<DateTime<Utc>> {
        scopes.iter().find_map(|map| {
            self.config
                .timestamp_keys
                .iter()
                .find_map(|key| map.get(key).and_then(parse_timestamp))
        })
    }
}

/// Maps a JSON scalar to a field value; numeric strings become numbers.
fn scalar_field(value: &Value) -> Option<FieldValue> {
    match value {
        Value::Number(n) => n.as_f64().filter(|n| n.is_finite()).map(FieldValue::Number),
        Value::String(s) => Some(
            parse_numeric_str(s)
                .map(FieldValue::Number)
                .unwrap_or_else(|| FieldValue::Text(s.clone())),
        ),
        _ => None,
    }
}

/// Last non-empty topic segment, or the whole topic if it has none.
fn identifier_from_topic(topic: &str) -> String {
    topic
        .rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or(topic)
        .to_string()
}
