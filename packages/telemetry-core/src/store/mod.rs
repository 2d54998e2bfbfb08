//! Append-only telemetry history.
//!
//! [`TelemetryStore`] is the seam between the pipeline and persistence.
//! Two implementations exist:
//! - [`MemoryStore`]: process-lifetime history, used when no data directory
//!   is configured
//! - [`FileStore`]: a JSON-lines log in the data directory, replayed into an
//!   in-memory index on open
//!
//! Both make a record visible to queries as soon as `append` returns.

mod file;
mod index;
mod memory;
mod series;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use series::{build_series, extract_numeric, resolve_field, SeriesPoint, SeriesStats};

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record::{FieldValue, NormalizedRecord, Payload};

/// Failures of the history store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Query bounds are inverted.
    #[error("Invalid time range: {0}")]
    InvalidRange(String),
}

/// Store-assigned, strictly increasing record key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordKey(u64);

impl RecordKey {
    pub fn value(self) -> u64 {
        self.0
    }

    fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

const MAX_WINDOW_HOURS: i64 = 24 * 366 * 100;

/// Inclusive time window over `receivedAt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, StoreError> {
        if start > end {
            return Err(StoreError::InvalidRange(format!(
                "start {} is after end {}",
                start.to_rfc3339(),
                end.to_rfc3339()
            )));
        }
        Ok(Self { start, end })
    }

    /// The `hours` ending at `end`, capped at a century.
    pub fn last_hours(end: DateTime<Utc>, hours: i64) -> Self {
        Self {
            start: end - chrono::Duration::hours(hours.clamp(0, MAX_WINDOW_HOURS)),
            end,
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at <= self.end
    }
}

/// A normalized record as persisted, with its store key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "PersistedRecord", from = "PersistedRecord")]
pub struct StoredRecord {
    pub key: RecordKey,
    pub record: Arc<NormalizedRecord>,
}

/// Storage shape of a record.
///
/// `payload` is the decoded payload or `null`; undecodable payloads keep
/// their text in `raw`.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedRecord {
    key: RecordKey,
    identifier: String,
    topic: String,
    payload: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    raw: Option<String>,
    #[serde(default)]
    fields: BTreeMap<String, FieldValue>,
    #[serde(default)]
    derived_fields: BTreeMap<String, f64>,
    received_at: DateTime<Utc>,
    device_timestamp: Option<DateTime<Utc>>,
}

impl From<StoredRecord> for PersistedRecord {
    fn from(stored: StoredRecord) -> Self {
        let record = Arc::unwrap_or_clone(stored.record);
        let (payload, raw) = match record.payload {
            Payload::Structured(value) => (Some(value), None),
            Payload::Text(text) => (None, Some(text)),
        };
        Self {
            key: stored.key,
            identifier: record.identifier,
            topic: record.topic,
            payload,
            raw,
            fields: record.fields,
            derived_fields: record.derived_fields,
            received_at: record.received_at,
            device_timestamp: record.source_timestamp,
        }
    }
}

impl From<PersistedRecord> for StoredRecord {
    fn from(p: PersistedRecord) -> Self {
        let payload = match (p.payload, p.raw) {
            (Some(value), _) => Payload::Structured(value),
            (None, Some(text)) => Payload::Text(text),
            (None, None) => Payload::Structured(serde_json::Value::Null),
        };
        Self {
            key: p.key,
            record: Arc::new(NormalizedRecord {
                identifier: p.identifier,
                topic: p.topic,
                payload,
                fields: p.fields,
                derived_fields: p.derived_fields,
                source_timestamp: p.device_timestamp,
                received_at: p.received_at,
            }),
        }
    }
}

/// Durable, time-ordered history of normalized records.
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// Appends one record and returns it with its assigned key.
    ///
    /// There is no update or delete; every call adds a new record.
    async fn append(&self, record: Arc<NormalizedRecord>) -> Result<StoredRecord, StoreError>;

    /// Records for `identifier` received within `range`, ascending by
    /// receive time, at most `limit` (the earliest ones).
    async fn query(
        &self,
        identifier: &str,
        range: TimeRange,
        limit: usize,
    ) -> Result<Vec<StoredRecord>, StoreError>;

    /// Like [`query`](TelemetryStore::query) across all identifiers.
    async fn scan(&self, range: TimeRange, limit: usize) -> Result<Vec<StoredRecord>, StoreError>;

    /// Number of stored records.
    async fn len(&self) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::MessageNormalizer;
    use crate::record::RawFrame;
    use crate::state::NormalizerConfig;

    fn stored(bytes: &[u8]) -> StoredRecord {
        let normalizer = MessageNormalizer::new(NormalizerConfig::default());
        StoredRecord {
            key: RecordKey(7),
            record: Arc::new(normalizer.normalize(RawFrame::new("sensor/data", bytes.to_vec()))),
        }
    }

    #[test]
    fn persisted_shape_has_payload_and_device_timestamp() {
        let json = serde_json::to_value(stored(br#"{"rpm": 300}"#)).unwrap();
        assert_eq!(json["key"], 7);
        assert_eq!(json["payload"]["rpm"], 300);
        assert!(json.get("raw").is_none());
        assert!(json["deviceTimestamp"].is_null());
        assert!(json["receivedAt"].is_string());
        assert!(json["derivedFields"]["speed"].is_number());
    }

    #[test]
    fn undecodable_payload_persists_as_null_with_raw_text() {
        let original = stored(b"garbage");
        let json = serde_json::to_value(original.clone()).unwrap();
        assert!(json["payload"].is_null());
        assert_eq!(json["raw"], "garbage");

        let back: StoredRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn inverted_range_is_rejected() {
        let now = Utc::now();
        assert!(TimeRange::new(now, now - chrono::Duration::seconds(1)).is_err());
        assert!(TimeRange::new(now, now).is_ok());
    }

    #[test]
    fn last_hours_window() {
        let end = Utc::now();
        let range = TimeRange::last_hours(end, 6);
        assert_eq!(range.end - range.start, chrono::Duration::hours(6));
        assert!(range.contains(end));
        assert!(!range.contains(end + chrono::Duration::seconds(1)));
    }
}
