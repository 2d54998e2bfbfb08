//! Process-lifetime history store.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::index::RecordIndex;
use super::{StoreError, StoredRecord, TelemetryStore, TimeRange};
use crate::record::NormalizedRecord;

/// History kept in memory only; lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    index: RwLock<RecordIndex>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TelemetryStore for MemoryStore {
    async fn append(&self, record: Arc<NormalizedRecord>) -> Result<StoredRecord, StoreError> {
        let mut index = self.index.write();
        let stored = index.assign(record);
        index.insert(stored.clone());
        Ok(stored)
    }

    async fn query(
        &self,
        identifier: &str,
        range: TimeRange,
        limit: usize,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        Ok(self.index.read().query(identifier, range, limit))
    }

    async fn scan(&self, range: TimeRange, limit: usize) -> Result<Vec<StoredRecord>, StoreError> {
        Ok(self.index.read().scan(range, limit))
    }

    async fn len(&self) -> usize {
        self.index.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::MessageNormalizer;
    use crate::record::RawFrame;
    use crate::state::NormalizerConfig;
    use chrono::{Duration, TimeZone, Utc};

    fn t(secs: i64) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn record(topic: &str, body: &str, secs: i64) -> Arc<NormalizedRecord> {
        let normalizer = MessageNormalizer::new(NormalizerConfig::default());
        Arc::new(normalizer.normalize(RawFrame::at(topic, body.as_bytes().to_vec(), t(secs))))
    }

    #[tokio::test]
    async fn query_returns_earliest_records_up_to_limit() {
        let store = MemoryStore::new();
        for i in 0..80 {
            store
                .append(record("sensor/battery", &format!(r#"{{"value": {}}}"#, i), i))
                .await
                .unwrap();
        }
        // Outside the range and another identifier.
        store
            .append(record("sensor/battery", r#"{"value": -1}"#, -10))
            .await
            .unwrap();
        store
            .append(record("sensor/data", r#"{"rpm": 1}"#, 5))
            .await
            .unwrap();

        let range = TimeRange::new(t(0), t(100)).unwrap();
        let result = store.query("battery", range, 50).await.unwrap();

        assert_eq!(result.len(), 50);
        let values: Vec<f64> = result
            .iter()
            .map(|s| s.record.numeric("value").unwrap())
            .collect();
        let expected: Vec<f64> = (0..50).map(f64::from).collect();
        assert_eq!(values, expected);
        assert!(result
            .windows(2)
            .all(|w| w[0].record.received_at <= w[1].record.received_at));
    }

    #[tokio::test]
    async fn appended_record_is_immediately_visible() {
        let store = MemoryStore::new();
        let stored = store
            .append(record("sensor/data", r#"{"rpm": 300}"#, 0))
            .await
            .unwrap();

        let range = TimeRange::new(t(0), t(0)).unwrap();
        let result = store.query("data", range, 10).await.unwrap();
        assert_eq!(result, vec![stored]);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn repeated_messages_are_not_merged() {
        let store = MemoryStore::new();
        let r = record("sensor/data", r#"{"rpm": 1}"#, 0);
        let a = store.append(Arc::clone(&r)).await.unwrap();
        let b = store.append(r).await.unwrap();

        assert_ne!(a.key, b.key);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn scan_spans_identifiers() {
        let store = MemoryStore::new();
        store.append(record("sensor/a", "{}", 2)).await.unwrap();
        store.append(record("sensor/b", "{}", 1)).await.unwrap();

        let range = TimeRange::new(t(0), t(10)).unwrap();
        let ids: Vec<String> = store
            .scan(range, 10)
            .await
            .unwrap()
            .iter()
            .map(|s| s.record.identifier.clone())
            .collect();
        assert_eq!(ids, vec!["b".to_string(), "a".to_string()]);
    }

    #[tokio::test]
    async fn zero_limit_returns_nothing() {
        let store = MemoryStore::new();
        store.append(record("sensor/a", "{}", 0)).await.unwrap();
        let range = TimeRange::new(t(0), t(1)).unwrap();
        assert!(store.query("a", range, 0).await.unwrap().is_empty());
    }
}
