//! In-memory, time-ordered record index shared by both store backends.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::{RecordKey, StoredRecord, TimeRange};
use crate::record::NormalizedRecord;

/// Ordering key: receive time first, store key to break ties.
type SortKey = (DateTime<Utc>, RecordKey);

pub(super) struct RecordIndex {
    next_key: RecordKey,
    all: BTreeMap<SortKey, StoredRecord>,
    by_identifier: HashMap<String, BTreeMap<SortKey, StoredRecord>>,
}

impl Default for RecordIndex {
    fn default() -> Self {
        Self {
            next_key: RecordKey(1),
            all: BTreeMap::new(),
            by_identifier: HashMap::new(),
        }
    }
}

impl RecordIndex {
    /// Reserves the next key.
    pub(super) fn assign(&mut self, record: Arc<NormalizedRecord>) -> StoredRecord {
        let key = self.next_key;
        self.next_key = key.next();
        StoredRecord { key, record }
    }

    /// Indexes a record, advancing the key counter past its key.
    pub(super) fn insert(&mut self, stored: StoredRecord) {
        if stored.key >= self.next_key {
            self.next_key = stored.key.next();
        }
        let sort_key = (stored.record.received_at, stored.key);
        self.by_identifier
            .entry(stored.record.identifier.clone())
            .or_default()
            .insert(sort_key, stored.clone());
        self.all.insert(sort_key, stored);
    }

    pub(super) fn query(&self, identifier: &str, range: TimeRange, limit: usize) -> Vec<StoredRecord> {
        self.by_identifier
            .get(identifier)
            .map(|records| take_range(records, range, limit))
            .unwrap_or_default()
    }

    pub(super) fn scan(&self, range: TimeRange, limit: usize) -> Vec<StoredRecord> {
        take_range(&self.all, range, limit)
    }

    pub(super) fn len(&self) -> usize {
        self.all.len()
    }
}

fn take_range(
    records: &BTreeMap<SortKey, StoredRecord>,
    range: TimeRange,
    limit: usize,
) -> Vec<StoredRecord> {
    let lower = (range.start, RecordKey(0));
    let upper = (range.end, RecordKey(u64::MAX));
    records
        .range(lower..=upper)
        .take(limit)
        .map(|(_, stored)| stored.clone())
        .collect()
}
