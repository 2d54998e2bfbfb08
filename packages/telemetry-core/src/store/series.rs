//! Reduction of stored records to chart points.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::StoredRecord;
use crate::normalize::SCALAR_FIELD;
use crate::utils::parse_numeric_str;

/// Display names that map to a differently named device field.
const FIELD_ALIASES: &[(&str, &str)] = &[("power", "potencia")];

/// One chart sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub t: DateTime<Utc>,
    pub value: f64,
}

/// Summary of a series.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SeriesStats {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub latest: Option<f64>,
}

impl SeriesStats {
    pub fn of(points: &[SeriesPoint]) -> Self {
        let values = points.iter().map(|p| p.value);
        Self {
            min: values.clone().reduce(f64::min),
            max: values.reduce(f64::max),
            latest: points.last().map(|p| p.value),
        }
    }
}

/// Maps a requested field name to the device field name.
pub fn resolve_field(field: &str) -> &str {
    FIELD_ALIASES
        .iter()
        .find(|(alias, _)| *alias == field)
        .map_or(field, |(_, target)| *target)
}

/// Extracts the chart value of `field` from one record.
///
/// Tries the field itself (derived or extracted), then the generic `value`
/// field, then the raw text of an undecodable payload.
pub fn extract_numeric(stored: &StoredRecord, field: &str) -> Option<f64> {
    let record = &stored.record;
    let key = resolve_field(field);
    record
        .numeric(key)
        .or_else(|| record.numeric(SCALAR_FIELD))
        .or_else(|| record.payload.as_text().and_then(parse_numeric_str))
}

/// Builds the chart points for `field`, skipping records without a value.
pub fn build_series(records: &[StoredRecord], field: &str) -> Vec<SeriesPoint> {
    records
        .iter()
        .filter_map(|stored| {
            extract_numeric(stored, field).map(|value| SeriesPoint {
                t: stored.record.received_at,
                value,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::normalize::MessageNormalizer;
    use crate::record::RawFrame;
    use crate::state::NormalizerConfig;
    use crate::store::RecordKey;

    fn stored(body: &[u8]) -> StoredRecord {
        let normalizer = MessageNormalizer::new(NormalizerConfig::default());
        StoredRecord {
            key: RecordKey(1),
            record: Arc::new(normalizer.normalize(RawFrame::new("sensor/data", body.to_vec()))),
        }
    }

    #[test]
    fn power_resolves_to_potencia() {
        assert_eq!(resolve_field("power"), "potencia");
        assert_eq!(resolve_field("battery"), "battery");

        let r = stored(br#"{"message": {"potencia": "12.5"}}"#);
        assert_eq!(extract_numeric(&r, "power"), Some(12.5));
    }

    #[test]
    fn derived_speed_is_chartable() {
        let r = stored(br#"{"rpm": 100}"#);
        assert!(extract_numeric(&r, "speed").unwrap() > 0.0);
    }

    #[test]
    fn falls_back_to_value_then_raw_text() {
        let r = stored(br#"{"value": 7}"#);
        assert_eq!(extract_numeric(&r, "battery"), Some(7.0));

        let r = stored(b"42.5 ");
        assert_eq!(extract_numeric(&r, "battery"), Some(42.5));

        let r = stored(b"nope");
        assert_eq!(extract_numeric(&r, "battery"), None);
    }

    #[test]
    fn series_skips_non_numeric_records() {
        let records = vec![
            stored(br#"{"battery": 80}"#),
            stored(br#"{"battery": "n/a"}"#),
            stored(br#"{"battery": 79}"#),
        ];
        let points = build_series(&records, "battery");
        let values: Vec<f64> = points.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![80.0, 79.0]);

        let stats = SeriesStats::of(&points);
        assert_eq!(stats.min, Some(79.0));
        assert_eq!(stats.max, Some(80.0));
        assert_eq!(stats.latest, Some(79.0));
    }

    #[test]
    fn empty_series_has_no_stats() {
        assert_eq!(SeriesStats::of(&[]), SeriesStats::default());
    }
}
