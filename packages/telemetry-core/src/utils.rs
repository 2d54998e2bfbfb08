//! General utilities shared across the bridge.

use chrono::{DateTime, TimeZone, Utc};

// ─────────────────────────────────────────────────────────────────────────────
// Time Utilities
// ─────────────────────────────────────────────────────────────────────────────

/// Epoch values above this are treated as milliseconds, below as seconds.
const EPOCH_MILLIS_THRESHOLD: f64 = 1e11;

/// Interprets a JSON value as a device timestamp.
///
/// Accepts RFC 3339 strings and Unix epochs (seconds or milliseconds, as
/// numbers or numeric strings). Anything else yields `None`.
#[must_use]
pub fn parse_timestamp(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| parse_numeric_str(s).and_then(epoch_to_datetime)),
        serde_json::Value::Number(n) => n.as_f64().and_then(epoch_to_datetime),
        _ => None,
    }
}

fn epoch_to_datetime(epoch: f64) -> Option<DateTime<Utc>> {
    if !epoch.is_finite() || epoch < 0.0 {
        return None;
    }
    let millis = if epoch >= EPOCH_MILLIS_THRESHOLD {
        epoch
    } else {
        epoch * 1000.0
    };
    Utc.timestamp_millis_opt(millis as i64).single()
}

// ─────────────────────────────────────────────────────────────────────────────
// Numeric Parsing
// ─────────────────────────────────────────────────────────────────────────────

/// Parses a numeric string, rejecting empty, NaN and infinite values.
#[must_use]
pub fn parse_numeric_str(s: &str) -> Option<f64> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|n| n.is_finite())
}
