//! Fixed protocol and wire constants.
//!
//! Tunable values live in [`crate::state::Config`]; these are the ones other
//! parties depend on (broker semantics, WebSocket envelope, HTTP identity).

// ─────────────────────────────────────────────────────────────────────────────
// Broker Session
// ─────────────────────────────────────────────────────────────────────────────

/// Length of the random suffix appended to the client identifier.
///
/// Each process gets its own identifier so two bridge instances never evict
/// each other's session on the broker.
pub const CLIENT_ID_SUFFIX_LEN: usize = 8;

/// Backoff multiplier between consecutive reconnect attempts.
pub const RECONNECT_BACKOFF_FACTOR: u32 = 2;

// ─────────────────────────────────────────────────────────────────────────────
// WebSocket
// ─────────────────────────────────────────────────────────────────────────────

/// Heartbeat timeout - close connection if no activity for this duration (seconds).
pub const WS_HEARTBEAT_TIMEOUT_SECS: u64 = 90;

/// Interval for checking heartbeat timeout (seconds).
pub const WS_HEARTBEAT_CHECK_INTERVAL_SECS: u64 = 5;

// ─────────────────────────────────────────────────────────────────────────────
// History
// ─────────────────────────────────────────────────────────────────────────────

/// File name of the append-only telemetry log inside the data directory.
pub const TELEMETRY_LOG_FILE: &str = "telemetry.jsonl";

/// Default look-back window for history queries without a start bound (hours).
pub const DEFAULT_QUERY_WINDOW_HOURS: i64 = 6;

// ─────────────────────────────────────────────────────────────────────────────
// Application Identity
// ─────────────────────────────────────────────────────────────────────────────

/// Service identifier reported by the health endpoint.
pub const SERVICE_ID: &str = "telemetry-bridge";
