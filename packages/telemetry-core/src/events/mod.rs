//! Live fan-out of normalized records.
//!
//! This module provides:
//! - [`Broadcaster`]: the subscriber registry and per-record fan-out
//! - [`Subscription`]: one subscriber's ordered, non-replaying record stream
//! - [`Subscriber`]: the public description of a registered subscriber

mod broadcaster;
mod subscription;

pub use broadcaster::Broadcaster;
pub use subscription::Subscription;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Opaque subscriber handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A registered live subscriber.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscriber {
    pub id: SubscriberId,
    pub connected_at: DateTime<Utc>,
}

/// Why a subscriber left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RemovalReason {
    /// The subscriber unsubscribed or dropped its handle.
    Unsubscribed,
    /// The subscriber's queue stayed full past the failure threshold.
    Lagging,
    /// The receiving side was already gone.
    Closed,
}

impl fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unsubscribed => "unsubscribed",
            Self::Lagging => "lagging",
            Self::Closed => "receiver closed",
        };
        f.write_str(s)
    }
}
