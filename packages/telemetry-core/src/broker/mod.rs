//! Upstream broker session.
//!
//! [`BrokerConnection`] owns the single session to the broker and runs its
//! reconnect state machine on a background task. The wire client sits behind
//! [`BrokerTransport`]; [`MqttTransport`] is the production implementation.

mod connection;
mod mqtt;
mod readiness;
mod retry;
#[cfg(test)]
pub(crate) mod test_fixtures;
mod transport;

pub use connection::BrokerConnection;
pub use mqtt::MqttTransport;
pub use readiness::{Readiness, ReadinessGate};
pub use retry::Backoff;
pub use transport::{
    validate_publish_topic, BrokerPublisher, BrokerTransport, PublishError, TransportError,
};

use std::fmt;

use serde::Serialize;

/// Lifecycle state of the broker session.
///
/// Written only by the connection task; `Closing` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closing => "closing",
        };
        f.write_str(s)
    }
}
