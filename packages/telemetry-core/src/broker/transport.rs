//! Trait abstractions over the broker wire client.
//!
//! [`BrokerConnection`](super::BrokerConnection) drives a [`BrokerTransport`]
//! and never touches the MQTT client directly, so the reconnect state machine
//! can be exercised without a broker.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::record::RawFrame;

/// Failures of the upstream session itself.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Broker unreachable or the connection dropped.
    #[error("Broker I/O error: {0}")]
    Io(String),

    /// Connect or keep-alive timed out.
    #[error("Broker timeout: {0}")]
    Timeout(String),

    /// Credentials rejected.
    #[error("Not authorized: {0}")]
    Unauthorized(String),

    /// Connect refused for a reason other than credentials.
    #[error("Connection refused: {0}")]
    Refused(String),

    /// Broker closed the session.
    #[error("Session closed by broker")]
    Closed,

    /// Broker rejected a topic subscription.
    #[error("Subscription to '{0}' rejected")]
    Subscribe(String),
}

impl TransportError {
    /// Authentication/authorization failures are not retried before the
    /// first successful connect.
    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}

/// Failure of one outbound publish.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PublishError {
    /// Topic is empty, contains wildcards or is otherwise not publishable.
    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    /// Broker or client refused the message (e.g. request queue full).
    #[error("Publish rejected: {0}")]
    Rejected(String),

    /// No live session to publish on.
    #[error("Not connected to broker")]
    NotConnected,

    /// Session dropped before the broker acknowledged the message.
    #[error("Connection lost before acknowledgment")]
    ConnectionLost,

    /// Broker did not acknowledge in time.
    #[error("No acknowledgment within {0:?}")]
    Timeout(Duration),
}

/// The session half of a broker client, owned by the connection task.
#[async_trait]
pub trait BrokerTransport: Send {
    /// Opens a session and waits for the broker to acknowledge it.
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Subscribes to one topic (at-least-once) and waits for the acknowledgment.
    async fn subscribe(&mut self, topic: &str) -> Result<(), TransportError>;

    /// Waits for the next inbound message. An error means the session is gone.
    async fn recv(&mut self) -> Result<RawFrame, TransportError>;

    /// Closes the session (best-effort) and drops any unsent requests.
    async fn disconnect(&mut self);

    /// Returns the publish half, usable concurrently from any task.
    fn publisher(&self) -> Arc<dyn BrokerPublisher>;
}

/// The publish half of a broker client.
#[async_trait]
pub trait BrokerPublisher: Send + Sync {
    /// Publishes one message at-least-once and waits for the acknowledgment.
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), PublishError>;
}

/// Checks that a topic can be published to.
pub fn validate_publish_topic(topic: &str) -> Result<(), PublishError> {
    if topic.is_empty() {
        return Err(PublishError::InvalidTopic("topic is empty".into()));
    }
    if topic.contains(['+', '#']) {
        return Err(PublishError::InvalidTopic(format!(
            "'{}' contains wildcard characters",
            topic
        )));
    }
    if topic.contains('\0') {
        return Err(PublishError::InvalidTopic("topic contains NUL".into()));
    }
    if topic.len() > u16::MAX as usize {
        return Err(PublishError::InvalidTopic("topic is too long".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unauthorized_is_auth() {
        assert!(TransportError::Unauthorized("x".into()).is_auth());
        assert!(!TransportError::Refused("x".into()).is_auth());
        assert!(!TransportError::Io("x".into()).is_auth());
        assert!(!TransportError::Closed.is_auth());
    }

    #[test]
    fn publish_topic_validation() {
        assert!(validate_publish_topic("sensor/cmd").is_ok());
        assert!(validate_publish_topic("").is_err());
        assert!(validate_publish_topic("sensor/+").is_err());
        assert!(validate_publish_topic("sensor/#").is_err());
        assert!(validate_publish_topic("a\0b").is_err());
    }
}
