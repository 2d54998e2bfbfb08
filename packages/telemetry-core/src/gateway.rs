//! Outbound publish entry point.
//!
//! Every request gets exactly one [`PublishOutcome`]. Nothing is queued: if
//! the session is not live the caller is told so and may retry.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde_json::Value;

use crate::broker::{BrokerConnection, PublishError, Readiness};
use crate::state::GatewayConfig;

/// Result of one publish request.
#[derive(Debug, Clone, PartialEq)]
pub enum PublishOutcome {
    /// The broker acknowledged the message.
    Accepted { topic: String, payload: Value },
    /// The request was malformed; nothing was sent.
    Invalid(String),
    /// The bridge cannot publish right now; nothing was sent.
    Unavailable(String),
    /// The broker (or client) refused this message.
    Rejected(PublishError),
}

pub struct PublishGateway {
    connection: Arc<BrokerConnection>,
    readiness_timeout: Duration,
}

impl PublishGateway {
    pub fn new(connection: Arc<BrokerConnection>, config: &GatewayConfig) -> Self {
        Self {
            connection,
            readiness_timeout: config.readiness_timeout(),
        }
    }

    /// Publishes `message` (serialized as JSON) on `topic`.
    ///
    /// The request is validated first. Before the first successful connect
    /// the call waits for the readiness gate, up to the configured timeout;
    /// once the gate has settled it no longer waits.
    pub async fn submit(&self, topic: Option<String>, message: Option<Value>) -> PublishOutcome {
        let (topic, message) = match validate(topic, message) {
            Ok(request) => request,
            Err(reason) => return PublishOutcome::Invalid(reason),
        };

        match self
            .connection
            .readiness()
            .settled_within(self.readiness_timeout)
            .await
        {
            Readiness::Ready => {}
            Readiness::Pending => {
                log::warn!("[Gateway] Broker not ready, publish to {} refused", topic);
                return PublishOutcome::Unavailable("broker connection not ready".into());
            }
            Readiness::Failed(reason) => {
                return PublishOutcome::Unavailable(format!("broker connection failed: {}", reason));
            }
        }

        if !self.connection.is_connected() {
            log::warn!("[Gateway] Broker disconnected, publish to {} refused", topic);
            return PublishOutcome::Unavailable("broker disconnected".into());
        }

        let payload = match serde_json::to_vec(&message) {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => return PublishOutcome::Invalid(format!("message is not serializable: {}", e)),
        };

        match self.connection.publish(&topic, payload).await {
            Ok(()) => {
                log::debug!("[Gateway] Published to {}", topic);
                PublishOutcome::Accepted {
                    topic,
                    payload: message,
                }
            }
            Err(PublishError::NotConnected) => {
                PublishOutcome::Unavailable("broker disconnected".into())
            }
            Err(e) => {
                log::warn!("[Gateway] Publish to {} failed: {}", topic, e);
                PublishOutcome::Rejected(e)
            }
        }
    }
}

fn validate(topic: Option<String>, message: Option<Value>) -> Result<(String, Value), String> {
    let topic = topic
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| "topic is required".to_string())?;
    let message = message
        .filter(|m| !m.is_null())
        .ok_or_else(|| "message is required".to_string())?;
    Ok((topic, message))
}
