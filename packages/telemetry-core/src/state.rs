//! Bridge configuration types.
//!
//! [`Config`] groups one section per component. Every section deserializes
//! with defaults so a partial YAML file (or none at all) yields a runnable
//! configuration; [`Config::validate`] rejects values that would break the
//! bridge at runtime.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol_constants::CLIENT_ID_SUFFIX_LEN;

/// A configuration value that would cause runtime issues.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid configuration: {0}")]
pub struct ConfigError(pub String);

/// Upstream broker session settings.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct BrokerConfig {
    /// Broker host name or IP.
    pub host: String,
    /// Broker TCP port.
    pub port: u16,
    /// Username for broker authentication.
    pub username: Option<String>,
    /// Password for broker authentication.
    pub password: Option<String>,
    /// Prefix of the client identifier; a random suffix is appended per process.
    pub client_id_prefix: String,
    /// Keep-alive interval (seconds).
    pub keep_alive_secs: u64,
    /// Topics to subscribe to on every successful connect.
    pub topics: Vec<String>,
    /// First reconnect delay (milliseconds).
    pub reconnect_initial_ms: u64,
    /// Upper bound for the reconnect delay (milliseconds).
    pub reconnect_max_ms: u64,
    /// Time allowed for a single connect+subscribe attempt (seconds).
    pub connect_timeout_secs: u64,
    /// Capacity of the outbound request queue towards the MQTT event loop.
    pub request_capacity: usize,
    /// Inbound frames buffered between the session and the pipeline.
    pub frame_buffer: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            username: None,
            password: None,
            client_id_prefix: "telemetry_bridge_".to_string(),
            keep_alive_secs: 60,
            topics: vec!["sensor/data".to_string()],
            reconnect_initial_ms: 1000,
            reconnect_max_ms: 30_000,
            connect_timeout_secs: 10,
            request_capacity: 64,
            frame_buffer: 1024,
        }
    }
}

impl BrokerConfig {
    /// Builds a client identifier unique to this process.
    #[must_use]
    pub fn unique_client_id(&self) -> String {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("{}{}", self.client_id_prefix, &suffix[..CLIENT_ID_SUFFIX_LEN])
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Payload parsing and derived-field settings.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Key under which some devices nest their actual fields.
    pub wrapper_key: String,
    /// Wheel radius in meters, used by the speed formula.
    pub wheel_radius_m: f64,
    /// Field carrying the rotational rate (revolutions per minute).
    pub rotational_rate_field: String,
    /// Payload keys that may carry an explicit identifier, in priority order.
    pub identifier_keys: Vec<String>,
    /// Payload keys that may carry a device timestamp, in priority order.
    pub timestamp_keys: Vec<String>,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            wrapper_key: "message".to_string(),
            wheel_radius_m: 0.3,
            rotational_rate_field: "rpm".to_string(),
            identifier_keys: vec![
                "identifier".to_string(),
                "sensorId".to_string(),
                "deviceId".to_string(),
            ],
            timestamp_keys: vec!["timestamp".to_string(), "ts".to_string()],
        }
    }
}

/// Live fan-out settings.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Per-subscriber queue depth.
    pub subscriber_buffer: usize,
    /// Consecutive failed deliveries tolerated before a subscriber is evicted.
    ///
    /// 0 evicts on the first message the subscriber cannot accept.
    pub max_send_failures: u32,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: 256,
            max_send_failures: 0,
        }
    }
}

/// History store settings.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory for the durable telemetry log. `None` keeps history in memory.
    pub data_dir: Option<PathBuf>,
    /// Records buffered between the pipeline and the store writer.
    pub writer_buffer: usize,
    /// Limit applied to queries that don't specify one.
    pub default_query_limit: usize,
    /// Hard cap on any query limit.
    pub max_query_limit: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            writer_buffer: 1024,
            default_query_limit: 300,
            max_query_limit: 5000,
        }
    }
}

/// Publish gateway settings.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct GatewayConfig {
    /// How long a publish waits for the first successful connect (milliseconds).
    pub readiness_timeout_ms: u64,
    /// How long a publish waits for the broker acknowledgment (milliseconds).
    pub publish_timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            readiness_timeout_ms: 10_000,
            publish_timeout_ms: 5_000,
        }
    }
}

impl GatewayConfig {
    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_millis(self.readiness_timeout_ms)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}

/// Configuration for the telemetry bridge.
///
/// All fields have sensible defaults.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    /// Port for the HTTP/WS server.
    pub bind_port: u16,
    pub broker: BrokerConfig,
    pub normalizer: NormalizerConfig,
    pub broadcast: BroadcastConfig,
    pub store: StoreConfig,
    pub gateway: GatewayConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_port: 3000,
            broker: BrokerConfig::default(),
            normalizer: NormalizerConfig::default(),
            broadcast: BroadcastConfig::default(),
            store: StoreConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }
}

impl Config {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let err = |msg: &str| Err(ConfigError(msg.to_string()));

        if self.bind_port == 0 {
            return err("bind_port must be >= 1");
        }
        if self.broker.host.trim().is_empty() {
            return err("broker.host must not be empty");
        }
        if self.broker.port == 0 {
            return err("broker.port must be >= 1");
        }
        if self.broker.topics.is_empty() || self.broker.topics.iter().any(|t| t.is_empty()) {
            return err("broker.topics must contain at least one non-empty topic");
        }
        if self.broker.reconnect_initial_ms == 0 {
            return err("broker.reconnect_initial_ms must be >= 1");
        }
        if self.broker.reconnect_initial_ms > self.broker.reconnect_max_ms {
            return err("broker.reconnect_initial_ms must not exceed broker.reconnect_max_ms");
        }
        if self.broker.request_capacity == 0 {
            return err("broker.request_capacity must be >= 1");
        }
        if self.broker.frame_buffer == 0 {
            return err("broker.frame_buffer must be >= 1");
        }
        if !(self.normalizer.wheel_radius_m.is_finite() && self.normalizer.wheel_radius_m > 0.0) {
            return err("normalizer.wheel_radius_m must be a positive number");
        }
        if self.broadcast.subscriber_buffer == 0 {
            return err("broadcast.subscriber_buffer must be >= 1");
        }
        if self.store.writer_buffer == 0 {
            return err("store.writer_buffer must be >= 1");
        }
        if self.store.default_query_limit == 0
            || self.store.default_query_limit > self.store.max_query_limit
        {
            return err("store.default_query_limit must be in 1..=store.max_query_limit");
        }
        Ok(())
    }
}
