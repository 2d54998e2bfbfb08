//! Telemetry Core - real-time bridge between an MQTT broker and live clients.
//!
//! The bridge keeps one resilient session to an upstream broker, normalizes
//! every device message into a canonical record, fans records out to live
//! subscribers, appends them to a queryable history, and publishes client
//! messages back to the broker.
//!
//! # Architecture
//!
//! - [`broker`]: the broker session (reconnect loop, readiness gate, publish)
//! - [`normalize`]: raw payload parsing and derived fields
//! - [`events`]: live fan-out to subscribers
//! - [`store`]: append-only history and chart series
//! - [`gateway`]: validated outbound publishing
//! - [`pipeline`]: wiring from inbound frames to fan-out and history
//! - [`api`]: HTTP and WebSocket surface
//! - [`bootstrap`]: composition root
//! - [`state`]: configuration
//! - [`error`]: centralized error types
//!
//! # Abstraction Traits
//!
//! - [`TaskSpawner`](runtime::TaskSpawner): spawning background tasks
//! - [`BrokerTransport`](broker::BrokerTransport) and
//!   [`BrokerPublisher`](broker::BrokerPublisher): the MQTT client seam
//! - [`TelemetryStore`](store::TelemetryStore): history persistence

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod bootstrap;
pub mod broker;
pub mod error;
pub mod events;
pub mod gateway;
pub mod normalize;
pub mod pipeline;
pub mod protocol_constants;
pub mod record;
pub mod runtime;
pub mod state;
pub mod store;
pub mod utils;

// Re-export commonly used types at the crate root
pub use error::{BridgeError, BridgeResult, ErrorCode};
pub use record::{FieldValue, NormalizedRecord, Payload, RawFrame};
pub use runtime::{TaskSpawner, TokioSpawner};
pub use state::{
    BroadcastConfig, BrokerConfig, Config, ConfigError, GatewayConfig, NormalizerConfig,
    StoreConfig,
};

// Re-export component types
pub use broker::{BrokerConnection, ConnectionState, Readiness};
pub use events::{Broadcaster, Subscriber, SubscriberId, Subscription};
pub use gateway::{PublishGateway, PublishOutcome};
pub use normalize::MessageNormalizer;
pub use pipeline::{PipelineSnapshot, TelemetryPipeline};
pub use store::{FileStore, MemoryStore, StoredRecord, TelemetryStore, TimeRange};

// Re-export bootstrap types
pub use bootstrap::{bootstrap_services, BootstrappedServices};

// Re-export API types
pub use api::{start_server, AppState, ServerError, WsConnectionManager};
