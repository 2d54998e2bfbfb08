//! HTTP/WebSocket API layer.
//!
//! This module contains thin handlers that delegate to the bridge components.
//! It provides the router construction and server startup functionality.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;

use crate::bootstrap::BootstrappedServices;
use crate::broker::BrokerConnection;
use crate::events::Broadcaster;
use crate::gateway::PublishGateway;
use crate::pipeline::TelemetryPipeline;
use crate::state::Config;
use crate::store::TelemetryStore;

pub mod http;
pub mod response;
pub mod ws;
pub mod ws_connection;

pub use ws_connection::WsConnectionManager;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to a TCP port.
    #[error("Failed to bind to port: {0}")]
    Bind(#[from] std::io::Error),
}

/// Shared application state for the API layer.
///
/// Holds references to the bridge components; all behavior lives in them.
#[derive(Clone)]
pub struct AppState {
    /// Upstream broker session.
    pub connection: Arc<BrokerConnection>,
    /// Live fan-out registry.
    pub broadcaster: Broadcaster,
    /// Record history.
    pub store: Arc<dyn TelemetryStore>,
    /// Outbound publish entry point.
    pub gateway: Arc<PublishGateway>,
    /// Frame pipeline (for counters).
    pub pipeline: Arc<TelemetryPipeline>,
    /// Manages WebSocket connections.
    pub ws_manager: Arc<WsConnectionManager>,
    /// Application configuration.
    pub config: Arc<Config>,
}

/// Builder for constructing an `AppState`.
#[derive(Default)]
pub struct AppStateBuilder {
    connection: Option<Arc<BrokerConnection>>,
    broadcaster: Option<Broadcaster>,
    store: Option<Arc<dyn TelemetryStore>>,
    gateway: Option<Arc<PublishGateway>>,
    pipeline: Option<Arc<TelemetryPipeline>>,
    ws_manager: Option<Arc<WsConnectionManager>>,
    config: Option<Arc<Config>>,
}

impl AppStateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection(mut self, connection: Arc<BrokerConnection>) -> Self {
        self.connection = Some(connection);
        self
    }

    pub fn broadcaster(mut self, broadcaster: Broadcaster) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    pub fn store(mut self, store: Arc<dyn TelemetryStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn gateway(mut self, gateway: Arc<PublishGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn pipeline(mut self, pipeline: Arc<TelemetryPipeline>) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn ws_manager(mut self, manager: Arc<WsConnectionManager>) -> Self {
        self.ws_manager = Some(manager);
        self
    }

    pub fn config(mut self, config: Arc<Config>) -> Self {
        self.config = Some(config);
        self
    }

    /// Builds the `AppState`, panicking if required fields are missing.
    pub fn build(self) -> AppState {
        AppState {
            connection: self.connection.expect("connection is required"),
            broadcaster: self.broadcaster.expect("broadcaster is required"),
            store: self.store.expect("store is required"),
            gateway: self.gateway.expect("gateway is required"),
            pipeline: self.pipeline.expect("pipeline is required"),
            ws_manager: self.ws_manager.expect("ws_manager is required"),
            config: self.config.expect("config is required"),
        }
    }
}

impl AppState {
    /// Creates a new builder for constructing an `AppState`.
    pub fn builder() -> AppStateBuilder {
        AppStateBuilder::new()
    }

    /// Builds the state from bootstrapped services.
    pub fn new(services: &BootstrappedServices) -> Self {
        Self::builder()
            .connection(Arc::clone(&services.connection))
            .broadcaster(services.broadcaster.clone())
            .store(Arc::clone(&services.store))
            .gateway(Arc::clone(&services.gateway))
            .pipeline(Arc::clone(&services.pipeline))
            .ws_manager(Arc::clone(&services.ws_manager))
            .config(Arc::clone(&services.config))
            .build()
    }
}

/// Starts the HTTP server on the configured port.
pub async fn start_server(state: AppState) -> Result<(), ServerError> {
    let port = state.config.bind_port;
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    log::info!("Server listening on http://0.0.0.0:{}", port);
    let app = http::create_router(state);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
