//! Application bootstrap and dependency wiring.
//!
//! This module is the composition root: the single place where the bridge
//! components are instantiated and wired together.

use std::sync::Arc;

use crate::api::WsConnectionManager;
use crate::broker::{BrokerConnection, MqttTransport};
use crate::error::{BridgeError, BridgeResult};
use crate::events::Broadcaster;
use crate::gateway::PublishGateway;
use crate::normalize::MessageNormalizer;
use crate::pipeline::TelemetryPipeline;
use crate::runtime::TokioSpawner;
use crate::state::Config;
use crate::store::{FileStore, MemoryStore, TelemetryStore};

/// Container for all bootstrapped services.
///
/// Consumed by `AppState` to build the HTTP layer's state.
#[derive(Clone)]
pub struct BootstrappedServices {
    /// Upstream broker session.
    pub connection: Arc<BrokerConnection>,
    /// Live fan-out registry.
    pub broadcaster: Broadcaster,
    /// Record history.
    pub store: Arc<dyn TelemetryStore>,
    /// Outbound publish entry point.
    pub gateway: Arc<PublishGateway>,
    /// Frame pipeline feeding the broadcaster and the store.
    pub pipeline: Arc<TelemetryPipeline>,
    /// Manages WebSocket connections.
    pub ws_manager: Arc<WsConnectionManager>,
    /// Validated configuration.
    pub config: Arc<Config>,
    /// Task spawner for background operations.
    pub spawner: TokioSpawner,
}

impl BootstrappedServices {
    /// Initiates graceful shutdown of all services.
    ///
    /// Closes every WebSocket, ends the broker session (state becomes
    /// `Closing`), then waits for the pipeline to hand its remaining records
    /// to the store.
    pub async fn shutdown(&self) {
        log::info!("[Bootstrap] Beginning graceful shutdown...");

        let closed = self.ws_manager.close_all();
        if closed > 0 {
            log::info!("[Bootstrap] Closed {} WebSocket connection(s)", closed);
        }

        self.connection.shutdown().await;
        self.pipeline.finished().await;

        let stats = self.pipeline.stats();
        log::info!(
            "[Bootstrap] Shutdown complete ({} received, {} stored, {} not stored)",
            stats.received,
            stats.stored,
            stats.store_failures + stats.history_dropped
        );
    }
}

/// Opens the configured history store.
///
/// With a data directory the durable log is used, otherwise history lives in
/// memory for the lifetime of the process.
pub async fn open_store(config: &Config) -> BridgeResult<Arc<dyn TelemetryStore>> {
    match &config.store.data_dir {
        Some(dir) => {
            let store = FileStore::open(dir).await.map_err(|e| {
                BridgeError::Configuration(format!(
                    "Failed to open telemetry log in {}: {}",
                    dir.display(),
                    e
                ))
            })?;
            Ok(Arc::new(store))
        }
        None => {
            log::info!("[Bootstrap] No data directory configured - history will not persist");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Bootstraps all bridge services with their dependencies.
///
/// Services are created in dependency order:
///
/// 1. History store
/// 2. Broker session (starts connecting immediately)
/// 3. Broadcaster and normalizer
/// 4. Pipeline (sole consumer of the session's frames)
/// 5. Publish gateway and WebSocket manager
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the store cannot be
/// opened.
pub async fn bootstrap_services(
    config: Config,
    handle: tokio::runtime::Handle,
) -> BridgeResult<BootstrappedServices> {
    config.validate()?;
    let config = Arc::new(config);
    let spawner = TokioSpawner::new(handle);

    let store = open_store(&config).await?;

    let transport = MqttTransport::new(&config.broker, config.gateway.publish_timeout());
    let connection = Arc::new(BrokerConnection::start(
        transport,
        &config.broker,
        config.broker.frame_buffer,
        &spawner,
    ));

    let frames = connection
        .take_frames()
        .ok_or_else(|| BridgeError::Internal("broker frames already taken".into()))?;

    let broadcaster = Broadcaster::new(config.broadcast.clone());
    let normalizer = Arc::new(MessageNormalizer::new(config.normalizer.clone()));

    let pipeline = Arc::new(TelemetryPipeline::start(
        frames,
        normalizer,
        broadcaster.clone(),
        Arc::clone(&store),
        config.store.writer_buffer,
        &spawner,
    ));

    let gateway = Arc::new(PublishGateway::new(Arc::clone(&connection), &config.gateway));
    let ws_manager = Arc::new(WsConnectionManager::new());

    log::info!(
        "[Bootstrap] Bridge wired: broker {}:{}, topics {:?}",
        config.broker.host,
        config.broker.port,
        config.broker.topics
    );

    Ok(BootstrappedServices {
        connection,
        broadcaster,
        store,
        gateway,
        pipeline,
        ws_manager,
        config,
        spawner,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn invalid_config_is_rejected_before_anything_starts() {
        let mut config = Config::default();
        config.broker.topics.clear();

        let result = bootstrap_services(config, tokio::runtime::Handle::current()).await;
        let err = result.err().unwrap();
        assert_eq!(err.code(), "configuration_error");
    }

    #[tokio::test]
    async fn store_follows_data_dir() {
        let config = Config::default();
        let store = open_store(&config).await.unwrap();
        assert_eq!(store.len().await, 0);

        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.store.data_dir = Some(temp_dir.path().join("history"));
        open_store(&config).await.unwrap();
        assert!(temp_dir.path().join("history").is_dir());
    }
}
