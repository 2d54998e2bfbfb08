//! Telemetry Server - standalone headless runner for the telemetry bridge.
//!
//! Connects to the configured MQTT broker, serves live telemetry over
//! WebSocket, and exposes history, publish and probe endpoints over HTTP.

mod config;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use telemetry_core::{bootstrap_services, start_server, AppState};
use tokio::signal;

use crate::config::ServerConfig;

/// Telemetry Server - MQTT to WebSocket telemetry bridge.
#[derive(Parser, Debug)]
#[command(name = "telemetry-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE", env = "TELEMETRY_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "TELEMETRY_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long, env = "TELEMETRY_BIND_PORT")]
    port: Option<u16>,

    /// Data directory for the durable telemetry log.
    #[arg(short = 'd', long, env = "TELEMETRY_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Telemetry Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(port) = args.port {
        config.set_bind_port(port);
    }
    if let Some(data_dir) = args.data_dir {
        config.set_data_dir(data_dir);
    }

    let core_config = config.into_core_config();
    log::info!(
        "Configuration: bind_port={}, broker={}:{}, data_dir={}",
        core_config.bind_port,
        core_config.broker.host,
        core_config.broker.port,
        core_config
            .store
            .data_dir
            .as_ref()
            .map_or_else(|| "(memory)".to_string(), |d| d.display().to_string())
    );

    let handle = tokio::runtime::Handle::current();
    let services = bootstrap_services(core_config, handle)
        .await
        .context("Failed to bootstrap services")?;

    log::info!("Services bootstrapped successfully");

    let app_state = AppState::new(&services);
    let bind_port = services.config.bind_port;

    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(app_state).await {
            log::error!("Server error: {}", e);
        }
    });

    log::info!("HTTP server started on port {}", bind_port);

    // Wait for shutdown signal
    shutdown_signal().await;

    log::info!("Shutdown signal received, cleaning up...");

    // Graceful shutdown
    services.shutdown().await;

    // WebSockets are already closed; stop accepting new requests
    server_handle.abort();

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
