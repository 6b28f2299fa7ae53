//! ==============================================================================
//! main.rs - sensor hub entry point
//! ==============================================================================
//!
//! purpose:
//!     wires the storage core to the outside world:
//!     - load configuration (hub.toml, overridden by the command line)
//!     - open the data directory and restore recent trigger history
//!     - start the periodic flusher
//!     - serve http until ctrl-c, then flush once more and exit
//!
//! sensors report with plain GET requests, e.g. a Shelly action url:
//!
//!     http://10.0.0.1:8080/saveSensorInformation?sensor=LivingRoom&temp=${..}&hum=${..}
//!
//! ==============================================================================

use sensor_hub::callback::CallbackClient;
use sensor_hub::config::HubConfig;
use sensor_hub::server::{self, AppState};
use sensor_hub::{Flusher, Storage};

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Stores and serves sensor readings, room settings and trigger history over HTTP
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// TCP port to listen on (overrides the config file)
    port: Option<u16>,

    /// path to hub.toml (default: config/hub.toml, then ../config/hub.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// data directory (overrides the config file)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// log every request at debug level
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // step 1: load configuration
    let (mut config, origin) = match &cli.config {
        Some(path) => (HubConfig::load(path)?, format!("loaded from {}", path.display())),
        None => HubConfig::load_or_default(),
    };
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(dir) = cli.data_dir {
        config.storage.data_dir = dir;
    }

    // step 2: logging
    let level = if cli.verbose { "debug" } else { config.logging.level.as_str() };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();
    tracing::info!("[CONFIG] {}", origin);
    config.log_summary();

    // step 3: open storage and restore recent trigger history
    let storage = Arc::new(
        Storage::open(&config.storage.data_dir, config.storage.max_trigger_events)
            .context("failed to open data directory")?,
    );
    let restored = storage.triggers().load_from_disk();
    tracing::info!("[STARTUP] restored {} trigger events", restored);

    // step 4: periodic flusher
    let flusher = Arc::new(Flusher::new(Arc::clone(&storage)));
    flusher.start(config.storage.flush_interval());

    // step 5: http transport until ctrl-c
    let callbacks = CallbackClient::new(Arc::clone(&storage), config.callbacks.timeout())?;
    let state = AppState {
        storage: Arc::clone(&storage),
        flusher: Arc::clone(&flusher),
        callbacks,
    };

    let addr = format!("{}:{}", config.server.bind, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("[STARTUP] listening on http://{}", addr);

    let served = server::serve(listener, state, shutdown_signal()).await;
    if let Err(e) = &served {
        tracing::error!("[HTTP] server error: {:#}", e);
    }

    // step 6: final flush
    flusher.stop().await;
    tracing::info!("[SHUTDOWN] data flushed to {}", storage.data_dir().display());
    served
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("[SHUTDOWN] failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("[SHUTDOWN] stop requested");
}
