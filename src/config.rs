//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `hub.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - ServerConfig: where the http transport listens.
//!     - StorageConfig: data directory, flush interval, trigger log cap.
//!     - CallbackConfig: timeout for outbound trigger requests.
//!     - LoggingConfig: default log level when RUST_LOG is unset.
//!
//!     every section and field is optional; missing values take defaults.
//!
//! ==============================================================================

use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct HubConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub callbacks: CallbackConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub flush_interval_seconds: u64,
    pub max_trigger_events: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CallbackConfig {
    pub timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: "0.0.0.0".to_string(), port: 8080 }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            flush_interval_seconds: 5,
            max_trigger_events: 100,
        }
    }
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self { timeout_seconds: 5 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

impl StorageConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_seconds.max(1))
    }
}

impl CallbackConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.max(1))
    }
}

impl HubConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// Load with default fallback
    ///
    /// returns the config plus a note on where it came from, since logging
    /// is not initialized yet when this runs.
    pub fn load_or_default() -> (Self, String) {
        let paths = [
            PathBuf::from("config").join("hub.toml"),
            PathBuf::from("..").join("config").join("hub.toml"),
        ];

        let mut skipped = Vec::new();
        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => return (config, format!("loaded from {}", path.display())),
                    Err(e) => skipped.push(format!("{:#}", e)),
                }
            }
        }

        if skipped.is_empty() {
            (Self::default(), "no config file found - using defaults".to_string())
        } else {
            (Self::default(), format!("{} - using defaults", skipped.join("; ")))
        }
    }

    /// Log configuration summary
    pub fn log_summary(&self) {
        tracing::info!("[CONFIG] listen: {}:{}", self.server.bind, self.server.port);
        tracing::info!("[CONFIG] data dir: {}", self.storage.data_dir.display());
        tracing::info!("[CONFIG] flush interval: {}s", self.storage.flush_interval().as_secs());
        tracing::info!("[CONFIG] max trigger events: {}", self.storage.max_trigger_events);
        tracing::info!("[CONFIG] callback timeout: {}s", self.callbacks.timeout().as_secs());
    }
}
