//! ==============================================================================
//! storage.rs - the three stores behind one handle
//! ==============================================================================
//!
//! purpose:
//!     owns the readings cache, the settings store and the trigger log for a
//!     single data directory, and bundles "make durable what has piled up"
//!     into one `flush` for the flusher and the shutdown path.
//!
//! layout of the data directory:
//!
//!     data/
//!     ├── sensor_data.json        readings.rs
//!     ├── settings.json           settings.rs
//!     └── trigger_events.jsonl    triggers.rs
//!
//! relationships:
//!     - used by: flusher.rs (periodic + final flush)
//!     - used by: server.rs (every request handler)
//!     - used by: callback.rs (records fired triggers)
//!
//! ==============================================================================

use crate::error::{StoreError, StoreResult};
use crate::readings::ReadingsCache;
use crate::settings::SettingsStore;
use crate::triggers::TriggerLog;

use std::path::{Path, PathBuf};

pub const READINGS_FILE: &str = "sensor_data.json";
pub const SETTINGS_FILE: &str = "settings.json";
pub const TRIGGER_LOG_FILE: &str = "trigger_events.jsonl";

/// what one flush wrote
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// sensors in the consolidated readings file afterwards
    pub sensors: usize,
    /// trigger events appended to the log
    pub events: usize,
}

pub struct Storage {
    data_dir: PathBuf,
    readings: ReadingsCache,
    settings: SettingsStore,
    triggers: TriggerLog,
}

impl Storage {
    /// open the stores under `data_dir`, creating the directory if needed
    pub fn open(data_dir: impl Into<PathBuf>, max_trigger_events: usize) -> StoreResult<Self> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir).map_err(|e| StoreError::io(&data_dir, e))?;

        Ok(Self {
            readings: ReadingsCache::new(data_dir.join(READINGS_FILE)),
            settings: SettingsStore::new(data_dir.join(SETTINGS_FILE)),
            triggers: TriggerLog::new(data_dir.join(TRIGGER_LOG_FILE), max_trigger_events),
            data_dir,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn readings(&self) -> &ReadingsCache {
        &self.readings
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn triggers(&self) -> &TriggerLog {
        &self.triggers
    }

    /// flush readings, then drain the trigger queue
    ///
    /// both halves are attempted even if the first fails; the first error
    /// is returned.
    pub fn flush(&self) -> StoreResult<FlushReport> {
        let readings = self.readings.flush();
        let events = self.triggers.flush();

        match (readings, events) {
            (Ok(sensors), Ok(events)) => Ok(FlushReport { sensors, events }),
            (Err(e), _) | (_, Err(e)) => Err(e),
        }
    }
}
