//! ==============================================================================
//! sensor-hub - storage core and transport for a small sensor hub
//! ==============================================================================
//!
//! purpose:
//!     keeps the latest reading per sensor, per-room settings (desired value
//!     plus "high"/"low" callback urls) and a capped log of fired callbacks.
//!
//! architecture:
//!
//!     ┌──────────────┐   ┌──────────────┐
//!     │  server.rs   │   │ callback.rs  │   http in / http out
//!     └──────┬───────┘   └──────┬───────┘
//!            └────────┬─────────┘
//!               ┌─────┴──────┐        ┌─────────────┐
//!               │ storage.rs │ ◄───── │ flusher.rs  │  periodic + final flush
//!               └─────┬──────┘        └─────────────┘
//!        ┌────────────┼─────────────┐
//!   readings.rs   settings.rs   triggers.rs
//!        └────────────┼─────────────┘
//!             durable.rs + sanitize.rs
//!
//! ==============================================================================

pub mod callback;
pub mod config;
pub mod domain;
pub mod durable;
pub mod error;
pub mod flusher;
pub mod readings;
pub mod sanitize;
pub mod server;
pub mod settings;
pub mod storage;
pub mod triggers;

pub use domain::{RoomSettings, TriggerEvent, TriggerKind};
pub use error::{StoreError, StoreResult};
pub use flusher::Flusher;
pub use sanitize::sanitize;
pub use storage::{FlushReport, Storage};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// lock a mutex, carrying on with the data if a holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
