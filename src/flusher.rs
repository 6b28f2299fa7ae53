//! ==============================================================================
//! flusher.rs - background task that makes the stores durable
//! ==============================================================================
//!
//! purpose:
//!     requests never wait on disk for readings or trigger events. this task
//!     wakes every `interval`, runs `Storage::flush` on the blocking pool, and
//!     flushes one last time when asked to stop.
//!
//! lifecycle:
//!
//!     start(interval) ──► ┌────────────────────────────┐
//!                         │ loop                       │
//!                         │   select! {                │
//!                         │     tick  => flush         │
//!                         │     stop  => break         │
//!                         │   }                        │
//!                         └─────────────┬──────────────┘
//!     stop().await ─────────────────────┴──► final flush ──► returns
//!
//!     start on a running flusher and stop on a stopped one do nothing.
//!
//! ==============================================================================

use crate::error::{StoreError, StoreResult};
use crate::lock;
use crate::storage::{FlushReport, Storage};

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// shortest interval accepted by `start`
pub const MIN_INTERVAL: Duration = Duration::from_millis(10);

struct Running {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

pub struct Flusher {
    storage: Arc<Storage>,
    running: Mutex<Option<Running>>,
}

impl Flusher {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            running: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.running).is_some()
    }

    /// spawn the periodic task on the current tokio runtime
    ///
    /// returns false if it was already running. must be called from inside
    /// a runtime.
    pub fn start(&self, interval: Duration) -> bool {
        let mut running = lock(&self.running);
        if running.is_some() {
            return false;
        }

        let interval = interval.max(MIN_INTERVAL);
        let (stop, stop_rx) = oneshot::channel();
        let task = tokio::spawn(run(Arc::clone(&self.storage), interval, stop_rx));
        *running = Some(Running { stop, task });

        tracing::info!("[FLUSH] periodic flush every {:?}", interval);
        true
    }

    /// stop the task and wait for its final flush
    ///
    /// returns false if it was not running.
    pub async fn stop(&self) -> bool {
        let Some(running) = lock(&self.running).take() else {
            return false;
        };

        let _ = running.stop.send(());
        if let Err(e) = running.task.await {
            tracing::error!("[FLUSH] flusher task failed: {}", e);
        }
        true
    }

    /// flush immediately, outside the schedule
    pub async fn flush_now(&self) -> StoreResult<FlushReport> {
        flush_blocking(Arc::clone(&self.storage)).await
    }
}

async fn run(storage: Arc<Storage>, interval: Duration, mut stop: oneshot::Receiver<()>) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                log_outcome("periodic", flush_blocking(Arc::clone(&storage)).await);
            }
            _ = &mut stop => break,
        }
    }

    log_outcome("final", flush_blocking(storage).await);
}

async fn flush_blocking(storage: Arc<Storage>) -> StoreResult<FlushReport> {
    match tokio::task::spawn_blocking(move || storage.flush()).await {
        Ok(result) => result,
        Err(e) => Err(StoreError::Task(e.to_string())),
    }
}

fn log_outcome(kind: &str, result: StoreResult<FlushReport>) {
    match result {
        Ok(report) => tracing::debug!(
            "[FLUSH] {} flush: {} sensors on disk, {} events appended",
            kind,
            report.sensors,
            report.events
        ),
        Err(e) => tracing::warn!("[FLUSH] {} flush failed, will retry: {}", kind, e),
    }
}
