//! ==============================================================================
//! triggers.rs - capped history of fired trigger callbacks
//! ==============================================================================
//!
//! purpose:
//!     `record` only touches memory. `flush` moves the queued events to the
//!     end of an append log on disk and trims the file back to the cap.
//!     the cap applies to memory and to the file independently, and both
//!     trims drop the oldest events first.
//!
//! on-disk format (trigger_events.jsonl), oldest first:
//!
//!     {"timestamp":"2026-01-01 10:00:00","sensor":"kitchen","type":"high","url":"http://..."}
//!
//! queue layout:
//!
//!     ┌──────────────────────┬──────────────────────────────┐
//!     │ persisted prefix     │ not yet flushed              │
//!     │ (seeded from disk)   │ (appended by `record`)       │
//!     └──────────────────────┴──────────────────────────────┘
//!
//!     the prefix only exists after `load_from_disk`. it is already in the
//!     file, so `flush` does not append it again and `list_all` does not
//!     report it twice.
//!
//! locking:
//!     `queue` guards the deque and is never held across file i/o, except
//!     in `clear` where file and memory must be emptied together.
//!     `flush_lock` serializes flush, clear and list_all, so a listing never
//!     lands between "drained from memory" and "written to disk".
//!
//! ==============================================================================

use crate::domain::{timestamp_now, TriggerEvent, TriggerKind};
use crate::durable;
use crate::error::StoreResult;
use crate::lock;

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Default)]
struct Queue {
    events: VecDeque<TriggerEvent>,
    persisted: usize,
}

impl Queue {
    /// pop from the front until at most `max` remain; 0 means uncapped
    fn trim(&mut self, max: usize) {
        if max == 0 {
            return;
        }
        while self.events.len() > max {
            self.events.pop_front();
            self.persisted = self.persisted.saturating_sub(1);
        }
    }

    fn unflushed(&self) -> impl Iterator<Item = &TriggerEvent> {
        self.events.iter().skip(self.persisted)
    }
}

pub struct TriggerLog {
    path: PathBuf,
    max_events: AtomicUsize,
    queue: Mutex<Queue>,
    flush_lock: Mutex<()>,
}

impl TriggerLog {
    pub fn new(path: impl Into<PathBuf>, max_events: usize) -> Self {
        Self {
            path: path.into(),
            max_events: AtomicUsize::new(max_events),
            queue: Mutex::new(Queue::default()),
            flush_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn max_events(&self) -> usize {
        self.max_events.load(Ordering::Relaxed)
    }

    /// change the cap; memory is trimmed now, the file on the next flush
    pub fn set_max_events(&self, max: usize) {
        self.max_events.store(max, Ordering::Relaxed);
        lock(&self.queue).trim(max);
    }

    /// remember that a callback fired; memory only
    pub fn record(&self, sensor: &str, kind: TriggerKind, url: &str) -> TriggerEvent {
        let mut queue = lock(&self.queue);
        // stamped under the lock so queue order and timestamp order agree
        let event = TriggerEvent {
            timestamp: timestamp_now(),
            sensor: sensor.to_string(),
            kind,
            url: url.to_string(),
        };
        queue.events.push_back(event.clone());
        queue.trim(self.max_events());
        drop(queue);

        tracing::debug!("[TRIGGER] recorded {} {} -> {}", event.sensor, event.kind, event.url);
        event
    }

    /// full history, oldest first: the file, then events not yet flushed
    pub fn list_all(&self) -> Vec<TriggerEvent> {
        let _flushing = lock(&self.flush_lock);

        let mut events = self.load_persisted();
        events.extend(lock(&self.queue).unflushed().cloned());
        events
    }

    /// empty both the file and the queue
    pub fn clear(&self) -> StoreResult<()> {
        let _flushing = lock(&self.flush_lock);
        let mut queue = lock(&self.queue);

        durable::write_atomic(&self.path, b"")?;
        queue.events.clear();
        queue.persisted = 0;
        tracing::info!("[TRIGGER] history cleared");
        Ok(())
    }

    /// seed the queue with the newest persisted events after a restart
    pub fn load_from_disk(&self) -> usize {
        let max = self.max_events();
        let mut recent = self.load_persisted();
        if max > 0 && recent.len() > max {
            recent = recent.split_off(recent.len() - max);
        }
        let seeded = recent.len();

        let mut queue = lock(&self.queue);
        let pending: Vec<TriggerEvent> = queue.unflushed().cloned().collect();
        queue.events = recent.into_iter().chain(pending).collect();
        queue.persisted = seeded;
        queue.trim(max);
        seeded
    }

    /// append queued events to the file, trim it to the cap, drain memory
    ///
    /// returns how many events were appended. if the write fails the
    /// drained events go back to the front of the queue.
    pub fn flush(&self) -> StoreResult<usize> {
        let _flushing = lock(&self.flush_lock);

        let mut queue = lock(&self.queue);
        let persisted = std::mem::take(&mut queue.persisted);
        let pending: Vec<TriggerEvent> = queue.events.drain(..).skip(persisted).collect();
        drop(queue);
        if pending.is_empty() {
            return Ok(0);
        }

        match self.append_and_trim(&pending) {
            Ok(()) => Ok(pending.len()),
            Err(e) => {
                let mut queue = lock(&self.queue);
                for event in pending.into_iter().rev() {
                    queue.events.push_front(event);
                }
                queue.trim(self.max_events());
                Err(e)
            }
        }
    }

    fn append_and_trim(&self, pending: &[TriggerEvent]) -> StoreResult<()> {
        let mut all = self.load_persisted();
        all.extend_from_slice(pending);

        let max = self.max_events();
        let start = if max > 0 { all.len().saturating_sub(max) } else { 0 };

        let mut document = String::new();
        for event in &all[start..] {
            document.push_str(&serde_json::to_string(event)?);
            document.push('\n');
        }
        durable::write_atomic(&self.path, document.as_bytes())
    }

    /// every well-formed line of the log; a missing file is empty
    fn load_persisted(&self) -> Vec<TriggerEvent> {
        let text = match durable::read_or_empty(&self.path) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("[TRIGGER] {} unreadable, treating as empty: {}", self.path.display(), e);
                return Vec::new();
            }
        };

        text.lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<TriggerEvent>(line) {
                Ok(event) => Some(event),
                Err(e) => {
                    tracing::warn!("[TRIGGER] skipping malformed log line: {}", e);
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn log_in(dir: &TempDir, max: usize) -> TriggerLog {
        TriggerLog::new(dir.path().join("trigger_events.jsonl"), max)
    }

    fn urls(events: &[TriggerEvent]) -> Vec<&str> {
        events.iter().map(|e| e.url.as_str()).collect()
    }

    fn seed(log: &TriggerLog, urls: &[&str]) -> Result<(), Box<dyn std::error::Error>> {
        let mut doc = String::new();
        for (i, url) in urls.iter().enumerate() {
            let event = TriggerEvent {
                timestamp: format!("2026-01-01 00:00:0{i}"),
                sensor: "seed".into(),
                kind: TriggerKind::High,
                url: url.to_string(),
            };
            doc.push_str(&serde_json::to_string(&event)?);
            doc.push('\n');
        }
        fs::write(log.path(), doc)?;
        Ok(())
    }

    #[test]
    fn memory_cap_drops_oldest() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        let log = log_in(&dir, 3);

        for url in ["u1", "u2", "u3", "u4"] {
            log.record("kitchen", TriggerKind::High, url);
        }

        assert_eq!(urls(&log.list_all()), vec!["u2", "u3", "u4"]);
        Ok(())
    }

    #[test]
    fn file_cap_counts_old_and_new_entries() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        let log = log_in(&dir, 3);
        seed(&log, &["a", "b", "c"])?;

        log.record("kitchen", TriggerKind::Low, "d");
        assert_eq!(log.flush()?, 1);

        let lines: Vec<TriggerEvent> = fs::read_to_string(log.path())?
            .lines()
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()?;
        assert_eq!(urls(&lines), vec!["b", "c", "d"]);
        assert_eq!(lines[2].kind, TriggerKind::Low);
        Ok(())
    }

    #[test]
    fn listing_puts_disk_before_memory() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        let log = log_in(&dir, 10);

        log.record("a", TriggerKind::High, "first");
        log.flush()?;
        log.record("b", TriggerKind::Low, "second");

        assert_eq!(urls(&log.list_all()), vec!["first", "second"]);
        Ok(())
    }

    #[test]
    fn clear_before_any_flush() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        let log = log_in(&dir, 10);
        log.record("a", TriggerKind::High, "x");

        log.clear()?;
        assert!(log.list_all().is_empty());
        Ok(())
    }

    #[test]
    fn clear_after_flush_empties_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        let log = log_in(&dir, 10);
        log.record("a", TriggerKind::High, "x");
        log.flush()?;
        log.record("a", TriggerKind::High, "y");

        log.clear()?;
        assert!(log.list_all().is_empty());
        assert_eq!(fs::read_to_string(log.path())?, "");
        Ok(())
    }

    #[test]
    fn flush_with_nothing_queued_leaves_file_alone() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        let log = log_in(&dir, 10);
        assert_eq!(log.flush()?, 0);
        assert!(!log.path().exists());
        Ok(())
    }

    #[test]
    fn load_from_disk_keeps_newest_without_duplicating() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        let log = log_in(&dir, 2);
        seed(&log, &["a", "b", "c"])?;

        assert_eq!(log.load_from_disk(), 2);
        assert_eq!(urls(&log.list_all()), vec!["a", "b", "c"]);

        log.record("k", TriggerKind::High, "d");
        assert_eq!(log.flush()?, 1);
        assert_eq!(urls(&log.list_all()), vec!["c", "d"]);
        Ok(())
    }

    #[test]
    fn failed_flush_requeues_in_order() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        let log = log_in(&dir, 10);
        log.record("a", TriggerKind::High, "one");
        log.record("a", TriggerKind::High, "two");

        fs::create_dir(durable::temp_path(log.path()))?;
        assert!(log.flush().is_err());
        assert!(!log.path().exists());
        log.record("a", TriggerKind::High, "three");
        assert_eq!(urls(&log.list_all()), vec!["one", "two", "three"]);

        fs::remove_dir(durable::temp_path(log.path()))?;
        assert_eq!(log.flush()?, 3);
        assert_eq!(urls(&log.list_all()), vec!["one", "two", "three"]);
        Ok(())
    }

    #[test]
    fn malformed_lines_are_skipped() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        let log = log_in(&dir, 10);
        fs::write(
            log.path(),
            "garbage\n{\"timestamp\":\"t\",\"sensor\":\"s\",\"type\":\"low\",\"url\":\"ok\"}\n\n",
        )?;

        assert_eq!(urls(&log.list_all()), vec!["ok"]);
        Ok(())
    }

    #[test]
    fn lowering_the_cap_trims_memory() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        let log = log_in(&dir, 10);
        for url in ["1", "2", "3", "4"] {
            log.record("s", TriggerKind::Low, url);
        }

        log.set_max_events(2);
        assert_eq!(log.max_events(), 2);
        assert_eq!(urls(&log.list_all()), vec!["3", "4"]);
        Ok(())
    }

    #[test]
    fn concurrent_records_under_a_flushing_thread() -> Result<(), Box<dyn std::error::Error>> {
        const WRITERS: usize = 4;
        const PER_WRITER: usize = 50;

        let dir = TempDir::new()?;
        let log = Arc::new(log_in(&dir, 1000));
        let done = Arc::new(AtomicBool::new(false));

        let flusher = {
            let log = Arc::clone(&log);
            let done = Arc::clone(&done);
            std::thread::spawn(move || -> StoreResult<()> {
                while !done.load(Ordering::SeqCst) {
                    log.flush()?;
                    std::thread::yield_now();
                }
                Ok(())
            })
        };

        let writers: Vec<_> = (0..WRITERS)
            .map(|w| {
                let log = Arc::clone(&log);
                std::thread::spawn(move || {
                    for n in 0..PER_WRITER {
                        log.record(&format!("w{w}"), TriggerKind::High, &format!("w{w}-{n}"));
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().expect("writer thread");
        }
        done.store(true, Ordering::SeqCst);
        flusher.join().expect("flusher thread")?;
        log.flush()?;

        let events = log.list_all();
        assert_eq!(events.len(), WRITERS * PER_WRITER);

        // each writer's events appear once, in the order it recorded them
        for w in 0..WRITERS {
            let mine: Vec<String> = events
                .iter()
                .filter(|e| e.sensor == format!("w{w}"))
                .map(|e| e.url.clone())
                .collect();
            let expected: Vec<String> = (0..PER_WRITER).map(|n| format!("w{w}-{n}")).collect();
            assert_eq!(mine, expected);
        }

        // queue order is timestamp order
        assert!(events.windows(2).all(|pair| pair[0].timestamp <= pair[1].timestamp));

        // everything is on disk, in the same order
        let on_disk: Vec<TriggerEvent> = fs::read_to_string(log.path())?
            .lines()
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()?;
        assert_eq!(on_disk, events);
        Ok(())
    }
}
