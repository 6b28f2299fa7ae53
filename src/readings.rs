//! ==============================================================================
//! readings.rs - write-back cache for the latest reading per sensor
//! ==============================================================================
//!
//! purpose:
//!     requests write into memory only. the flusher later merges the memory
//!     map into one consolidated json document on disk. reads prefer memory
//!     and fall back to the document, which matters right after a restart
//!     when memory is still empty.
//!
//! on-disk format (sensor_data.json):
//!
//!     { "<sensor key>": <payload as stored>, ... }
//!
//!     payloads are embedded verbatim when they are valid json. anything
//!     else is embedded as a json string and handed back unquoted.
//!     a damaged file is read up to the first bad member; flush copies it
//!     to `sensor_data.json.corrupt` before replacing it.
//!
//! locking:
//!     `entries` is held only for map access or to snapshot. disk i/o always
//!     runs outside it. `flush_lock` keeps two flushes from sharing the temp
//!     file.
//!
//! ==============================================================================

use crate::durable;
use crate::error::{StoreError, StoreResult};
use crate::lock;
use crate::sanitize::sanitize;

use serde::de::{Deserializer as _, MapAccess, Visitor};
use serde_json::value::RawValue;
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub struct ReadingsCache {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
    flush_lock: Mutex<()>,
}

impl ReadingsCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: Mutex::new(HashMap::new()),
            flush_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// store the latest payload for a sensor, returning its storage key
    ///
    /// durable only after the next successful `flush`.
    pub fn put(&self, id: &str, payload: impl Into<String>) -> String {
        let key = sanitize(id);
        lock(&self.entries).insert(key.clone(), payload.into());
        tracing::debug!("[READINGS] cached {}", key);
        key
    }

    /// latest payload for a sensor, memory first, then disk
    pub fn get(&self, id: &str) -> Option<String> {
        let key = sanitize(id);
        if let Some(payload) = lock(&self.entries).get(&key) {
            return Some(payload.clone());
        }
        self.load_persisted().remove(&key)
    }

    /// every known sensor; memory wins over disk for the same key
    pub fn list_all(&self) -> BTreeMap<String, String> {
        let mut merged = self.load_persisted();
        merged.extend(self.snapshot());
        merged
    }

    /// `list_all` rendered as the consolidated json document
    pub fn list_all_json(&self) -> StoreResult<String> {
        render_document(&self.list_all())
    }

    /// number of sensors currently held in memory
    pub fn cached_len(&self) -> usize {
        lock(&self.entries).len()
    }

    /// merge memory into the persisted document and replace it atomically
    ///
    /// keys present only on disk are kept. memory is not cleared, so a
    /// failed attempt is retried in full by the next flush. a file that
    /// cannot be read aborts the flush; a damaged one is copied to
    /// `<name>.corrupt` before being replaced by what could be salvaged.
    pub fn flush(&self) -> StoreResult<usize> {
        let _flushing = lock(&self.flush_lock);

        let snapshot = self.snapshot();
        let persisted = self.read_persisted()?;
        if persisted.damaged {
            let aside = corrupt_path(&self.path);
            std::fs::copy(&self.path, &aside).map_err(|e| StoreError::io(&aside, e))?;
            tracing::warn!(
                "[READINGS] {} was damaged; kept a copy at {}, salvaged {} sensors",
                self.path.display(),
                aside.display(),
                persisted.entries.len()
            );
        }

        let mut merged = persisted.entries;
        merged.extend(snapshot);

        let document = render_document(&merged)?;
        durable::write_atomic(&self.path, document.as_bytes())?;
        Ok(merged.len())
    }

    fn snapshot(&self) -> HashMap<String, String> {
        lock(&self.entries).clone()
    }

    /// the persisted document for lookups; an unreadable file counts as empty
    fn load_persisted(&self) -> BTreeMap<String, String> {
        match self.read_persisted() {
            Ok(persisted) => persisted.entries,
            Err(e) => {
                tracing::warn!("[READINGS] {} unreadable, treating as empty: {}", self.path.display(), e);
                BTreeMap::new()
            }
        }
    }

    /// the persisted document as key -> payload text
    ///
    /// a missing file is empty. invalid utf-8 is replaced, and a syntax
    /// error keeps every member parsed before it. both mark the result
    /// as damaged.
    fn read_persisted(&self) -> StoreResult<Persisted> {
        let bytes = durable::read_bytes_or_empty(&self.path)?;
        let text = String::from_utf8_lossy(&bytes);
        let mut damaged = matches!(text, Cow::Owned(_));
        if damaged {
            tracing::warn!("[READINGS] {} contains invalid utf-8", self.path.display());
        }
        if text.trim().is_empty() {
            return Ok(Persisted { entries: BTreeMap::new(), damaged });
        }

        let (entries, error) = parse_salvaging(&text);
        if let Some(e) = error {
            tracing::warn!(
                "[READINGS] {} is malformed after {} sensors: {}",
                self.path.display(),
                entries.len(),
                e
            );
            damaged = true;
        }
        Ok(Persisted { entries, damaged })
    }
}

struct Persisted {
    entries: BTreeMap<String, String>,
    damaged: bool,
}

/// where a damaged readings file is copied before it is replaced
pub fn corrupt_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".corrupt");
    path.with_file_name(name)
}

/// parse a json object member by member, keeping what precedes an error
fn parse_salvaging(text: &str) -> (BTreeMap<String, String>, Option<serde_json::Error>) {
    let mut entries = BTreeMap::new();
    let mut de = serde_json::Deserializer::from_str(text);
    let result = (&mut de)
        .deserialize_map(CollectMembers(&mut entries))
        .and_then(|()| de.end());
    (entries, result.err())
}

struct CollectMembers<'a>(&'a mut BTreeMap<String, String>);

impl<'de, 'a> Visitor<'de> for CollectMembers<'a> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a json object of sensor payloads")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<(), A::Error> {
        while let Some(key) = map.next_key::<String>()? {
            let raw: Box<RawValue> = map.next_value()?;
            self.0.insert(key, payload_from_raw(&raw));
        }
        Ok(())
    }
}

/// render key -> payload as one json object with payloads embedded as-is
pub fn render_document(entries: &BTreeMap<String, String>) -> StoreResult<String> {
    let mut doc = BTreeMap::new();
    for (key, payload) in entries {
        doc.insert(key.as_str(), raw_from_payload(payload)?);
    }
    Ok(serde_json::to_string(&doc)?)
}

fn raw_from_payload(payload: &str) -> StoreResult<Box<RawValue>> {
    match RawValue::from_string(payload.to_string()) {
        Ok(raw) => Ok(raw),
        Err(_) => Ok(RawValue::from_string(serde_json::to_string(payload)?)?),
    }
}

fn payload_from_raw(raw: &RawValue) -> String {
    let text = raw.get();
    if text.starts_with('"') {
        if let Ok(s) = serde_json::from_str::<String>(text) {
            return s;
        }
    }
    text.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    const PAYLOAD: &str = r#"{"timestamp":"t","sensor":"sensor-test","temp":"22.5"}"#;

    fn cache_in(dir: &TempDir) -> ReadingsCache {
        ReadingsCache::new(dir.path().join("sensor_data.json"))
    }

    #[test]
    fn put_then_get_before_flush() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        let cache = cache_in(&dir);

        assert_eq!(cache.put("sensor-test", PAYLOAD), "sensor-test");
        assert_eq!(cache.get("sensor-test").as_deref(), Some(PAYLOAD));
        assert!(!cache.path().exists());
        Ok(())
    }

    #[test]
    fn lookups_are_sanitized() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        let cache = cache_in(&dir);

        cache.put("Living Room!", PAYLOAD);
        assert_eq!(cache.get("LivingRoom").as_deref(), Some(PAYLOAD));
        assert!(cache.get("Bedroom").is_none());
        Ok(())
    }

    #[test]
    fn memory_wins_over_flushed_value() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        let cache = cache_in(&dir);

        cache.put("s1", r#"{"v":"A"}"#);
        cache.flush()?;
        cache.put("s1", r#"{"v":"B"}"#);

        assert_eq!(cache.get("s1").as_deref(), Some(r#"{"v":"B"}"#));
        assert_eq!(cache.list_all().get("s1").map(String::as_str), Some(r#"{"v":"B"}"#));
        Ok(())
    }

    #[test]
    fn fresh_cache_reads_back_flushed_value() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        let first = cache_in(&dir);
        first.put("s1", r#"{"x": 1}"#);
        first.flush()?;

        let restarted = cache_in(&dir);
        assert_eq!(restarted.cached_len(), 0);
        assert_eq!(restarted.get("s1").as_deref(), Some(r#"{"x": 1}"#));
        Ok(())
    }

    #[test]
    fn flush_keeps_keys_only_on_disk() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        let before = cache_in(&dir);
        before.put("old", r#"{"v":1}"#);
        before.flush()?;

        let after = cache_in(&dir);
        after.put("new", r#"{"v":2}"#);
        assert_eq!(after.flush()?, 2);

        let all = cache_in(&dir).list_all();
        assert_eq!(all.len(), 2);
        assert_eq!(all["old"], r#"{"v":1}"#);
        assert_eq!(all["new"], r#"{"v":2}"#);
        Ok(())
    }

    #[test]
    fn listing_merges_memory_and_disk() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        fs::write(dir.path().join("sensor_data.json"), r#"{"a":{"v":1},"b":{"v":2}}"#)?;

        let cache = cache_in(&dir);
        cache.put("b", r#"{"v":20}"#);
        cache.put("c", r#"{"v":3}"#);

        let doc: serde_json::Value = serde_json::from_str(&cache.list_all_json()?)?;
        assert_eq!(doc, serde_json::json!({"a": {"v": 1}, "b": {"v": 20}, "c": {"v": 3}}));
        Ok(())
    }

    #[test]
    fn payload_text_survives_flush_verbatim() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        let cache = cache_in(&dir);
        cache.put("s", r#"{"temp": 22.50, "hum":"40"}"#);
        cache.flush()?;

        let on_disk = fs::read_to_string(cache.path())?;
        assert_eq!(on_disk, r#"{"s":{"temp": 22.50, "hum":"40"}}"#);
        Ok(())
    }

    #[test]
    fn non_json_payload_round_trips_through_disk() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        let cache = cache_in(&dir);
        cache.put("s", "temp=22 \"raw\"");
        cache.flush()?;

        assert_eq!(cache_in(&dir).get("s").as_deref(), Some("temp=22 \"raw\""));
        Ok(())
    }

    #[test]
    fn unparseable_file_reads_as_empty() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        fs::write(dir.path().join("sensor_data.json"), "{ not json")?;

        let cache = cache_in(&dir);
        assert!(cache.get("anything").is_none());
        assert!(cache.list_all().is_empty());

        cache.put("s", r#"{"v":1}"#);
        cache.flush()?;
        assert_eq!(cache_in(&dir).get("s").as_deref(), Some(r#"{"v":1}"#));
        assert_eq!(fs::read_to_string(corrupt_path(cache.path()))?, "{ not json");
        Ok(())
    }

    #[test]
    fn malformed_member_keeps_earlier_entries() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        let original = r#"{"old":{"v":1},"bad":{"v":}}"#;
        fs::write(dir.path().join("sensor_data.json"), original)?;

        let cache = cache_in(&dir);
        assert_eq!(cache.get("old").as_deref(), Some(r#"{"v":1}"#));

        cache.put("new", r#"{"v":2}"#);
        assert_eq!(cache.flush()?, 2);

        let restarted = cache_in(&dir);
        assert_eq!(restarted.get("old").as_deref(), Some(r#"{"v":1}"#));
        assert_eq!(restarted.get("new").as_deref(), Some(r#"{"v":2}"#));
        assert_eq!(fs::read_to_string(corrupt_path(cache.path()))?, original);
        Ok(())
    }

    #[test]
    fn invalid_utf8_does_not_hide_other_sensors() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        let mut original = br#"{"old":{"v":1},"odd":{"s":""#.to_vec();
        original.push(0xFF);
        original.extend_from_slice(br#""}}"#);
        fs::write(dir.path().join("sensor_data.json"), &original)?;

        let cache = cache_in(&dir);
        assert_eq!(cache.get("old").as_deref(), Some(r#"{"v":1}"#));

        cache.put("new", r#"{"v":2}"#);
        assert_eq!(cache.flush()?, 3);

        let restarted = cache_in(&dir);
        assert_eq!(restarted.get("old").as_deref(), Some(r#"{"v":1}"#));
        assert_eq!(restarted.get("new").as_deref(), Some(r#"{"v":2}"#));
        assert!(restarted.get("odd").is_some());
        assert_eq!(fs::read(corrupt_path(cache.path()))?, original);
        Ok(())
    }

    #[test]
    fn unreadable_file_aborts_flush_and_keeps_memory() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        let cache = cache_in(&dir);
        // a directory at the canonical path cannot be read as a file
        fs::create_dir(cache.path())?;

        cache.put("s", r#"{"v":1}"#);
        assert!(matches!(cache.flush(), Err(StoreError::Io { .. })));
        assert!(cache.path().is_dir());
        assert_eq!(cache.get("s").as_deref(), Some(r#"{"v":1}"#));
        Ok(())
    }

    #[test]
    fn failed_flush_leaves_disk_and_memory_alone() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        let cache = cache_in(&dir);
        cache.put("s1", r#"{"v":1}"#);
        cache.flush()?;
        let before = fs::read(cache.path())?;

        cache.put("s2", r#"{"v":2}"#);
        fs::create_dir(durable::temp_path(cache.path()))?;
        assert!(cache.flush().is_err());

        assert_eq!(fs::read(cache.path())?, before);
        assert_eq!(cache.get("s2").as_deref(), Some(r#"{"v":2}"#));

        fs::remove_dir(durable::temp_path(cache.path()))?;
        cache.flush()?;
        assert_eq!(cache_in(&dir).get("s2").as_deref(), Some(r#"{"v":2}"#));
        Ok(())
    }

    #[test]
    fn concurrent_puts_under_a_flushing_thread() -> Result<(), Box<dyn std::error::Error>> {
        const WRITERS: usize = 4;
        const PER_WRITER: usize = 50;

        let dir = TempDir::new()?;
        let cache = Arc::new(cache_in(&dir));
        let done = Arc::new(AtomicBool::new(false));

        let flusher = {
            let cache = Arc::clone(&cache);
            let done = Arc::clone(&done);
            std::thread::spawn(move || -> StoreResult<()> {
                while !done.load(Ordering::SeqCst) {
                    cache.flush()?;
                    std::thread::yield_now();
                }
                Ok(())
            })
        };

        let writers: Vec<_> = (0..WRITERS)
            .map(|w| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for n in 0..PER_WRITER {
                        cache.put(&format!("w{w}-{n}"), format!(r#"{{"n":{n}}}"#));
                        cache.put(&format!("latest-{w}"), format!(r#"{{"n":{n}}}"#));
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().expect("writer thread");
        }
        done.store(true, Ordering::SeqCst);
        flusher.join().expect("flusher thread")?;
        cache.flush()?;

        let on_disk = cache_in(&dir).list_all();
        assert_eq!(on_disk.len(), WRITERS * PER_WRITER + WRITERS);
        for w in 0..WRITERS {
            for n in 0..PER_WRITER {
                assert_eq!(on_disk[&format!("w{w}-{n}")], format!(r#"{{"n":{n}}}"#));
            }
            assert_eq!(on_disk[&format!("latest-{w}")], format!(r#"{{"n":{}}}"#, PER_WRITER - 1));
        }
        Ok(())
    }
}
