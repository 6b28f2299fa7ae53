//! ==============================================================================
//! settings.rs - per-room set-point and trigger urls
//! ==============================================================================
//!
//! purpose:
//!     one json document holds every room. each mutation reloads it, edits
//!     one room and rewrites the whole file atomically, so the file is always
//!     a coherent snapshot. nothing is cached between calls.
//!
//! on-disk format (settings.json):
//!
//!     { "<room key>": { "desired": 21.5 | null, "high": "<url>", "low": "<url>" }, ... }
//!
//!     entries that do not have this shape are skipped on load.
//!
//! locking:
//!     mutations hold `write_lock` across load-modify-write, so two updates
//!     to the same room cannot interleave and lose a field.
//!
//! ==============================================================================

use crate::domain::{RoomSettings, SettingsRecord, TriggerKind};
use crate::durable;
use crate::error::StoreResult;
use crate::lock;
use crate::sanitize::sanitize;

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// what `get_all` returns when there is no settings file yet
pub const EMPTY_DOCUMENT: &str = "{}";

pub struct SettingsStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// set the desired value, keeping the room's trigger urls
    pub fn set_desired(&self, room: &str, value: f64) -> StoreResult<()> {
        self.update(room, |record| record.desired = Some(value))
    }

    /// set exactly one of the room's trigger urls
    pub fn set_trigger(&self, room: &str, kind: TriggerKind, url: &str) -> StoreResult<()> {
        self.update(room, |record| *record.url_mut(kind) = url.to_string())
    }

    /// remove a room; returns whether it existed
    pub fn delete(&self, room: &str) -> StoreResult<bool> {
        let key = sanitize(room);
        let _writing = lock(&self.write_lock);

        let mut rooms = self.load();
        if rooms.remove(&key).is_none() {
            return Ok(false);
        }
        self.save(&rooms)?;
        tracing::debug!("[SETTINGS] deleted {}", key);
        Ok(true)
    }

    pub fn get(&self, room: &str) -> Option<RoomSettings> {
        let key = sanitize(room);
        self.load().remove(&key).map(|record| record.into_room(&key))
    }

    /// the settings document verbatim, or `{}` if there is none
    pub fn get_all(&self) -> String {
        match durable::read_or_empty(&self.path) {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => EMPTY_DOCUMENT.to_string(),
            Err(e) => {
                tracing::warn!("[SETTINGS] {} unreadable: {}", self.path.display(), e);
                EMPTY_DOCUMENT.to_string()
            }
        }
    }

    /// room -> url for every room with a non-empty url of `kind`
    pub fn get_all_trigger_urls(&self, kind: TriggerKind) -> BTreeMap<String, String> {
        self.load()
            .into_iter()
            .filter_map(|(room, mut record)| {
                let url = std::mem::take(record.url_mut(kind));
                (!url.is_empty()).then_some((room, url))
            })
            .collect()
    }

    fn update(&self, room: &str, edit: impl FnOnce(&mut SettingsRecord)) -> StoreResult<()> {
        let key = sanitize(room);
        let _writing = lock(&self.write_lock);

        let mut rooms = self.load();
        edit(rooms.entry(key.clone()).or_default());
        self.save(&rooms)?;
        tracing::debug!("[SETTINGS] updated {}", key);
        Ok(())
    }

    fn save(&self, rooms: &BTreeMap<String, SettingsRecord>) -> StoreResult<()> {
        let document = serde_json::to_string_pretty(rooms)?;
        durable::write_atomic(&self.path, document.as_bytes())
    }

    fn load(&self) -> BTreeMap<String, SettingsRecord> {
        let text = match durable::read_or_empty(&self.path) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("[SETTINGS] {} unreadable, treating as empty: {}", self.path.display(), e);
                return BTreeMap::new();
            }
        };
        if text.trim().is_empty() {
            return BTreeMap::new();
        }

        let doc: Map<String, Value> = match serde_json::from_str(&text) {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!("[SETTINGS] {} is not a json object, treating as empty: {}", self.path.display(), e);
                return BTreeMap::new();
            }
        };

        doc.into_iter()
            .filter_map(|(room, value)| match serde_json::from_value::<SettingsRecord>(value) {
                Ok(record) => Some((room, record)),
                Err(e) => {
                    tracing::warn!("[SETTINGS] skipping malformed entry {}: {}", room, e);
                    None
                }
            })
            .collect()
    }
}
