//! ==============================================================================
//! durable.rs - atomic file replacement
//! ==============================================================================
//!
//! purpose:
//!     the one place that writes persisted documents. content goes to
//!     `<name>.tmp` in the same directory, is synced, then renamed over the
//!     canonical path. a reader sees either the old file or the new one,
//!     never a half-written file.
//!
//! relationships:
//!     - used by: readings.rs (sensor_data.json)
//!     - used by: settings.rs (settings.json)
//!     - used by: triggers.rs (trigger_events.jsonl)
//!
//! ==============================================================================

use crate::error::{StoreError, StoreResult};

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// temp path used while replacing `path`
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// replace `path` with `contents` atomically
///
/// on error the canonical file is untouched and the temp file is removed
/// on a best-effort basis.
pub fn write_atomic(path: &Path, contents: &[u8]) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
    }

    let tmp = temp_path(path);
    let written = File::create(&tmp).and_then(|mut file| {
        file.write_all(contents)?;
        file.sync_all()
    });
    if let Err(e) = written {
        discard(&tmp);
        return Err(StoreError::io(&tmp, e));
    }

    if let Err(e) = fs::rename(&tmp, path) {
        discard(&tmp);
        return Err(StoreError::io(path, e));
    }

    Ok(())
}

/// read a whole file, treating "not found" as empty
pub fn read_or_empty(path: &Path) -> StoreResult<String> {
    match fs::read_to_string(path) {
        Ok(s) => Ok(s),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

/// read a whole file as bytes, treating "not found" as empty
pub fn read_bytes_or_empty(path: &Path) -> StoreResult<Vec<u8>> {
    match fs::read(path) {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

fn discard(tmp: &Path) {
    // a directory squatting on the temp name is left alone
    if tmp.is_file() {
        let _ = fs::remove_file(tmp);
    }
}
