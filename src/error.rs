//! storage error taxonomy.
//!
//! missing keys are not errors (they come back as `None`), and malformed
//! persisted content is recovered from inside the stores. what remains is
//! the disk actually refusing a write.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// a file or directory could not be created, written or renamed
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// a document could not be serialized before writing
    #[error("failed to encode document: {0}")]
    Encode(#[from] serde_json::Error),

    /// the blocking task running a flush panicked or was cancelled
    #[error("flush task failed: {0}")]
    Task(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
