//! ==============================================================================
//! sanitize.rs - storage key normalization
//! ==============================================================================
//!
//! purpose:
//!     every external identifier (sensor id, room name) passes through here
//!     before it becomes a key in any persisted document. only ascii letters,
//!     digits, '-' and '_' survive, so no request can smuggle path separators
//!     or quoting into the data directory.
//!
//! relationships:
//!     - used by: readings.rs, settings.rs, triggers.rs
//!
//! ==============================================================================

/// key used when nothing survives filtering
pub const FALLBACK_KEY: &str = "unknown";

/// reduce an identifier to `[A-Za-z0-9_-]+`, or "unknown" if empty
pub fn sanitize(id: &str) -> String {
    let out: String = id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();

    if out.is_empty() {
        FALLBACK_KEY.to_string()
    } else {
        out
    }
}
