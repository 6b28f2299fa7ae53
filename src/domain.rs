use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// format used for every timestamp the hub generates
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// local wall-clock time in `TIMESTAMP_FORMAT`
pub fn timestamp_now() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// which threshold callback a room fires
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    High,
    Low,
}

impl TriggerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerKind::High => "high",
            TriggerKind::Low => "low",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "high" => Ok(TriggerKind::High),
            "low" => Ok(TriggerKind::Low),
            other => Err(format!("unknown trigger type: {other}")),
        }
    }
}

/// one fired callback, immutable once recorded
///
/// serialized as one line of the trigger log:
/// `{"timestamp": "...", "sensor": "...", "type": "high", "url": "..."}`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub timestamp: String,
    pub sensor: String,
    #[serde(rename = "type")]
    pub kind: TriggerKind,
    pub url: String,
}

/// per-room configuration as handed to callers
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RoomSettings {
    pub room: String,
    pub desired: Option<f64>,
    pub high_url: String,
    pub low_url: String,
}

impl RoomSettings {
    pub fn url(&self, kind: TriggerKind) -> &str {
        match kind {
            TriggerKind::High => &self.high_url,
            TriggerKind::Low => &self.low_url,
        }
    }
}

/// on-disk shape of one room inside settings.json
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct SettingsRecord {
    #[serde(default)]
    pub desired: Option<f64>,
    #[serde(default)]
    pub high: String,
    #[serde(default)]
    pub low: String,
}

impl SettingsRecord {
    pub fn into_room(self, room: &str) -> RoomSettings {
        RoomSettings {
            room: room.to_string(),
            desired: self.desired,
            high_url: self.high,
            low_url: self.low,
        }
    }

    pub fn url_mut(&mut self, kind: TriggerKind) -> &mut String {
        match kind {
            TriggerKind::High => &mut self.high,
            TriggerKind::Low => &mut self.low,
        }
    }
}
