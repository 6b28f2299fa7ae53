//! ==============================================================================
//! callback.rs - outbound trigger requests
//! ==============================================================================
//!
//! purpose:
//!     once the hub decides a room's "high" or "low" trigger should fire, the
//!     event is recorded in the trigger log and the configured url receives
//!     a plain GET. the request outcome is reported and logged but never
//!     changes what was recorded.
//!
//! relationships:
//!     - used by: server.rs (/triggerAllHigh, /triggerAllLow)
//!     - uses: storage.rs (settings lookup, trigger log)
//!
//! ==============================================================================

use crate::domain::TriggerKind;
use crate::storage::Storage;

use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// result of one fired callback
#[derive(Debug, Clone, Serialize)]
pub struct FireOutcome {
    pub room: String,
    #[serde(rename = "type")]
    pub kind: TriggerKind,
    pub url: String,
    /// http status, if the server answered
    pub status: Option<u16>,
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct CallbackClient {
    http: reqwest::Client,
    storage: Arc<Storage>,
}

impl CallbackClient {
    pub fn new(storage: Arc<Storage>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self { http, storage })
    }

    /// record the event, then GET the url
    pub async fn fire(&self, room: &str, kind: TriggerKind, url: &str) -> FireOutcome {
        self.storage.triggers().record(room, kind, url);

        let (status, error) = match self.http.get(url).send().await {
            Ok(response) => {
                let status = response.status();
                tracing::info!("[TRIGGER] {} {} -> {} ({})", room, kind, url, status);
                (Some(status.as_u16()), None)
            }
            Err(e) => {
                tracing::warn!("[TRIGGER] {} {} -> {} failed: {}", room, kind, url, e);
                (None, Some(e.to_string()))
            }
        };

        FireOutcome {
            room: room.to_string(),
            kind,
            url: url.to_string(),
            status,
            error,
        }
    }

    /// fire every room that has a url of `kind`
    pub async fn fire_all(&self, kind: TriggerKind) -> Result<Vec<FireOutcome>> {
        let storage = Arc::clone(&self.storage);
        let targets = tokio::task::spawn_blocking(move || storage.settings().get_all_trigger_urls(kind))
            .await
            .context("settings lookup task failed")?;

        let mut outcomes = Vec::with_capacity(targets.len());
        for (room, url) in targets {
            outcomes.push(self.fire(&room, kind, &url).await);
        }
        Ok(outcomes)
    }
}
