//! Persistable queue snapshot.

use serde::{Deserialize, Serialize};

use super::item::QueueItem;

/// Full queue state as written to durable storage:
/// `{ queue: [...], currentJob, isPaused }`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueueSnapshot {
    /// Waiting items in dequeue order
    pub queue: Vec<QueueItem>,
    /// Item that was dequeued and not yet released
    pub current_job: Option<QueueItem>,
    /// Pause flag
    pub is_paused: bool,
}

impl QueueSnapshot {
    /// Encode as JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Decode from JSON, degrading to an empty snapshot on any error.
    ///
    /// Stored state may come from an older build or be truncated by a crash;
    /// neither should keep the orchestrator from starting.
    pub fn from_json_lossy(json: &str) -> Self {
        match serde_json::from_str::<QueueSnapshot>(json) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(error = %e, "Discarding unreadable queue snapshot");
                Self::default()
            }
        }
    }
}
