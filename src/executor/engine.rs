//! Contract with the external download engine.
//!
//! The engine owns the actual transfer: it writes the file, resolves name
//! conflicts, and reports progress through a broadcast stream of state
//! changes. The executor only submits, listens, and cancels.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::EngineError;
use crate::types::EngineDownloadId;

/// Submission handed to the engine: `{url, suggestedPath, saveAs: false}`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequest {
    /// Validated download URL
    pub url: String,
    /// Sanitized relative path hint (`Folder/Artist/Title`)
    pub suggested_path: String,
    /// Whether the engine should prompt for a location (always false)
    pub save_as: bool,
}

/// Engine-side state of a download
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "current", rename_all = "snake_case")]
pub enum EngineState {
    /// Bytes are flowing
    InProgress,
    /// Transfer finished and the file is in place
    Complete,
    /// Transfer stopped before finishing
    Interrupted {
        /// Engine-reported reason (e.g. `NETWORK_FAILED`)
        reason: String,
    },
}

/// State-change notification published by the engine
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineUpdate {
    /// Which download changed
    pub id: EngineDownloadId,
    /// New state
    pub state: EngineState,
    /// Cumulative bytes received
    #[serde(default)]
    pub bytes_received: u64,
    /// Total size, 0 when unknown
    #[serde(default)]
    pub total_bytes: u64,
    /// Final filename, usually only present once complete
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

/// Abstraction over the external download engine, enabling testability.
#[async_trait::async_trait]
pub trait DownloadEngine: Send + Sync {
    /// Start a download and return the engine's identifier for it
    async fn submit(&self, request: DownloadRequest) -> Result<EngineDownloadId, EngineError>;

    /// Subscribe to state-change notifications for all downloads.
    ///
    /// The executor subscribes before submitting so no early update is missed.
    fn subscribe(&self) -> broadcast::Receiver<EngineUpdate>;

    /// Cancel a download.
    ///
    /// Returns [`EngineError::NotInProgress`] when the engine has not
    /// registered the download yet or already finished it.
    async fn cancel(&self, id: EngineDownloadId) -> Result<(), EngineError>;
}
