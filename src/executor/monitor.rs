//! Contract with the page inspector that watches a download page until its
//! link is ready.

use serde::{Deserialize, Serialize};

use crate::error::DownloadError;

/// Handle to an open monitoring context (a tab, a headless page, ...)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MonitorId(pub u64);

impl std::fmt::Display for MonitorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Artist and title as shown on the monitored page
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMetadata {
    /// Artist name
    #[serde(default)]
    pub artist: Option<String>,
    /// Release title
    #[serde(default)]
    pub title: Option<String>,
}

/// Answer to a readiness poll: `{ready, url?, metadata?: {artist, title}}`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyCheck {
    /// Whether the download link can be used now
    pub ready: bool,
    /// Final download URL, when the page exposes one
    #[serde(default)]
    pub url: Option<String>,
    /// Metadata scraped from the page
    #[serde(default)]
    pub metadata: Option<PageMetadata>,
}

impl ReadyCheck {
    /// A negative answer
    pub fn not_ready() -> Self {
        Self::default()
    }

    /// A positive answer carrying the final URL
    pub fn ready(url: impl Into<String>) -> Self {
        Self {
            ready: true,
            url: Some(url.into()),
            metadata: None,
        }
    }
}

/// Opens monitoring contexts and answers readiness polls
#[async_trait::async_trait]
pub trait PageInspector: Send + Sync {
    /// Open a monitoring context on `url`
    async fn open(&self, url: &str) -> Result<MonitorId, DownloadError>;

    /// Ask whether the monitored page has a usable download link
    async fn check_ready(&self, monitor: MonitorId) -> Result<ReadyCheck, DownloadError>;

    /// Close the context. Closing an unknown or already closed id is a no-op.
    async fn close(&self, monitor: MonitorId);
}
