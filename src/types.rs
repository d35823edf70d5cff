//! Core types for collection-dl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ErrorKind;
use crate::job::{Job, JobStatus};

/// Unique identifier for a job (opaque string)
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a fresh random identifier
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier the external download engine assigns to a submitted download
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EngineDownloadId(pub i64);

impl std::fmt::Display for EngineDownloadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Queue priority (higher dequeues first)
pub type Priority = i32;

/// Caller-supplied description of one download unit
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payload {
    /// Release title
    pub title: String,
    /// Artist name
    pub artist: String,
    /// Page the purchase was found on
    pub source_url: String,
    /// Direct download link, once resolved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
}

impl Payload {
    /// Build a payload without a resolved link
    pub fn new(
        title: impl Into<String>,
        artist: impl Into<String>,
        source_url: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            artist: artist.into(),
            source_url: source_url.into(),
            download_url: None,
        }
    }

    /// Attach an already known download link
    pub fn with_download_url(mut self, url: impl Into<String>) -> Self {
        self.download_url = Some(url.into());
        self
    }
}

/// Successful download outcome
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadResult {
    /// Engine-side identifier of the finished download
    pub engine_download_id: EngineDownloadId,
    /// Final filename chosen by the engine, if it reported one
    #[serde(default)]
    pub filename: Option<String>,
}

/// Aggregate outcome counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    /// Jobs finished successfully
    pub completed: u64,
    /// Failed attempts (cancellations are never counted)
    pub failed: u64,
}

/// Session record persisted next to the queue snapshot
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionRecord {
    /// Jobs finished successfully
    pub completed: u64,
    /// Failed attempts
    pub failed: u64,
    /// Whether a drain was in progress
    pub is_active: bool,
    /// Whether the user had paused
    pub is_paused: bool,
    /// Payloads submitted during this session
    pub payloads: Vec<Payload>,
    /// Failed jobs that were waiting for their backoff timer
    pub pending_retries: Vec<Job>,
}

impl SessionRecord {
    /// Counters held by this record
    pub fn counters(&self) -> Counters {
        Counters {
            completed: self.completed,
            failed: self.failed,
        }
    }
}

/// Queue statistics
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Number of queued items (excluding the current job)
    pub total: usize,
    /// Queued item count per priority
    pub by_priority: BTreeMap<Priority, usize>,
    /// Whether the queue is paused
    pub is_paused: bool,
    /// Whether a job is currently dequeued
    pub has_current_job: bool,
}

/// Summary of the job being downloaded right now
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CurrentJobInfo {
    /// Job id
    pub id: JobId,
    /// Release title
    pub title: String,
    /// Artist name
    pub artist: String,
    /// Status tag
    pub status: JobStatus,
    /// Human-readable status line
    pub status_text: String,
    /// Percent complete (0-100)
    pub percent_complete: u8,
}

/// Point-in-time view of the orchestrator
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    /// Outcome counters
    pub counters: Counters,
    /// Whether the session is draining
    pub is_active: bool,
    /// Whether the session is paused
    pub is_paused: bool,
    /// Queue statistics
    pub queue: QueueStats,
    /// Job in flight, if any
    pub current: Option<CurrentJobInfo>,
    /// Retries waiting for their backoff timer
    pub pending_retries: usize,
}

/// A job that left the system terminally, as recorded in history
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Row id
    pub id: i64,
    /// Job id
    pub job_id: JobId,
    /// Release title
    pub title: String,
    /// Artist name
    pub artist: String,
    /// Page the purchase was found on
    pub source_url: String,
    /// Final status (completed, failed or cancelled)
    pub status: JobStatus,
    /// Last error message, for failed jobs
    pub error: Option<String>,
    /// Retries consumed
    pub retry_count: u32,
    /// Final filename, for completed jobs
    pub filename: Option<String>,
    /// When the job left the system
    pub finished_at: DateTime<Utc>,
}

/// Event emitted by the orchestrator
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Job accepted into the queue
    JobQueued {
        /// Job id
        id: JobId,
        /// Release title
        title: String,
        /// Priority it was queued at
        priority: Priority,
    },

    /// Job handed to the download executor
    JobStarted {
        /// Job id
        id: JobId,
    },

    /// Byte-level progress of the in-flight job
    JobProgress {
        /// Job id
        id: JobId,
        /// Bytes received so far
        bytes_received: u64,
        /// Total bytes, when known
        total_bytes: u64,
        /// Percent complete (0-100)
        percent_complete: u8,
    },

    /// Job finished successfully
    JobCompleted {
        /// Job id
        id: JobId,
        /// Final filename, if reported
        #[serde(skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },

    /// Job failed
    JobFailed {
        /// Job id
        id: JobId,
        /// Failure kind
        kind: ErrorKind,
        /// Error message
        error: String,
        /// Whether a retry was scheduled
        will_retry: bool,
        /// Human-readable status ("Failed (will retry)" / "Failed")
        status_text: String,
    },

    /// Retry scheduled after backoff
    JobRetryScheduled {
        /// Job id
        id: JobId,
        /// Backoff before the retry is enqueued
        delay_ms: u64,
        /// Retry attempt number about to start
        attempt: u32,
    },

    /// In-flight job cancelled and put back in the queue
    JobCancelled {
        /// Job id
        id: JobId,
    },

    /// Job removed from the queue by the user
    JobRemoved {
        /// Job id
        id: JobId,
    },

    /// Queue drained, nothing left to do
    QueueEmpty,

    /// Session paused
    Paused,

    /// Session resumed
    Resumed,

    /// Session stopped and cleared
    Stopped,

    /// State restored from durable storage at startup
    Restored {
        /// Queued jobs after restore
        queued: usize,
        /// Whether the drain was resumed automatically
        resumed: bool,
    },

    /// Completed/failed counters changed
    CountersChanged {
        /// Jobs finished successfully
        completed: u64,
        /// Failed attempts
        failed: u64,
    },

    /// Orchestrator shut down
    Shutdown,
}
