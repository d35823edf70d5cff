//! Download job state machine.
//!
//! A [`Job`] wraps one [`Payload`] and tracks its lifecycle:
//!
//! ```text
//! Pending -> Queued -> Downloading -> Completed | Failed | Paused | Cancelled
//! Paused  -> Downloading            (resume)
//! Failed  -> Pending                (increment_retry)
//! ```
//!
//! Jobs never decide to retry on their own. They only record whether a retry
//! is still allowed; the orchestrator owns scheduling.
//!
//! Once a job is terminal (Completed, Cancelled, or Failed with retries
//! exhausted) `start`, `pause`, `resume`, `complete` and `fail` leave it
//! untouched and report success.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::{JobError, JobFailure};
use crate::retry::backoff_delay;
use crate::types::{DownloadResult, EngineDownloadId, JobId, Payload, Priority};

/// Default number of retries before a job is given up
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Job lifecycle state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Created, not yet in a queue
    Pending,
    /// Waiting in the queue
    Queued,
    /// Handed to the download executor
    Downloading,
    /// Download paused
    Paused,
    /// Finished successfully
    Completed,
    /// Last attempt failed
    Failed,
    /// Aborted by the user
    Cancelled,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Queued => "queued",
            JobStatus::Downloading => "downloading",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "queued" => Ok(JobStatus::Queued),
            "downloading" => Ok(JobStatus::Downloading),
            "paused" => Ok(JobStatus::Paused),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Byte-level progress of a job
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    /// Bytes received so far
    pub bytes_received: u64,
    /// Total size in bytes (0 when unknown)
    pub total_bytes: u64,
    /// `round(bytes_received / total_bytes * 100)`, 0 when the total is unknown
    pub percent_complete: u8,
    /// Transfer rate in bytes per second
    pub rate: f64,
}

impl Progress {
    fn recompute_percent(&mut self) {
        self.percent_complete = percent_of(self.bytes_received, self.total_bytes);
    }
}

/// Partial progress update; `None` fields keep their current value
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProgressDelta {
    /// Cumulative bytes received
    pub bytes_received: Option<u64>,
    /// Total size in bytes
    pub total_bytes: Option<u64>,
    /// Transfer rate in bytes per second
    pub rate: Option<f64>,
}

/// Percentage of `received` over `total`, rounded, 0 when `total` is 0.
///
/// Engines occasionally overshoot their announced total; the result is
/// capped at 100.
pub fn percent_of(received: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = (received as f64 / total as f64 * 100.0).round();
    pct.min(100.0) as u8
}

/// One download unit and its lifecycle bookkeeping
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Unique id
    pub id: JobId,
    /// What to download
    pub payload: Payload,
    /// Current queue priority
    pub priority: Priority,
    /// Lifecycle state
    pub status: JobStatus,
    /// When the job was created
    pub created_at: DateTime<Utc>,
    /// When the current attempt started
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// When the job completed
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// When the last attempt failed
    #[serde(default)]
    pub failed_at: Option<DateTime<Utc>>,
    /// Byte-level progress
    #[serde(default)]
    pub progress: Progress,
    /// Last recorded failure
    #[serde(default)]
    pub error: Option<JobFailure>,
    /// Number of failures recorded, independent of retries
    #[serde(default)]
    pub error_count: u32,
    /// Retries consumed so far
    #[serde(default)]
    pub retry_count: u32,
    /// Retry budget
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// `Some(false)` once retries are exhausted or a non-retryable failure occurred
    #[serde(default)]
    pub can_retry: Option<bool>,
    /// Filename reported on completion
    #[serde(default)]
    pub filename: Option<String>,
    /// Engine id reported on completion
    #[serde(default)]
    pub engine_download_id: Option<EngineDownloadId>,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl Job {
    /// Create a pending job for a payload
    pub fn new(payload: Payload) -> Self {
        Self {
            id: JobId::generate(),
            payload,
            priority: 0,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            failed_at: None,
            progress: Progress::default(),
            error: None,
            error_count: 0,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            can_retry: None,
            filename: None,
            engine_download_id: None,
        }
    }

    /// Override the retry budget
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Override the generated id
    pub fn with_id(mut self, id: impl Into<JobId>) -> Self {
        self.id = id.into();
        self
    }

    /// Completed, Cancelled, or Failed with no retry left
    pub fn is_terminal(&self) -> bool {
        match self.status {
            JobStatus::Completed | JobStatus::Cancelled => true,
            JobStatus::Failed => !self.retry_allowed(),
            _ => false,
        }
    }

    fn retry_allowed(&self) -> bool {
        self.retry_count < self.max_retries && self.can_retry != Some(false)
    }

    fn invalid(&self, operation: &'static str) -> JobError {
        JobError::InvalidTransition {
            id: self.id.clone(),
            operation,
            current_state: self.status.to_string(),
        }
    }

    /// Pending -> Queued. Other states are left alone.
    pub fn mark_queued(&mut self) {
        if self.status == JobStatus::Pending {
            self.status = JobStatus::Queued;
        }
    }

    /// Begin downloading (from Pending or Queued)
    pub fn start(&mut self) -> Result<(), JobError> {
        if self.is_terminal() {
            return Ok(());
        }
        match self.status {
            JobStatus::Pending | JobStatus::Queued => {
                self.status = JobStatus::Downloading;
                self.started_at = Some(Utc::now());
                Ok(())
            }
            _ => Err(self.invalid("start")),
        }
    }

    /// Downloading -> Paused
    pub fn pause(&mut self) -> Result<(), JobError> {
        if self.is_terminal() {
            return Ok(());
        }
        match self.status {
            JobStatus::Downloading => {
                self.status = JobStatus::Paused;
                Ok(())
            }
            _ => Err(self.invalid("pause")),
        }
    }

    /// Paused -> Downloading
    pub fn resume(&mut self) -> Result<(), JobError> {
        if self.is_terminal() {
            return Ok(());
        }
        match self.status {
            JobStatus::Paused => {
                self.status = JobStatus::Downloading;
                Ok(())
            }
            _ => Err(self.invalid("resume")),
        }
    }

    /// Mark completed and copy the engine's result onto the job
    pub fn complete(&mut self, result: &DownloadResult) {
        if self.is_terminal() {
            return;
        }
        self.status = JobStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.progress.percent_complete = 100;
        self.filename = result.filename.clone();
        self.engine_download_id = Some(result.engine_download_id);
    }

    /// Record a failed attempt.
    ///
    /// `can_retry` is false for failures that retrying cannot fix; the stored
    /// flag also turns false once the retry budget is spent.
    pub fn fail(&mut self, error: JobFailure, can_retry: bool) {
        if self.is_terminal() {
            return;
        }
        self.status = JobStatus::Failed;
        self.failed_at = Some(Utc::now());
        self.error_count += 1;
        self.error = Some(error);
        self.can_retry = Some(can_retry && self.retry_count < self.max_retries);
    }

    /// Force Cancelled regardless of the current state
    pub fn cancel(&mut self) {
        self.status = JobStatus::Cancelled;
    }

    /// Merge a progress update. Only applies while downloading; returns
    /// whether anything was applied.
    pub fn update_progress(&mut self, delta: &ProgressDelta) -> bool {
        if self.status != JobStatus::Downloading {
            return false;
        }
        if let Some(received) = delta.bytes_received {
            self.progress.bytes_received = received;
        }
        if let Some(total) = delta.total_bytes {
            self.progress.total_bytes = total;
        }
        if let Some(rate) = delta.rate {
            self.progress.rate = rate;
        }
        self.progress.recompute_percent();
        true
    }

    /// Consume one retry: back to Pending with the error cleared.
    ///
    /// Returns whether the budget still allows further attempts after this one.
    /// Only a Failed job can be retried; other states return false untouched.
    pub fn increment_retry(&mut self) -> bool {
        if self.status != JobStatus::Failed {
            return false;
        }
        self.retry_count += 1;
        self.status = JobStatus::Pending;
        self.error = None;
        self.retry_count < self.max_retries
    }

    /// Backoff before the next retry with the default policy:
    /// `min(2^retry_count * 1s, 60s)`
    pub fn retry_delay(&self) -> Duration {
        self.retry_delay_with(&RetryConfig::default())
    }

    /// Backoff before the next retry under a specific policy
    pub fn retry_delay_with(&self, config: &RetryConfig) -> Duration {
        backoff_delay(self.retry_count, config)
    }

    /// Failed, budget left, and not flagged as non-retryable
    pub fn can_be_retried(&self) -> bool {
        self.status == JobStatus::Failed && self.retry_allowed()
    }

    /// Put a non-terminal job back to Pending with progress cleared.
    ///
    /// Used when an in-flight download is cancelled so the same job can be
    /// queued again. Returns false for terminal jobs.
    pub fn requeue(&mut self) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = JobStatus::Pending;
        self.progress = Progress::default();
        self.started_at = None;
        true
    }

    /// Human-readable status line
    pub fn status_text(&self) -> String {
        match self.status {
            JobStatus::Pending => "Pending".to_string(),
            JobStatus::Queued => "Queued".to_string(),
            JobStatus::Downloading if self.progress.total_bytes > 0 => {
                format!("Downloading ({}%)", self.progress.percent_complete)
            }
            JobStatus::Downloading => "Downloading".to_string(),
            JobStatus::Paused => "Paused".to_string(),
            JobStatus::Completed => "Completed".to_string(),
            JobStatus::Failed if self.can_be_retried() => "Failed (will retry)".to_string(),
            JobStatus::Failed => "Failed".to_string(),
            JobStatus::Cancelled => "Cancelled".to_string(),
        }
    }
}
