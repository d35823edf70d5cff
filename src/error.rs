//! Error types for collection-dl
//!
//! This module provides the error hierarchy for the library:
//! - [`Error`] is the top-level type returned by public operations
//! - [`JobError`] covers state machine misuse
//! - [`QueueError`] covers lease and position violations on the queue
//! - [`DownloadError`] carries the download failure taxonomy the orchestrator
//!   uses for retry and counter bookkeeping
//! - [`EngineError`] is what the external download engine reports

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::JobId;

/// Result type alias for collection-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for collection-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "ready_timeout")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Job state machine misuse
    #[error("job error: {0}")]
    Job(#[from] JobError),

    /// Queue lease or position violation
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// Download failure reported by the executor or link resolver
    #[error("download error: {0}")]
    Download(#[from] DownloadError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Job not found
    #[error("job not found: {0}")]
    NotFound(String),

    /// Shutdown in progress - not accepting new jobs
    #[error("shutdown in progress: not accepting new jobs")]
    ShuttingDown,

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),
}

/// Job state machine errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    /// The requested transition is not valid from the current state
    #[error("cannot {operation} job {id} in state {current_state}")]
    InvalidTransition {
        /// The job that rejected the transition
        id: JobId,
        /// The operation that was attempted (e.g., "start", "pause")
        operation: &'static str,
        /// The state that prevents the operation
        current_state: String,
    },
}

/// Queue errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// A dequeued job has not been released yet
    #[error("job {0} is still leased; complete or fail it before dequeuing again")]
    LeaseOutstanding(JobId),

    /// The lease handed back does not match the current job
    #[error("lease for job {lease} does not match current job {current:?}")]
    LeaseMismatch {
        /// Job named by the lease
        lease: JobId,
        /// Job currently leased, if any
        current: Option<JobId>,
    },

    /// No queued item with this id
    #[error("job {0} is not queued")]
    NotFound(JobId),

    /// Position outside the queue bounds
    #[error("position {index} is out of range for a queue of {len} items")]
    PositionOutOfRange {
        /// Requested position
        index: usize,
        /// Current queue length
        len: usize,
    },
}

/// Errors reported by the external download engine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The engine has not registered the download as in progress (yet)
    #[error("download {0} is not in progress")]
    NotInProgress(i64),

    /// The engine refused the submission
    #[error("submission rejected: {0}")]
    Rejected(String),

    /// The engine is unreachable or its notification stream closed
    #[error("download engine unavailable: {0}")]
    Unavailable(String),
}

/// Download failures surfaced to the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DownloadError {
    /// Resolved link is not https or not on the trusted content domain
    #[error("untrusted download source: {url}")]
    UntrustedSource {
        /// The rejected URL
        url: String,
    },

    /// The monitored page never reported a ready download link
    #[error("download link was not ready after {waited_ms}ms")]
    PreparationTimeout {
        /// How long the executor polled before giving up
        waited_ms: u64,
    },

    /// The engine reported the download as interrupted
    #[error("download interrupted: {reason}")]
    Interrupted {
        /// Interruption reason as reported by the engine
        reason: String,
    },

    /// User-initiated cancellation
    #[error("download cancelled")]
    Cancelled,

    /// The resolver never produced a usable link
    #[error("no download link after {attempts} attempts")]
    LinkResolutionExhausted {
        /// Number of resolution attempts made
        attempts: u32,
    },

    /// The resolver reported an explicit failure
    #[error("link resolution failed: {0}")]
    LinkResolutionFailed(String),

    /// A second download was started on a busy executor
    #[error("a download is already in progress on this executor")]
    AlreadyInProgress,

    /// Engine fault
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// Monitoring context fault (open/poll failed)
    #[error("monitoring context error: {0}")]
    Monitor(String),
}

/// Machine-readable error kind recorded on jobs and in history
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// See [`JobError::InvalidTransition`]
    InvalidTransition,
    /// See [`DownloadError::UntrustedSource`]
    UntrustedSource,
    /// See [`DownloadError::PreparationTimeout`]
    PreparationTimeout,
    /// See [`DownloadError::Interrupted`]
    Interrupted,
    /// See [`DownloadError::Cancelled`]
    Cancelled,
    /// See [`DownloadError::LinkResolutionExhausted`]
    LinkResolutionExhausted,
    /// See [`DownloadError::LinkResolutionFailed`]
    LinkResolutionFailed,
    /// See [`DownloadError::AlreadyInProgress`]
    AlreadyInProgress,
    /// Engine or monitoring context fault
    Engine,
    /// Anything else
    Other,
}

impl DownloadError {
    /// Machine-readable kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            DownloadError::UntrustedSource { .. } => ErrorKind::UntrustedSource,
            DownloadError::PreparationTimeout { .. } => ErrorKind::PreparationTimeout,
            DownloadError::Interrupted { .. } => ErrorKind::Interrupted,
            DownloadError::Cancelled => ErrorKind::Cancelled,
            DownloadError::LinkResolutionExhausted { .. } => ErrorKind::LinkResolutionExhausted,
            DownloadError::LinkResolutionFailed(_) => ErrorKind::LinkResolutionFailed,
            DownloadError::AlreadyInProgress => ErrorKind::AlreadyInProgress,
            DownloadError::Engine(_) | DownloadError::Monitor(_) => ErrorKind::Engine,
        }
    }

    /// True for the neutral, user-initiated cancellation outcome
    pub fn is_cancellation(&self) -> bool {
        matches!(self, DownloadError::Cancelled)
    }
}

impl Error {
    /// Machine-readable kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Download(e) => e.kind(),
            Error::Job(JobError::InvalidTransition { .. }) => ErrorKind::InvalidTransition,
            _ => ErrorKind::Other,
        }
    }
}

/// Error as recorded on a job (kind plus message)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    /// Machine-readable kind
    pub kind: ErrorKind,
    /// Human-readable message
    pub message: String,
}

impl From<&DownloadError> for JobFailure {
    fn from(error: &DownloadError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

impl From<&Error> for JobFailure {
    fn from(error: &Error) -> Self {
        match error {
            Error::Download(e) => Self::from(e),
            other => Self {
                kind: other.kind(),
                message: other.to_string(),
            },
        }
    }
}
