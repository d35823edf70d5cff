//! Database layer for collection-dl
//!
//! Handles SQLite persistence for the queue snapshot, the session record and
//! job history.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] — Database lifecycle, schema migrations
//! - [`state`] — Runtime state (JSON records by key, shutdown tracking)
//! - [`history`] — History of jobs that left the system

use crate::job::{Job, JobStatus};
use crate::types::{HistoryEntry, JobId};
use sqlx::{FromRow, sqlite::SqlitePool};

mod history;
mod migrations;
mod state;

/// New history entry to be inserted into the database
#[derive(Debug, Clone)]
pub struct NewHistoryEntry {
    /// Job id
    pub job_id: String,
    /// Release title
    pub title: String,
    /// Artist name
    pub artist: String,
    /// Page the purchase was found on
    pub source_url: String,
    /// Final status
    pub status: JobStatus,
    /// Last error message
    pub error_message: Option<String>,
    /// Retries consumed
    pub retry_count: u32,
    /// Final filename
    pub filename: Option<String>,
    /// Unix timestamp when the job left the system
    pub finished_at: i64,
}

impl NewHistoryEntry {
    /// Snapshot a job as it leaves the system
    pub fn from_job(job: &Job) -> Self {
        let finished_at = job
            .completed_at
            .or(job.failed_at)
            .unwrap_or_else(chrono::Utc::now)
            .timestamp();
        Self {
            job_id: job.id.to_string(),
            title: job.payload.title.clone(),
            artist: job.payload.artist.clone(),
            source_url: job.payload.source_url.clone(),
            status: job.status,
            error_message: job.error.as_ref().map(|e| e.message.clone()),
            retry_count: job.retry_count,
            filename: job.filename.clone(),
            finished_at,
        }
    }
}

/// History record from database (raw from SQLite)
#[derive(Debug, Clone, FromRow)]
pub struct HistoryRow {
    /// Unique database ID
    pub id: i64,
    /// Job id
    pub job_id: String,
    /// Release title
    pub title: String,
    /// Artist name
    pub artist: String,
    /// Source page
    pub source_url: String,
    /// Final status as text
    pub status: String,
    /// Last error message
    pub error_message: Option<String>,
    /// Retries consumed
    pub retry_count: i64,
    /// Final filename
    pub filename: Option<String>,
    /// Unix timestamp when the job left the system
    pub finished_at: i64,
}

impl From<HistoryRow> for HistoryEntry {
    fn from(row: HistoryRow) -> Self {
        use chrono::{TimeZone, Utc};

        HistoryEntry {
            id: row.id,
            job_id: JobId::from(row.job_id),
            title: row.title,
            artist: row.artist,
            source_url: row.source_url,
            status: row.status.parse().unwrap_or(JobStatus::Failed),
            error: row.error_message,
            retry_count: u32::try_from(row.retry_count).unwrap_or(0),
            filename: row.filename,
            finished_at: Utc
                .timestamp_opt(row.finished_at, 0)
                .single()
                .unwrap_or_else(Utc::now),
        }
    }
}

/// Database handle for collection-dl
pub struct Database {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
