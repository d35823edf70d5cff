//! Queue item and lease types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::JobFailure;
use crate::job::Job;
use crate::types::{DownloadResult, JobId, Priority};

/// Lifecycle tag of a queue item
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueItemStatus {
    /// Waiting in the queue
    Pending,
    /// Handed out by `dequeue`
    Dequeued,
    /// Released through `complete_current`
    Completed,
    /// Released through `fail_current`
    Failed,
}

/// A job plus its queue bookkeeping
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Same as the job id
    pub id: JobId,
    /// The job itself, stored as a typed value
    pub job: Job,
    /// Ordering priority (higher first)
    pub priority: Priority,
    /// Enqueue time, FIFO tie-breaker within a priority
    #[serde(rename = "timestamp")]
    pub enqueued_at: DateTime<Utc>,
    /// Lifecycle tag
    pub status: QueueItemStatus,
    /// When the item was released terminally
    #[serde(default, rename = "finishedAt", skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Success metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<DownloadResult>,
    /// Failure metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobFailure>,
}

impl QueueItem {
    pub(super) fn new(mut job: Job, priority: Priority) -> Self {
        job.priority = priority;
        job.mark_queued();
        Self {
            id: job.id.clone(),
            job,
            priority,
            enqueued_at: Utc::now(),
            status: QueueItemStatus::Pending,
            finished_at: None,
            result: None,
            error: None,
        }
    }

    pub(super) fn set_priority(&mut self, priority: Priority) {
        self.priority = priority;
        self.job.priority = priority;
    }
}

/// Ticket for the job handed out by `dequeue`.
///
/// The queue refuses to hand out another job until this lease is given back
/// through `complete_current`, `fail_current` or `release_current`.
#[derive(Debug)]
#[must_use = "a lease must be released back to the queue"]
pub struct Lease {
    id: JobId,
    job: Job,
}

impl Lease {
    pub(super) fn new(item: &QueueItem) -> Self {
        Self {
            id: item.id.clone(),
            job: item.job.clone(),
        }
    }

    /// Id of the leased job
    pub fn id(&self) -> &JobId {
        &self.id
    }

    /// The leased job as it was when dequeued
    pub fn job(&self) -> &Job {
        &self.job
    }
}
