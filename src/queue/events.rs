//! Typed queue notifications.

use serde::Serialize;

use crate::types::{JobId, Priority};

/// Event emitted by every mutating queue operation.
///
/// A scoped event is always followed by [`QueueEvent::Changed`], so observers
/// that only care about "something changed" can listen for that alone.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueEvent {
    /// Single job enqueued
    JobAdded {
        /// Job id
        id: JobId,
        /// Priority it was queued at
        priority: Priority,
    },
    /// Several jobs enqueued at once
    BatchAdded {
        /// Job ids in submission order
        ids: Vec<JobId>,
    },
    /// Job removed by id
    JobRemoved {
        /// Job id
        id: JobId,
    },
    /// Several jobs removed at once
    BatchRemoved {
        /// Job ids actually removed
        ids: Vec<JobId>,
    },
    /// Front job handed out
    JobDequeued {
        /// Job id
        id: JobId,
    },
    /// Current job released as completed
    JobCompleted {
        /// Job id
        id: JobId,
    },
    /// Current job released as failed
    JobFailed {
        /// Job id
        id: JobId,
        /// Failure message
        error: String,
    },
    /// Current job released without an outcome
    JobReleased {
        /// Job id
        id: JobId,
    },
    /// Priority changed
    Reordered {
        /// Job id
        id: JobId,
        /// New priority
        priority: Priority,
    },
    /// Job moved to an absolute position
    Moved {
        /// Job id
        id: JobId,
        /// New index
        index: usize,
    },
    /// Queue paused
    Paused,
    /// Queue resumed
    Resumed,
    /// Queue emptied
    Cleared,
    /// Queue rebuilt from a snapshot
    Restored {
        /// Items restored
        count: usize,
    },
    /// Queue contents or flags changed
    Changed {
        /// Items queued after the change
        len: usize,
    },
}
