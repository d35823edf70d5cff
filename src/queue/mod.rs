//! Persistent priority queue of download jobs.
//!
//! [`JobQueue`] is a plain synchronous state machine with no internal locking;
//! the orchestrator wraps it in a mutex and writes a snapshot to durable
//! storage after every mutation.
//!
//! # Ordering
//!
//! Items are kept sorted by priority (descending) and then by enqueue time
//! (ascending). The sort is stable, so items enqueued within the same instant
//! keep their submission order.
//!
//! # Leases
//!
//! [`JobQueue::dequeue`] removes the front item and returns a [`Lease`]. Until
//! that lease is given back the queue refuses to dequeue again, which makes
//! "one job in flight" a property of the type rather than a convention.

mod events;
mod item;
mod snapshot;


pub use events::QueueEvent;
pub use item::{Lease, QueueItem, QueueItemStatus};
pub use snapshot::QueueSnapshot;

use chrono::Utc;
use std::collections::BTreeMap;
use tokio::sync::broadcast;

use crate::error::{JobFailure, QueueError};
use crate::job::Job;
use crate::types::{DownloadResult, JobId, Priority, QueueStats};

/// Capacity of the queue event channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Ordered, persistable collection of jobs
#[derive(Debug)]
pub struct JobQueue {
    items: Vec<QueueItem>,
    current: Option<QueueItem>,
    is_paused: bool,
    events: broadcast::Sender<QueueEvent>,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue {
    /// Create an empty, unpaused queue
    pub fn new() -> Self {
        let (events, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            items: Vec::new(),
            current: None,
            is_paused: false,
            events,
        }
    }

    /// Subscribe to queue events
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: QueueEvent) {
        // No receivers is fine, the event is dropped
        self.events.send(event).ok();
    }

    fn emit_changed(&self) {
        self.emit(QueueEvent::Changed {
            len: self.items.len(),
        });
    }

    fn sort(&mut self) {
        self.items.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.enqueued_at.cmp(&b.enqueued_at))
        });
    }

    fn insert(&mut self, job: Job, priority: Priority) -> JobId {
        let item = QueueItem::new(job, priority);
        let id = item.id.clone();
        // Ids are unique within the queue; a re-enqueue replaces the old entry
        self.items.retain(|existing| existing.id != id);
        self.items.push(item);
        id
    }

    /// Add a job at `priority`
    pub fn enqueue(&mut self, job: Job, priority: Priority) -> JobId {
        let id = self.insert(job, priority);
        self.sort();
        tracing::debug!(job_id = %id, priority, "Job enqueued");
        self.emit(QueueEvent::JobAdded {
            id: id.clone(),
            priority,
        });
        self.emit_changed();
        id
    }

    /// Add several jobs with a single re-sort and a single notification
    pub fn enqueue_batch(&mut self, jobs: impl IntoIterator<Item = (Job, Priority)>) -> Vec<JobId> {
        let ids: Vec<JobId> = jobs
            .into_iter()
            .map(|(job, priority)| self.insert(job, priority))
            .collect();
        self.sort();
        tracing::debug!(count = ids.len(), "Job batch enqueued");
        self.emit(QueueEvent::BatchAdded { ids: ids.clone() });
        self.emit_changed();
        ids
    }

    /// Hand out the front job.
    ///
    /// Returns `Ok(None)` when the queue is empty and
    /// [`QueueError::LeaseOutstanding`] while a previous lease is unreleased.
    pub fn dequeue(&mut self) -> Result<Option<Lease>, QueueError> {
        if let Some(current) = &self.current {
            return Err(QueueError::LeaseOutstanding(current.id.clone()));
        }
        if self.items.is_empty() {
            return Ok(None);
        }

        let mut item = self.items.remove(0);
        item.status = QueueItemStatus::Dequeued;
        let lease = Lease::new(&item);
        let id = item.id.clone();
        self.current = Some(item);

        self.emit(QueueEvent::JobDequeued { id });
        self.emit_changed();
        Ok(Some(lease))
    }

    fn take_current(&mut self, lease: &Lease) -> Result<QueueItem, QueueError> {
        match &self.current {
            Some(current) if &current.id == lease.id() => {}
            other => {
                return Err(QueueError::LeaseMismatch {
                    lease: lease.id().clone(),
                    current: other.as_ref().map(|item| item.id.clone()),
                });
            }
        }
        self.current.take().ok_or_else(|| QueueError::LeaseMismatch {
            lease: lease.id().clone(),
            current: None,
        })
    }

    /// Release the current job as completed
    pub fn complete_current(
        &mut self,
        lease: Lease,
        result: DownloadResult,
    ) -> Result<QueueItem, QueueError> {
        let mut item = self.take_current(&lease)?;
        item.status = QueueItemStatus::Completed;
        item.finished_at = Some(Utc::now());
        item.result = Some(result);

        self.emit(QueueEvent::JobCompleted {
            id: item.id.clone(),
        });
        self.emit_changed();
        Ok(item)
    }

    /// Release the current job as failed
    pub fn fail_current(
        &mut self,
        lease: Lease,
        error: JobFailure,
    ) -> Result<QueueItem, QueueError> {
        let mut item = self.take_current(&lease)?;
        item.status = QueueItemStatus::Failed;
        item.finished_at = Some(Utc::now());
        let message = error.message.clone();
        item.error = Some(error);

        self.emit(QueueEvent::JobFailed {
            id: item.id.clone(),
            error: message,
        });
        self.emit_changed();
        Ok(item)
    }

    /// Release the current job without an outcome (cancelled in flight)
    pub fn release_current(&mut self, lease: Lease) -> Result<QueueItem, QueueError> {
        let item = self.take_current(&lease)?;
        self.emit(QueueEvent::JobReleased {
            id: item.id.clone(),
        });
        self.emit_changed();
        Ok(item)
    }

    /// Take the current item without a lease.
    ///
    /// Only meaningful right after [`JobQueue::restore`], when the snapshot
    /// names a job that was in flight when the previous process died and no
    /// lease for it exists anymore.
    pub fn take_orphaned_current(&mut self) -> Option<QueueItem> {
        let item = self.current.take()?;
        self.emit_changed();
        Some(item)
    }

    /// Remove a queued job by id
    pub fn remove(&mut self, id: &JobId) -> Option<Job> {
        let index = self.items.iter().position(|item| &item.id == id)?;
        let item = self.items.remove(index);
        self.emit(QueueEvent::JobRemoved { id: id.clone() });
        self.emit_changed();
        Some(item.job)
    }

    /// Remove several queued jobs; unknown ids are skipped
    pub fn remove_batch(&mut self, ids: &[JobId]) -> Vec<Job> {
        let mut removed = Vec::new();
        let mut kept = Vec::with_capacity(self.items.len());
        for item in self.items.drain(..) {
            if ids.contains(&item.id) {
                removed.push(item);
            } else {
                kept.push(item);
            }
        }
        self.items = kept;

        self.emit(QueueEvent::BatchRemoved {
            ids: removed.iter().map(|item| item.id.clone()).collect(),
        });
        self.emit_changed();
        removed.into_iter().map(|item| item.job).collect()
    }

    /// Change a queued job's priority and re-sort
    pub fn reorder(&mut self, id: &JobId, priority: Priority) -> Result<(), QueueError> {
        let item = self
            .items
            .iter_mut()
            .find(|item| &item.id == id)
            .ok_or_else(|| QueueError::NotFound(id.clone()))?;
        item.set_priority(priority);
        self.sort();

        self.emit(QueueEvent::Reordered {
            id: id.clone(),
            priority,
        });
        self.emit_changed();
        Ok(())
    }

    /// Move a queued job to an absolute position.
    ///
    /// The moved item takes over the sort key (priority and timestamp) of the
    /// item it lands in front of, or of the item it lands behind when moved to
    /// the end, so later re-sorts keep it where it was put.
    pub fn move_to_position(&mut self, id: &JobId, index: usize) -> Result<(), QueueError> {
        let from = self
            .items
            .iter()
            .position(|item| &item.id == id)
            .ok_or_else(|| QueueError::NotFound(id.clone()))?;
        if index >= self.items.len() {
            return Err(QueueError::PositionOutOfRange {
                index,
                len: self.items.len(),
            });
        }

        let mut item = self.items.remove(from);
        let neighbour = self.items.get(index).or_else(|| {
            index
                .checked_sub(1)
                .and_then(|previous| self.items.get(previous))
        });
        if let Some(neighbour) = neighbour {
            let (priority, enqueued_at) = (neighbour.priority, neighbour.enqueued_at);
            item.set_priority(priority);
            item.enqueued_at = enqueued_at;
        }
        self.items.insert(index, item);

        self.emit(QueueEvent::Moved {
            id: id.clone(),
            index,
        });
        self.emit_changed();
        Ok(())
    }

    /// Set the pause flag. Does not touch the current job.
    pub fn pause(&mut self) {
        if self.is_paused {
            return;
        }
        self.is_paused = true;
        self.emit(QueueEvent::Paused);
        self.emit_changed();
    }

    /// Clear the pause flag
    pub fn resume(&mut self) {
        if !self.is_paused {
            return;
        }
        self.is_paused = false;
        self.emit(QueueEvent::Resumed);
        self.emit_changed();
    }

    /// Drop every item, the current job and the pause flag
    pub fn clear(&mut self) {
        self.items.clear();
        self.current = None;
        self.is_paused = false;
        self.emit(QueueEvent::Cleared);
        self.emit_changed();
    }

    /// Capture the full state
    pub fn serialize(&self) -> QueueSnapshot {
        QueueSnapshot {
            queue: self.items.clone(),
            current_job: self.current.clone(),
            is_paused: self.is_paused,
        }
    }

    /// Replace the state with a snapshot
    pub fn restore(&mut self, snapshot: QueueSnapshot) {
        self.items = snapshot.queue;
        self.current = snapshot.current_job;
        self.is_paused = snapshot.is_paused;
        self.sort();

        self.emit(QueueEvent::Restored {
            count: self.items.len(),
        });
        self.emit_changed();
    }

    /// Replace the state with a JSON snapshot; unreadable input yields an empty queue
    pub fn deserialize(&mut self, json: &str) {
        self.restore(QueueSnapshot::from_json_lossy(json));
    }

    /// Counts per priority and flags
    pub fn stats(&self) -> QueueStats {
        let mut by_priority = BTreeMap::new();
        for item in &self.items {
            *by_priority.entry(item.priority).or_insert(0) += 1;
        }
        QueueStats {
            total: self.items.len(),
            by_priority,
            is_paused: self.is_paused,
            has_current_job: self.current.is_some(),
        }
    }

    /// Queued items in dequeue order
    pub fn items(&self) -> &[QueueItem] {
        &self.items
    }

    /// Item currently leased out
    pub fn current(&self) -> Option<&QueueItem> {
        self.current.as_ref()
    }

    /// Number of queued items (excluding the current job)
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether a job with this id is queued
    pub fn contains(&self, id: &JobId) -> bool {
        self.items.iter().any(|item| &item.id == id)
    }

    /// Pause flag
    pub fn is_paused(&self) -> bool {
        self.is_paused
    }

    /// Priority of the front item
    pub fn highest_priority(&self) -> Option<Priority> {
        self.items.first().map(|item| item.priority)
    }
}
