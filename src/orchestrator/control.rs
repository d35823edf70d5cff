//! Session control: submission, pause/resume/stop, queue editing and status.

use std::sync::atomic::Ordering;

use crate::error::{Error, QueueError, Result};
use crate::job::Job;
use crate::types::{
    Counters, CurrentJobInfo, Event, HistoryEntry, JobId, Payload, Priority, SessionStatus,
};

use super::{Orchestrator, front_priority, lock};

impl Orchestrator {
    /// Queue a batch of purchases for download
    ///
    /// Each payload becomes a [`Job`] at `priority` (or the configured default
    /// priority). The whole batch is enqueued with a single re-sort, the session
    /// is marked active and the drain loop is started.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShuttingDown`] once `shutdown()` has begun.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use collection_dl::*;
    /// # async fn example(orchestrator: Orchestrator) -> Result<()> {
    /// let ids = orchestrator
    ///     .submit(
    ///         vec![Payload::new(
    ///             "Album",
    ///             "Artist",
    ///             "https://artist.bandcamp.com/album/album",
    ///         )],
    ///         None,
    ///     )
    ///     .await?;
    /// assert_eq!(ids.len(), 1);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn submit(
        &self,
        payloads: Vec<Payload>,
        priority: Option<Priority>,
    ) -> Result<Vec<JobId>> {
        if !self.session.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }
        if payloads.is_empty() {
            return Ok(Vec::new());
        }

        let priority = priority.unwrap_or(self.config.orchestrator.default_priority);
        let jobs: Vec<(Job, Priority)> = payloads
            .iter()
            .cloned()
            .map(|payload| {
                (
                    Job::new(payload).with_max_retries(self.config.retry.max_retries),
                    priority,
                )
            })
            .collect();
        let titles: Vec<String> = payloads.iter().map(|p| p.title.clone()).collect();

        let ids = self.queue.lock().await.enqueue_batch(jobs);
        lock(&self.session.payloads).extend(payloads);
        self.session.is_active.store(true, Ordering::SeqCst);

        tracing::info!(count = ids.len(), priority, "Jobs submitted");
        for (id, title) in ids.iter().zip(titles) {
            self.emit_event(Event::JobQueued {
                id: id.clone(),
                title,
                priority,
            });
        }

        self.persist().await;
        self.kick();
        Ok(ids)
    }

    /// Stop starting new jobs
    ///
    /// Cooperative: the job in flight (if any) runs to its outcome. Use
    /// [`Orchestrator::pause_and_cancel`] to abort it as well.
    pub async fn pause(&self) {
        self.queue.lock().await.pause();
        tracing::info!("Session paused");
        self.emit_event(Event::Paused);
        self.persist().await;
    }

    /// Pause and abort the job in flight
    ///
    /// The in-flight job is put back at the front of the queue with its
    /// progress cleared *before* the executor is cancelled, so no work is
    /// lost. Neither counter changes. Returns whether a job was in flight.
    pub async fn pause_and_cancel(&self) -> bool {
        let cancelled = {
            let mut queue = self.queue.lock().await;
            queue.pause();

            let in_flight = lock(&self.session.in_flight)
                .as_ref()
                .map(|current| (current.job.clone(), current.cancel.clone()));

            match in_flight {
                Some((mut job, cancel)) => {
                    if job.requeue() {
                        let priority = front_priority(&queue, job.priority);
                        tracing::debug!(job_id = %job.id, priority, "Re-queueing in-flight job before cancel");
                        queue.enqueue(job, priority);
                    }
                    cancel.cancel();
                    true
                }
                None => false,
            }
        };

        tracing::info!(cancelled_in_flight = cancelled, "Session paused");
        self.emit_event(Event::Paused);
        self.persist().await;
        cancelled
    }

    /// Resume draining after a pause
    pub async fn resume(&self) {
        let has_work = {
            let mut queue = self.queue.lock().await;
            queue.resume();
            !queue.is_empty()
        };
        if has_work {
            self.session.is_active.store(true, Ordering::SeqCst);
        }

        tracing::info!(has_work, "Session resumed");
        self.emit_event(Event::Resumed);
        self.persist().await;
        self.kick();
    }

    /// Destructive stop: cancel in-flight work, drop pending retries, clear
    /// the queue and reset the counters
    ///
    /// Unlike pause this is not resumable; the cancelled job is not re-queued.
    pub async fn stop(&self) {
        self.session.is_active.store(false, Ordering::SeqCst);

        {
            let mut queue = self.queue.lock().await;
            if let Some(current) = lock(&self.session.in_flight).as_ref() {
                current.cancel.cancel();
            }
            for (_, retry) in lock(&self.session.pending_retries).drain() {
                retry.task.cancel();
            }
            queue.clear();
        }

        self.session.completed.store(0, Ordering::SeqCst);
        self.session.failed.store(0, Ordering::SeqCst);
        lock(&self.session.payloads).clear();

        tracing::info!("Session stopped and cleared");
        self.emit_event(Event::Stopped);
        self.emit_counters();
        self.persist().await;
    }

    /// Remove a queued job, or drop a failed job that is waiting for its retry
    ///
    /// The job is recorded in history as cancelled.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::NotFound` if the job is neither queued nor
    /// waiting for a retry.
    pub async fn remove(&self, id: &JobId) -> Result<()> {
        let removed = {
            let mut queue = self.queue.lock().await;
            match queue.remove(id) {
                Some(job) => Some(job),
                None => lock(&self.session.pending_retries)
                    .remove(id)
                    .map(|retry| {
                        retry.task.cancel();
                        retry.job
                    }),
            }
        };
        let Some(mut job) = removed else {
            return Err(QueueError::NotFound(id.clone()).into());
        };

        job.cancel();
        tracing::info!(job_id = %id, "Job removed");
        self.record_history(&job).await;
        self.emit_event(Event::JobRemoved { id: id.clone() });
        self.persist().await;
        Ok(())
    }

    /// Change a queued job's priority
    pub async fn reorder(&self, id: &JobId, priority: Priority) -> Result<()> {
        self.queue.lock().await.reorder(id, priority)?;
        tracing::debug!(job_id = %id, priority, "Job reordered");
        self.persist().await;
        Ok(())
    }

    /// Move a queued job to an absolute position (0 = next to run)
    pub async fn move_to_position(&self, id: &JobId, index: usize) -> Result<()> {
        self.queue.lock().await.move_to_position(id, index)?;
        tracing::debug!(job_id = %id, index, "Job moved");
        self.persist().await;
        Ok(())
    }

    /// Point-in-time view of counters, flags, queue and the job in flight
    pub async fn status(&self) -> SessionStatus {
        let stats = self.queue.lock().await.stats();
        let current = lock(&self.session.in_flight)
            .as_ref()
            .map(|current| CurrentJobInfo {
                id: current.job.id.clone(),
                title: current.job.payload.title.clone(),
                artist: current.job.payload.artist.clone(),
                status: current.job.status,
                status_text: current.job.status_text(),
                percent_complete: current.job.progress.percent_complete,
            });

        SessionStatus {
            counters: self.session.counters(),
            is_active: self.session.is_active.load(Ordering::SeqCst),
            is_paused: stats.is_paused,
            queue: stats,
            current,
            pending_retries: self.session.pending_retry_count(),
        }
    }

    /// Completed and failed counters
    pub fn counters(&self) -> Counters {
        self.session.counters()
    }

    /// Jobs waiting in the queue, in dequeue order
    pub async fn queued_jobs(&self) -> Vec<Job> {
        self.queue
            .lock()
            .await
            .items()
            .iter()
            .map(|item| item.job.clone())
            .collect()
    }

    /// Most recent jobs that left the system, newest first
    pub async fn history(&self, limit: usize) -> Result<Vec<HistoryEntry>> {
        self.db.query_history(None, limit, 0).await
    }

    /// Delete all history records; returns how many were removed
    pub async fn clear_history(&self) -> Result<u64> {
        let removed = self.db.clear_history().await?;
        tracing::info!(removed, "History cleared");
        Ok(removed)
    }
}
