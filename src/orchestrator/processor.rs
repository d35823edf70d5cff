//! The drain loop: one job at a time, from dequeue to outcome bookkeeping.

use std::sync::atomic::Ordering;

use tokio_util::sync::CancellationToken;

use crate::db::NewHistoryEntry;
use crate::error::{DownloadError, Error, JobFailure, Result};
use crate::executor::{DownloadTarget, TransferProgress};
use crate::job::{Job, ProgressDelta};
use crate::queue::Lease;
use crate::resolver::resolve_download_url;
use crate::retry::{IsRetryable, with_jitter};
use crate::timer::schedule_after;
use crate::types::{DownloadResult, Event, JobId};

use super::{InFlight, Orchestrator, PendingRetry, front_priority, lock};

/// Result of one pass through the loop
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Step {
    /// A job was taken and handled
    Processed,
    /// Nothing to do (inactive, paused, shutting down or empty)
    Idle,
}

impl Orchestrator {
    /// Start the drain loop unless it is already running
    pub(crate) fn kick(&self) {
        if !self.session.is_active.load(Ordering::SeqCst) {
            return;
        }
        if self
            .session
            .processing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let orchestrator = self.clone();
        tokio::spawn(async move {
            orchestrator.drain().await;
        });
    }

    async fn drain(&self) {
        tracing::debug!("Drain loop started");
        while self.process_next().await == Step::Processed {
            tokio::time::sleep(self.config.orchestrator.inter_job_delay).await;
        }
        self.session.processing.store(false, Ordering::SeqCst);
        tracing::debug!("Drain loop stopped");

        // Work may have arrived between the last dequeue and clearing the flag
        if self.has_runnable_work().await {
            self.kick();
        }
    }

    async fn has_runnable_work(&self) -> bool {
        if !self.session.is_active.load(Ordering::SeqCst)
            || !self.session.accepting_new.load(Ordering::SeqCst)
        {
            return false;
        }
        let queue = self.queue.lock().await;
        !queue.is_paused() && !queue.is_empty()
    }

    /// Take the next job and drive it to an outcome
    pub(crate) async fn process_next(&self) -> Step {
        if !self.session.is_active.load(Ordering::SeqCst)
            || !self.session.accepting_new.load(Ordering::SeqCst)
        {
            return Step::Idle;
        }

        let cancel = CancellationToken::new();
        let lease = {
            let mut queue = self.queue.lock().await;
            if queue.is_paused() {
                return Step::Idle;
            }
            match queue.dequeue() {
                Ok(Some(lease)) => {
                    // Set under the queue lock; stop() and pause_and_cancel() read it there
                    *lock(&self.session.in_flight) = Some(InFlight {
                        job: lease.job().clone(),
                        cancel: cancel.clone(),
                    });
                    lease
                }
                Ok(None) => {
                    // Checked under the queue lock: a retry timer enqueues
                    // and deregisters while holding it
                    let drained = self.session.pending_retry_count() == 0;
                    if drained {
                        self.session.is_active.store(false, Ordering::SeqCst);
                    }
                    drop(queue);
                    self.on_queue_empty(drained).await;
                    return Step::Idle;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Dequeue refused while a lease is outstanding");
                    return Step::Idle;
                }
            }
        };

        tracing::info!(
            job_id = %lease.id(),
            title = %lease.job().payload.title,
            retry_count = lease.job().retry_count,
            "Job dequeued"
        );
        self.persist().await;

        let outcome = self.attempt(&cancel).await;
        let job = lock(&self.session.in_flight)
            .take()
            .map(|in_flight| in_flight.job)
            .unwrap_or_else(|| lease.job().clone());

        match outcome {
            Ok(result) => self.on_success(lease, job, result).await,
            Err(Error::Download(DownloadError::Cancelled)) => self.on_cancelled(lease, job).await,
            // An engine interruption caused by our own cancel is still a cancellation
            Err(_) if cancel.is_cancelled() => self.on_cancelled(lease, job).await,
            Err(e) => self.on_failure(lease, job, e).await,
        }

        self.persist().await;
        Step::Processed
    }

    async fn on_queue_empty(&self, drained: bool) {
        if drained {
            tracing::info!("Queue drained");
            self.emit_event(Event::QueueEmpty);
        } else {
            tracing::debug!("Queue empty, waiting for scheduled retries");
        }
        self.persist().await;
    }

    fn update_in_flight<R>(&self, f: impl FnOnce(&mut Job) -> R) -> Option<R> {
        lock(&self.session.in_flight)
            .as_mut()
            .map(|in_flight| f(&mut in_flight.job))
    }

    /// Resolve the link if needed, start the job and run the executor
    async fn attempt(&self, cancel: &CancellationToken) -> Result<DownloadResult> {
        let payload = self
            .update_in_flight(|job| job.payload.clone())
            .ok_or_else(|| Error::Other("in-flight job vanished".to_string()))?;

        let url = match payload.download_url {
            Some(url) => url,
            None => {
                let url = resolve_download_url(
                    self.resolver.as_ref(),
                    &payload.source_url,
                    &self.config.link_resolution,
                    cancel,
                )
                .await?;
                self.update_in_flight(|job| job.payload.download_url = Some(url.clone()));
                url
            }
        };

        if cancel.is_cancelled() {
            return Err(DownloadError::Cancelled.into());
        }

        let id = self
            .update_in_flight(|job| job.start().map(|()| job.id.clone()))
            .ok_or_else(|| Error::Other("in-flight job vanished".to_string()))??;
        tracing::info!(job_id = %id, url = %url, "Job started");
        self.emit_event(Event::JobStarted { id: id.clone() });

        let target = DownloadTarget {
            url,
            artist: payload.artist,
            title: payload.title,
        };

        let in_flight = std::sync::Arc::clone(&self.session.in_flight);
        let event_tx = self.event_tx.clone();
        let on_progress = move |progress: TransferProgress| {
            let applied = lock(&in_flight).as_mut().is_some_and(|current| {
                current.job.update_progress(&ProgressDelta {
                    bytes_received: Some(progress.bytes_received),
                    total_bytes: Some(progress.total_bytes),
                    rate: Some(progress.rate),
                })
            });
            if applied {
                event_tx
                    .send(Event::JobProgress {
                        id: id.clone(),
                        bytes_received: progress.bytes_received,
                        total_bytes: progress.total_bytes,
                        percent_complete: progress.percent_complete,
                    })
                    .ok();
            }
        };

        let execution = self.executor.execute(&target, on_progress);
        tokio::pin!(execution);

        // Polling the execution first claims the executor before a
        // cancellation can be forwarded to it
        let result = tokio::select! {
            biased;
            result = &mut execution => result,
            _ = cancel.cancelled() => {
                self.executor.cancel();
                execution.await
            }
        };

        Ok(result?)
    }

    async fn on_success(&self, lease: Lease, mut job: Job, result: DownloadResult) {
        job.complete(&result);

        {
            let mut queue = self.queue.lock().await;
            if let Err(e) = queue.complete_current(lease, result) {
                tracing::debug!(job_id = %job.id, error = %e, "Dropping outcome for a cleared queue");
                return;
            }
            // A pause_and_cancel that lost the race re-queued a copy
            if queue.remove(&job.id).is_some() {
                tracing::debug!(job_id = %job.id, "Dropped re-queued copy of a completed job");
            }
        }

        // History first: a bumped counter implies the row is readable
        self.record_history(&job).await;
        self.session.completed.fetch_add(1, Ordering::SeqCst);
        tracing::info!(
            job_id = %job.id,
            filename = ?job.filename,
            retry_count = job.retry_count,
            "Job completed"
        );

        self.emit_event(Event::JobCompleted {
            id: job.id.clone(),
            filename: job.filename.clone(),
        });
        self.emit_counters();
    }

    async fn on_cancelled(&self, lease: Lease, mut job: Job) {
        {
            let mut queue = self.queue.lock().await;
            if let Err(e) = queue.release_current(lease) {
                tracing::debug!(job_id = %job.id, error = %e, "Cancelled job belongs to a cleared queue");
                return;
            }

            // pause_and_cancel re-queues before cancelling; anything else
            // that cancelled us gets the same treatment here
            if !queue.contains(&job.id) && job.requeue() {
                let priority = front_priority(&queue, job.priority);
                queue.enqueue(job.clone(), priority);
            }
        }

        tracing::info!(job_id = %job.id, "Job cancelled and returned to the queue");
        self.emit_event(Event::JobCancelled { id: job.id });
    }

    async fn on_failure(&self, lease: Lease, mut job: Job, error: Error) {
        let failure = JobFailure::from(&error);
        job.fail(failure.clone(), error.is_retryable());

        let released = self.queue.lock().await.fail_current(lease, failure.clone());
        if let Err(e) = released {
            tracing::debug!(job_id = %job.id, error = %e, "Dropping outcome for a cleared queue");
            return;
        }

        let will_retry = job.can_be_retried();
        if !will_retry {
            self.record_history(&job).await;
        }
        self.session.failed.fetch_add(1, Ordering::SeqCst);
        tracing::warn!(
            job_id = %job.id,
            kind = ?failure.kind,
            error = %error,
            retry_count = job.retry_count,
            will_retry,
            "Job failed"
        );

        self.emit_event(Event::JobFailed {
            id: job.id.clone(),
            kind: failure.kind,
            error: failure.message,
            will_retry,
            status_text: job.status_text(),
        });
        self.emit_counters();

        if will_retry {
            self.schedule_retry(job);
        }
    }

    fn schedule_retry(&self, job: Job) {
        let delay = with_jitter(job.retry_delay_with(&self.config.retry), &self.config.retry);
        let id = job.id.clone();
        let attempt = job.retry_count + 1;

        {
            // Registered before the timer can possibly fire and deregister
            let mut pending = lock(&self.session.pending_retries);
            let orchestrator = self.clone();
            let retry_id = id.clone();
            let task = schedule_after(delay, async move {
                orchestrator.enqueue_retry(retry_id).await;
            });
            if let Some(previous) = pending.insert(id.clone(), PendingRetry { job, task }) {
                previous.task.cancel();
            }
        }

        tracing::info!(
            job_id = %id,
            delay_ms = delay.as_millis() as u64,
            attempt,
            "Retry scheduled"
        );
        self.emit_event(Event::JobRetryScheduled {
            id,
            delay_ms: delay.as_millis() as u64,
            attempt,
        });
    }

    /// Timer callback: move the failed job back into the queue, one tier up
    async fn enqueue_retry(&self, id: JobId) {
        let (job, priority) = {
            let mut queue = self.queue.lock().await;
            // Deregistered under the queue lock so the drain loop never sees
            // an empty queue and no pending retry in between
            let Some(PendingRetry { mut job, .. }) = lock(&self.session.pending_retries).remove(&id)
            else {
                return;
            };
            job.increment_retry();
            let priority = job.priority.saturating_add(1);
            queue.enqueue(job.clone(), priority);
            (job, priority)
        };

        tracing::info!(
            job_id = %job.id,
            retry_count = job.retry_count,
            priority,
            "Retry re-queued"
        );
        self.emit_event(Event::JobQueued {
            id: job.id.clone(),
            title: job.payload.title.clone(),
            priority,
        });
        self.persist().await;
        self.kick();
    }

    pub(crate) async fn record_history(&self, job: &Job) {
        if let Err(e) = self.db.insert_history(&NewHistoryEntry::from_job(job)).await {
            tracing::warn!(job_id = %job.id, error = %e, "Failed to record job history");
        }
    }
}
