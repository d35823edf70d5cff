//! Durable session state: queue snapshot, session record and restore.

use std::sync::atomic::Ordering;

use crate::error::Result;
use crate::queue::QueueSnapshot;
use crate::types::{Event, SessionRecord};

use super::{Orchestrator, front_priority, lock};

impl Orchestrator {
    /// Write the queue snapshot and session record.
    ///
    /// Persistence failures are logged and never interrupt the caller; the
    /// next mutation writes a fresh snapshot anyway.
    pub(crate) async fn persist(&self) {
        if let Err(e) = self.try_persist().await {
            tracing::warn!(error = %e, "Failed to persist session state");
        }
    }

    async fn try_persist(&self) -> Result<()> {
        let _guard = self.session.persist_lock.lock().await;

        let (snapshot, is_paused) = {
            let queue = self.queue.lock().await;
            (queue.serialize(), queue.is_paused())
        };
        let record = self.session_record(is_paused);

        self.db
            .save_state(&self.config.persistence.queue_key, &snapshot.to_json()?)
            .await?;
        self.db
            .save_state(
                &self.config.persistence.session_key,
                &serde_json::to_string(&record)?,
            )
            .await?;

        tracing::trace!(
            queued = snapshot.queue.len(),
            has_current = snapshot.current_job.is_some(),
            "Session state persisted"
        );
        Ok(())
    }

    fn session_record(&self, is_paused: bool) -> SessionRecord {
        let counters = self.session.counters();
        SessionRecord {
            completed: counters.completed,
            failed: counters.failed,
            is_active: self.session.is_active.load(Ordering::SeqCst),
            is_paused,
            payloads: lock(&self.session.payloads).clone(),
            pending_retries: lock(&self.session.pending_retries)
                .values()
                .map(|retry| retry.job.clone())
                .collect(),
        }
    }

    /// Rebuild queue and counters from the previous process
    pub(crate) async fn restore(&self, was_unclean: bool) -> Result<()> {
        let persistence = &self.config.persistence;
        let snapshot = self.db.load_state(&persistence.queue_key).await?;
        let record = match self.db.load_state(&persistence.session_key).await? {
            Some(json) => serde_json::from_str::<SessionRecord>(&json).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Discarding unreadable session record");
                SessionRecord::default()
            }),
            None => SessionRecord::default(),
        };

        if was_unclean && snapshot.is_some() {
            tracing::warn!("Previous session did not shut down cleanly, recovering state");
        }

        let (queued, is_paused) = {
            let mut queue = self.queue.lock().await;
            queue.restore(
                snapshot
                    .as_deref()
                    .map(QueueSnapshot::from_json_lossy)
                    .unwrap_or_default(),
            );

            // A current job in the snapshot was in flight when the process died
            if let Some(orphan) = queue.take_orphaned_current() {
                let mut job = orphan.job;
                if job.requeue() {
                    let priority = front_priority(&queue, orphan.priority);
                    tracing::info!(
                        job_id = %job.id,
                        priority,
                        "Re-queueing job that was in flight at last exit"
                    );
                    queue.enqueue(job, priority);
                } else {
                    tracing::debug!(job_id = %job.id, "Dropping finished job left as current");
                }
            }

            // Backoff timers died with the previous process; retry right away
            for mut job in record.pending_retries {
                job.increment_retry();
                let priority = job.priority.saturating_add(1);
                tracing::info!(
                    job_id = %job.id,
                    retry_count = job.retry_count,
                    priority,
                    "Re-queueing retry that was waiting at last exit"
                );
                queue.enqueue(job, priority);
            }

            (queue.len(), queue.is_paused())
        };

        self.session
            .completed
            .store(record.completed, Ordering::SeqCst);
        self.session.failed.store(record.failed, Ordering::SeqCst);
        *lock(&self.session.payloads) = record.payloads;

        let resume = record.is_active && !is_paused && queued > 0;
        self.session
            .is_active
            .store(record.is_active && queued > 0, Ordering::SeqCst);

        tracing::info!(
            queued,
            completed = record.completed,
            failed = record.failed,
            is_paused,
            resumed = resume,
            "Session state restored"
        );

        self.persist().await;
        self.emit_event(Event::Restored {
            queued,
            resumed: resume,
        });

        if resume {
            self.kick();
        }

        Ok(())
    }
}
