//! Startup and shutdown coordination.

use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::error::Result;
use crate::types::Event;

use super::{Orchestrator, front_priority, lock};

/// How long shutdown waits for the drain loop to wind down
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Poll interval while waiting for the drain loop
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(50);

impl Orchestrator {
    /// Gracefully shut down the orchestrator
    ///
    /// This method performs a graceful shutdown sequence:
    /// 1. Stops accepting new submissions and new dequeues
    /// 2. Re-queues the in-flight job at the front, then cancels it
    /// 3. Moves failed jobs waiting for a backoff timer back into the queue
    /// 4. Waits for the drain loop to stop (30 second timeout)
    /// 5. Persists final state and marks the shutdown as clean
    ///
    /// The session keeps its active flag, so the next process resumes
    /// draining on its own.
    ///
    /// # Errors
    ///
    /// Returns an error if marking the clean shutdown fails. Every other step
    /// is attempted regardless.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        // 1. Stop accepting new work
        self.session.accepting_new.store(false, Ordering::SeqCst);

        // 2 + 3. Re-queue everything that would otherwise be lost
        {
            let mut queue = self.queue.lock().await;

            let in_flight = lock(&self.session.in_flight)
                .as_ref()
                .map(|current| (current.job.clone(), current.cancel.clone()));
            if let Some((mut job, cancel)) = in_flight {
                if job.requeue() {
                    let priority = front_priority(&queue, job.priority);
                    queue.enqueue(job, priority);
                }
                cancel.cancel();
                tracing::info!("Cancelled in-flight job for shutdown");
            }

            let retries: Vec<_> = lock(&self.session.pending_retries).drain().collect();
            for (id, retry) in retries {
                retry.task.cancel();
                let mut job = retry.job;
                job.increment_retry();
                let priority = job.priority.saturating_add(1);
                tracing::debug!(job_id = %id, priority, "Re-queueing pending retry for shutdown");
                queue.enqueue(job, priority);
            }
        }

        // 4. Wait for the drain loop
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.wait_for_drain_loop()).await {
            Ok(()) => tracing::info!("Drain loop stopped"),
            Err(_) => {
                tracing::warn!("Timeout waiting for the drain loop, proceeding with shutdown")
            }
        }

        // 5. Persist final state
        self.persist().await;
        tracing::info!("Final state persisted to database");

        self.db.set_clean_shutdown().await.inspect_err(|e| {
            tracing::error!(error = %e, "Failed to mark clean shutdown in database");
        })?;

        self.emit_event(Event::Shutdown);
        tracing::info!("Graceful shutdown complete");
        Ok(())
    }

    async fn wait_for_drain_loop(&self) {
        while self.session.processing.load(Ordering::SeqCst) {
            tokio::time::sleep(SHUTDOWN_POLL_INTERVAL).await;
        }
    }
}
