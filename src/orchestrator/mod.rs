//! The scheduling core: drives queued jobs through the download executor.
//!
//! The `Orchestrator` struct and its methods are organized by domain:
//! - [`control`] - Submission, pause/resume/stop, queue editing, status
//! - [`processor`] - The single-flight drain loop and outcome bookkeeping
//! - [`persistence`] - Snapshot writes and restore at startup
//! - [`lifecycle`] - Graceful shutdown
//!
//! There is exactly one drain loop per orchestrator. It dequeues a job,
//! resolves its download link if needed, hands it to the executor and then
//! interprets the outcome:
//!
//! - success completes the job and bumps the completed counter
//! - cancellation is neutral: the job goes back to the queue ahead of
//!   everything else and no counter moves
//! - any other failure bumps the failed counter; retryable failures are
//!   re-enqueued one priority tier higher after an exponential backoff
//!
//! Queue and session state are written to SQLite after every mutation so a
//! restarted process picks up where the previous one stopped.

mod control;
mod lifecycle;
mod persistence;
mod processor;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::db::Database;
use crate::error::Result;
use crate::executor::{DownloadEngine, DownloadExecutor, PageInspector};
use crate::job::Job;
use crate::queue::{JobQueue, QueueEvent};
use crate::resolver::LinkResolver;
use crate::timer::ScheduledTask;
use crate::types::{Counters, Event, JobId, Payload, Priority};

/// Capacity of the orchestrator event channel
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// External collaborators the orchestrator drives
#[derive(Clone)]
pub struct Collaborators {
    /// Browser download engine
    pub engine: Arc<dyn DownloadEngine>,
    /// Page inspector used for the monitoring context and readiness polls
    pub inspector: Arc<dyn PageInspector>,
    /// Page scraper that turns purchase pages into download links
    pub resolver: Arc<dyn LinkResolver>,
}

/// The job being worked on right now
#[derive(Debug)]
pub(crate) struct InFlight {
    pub(crate) job: Job,
    pub(crate) cancel: CancellationToken,
}

/// A failed job waiting for its backoff timer
#[derive(Debug)]
pub(crate) struct PendingRetry {
    pub(crate) job: Job,
    pub(crate) task: ScheduledTask,
}

/// Session-wide flags, counters and bookkeeping
#[derive(Clone)]
pub(crate) struct SessionState {
    /// Jobs finished successfully
    pub(crate) completed: Arc<AtomicU64>,
    /// Failed attempts (cancellations never count)
    pub(crate) failed: Arc<AtomicU64>,
    /// Whether the session is meant to be draining
    pub(crate) is_active: Arc<AtomicBool>,
    /// Reentrancy guard: true while a drain loop is running
    pub(crate) processing: Arc<AtomicBool>,
    /// Cleared during shutdown; the loop and `submit` stop accepting work
    pub(crate) accepting_new: Arc<AtomicBool>,
    /// Job currently leased from the queue
    pub(crate) in_flight: Arc<Mutex<Option<InFlight>>>,
    /// Retries waiting for their backoff timer
    pub(crate) pending_retries: Arc<Mutex<HashMap<JobId, PendingRetry>>>,
    /// Payloads submitted during this session
    pub(crate) payloads: Arc<Mutex<Vec<Payload>>>,
    /// Serializes snapshot writes so an older snapshot never lands last
    pub(crate) persist_lock: Arc<tokio::sync::Mutex<()>>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            completed: Arc::new(AtomicU64::new(0)),
            failed: Arc::new(AtomicU64::new(0)),
            is_active: Arc::new(AtomicBool::new(false)),
            processing: Arc::new(AtomicBool::new(false)),
            accepting_new: Arc::new(AtomicBool::new(true)),
            in_flight: Arc::new(Mutex::new(None)),
            pending_retries: Arc::new(Mutex::new(HashMap::new())),
            payloads: Arc::new(Mutex::new(Vec::new())),
            persist_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub(crate) fn counters(&self) -> Counters {
        Counters {
            completed: self.completed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }

    pub(crate) fn pending_retry_count(&self) -> usize {
        let mut pending = lock(&self.pending_retries);
        pending.retain(|_, retry| !retry.task.is_finished());
        pending.len()
    }
}

/// Lock a std mutex, recovering the data if a panicking holder poisoned it
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Priority that puts a job in front of everything currently queued
pub(crate) fn front_priority(queue: &JobQueue, own: Priority) -> Priority {
    queue
        .highest_priority()
        .map_or(own, |top| top.max(own))
        .saturating_add(1)
}

/// Download orchestrator (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct Orchestrator {
    /// Database instance for persistence
    /// Public for integration tests to inspect stored state
    pub db: Arc<Database>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Configuration
    pub(crate) config: Arc<Config>,
    /// Priority queue of waiting jobs
    pub(crate) queue: Arc<tokio::sync::Mutex<JobQueue>>,
    /// Single-flight download executor
    pub(crate) executor: DownloadExecutor,
    /// Link resolution collaborator
    pub(crate) resolver: Arc<dyn LinkResolver>,
    /// Flags, counters and in-flight bookkeeping
    pub(crate) session: SessionState,
}

impl Orchestrator {
    /// Create a new orchestrator
    ///
    /// This opens (or creates) the SQLite database, restores the queue and
    /// session record left by the previous process and, if that session was
    /// still draining, starts draining again.
    pub async fn new(config: Config, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;

        let db = Database::new(&config.persistence.database_path).await?;
        let was_unclean = db.was_unclean_shutdown().await?;

        // Mark that we're starting up (for unclean shutdown detection)
        db.set_clean_start().await?;

        let orchestrator = Self::from_parts(db, config, collaborators);
        orchestrator.restore(was_unclean).await?;

        Ok(orchestrator)
    }

    pub(crate) fn from_parts(db: Database, config: Config, collaborators: Collaborators) -> Self {
        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let executor = DownloadExecutor::new(
            collaborators.engine,
            collaborators.inspector,
            config.download.clone(),
        );

        Self {
            db: Arc::new(db),
            event_tx,
            config: Arc::new(config),
            queue: Arc::new(tokio::sync::Mutex::new(JobQueue::new())),
            executor,
            resolver: collaborators.resolver,
            session: SessionState::new(),
        }
    }

    /// Subscribe to orchestrator events
    ///
    /// Multiple subscribers are supported. A subscriber that falls more than
    /// 1000 events behind receives `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Subscribe to the queue's own change notifications
    pub async fn queue_events(&self) -> broadcast::Receiver<QueueEvent> {
        self.queue.lock().await.subscribe()
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Emit an event to all subscribers
    ///
    /// If nobody is listening the event is dropped.
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    pub(crate) fn emit_counters(&self) {
        let counters = self.session.counters();
        self.emit_event(Event::CountersChanged {
            completed: counters.completed,
            failed: counters.failed,
        });
    }
}
