//! # collection-dl
//!
//! Backend library that bulk-downloads a purchased music collection, one
//! release at a time.
//!
//! Purchases are submitted as [`Payload`]s and become [`Job`]s in a persistent
//! priority queue. A single drain loop takes the front job, resolves its
//! download link when needed, hands it to the [`DownloadExecutor`] and books
//! the outcome: completed jobs land in history, failed jobs are retried with
//! exponential backoff one priority tier up, cancelled jobs go back to the
//! front of the queue.
//!
//! The outside world is reached through three traits the embedding
//! application implements:
//! - [`DownloadEngine`] - submits downloads and publishes their progress
//! - [`PageInspector`] - watches a download page until its link is ready
//! - [`LinkResolver`] - turns a purchase page into a download link
//!
//! Queue and counters are persisted to SQLite after every mutation, so a
//! crashed or restarted process picks up where it left off.
//!
//! ## Quick Start
//!
//! ```no_run
//! use collection_dl::{Collaborators, Config, Orchestrator, Payload};
//!
//! # async fn example(collaborators: Collaborators) -> Result<(), Box<dyn std::error::Error>> {
//! let orchestrator = Orchestrator::new(Config::default(), collaborators).await?;
//!
//! // Subscribe to events
//! let mut events = orchestrator.subscribe();
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         println!("Event: {:?}", event);
//!     }
//! });
//!
//! orchestrator
//!     .submit(
//!         vec![Payload::new(
//!             "Album",
//!             "Artist",
//!             "https://artist.bandcamp.com/album/album",
//!         )],
//!         None,
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Error types
pub mod error;
/// Single-download executor and its collaborator contracts
pub mod executor;
/// Job state machine
pub mod job;
/// Session orchestration (decomposed into focused submodules)
pub mod orchestrator;
/// Persistent priority queue
pub mod queue;
/// Download link resolution
pub mod resolver;
/// Retry logic with exponential backoff
pub mod retry;
/// Cancellable one-shot timers
pub mod timer;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use config::{
    Config, DownloadConfig, LinkResolutionConfig, OrchestratorConfig, PersistenceConfig,
    RetryConfig,
};
pub use db::Database;
pub use error::{
    DatabaseError, DownloadError, EngineError, Error, ErrorKind, JobError, JobFailure,
    QueueError, Result,
};
pub use executor::{
    DownloadEngine, DownloadExecutor, DownloadRequest, DownloadTarget, EngineState,
    EngineUpdate, MonitorId, PageInspector, PageMetadata, ReadyCheck, TransferProgress,
};
pub use job::{Job, JobStatus, Progress};
pub use orchestrator::{Collaborators, Orchestrator};
pub use queue::{JobQueue, QueueEvent};
pub use resolver::{LinkResolver, LinkResponse};
pub use types::{
    Counters, CurrentJobInfo, DownloadResult, EngineDownloadId, Event, HistoryEntry, JobId,
    Payload, Priority, QueueStats, SessionStatus,
};

/// Run the orchestrator until a termination signal arrives, then shut it down.
///
/// Waits for a signal and then calls [`Orchestrator::shutdown`], which puts
/// any in-flight job back into the persisted queue.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use collection_dl::{Collaborators, Config, Orchestrator, run_with_shutdown};
///
/// # async fn example(collaborators: Collaborators) -> Result<(), Box<dyn std::error::Error>> {
/// let orchestrator = Orchestrator::new(Config::default(), collaborators).await?;
///
/// // Run with automatic signal handling
/// run_with_shutdown(orchestrator).await?;
/// # Ok(())
/// # }
/// ```
pub async fn run_with_shutdown(orchestrator: Orchestrator) -> Result<()> {
    wait_for_signal().await;
    orchestrator.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
