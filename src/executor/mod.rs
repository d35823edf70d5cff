//! Download executor: drives one download through the external engine.
//!
//! - [`engine`] - Contract with the download engine
//! - [`monitor`] - Contract with the page inspector (monitoring context + readiness poll)
//! - [`path`] - Suggested path construction and segment sanitizing
//! - [`validation`] - Trusted-domain check for final download URLs
//!
//! An execution walks through these steps:
//! 1. Claim the executor (single flight, a second caller gets
//!    [`DownloadError::AlreadyInProgress`])
//! 2. Open a monitoring context and poll it until the link is ready or
//!    `ready_timeout` elapses
//! 3. Validate the final URL against the trusted domain
//! 4. Subscribe to engine updates, then submit
//! 5. Forward progress until the engine reports complete or interrupted
//!
//! The monitoring context is closed on every exit path.

pub mod engine;
pub mod monitor;
pub mod path;
pub mod validation;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod mocks;

pub use engine::{DownloadEngine, DownloadRequest, EngineState, EngineUpdate};
pub use monitor::{MonitorId, PageInspector, PageMetadata, ReadyCheck};
pub use path::{sanitize_segment, suggested_path};
pub use validation::validate_download_url;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::DownloadConfig;
use crate::error::{DownloadError, EngineError};
use crate::types::{DownloadResult, EngineDownloadId};

/// What to download
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadTarget {
    /// Resolved download link (opened in the monitoring context)
    pub url: String,
    /// Artist, used for the suggested path when the page has no metadata
    pub artist: String,
    /// Title, used for the suggested path when the page has no metadata
    pub title: String,
}

/// Progress snapshot passed to the caller's callback
#[derive(Clone, Debug, PartialEq)]
pub struct TransferProgress {
    /// Engine download id
    pub engine_download_id: EngineDownloadId,
    /// Cumulative bytes received
    pub bytes_received: u64,
    /// Total size, 0 when unknown
    pub total_bytes: u64,
    /// Rounded percentage, 0 when the total is unknown
    pub percent_complete: u8,
    /// Average rate since submission, bytes per second
    pub rate: f64,
}

impl TransferProgress {
    fn from_update(update: &EngineUpdate, elapsed: Duration) -> Self {
        let secs = elapsed.as_secs_f64();
        let rate = if secs > 0.0 {
            update.bytes_received as f64 / secs
        } else {
            0.0
        };
        Self {
            engine_download_id: update.id,
            bytes_received: update.bytes_received,
            total_bytes: update.total_bytes,
            percent_complete: crate::job::percent_of(update.bytes_received, update.total_bytes),
            rate,
        }
    }
}

#[derive(Debug)]
struct ActiveDownload {
    cancel_token: CancellationToken,
    engine_id: Option<EngineDownloadId>,
}

type ActiveSlot = Arc<Mutex<Option<ActiveDownload>>>;

/// Clears the active slot when the execution ends, including when the
/// execution future is dropped mid-flight.
struct ActiveGuard {
    slot: ActiveSlot,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = None;
        }
    }
}

/// Performs one external download at a time
#[derive(Clone)]
pub struct DownloadExecutor {
    engine: Arc<dyn DownloadEngine>,
    inspector: Arc<dyn PageInspector>,
    config: Arc<DownloadConfig>,
    active: ActiveSlot,
}

impl DownloadExecutor {
    /// Create an executor over the given collaborators
    pub fn new(
        engine: Arc<dyn DownloadEngine>,
        inspector: Arc<dyn PageInspector>,
        config: DownloadConfig,
    ) -> Self {
        Self {
            engine,
            inspector,
            config: Arc::new(config),
            active: Arc::new(Mutex::new(None)),
        }
    }

    /// Whether a download is in flight
    pub fn is_busy(&self) -> bool {
        self.active.lock().map(|slot| slot.is_some()).unwrap_or(false)
    }

    /// Engine id of the in-flight download, once submitted
    pub fn active_engine_id(&self) -> Option<EngineDownloadId> {
        self.active
            .lock()
            .ok()
            .and_then(|slot| slot.as_ref().and_then(|active| active.engine_id))
    }

    /// Cancel the in-flight download.
    ///
    /// The pending `execute` call stops polling, asks the engine to cancel,
    /// closes the monitoring context and returns [`DownloadError::Cancelled`].
    /// Returns whether anything was in flight.
    pub fn cancel(&self) -> bool {
        let Ok(slot) = self.active.lock() else {
            return false;
        };
        match slot.as_ref() {
            Some(active) => {
                tracing::debug!(engine_id = ?active.engine_id, "Cancelling in-flight download");
                active.cancel_token.cancel();
                true
            }
            None => false,
        }
    }

    fn claim(&self) -> Result<(ActiveGuard, CancellationToken), DownloadError> {
        let mut slot = self
            .active
            .lock()
            .map_err(|_| DownloadError::Monitor("executor state poisoned".to_string()))?;
        if slot.is_some() {
            return Err(DownloadError::AlreadyInProgress);
        }
        let token = CancellationToken::new();
        *slot = Some(ActiveDownload {
            cancel_token: token.clone(),
            engine_id: None,
        });
        Ok((
            ActiveGuard {
                slot: Arc::clone(&self.active),
            },
            token,
        ))
    }

    fn record_engine_id(&self, id: EngineDownloadId) {
        if let Ok(mut slot) = self.active.lock()
            && let Some(active) = slot.as_mut()
        {
            active.engine_id = Some(id);
        }
    }

    /// Run one download to completion.
    ///
    /// `on_progress` is called for every engine update concerning this
    /// download, including the final one.
    pub async fn execute<F>(
        &self,
        target: &DownloadTarget,
        mut on_progress: F,
    ) -> Result<DownloadResult, DownloadError>
    where
        F: FnMut(TransferProgress) + Send,
    {
        let (_guard, token) = self.claim()?;

        let monitor = self.inspector.open(&target.url).await?;
        tracing::debug!(monitor = %monitor, url = %target.url, "Monitoring context opened");

        let outcome = self
            .run_monitored(monitor, target, &token, &mut on_progress)
            .await;

        self.inspector.close(monitor).await;
        tracing::debug!(monitor = %monitor, "Monitoring context closed");

        outcome
    }

    async fn run_monitored<F>(
        &self,
        monitor: MonitorId,
        target: &DownloadTarget,
        token: &CancellationToken,
        on_progress: &mut F,
    ) -> Result<DownloadResult, DownloadError>
    where
        F: FnMut(TransferProgress) + Send,
    {
        let check = self.wait_until_ready(monitor, token).await?;

        let url = check.url.unwrap_or_else(|| target.url.clone());
        let url = validate_download_url(&url, &self.config.trusted_domain)?;

        let metadata = check.metadata.unwrap_or_default();
        let artist = metadata.artist.as_deref().unwrap_or(&target.artist);
        let title = metadata.title.as_deref().unwrap_or(&target.title);
        let request = DownloadRequest {
            url: url.to_string(),
            suggested_path: suggested_path(&self.config.download_folder, artist, title),
            save_as: false,
        };

        // Subscribe first: the engine may publish before submit returns
        let updates = self.engine.subscribe();
        if token.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        let id = self.engine.submit(request.clone()).await?;
        self.record_engine_id(id);
        tracing::info!(
            engine_id = %id,
            suggested_path = %request.suggested_path,
            "Download submitted to engine"
        );

        if token.is_cancelled() {
            self.cancel_engine(id).await;
            return Err(DownloadError::Cancelled);
        }

        self.track(id, updates, token, on_progress).await
    }

    async fn wait_until_ready(
        &self,
        monitor: MonitorId,
        token: &CancellationToken,
    ) -> Result<ReadyCheck, DownloadError> {
        let started = Instant::now();
        let mut ticker = tokio::time::interval(self.config.ready_poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let deadline = tokio::time::sleep(self.config.ready_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => return Err(DownloadError::Cancelled),
                _ = &mut deadline => {
                    let waited_ms = started.elapsed().as_millis() as u64;
                    tracing::warn!(monitor = %monitor, waited_ms, "Download link never became ready");
                    return Err(DownloadError::PreparationTimeout { waited_ms });
                }
                _ = ticker.tick() => {
                    match self.inspector.check_ready(monitor).await {
                        Ok(check) if check.ready => return Ok(check),
                        Ok(_) => tracing::trace!(monitor = %monitor, "Download link not ready yet"),
                        // The page may still be loading; keep polling until the deadline
                        Err(e) => tracing::debug!(monitor = %monitor, error = %e, "Readiness poll failed"),
                    }
                }
            }
        }
    }

    async fn track<F>(
        &self,
        id: EngineDownloadId,
        mut updates: broadcast::Receiver<EngineUpdate>,
        token: &CancellationToken,
        on_progress: &mut F,
    ) -> Result<DownloadResult, DownloadError>
    where
        F: FnMut(TransferProgress) + Send,
    {
        let started = Instant::now();
        loop {
            let received = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    self.cancel_engine(id).await;
                    return Err(DownloadError::Cancelled);
                }
                received = updates.recv() => received,
            };

            let update = match received {
                Ok(update) if update.id == id => update,
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(engine_id = %id, skipped, "Engine updates lagged");
                    continue;
                }
                Err(RecvError::Closed) => {
                    return Err(EngineError::Unavailable(
                        "engine notification stream closed".to_string(),
                    )
                    .into());
                }
            };

            match &update.state {
                EngineState::InProgress => {
                    on_progress(TransferProgress::from_update(&update, started.elapsed()));
                }
                EngineState::Complete => {
                    on_progress(TransferProgress::from_update(&update, started.elapsed()));
                    tracing::info!(engine_id = %id, filename = ?update.filename, "Engine download complete");
                    return Ok(DownloadResult {
                        engine_download_id: id,
                        filename: update.filename,
                    });
                }
                EngineState::Interrupted { reason } => {
                    tracing::warn!(engine_id = %id, reason = %reason, "Engine download interrupted");
                    return Err(DownloadError::Interrupted {
                        reason: reason.clone(),
                    });
                }
            }
        }
    }

    /// Best-effort engine cancel; a download the engine has not registered
    /// yet is not an error.
    async fn cancel_engine(&self, id: EngineDownloadId) {
        match self.engine.cancel(id).await {
            Ok(()) => tracing::debug!(engine_id = %id, "Engine download cancelled"),
            Err(EngineError::NotInProgress(_)) => {
                tracing::debug!(engine_id = %id, "Engine had no in-progress download to cancel")
            }
            Err(e) => tracing::warn!(engine_id = %id, error = %e, "Engine cancel failed"),
        }
    }
}
