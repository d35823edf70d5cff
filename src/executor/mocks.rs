//! Scripted in-memory collaborators for executor and orchestrator tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};

use tokio::sync::broadcast;

use super::engine::{DownloadEngine, DownloadRequest, EngineState, EngineUpdate};
use super::monitor::{MonitorId, PageInspector, PageMetadata, ReadyCheck};
use crate::error::{DownloadError, EngineError};
use crate::types::EngineDownloadId;

/// Size every scripted download pretends to have
pub(crate) const MOCK_TOTAL_BYTES: u64 = 10_000;

/// How the mock engine reacts to the next submission
#[derive(Clone, Debug)]
pub(crate) enum EngineScript {
    /// Publish half progress, then complete with this filename
    Complete(&'static str),
    /// Publish half progress, then an interruption
    Interrupt(&'static str),
    /// Publish half progress and nothing else (until cancelled)
    Hang,
    /// Refuse the submission
    Reject(&'static str),
}

/// Engine that publishes scripted updates synchronously inside `submit`
pub(crate) struct MockEngine {
    updates: broadcast::Sender<EngineUpdate>,
    next_id: AtomicI64,
    scripts: Mutex<VecDeque<EngineScript>>,
    submitted: Mutex<Vec<DownloadRequest>>,
    cancelled: Mutex<Vec<EngineDownloadId>>,
    cancel_not_in_progress: bool,
}

impl MockEngine {
    /// Engine that completes every download
    pub(crate) fn new() -> Self {
        let (updates, _rx) = broadcast::channel(64);
        Self {
            updates,
            next_id: AtomicI64::new(1),
            scripts: Mutex::new(VecDeque::new()),
            submitted: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            cancel_not_in_progress: false,
        }
    }

    /// Queue behaviors for upcoming submissions (default: complete)
    pub(crate) fn with_scripts(self, scripts: impl IntoIterator<Item = EngineScript>) -> Self {
        self.scripts.lock().unwrap().extend(scripts);
        self
    }

    /// Make `cancel` answer `NotInProgress`, as when the engine has not registered the download
    pub(crate) fn cancel_reports_not_in_progress(mut self) -> Self {
        self.cancel_not_in_progress = true;
        self
    }

    pub(crate) fn push_script(&self, script: EngineScript) {
        self.scripts.lock().unwrap().push_back(script);
    }

    pub(crate) fn submitted(&self) -> Vec<DownloadRequest> {
        self.submitted.lock().unwrap().clone()
    }

    pub(crate) fn cancelled(&self) -> Vec<EngineDownloadId> {
        self.cancelled.lock().unwrap().clone()
    }

    fn publish(&self, id: EngineDownloadId, state: EngineState, bytes: u64, filename: Option<&str>) {
        self.updates
            .send(EngineUpdate {
                id,
                state,
                bytes_received: bytes,
                total_bytes: MOCK_TOTAL_BYTES,
                filename: filename.map(str::to_string),
            })
            .ok();
    }
}

#[async_trait::async_trait]
impl DownloadEngine for MockEngine {
    async fn submit(&self, request: DownloadRequest) -> Result<EngineDownloadId, EngineError> {
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(EngineScript::Complete("download.zip"));
        if let EngineScript::Reject(reason) = &script {
            return Err(EngineError::Rejected(reason.to_string()));
        }

        self.submitted.lock().unwrap().push(request);
        let id = EngineDownloadId(self.next_id.fetch_add(1, Ordering::SeqCst));

        // Noise for another download must be ignored by the executor
        self.publish(EngineDownloadId(-1), EngineState::Complete, 1, None);
        self.publish(id, EngineState::InProgress, MOCK_TOTAL_BYTES / 2, None);
        match script {
            EngineScript::Complete(filename) => {
                self.publish(id, EngineState::Complete, MOCK_TOTAL_BYTES, Some(filename));
            }
            EngineScript::Interrupt(reason) => {
                self.publish(
                    id,
                    EngineState::Interrupted {
                        reason: reason.to_string(),
                    },
                    MOCK_TOTAL_BYTES / 2,
                    None,
                );
            }
            EngineScript::Hang | EngineScript::Reject(_) => {}
        }
        Ok(id)
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineUpdate> {
        self.updates.subscribe()
    }

    async fn cancel(&self, id: EngineDownloadId) -> Result<(), EngineError> {
        self.cancelled.lock().unwrap().push(id);
        if self.cancel_not_in_progress {
            Err(EngineError::NotInProgress(id.0))
        } else {
            Ok(())
        }
    }
}

/// Inspector that reports ready after a fixed number of negative polls
pub(crate) struct MockInspector {
    not_ready_polls: u32,
    never_ready: bool,
    ready_url: Option<String>,
    metadata: Option<PageMetadata>,
    fail_open: bool,
    next_id: AtomicU64,
    polls: AtomicU32,
    opened: AtomicU32,
    closed: AtomicU32,
}

impl MockInspector {
    /// Ready on the first poll, reporting the opened URL back
    pub(crate) fn ready() -> Self {
        Self {
            not_ready_polls: 0,
            never_ready: false,
            ready_url: None,
            metadata: None,
            fail_open: false,
            next_id: AtomicU64::new(1),
            polls: AtomicU32::new(0),
            opened: AtomicU32::new(0),
            closed: AtomicU32::new(0),
        }
    }

    /// Never ready
    pub(crate) fn never_ready() -> Self {
        Self {
            never_ready: true,
            ..Self::ready()
        }
    }

    /// `open` fails
    pub(crate) fn failing_open() -> Self {
        Self {
            fail_open: true,
            ..Self::ready()
        }
    }

    pub(crate) fn ready_after(mut self, not_ready_polls: u32) -> Self {
        self.not_ready_polls = not_ready_polls;
        self
    }

    pub(crate) fn with_url(mut self, url: &str) -> Self {
        self.ready_url = Some(url.to_string());
        self
    }

    pub(crate) fn with_metadata(mut self, artist: &str, title: &str) -> Self {
        self.metadata = Some(PageMetadata {
            artist: Some(artist.to_string()),
            title: Some(title.to_string()),
        });
        self
    }

    pub(crate) fn polls(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }

    pub(crate) fn opened(&self) -> u32 {
        self.opened.load(Ordering::SeqCst)
    }

    pub(crate) fn closed(&self) -> u32 {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl PageInspector for MockInspector {
    async fn open(&self, url: &str) -> Result<MonitorId, DownloadError> {
        if self.fail_open {
            return Err(DownloadError::Monitor(format!("could not open {url}")));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(MonitorId(self.next_id.fetch_add(1, Ordering::SeqCst)))
    }

    async fn check_ready(&self, _monitor: MonitorId) -> Result<ReadyCheck, DownloadError> {
        let poll = self.polls.fetch_add(1, Ordering::SeqCst);
        if self.never_ready || poll < self.not_ready_polls {
            return Ok(ReadyCheck::not_ready());
        }
        Ok(ReadyCheck {
            ready: true,
            url: self.ready_url.clone(),
            metadata: self.metadata.clone(),
        })
    }

    async fn close(&self, _monitor: MonitorId) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}
