//! In-memory stand-ins for the download engine, page inspector and link resolver

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use async_trait::async_trait;
use collection_dl::{
    DownloadEngine, DownloadError, DownloadRequest, EngineDownloadId, EngineError, EngineState,
    EngineUpdate, LinkResolver, LinkResponse, MonitorId, PageInspector, ReadyCheck,
};
use tokio::sync::broadcast;

/// Every download this store serves is this large
pub const ARCHIVE_BYTES: u64 = 4_096;

/// Engine that finishes downloads immediately, failing those listed in
/// `failures` once each
pub struct FakeEngine {
    updates: broadcast::Sender<EngineUpdate>,
    next_id: AtomicI64,
    failures: Mutex<VecDeque<String>>,
    hang: bool,
    submitted: Mutex<Vec<DownloadRequest>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        let (updates, _rx) = broadcast::channel(64);
        Self {
            updates,
            next_id: AtomicI64::new(1),
            failures: Mutex::new(VecDeque::new()),
            hang: false,
            submitted: Mutex::new(Vec::new()),
        }
    }

    /// Interrupt the next downloads with these reasons
    pub fn failing(reasons: &[&str]) -> Self {
        let engine = Self::new();
        engine
            .failures
            .lock()
            .unwrap()
            .extend(reasons.iter().map(|r| r.to_string()));
        engine
    }

    /// Never finish anything; downloads only end when cancelled
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::new()
        }
    }

    pub fn submitted(&self) -> Vec<DownloadRequest> {
        self.submitted.lock().unwrap().clone()
    }

    fn publish(&self, id: EngineDownloadId, state: EngineState, bytes: u64, filename: Option<String>) {
        self.updates
            .send(EngineUpdate {
                id,
                state,
                bytes_received: bytes,
                total_bytes: ARCHIVE_BYTES,
                filename,
            })
            .ok();
    }
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DownloadEngine for FakeEngine {
    async fn submit(&self, request: DownloadRequest) -> Result<EngineDownloadId, EngineError> {
        let id = EngineDownloadId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let filename = format!("{}.zip", request.suggested_path);
        self.submitted.lock().unwrap().push(request);

        self.publish(id, EngineState::InProgress, ARCHIVE_BYTES / 4, None);
        if self.hang {
            return Ok(id);
        }

        let failure = self.failures.lock().unwrap().pop_front();
        match failure {
            Some(reason) => self.publish(
                id,
                EngineState::Interrupted { reason },
                ARCHIVE_BYTES / 4,
                None,
            ),
            None => self.publish(id, EngineState::Complete, ARCHIVE_BYTES, Some(filename)),
        }
        Ok(id)
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineUpdate> {
        self.updates.subscribe()
    }

    async fn cancel(&self, id: EngineDownloadId) -> Result<(), EngineError> {
        self.publish(
            id,
            EngineState::Interrupted {
                reason: "USER_CANCELED".to_string(),
            },
            0,
            None,
        );
        Ok(())
    }
}

/// Inspector whose pages are ready on the first poll
#[derive(Default)]
pub struct FakeInspector {
    next_id: AtomicU64,
    open: Mutex<HashSet<u64>>,
}

impl FakeInspector {
    /// Monitoring contexts that were opened and never closed
    pub fn leaked(&self) -> usize {
        self.open.lock().unwrap().len()
    }
}

#[async_trait]
impl PageInspector for FakeInspector {
    async fn open(&self, _url: &str) -> Result<MonitorId, DownloadError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.open.lock().unwrap().insert(id);
        Ok(MonitorId(id))
    }

    async fn check_ready(&self, _monitor: MonitorId) -> Result<ReadyCheck, DownloadError> {
        Ok(ReadyCheck {
            ready: true,
            url: None,
            metadata: None,
        })
    }

    async fn close(&self, monitor: MonitorId) {
        self.open.lock().unwrap().remove(&monitor.0);
    }
}

/// Resolver that maps every purchase page to a link on the trusted CDN
#[derive(Default)]
pub struct FakeResolver {
    calls: AtomicU64,
}

impl FakeResolver {
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LinkResolver for FakeResolver {
    async fn resolve(&self, source_url: &str) -> Result<LinkResponse, DownloadError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        // Every page needs one extra look before its link shows up
        if n % 2 == 0 {
            return Ok(LinkResponse::NotReady);
        }
        let slug = source_url.rsplit('/').next().unwrap_or_default();
        Ok(LinkResponse::Success {
            download_url: format!("https://p4.bcbits.com/download/album/{slug}"),
        })
    }
}
