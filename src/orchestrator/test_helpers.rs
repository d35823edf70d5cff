//! Shared helpers for building orchestrators over scripted collaborators.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::tempdir;

use crate::config::Config;
use crate::executor::mocks::{EngineScript, MockEngine, MockInspector};
use crate::orchestrator::{Collaborators, Orchestrator};
use crate::resolver::LinkResponse;
use crate::resolver::mocks::MockResolver;
use crate::types::{Event, Payload};

/// Scripted collaborators plus handles to inspect them afterwards
pub(crate) struct Mocks {
    pub(crate) engine: Arc<MockEngine>,
    pub(crate) inspector: Arc<MockInspector>,
    pub(crate) resolver: Arc<MockResolver>,
}

impl Mocks {
    /// Engine completes everything, page is ready at once, resolver always succeeds
    pub(crate) fn happy() -> Self {
        Self::with_engine(MockEngine::new())
    }

    pub(crate) fn with_scripts(scripts: impl IntoIterator<Item = EngineScript>) -> Self {
        Self::with_engine(MockEngine::new().with_scripts(scripts))
    }

    pub(crate) fn with_engine(engine: MockEngine) -> Self {
        Self {
            engine: Arc::new(engine),
            inspector: Arc::new(MockInspector::ready()),
            resolver: Arc::new(MockResolver::always(LinkResponse::Success {
                download_url: RESOLVED_URL.to_string(),
            })),
        }
    }

    pub(crate) fn with_inspector(mut self, inspector: MockInspector) -> Self {
        self.inspector = Arc::new(inspector);
        self
    }

    pub(crate) fn with_resolver(mut self, resolver: MockResolver) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    pub(crate) fn collaborators(&self) -> Collaborators {
        Collaborators {
            engine: self.engine.clone(),
            inspector: self.inspector.clone(),
            resolver: self.resolver.clone(),
        }
    }
}

/// Link every happy-path resolution returns
pub(crate) const RESOLVED_URL: &str = "https://p4.bcbits.com/download/album/abc?id=1";

/// Config with short waits suitable for tests, storing state at `db_path`
pub(crate) fn test_config(db_path: &Path) -> Config {
    let mut config = Config::default();
    config.persistence.database_path = db_path.to_path_buf();
    config.orchestrator.inter_job_delay = Duration::from_millis(5);
    config.download.ready_poll_interval = Duration::from_millis(5);
    config.download.ready_timeout = Duration::from_millis(200);
    config.link_resolution.navigating_wait = Duration::from_millis(5);
    config.link_resolution.not_ready_wait = Duration::from_millis(5);
    config.retry.initial_delay = Duration::from_millis(20);
    config.retry.max_delay = Duration::from_millis(200);
    config
}

/// Create an orchestrator with a fresh database in a tempdir.
/// Returns the orchestrator and the tempdir (which must be kept alive).
pub(crate) async fn create_test_orchestrator(mocks: &Mocks) -> (Orchestrator, tempfile::TempDir) {
    create_test_orchestrator_with(mocks, |_| {}).await
}

/// Same as [`create_test_orchestrator`] with a chance to adjust the config
pub(crate) async fn create_test_orchestrator_with(
    mocks: &Mocks,
    configure: impl FnOnce(&mut Config),
) -> (Orchestrator, tempfile::TempDir) {
    let temp_dir = tempdir().unwrap();
    let mut config = test_config(&temp_dir.path().join("test.db"));
    configure(&mut config);
    let orchestrator = Orchestrator::new(config, mocks.collaborators())
        .await
        .unwrap();
    (orchestrator, temp_dir)
}

pub(crate) fn payload(title: &str) -> Payload {
    Payload::new(
        title,
        "Test Artist",
        format!("https://testartist.bandcamp.com/album/{}", title.to_lowercase()),
    )
}

/// Receive events until one matches `pred` (5 second timeout)
pub(crate) async fn wait_for_event(
    events: &mut tokio::sync::broadcast::Receiver<Event>,
    pred: impl Fn(&Event) -> bool,
) -> Event {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("event channel closed: {e}"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Poll `check` until it holds (5 second timeout)
pub(crate) async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
