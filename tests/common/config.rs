//! Test configuration helpers for creating orchestrators over fake collaborators

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use collection_dl::{Collaborators, Config, Event, Orchestrator, Payload};
use tokio::sync::broadcast;

use super::fakes::{FakeEngine, FakeInspector, FakeResolver};

/// Handles to the fakes behind an orchestrator
pub struct Harness {
    pub engine: Arc<FakeEngine>,
    pub inspector: Arc<FakeInspector>,
    pub resolver: Arc<FakeResolver>,
}

impl Harness {
    pub fn new(engine: FakeEngine) -> Self {
        Self {
            engine: Arc::new(engine),
            inspector: Arc::new(FakeInspector::default()),
            resolver: Arc::new(FakeResolver::default()),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            engine: self.engine.clone(),
            inspector: self.inspector.clone(),
            resolver: self.resolver.clone(),
        }
    }

    /// Orchestrator storing its state at `db_path`, with test-sized waits
    pub async fn orchestrator(&self, db_path: &Path) -> Orchestrator {
        Orchestrator::new(fast_config(db_path), self.collaborators())
            .await
            .expect("orchestrator should start")
    }
}

pub fn fast_config(db_path: &Path) -> Config {
    let mut config = Config::default();
    config.persistence.database_path = db_path.to_path_buf();
    config.orchestrator.inter_job_delay = Duration::from_millis(5);
    config.download.ready_poll_interval = Duration::from_millis(5);
    config.download.ready_timeout = Duration::from_millis(500);
    config.link_resolution.navigating_wait = Duration::from_millis(5);
    config.link_resolution.not_ready_wait = Duration::from_millis(5);
    config.retry.initial_delay = Duration::from_millis(10);
    config.retry.max_delay = Duration::from_millis(100);
    config
}

pub fn purchase(artist: &str, title: &str) -> Payload {
    let slug = title.to_lowercase().replace(' ', "-");
    Payload::new(
        title,
        artist,
        format!("https://{}.bandcamp.com/album/{slug}", artist.to_lowercase().replace(' ', "")),
    )
}

/// Receive events until one matches `pred` (10 second timeout)
pub async fn wait_for(events: &mut broadcast::Receiver<Event>, pred: impl Fn(&Event) -> bool) -> Event {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("event channel closed: {e}"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}
