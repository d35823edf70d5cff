//! End-to-end session flows over in-memory collaborators
//!
//! Run with: `cargo test --test session_flow`

mod common;

use std::time::Duration;

use collection_dl::{Event, JobStatus};
use common::*;
use tempfile::TempDir;

#[tokio::test]
async fn drains_a_collection_by_priority() {
    let temp_dir = TempDir::new().unwrap();
    let harness = Harness::new(FakeEngine::new());
    let orchestrator = harness.orchestrator(&temp_dir.path().join("state.db")).await;
    let mut events = orchestrator.subscribe();

    orchestrator
        .submit(vec![purchase("Low Tide", "Shoreline")], Some(0))
        .await
        .unwrap();
    orchestrator
        .submit(
            vec![
                purchase("Night Owl", "First Light"),
                purchase("Night Owl", "Second Light"),
            ],
            Some(5),
        )
        .await
        .unwrap();

    wait_for(&mut events, |e| matches!(e, Event::QueueEmpty)).await;

    let paths: Vec<String> = harness
        .engine
        .submitted()
        .into_iter()
        .map(|request| request.suggested_path)
        .collect();
    // The first submission may already be running when the second arrives
    assert!(paths.contains(&"Purchases/Low Tide/Shoreline".to_string()));
    let first = paths.iter().position(|p| p.ends_with("First Light")).unwrap();
    let second = paths.iter().position(|p| p.ends_with("Second Light")).unwrap();
    assert!(first < second);

    let status = orchestrator.status().await;
    assert_eq!(status.counters.completed, 3);
    assert_eq!(status.counters.failed, 0);
    assert!(!status.is_active);

    let history = orchestrator.history(10).await.unwrap();
    assert_eq!(history.len(), 3);
    assert!(history.iter().all(|entry| entry.status == JobStatus::Completed));
    assert!(
        history
            .iter()
            .any(|entry| entry.filename.as_deref() == Some("Purchases/Night Owl/First Light.zip"))
    );

    assert_eq!(harness.resolver.calls(), 6, "one not-ready answer per page");
    assert_eq!(harness.inspector.leaked(), 0);
}

#[tokio::test]
async fn interrupted_download_is_retried() {
    let temp_dir = TempDir::new().unwrap();
    let harness = Harness::new(FakeEngine::failing(&["NETWORK_FAILED"]));
    let orchestrator = harness.orchestrator(&temp_dir.path().join("state.db")).await;
    let mut events = orchestrator.subscribe();

    orchestrator
        .submit(vec![purchase("Night Owl", "Encore")], None)
        .await
        .unwrap();

    let failed = wait_for(&mut events, |e| matches!(e, Event::JobFailed { .. })).await;
    assert!(matches!(failed, Event::JobFailed { will_retry: true, .. }));
    wait_for(&mut events, |e| matches!(e, Event::QueueEmpty)).await;

    let counters = orchestrator.counters();
    assert_eq!(counters.completed, 1);
    assert_eq!(counters.failed, 1);
    assert_eq!(harness.engine.submitted().len(), 2);

    let history = orchestrator.history(10).await.unwrap();
    assert_eq!(history[0].retry_count, 1);
}

#[tokio::test]
async fn restart_picks_up_where_shutdown_left_off() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("state.db");

    let stuck = Harness::new(FakeEngine::hanging());
    let first = stuck.orchestrator(&db_path).await;
    let mut events = first.subscribe();
    let ids = first
        .submit(
            vec![purchase("Low Tide", "Undertow"), purchase("Low Tide", "Riptide")],
            None,
        )
        .await
        .unwrap();
    wait_for(&mut events, |e| matches!(e, Event::JobProgress { .. })).await;

    first.shutdown().await.unwrap();
    assert_eq!(first.queued_jobs().await.len(), 2);

    let healthy = Harness::new(FakeEngine::new());
    let second = healthy.orchestrator(&db_path).await;

    tokio::time::timeout(Duration::from_secs(10), async {
        while second.counters().completed < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("restarted session should drain");

    let order: Vec<_> = second
        .history(10)
        .await
        .unwrap()
        .into_iter()
        .rev()
        .map(|entry| entry.job_id)
        .collect();
    assert_eq!(order, ids, "interrupted job runs first after restart");
}
