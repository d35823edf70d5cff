use crate::db::*;
use tempfile::NamedTempFile;

/// Verify that loading state after closing the pool returns an error
/// rather than hanging or panicking.
#[tokio::test]
async fn test_load_state_after_pool_close_returns_error() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    db.save_state("download_queue", "{}").await.unwrap();
    assert!(db.load_state("download_queue").await.unwrap().is_some());

    // Close the pool (but keep the Database struct alive)
    db.pool().close().await;

    let result = db.load_state("download_queue").await;
    assert!(
        result.is_err(),
        "load_state after pool close should return an error, got: {:?}",
        result
    );
}

/// Verify that saving state after closing the pool returns an error
#[tokio::test]
async fn test_save_state_after_pool_close_returns_error() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    db.pool().close().await;

    let result = db.save_state("download_session", "{}").await;
    assert!(
        result.is_err(),
        "save_state after pool close should return an error, got: {:?}",
        result
    );
}

/// Verify that history writes after closing the pool return an error
#[tokio::test]
async fn test_insert_history_after_pool_close_returns_error() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    db.pool().close().await;

    let entry = NewHistoryEntry {
        job_id: "job-1".to_string(),
        title: "After Close".to_string(),
        artist: "Artist".to_string(),
        source_url: "https://artist.bandcamp.com/album/after-close".to_string(),
        status: crate::job::JobStatus::Completed,
        error_message: None,
        retry_count: 0,
        filename: None,
        finished_at: 0,
    };
    let result = db.insert_history(&entry).await;
    assert!(
        result.is_err(),
        "insert_history after pool close should return an error, got: {:?}",
        result
    );
}
