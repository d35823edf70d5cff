use super::test_helpers::*;
use super::*;
use crate::error::{DownloadError, Error, ErrorKind, QueueError};
use crate::executor::mocks::{EngineScript, MockInspector};
use crate::job::{JobStatus, Progress};
use crate::resolver::LinkResponse;
use crate::resolver::mocks::MockResolver;
use crate::types::{Event, JobId};
use std::time::Duration;


fn submitted_titles(mocks: &Mocks) -> Vec<String> {
    mocks
        .engine
        .submitted()
        .iter()
        .map(|request| {
            request
                .suggested_path
                .rsplit('/')
                .next()
                .unwrap_or_default()
                .to_string()
        })
        .collect()
}

fn is_queue_empty(event: &Event) -> bool {
    matches!(event, Event::QueueEmpty)
}
