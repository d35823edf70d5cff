//! Cancellable delayed tasks.
//!
//! [`schedule_after`] runs a future once a delay has elapsed and hands back a
//! [`ScheduledTask`] that can abort it deterministically. Retry backoff uses
//! this so that `stop()` and `shutdown()` can drop pending retries instead of
//! letting stray timers re-enqueue work afterwards.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Handle to a task scheduled with [`schedule_after`]
#[derive(Debug)]
pub struct ScheduledTask {
    token: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

impl ScheduledTask {
    /// Abort the task. Has no effect if it already ran.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether the task ran to completion or was cancelled
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Whether `cancel` was called
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Run `task` after `delay` unless cancelled first.
///
/// Cancellation is checked before the task starts; once started the task runs
/// to completion.
pub fn schedule_after<F>(delay: Duration, task: F) -> ScheduledTask
where
    F: Future<Output = ()> + Send + 'static,
{
    let token = CancellationToken::new();
    let child = token.clone();

    let handle = tokio::spawn(async move {
        tokio::select! {
            biased;
            _ = child.cancelled() => {
                tracing::trace!("Scheduled task cancelled before firing");
            }
            _ = tokio::time::sleep(delay) => {
                if !child.is_cancelled() {
                    task.await;
                }
            }
        }
    });

    ScheduledTask { token, handle }
}
