//! Retry classification and exponential backoff
//!
//! The orchestrator is the only component that schedules retries. This module
//! gives it the two answers it needs: whether a failure is worth retrying
//! ([`IsRetryable`]) and how long to wait before the next attempt
//! ([`backoff_delay`]).
//!
//! # Example
//!
//! ```
//! use collection_dl::config::RetryConfig;
//! use collection_dl::retry::backoff_delay;
//! use std::time::Duration;
//!
//! let config = RetryConfig::default();
//! assert_eq!(backoff_delay(0, &config), Duration::from_secs(1));
//! assert_eq!(backoff_delay(2, &config), Duration::from_secs(4));
//! assert_eq!(backoff_delay(10, &config), Duration::from_secs(60));
//! ```

use crate::config::RetryConfig;
use crate::error::{DownloadError, EngineError, Error};
use rand::Rng;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (link not ready in time, interrupted transfer) should return `true`.
/// Permanent failures (untrusted source, state machine misuse) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the job should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for DownloadError {
    fn is_retryable(&self) -> bool {
        match self {
            // The page may just be slow to prepare the archive
            DownloadError::PreparationTimeout { .. } => true,
            // Network drops and server errors on the engine side
            DownloadError::Interrupted { .. } => true,
            // Resolver may succeed once the page settles
            DownloadError::LinkResolutionExhausted { .. } => true,
            DownloadError::LinkResolutionFailed(_) => true,
            // A link outside the trusted domain will not change on retry
            DownloadError::UntrustedSource { .. } => false,
            // Caller bug, fatal to that call only
            DownloadError::AlreadyInProgress => false,
            // Neutral outcome, re-queued rather than retried
            DownloadError::Cancelled => false,
            DownloadError::Engine(e) => e.is_retryable(),
            // Tab closed or crashed underneath us
            DownloadError::Monitor(_) => true,
        }
    }
}

impl IsRetryable for EngineError {
    fn is_retryable(&self) -> bool {
        match self {
            EngineError::NotInProgress(_) => true,
            EngineError::Unavailable(_) => true,
            EngineError::Rejected(_) => false,
        }
    }
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Download(e) => e.is_retryable(),
            // I/O errors can be retryable in some cases
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::Interrupted
            ),
            // State machine misuse is a logic bug
            Error::Job(_) => false,
            Error::Queue(_) => false,
            Error::Config { .. } => false,
            Error::Database(_) | Error::Sqlx(_) => false,
            Error::Serialization(_) => false,
            Error::NotFound(_) => false,
            Error::ShuttingDown => false,
            Error::Other(_) => false,
        }
    }
}

/// Backoff before retry number `retry_count + 1`:
/// `min(initial_delay * backoff_multiplier^retry_count, max_delay)`, in whole milliseconds.
///
/// Jitter is not applied here; see [`with_jitter`].
pub fn backoff_delay(retry_count: u32, config: &RetryConfig) -> Duration {
    let exponent = i32::try_from(retry_count).unwrap_or(i32::MAX);
    let base_ms = config.initial_delay.as_secs_f64() * 1000.0;
    let max_ms = config.max_delay.as_secs_f64() * 1000.0;
    let delay_ms = (base_ms * config.backoff_multiplier.powi(exponent)).min(max_ms);
    Duration::from_millis(delay_ms.max(0.0).round() as u64)
}

/// Apply jitter to a delay when the policy asks for it
pub fn with_jitter(delay: Duration, config: &RetryConfig) -> Duration {
    if config.jitter {
        add_jitter(delay)
    } else {
        delay
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay.
/// This means the actual delay will be between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    let jittered_secs = delay.as_secs_f64() * (1.0 + jitter_factor);
    Duration::from_secs_f64(jittered_secs)
}
