//! Configuration types for collection-dl

use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

use crate::error::{Error, Result};
use crate::types::Priority;

/// Download executor configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Host suffix every final download URL must belong to (default: "bcbits.com")
    #[serde(default = "default_trusted_domain")]
    pub trusted_domain: String,

    /// Top-level folder every suggested path is placed under (default: "Purchases")
    #[serde(default = "default_download_folder")]
    pub download_folder: String,

    /// Interval between readiness polls of the monitoring context (default: 2s)
    #[serde(default = "default_ready_poll_interval", with = "duration_ms_serde")]
    pub ready_poll_interval: Duration,

    /// Give up waiting for a ready link after this long (default: 30s)
    #[serde(default = "default_ready_timeout", with = "duration_ms_serde")]
    pub ready_timeout: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            trusted_domain: default_trusted_domain(),
            download_folder: default_download_folder(),
            ready_poll_interval: default_ready_poll_interval(),
            ready_timeout: default_ready_timeout(),
        }
    }
}

/// Link resolution configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LinkResolutionConfig {
    /// Resolver queries before giving up (default: 5)
    #[serde(default = "default_resolution_attempts")]
    pub max_attempts: u32,

    /// Wait after a "navigating" response (default: 3s)
    #[serde(default = "default_navigating_wait", with = "duration_ms_serde")]
    pub navigating_wait: Duration,

    /// Wait after a "not ready" or "owned but no link yet" response (default: 2s)
    #[serde(default = "default_not_ready_wait", with = "duration_ms_serde")]
    pub not_ready_wait: Duration,
}

impl Default for LinkResolutionConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_resolution_attempts(),
            navigating_wait: default_navigating_wait(),
            not_ready_wait: default_not_ready_wait(),
        }
    }
}

/// Retry configuration for failed jobs
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries per job before it is given up (default: 3)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_ms_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_ms_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: false,
        }
    }
}

/// Drain loop configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Pause between two jobs (default: 1s)
    #[serde(default = "default_inter_job_delay", with = "duration_ms_serde")]
    pub inter_job_delay: Duration,

    /// Priority used by `submit` when the caller does not pick one (default: 0)
    #[serde(default)]
    pub default_priority: Priority,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            inter_job_delay: default_inter_job_delay(),
            default_priority: 0,
        }
    }
}

/// Durable storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "./collection-dl.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Key the queue snapshot is stored under (default: "download_queue")
    #[serde(default = "default_queue_key")]
    pub queue_key: String,

    /// Key the session record is stored under (default: "download_session")
    #[serde(default = "default_session_key")]
    pub session_key: String,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            queue_key: default_queue_key(),
            session_key: default_session_key(),
        }
    }
}

/// Main configuration for the orchestrator
///
/// Every field has a default, so `Config::default()` works out of the box and
/// partial JSON documents deserialize.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Executor settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// Link resolution settings
    #[serde(default)]
    pub link_resolution: LinkResolutionConfig,

    /// Retry and backoff settings
    #[serde(default)]
    pub retry: RetryConfig,

    /// Drain loop settings
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Durable storage settings
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Check settings that would make the orchestrator misbehave
    pub fn validate(&self) -> Result<()> {
        if self.download.trusted_domain.trim().is_empty() {
            return Err(config_error(
                "trusted domain must not be empty",
                "trusted_domain",
            ));
        }
        if self.download.ready_poll_interval.is_zero() {
            return Err(config_error(
                "ready poll interval must be greater than zero",
                "ready_poll_interval",
            ));
        }
        if self.download.ready_timeout < self.download.ready_poll_interval {
            return Err(config_error(
                "ready timeout must be at least one poll interval",
                "ready_timeout",
            ));
        }
        if self.link_resolution.max_attempts == 0 {
            return Err(config_error(
                "link resolution needs at least one attempt",
                "max_attempts",
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(config_error(
                "backoff multiplier must be at least 1.0",
                "backoff_multiplier",
            ));
        }
        Ok(())
    }
}

fn config_error(message: &str, key: &str) -> Error {
    Error::Config {
        message: message.to_string(),
        key: Some(key.to_string()),
    }
}

fn default_trusted_domain() -> String {
    "bcbits.com".to_string()
}

fn default_download_folder() -> String {
    "Purchases".to_string()
}

fn default_ready_poll_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_ready_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_resolution_attempts() -> u32 {
    5
}

fn default_navigating_wait() -> Duration {
    Duration::from_secs(3)
}

fn default_not_ready_wait() -> Duration {
    Duration::from_secs(2)
}

fn default_max_retries() -> u32 {
    crate::job::DEFAULT_MAX_RETRIES
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_inter_job_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./collection-dl.db")
}

fn default_queue_key() -> String {
    "download_queue".to_string()
}

fn default_session_key() -> String {
    "download_session".to_string()
}

// Duration serialization helper (milliseconds)
mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.download.trusted_domain, "bcbits.com");
        assert_eq!(config.download.ready_poll_interval, Duration::from_secs(2));
        assert_eq!(config.download.ready_timeout, Duration::from_secs(30));
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.max_delay, Duration::from_secs(60));
        assert_eq!(config.persistence.queue_key, "download_queue");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let config: Config = serde_json::from_str(
            r#"{"download": {"ready_timeout": 5000}, "orchestrator": {"inter_job_delay": 10}}"#,
        )
        .unwrap();
        assert_eq!(config.download.ready_timeout, Duration::from_millis(5000));
        assert_eq!(config.download.ready_poll_interval, Duration::from_secs(2));
        assert_eq!(
            config.orchestrator.inter_job_delay,
            Duration::from_millis(10)
        );
        assert_eq!(config.link_resolution.max_attempts, 5);
    }

    #[test]
    fn durations_serialize_as_milliseconds() {
        let json = serde_json::to_value(Config::default()).unwrap();
        assert_eq!(json["download"]["ready_poll_interval"], 2000);
        assert_eq!(json["retry"]["initial_delay"], 1000);
    }

    #[test]
    fn validate_rejects_bad_settings() {
        let mut config = Config::default();
        config.download.ready_timeout = Duration::from_millis(100);
        match config.validate() {
            Err(Error::Config { key, .. }) => assert_eq!(key.as_deref(), Some("ready_timeout")),
            other => panic!("expected config error, got {other:?}"),
        }

        let mut config = Config::default();
        config.download.ready_poll_interval = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.link_resolution.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.download.trusted_domain = "  ".into();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.retry.backoff_multiplier = 0.5;
        assert!(config.validate().is_err());
    }
}
