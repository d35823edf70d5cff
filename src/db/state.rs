//! Runtime state: keyed JSON records and shutdown tracking.

use crate::error::DatabaseError;
use crate::{Error, Result};

use super::Database;

/// Key of the clean-shutdown marker
const CLEAN_SHUTDOWN_KEY: &str = "clean_shutdown";

impl Database {
    /// Store `value` under `key`, replacing any previous value
    pub async fn save_state(&self, key: &str, value: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO runtime_state (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to save state '{}': {}",
                key, e
            )))
        })?;

        Ok(())
    }

    /// Load the value stored under `key`
    pub async fn load_state(&self, key: &str) -> Result<Option<String>> {
        sqlx::query_scalar("SELECT value FROM runtime_state WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to load state '{}': {}",
                    key, e
                )))
            })
    }

    /// Remove the value stored under `key`; returns whether one existed
    pub async fn delete_state(&self, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM runtime_state WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete state '{}': {}",
                    key, e
                )))
            })?;

        Ok(result.rows_affected() > 0)
    }

    /// Check if the last shutdown was unclean
    ///
    /// Returns true if the previous session did not call set_clean_shutdown(),
    /// indicating a crash or forced termination.
    pub async fn was_unclean_shutdown(&self) -> Result<bool> {
        let value = self.load_state(CLEAN_SHUTDOWN_KEY).await?;

        // If the value is missing or "false", it was an unclean shutdown
        Ok(value.is_none_or(|v| v != "true"))
    }

    /// Mark that the application has started
    ///
    /// If shutdown() is not called before the next startup,
    /// was_unclean_shutdown() will return true.
    pub async fn set_clean_start(&self) -> Result<()> {
        self.save_state(CLEAN_SHUTDOWN_KEY, "false").await
    }

    /// Mark that the application is shutting down cleanly
    pub async fn set_clean_shutdown(&self) -> Result<()> {
        self.save_state(CLEAN_SHUTDOWN_KEY, "true").await
    }
}
