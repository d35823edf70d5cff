//! History management operations.

use crate::job::JobStatus;
use crate::types::HistoryEntry;
use crate::{Error, Result};

use super::{Database, HistoryRow, NewHistoryEntry};

impl Database {
    /// Record a job that left the system
    pub async fn insert_history(&self, entry: &NewHistoryEntry) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO job_history (
                job_id, title, artist, source_url, status,
                error_message, retry_count, filename, finished_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.job_id)
        .bind(&entry.title)
        .bind(&entry.artist)
        .bind(&entry.source_url)
        .bind(entry.status.to_string())
        .bind(&entry.error_message)
        .bind(i64::from(entry.retry_count))
        .bind(&entry.filename)
        .bind(entry.finished_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        Ok(result.last_insert_rowid())
    }

    /// Query history, most recent first, with an optional status filter
    pub async fn query_history(
        &self,
        status_filter: Option<JobStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<HistoryEntry>> {
        let query = if let Some(status) = status_filter {
            sqlx::query_as::<_, HistoryRow>(
                r#"
                SELECT id, job_id, title, artist, source_url, status,
                       error_message, retry_count, filename, finished_at
                FROM job_history
                WHERE status = ?
                ORDER BY finished_at DESC, id DESC
                LIMIT ? OFFSET ?
                "#,
            )
            .bind(status.to_string())
            .bind(limit as i64)
            .bind(offset as i64)
        } else {
            sqlx::query_as::<_, HistoryRow>(
                r#"
                SELECT id, job_id, title, artist, source_url, status,
                       error_message, retry_count, filename, finished_at
                FROM job_history
                ORDER BY finished_at DESC, id DESC
                LIMIT ? OFFSET ?
                "#,
            )
            .bind(limit as i64)
            .bind(offset as i64)
        };

        let rows = query.fetch_all(&self.pool).await.map_err(Error::Sqlx)?;

        Ok(rows.into_iter().map(HistoryEntry::from).collect())
    }

    /// Count history entries (optionally filtered by status)
    pub async fn count_history(&self, status_filter: Option<JobStatus>) -> Result<i64> {
        let count = if let Some(status) = status_filter {
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM job_history WHERE status = ?")
                .bind(status.to_string())
                .fetch_one(&self.pool)
                .await
                .map_err(Error::Sqlx)?
        } else {
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM job_history")
                .fetch_one(&self.pool)
                .await
                .map_err(Error::Sqlx)?
        };

        Ok(count)
    }

    /// Clear all history
    ///
    /// Returns the number of records deleted.
    pub async fn clear_history(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM job_history")
            .execute(&self.pool)
            .await
            .map_err(Error::Sqlx)?;

        Ok(result.rows_affected())
    }
}
