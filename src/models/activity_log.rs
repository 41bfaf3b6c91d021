//! Activity log model
//!
//! Append-only audit trail of intake and mutation outcomes. Entries are
//! never updated or deleted; readers order them newest-first by creation
//! timestamp with the id as tie breaker.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use chrono::{DateTime, Utc};

/// Severity of an activity log entry, serialized by variant name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Info,
    Warning,
    Critical,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "Info",
            LogLevel::Warning => "Warning",
            LogLevel::Critical => "Critical",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ActivityLogEntry {
    pub id: i64,
    pub level: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl ActivityLogEntry {
    pub async fn insert(pool: &PgPool, level: LogLevel, message: &str) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT INTO activity_logs (level, message) VALUES ($1, $2)")
            .bind(level.as_str())
            .bind(message)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Most recent entries, newest-first. Serves the feed's first page.
    pub async fn latest(pool: &PgPool, limit: i64) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, ActivityLogEntry>(
            r#"
            SELECT * FROM activity_logs
            ORDER BY created_at DESC, id DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    /// Entries strictly newer than the given watermark, newest-first.
    pub async fn newer_than(
        pool: &PgPool,
        watermark: DateTime<Utc>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, ActivityLogEntry>(
            r#"
            SELECT * FROM activity_logs
            WHERE created_at > $1
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(watermark)
        .fetch_all(pool)
        .await
    }
}

/// Best-effort activity logging. A failed log write must never fail the
/// request that triggered it, so errors are traced and discarded.
pub async fn log_activity(pool: &PgPool, level: LogLevel, message: &str) {
    if let Err(err) = ActivityLogEntry::insert(pool, level, message).await {
        tracing::warn!("Failed to record activity log entry: {}", err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_serializes_by_name() {
        assert_eq!(serde_json::to_string(&LogLevel::Warning).unwrap(), "\"Warning\"");
        assert_eq!(
            serde_json::from_str::<LogLevel>("\"Critical\"").unwrap(),
            LogLevel::Critical
        );
        assert_eq!(LogLevel::Info.as_str(), "Info");
    }
}
