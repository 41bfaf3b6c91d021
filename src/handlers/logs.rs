//! Activity log handlers

use axum::{extract::{State, Query}, Json};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{AppState, AppResult, AppError};
use crate::models::ActivityLogEntry;

/// How many entries the first page returns when no watermark is supplied
const FIRST_PAGE_SIZE: i64 = 10;

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub last_fetched: Option<String>,
}

/// Serve the polling feed: entries strictly newer than the client's
/// last-seen timestamp, newest-first, or the most recent page on the
/// first request.
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> AppResult<Json<Value>> {
    let watermark = parse_watermark(query.last_fetched.as_deref())?;

    let logs = match watermark {
        Some(ts) => ActivityLogEntry::newer_than(&state.pool, ts).await?,
        None => ActivityLogEntry::latest(&state.pool, FIRST_PAGE_SIZE).await?,
    };

    Ok(Json(json!({ "success": true, "logs": logs })))
}

/// Empty and absent both mean "no watermark yet"; anything else must be a
/// valid RFC 3339 timestamp.
fn parse_watermark(raw: Option<&str>) -> Result<Option<DateTime<Utc>>, AppError> {
    match raw {
        None => Ok(None),
        Some("") => Ok(None),
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|ts| Some(ts.with_timezone(&Utc)))
            .map_err(|_| {
                AppError::Validation(format!("Invalid last_fetched timestamp: {}", raw))
            }),
    }
}
