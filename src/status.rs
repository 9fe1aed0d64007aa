//! Status tracker: one `process_status` row per (resource, action) pair that
//! has been attempted.
//!
//! The tracker never commits. Every write happens on the connection the caller
//! hands in, which inside the runner is the transaction for the current
//! attempt.
//!
//! ```text
//!     (no row) ──first selection──▶ attempting
//!     attempting ──success──────────────────────▶ COMPLETED
//!     attempting ──failure, retries+1 <= limit──▶ RETRYABLE ──▶ (selected again)
//!     attempting ──failure, retries+1 >  limit──▶ RETRIES_EXCEEDED
//! ```

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::models::{ProcessStatus, StatusKind, RETRIES_MANUAL};

/// What happened on one attempt, as far as the tracker cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// `process` returned normally.
    Completed,
    /// `process` signalled a retryable failure.
    Failed,
    /// The retry counter was already past the limit before the attempt.
    LimitReached,
}

/// Apply `outcome` to `record` in memory.
///
/// The retry counter only moves on [`Outcome::Failed`], and only upward.
pub fn transition(record: &mut ProcessStatus, outcome: Outcome, retry_limit: i64, now: DateTime<Utc>) {
    match outcome {
        Outcome::Completed => {
            record.status = Some(StatusKind::Completed);
        }
        Outcome::Failed => {
            record.retries += 1;
            record.status = Some(if record.retries > retry_limit {
                StatusKind::RetriesExceeded
            } else {
                StatusKind::Retryable
            });
        }
        Outcome::LimitReached => {
            record.status = Some(StatusKind::RetriesExceeded);
        }
    }
    record.processed_at = now;
}

pub async fn get_status(
    conn: &mut SqliteConnection,
    resource_id: i64,
    action_name: &str,
) -> Result<Option<ProcessStatus>> {
    let row = sqlx::query(
        "SELECT id, resource_id, action_name, status, retries, processed_at
         FROM process_status WHERE resource_id = ? AND action_name = ?",
    )
    .bind(resource_id)
    .bind(action_name)
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(ProcessStatus::from_row).transpose()
}

/// Insert a fresh record with no status and a zero retry counter.
///
/// Used on the first attempt, before the outcome is known. Rolling back the
/// surrounding transaction discards it.
pub async fn create_initial(
    conn: &mut SqliteConnection,
    resource_id: i64,
    action_name: &str,
) -> Result<ProcessStatus> {
    let now = Utc::now();
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO process_status (resource_id, action_name, status, retries, processed_at)
         VALUES (?, ?, NULL, 0, ?) RETURNING id",
    )
    .bind(resource_id)
    .bind(action_name)
    .bind(now.timestamp())
    .fetch_one(&mut *conn)
    .await?;

    Ok(ProcessStatus {
        id,
        resource_id,
        action_name: action_name.to_string(),
        status: None,
        retries: 0,
        processed_at: now,
    })
}

/// Apply `outcome` to `record`, stamp it with the current time, and write it.
pub async fn record_outcome(
    conn: &mut SqliteConnection,
    record: &mut ProcessStatus,
    outcome: Outcome,
    retry_limit: i64,
) -> Result<()> {
    transition(record, outcome, retry_limit, Utc::now());
    save(conn, record).await
}

async fn save(conn: &mut SqliteConnection, record: &ProcessStatus) -> Result<()> {
    sqlx::query("UPDATE process_status SET status = ?, retries = ?, processed_at = ? WHERE id = ?")
        .bind(record.status.map(|s| s.as_str()))
        .bind(record.retries)
        .bind(record.processed_at.timestamp())
        .bind(record.id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Operator override: mark the pair completed regardless of its history.
///
/// The retry counter is set to [`RETRIES_MANUAL`] so the edit stays visible.
pub async fn resolve_manually(
    conn: &mut SqliteConnection,
    resource_id: i64,
    action_name: &str,
) -> Result<ProcessStatus> {
    let mut record = match get_status(conn, resource_id, action_name).await? {
        Some(record) => record,
        None => create_initial(conn, resource_id, action_name).await?,
    };
    record.status = Some(StatusKind::Completed);
    record.retries = RETRIES_MANUAL;
    record.processed_at = Utc::now();
    save(conn, &record).await?;
    Ok(record)
}
