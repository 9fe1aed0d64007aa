//! Processing reports and operator remediation.
//!
//! `km status` prints per-action counts, `km hung` lists pairs that are stuck
//! at or near the retry limit together with archive jobs that never
//! finished, and `km resolve` is the explicit out-of-band fix for a stuck
//! pair.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection};

use crate::actions::wayback::parse_timestamp;
use crate::config::Config;
use crate::db;
use crate::jobs;
use crate::models::{from_timestamp, ProcessStatus, StatusKind};
use crate::results::{self, WaybackResult};
use crate::status;
use crate::store;

/// Counts for one action name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionCounts {
    pub action: String,
    pub completed: i64,
    pub retryable: i64,
    pub exceeded: i64,
}

/// A pair that needs attention.
#[derive(Debug, Clone)]
pub struct HungEntry {
    pub resource_id: i64,
    pub action: String,
    pub status: StatusKind,
    pub retries: i64,
    pub url: String,
    pub processed_at: DateTime<Utc>,
}

pub async fn status_counts(conn: &mut SqliteConnection) -> Result<Vec<ActionCounts>> {
    let rows = sqlx::query(
        r#"
        SELECT
            action_name,
            SUM(CASE WHEN status = 'COMPLETED' THEN 1 ELSE 0 END) AS completed,
            SUM(CASE WHEN status = 'RETRYABLE' THEN 1 ELSE 0 END) AS retryable,
            SUM(CASE WHEN status = 'RETRIES_EXCEEDED' THEN 1 ELSE 0 END) AS exceeded
        FROM process_status
        GROUP BY action_name
        ORDER BY action_name
        "#,
    )
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(ActionCounts {
                action: row.try_get("action_name")?,
                completed: row.try_get("completed")?,
                retryable: row.try_get("retryable")?,
                exceeded: row.try_get("exceeded")?,
            })
        })
        .collect()
}

/// Retryable pairs with `retries >= retry_limit - margin`, plus every pair
/// that has run out of retries.
pub async fn hung(
    conn: &mut SqliteConnection,
    retry_limit: i64,
    margin: i64,
    action: Option<&str>,
) -> Result<Vec<HungEntry>> {
    let rows = sqlx::query(
        r#"
        SELECT ps.resource_id, ps.action_name, ps.status, ps.retries, ps.processed_at, r.url
        FROM process_status ps
        JOIN resources r ON r.id = ps.resource_id
        WHERE ((ps.status = 'RETRYABLE' AND ps.retries >= ?) OR ps.status = 'RETRIES_EXCEEDED')
          AND (? IS NULL OR ps.action_name = ?)
        ORDER BY ps.action_name, ps.retries DESC, ps.resource_id
        "#,
    )
    .bind(retry_limit - margin)
    .bind(action)
    .bind(action)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| {
            let status: String = row.try_get("status")?;
            Ok(HungEntry {
                resource_id: row.try_get("resource_id")?,
                action: row.try_get("action_name")?,
                status: status.parse()?,
                retries: row.try_get("retries")?,
                url: row.try_get("url")?,
                processed_at: from_timestamp(row.try_get("processed_at")?),
            })
        })
        .collect()
}

/// Mark a pair completed by hand.
///
/// With `archive_url` (Wayback actions only) the substitute capture is
/// recorded as the pair's result.
pub async fn resolve(
    conn: &mut SqliteConnection,
    resource_id: i64,
    action: &str,
    archive_url: Option<&str>,
) -> Result<ProcessStatus> {
    store::get(conn, resource_id).await?;

    if let Some(url) = archive_url {
        if !action.starts_with("Wayback") {
            bail!("--archive-url only applies to Wayback actions, not {}", action);
        }
        let archived = WaybackResult {
            wayback_url: url.to_string(),
            wayback_timestamp: capture_timestamp(url),
            details: Some("resolved manually".to_string()),
        };
        results::save_wayback(conn, resource_id, &archived).await?;
    }

    status::resolve_manually(conn, resource_id, action).await
}

/// Timestamp segment of a `https://web.archive.org/web/<ts>/<url>` address.
fn capture_timestamp(url: &str) -> Option<DateTime<Utc>> {
    let rest = url.split("/web/").nth(1)?;
    let ts = rest.split('/').next()?;
    parse_timestamp(ts)
}

pub async fn run_status(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let mut conn = pool.acquire().await?;
    let counts = status_counts(&mut conn).await?;
    let resources: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM resources")
        .fetch_one(&mut *conn)
        .await?;
    drop(conn);

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Resources:   {}", resources);
    println!("  Retry limit: {}", config.engine.retry_limit);
    println!();

    if counts.is_empty() {
        println!("  No actions have run yet.");
    } else {
        println!(
            "  {:<24} {:>10} {:>10} {:>10}",
            "ACTION", "COMPLETED", "RETRYABLE", "EXCEEDED"
        );
        println!("  {}", "-".repeat(57));
        for c in &counts {
            println!(
                "  {:<24} {:>10} {:>10} {:>10}",
                c.action, c.completed, c.retryable, c.exceeded
            );
        }
    }
    println!();

    pool.close().await;
    Ok(())
}

pub async fn run_hung(config: &Config, action: Option<&str>, margin: i64) -> Result<()> {
    let pool = db::connect(config).await?;
    let mut conn = pool.acquire().await?;
    let entries = hung(&mut conn, config.engine.retry_limit, margin, action).await?;
    let waiting = jobs::unfinished(&mut conn, "wayback").await?;
    drop(conn);

    if entries.is_empty() {
        println!("No hung resources.");
    } else {
        println!(
            "{:<8} {:<24} {:<17} {:>7}  {:<16} URL",
            "ID", "ACTION", "STATUS", "RETRIES", "LAST TRY"
        );
        for e in &entries {
            println!(
                "{:<8} {:<24} {:<17} {:>7}  {:<16} {}",
                e.resource_id,
                e.action,
                e.status,
                e.retries,
                format_ts_relative(e.processed_at.timestamp()),
                e.url
            );
        }
    }

    if !waiting.is_empty() {
        println!();
        println!("Unfinished archive jobs:");
        for job in &waiting {
            println!(
                "  {:<8} {:<9} {}  submitted {}",
                job.resource_id,
                job.state.as_str(),
                job.handle,
                format_ts_relative(job.submitted_at.timestamp())
            );
        }
    }

    pool.close().await;
    Ok(())
}

pub async fn run_resolve(
    config: &Config,
    resource_id: i64,
    action: &str,
    archive_url: Option<&str>,
) -> Result<()> {
    let pool = db::connect(config).await?;
    let mut tx = pool.begin().await?;
    let record = resolve(&mut tx, resource_id, action, archive_url).await?;
    tx.commit().await?;

    println!(
        "Resource {} marked {} for {} (retries {}).",
        record.resource_id,
        record.status.map_or("-", |s| s.as_str()),
        record.action_name,
        record.retries
    );
    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = Utc::now().timestamp() - ts;

    if delta < 0 {
        format_ts_iso(ts)
    } else if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        format!("{} min ago", delta / 60)
    } else if delta < 86400 {
        format!("{} h ago", delta / 3600)
    } else if delta < 86400 * 30 {
        format!("{} d ago", delta / 86400)
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
