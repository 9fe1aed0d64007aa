//! Action results: typed reads and writes of the per-action result tables.
//!
//! Each enrichment action owns one table keyed by `resource_id`. Writers
//! upsert, so a resource never carries more than one result row per action.
//! Readers return `None` when the action has not produced anything yet.
//!
//! [`Enrichment::load`] gathers everything known about a resource in one
//! place for the notes writer, `km get`, and the reports.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;

use crate::models::{from_timestamp, AnnotationDetail, Resource};
use crate::store;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryResult {
    pub summary: String,
    /// Publication date found on the page, or `"unknown"`.
    pub derived_date: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaybackResult {
    pub wayback_url: String,
    pub wayback_timestamp: Option<DateTime<Utc>>,
    /// Raw service response, kept for diagnosis.
    pub details: Option<String>,
}

pub async fn save_summary(
    conn: &mut SqliteConnection,
    resource_id: i64,
    result: &SummaryResult,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO action_summary (resource_id, summary, derived_date, processed_at)
         VALUES (?, ?, ?, ?)
         ON CONFLICT(resource_id) DO UPDATE SET
            summary = excluded.summary,
            derived_date = excluded.derived_date,
            processed_at = excluded.processed_at",
    )
    .bind(resource_id)
    .bind(&result.summary)
    .bind(&result.derived_date)
    .bind(Utc::now().timestamp())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn summary(conn: &mut SqliteConnection, resource_id: i64) -> Result<Option<SummaryResult>> {
    let row: Option<(String, String)> =
        sqlx::query_as("SELECT summary, derived_date FROM action_summary WHERE resource_id = ?")
            .bind(resource_id)
            .fetch_optional(&mut *conn)
            .await?;
    Ok(row.map(|(summary, derived_date)| SummaryResult {
        summary,
        derived_date,
    }))
}

pub async fn save_kagi(conn: &mut SqliteConnection, resource_id: i64, kagi_summary: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO action_kagi (resource_id, kagi_summary, processed_at) VALUES (?, ?, ?)
         ON CONFLICT(resource_id) DO UPDATE SET
            kagi_summary = excluded.kagi_summary,
            processed_at = excluded.processed_at",
    )
    .bind(resource_id)
    .bind(kagi_summary)
    .bind(Utc::now().timestamp())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn kagi(conn: &mut SqliteConnection, resource_id: i64) -> Result<Option<String>> {
    Ok(
        sqlx::query_scalar("SELECT kagi_summary FROM action_kagi WHERE resource_id = ?")
            .bind(resource_id)
            .fetch_optional(&mut *conn)
            .await?,
    )
}

pub async fn save_mastodon(conn: &mut SqliteConnection, resource_id: i64, toot_uri: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO action_mastodon (resource_id, toot_uri, processed_at) VALUES (?, ?, ?)
         ON CONFLICT(resource_id) DO UPDATE SET
            toot_uri = excluded.toot_uri,
            processed_at = excluded.processed_at",
    )
    .bind(resource_id)
    .bind(toot_uri)
    .bind(Utc::now().timestamp())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn mastodon(conn: &mut SqliteConnection, resource_id: i64) -> Result<Option<String>> {
    Ok(
        sqlx::query_scalar("SELECT toot_uri FROM action_mastodon WHERE resource_id = ?")
            .bind(resource_id)
            .fetch_optional(&mut *conn)
            .await?,
    )
}

pub async fn save_wayback(
    conn: &mut SqliteConnection,
    resource_id: i64,
    result: &WaybackResult,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO action_wayback (resource_id, wayback_url, wayback_timestamp, wayback_details, processed_at)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT(resource_id) DO UPDATE SET
            wayback_url = excluded.wayback_url,
            wayback_timestamp = excluded.wayback_timestamp,
            wayback_details = excluded.wayback_details,
            processed_at = excluded.processed_at",
    )
    .bind(resource_id)
    .bind(&result.wayback_url)
    .bind(result.wayback_timestamp.map(|t| t.timestamp()))
    .bind(&result.details)
    .bind(Utc::now().timestamp())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn wayback(conn: &mut SqliteConnection, resource_id: i64) -> Result<Option<WaybackResult>> {
    let row: Option<(String, Option<i64>, Option<String>)> = sqlx::query_as(
        "SELECT wayback_url, wayback_timestamp, wayback_details FROM action_wayback WHERE resource_id = ?",
    )
    .bind(resource_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.map(|(wayback_url, ts, details)| WaybackResult {
        wayback_url,
        wayback_timestamp: ts.map(from_timestamp),
        details,
    }))
}

/// Which note-writing table to address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteKind {
    Source,
    Daily,
    Annotation,
}

impl NoteKind {
    fn table(&self) -> &'static str {
        match self {
            NoteKind::Source => "action_obsidian_source",
            NoteKind::Daily => "action_obsidian_daily",
            NoteKind::Annotation => "action_obsidian_annotation",
        }
    }

    fn column(&self) -> &'static str {
        match self {
            NoteKind::Daily => "daily_filename",
            NoteKind::Source | NoteKind::Annotation => "filename",
        }
    }
}

pub async fn save_note(
    conn: &mut SqliteConnection,
    kind: NoteKind,
    resource_id: i64,
    filename: &str,
) -> Result<()> {
    let sql = format!(
        "INSERT INTO {table} (resource_id, {col}, processed_at) VALUES (?, ?, ?)
         ON CONFLICT(resource_id) DO UPDATE SET
            {col} = excluded.{col},
            processed_at = excluded.processed_at",
        table = kind.table(),
        col = kind.column()
    );
    sqlx::query(&sql)
        .bind(resource_id)
        .bind(filename)
        .bind(Utc::now().timestamp())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn note(conn: &mut SqliteConnection, kind: NoteKind, resource_id: i64) -> Result<Option<String>> {
    let sql = format!(
        "SELECT {} FROM {} WHERE resource_id = ?",
        kind.column(),
        kind.table()
    );
    Ok(sqlx::query_scalar(&sql)
        .bind(resource_id)
        .fetch_optional(&mut *conn)
        .await?)
}

/// A resource together with everything the actions have produced for it.
#[derive(Debug, Clone)]
pub struct Enrichment {
    pub resource: Resource,
    pub annotation: Option<AnnotationDetail>,
    pub summary: Option<SummaryResult>,
    pub kagi: Option<String>,
    pub wayback: Option<WaybackResult>,
    pub mastodon: Option<String>,
    pub source_note: Option<String>,
}

impl Enrichment {
    pub async fn load(conn: &mut SqliteConnection, resource_id: i64) -> Result<Self> {
        let resource = store::get(conn, resource_id).await?;
        Ok(Self {
            annotation: store::annotation_detail(conn, resource_id).await?,
            summary: summary(conn, resource_id).await?,
            kagi: kagi(conn, resource_id).await?,
            wayback: wayback(conn, resource_id).await?,
            mastodon: mastodon(conn, resource_id).await?,
            source_note: note(conn, NoteKind::Source, resource_id).await?,
            resource,
        })
    }
}
