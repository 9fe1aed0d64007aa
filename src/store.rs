//! Resource store.
//!
//! Durable storage of resources and annotation details. Every function takes
//! a `&mut SqliteConnection` so callers decide the unit of work: pass a pooled
//! connection for standalone writes, or `&mut *tx` to write inside a
//! transaction.
//!
//! Nothing here knows about actions; action output lives in the per-action
//! result tables (see [`crate::results`]).

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use thiserror::Error;

use crate::models::{
    from_timestamp, from_timestamp_micros, AnnotationDetail, NewAnnotation, NewResource, Origin, Resource,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("resource not found: {0}")]
    NotFound(i64),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("unreadable row: {0}")]
    Corrupt(#[from] anyhow::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

const RESOURCE_COLUMNS: &str =
    "id, origin, external_id, url, title, description, tags_json, shared, saved_at";

/// Fetch one resource by id.
pub async fn get(conn: &mut SqliteConnection, id: i64) -> StoreResult<Resource> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM resources WHERE id = ?",
        RESOURCE_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => Ok(Resource::from_row(&row)?),
        None => Err(StoreError::NotFound(id)),
    }
}

/// Insert or merge a resource keyed by `(origin, external_id)`.
///
/// Returns the resource id. Calling it twice with the same input leaves a
/// single row. An annotated page that has been public stays public, and keeps
/// the timestamp of its first annotation.
pub async fn upsert(conn: &mut SqliteConnection, item: &NewResource) -> StoreResult<i64> {
    let tags_json = serde_json::to_string(&item.tags).map_err(anyhow::Error::from)?;
    let now = Utc::now().timestamp();

    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO resources (origin, external_id, url, title, description, tags_json, shared, saved_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(origin, external_id) DO UPDATE SET
            url = excluded.url,
            title = excluded.title,
            description = excluded.description,
            tags_json = excluded.tags_json,
            shared = CASE
                WHEN resources.origin = 'hypothesis_page' AND resources.shared = 'PUBLIC' THEN 'PUBLIC'
                ELSE excluded.shared
            END,
            saved_at = CASE
                WHEN resources.origin = 'hypothesis_page' THEN resources.saved_at
                ELSE excluded.saved_at
            END,
            updated_at = excluded.updated_at
        RETURNING id
        "#,
    )
    .bind(item.origin.as_str())
    .bind(&item.external_id)
    .bind(&item.url)
    .bind(&item.title)
    .bind(&item.description)
    .bind(&tags_json)
    .bind(item.shared.as_str())
    .bind(item.saved_at.timestamp())
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;

    Ok(id)
}

/// Insert or replace the annotation-specific fields of an annotation resource.
pub async fn upsert_annotation(
    conn: &mut SqliteConnection,
    resource_id: i64,
    page_id: i64,
    annotation: &NewAnnotation,
) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO annotation_details (resource_id, page_id, quote, text, link_html, link_incontext, flagged, created_at, updated_us)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(resource_id) DO UPDATE SET
            page_id = excluded.page_id,
            quote = excluded.quote,
            text = excluded.text,
            link_html = excluded.link_html,
            link_incontext = excluded.link_incontext,
            flagged = excluded.flagged,
            updated_us = excluded.updated_us
        "#,
    )
    .bind(resource_id)
    .bind(page_id)
    .bind(&annotation.quote)
    .bind(&annotation.text)
    .bind(&annotation.link_html)
    .bind(&annotation.link_incontext)
    .bind(annotation.flagged)
    .bind(annotation.created_at.timestamp())
    .bind(annotation.updated_at.timestamp_micros())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn annotation_detail(
    conn: &mut SqliteConnection,
    resource_id: i64,
) -> StoreResult<Option<AnnotationDetail>> {
    let row: Option<(i64, i64, String, String, Option<String>, Option<String>, bool, i64, i64)> =
        sqlx::query_as(
            "SELECT resource_id, page_id, quote, text, link_html, link_incontext, flagged, created_at, updated_us
             FROM annotation_details WHERE resource_id = ?",
        )
        .bind(resource_id)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(row.map(
        |(resource_id, page_id, quote, text, link_html, link_incontext, flagged, created, updated)| {
            AnnotationDetail {
                resource_id,
                page_id,
                quote,
                text,
                link_html,
                link_incontext,
                flagged,
                created_at: from_timestamp(created),
                updated_at: from_timestamp_micros(updated),
            }
        },
    ))
}

/// All resources from one origin, oldest first.
pub async fn by_origin(conn: &mut SqliteConnection, origin: Origin) -> StoreResult<Vec<Resource>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM resources WHERE origin = ? ORDER BY saved_at ASC, id ASC",
        RESOURCE_COLUMNS
    ))
    .bind(origin.as_str())
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| Resource::from_row(row).map_err(StoreError::from))
        .collect()
}

/// Newest `saved_at` for an origin; the incremental-fetch cursor.
pub async fn latest_saved_at(
    conn: &mut SqliteConnection,
    origin: Origin,
) -> StoreResult<Option<DateTime<Utc>>> {
    let ts: Option<i64> = sqlx::query_scalar("SELECT MAX(saved_at) FROM resources WHERE origin = ?")
        .bind(origin.as_str())
        .fetch_one(&mut *conn)
        .await?;
    Ok(ts.map(from_timestamp))
}

/// Newest annotation update time, to the microsecond; the annotation
/// service's cursor.
pub async fn latest_annotation_update(
    conn: &mut SqliteConnection,
) -> StoreResult<Option<DateTime<Utc>>> {
    let us: Option<i64> = sqlx::query_scalar("SELECT MAX(updated_us) FROM annotation_details")
        .fetch_one(&mut *conn)
        .await?;
    Ok(us.map(from_timestamp_micros))
}
