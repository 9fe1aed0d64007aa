//! Resource retrieval by ID.
//!
//! Prints a resource, every status row recorded for it, and whatever the
//! actions have produced. Used by `km get`.

use anyhow::Result;
use sqlx::{Row, SqliteConnection};

use crate::config::Config;
use crate::db;
use crate::models::{from_timestamp, StatusKind, RETRIES_GRANDFATHERED, RETRIES_MANUAL};
use crate::results::Enrichment;

/// One status row as shown to the operator.
#[derive(Debug, Clone)]
pub struct StatusLine {
    pub action: String,
    pub status: Option<StatusKind>,
    pub retries: i64,
    pub processed_at: String,
}

pub async fn statuses(conn: &mut SqliteConnection, resource_id: i64) -> Result<Vec<StatusLine>> {
    let rows = sqlx::query(
        "SELECT action_name, status, retries, processed_at FROM process_status
         WHERE resource_id = ? ORDER BY action_name",
    )
    .bind(resource_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| {
            let status: Option<String> = row.try_get("status")?;
            Ok(StatusLine {
                action: row.try_get("action_name")?,
                status: status.map(|s| s.parse()).transpose()?,
                retries: row.try_get("retries")?,
                processed_at: format_ts_iso(row.try_get("processed_at")?),
            })
        })
        .collect()
}

/// CLI entry point; prints to stdout.
pub async fn run_get(config: &Config, id: i64) -> Result<()> {
    let pool = db::connect(config).await?;
    let mut conn = pool.acquire().await?;
    let enrichment = Enrichment::load(&mut conn, id).await?;
    let lines = statuses(&mut conn, id).await?;
    drop(conn);
    pool.close().await;

    let r = &enrichment.resource;
    println!("--- Resource ---");
    println!("id:           {}", r.id);
    println!("origin:       {}", r.origin.as_str());
    println!("external_id:  {}", r.external_id);
    println!("url:          {}", r.url);
    println!("title:        {}", r.title);
    if let Some(publisher) = r.publisher() {
        println!("publisher:    {}", publisher);
    }
    if let Some(ref description) = r.description {
        println!("description:  {}", description);
    }
    if !r.tags.is_empty() {
        println!("tags:         {}", r.tags.join(", "));
    }
    println!("shared:       {}", r.shared.as_str());
    println!("saved_at:     {}", r.saved_at.format("%Y-%m-%dT%H:%M:%SZ"));
    println!();

    if let Some(ref a) = enrichment.annotation {
        println!("--- Annotation ---");
        println!("page:         {}", a.page_id);
        println!("quote:        {}", a.quote);
        println!("text:         {}", a.text);
        if let Some(ref link) = a.link_incontext {
            println!("in context:   {}", link);
        }
        println!();
    }

    println!("--- Status ({}) ---", lines.len());
    for line in &lines {
        println!(
            "{:<24} {:<17} retries={:<15} {}",
            line.action,
            line.status.map_or("-", |s| s.as_str()),
            retries_label(line.retries),
            line.processed_at
        );
    }
    println!();

    println!("--- Results ---");
    if let Some(ref s) = enrichment.summary {
        println!("summary:      {}", s.summary);
        println!("derived date: {}", s.derived_date);
    }
    if let Some(ref k) = enrichment.kagi {
        println!("kagi:         {}", k);
    }
    if let Some(ref w) = enrichment.wayback {
        println!("wayback:      {}", w.wayback_url);
    }
    if let Some(ref m) = enrichment.mastodon {
        println!("mastodon:     {}", if m.is_empty() { "(dry run)" } else { m });
    }
    if let Some(ref n) = enrichment.source_note {
        println!("source note:  {}", n);
    }

    Ok(())
}

/// Retry counter with the escape values spelled out.
pub fn retries_label(retries: i64) -> String {
    match retries {
        RETRIES_GRANDFATHERED => "grandfathered".to_string(),
        RETRIES_MANUAL => "manual".to_string(),
        n => n.to_string(),
    }
}

fn format_ts_iso(ts: i64) -> String {
    from_timestamp(ts).format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
