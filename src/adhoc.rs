//! On-demand commands that work on a single URL outside the schedules.
//!
//! `km robustify` prints robust-link markup for an archived page,
//! `km summarize` summarizes any URL, and `km wayback save|check` drives a
//! Save Page Now job by hand. None of them touch the status tracker; the
//! summarize and wayback commands do not write to the database at all.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::action::{ActionContext, ActionError};
use crate::actions::summarize::summarize_url;
use crate::actions::{KagiSummaryAction, WaybackService};
use crate::config::Config;
use crate::db;
use crate::jobs::{JobPoll, Submission};
use crate::models::{from_timestamp, Resource};
use crate::store;

/// Markup flavour for `km robustify`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkStyle {
    /// Jekyll `robustlink` include.
    #[default]
    Jekyll,
    /// Plain HTML anchor with `data-version*` attributes.
    Html,
    /// Jekyll `thursday_threads_quote` include.
    ThursdayThreads,
}

impl LinkStyle {
    pub fn from_flags(html: bool, thursday_threads: bool) -> Self {
        if html {
            LinkStyle::Html
        } else if thursday_threads {
            LinkStyle::ThursdayThreads
        } else {
            LinkStyle::Jekyll
        }
    }
}

/// A resource together with its stored archive capture.
#[derive(Debug, Clone)]
pub struct ArchivedPage {
    pub resource: Resource,
    pub wayback_url: String,
    pub archived_at: DateTime<Utc>,
}

/// The single archived resource saved under `url`.
pub async fn find_archived(conn: &mut SqliteConnection, url: &str) -> Result<ArchivedPage> {
    let rows: Vec<(i64, String, i64)> = sqlx::query_as(
        "SELECT r.id, w.wayback_url, w.processed_at
         FROM resources r JOIN action_wayback w ON w.resource_id = r.id
         WHERE r.url = ?",
    )
    .bind(url)
    .fetch_all(&mut *conn)
    .await?;

    let (id, wayback_url, processed_at) = match rows.as_slice() {
        [] => bail!("{} not found in wayback results", url),
        [row] => row.clone(),
        _ => bail!("more than one wayback entry found for {}", url),
    };
    Ok(ArchivedPage {
        resource: store::get(conn, id).await?,
        wayback_url,
        archived_at: from_timestamp(processed_at),
    })
}

pub fn robust_link(style: LinkStyle, page: &ArchivedPage) -> String {
    let href = &page.resource.url;
    let archive_url = &page.wayback_url;
    let archive_date = page.archived_at.format("%Y-%m-%d");
    let headline = page.resource.headline();
    let publisher = page.resource.publisher();
    let title = match &publisher {
        Some(p) => format!("{} | {}", headline, p),
        None => headline.clone(),
    };

    match style {
        LinkStyle::Html => format!(
            r#"<a href="{}" data-versionurl="{}" data-versiondate="{}" title="{}">REPLACE_ME</a>"#,
            href, archive_url, archive_date, title
        ),
        LinkStyle::ThursdayThreads => format!(
            "{{{{ thursday_threads_quote(href=\"{}\",\n blockquote='',\n versiondate=\"{}\",\n versionurl=\"{}\",\n anchor=\"{}\",\n post=\"{}\") }}}}",
            href,
            archive_date,
            archive_url,
            headline,
            publisher.map(|p| format!(", {}", p)).unwrap_or_default()
        ),
        LinkStyle::Jekyll => format!(
            "{{{{ robustlink(href=\"{}\", versionurl=\"{}\", versiondate=\"{}\", title=\"{}\", anchor=\"\") }}}}",
            href, archive_url, archive_date, title
        ),
    }
}

pub async fn run_robustify(config: &Config, url: &str, style: LinkStyle) -> Result<()> {
    let pool = db::connect(config).await?;
    let mut conn = pool.acquire().await?;
    let page = find_archived(&mut conn, url).await;
    drop(conn);
    pool.close().await;

    println!("{}", robust_link(style, &page?));
    Ok(())
}

/// Summary text for `km summarize`.
///
/// The publication date always comes from the fetched page; with `kagi`
/// the summary itself comes from the remote summarizer.
pub async fn summarize_text(ctx: &ActionContext, url: &str, quiet: bool, kagi: bool) -> Result<String> {
    let extractive = summarize_url(&ctx.http, url)
        .await
        .with_context(|| format!("summarizing {}", url))?;

    let summary = if kagi {
        let cfg = ctx
            .config
            .kagi
            .clone()
            .context("kagi is not configured")?;
        KagiSummaryAction::new(ctx.clone(), cfg)
            .fetch_summary(url)
            .await
            .with_context(|| format!("asking Kagi to summarize {}", url))?
    } else {
        extractive.summary
    };

    if quiet {
        return Ok(summary);
    }
    Ok(format!(
        "The webpage at {} was published on {}. It can be summarized as follows\n\n{}",
        url, extractive.derived_date, summary
    ))
}

fn wayback_service(ctx: &ActionContext) -> Result<WaybackService> {
    let cfg = ctx
        .config
        .wayback
        .clone()
        .context("wayback is not configured")?;
    Ok(WaybackService::new(ctx.clone(), cfg))
}

/// Submit `url` to Save Page Now; returns the line to show the operator.
pub async fn wayback_save(ctx: &ActionContext, url: &str) -> Result<String> {
    match wayback_service(ctx)?.save_url(url).await {
        Ok(Submission::Pending(job_id)) => Ok(format!(
            "Request to save '{}' submitted (job id {}).",
            url, job_id
        )),
        Ok(Submission::Finished(result)) => Ok(format!(
            "'{}' is already an archive address; nothing to save.",
            result.wayback_url
        )),
        Err(ActionError::Skip(reason)) => Ok(format!("Request to save '{}' not sent: {}.", url, reason)),
        Err(e) => Err(e).with_context(|| format!("saving {} to Wayback", url)),
    }
}

/// Check a Save Page Now job; returns the line to show the operator.
pub async fn wayback_check(ctx: &ActionContext, job_id: &str) -> Result<String> {
    match wayback_service(ctx)?.check_job(job_id).await {
        Ok(JobPoll::Pending) => Ok("Request is still in progress.".to_string()),
        Ok(JobPoll::Finished(result)) => Ok(format!(
            "Request {} is completed. Find the saved web page at {}",
            job_id, result.wayback_url
        )),
        Ok(JobPoll::Failed(message)) => Ok(format!("Request {} failed: {}", job_id, message)),
        Err(ActionError::Skip(reason)) => Ok(format!("Request {} not checked: {}.", job_id, reason)),
        Err(e) => Err(e).with_context(|| format!("checking Wayback job {}", job_id)),
    }
}
