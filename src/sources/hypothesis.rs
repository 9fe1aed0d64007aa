//! Annotations from Hypothesis.
//!
//! Every annotation produces two resources: the annotated page (keyed on its
//! URI) and the annotation itself (keyed on the annotation id). Replies are
//! ignored. The search cursor is the newest `updated` time already stored,
//! kept to the microsecond, and results are paged through with
//! `search_after`.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::SqlitePool;
use tracing::{debug, info};

use super::{FetchSummary, Ingestor};
use crate::config::HypothesisConfig;
use crate::models::{NewAnnotation, NewResource, Origin, Visibility};
use crate::store;

const PAGE_SIZE: usize = 200;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    rows: Vec<Row>,
}

#[derive(Debug, Deserialize)]
struct Row {
    id: String,
    uri: String,
    #[serde(default)]
    text: String,
    created: String,
    updated: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    links: Links,
    #[serde(default)]
    hidden: bool,
    #[serde(default)]
    flagged: bool,
    #[serde(default)]
    references: Option<Vec<String>>,
    #[serde(default)]
    target: Vec<Target>,
    #[serde(default)]
    document: Document,
}

#[derive(Debug, Default, Deserialize)]
struct Links {
    html: Option<String>,
    incontext: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Target {
    #[serde(default)]
    selector: Vec<Selector>,
}

#[derive(Debug, Deserialize)]
struct Selector {
    #[serde(rename = "type")]
    kind: String,
    exact: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Document {
    #[serde(default)]
    title: Vec<String>,
}

/// One annotation split into the records the store keeps.
#[derive(Debug, Clone)]
pub struct ParsedAnnotation {
    pub page: NewResource,
    pub annotation: NewResource,
    pub detail: NewAnnotation,
}

/// Result of parsing one search page.
#[derive(Debug, Default)]
pub struct SearchPage {
    pub annotations: Vec<ParsedAnnotation>,
    pub replies: usize,
    /// Raw `updated` value of the last row, for the next `search_after`.
    pub last_updated: Option<String>,
    pub rows: usize,
}

fn timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("bad Hypothesis timestamp '{}'", raw))?
        .to_utc())
}

/// `search_after` is exclusive, so the exact stored time is the cursor.
fn search_after(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Page title when the document carries none: the last path segment
/// without its extension.
fn title_from_uri(uri: &str) -> String {
    let segment = uri
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(uri);
    match segment.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => segment.to_string(),
    }
}

impl Row {
    fn quote(&self) -> String {
        self.target
            .iter()
            .flat_map(|t| t.selector.iter())
            .find(|s| s.kind == "TextQuoteSelector")
            .and_then(|s| s.exact.clone())
            .unwrap_or_default()
    }

    fn title(&self) -> String {
        self.document
            .title
            .first()
            .filter(|t| !t.trim().is_empty())
            .cloned()
            .unwrap_or_else(|| title_from_uri(&self.uri))
    }

    fn into_parsed(self) -> Result<ParsedAnnotation> {
        let created = timestamp(&self.created)?;
        let updated = timestamp(&self.updated)?;
        let shared = if self.hidden {
            Visibility::Private
        } else {
            Visibility::Public
        };
        let title = self.title();
        let quote = self.quote();

        let page = NewResource {
            origin: Origin::HypothesisPage,
            external_id: self.uri.clone(),
            url: self.uri.clone(),
            title: title.clone(),
            description: None,
            tags: Vec::new(),
            shared,
            saved_at: created,
        };
        let annotation = NewResource {
            origin: Origin::HypothesisAnnotation,
            external_id: self.id,
            url: self.uri,
            title,
            description: None,
            tags: self.tags,
            shared,
            saved_at: created,
        };
        let detail = NewAnnotation {
            quote,
            text: self.text,
            link_html: self.links.html,
            link_incontext: self.links.incontext,
            flagged: self.flagged,
            created_at: created,
            updated_at: updated,
        };
        Ok(ParsedAnnotation {
            page,
            annotation,
            detail,
        })
    }
}

/// Parse one `/api/search` response.
pub fn parse_search(body: &str) -> Result<SearchPage> {
    let response: SearchResponse =
        serde_json::from_str(body).context("parsing Hypothesis search results")?;
    let mut page = SearchPage {
        rows: response.rows.len(),
        last_updated: response.rows.last().map(|r| r.updated.clone()),
        ..SearchPage::default()
    };
    for row in response.rows {
        if row.references.as_ref().is_some_and(|r| !r.is_empty()) {
            page.replies += 1;
            continue;
        }
        page.annotations.push(row.into_parsed()?);
    }
    Ok(page)
}

pub struct HypothesisIngestor {
    http: reqwest::Client,
    config: HypothesisConfig,
}

impl HypothesisIngestor {
    pub fn new(http: reqwest::Client, config: HypothesisConfig) -> Self {
        Self { http, config }
    }

    async fn search(&self, search_after: Option<&str>) -> Result<SearchPage> {
        let url = format!("{}/api/search", self.config.base_url.trim_end_matches('/'));
        let limit = PAGE_SIZE.to_string();
        let mut params = vec![
            ("sort", "updated"),
            ("order", "asc"),
            ("limit", limit.as_str()),
            ("user", self.config.user.as_str()),
        ];
        if let Some(after) = search_after {
            params.push(("search_after", after));
        }
        debug!(?params, "calling Hypothesis");

        let response = self
            .http
            .get(&url)
            .header("Accept", "application/vnd.hypothesis.v1+json")
            .bearer_auth(&self.config.api_token)
            .query(&params)
            .send()
            .await
            .context("calling Hypothesis")?;
        let status = response.status();
        let body = response.text().await.context("reading Hypothesis response")?;
        if !status.is_success() {
            bail!("Hypothesis returned HTTP {}: {}", status, body);
        }
        parse_search(&body)
    }
}

#[async_trait]
impl Ingestor for HypothesisIngestor {
    fn name(&self) -> &str {
        "hypothesis"
    }

    async fn fetch_updates(&self, pool: &SqlitePool) -> Result<FetchSummary> {
        let since = {
            let mut conn = pool.acquire().await?;
            store::latest_annotation_update(&mut conn).await?
        };
        let mut cursor = since.map(search_after);

        let mut summary = FetchSummary {
            source: self.name().to_string(),
            ..FetchSummary::default()
        };

        loop {
            let page = self.search(cursor.as_deref()).await?;
            summary.received += page.rows;
            summary.ignored += page.replies;

            let mut tx = pool.begin().await?;
            for parsed in &page.annotations {
                let page_id = store::upsert(&mut tx, &parsed.page).await?;
                let annotation_id = store::upsert(&mut tx, &parsed.annotation).await?;
                store::upsert_annotation(&mut tx, annotation_id, page_id, &parsed.detail).await?;
                summary.stored += 1;
            }
            tx.commit().await?;

            if page.rows < PAGE_SIZE || page.last_updated.is_none() {
                break;
            }
            cursor = page.last_updated;
        }

        info!(
            received = summary.received,
            stored = summary.stored,
            replies = summary.ignored,
            "fetched Hypothesis annotations"
        );
        Ok(summary)
    }
}
