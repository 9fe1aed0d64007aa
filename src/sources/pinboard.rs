//! Bookmarks from Pinboard.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::DateTime;
use serde::Deserialize;
use sqlx::SqlitePool;
use tracing::{debug, info};

use super::{FetchSummary, Ingestor};
use crate::config::PinboardConfig;
use crate::models::{NewResource, Origin, Visibility};
use crate::store;

#[derive(Debug, Deserialize)]
struct Post {
    href: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    extended: String,
    time: String,
    #[serde(default)]
    shared: String,
    #[serde(default)]
    tags: String,
}

pub struct PinboardIngestor {
    http: reqwest::Client,
    config: PinboardConfig,
}

impl PinboardIngestor {
    pub fn new(http: reqwest::Client, config: PinboardConfig) -> Self {
        Self { http, config }
    }
}

/// Parse a `posts/all` response into bookmarks.
pub fn parse_posts(body: &str) -> Result<Vec<NewResource>> {
    let posts: Vec<Post> = serde_json::from_str(body).context("parsing Pinboard posts")?;
    posts
        .into_iter()
        .map(|post| {
            let saved_at = DateTime::parse_from_rfc3339(&post.time)
                .with_context(|| format!("bad time '{}' on {}", post.time, post.href))?
                .to_utc();
            let tags = post
                .tags
                .split(' ')
                .filter(|t| !t.is_empty())
                .map(|t| t.replace('-', " "))
                .collect();
            Ok(NewResource {
                origin: Origin::Pinboard,
                external_id: post.href.clone(),
                url: post.href,
                title: post.description,
                description: Some(post.extended).filter(|d| !d.is_empty()),
                tags,
                shared: if post.shared == "yes" {
                    Visibility::Public
                } else {
                    Visibility::Private
                },
                saved_at,
            })
        })
        .collect()
}

#[async_trait]
impl Ingestor for PinboardIngestor {
    fn name(&self) -> &str {
        "pinboard"
    }

    async fn fetch_updates(&self, pool: &SqlitePool) -> Result<FetchSummary> {
        let since = {
            let mut conn = pool.acquire().await?;
            store::latest_saved_at(&mut conn, Origin::Pinboard).await?
        };

        let mut params = vec![("format".to_string(), "json".to_string())];
        if let Some(since) = since {
            params.push((
                "fromdt".to_string(),
                since.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            ));
        }
        debug!(?params, "calling Pinboard");
        params.push(("auth_token".to_string(), self.config.auth_token.clone()));

        let url = format!("{}/v1/posts/all", self.config.base_url.trim_end_matches('/'));
        let response = self
            .http
            .get(&url)
            .query(&params)
            .send()
            .await
            .context("calling Pinboard")?;
        let status = response.status();
        let body = response.text().await.context("reading Pinboard response")?;
        if !status.is_success() {
            bail!("Pinboard returned HTTP {}: {}", status, body);
        }

        let bookmarks = parse_posts(&body)?;
        let mut summary = FetchSummary {
            source: self.name().to_string(),
            received: bookmarks.len(),
            ..FetchSummary::default()
        };

        let mut tx = pool.begin().await?;
        for bookmark in &bookmarks {
            store::upsert(&mut tx, bookmark).await?;
            summary.stored += 1;
        }
        tx.commit().await?;

        info!(received = summary.received, "fetched Pinboard bookmarks");
        Ok(summary)
    }
}
