//! Share bookmarks and annotated pages on Mastodon.

use async_trait::async_trait;
use serde::Deserialize;
use sqlx::SqliteConnection;
use tracing::info;

use super::WEB_ORIGINS;
use crate::action::{Action, ActionContext, ActionError};
use crate::config::MastodonConfig;
use crate::http;
use crate::models::{Origin, Resource};
use crate::results;

const SERVICE: &str = "Mastodon";
const STATUS_LIMIT: usize = 500;
/// Bookmark emoji plus the spaces around title and URL.
const FIXED_OVERHEAD: usize = 4;

#[derive(Debug, Deserialize)]
struct StatusResponse {
    uri: String,
}

pub struct MastodonAction {
    ctx: ActionContext,
    config: MastodonConfig,
}

impl MastodonAction {
    pub fn new(ctx: ActionContext, config: MastodonConfig) -> Self {
        Self { ctx, config }
    }
}

/// Status text for a resource, with the title cut to fit the length limit.
pub fn status_text(resource: &Resource, hashtag: &str) -> String {
    let url = resource.normalized_url();
    let annotation = resource
        .annotation_url()
        .map(|a| format!(" \u{1f5d2} annotated {}", a))
        .unwrap_or_default();
    let hashtag = format!(" {}", hashtag);

    let room = STATUS_LIMIT
        .saturating_sub(url.chars().count())
        .saturating_sub(FIXED_OVERHEAD)
        .saturating_sub(annotation.chars().count())
        .saturating_sub(hashtag.chars().count());
    let title: String = resource.title.chars().take(room).collect();

    format!("\u{1f516} {} {}{}{}", title, url, annotation, hashtag)
}

#[async_trait]
impl Action for MastodonAction {
    fn name(&self) -> &str {
        "MastodonAction"
    }

    fn description(&self) -> &str {
        "Post the title and link to Mastodon"
    }

    fn applies_to(&self) -> &[Origin] {
        &WEB_ORIGINS
    }

    async fn process(&self, conn: &mut SqliteConnection, resource: &Resource) -> Result<(), ActionError> {
        let text = status_text(resource, &self.config.hashtag);

        let uri = if self.ctx.dry_run {
            info!(resource_id = resource.id, %text, "dry run: would have posted");
            String::new()
        } else {
            let endpoint = format!("{}/api/v1/statuses", self.config.base_url.trim_end_matches('/'));
            let request = self
                .ctx
                .http
                .post(&endpoint)
                .bearer_auth(&self.config.access_token)
                .json(&serde_json::json!({ "status": text }));
            let posted: StatusResponse = http::send_json(SERVICE, request).await?;
            info!(resource_id = resource.id, uri = %posted.uri, "posted");
            posted.uri
        };

        results::save_mastodon(conn, resource.id, &uri).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::models::Visibility;
    use crate::runner::Runner;
    use crate::testing::{context, new_resource, seed, seed_bookmark, temp_pool};
    use chrono::Utc;
    use std::sync::Arc;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn resource(origin: Origin, url: &str, title: &str) -> Resource {
        Resource {
            id: 1,
            origin,
            external_id: url.into(),
            url: url.into(),
            title: title.into(),
            description: None,
            tags: vec![],
            shared: Visibility::Public,
            saved_at: Utc::now(),
        }
    }

    fn mastodon_config(base_url: String) -> MastodonConfig {
        MastodonConfig {
            base_url,
            access_token: "secret".into(),
            hashtag: "#BookmarkShare".into(),
        }
    }

    #[test]
    fn bookmark_text() {
        let r = resource(Origin::Pinboard, "https://example.com/a", "A Title | Pub");
        assert_eq!(
            status_text(&r, "#BookmarkShare"),
            "\u{1f516} A Title | Pub https://example.com/a #BookmarkShare"
        );
    }

    #[test]
    fn annotated_page_links_the_annotations() {
        let r = resource(Origin::HypothesisPage, "https://example.com/p", "Page");
        let text = status_text(&r, "#BookmarkShare");
        assert!(text.contains(" \u{1f5d2} annotated https://via.hypothes.is/https://example.com/p"));
    }

    #[test]
    fn long_titles_are_truncated() {
        let r = resource(Origin::Pinboard, "https://example.com/a", &"t".repeat(1000));
        let text = status_text(&r, "#BookmarkShare");
        assert!(text.chars().count() <= STATUS_LIMIT);
        assert!(text.ends_with("https://example.com/a #BookmarkShare"));
    }

    #[tokio::test]
    async fn posts_and_records_the_uri() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/statuses"))
            .and(header("Authorization", "Bearer secret"))
            .and(body_string_contains("#BookmarkShare"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "1",
                "uri": "https://social.example/users/me/statuses/1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (tmp, pool) = temp_pool().await;
        let id = seed_bookmark(&pool, "https://example.com/a").await;
        let action = MastodonAction::new(
            context(Config::minimal(tmp.path().join("km.sqlite"))),
            mastodon_config(server.uri()),
        );

        let runner = Runner::new(pool.clone(), 5);
        runner.run(&action).await.unwrap();
        // completed pairs are never attempted again
        runner.run(&action).await.unwrap();

        let mut conn = pool.acquire().await.unwrap();
        assert_eq!(
            results::mastodon(&mut conn, id).await.unwrap().as_deref(),
            Some("https://social.example/users/me/statuses/1")
        );
    }

    #[tokio::test]
    async fn dry_run_records_an_empty_uri() {
        let (tmp, pool) = temp_pool().await;
        let id = seed(
            &pool,
            &new_resource(Origin::HypothesisPage, "https://example.com/p", "Page"),
        )
        .await;
        let ctx = ActionContext::new(Arc::new(Config::minimal(tmp.path().join("km.sqlite"))), true)
            .unwrap();
        let action = MastodonAction::new(ctx, mastodon_config("http://127.0.0.1:1".into()));

        Runner::new(pool.clone(), 5).run(&action).await.unwrap();

        let mut conn = pool.acquire().await.unwrap();
        assert_eq!(results::mastodon(&mut conn, id).await.unwrap().as_deref(), Some(""));
    }
}
