//! Wayback Machine archiving through Save Page Now.
//!
//! Saving is asynchronous on the archive's side: a save request returns a
//! job id, and the capture shows up later under the job's status endpoint.
//! [`WaybackService`] plugs that into the generic two-stage pattern in
//! [`crate::jobs`]; [`save_action`] and [`results_action`] are the two stages.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use sqlx::SqliteConnection;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::WEB_ORIGINS;
use crate::action::{ActionContext, ActionError};
use crate::config::WaybackConfig;
use crate::http;
use crate::jobs::{JobPoll, JobService, PollJob, SubmitJob, Submission};
use crate::models::{Origin, Resource};
use crate::results::{self, WaybackResult};

const SERVICE: &str = "Wayback";

/// URLs that already live in an archive are recorded as they are.
const ARCHIVE_PREFIXES: [&str; 3] = [
    "https://archive.org/",
    "https://archive.is/",
    "https://archive.ph/",
];

#[derive(Debug, Deserialize)]
struct SaveResponse {
    job_id: Option<String>,
    status: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    original_url: Option<String>,
    timestamp: Option<String>,
    message: Option<String>,
    status_ext: Option<String>,
}

pub struct WaybackService {
    ctx: ActionContext,
    config: WaybackConfig,
}

impl WaybackService {
    pub fn new(ctx: ActionContext, config: WaybackConfig) -> Self {
        Self { ctx, config }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorization(&self) -> String {
        format!("LOW {}:{}", self.config.access_key, self.config.secret_key)
    }

    /// Public address of a capture.
    pub fn capture_url(&self, timestamp: &str, original_url: &str) -> String {
        format!("https://web.archive.org/web/{}/{}", timestamp, original_url)
    }
}

/// Parse a `yyyymmddhhmmss` capture timestamp.
pub fn parse_timestamp(ts: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(ts, "%Y%m%d%H%M%S")
        .ok()
        .map(|n| n.and_utc())
}

pub fn is_archive_url(url: &str) -> bool {
    ARCHIVE_PREFIXES.iter().any(|p| url.starts_with(p))
}

#[async_trait]
impl JobService for WaybackService {
    type Output = WaybackResult;

    fn service(&self) -> &str {
        "wayback"
    }

    fn applies_to(&self) -> &[Origin] {
        &WEB_ORIGINS
    }

    async fn submit(&self, resource: &Resource) -> Result<Submission<WaybackResult>, ActionError> {
        self.save_url(&resource.url).await
    }

    async fn poll(&self, handle: &str) -> Result<JobPoll<WaybackResult>, ActionError> {
        self.check_job(handle).await
    }

    async fn record(
        &self,
        conn: &mut SqliteConnection,
        resource: &Resource,
        output: &WaybackResult,
    ) -> Result<(), ActionError> {
        results::save_wayback(conn, resource.id, output).await?;
        info!(resource_id = resource.id, wayback_url = %output.wayback_url, "archived");
        Ok(())
    }
}

impl WaybackService {
    /// Ask Save Page Now for a capture of `url`.
    pub async fn save_url(&self, url: &str) -> Result<Submission<WaybackResult>, ActionError> {
        if is_archive_url(url) {
            return Ok(Submission::Finished(WaybackResult {
                wayback_url: url.to_string(),
                wayback_timestamp: None,
                details: None,
            }));
        }
        if self.ctx.dry_run {
            info!(%url, "dry run: would have archived");
            return Err(ActionError::Skip("dry run".into()));
        }

        let request = self
            .ctx
            .http
            .post(self.endpoint("/save"))
            .header("Accept", "application/json")
            .header("Authorization", self.authorization())
            .form(&[
                ("url", url),
                ("capture_screenshot", "1"),
                ("delay_wb_availability", "1"),
                ("skip_first_archive", "1"),
                ("email_result", "0"),
            ]);
        let saved: SaveResponse = http::send_json(SERVICE, request).await?;

        if saved.status.as_deref() == Some("error") {
            return Err(ActionError::Retryable(format!(
                "Wayback refused {}: {}",
                url,
                saved.message.unwrap_or_default()
            )));
        }
        if let Some(message) = &saved.message {
            warn!(%url, %message, "Wayback said");
        }
        let job_id = saved.job_id.ok_or_else(|| {
            ActionError::Retryable("job_id not found in response from Wayback".into())
        })?;
        Ok(Submission::Pending(job_id))
    }

    /// Status of a Save Page Now job.
    pub async fn check_job(&self, handle: &str) -> Result<JobPoll<WaybackResult>, ActionError> {
        if self.ctx.dry_run {
            info!(%handle, "dry run: would have checked status");
            return Err(ActionError::Skip("dry run".into()));
        }

        let request = self
            .ctx
            .http
            .get(self.endpoint(&format!("/save/status/{}", handle)))
            .header("Accept", "application/json")
            .header("Authorization", self.authorization());
        let response = http::send(SERVICE, request).await?;
        let raw = response
            .text()
            .await
            .map_err(|e| http::classify(SERVICE, e))?;
        let status: StatusResponse = serde_json::from_str(&raw).map_err(|e| {
            ActionError::Retryable(format!("unreadable Wayback status for {}: {}", handle, e))
        })?;
        debug!(%handle, status = %status.status, "Wayback job status");

        match status.status.as_str() {
            "pending" => Ok(JobPoll::Pending),
            "success" => match (&status.timestamp, &status.original_url) {
                (Some(ts), Some(original)) => Ok(JobPoll::Finished(WaybackResult {
                    wayback_url: self.capture_url(ts, original),
                    wayback_timestamp: parse_timestamp(ts),
                    details: Some(raw),
                })),
                _ => Err(ActionError::Retryable(format!(
                    "malformed Wayback response for {}",
                    handle
                ))),
            },
            _ => Ok(JobPoll::Failed(
                status
                    .message
                    .or(status.status_ext)
                    .unwrap_or_else(|| status.status.clone()),
            )),
        }
    }
}

/// Stage 1: ask the archive to save the page.
pub fn save_action(service: Arc<WaybackService>) -> SubmitJob<WaybackService> {
    SubmitJob::new("WaybackSaveAction", "Ask the Wayback Machine to save the page", service)
}

/// Stage 2: record the capture once the archive has made it.
pub fn results_action(service: Arc<WaybackService>) -> PollJob<WaybackService> {
    PollJob::new(
        "WaybackResultsAction",
        "Record the Wayback capture of a saved page",
        service,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StatusKind;
    use crate::runner::Runner;
    use crate::status;
    use crate::testing::{context, seed_bookmark, temp_config, temp_pool};
    use chrono::TimeZone;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn service(server: &MockServer, tmp: &tempfile::TempDir) -> Arc<WaybackService> {
        Arc::new(WaybackService::new(
            context(temp_config(tmp)),
            WaybackConfig {
                access_key: "ak".into(),
                secret_key: "sk".into(),
                base_url: server.uri(),
            },
        ))
    }

    #[test]
    fn parses_capture_timestamps() {
        assert_eq!(
            parse_timestamp("20240919140748"),
            Some(Utc.with_ymd_and_hms(2024, 9, 19, 14, 7, 48).unwrap())
        );
        assert_eq!(parse_timestamp("not-a-time"), None);
    }

    #[tokio::test]
    async fn save_then_collect_the_capture() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/save"))
            .and(header("Authorization", "LOW ak:sk"))
            .and(body_string_contains("capture_screenshot=1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "url": "https://example.com/a",
                "job_id": "spn2-abc"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/save/status/spn2-abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "success",
                "job_id": "spn2-abc",
                "original_url": "https://example.com/a",
                "timestamp": "20240919140748"
            })))
            .mount(&server)
            .await;

        let (tmp, pool) = temp_pool().await;
        let id = seed_bookmark(&pool, "https://example.com/a").await;
        let wayback = service(&server, &tmp);
        let runner = Runner::new(pool.clone(), 5);

        runner.run(&save_action(wayback.clone())).await.unwrap();
        runner.run(&results_action(wayback)).await.unwrap();

        let mut conn = pool.acquire().await.unwrap();
        let archived = results::wayback(&mut conn, id).await.unwrap().unwrap();
        assert_eq!(
            archived.wayback_url,
            "https://web.archive.org/web/20240919140748/https://example.com/a"
        );
        assert_eq!(
            archived.wayback_timestamp,
            Some(Utc.with_ymd_and_hms(2024, 9, 19, 14, 7, 48).unwrap())
        );
    }

    #[tokio::test]
    async fn pending_capture_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/save"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"job_id": "spn2-x"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/save/status/spn2-x"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "pending"})),
            )
            .mount(&server)
            .await;

        let (tmp, pool) = temp_pool().await;
        let id = seed_bookmark(&pool, "https://example.com/a").await;
        let wayback = service(&server, &tmp);
        let runner = Runner::new(pool.clone(), 5);

        runner.run(&save_action(wayback.clone())).await.unwrap();
        runner.run(&results_action(wayback)).await.unwrap();

        let mut conn = pool.acquire().await.unwrap();
        let rec = status::get_status(&mut conn, id, "WaybackResultsAction")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rec.status, Some(StatusKind::Retryable));
        assert!(results::wayback(&mut conn, id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn archive_urls_are_recorded_without_a_request() {
        let server = MockServer::start().await;
        let (tmp, pool) = temp_pool().await;
        let id = seed_bookmark(&pool, "https://archive.org/details/thing").await;
        let wayback = service(&server, &tmp);
        let runner = Runner::new(pool.clone(), 5);

        runner.run(&save_action(wayback.clone())).await.unwrap();
        runner.run(&results_action(wayback)).await.unwrap();

        let mut conn = pool.acquire().await.unwrap();
        let archived = results::wayback(&mut conn, id).await.unwrap().unwrap();
        assert_eq!(archived.wayback_url, "https://archive.org/details/thing");
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn error_status_on_save_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "error",
                "message": "You have already reached the limit of active sessions."
            })))
            .mount(&server)
            .await;

        let (tmp, _pool) = temp_pool().await;
        let wayback = service(&server, &tmp);
        let resource = crate::models::Resource {
            id: 1,
            origin: Origin::Pinboard,
            external_id: "https://example.com/a".into(),
            url: "https://example.com/a".into(),
            title: "A".into(),
            description: None,
            tags: vec![],
            shared: crate::models::Visibility::Public,
            saved_at: Utc::now(),
        };
        let result = wayback.submit(&resource).await;
        assert!(matches!(result, Err(ActionError::Retryable(_))));
    }
}
