//! Remote summary from the Kagi Universal Summarizer.

use async_trait::async_trait;
use serde::Deserialize;
use sqlx::SqliteConnection;
use tracing::{debug, info};

use super::WEB_ORIGINS;
use crate::action::{Action, ActionContext, ActionError};
use crate::config::KagiConfig;
use crate::http;
use crate::models::{Origin, Resource};
use crate::results;

const SERVICE: &str = "Kagi";

#[derive(Debug, Deserialize)]
struct SummarizeResponse {
    data: Option<SummarizeData>,
    error: Option<Vec<KagiError>>,
}

#[derive(Debug, Deserialize)]
struct SummarizeData {
    output: Option<String>,
}

#[derive(Debug, Deserialize)]
struct KagiError {
    msg: Option<String>,
}

pub struct KagiSummaryAction {
    ctx: ActionContext,
    config: KagiConfig,
}

impl KagiSummaryAction {
    pub fn new(ctx: ActionContext, config: KagiConfig) -> Self {
        Self { ctx, config }
    }

    /// Summary of `url`, without touching the database.
    pub async fn fetch_summary(&self, url: &str) -> Result<String, ActionError> {
        let endpoint = format!("{}/api/v0/summarize", self.config.base_url.trim_end_matches('/'));
        debug!(%endpoint, %url, "calling summarizer");

        let request = self
            .ctx
            .http
            .get(&endpoint)
            .query(&[("url", url)])
            .header("Accept", "application/json")
            .header("Authorization", format!("Bot {}", self.config.api_token));

        // Kagi reports errors in the body, whatever the status code.
        let response = request.send().await.map_err(|e| http::classify(SERVICE, e))?;
        let status = response.status();
        let body: SummarizeResponse = http::json(SERVICE, response).await?;

        if let Some(errors) = body.error.filter(|e| !e.is_empty()) {
            let msg = errors
                .into_iter()
                .filter_map(|e| e.msg)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ActionError::Retryable(format!("Kagi returned {}", msg)));
        }
        if !status.is_success() {
            return Err(ActionError::Retryable(format!("Kagi returned HTTP {}", status)));
        }

        body.data
            .and_then(|d| d.output)
            .filter(|o| !o.trim().is_empty())
            .ok_or_else(|| ActionError::Retryable("data.output not found in Kagi response".into()))
    }
}

#[async_trait]
impl Action for KagiSummaryAction {
    fn name(&self) -> &str {
        "KagiAction"
    }

    fn description(&self) -> &str {
        "Summary from the Kagi Universal Summarizer"
    }

    fn applies_to(&self) -> &[Origin] {
        &WEB_ORIGINS
    }

    async fn process(&self, conn: &mut SqliteConnection, resource: &Resource) -> Result<(), ActionError> {
        let summary = self.fetch_summary(&resource.url).await?;
        results::save_kagi(conn, resource.id, &summary).await?;
        info!(resource_id = resource.id, "stored Kagi summary");
        Ok(())
    }
}
