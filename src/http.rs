//! HTTP plumbing shared by actions and ingestors.
//!
//! One rule decides how a failed call maps onto the action outcomes:
//!
//! - the request never got an answer (timeout, refused connection, DNS,
//!   interrupted body) → [`ActionError::Skip`], nothing was learned;
//! - the service answered but rejected the request (non-success status,
//!   error payload, unparseable body) → [`ActionError::Retryable`].
//!
//! Every request goes through a client built with the configured timeout, so
//! a stalled service surfaces as a `Skip` instead of a hang.

use anyhow::Result;
use reqwest::Response;
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::action::ActionError;
use crate::config::HttpConfig;

pub fn client(config: &HttpConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .user_agent(config.user_agent.clone())
        .build()?)
}

/// Map an error from `send()` or a body read onto an action outcome.
pub fn classify(service: &str, e: reqwest::Error) -> ActionError {
    if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
        ActionError::Skip(format!("{} unreachable: {}", service, e))
    } else if e.is_builder() {
        ActionError::Fatal(anyhow::Error::new(e).context(format!("building {} request", service)))
    } else {
        ActionError::Retryable(format!("{} error: {}", service, e))
    }
}

/// Send a prepared request and insist on a success status.
pub async fn send(service: &str, request: reqwest::RequestBuilder) -> Result<Response, ActionError> {
    let response = request.send().await.map_err(|e| classify(service, e))?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ActionError::Retryable(format!(
        "{} returned HTTP {}: {}",
        service,
        status,
        truncate(&body, 300)
    )))
}

/// Read a response body as JSON.
pub async fn json<T: DeserializeOwned>(service: &str, response: Response) -> Result<T, ActionError> {
    let text = response.text().await.map_err(|e| classify(service, e))?;
    serde_json::from_str(&text).map_err(|e| {
        ActionError::Retryable(format!(
            "{} returned a body that is not the expected JSON ({}): {}",
            service,
            e,
            truncate(&text, 300)
        ))
    })
}

/// Send a request and decode its JSON body.
pub async fn send_json<T: DeserializeOwned>(
    service: &str,
    request: reqwest::RequestBuilder,
) -> Result<T, ActionError> {
    let response = send(service, request).await?;
    json(service, response).await
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
