//! Two-stage jobs: submit work to a remote service, pick up the result later.
//!
//! Some services accept a request and answer with a job handle instead of a
//! result. Rather than waiting inside one attempt, the work is split across
//! two actions:
//!
//! - [`SubmitJob`] (stage 1) submits the resource and stores the handle in
//!   `job_handles`. Some submissions finish immediately; their result is
//!   stored in the same row.
//! - [`PollJob`] (stage 2) looks the handle up and polls it. It is the only
//!   writer of the service's result table, so a resource only counts as done
//!   once a definitive answer has been recorded.
//!
//! | stage 2 finds | outcome |
//! |---------------|---------|
//! | no handle yet | `Skip` |
//! | result stored at submit time | record, `Ok` |
//! | service says pending | `Retryable`, bounded by the retry limit |
//! | service says failed | `Retryable` |
//! | service says finished | record, `Ok` |

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::SqliteConnection;
use std::sync::Arc;
use tracing::{debug, info};

use crate::action::{Action, ActionError};
use crate::models::{from_timestamp, Origin, Resource};

/// What a submit call produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission<T> {
    /// The service queued the work under this handle.
    Pending(String),
    /// Nothing to wait for.
    Finished(T),
}

/// What a poll call produced.
#[derive(Debug, Clone, PartialEq)]
pub enum JobPoll<T> {
    Pending,
    Finished(T),
    Failed(String),
}

/// A remote service driven through the submit/poll pattern.
#[async_trait]
pub trait JobService: Send + Sync {
    /// Result type, kept as JSON in `job_handles` between the two stages.
    type Output: Serialize + DeserializeOwned + Send + Sync;

    /// Key under which handles are stored.
    fn service(&self) -> &str;

    fn applies_to(&self) -> &[Origin] {
        &Origin::ALL
    }

    async fn submit(&self, resource: &Resource) -> Result<Submission<Self::Output>, ActionError>;

    async fn poll(&self, handle: &str) -> Result<JobPoll<Self::Output>, ActionError>;

    /// Write the final result to the service's result table.
    async fn record(
        &self,
        conn: &mut SqliteConnection,
        resource: &Resource,
        output: &Self::Output,
    ) -> Result<(), ActionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Finished,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Finished => "finished",
            JobState::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "finished" => JobState::Finished,
            "failed" => JobState::Failed,
            _ => JobState::Pending,
        }
    }
}

/// One row of `job_handles`.
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub resource_id: i64,
    pub service: String,
    pub handle: String,
    pub state: JobState,
    pub result_json: Option<String>,
    pub submitted_at: chrono::DateTime<Utc>,
}

type HandleRow = (i64, String, String, String, Option<String>, i64);

fn handle_from_row(row: HandleRow) -> JobHandle {
    let (resource_id, service, handle, state, result_json, submitted_at) = row;
    JobHandle {
        resource_id,
        service,
        handle,
        state: JobState::parse(&state),
        result_json,
        submitted_at: from_timestamp(submitted_at),
    }
}

pub async fn get_handle(
    conn: &mut SqliteConnection,
    resource_id: i64,
    service: &str,
) -> Result<Option<JobHandle>> {
    let row: Option<HandleRow> = sqlx::query_as(
        "SELECT resource_id, service, handle, state, result_json, submitted_at
         FROM job_handles WHERE resource_id = ? AND service = ?",
    )
    .bind(resource_id)
    .bind(service)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.map(handle_from_row))
}

pub async fn save_handle(
    conn: &mut SqliteConnection,
    resource_id: i64,
    service: &str,
    handle: &str,
    state: JobState,
    result_json: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO job_handles (resource_id, service, handle, state, result_json, submitted_at)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT(resource_id, service) DO UPDATE SET
            handle = excluded.handle,
            state = excluded.state,
            result_json = excluded.result_json",
    )
    .bind(resource_id)
    .bind(service)
    .bind(handle)
    .bind(state.as_str())
    .bind(result_json)
    .bind(Utc::now().timestamp())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Handles for `service` that have not reached a result, oldest first.
pub async fn unfinished(conn: &mut SqliteConnection, service: &str) -> Result<Vec<JobHandle>> {
    let rows: Vec<HandleRow> = sqlx::query_as(
        "SELECT resource_id, service, handle, state, result_json, submitted_at
         FROM job_handles WHERE service = ? AND state != 'finished'
         ORDER BY submitted_at ASC",
    )
    .bind(service)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.into_iter().map(handle_from_row).collect())
}

/// Stage 1: submit each resource and remember the handle.
pub struct SubmitJob<S> {
    name: String,
    description: String,
    service: Arc<S>,
}

impl<S: JobService> SubmitJob<S> {
    pub fn new(name: impl Into<String>, description: impl Into<String>, service: Arc<S>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            service,
        }
    }
}

#[async_trait]
impl<S: JobService> Action for SubmitJob<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn applies_to(&self) -> &[Origin] {
        self.service.applies_to()
    }

    async fn process(&self, conn: &mut SqliteConnection, resource: &Resource) -> Result<(), ActionError> {
        let service = self.service.service();
        match self.service.submit(resource).await? {
            Submission::Pending(handle) => {
                save_handle(conn, resource.id, service, &handle, JobState::Pending, None).await?;
                info!(service, resource_id = resource.id, %handle, "job submitted");
            }
            Submission::Finished(output) => {
                let json = serde_json::to_string(&output).context("serializing job result")?;
                save_handle(conn, resource.id, service, "", JobState::Finished, Some(&json)).await?;
                info!(service, resource_id = resource.id, "job finished at submit");
            }
        }
        Ok(())
    }
}

/// Stage 2: poll the stored handle until the service gives a final answer.
pub struct PollJob<S> {
    name: String,
    description: String,
    service: Arc<S>,
}

impl<S: JobService> PollJob<S> {
    pub fn new(name: impl Into<String>, description: impl Into<String>, service: Arc<S>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            service,
        }
    }
}

#[async_trait]
impl<S: JobService> Action for PollJob<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn applies_to(&self) -> &[Origin] {
        self.service.applies_to()
    }

    async fn process(&self, conn: &mut SqliteConnection, resource: &Resource) -> Result<(), ActionError> {
        let service = self.service.service();
        let job = get_handle(conn, resource.id, service)
            .await?
            .ok_or_else(|| ActionError::Skip(format!("no {} job submitted yet", service)))?;

        if job.state == JobState::Finished {
            let json = job.result_json.as_deref().unwrap_or("null");
            let output: S::Output = serde_json::from_str(json)
                .with_context(|| format!("stored {} result for resource {} is unreadable", service, resource.id))?;
            return self.service.record(conn, resource, &output).await;
        }

        debug!(service, resource_id = resource.id, handle = %job.handle, "polling job");
        match self.service.poll(&job.handle).await? {
            JobPoll::Pending => Err(ActionError::Retryable(format!(
                "{} job {} still pending",
                service, job.handle
            ))),
            JobPoll::Failed(reason) => {
                save_handle(conn, resource.id, service, &job.handle, JobState::Failed, None).await?;
                Err(ActionError::Retryable(format!(
                    "{} job {} failed: {}",
                    service, job.handle, reason
                )))
            }
            JobPoll::Finished(output) => {
                let json = serde_json::to_string(&output).context("serializing job result")?;
                save_handle(conn, resource.id, service, &job.handle, JobState::Finished, Some(&json))
                    .await?;
                self.service.record(conn, resource, &output).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StatusKind;
    use crate::runner::Runner;
    use crate::status;
    use crate::testing::{seed_bookmark, temp_pool};
    use serde::Deserialize;
    use std::sync::Mutex;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Echo {
        url: String,
    }

    /// Answers polls from a script, one entry per call.
    struct Scripted {
        polls: Mutex<Vec<JobPoll<Echo>>>,
        immediate: bool,
    }

    impl Scripted {
        fn new(immediate: bool, mut polls: Vec<JobPoll<Echo>>) -> Arc<Self> {
            polls.reverse();
            Arc::new(Self {
                polls: Mutex::new(polls),
                immediate,
            })
        }
    }

    #[async_trait]
    impl JobService for Scripted {
        type Output = Echo;

        fn service(&self) -> &str {
            "echo"
        }

        async fn submit(&self, resource: &Resource) -> Result<Submission<Echo>, ActionError> {
            if self.immediate {
                Ok(Submission::Finished(Echo {
                    url: resource.url.clone(),
                }))
            } else {
                Ok(Submission::Pending(format!("job-{}", resource.id)))
            }
        }

        async fn poll(&self, _handle: &str) -> Result<JobPoll<Echo>, ActionError> {
            Ok(self.polls.lock().unwrap().pop().unwrap_or(JobPoll::Pending))
        }

        async fn record(
            &self,
            conn: &mut SqliteConnection,
            resource: &Resource,
            output: &Echo,
        ) -> Result<(), ActionError> {
            crate::results::save_mastodon(conn, resource.id, &output.url).await?;
            Ok(())
        }
    }

    fn stages(service: Arc<Scripted>) -> (SubmitJob<Scripted>, PollJob<Scripted>) {
        (
            SubmitJob::new("EchoSubmit", "submit", service.clone()),
            PollJob::new("EchoPoll", "poll", service),
        )
    }

    #[tokio::test]
    async fn poll_before_submit_is_skipped() {
        let (_tmp, pool) = temp_pool().await;
        let id = seed_bookmark(&pool, "https://example.com/a").await;
        let (_, poll) = stages(Scripted::new(false, vec![]));

        let summary = Runner::new(pool.clone(), 5).run(&poll).await.unwrap();
        assert_eq!(summary.skipped, 1);

        let mut conn = pool.acquire().await.unwrap();
        assert!(status::get_status(&mut conn, id, "EchoPoll").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn pending_then_finished() {
        let (_tmp, pool) = temp_pool().await;
        let id = seed_bookmark(&pool, "https://example.com/a").await;
        let done = Echo {
            url: "https://archive.example/a".into(),
        };
        let (submit, poll) = stages(Scripted::new(
            false,
            vec![JobPoll::Pending, JobPoll::Finished(done.clone())],
        ));
        let runner = Runner::new(pool.clone(), 5);

        runner.run(&submit).await.unwrap();
        runner.run(&poll).await.unwrap();

        let mut conn = pool.acquire().await.unwrap();
        let rec = status::get_status(&mut conn, id, "EchoPoll").await.unwrap().unwrap();
        assert_eq!(rec.status, Some(StatusKind::Retryable));
        assert_eq!(rec.retries, 1);
        drop(conn);

        runner.run(&poll).await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        let rec = status::get_status(&mut conn, id, "EchoPoll").await.unwrap().unwrap();
        assert_eq!(rec.status, Some(StatusKind::Completed));
        assert_eq!(
            crate::results::mastodon(&mut conn, id).await.unwrap().as_deref(),
            Some("https://archive.example/a")
        );
        assert!(unfinished(&mut conn, "echo").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn finished_at_submit_needs_no_poll() {
        let (_tmp, pool) = temp_pool().await;
        let id = seed_bookmark(&pool, "https://archive.org/details/x").await;
        let (submit, poll) = stages(Scripted::new(true, vec![JobPoll::Failed("unused".into())]));
        let runner = Runner::new(pool.clone(), 5);

        runner.run(&submit).await.unwrap();
        runner.run(&poll).await.unwrap();

        let mut conn = pool.acquire().await.unwrap();
        assert_eq!(
            crate::results::mastodon(&mut conn, id).await.unwrap().as_deref(),
            Some("https://archive.org/details/x")
        );
    }

    #[tokio::test]
    async fn failed_jobs_stay_listed() {
        let (_tmp, pool) = temp_pool().await;
        let id = seed_bookmark(&pool, "https://example.com/a").await;
        let (submit, poll) = stages(Scripted::new(false, vec![JobPoll::Failed("blocked".into())]));
        let runner = Runner::new(pool.clone(), 5);

        runner.run(&submit).await.unwrap();
        let summary = runner.run(&poll).await.unwrap();
        assert_eq!(summary.failed, 1);

        let mut conn = pool.acquire().await.unwrap();
        let open = unfinished(&mut conn, "echo").await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].resource_id, id);
        assert_eq!(open[0].state, JobState::Failed);
    }
}
