//! The runner drives one action over every eligible resource.
//!
//! Each resource is handled in its own transaction:
//!
//! 1. load the status row, or create one with no status and zero retries;
//! 2. if the retry counter is already past the limit, mark the pair
//!    `RETRIES_EXCEEDED` and commit without calling the action;
//! 3. call [`Action::process`] on the transaction;
//! 4. settle the transaction according to the outcome (see [`crate::action`]).
//!
//! Resources are processed one at a time, in selection order. A `Skip` or a
//! `Retryable` failure on one resource never affects the others. A fatal error
//! rolls back the current resource and ends the run; everything committed
//! before it stays committed.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::{debug, error, info, warn};

use crate::action::{Action, ActionError};
use crate::models::Resource;
use crate::selection;
use crate::status::{self, Outcome};

/// Per-run tally, printed by the CLI.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub action: String,
    pub selected: usize,
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub exceeded: usize,
}

impl RunSummary {
    fn new(action: &str) -> Self {
        Self {
            action: action.to_string(),
            ..Self::default()
        }
    }
}

/// What happened to one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Completed,
    Skipped,
    Failed { exceeded: bool },
    LimitReached,
}

pub struct Runner {
    pool: SqlitePool,
    retry_limit: i64,
}

impl Runner {
    pub fn new(pool: SqlitePool, retry_limit: i64) -> Self {
        Self { pool, retry_limit }
    }

    /// Run `action` over all of its eligible resources.
    ///
    /// Returns an error only for fatal conditions; the summary describes
    /// everything else.
    pub async fn run(&self, action: &dyn Action) -> Result<RunSummary> {
        let name = action.name();
        let mut summary = RunSummary::new(name);

        let candidates = {
            let mut conn = self.pool.acquire().await?;
            selection::unprocessed_resources(&mut conn, name, action.applies_to())
                .await
                .with_context(|| format!("selecting resources for {}", name))?
        };
        summary.selected = candidates.len();
        info!(action = name, count = candidates.len(), "starting action run");

        for resource in &candidates {
            match self.attempt(action, resource).await? {
                Attempt::Completed => summary.completed += 1,
                Attempt::Skipped => summary.skipped += 1,
                Attempt::Failed { exceeded: false } => summary.failed += 1,
                Attempt::Failed { exceeded: true } => {
                    summary.failed += 1;
                    summary.exceeded += 1;
                }
                Attempt::LimitReached => summary.exceeded += 1,
            }
        }

        info!(
            action = name,
            completed = summary.completed,
            skipped = summary.skipped,
            failed = summary.failed,
            exceeded = summary.exceeded,
            "finished action run"
        );
        Ok(summary)
    }

    async fn attempt(&self, action: &dyn Action, resource: &Resource) -> Result<Attempt> {
        let name = action.name();
        let mut tx = self.pool.begin().await?;

        let mut record = match status::get_status(&mut tx, resource.id, name).await? {
            Some(record) => record,
            None => status::create_initial(&mut tx, resource.id, name).await?,
        };

        if record.retries > self.retry_limit {
            status::record_outcome(&mut tx, &mut record, Outcome::LimitReached, self.retry_limit)
                .await?;
            tx.commit().await?;
            warn!(
                action = name,
                resource_id = resource.id,
                retries = record.retries,
                "retry limit already exceeded; not attempting"
            );
            return Ok(Attempt::LimitReached);
        }

        debug!(action = name, resource_id = resource.id, url = %resource.url, "processing");

        match action.process(&mut tx, resource).await {
            Ok(()) => {
                status::record_outcome(&mut tx, &mut record, Outcome::Completed, self.retry_limit)
                    .await?;
                tx.commit().await?;
                info!(action = name, resource_id = resource.id, "completed");
                Ok(Attempt::Completed)
            }
            Err(ActionError::Skip(reason)) => {
                tx.rollback().await?;
                debug!(action = name, resource_id = resource.id, %reason, "skipped");
                Ok(Attempt::Skipped)
            }
            Err(ActionError::Retryable(reason)) => {
                status::record_outcome(&mut tx, &mut record, Outcome::Failed, self.retry_limit)
                    .await?;
                tx.commit().await?;
                let exceeded = record.status.map_or(false, |s| s.is_terminal());
                warn!(
                    action = name,
                    resource_id = resource.id,
                    retries = record.retries,
                    exceeded,
                    %reason,
                    "attempt failed"
                );
                Ok(Attempt::Failed { exceeded })
            }
            Err(ActionError::Fatal(e)) => {
                if let Err(rollback) = tx.rollback().await {
                    error!(action = name, resource_id = resource.id, error = %rollback, "rollback failed");
                }
                Err(e.context(format!(
                    "{} failed on resource {} ({})",
                    name, resource.id, resource.url
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StatusKind;
    use crate::testing::{seed_bookmark, temp_pool};
    use async_trait::async_trait;
    use sqlx::SqliteConnection;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails every time it is called.
    struct AlwaysFails {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Action for AlwaysFails {
        fn name(&self) -> &str {
            "AlwaysFails"
        }
        fn description(&self) -> &str {
            "test action"
        }
        async fn process(
            &self,
            _conn: &mut SqliteConnection,
            _resource: &Resource,
        ) -> Result<(), ActionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ActionError::Retryable("nope".into()))
        }
    }

    #[tokio::test]
    async fn limit_plus_one_failures_exceed() {
        let (_tmp, pool) = temp_pool().await;
        let id = seed_bookmark(&pool, "https://example.com/a").await;
        let action = AlwaysFails {
            calls: AtomicUsize::new(0),
        };
        let runner = Runner::new(pool.clone(), 2);

        for _ in 0..3 {
            runner.run(&action).await.unwrap();
        }
        let summary = runner.run(&action).await.unwrap();
        assert_eq!(summary.selected, 0);
        assert_eq!(action.calls.load(Ordering::SeqCst), 3);

        let mut conn = pool.acquire().await.unwrap();
        let rec = status::get_status(&mut conn, id, "AlwaysFails")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rec.status, Some(StatusKind::RetriesExceeded));
        assert_eq!(rec.retries, 3);
    }

    #[tokio::test]
    async fn lowered_limit_stops_without_calling() {
        let (_tmp, pool) = temp_pool().await;
        let id = seed_bookmark(&pool, "https://example.com/a").await;
        let action = AlwaysFails {
            calls: AtomicUsize::new(0),
        };

        let generous = Runner::new(pool.clone(), 5);
        for _ in 0..3 {
            generous.run(&action).await.unwrap();
        }
        assert_eq!(action.calls.load(Ordering::SeqCst), 3);

        let strict = Runner::new(pool.clone(), 1);
        let summary = strict.run(&action).await.unwrap();
        assert_eq!(summary.exceeded, 1);
        assert_eq!(action.calls.load(Ordering::SeqCst), 3);

        let mut conn = pool.acquire().await.unwrap();
        let rec = status::get_status(&mut conn, id, "AlwaysFails")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rec.status, Some(StatusKind::RetriesExceeded));
        assert_eq!(rec.retries, 3);
    }

    /// Ends the transaction behind the runner's back, then gives up.
    struct EndsTransaction;

    #[async_trait]
    impl Action for EndsTransaction {
        fn name(&self) -> &str {
            "EndsTransaction"
        }
        fn description(&self) -> &str {
            "test action"
        }
        async fn process(
            &self,
            conn: &mut SqliteConnection,
            _resource: &Resource,
        ) -> Result<(), ActionError> {
            sqlx::query("ROLLBACK").execute(&mut *conn).await?;
            Err(ActionError::Fatal(anyhow::anyhow!("feed parser exploded")))
        }
    }

    #[tokio::test]
    async fn fatal_error_survives_a_failed_rollback() {
        let (_tmp, pool) = temp_pool().await;
        seed_bookmark(&pool, "https://example.com/a").await;

        let err = Runner::new(pool.clone(), 5)
            .run(&EndsTransaction)
            .await
            .unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.contains("feed parser exploded"), "{}", message);
        assert!(message.contains("EndsTransaction failed on resource"));
    }
}
