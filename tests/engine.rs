//! End-to-end tests of the runner against a real SQLite file.
//!
//! A scripted action replays a fixed sequence of outcomes per URL, so each
//! test can drive the status tracker through an exact history.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use kmtools::action::{Action, ActionError};
use kmtools::config::Config;
use kmtools::models::{NewResource, Origin, Resource, StatusKind, Visibility};
use kmtools::runner::Runner;
use kmtools::{db, migrate, results, status, store};
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tempfile::TempDir;

const ACTION: &str = "ScriptedAction";

#[derive(Debug, Clone, Copy)]
enum Step {
    Succeed,
    Skip,
    Fail,
    Crash,
}

/// Replays scripted steps per URL; unscripted calls succeed.
#[derive(Default)]
struct Scripted {
    steps: Mutex<HashMap<String, VecDeque<Step>>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl Scripted {
    fn script(self, url: &str, steps: &[Step]) -> Self {
        self.steps
            .lock()
            .unwrap()
            .insert(url.to_string(), steps.iter().copied().collect());
        self
    }

    fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Action for Scripted {
    fn name(&self) -> &str {
        ACTION
    }

    fn description(&self) -> &str {
        "replays scripted outcomes"
    }

    async fn process(&self, conn: &mut SqliteConnection, resource: &Resource) -> Result<(), ActionError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(resource.url.clone())
            .or_default() += 1;
        let step = self
            .steps
            .lock()
            .unwrap()
            .get_mut(&resource.url)
            .and_then(|s| s.pop_front())
            .unwrap_or(Step::Succeed);

        match step {
            Step::Succeed => {
                results::save_kagi(conn, resource.id, &format!("summary of {}", resource.url)).await?;
                Ok(())
            }
            Step::Skip => {
                // written, then discarded by the rollback
                results::save_kagi(conn, resource.id, "partial").await?;
                Err(ActionError::Skip("not yet".into()))
            }
            Step::Fail => Err(ActionError::Retryable("remote said no".into())),
            Step::Crash => Err(ActionError::Fatal(anyhow::anyhow!("disk on fire"))),
        }
    }
}

async fn setup() -> (TempDir, SqlitePool) {
    let tmp = TempDir::new().unwrap();
    let config = Config::minimal(tmp.path().join("km.sqlite"));
    let pool = db::connect(&config).await.unwrap();
    migrate::apply(&pool).await.unwrap();
    (tmp, pool)
}

async fn seed(pool: &SqlitePool, url: &str) -> i64 {
    let mut conn = pool.acquire().await.unwrap();
    store::upsert(
        &mut conn,
        &NewResource {
            origin: Origin::Pinboard,
            external_id: url.to_string(),
            url: url.to_string(),
            title: format!("{} | Example", url),
            description: None,
            tags: vec![],
            shared: Visibility::Public,
            saved_at: Utc.with_ymd_and_hms(2024, 9, 19, 14, 7, 48).unwrap(),
        },
    )
    .await
    .unwrap()
}

async fn state(pool: &SqlitePool, id: i64) -> Option<(Option<StatusKind>, i64)> {
    let mut conn = pool.acquire().await.unwrap();
    status::get_status(&mut conn, id, ACTION)
        .await
        .unwrap()
        .map(|s| (s.status, s.retries))
}

async fn result_rows(pool: &SqlitePool, id: i64) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM action_kagi WHERE resource_id = ?")
        .bind(id)
        .fetch_one(pool)
        .await
        .unwrap()
}

#[tokio::test]
async fn success_completes_once() {
    let (_tmp, pool) = setup().await;
    let id = seed(&pool, "https://example.com/a").await;
    let action = Scripted::default();
    let runner = Runner::new(pool.clone(), 5);

    let summary = runner.run(&action).await.unwrap();
    assert_eq!(summary.completed, 1);
    assert_eq!(state(&pool, id).await, Some((Some(StatusKind::Completed), 0)));

    let mut conn = pool.acquire().await.unwrap();
    assert_eq!(
        results::kagi(&mut conn, id).await.unwrap().as_deref(),
        Some("summary of https://example.com/a")
    );
    drop(conn);

    for _ in 0..3 {
        let again = runner.run(&action).await.unwrap();
        assert_eq!(again.selected, 0);
    }
    assert_eq!(action.calls("https://example.com/a"), 1);
    assert_eq!(result_rows(&pool, id).await, 1);
}

#[tokio::test]
async fn retries_climb_to_the_limit_then_stop() {
    let (_tmp, pool) = setup().await;
    let url = "https://example.com/flaky";
    let id = seed(&pool, url).await;
    let action = Scripted::default().script(url, &[Step::Fail; 10]);
    let runner = Runner::new(pool.clone(), 5);

    for _ in 0..3 {
        runner.run(&action).await.unwrap();
    }
    assert_eq!(state(&pool, id).await, Some((Some(StatusKind::Retryable), 3)));

    for _ in 0..2 {
        runner.run(&action).await.unwrap();
    }
    assert_eq!(state(&pool, id).await, Some((Some(StatusKind::Retryable), 5)));

    let sixth = runner.run(&action).await.unwrap();
    assert_eq!(sixth.exceeded, 1);
    assert_eq!(
        state(&pool, id).await,
        Some((Some(StatusKind::RetriesExceeded), 6))
    );

    for _ in 0..3 {
        runner.run(&action).await.unwrap();
    }
    assert_eq!(action.calls(url), 6);
    assert_eq!(result_rows(&pool, id).await, 0);
}

#[tokio::test]
async fn skips_leave_no_trace() {
    let (_tmp, pool) = setup().await;
    let url = "https://example.com/later";
    let id = seed(&pool, url).await;
    let action = Scripted::default().script(url, &[Step::Skip; 4]);
    let runner = Runner::new(pool.clone(), 5);

    for _ in 0..4 {
        let summary = runner.run(&action).await.unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(state(&pool, id).await, None);
        assert_eq!(result_rows(&pool, id).await, 0);
    }
    assert_eq!(action.calls(url), 4);
}

#[tokio::test]
async fn skip_then_success_completes_without_retries() {
    let (_tmp, pool) = setup().await;
    let url = "https://example.com/b";
    let id = seed(&pool, url).await;
    let action = Scripted::default().script(url, &[Step::Skip]);
    let runner = Runner::new(pool.clone(), 5);

    runner.run(&action).await.unwrap();
    assert_eq!(state(&pool, id).await, None);

    runner.run(&action).await.unwrap();
    assert_eq!(state(&pool, id).await, Some((Some(StatusKind::Completed), 0)));
}

#[tokio::test]
async fn skips_do_not_move_the_counter() {
    let (_tmp, pool) = setup().await;
    let url = "https://example.com/c";
    let id = seed(&pool, url).await;
    let action = Scripted::default().script(url, &[Step::Fail, Step::Skip, Step::Skip, Step::Fail]);
    let runner = Runner::new(pool.clone(), 5);

    let mut seen = Vec::new();
    for _ in 0..4 {
        runner.run(&action).await.unwrap();
        seen.push(state(&pool, id).await.map(|(_, r)| r));
    }
    assert_eq!(seen, vec![Some(1), Some(1), Some(1), Some(2)]);
}

#[tokio::test]
async fn fatal_error_keeps_earlier_work() {
    let (_tmp, pool) = setup().await;
    let urls = [
        "https://example.com/0",
        "https://example.com/1",
        "https://example.com/2",
        "https://example.com/3",
    ];
    let mut ids = Vec::new();
    for url in urls {
        ids.push(seed(&pool, url).await);
    }
    let action = Scripted::default().script(urls[2], &[Step::Crash]);
    let runner = Runner::new(pool.clone(), 5);

    let err = runner.run(&action).await.unwrap_err();
    assert!(format!("{:#}", err).contains("disk on fire"));

    assert_eq!(state(&pool, ids[0]).await, Some((Some(StatusKind::Completed), 0)));
    assert_eq!(state(&pool, ids[1]).await, Some((Some(StatusKind::Completed), 0)));
    assert_eq!(state(&pool, ids[2]).await, None);
    assert_eq!(state(&pool, ids[3]).await, None);
    assert_eq!(action.calls(urls[3]), 0);

    // the next run picks up where the failed one stopped
    let summary = runner.run(&action).await.unwrap();
    assert_eq!(summary.selected, 2);
    assert_eq!(summary.completed, 2);
}

#[tokio::test]
async fn one_crash_does_not_undo_a_sibling() {
    let (_tmp, pool) = setup().await;
    let good = seed(&pool, "https://example.com/good").await;
    let bad = seed(&pool, "https://example.com/bad").await;
    let action = Scripted::default().script("https://example.com/bad", &[Step::Crash]);

    assert!(Runner::new(pool.clone(), 5).run(&action).await.is_err());
    assert_eq!(state(&pool, good).await, Some((Some(StatusKind::Completed), 0)));
    assert_eq!(state(&pool, bad).await, None);
    assert_eq!(result_rows(&pool, bad).await, 0);
}
