//! Helpers shared by unit tests.

use chrono::{TimeZone, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tempfile::TempDir;

use crate::action::ActionContext;
use crate::config::Config;
use crate::models::{NewResource, Origin, Visibility};
use crate::{db, migrate, store};

pub(crate) fn temp_config(tmp: &TempDir) -> Config {
    Config::minimal(tmp.path().join("km.sqlite"))
}

pub(crate) async fn temp_pool() -> (TempDir, SqlitePool) {
    let tmp = TempDir::new().unwrap();
    let pool = db::connect(&temp_config(&tmp)).await.unwrap();
    migrate::apply(&pool).await.unwrap();
    (tmp, pool)
}

pub(crate) fn context(config: Config) -> ActionContext {
    ActionContext::new(Arc::new(config), false).unwrap()
}

pub(crate) fn new_resource(origin: Origin, url: &str, title: &str) -> NewResource {
    NewResource {
        origin,
        external_id: url.to_string(),
        url: url.to_string(),
        title: title.to_string(),
        description: None,
        tags: vec!["reading".to_string()],
        shared: Visibility::Public,
        saved_at: Utc.with_ymd_and_hms(2024, 9, 19, 14, 7, 48).unwrap(),
    }
}

pub(crate) async fn seed(pool: &SqlitePool, item: &NewResource) -> i64 {
    let mut conn = pool.acquire().await.unwrap();
    store::upsert(&mut conn, item).await.unwrap()
}

pub(crate) async fn seed_bookmark(pool: &SqlitePool, url: &str) -> i64 {
    seed(pool, &new_resource(Origin::Pinboard, url, "A Bookmark | Example")).await
}
