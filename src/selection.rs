//! Selection query: which resources an action should attempt this run.
//!
//! A resource is eligible when it has no status row for the action, or its
//! row is still `RETRYABLE`. Rows in a terminal state are excluded here; the
//! retry-limit check on `RETRYABLE` rows is left to the runner.

use anyhow::Result;
use sqlx::SqliteConnection;

use crate::models::{Origin, Resource};

/// Eligible resources for `action_name` among `origins`, oldest first.
pub async fn unprocessed_resources(
    conn: &mut SqliteConnection,
    action_name: &str,
    origins: &[Origin],
) -> Result<Vec<Resource>> {
    if origins.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = vec!["?"; origins.len()].join(", ");
    let sql = format!(
        r#"
        SELECT r.id, r.origin, r.external_id, r.url, r.title, r.description, r.tags_json, r.shared, r.saved_at
        FROM resources r
        LEFT JOIN process_status ps
            ON ps.resource_id = r.id AND ps.action_name = ?
        WHERE r.origin IN ({})
          AND (ps.id IS NULL OR ps.status IS NULL OR ps.status NOT IN ('COMPLETED', 'RETRIES_EXCEEDED'))
        ORDER BY r.saved_at ASC, r.id ASC
        "#,
        placeholders
    );

    let mut query = sqlx::query(&sql).bind(action_name);
    for origin in origins {
        query = query.bind(origin.as_str());
    }
    let rows = query.fetch_all(&mut *conn).await?;

    rows.iter().map(Resource::from_row).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StatusKind;
    use crate::status::{self, Outcome};
    use crate::testing::{new_resource, seed, seed_bookmark, temp_pool};

    async fn set_status(pool: &sqlx::SqlitePool, id: i64, outcome: Outcome, limit: i64) {
        let mut conn = pool.acquire().await.unwrap();
        let mut rec = match status::get_status(&mut conn, id, "Test").await.unwrap() {
            Some(rec) => rec,
            None => status::create_initial(&mut conn, id, "Test").await.unwrap(),
        };
        status::record_outcome(&mut conn, &mut rec, outcome, limit)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn terminal_rows_are_excluded() {
        let (_tmp, pool) = temp_pool().await;
        let fresh = seed_bookmark(&pool, "https://example.com/fresh").await;
        let done = seed_bookmark(&pool, "https://example.com/done").await;
        let retry = seed_bookmark(&pool, "https://example.com/retry").await;
        let dead = seed_bookmark(&pool, "https://example.com/dead").await;

        set_status(&pool, done, Outcome::Completed, 5).await;
        set_status(&pool, retry, Outcome::Failed, 5).await;
        set_status(&pool, dead, Outcome::Failed, 0).await;

        let mut conn = pool.acquire().await.unwrap();
        let dead_status = status::get_status(&mut conn, dead, "Test").await.unwrap().unwrap();
        assert_eq!(dead_status.status, Some(StatusKind::RetriesExceeded));

        let ids: Vec<i64> = unprocessed_resources(&mut conn, "Test", &Origin::ALL)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![fresh, retry]);
    }

    #[tokio::test]
    async fn status_rows_are_per_action() {
        let (_tmp, pool) = temp_pool().await;
        let id = seed_bookmark(&pool, "https://example.com/a").await;
        set_status(&pool, id, Outcome::Completed, 5).await;

        let mut conn = pool.acquire().await.unwrap();
        let other = unprocessed_resources(&mut conn, "Other", &Origin::ALL)
            .await
            .unwrap();
        assert_eq!(other.len(), 1);
    }

    #[tokio::test]
    async fn origins_filter_the_candidates() {
        let (_tmp, pool) = temp_pool().await;
        seed_bookmark(&pool, "https://example.com/a").await;
        let page = seed(
            &pool,
            &new_resource(Origin::HypothesisPage, "https://example.com/p", "Page"),
        )
        .await;

        let mut conn = pool.acquire().await.unwrap();
        let pages = unprocessed_resources(&mut conn, "Test", &[Origin::HypothesisPage])
            .await
            .unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].id, page);
        assert!(unprocessed_resources(&mut conn, "Test", &[])
            .await
            .unwrap()
            .is_empty());
    }
}
