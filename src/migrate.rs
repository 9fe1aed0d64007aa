use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// One result table per action. Every table allows at most one row per
/// resource.
const ACTION_RESULT_TABLES: &[(&str, &str)] = &[
    ("action_summary", "summary TEXT NOT NULL, derived_date TEXT NOT NULL"),
    ("action_kagi", "kagi_summary TEXT NOT NULL"),
    ("action_mastodon", "toot_uri TEXT NOT NULL"),
    (
        "action_wayback",
        "wayback_url TEXT NOT NULL, wayback_timestamp INTEGER, wayback_details TEXT",
    ),
    ("action_obsidian_source", "filename TEXT NOT NULL"),
    ("action_obsidian_daily", "daily_filename TEXT NOT NULL"),
    ("action_obsidian_annotation", "filename TEXT NOT NULL"),
];

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index. Safe to run repeatedly.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS resources (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            origin TEXT NOT NULL,
            external_id TEXT NOT NULL,
            url TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT,
            tags_json TEXT NOT NULL DEFAULT '[]',
            shared TEXT NOT NULL DEFAULT 'PRIVATE',
            saved_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(origin, external_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS annotation_details (
            resource_id INTEGER PRIMARY KEY,
            page_id INTEGER NOT NULL,
            quote TEXT NOT NULL DEFAULT '',
            text TEXT NOT NULL DEFAULT '',
            link_html TEXT,
            link_incontext TEXT,
            flagged INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_us INTEGER NOT NULL,
            FOREIGN KEY (resource_id) REFERENCES resources(id),
            FOREIGN KEY (page_id) REFERENCES resources(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS process_status (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            resource_id INTEGER NOT NULL,
            action_name TEXT NOT NULL,
            status TEXT,
            retries INTEGER NOT NULL DEFAULT 0,
            processed_at INTEGER NOT NULL,
            UNIQUE(resource_id, action_name),
            FOREIGN KEY (resource_id) REFERENCES resources(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    for (table, columns) in ACTION_RESULT_TABLES {
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                resource_id INTEGER NOT NULL UNIQUE,
                processed_at INTEGER NOT NULL,
                {columns},
                FOREIGN KEY (resource_id) REFERENCES resources(id)
            )"
        );
        sqlx::query(&ddl).execute(pool).await?;
    }

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_handles (
            resource_id INTEGER NOT NULL,
            service TEXT NOT NULL,
            handle TEXT NOT NULL,
            state TEXT NOT NULL,
            result_json TEXT,
            submitted_at INTEGER NOT NULL,
            PRIMARY KEY (resource_id, service),
            FOREIGN KEY (resource_id) REFERENCES resources(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_resources_origin ON resources(origin)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_resources_saved_at ON resources(saved_at DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_process_status_action ON process_status(action_name, status)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_annotation_details_page ON annotation_details(page_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
