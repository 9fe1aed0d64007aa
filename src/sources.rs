//! Ingestion from origin services.
//!
//! Each configured origin has an [`Ingestor`] that pulls new or changed items
//! and upserts them into the resource store. Ingestors are incremental: they
//! ask the service only for items newer than the newest one already stored.
//! Upserts are keyed by the natural id, so overlapping windows are harmless.

pub mod hypothesis;
pub mod pinboard;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::action::ActionContext;
use crate::config::Config;

/// Counts reported by one fetch.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FetchSummary {
    pub source: String,
    pub received: usize,
    pub stored: usize,
    pub ignored: usize,
}

#[async_trait]
pub trait Ingestor: Send + Sync {
    /// Name used on the command line (`km fetch <name>`).
    fn name(&self) -> &str;

    /// Pull updates from the service into the store.
    async fn fetch_updates(&self, pool: &SqlitePool) -> Result<FetchSummary>;
}

/// Every ingestor whose service is configured.
pub fn configured(ctx: &ActionContext) -> Vec<Box<dyn Ingestor>> {
    let mut ingestors: Vec<Box<dyn Ingestor>> = Vec::new();
    if let Some(cfg) = &ctx.config.pinboard {
        ingestors.push(Box::new(pinboard::PinboardIngestor::new(
            ctx.http.clone(),
            cfg.clone(),
        )));
    }
    if let Some(cfg) = &ctx.config.hypothesis {
        ingestors.push(Box::new(hypothesis::HypothesisIngestor::new(
            ctx.http.clone(),
            cfg.clone(),
        )));
    }
    ingestors
}

/// Print which services are configured.
pub fn list_sources(config: &Config) -> Result<()> {
    let services = [
        ("pinboard", "ingest", config.pinboard.is_some()),
        ("hypothesis", "ingest", config.hypothesis.is_some()),
        ("wayback", "action", config.wayback.is_some()),
        ("kagi", "action", config.kagi.is_some()),
        ("mastodon", "action", config.mastodon.is_some()),
        ("obsidian", "action", config.obsidian.is_some()),
    ];

    println!("{:<12} {:<8} STATUS", "SERVICE", "ROLE");
    for (name, role, configured) in services {
        let status = if configured { "OK" } else { "NOT CONFIGURED" };
        println!("{:<12} {:<8} {}", name, role, status);
    }
    Ok(())
}
