//! Hourly and daily schedules.
//!
//! A schedule is an ordered [`ActionRegistry`] plus, for the hourly one, a
//! fetch from every configured ingestor. Actions run one after another,
//! each to completion. An action whose service has no config section is
//! left out. A fatal error from any runner ends the schedule.

use anyhow::{bail, Result};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{info, warn};

use crate::action::{ActionContext, ActionRegistry};
use crate::actions::{
    wayback, KagiSummaryAction, MastodonAction, ObsidianAnnotationAction, ObsidianDailyAction,
    ObsidianSourceAction, SummarizeAction, WaybackService,
};
use crate::runner::{RunSummary, Runner};
use crate::sources::{self, FetchSummary};

/// Actions run every hour, in run order.
pub fn hourly_registry(ctx: &ActionContext) -> ActionRegistry {
    let config = &ctx.config;
    let mut registry = ActionRegistry::new();

    let wayback = config
        .wayback
        .as_ref()
        .map(|cfg| Arc::new(WaybackService::new(ctx.clone(), cfg.clone())));

    // collect captures requested by earlier runs first
    if let Some(service) = &wayback {
        registry.register(Box::new(wayback::results_action(service.clone())));
    }
    registry.register(Box::new(SummarizeAction::new(ctx.clone())));
    if let Some(cfg) = &config.kagi {
        registry.register(Box::new(KagiSummaryAction::new(ctx.clone(), cfg.clone())));
    }
    if let Some(cfg) = &config.mastodon {
        registry.register(Box::new(MastodonAction::new(ctx.clone(), cfg.clone())));
    }
    if let Some(service) = &wayback {
        registry.register(Box::new(wayback::save_action(service.clone())));
    }
    if let Some(cfg) = &config.obsidian {
        registry.register(Box::new(ObsidianSourceAction::new(ctx.clone(), cfg)));
        registry.register(Box::new(ObsidianAnnotationAction::new(ctx.clone(), cfg)));
    }
    registry
}

/// Actions run once a day.
pub fn daily_registry(ctx: &ActionContext) -> ActionRegistry {
    let mut registry = ActionRegistry::new();
    if let Some(cfg) = &ctx.config.obsidian {
        registry.register(Box::new(ObsidianDailyAction::new(ctx.clone(), cfg)));
    }
    registry
}

/// Every configured action, hourly ones first.
pub fn all_actions(ctx: &ActionContext) -> ActionRegistry {
    let mut registry = hourly_registry(ctx);
    let daily = daily_registry(ctx);
    for action in daily.into_actions() {
        registry.register(action);
    }
    registry
}

/// Fetch from the named ingestor, or from every configured one for `"all"`.
pub async fn fetch(ctx: &ActionContext, pool: &SqlitePool, which: &str) -> Result<Vec<FetchSummary>> {
    let ingestors = sources::configured(ctx);
    let selected: Vec<_> = ingestors
        .iter()
        .filter(|i| which == "all" || i.name() == which)
        .collect();
    if selected.is_empty() && which != "all" {
        bail!("'{}' is not a configured source", which);
    }

    let mut summaries = Vec::new();
    for ingestor in selected {
        summaries.push(ingestor.fetch_updates(pool).await?);
    }
    Ok(summaries)
}

async fn run_registry(registry: &ActionRegistry, runner: &Runner) -> Result<Vec<RunSummary>> {
    let mut summaries = Vec::with_capacity(registry.len());
    for action in registry.actions() {
        summaries.push(runner.run(action.as_ref()).await?);
    }
    Ok(summaries)
}

/// Fetch updates, then run the hourly actions.
///
/// A failing ingestor is logged and the actions still run over what is
/// already stored.
pub async fn run_hourly(ctx: &ActionContext, pool: &SqlitePool) -> Result<Vec<RunSummary>> {
    for ingestor in sources::configured(ctx) {
        match ingestor.fetch_updates(pool).await {
            Ok(fetched) => info!(
                source = %fetched.source,
                received = fetched.received,
                stored = fetched.stored,
                "fetched updates"
            ),
            Err(e) => warn!(source = ingestor.name(), error = %format!("{:#}", e), "fetch failed"),
        }
    }

    let runner = Runner::new(pool.clone(), ctx.config.engine.retry_limit);
    run_registry(&hourly_registry(ctx), &runner).await
}

pub async fn run_daily(ctx: &ActionContext, pool: &SqlitePool) -> Result<Vec<RunSummary>> {
    let registry = daily_registry(ctx);
    if registry.is_empty() {
        warn!("no daily actions configured");
    }
    let runner = Runner::new(pool.clone(), ctx.config.engine.retry_limit);
    run_registry(&registry, &runner).await
}

/// Run one configured action by its stable name.
pub async fn run_action(ctx: &ActionContext, pool: &SqlitePool, name: &str) -> Result<RunSummary> {
    let registry = all_actions(ctx);
    let Some(action) = registry.find(name) else {
        let known: Vec<&str> = registry.actions().iter().map(|a| a.name()).collect();
        bail!(
            "unknown or unconfigured action '{}' (configured: {})",
            name,
            known.join(", ")
        );
    };
    Runner::new(pool.clone(), ctx.config.engine.retry_limit)
        .run(action)
        .await
}

pub fn print_summaries(summaries: &[RunSummary]) {
    println!(
        "{:<24} {:>8} {:>9} {:>7} {:>6} {:>8}",
        "ACTION", "SELECTED", "COMPLETED", "SKIPPED", "FAILED", "EXCEEDED"
    );
    for s in summaries {
        println!(
            "{:<24} {:>8} {:>9} {:>7} {:>6} {:>8}",
            s.action, s.selected, s.completed, s.skipped, s.failed, s.exceeded
        );
    }
}
