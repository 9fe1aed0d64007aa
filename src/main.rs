//! # kmtools CLI (`km`)
//!
//! The `km` binary initializes the database, pulls bookmarks and
//! annotations, runs the enrichment schedules, and reports on their state.
//! It is meant to be run from cron: `km hourly` every hour and `km daily`
//! once a day.
//!
//! ## Usage
//!
//! ```bash
//! km --config ./config/km.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `km init` | Create the SQLite database and run schema migrations |
//! | `km sources` | List services and whether they are configured |
//! | `km fetch <all\|pinboard\|hypothesis>` | Pull updates from origin services |
//! | `km hourly` | Fetch, then run the hourly actions |
//! | `km daily` | Run the daily actions |
//! | `km run <action>` | Run one action by name |
//! | `km actions` | List configured actions in run order |
//! | `km status` | Per-action status counts |
//! | `km hung` | Pairs stuck at or near the retry limit |
//! | `km resolve <id> <action>` | Mark a pair completed by hand |
//! | `km get <id>` | Show a resource with its statuses and results |
//! | `km robustify <url>` | Robust-link markup for an archived page |
//! | `km summarize <url>` | Summarize any URL on demand |
//! | `km wayback save <url>` | Submit a URL to Save Page Now |
//! | `km wayback check <job_id>` | Check a Save Page Now job |

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use kmtools::action::ActionContext;
use kmtools::logging::{self, Verbosity};
use kmtools::adhoc::{self, LinkStyle};
use kmtools::{config, db, get, migrate, report, schedule, sources};

/// kmtools: ingest bookmarks and annotations, enrich them, and keep notes.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/km.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "km",
    about = "kmtools: a personal knowledge-management enrichment pipeline",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/km.toml")]
    config: PathBuf,

    /// Log what would be posted, archived, or written instead of doing it.
    #[arg(long, global = true)]
    dry_run: bool,

    /// Debug-level logging.
    #[arg(short, long, global = true)]
    debug: bool,

    /// Info-level logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Append logs to this file, even when attached to a terminal.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it again on an existing database is safe.
    Init,

    /// List services and whether they are configured.
    Sources,

    /// Pull new and changed items from origin services.
    Fetch {
        /// `all`, `pinboard`, or `hypothesis`.
        #[arg(default_value = "all")]
        source: String,
    },

    /// Fetch updates, then run the hourly actions.
    Hourly,

    /// Run the daily actions.
    Daily,

    /// Run a single action by its name (see `km actions`).
    Run {
        action: String,
    },

    /// List configured actions in run order.
    Actions,

    /// Per-action counts of completed, retryable, and exceeded pairs.
    Status,

    /// List pairs stuck at or near the retry limit.
    Hung {
        /// Only show this action.
        #[arg(long)]
        action: Option<String>,

        /// Also list retryable pairs within this many retries of the limit.
        #[arg(long, default_value_t = 1)]
        margin: i64,
    },

    /// Mark a (resource, action) pair completed by hand.
    Resolve {
        resource_id: i64,
        action: String,

        /// Substitute archive capture for Wayback actions.
        #[arg(long)]
        archive_url: Option<String>,
    },

    /// Show a resource with its statuses and action results.
    Get {
        id: i64,
    },

    /// Print robust-link markup for an archived URL.
    Robustify {
        url: String,

        /// Jekyll `robustlink` include (default).
        #[arg(long, conflicts_with_all = ["html", "thursday_threads"])]
        jekyll: bool,

        /// HTML anchor with version attributes.
        #[arg(long, conflicts_with = "thursday_threads")]
        html: bool,

        /// Jekyll `thursday_threads_quote` include.
        #[arg(long)]
        thursday_threads: bool,
    },

    /// Summarize a URL without storing anything.
    Summarize {
        url: String,

        /// Print only the summary.
        #[arg(short, long)]
        quiet: bool,

        /// Take the summary from Kagi.
        #[arg(short, long)]
        kagi: bool,
    },

    /// Save Page Now jobs, by hand.
    Wayback {
        #[command(subcommand)]
        command: WaybackCommand,
    },
}

#[derive(Subcommand)]
enum WaybackCommand {
    /// Submit a URL for capture.
    Save { url: String },

    /// Check on a submitted job.
    Check { job_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    logging::init_logging(
        Verbosity::from_flags(cli.debug, cli.verbose),
        cli.log_file.as_deref(),
        cfg.logging.file.as_deref(),
    )?;

    let cfg = Arc::new(cfg);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Sources => {
            sources::list_sources(&cfg)?;
        }
        Commands::Fetch { source } => {
            let ctx = ActionContext::new(cfg.clone(), cli.dry_run)?;
            let pool = db::connect(&cfg).await?;
            migrate::apply(&pool).await?;
            for fetched in schedule::fetch(&ctx, &pool, &source).await? {
                println!(
                    "{}: {} received, {} stored, {} ignored",
                    fetched.source, fetched.received, fetched.stored, fetched.ignored
                );
            }
            pool.close().await;
        }
        Commands::Hourly => {
            let ctx = ActionContext::new(cfg.clone(), cli.dry_run)?;
            let pool = db::connect(&cfg).await?;
            migrate::apply(&pool).await?;
            let summaries = schedule::run_hourly(&ctx, &pool).await?;
            schedule::print_summaries(&summaries);
            pool.close().await;
        }
        Commands::Daily => {
            let ctx = ActionContext::new(cfg.clone(), cli.dry_run)?;
            let pool = db::connect(&cfg).await?;
            migrate::apply(&pool).await?;
            let summaries = schedule::run_daily(&ctx, &pool).await?;
            schedule::print_summaries(&summaries);
            pool.close().await;
        }
        Commands::Run { action } => {
            let ctx = ActionContext::new(cfg.clone(), cli.dry_run)?;
            let pool = db::connect(&cfg).await?;
            migrate::apply(&pool).await?;
            let summary = schedule::run_action(&ctx, &pool, &action).await?;
            schedule::print_summaries(&[summary]);
            pool.close().await;
        }
        Commands::Actions => {
            let ctx = ActionContext::new(cfg.clone(), cli.dry_run)?;
            for action in schedule::all_actions(&ctx).actions() {
                println!("{:<24} {}", action.name(), action.description());
            }
        }
        Commands::Status => {
            report::run_status(&cfg).await?;
        }
        Commands::Hung { action, margin } => {
            report::run_hung(&cfg, action.as_deref(), margin).await?;
        }
        Commands::Resolve {
            resource_id,
            action,
            archive_url,
        } => {
            report::run_resolve(&cfg, resource_id, &action, archive_url.as_deref()).await?;
        }
        Commands::Get { id } => {
            get::run_get(&cfg, id).await?;
        }
        Commands::Robustify {
            url,
            html,
            thursday_threads,
            ..
        } => {
            adhoc::run_robustify(&cfg, &url, LinkStyle::from_flags(html, thursday_threads)).await?;
        }
        Commands::Summarize { url, quiet, kagi } => {
            let ctx = ActionContext::new(cfg.clone(), cli.dry_run)?;
            println!("{}", adhoc::summarize_text(&ctx, &url, quiet, kagi).await?);
        }
        Commands::Wayback { command } => {
            let ctx = ActionContext::new(cfg.clone(), cli.dry_run)?;
            let message = match command {
                WaybackCommand::Save { url } => adhoc::wayback_save(&ctx, &url).await?,
                WaybackCommand::Check { job_id } => adhoc::wayback_check(&ctx, &job_id).await?,
            };
            println!("{}", message);
        }
    }

    Ok(())
}
