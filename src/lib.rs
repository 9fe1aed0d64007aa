//! # kmtools
//!
//! A personal knowledge-management pipeline. Bookmarks and annotations are
//! pulled from their services into a local SQLite store, then a fixed set of
//! enrichment actions runs over them: summaries, web archive captures,
//! social posts, and notes in an Obsidian vault.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌────────────┐   ┌──────────────────────────┐
//! │ Ingestors   │──▶│  SQLite    │◀──│ Runner (one action at a  │
//! │ Pinboard,   │   │ resources, │   │ time, one transaction    │
//! │ Hypothesis  │   │ status,    │   │ per resource)            │
//! └─────────────┘   │ results    │   └────────────┬─────────────┘
//!                   └────────────┘                │
//!                                   ┌─────────────┴──────────┐
//!                                   │ Actions: summaries,    │
//!                                   │ Wayback, Mastodon,     │
//!                                   │ Obsidian notes         │
//!                                   └────────────────────────┘
//! ```
//!
//! Each (resource, action) pair completes at most once. Failures are retried
//! on later runs until the configured retry limit, after which the pair is
//! parked as `RETRIES_EXCEEDED` for an operator to look at.
//!
//! ## Quick Start
//!
//! ```bash
//! km init                 # create database
//! km fetch all            # pull bookmarks and annotations
//! km hourly               # fetch, then run the hourly actions
//! km status               # per-action counts
//! km hung                 # pairs stuck at the retry limit
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`store`] | Resource store |
//! | [`status`] | Per-(resource, action) status tracker |
//! | [`selection`] | Unprocessed-resource query |
//! | [`action`] | Action contract and registry |
//! | [`runner`] | Drives one action over its eligible resources |
//! | [`actions`] | The enrichment actions |
//! | [`jobs`] | Two-stage submit/poll actions |
//! | [`results`] | Typed readers for action results |
//! | [`http`] | HTTP client and outcome classification |
//! | [`notes`] | Obsidian pages with YAML front matter |
//! | [`sources`] | Ingestors |
//! | [`schedule`] | Hourly and daily schedules |
//! | [`report`] | Status reports and manual resolution |
//! | [`adhoc`] | On-demand robustify, summarize, and Wayback commands |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod action;
pub mod actions;
pub mod adhoc;
pub mod config;
pub mod db;
pub mod get;
pub mod http;
pub mod jobs;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod notes;
pub mod report;
pub mod results;
pub mod runner;
pub mod schedule;
pub mod selection;
pub mod sources;
pub mod status;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;
