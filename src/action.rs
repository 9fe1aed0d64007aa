//! The action contract.
//!
//! An action is one enrichment step (summarize, archive, post, write a note)
//! applied to resources one at a time by the [`Runner`](crate::runner::Runner).
//! Each action exposes a single operation, [`Action::process`], whose result
//! is one of three outcomes:
//!
//! | Returned | Meaning | Runner reaction |
//! |----------|---------|-----------------|
//! | `Ok(())` | success | status → `COMPLETED`, commit |
//! | `Err(ActionError::Skip(_))` | not ready yet, no penalty | roll back, no status change |
//! | `Err(ActionError::Retryable(_))` | tried and failed | retries + 1, commit |
//! | `Err(ActionError::Fatal(_))` | bug or broken environment | roll back, abort the run |
//!
//! Database errors raised with `?` inside `process` convert to
//! [`ActionError::Fatal`]; an action opts into the two domain outcomes only
//! by constructing them explicitly.
//!
//! # Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use kmtools::action::{Action, ActionError};
//! use kmtools::models::Resource;
//! use sqlx::SqliteConnection;
//!
//! struct Shout;
//!
//! #[async_trait]
//! impl Action for Shout {
//!     fn name(&self) -> &str { "ShoutAction" }
//!     fn description(&self) -> &str { "Log the resource title in capitals" }
//!
//!     async fn process(
//!         &self,
//!         _conn: &mut SqliteConnection,
//!         resource: &Resource,
//!     ) -> Result<(), ActionError> {
//!         if resource.title.is_empty() {
//!             return Err(ActionError::Retryable("no title".into()));
//!         }
//!         println!("{}", resource.title.to_uppercase());
//!         Ok(())
//!     }
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;
use sqlx::SqliteConnection;
use std::sync::Arc;
use thiserror::Error;

use crate::config::Config;
use crate::http;
use crate::models::{Origin, Resource};
use crate::store::StoreError;

/// The outcome signal of a failed [`Action::process`] call.
#[derive(Debug, Error)]
pub enum ActionError {
    /// Transient condition; try again next run without counting an attempt.
    #[error("skipped: {0}")]
    Skip(String),
    /// The attempt failed in an expected way and counts against the limit.
    #[error("retryable failure: {0}")]
    Retryable(String),
    /// Anything else. Propagates out of the runner.
    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

impl From<sqlx::Error> for ActionError {
    fn from(e: sqlx::Error) -> Self {
        ActionError::Fatal(e.into())
    }
}

impl From<StoreError> for ActionError {
    fn from(e: StoreError) -> Self {
        ActionError::Fatal(e.into())
    }
}

/// An enrichment step the runner can drive.
#[async_trait]
pub trait Action: Send + Sync {
    /// Stable name; the key under which the status tracker records attempts.
    ///
    /// Renaming an action orphans its history, so treat this as persisted data.
    fn name(&self) -> &str;

    /// One-line description for `km actions`.
    fn description(&self) -> &str;

    /// Origins this action applies to. Resources from other origins are never
    /// selected for it.
    fn applies_to(&self) -> &[Origin] {
        &Origin::ALL
    }

    /// Process one resource inside the caller's unit of work.
    ///
    /// On success the action must have written its result row through
    /// `conn`. Writes made before a `Retryable` return are committed; writes
    /// made before a `Skip` or `Fatal` return are rolled back.
    async fn process(
        &self,
        conn: &mut SqliteConnection,
        resource: &Resource,
    ) -> Result<(), ActionError>;
}

/// Everything an action needs from the outside world, built once at startup.
#[derive(Clone)]
pub struct ActionContext {
    pub config: Arc<Config>,
    /// Actions that talk to the outside world log instead of acting.
    pub dry_run: bool,
    pub http: reqwest::Client,
}

impl ActionContext {
    pub fn new(config: Arc<Config>, dry_run: bool) -> Result<Self> {
        let http = http::client(&config.http)?;
        Ok(Self {
            config,
            dry_run,
            http,
        })
    }
}

/// Ordered collection of actions.
///
/// # Example
///
/// ```rust
/// use kmtools::action::ActionRegistry;
///
/// let mut actions = ActionRegistry::new();
/// // actions.register(Box::new(MyAction::new()));
/// assert!(actions.is_empty());
/// ```
pub struct ActionRegistry {
    actions: Vec<Box<dyn Action>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self {
            actions: Vec::new(),
        }
    }

    /// Register an action. Registration order is run order.
    pub fn register(&mut self, action: Box<dyn Action>) {
        self.actions.push(action);
    }

    pub fn actions(&self) -> &[Box<dyn Action>] {
        &self.actions
    }

    /// Find an action by its stable name.
    pub fn find(&self, name: &str) -> Option<&dyn Action> {
        self.actions
            .iter()
            .find(|a| a.name() == name)
            .map(|a| a.as_ref())
    }

    pub fn into_actions(self) -> Vec<Box<dyn Action>> {
        self.actions
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
