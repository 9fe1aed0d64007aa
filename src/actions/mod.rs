//! Enrichment actions.
//!
//! | Action | Name (status key) | Applies to |
//! |--------|-------------------|------------|
//! | [`SummarizeAction`] | `SummarizeAction` | bookmarks, annotated pages |
//! | [`KagiSummaryAction`] | `KagiAction` | bookmarks, annotated pages |
//! | [`MastodonAction`] | `MastodonAction` | bookmarks, annotated pages |
//! | [`wayback::save_action`] | `WaybackSaveAction` | bookmarks, annotated pages |
//! | [`wayback::results_action`] | `WaybackResultsAction` | bookmarks, annotated pages |
//! | [`ObsidianSourceAction`] | `ObsidianHourlyAction` | bookmarks, annotated pages |
//! | [`ObsidianAnnotationAction`] | `ObsidianAnnotateAction` | annotations |
//! | [`ObsidianDailyAction`] | `ObsidianDailyAction` | bookmarks |
//!
//! The names predate this crate and key existing status rows; do not change
//! them.

pub mod kagi;
pub mod mastodon;
pub mod obsidian;
pub mod summarize;
pub mod wayback;

pub use kagi::KagiSummaryAction;
pub use mastodon::MastodonAction;
pub use obsidian::{ObsidianAnnotationAction, ObsidianDailyAction, ObsidianSourceAction};
pub use summarize::SummarizeAction;
pub use wayback::WaybackService;

use crate::models::Origin;

/// Origins whose resources are web pages worth reading.
pub(crate) const WEB_ORIGINS: [Origin; 2] = [Origin::Pinboard, Origin::HypothesisPage];
