//! Core data models used throughout kmtools.
//!
//! These types represent the resources pulled from origin services, the
//! per-(resource, action) processing status, and the attributes derived from
//! a resource on read (headline, publisher, normalized URL).

use anyhow::{anyhow, Result};
use chrono::{DateTime, TimeZone, Utc};
use regex::Regex;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// The external system a resource was ingested from.
///
/// Fixed at creation; decides which actions apply to a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// A bookmark from the bookmarking service.
    Pinboard,
    /// A web page that carries at least one annotation.
    HypothesisPage,
    /// A single annotation on a page.
    HypothesisAnnotation,
}

impl Origin {
    pub const ALL: [Origin; 3] = [
        Origin::Pinboard,
        Origin::HypothesisPage,
        Origin::HypothesisAnnotation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Pinboard => "pinboard",
            Origin::HypothesisPage => "hypothesis_page",
            Origin::HypothesisAnnotation => "hypothesis_annotation",
        }
    }

    /// Short label used in notes ("Pinboard Resource: ...").
    pub fn label(&self) -> &'static str {
        match self {
            Origin::Pinboard => "Pinboard",
            Origin::HypothesisPage => "HypothesisPage",
            Origin::HypothesisAnnotation => "HypothesisAnnotation",
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Origin {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pinboard" => Ok(Origin::Pinboard),
            "hypothesis_page" => Ok(Origin::HypothesisPage),
            "hypothesis_annotation" => Ok(Origin::HypothesisAnnotation),
            other => Err(anyhow!("unknown origin: '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Private,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "PUBLIC",
            Visibility::Private => "PRIVATE",
        }
    }

    fn parse(s: &str) -> Self {
        if s == "PUBLIC" {
            Visibility::Public
        } else {
            Visibility::Private
        }
    }
}

/// Item produced by an ingestor before it is stored.
#[derive(Debug, Clone)]
pub struct NewResource {
    pub origin: Origin,
    /// Natural key within the origin (bookmark URL, page URL, annotation id).
    pub external_id: String,
    pub url: String,
    pub title: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub shared: Visibility,
    pub saved_at: DateTime<Utc>,
}

/// A stored, enrichable item.
#[derive(Debug, Clone)]
pub struct Resource {
    pub id: i64,
    pub origin: Origin,
    pub external_id: String,
    pub url: String,
    pub title: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub shared: Visibility,
    pub saved_at: DateTime<Utc>,
}

impl Resource {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self> {
        let origin: String = row.try_get("origin")?;
        let tags_json: String = row.try_get("tags_json")?;
        let shared: String = row.try_get("shared")?;
        let saved_at: i64 = row.try_get("saved_at")?;

        Ok(Self {
            id: row.try_get("id")?,
            origin: origin.parse()?,
            external_id: row.try_get("external_id")?,
            url: row.try_get("url")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            tags: serde_json::from_str(&tags_json).unwrap_or_default(),
            shared: Visibility::parse(&shared),
            saved_at: from_timestamp(saved_at),
        })
    }

    /// Headline portion of the title (everything before the publisher).
    pub fn headline(&self) -> String {
        parse_title(&self.title).headline
    }

    /// Publisher portion of the title, if the title names one.
    pub fn publisher(&self) -> Option<String> {
        parse_title(&self.title).publisher
    }

    /// The address to share for this resource.
    ///
    /// Annotated video pages point at a proxy that wraps the real video; for
    /// those the video URL is returned instead.
    pub fn normalized_url(&self) -> String {
        match self.origin {
            Origin::HypothesisPage => normalize_annotated_url(&self.url).0,
            _ => self.url.clone(),
        }
    }

    /// Where the annotations on this resource can be read, for annotated pages.
    pub fn annotation_url(&self) -> Option<String> {
        match self.origin {
            Origin::HypothesisPage => Some(normalize_annotated_url(&self.url).1),
            _ => None,
        }
    }
}

/// Annotation-specific fields, keyed by the annotation's resource id.
#[derive(Debug, Clone)]
pub struct AnnotationDetail {
    pub resource_id: i64,
    pub page_id: i64,
    pub quote: String,
    pub text: String,
    pub link_html: Option<String>,
    pub link_incontext: Option<String>,
    pub flagged: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Annotation fields as they arrive from the annotation service.
#[derive(Debug, Clone)]
pub struct NewAnnotation {
    pub quote: String,
    pub text: String,
    pub link_html: Option<String>,
    pub link_incontext: Option<String>,
    pub flagged: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Persisted state of a (resource, action) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Completed,
    Retryable,
    RetriesExceeded,
}

impl StatusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusKind::Completed => "COMPLETED",
            StatusKind::Retryable => "RETRYABLE",
            StatusKind::RetriesExceeded => "RETRIES_EXCEEDED",
        }
    }

    /// Terminal states are never selected again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StatusKind::Completed | StatusKind::RetriesExceeded)
    }
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatusKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "COMPLETED" => Ok(StatusKind::Completed),
            "RETRYABLE" => Ok(StatusKind::Retryable),
            "RETRIES_EXCEEDED" => Ok(StatusKind::RetriesExceeded),
            other => Err(anyhow!("unknown process status: '{}'", other)),
        }
    }
}

/// Retry counter written by data migration for pairs that predate tracking.
pub const RETRIES_GRANDFATHERED: i64 = -1;
/// Retry counter written when an operator resolves a pair by hand.
pub const RETRIES_MANUAL: i64 = -2;

/// One row of `process_status`.
#[derive(Debug, Clone)]
pub struct ProcessStatus {
    pub id: i64,
    pub resource_id: i64,
    pub action_name: String,
    /// `None` only between creation and the first recorded outcome, inside a
    /// single unit of work.
    pub status: Option<StatusKind>,
    pub retries: i64,
    pub processed_at: DateTime<Utc>,
}

impl ProcessStatus {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self> {
        let status: Option<String> = row.try_get("status")?;
        let processed_at: i64 = row.try_get("processed_at")?;
        Ok(Self {
            id: row.try_get("id")?,
            resource_id: row.try_get("resource_id")?,
            action_name: row.try_get("action_name")?,
            status: status.map(|s| s.parse()).transpose()?,
            retries: row.try_get("retries")?,
            processed_at: from_timestamp(processed_at),
        })
    }
}

pub(crate) fn from_timestamp(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0).single().unwrap_or_default()
}

/// Microsecond timestamps, for values that are used as remote cursors.
pub(crate) fn from_timestamp_micros(us: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(us).unwrap_or_default()
}

/// A title split into its headline and publisher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTitle {
    pub headline: String,
    pub publisher: Option<String>,
}

/// Split titles shaped like `Headline [comment] extra | Publisher`.
pub fn parse_title(title: &str) -> ParsedTitle {
    static TITLE_SCAN: OnceLock<Regex> = OnceLock::new();
    let re = TITLE_SCAN.get_or_init(|| {
        Regex::new(
            r"(?x)
            ^(.*?)\s+           # headline proper
            (\[(.*?)\])?        # optional bracketed comment
            (\s+(.*?))?\|\s+    # optional extra headline text before the bar
            (.*)                # publisher
            ",
        )
        .expect("title pattern is valid")
    });

    match re.captures(title) {
        Some(caps) => {
            let mut headline = caps.get(1).map_or("", |m| m.as_str()).to_string();
            if let Some(extra) = caps.get(5).filter(|m| !m.as_str().is_empty()) {
                headline = format!("{} – {}", headline, extra.as_str());
            }
            ParsedTitle {
                headline,
                publisher: caps.get(6).map(|m| m.as_str().to_string()),
            }
        }
        None => ParsedTitle {
            headline: title.to_string(),
            publisher: None,
        },
    }
}

/// Returns `(normalized_url, annotation_url)` for an annotated page URL.
pub fn normalize_annotated_url(href: &str) -> (String, String) {
    static DOCDROP: OnceLock<Regex> = OnceLock::new();
    static ANNOTATED_VIDEO: OnceLock<Regex> = OnceLock::new();
    let docdrop = DOCDROP.get_or_init(|| {
        Regex::new(r"^https?://docdrop\.org/video/(.*?)/?$").expect("docdrop pattern is valid")
    });
    let annotated_video = ANNOTATED_VIDEO.get_or_init(|| {
        Regex::new(
            r"^https?://media\.dltj\.org/annotated-video/[\dT]+-([0-9A-Za-z_-]{10}[048AEIMQUYcgkosw])-",
        )
        .expect("annotated video pattern is valid")
    });

    if let Some(caps) = docdrop
        .captures(href)
        .or_else(|| annotated_video.captures(href))
    {
        let video_id = &caps[1];
        return (
            format!("https://youtube.com/watch?v={}", video_id),
            href.to_string(),
        );
    }

    (href.to_string(), format!("https://via.hypothes.is/{}", href))
}
