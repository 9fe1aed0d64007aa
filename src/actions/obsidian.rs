//! Notes vault actions: source pages, annotations, and the daily readings list.

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use regex::Regex;
use serde_yaml::Value;
use sqlx::SqliteConnection;
use std::sync::OnceLock;
use tracing::info;

use super::WEB_ORIGINS;
use crate::action::{Action, ActionContext, ActionError};
use crate::config::ObsidianConfig;
use crate::models::{AnnotationDetail, Origin, Resource};
use crate::notes::{title_to_page, wiki_link, Vault};
use crate::results::{self, Enrichment, NoteKind};
use crate::store;

/// Body lines the source action owns; everything else on the page is kept.
const GENERATED_PREFIXES: [&str; 3] = ["Kagi summary:: ", "Automated summary:: ", "Tags:: "];

fn tag_links(tags: &[String]) -> String {
    tags.iter()
        .map(|t| wiki_link(t))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Write or refresh the source page of a bookmark or annotated page.
pub struct ObsidianSourceAction {
    ctx: ActionContext,
    vault: Vault,
}

impl ObsidianSourceAction {
    pub fn new(ctx: ActionContext, config: &ObsidianConfig) -> Self {
        Self {
            ctx,
            vault: Vault::new(config),
        }
    }
}

/// Summary block placed at the top of a source page.
pub fn source_block(enrichment: &Enrichment) -> String {
    let mut block = String::new();
    if let Some(kagi) = &enrichment.kagi {
        block.push_str(&format!("Kagi summary:: {}\n\n", kagi));
    }
    if let Some(summary) = &enrichment.summary {
        block.push_str(&format!("Automated summary:: {}\n\n", summary.summary));
    }
    if !enrichment.resource.tags.is_empty() {
        block.push_str(&format!("Tags:: {}\n", tag_links(&enrichment.resource.tags)));
    }
    block
}

#[async_trait]
impl Action for ObsidianSourceAction {
    fn name(&self) -> &str {
        "ObsidianHourlyAction"
    }

    fn description(&self) -> &str {
        "Write the source page with metadata and summaries"
    }

    fn applies_to(&self) -> &[Origin] {
        &WEB_ORIGINS
    }

    async fn process(&self, conn: &mut SqliteConnection, resource: &Resource) -> Result<(), ActionError> {
        let enrichment = Enrichment::load(conn, resource.id).await?;
        let mut page = self.vault.source_page(&resource.headline())?;

        page.set("source_url", resource.url.as_str());
        page.set("origin", resource.origin.label());
        page.set(
            "bookmark_saved",
            resource.saved_at.format("%Y-%m-%d").to_string(),
        );
        page.set(
            "source_created",
            enrichment
                .summary
                .as_ref()
                .map(|s| s.derived_date.clone())
                .unwrap_or_else(|| "unknown".to_string()),
        );
        page.set(
            "publisher",
            resource.publisher().map(Value::String).unwrap_or(Value::Null),
        );
        if let Some(archived) = &enrichment.wayback {
            page.set("wayback_url", archived.wayback_url.as_str());
        }

        let kept: Vec<&str> = page
            .content
            .lines()
            .filter(|line| !GENERATED_PREFIXES.iter().any(|p| line.starts_with(p)))
            .collect();
        let rest = kept.join("\n");
        let rest = rest.trim_start();
        let mut content = source_block(&enrichment);
        if !rest.is_empty() {
            content.push('\n');
            content.push_str(rest);
            content.push('\n');
        }
        page.content = content;

        if self.ctx.dry_run {
            println!("{}", page.path.display());
            println!("{}", page.render()?);
        } else {
            page.save()?;
        }
        let filename = page.path.to_string_lossy().to_string();
        results::save_note(conn, NoteKind::Source, resource.id, &filename).await?;
        info!(resource_id = resource.id, %filename, "wrote source page");
        Ok(())
    }
}

/// Append an annotation to its page's source note.
pub struct ObsidianAnnotationAction {
    ctx: ActionContext,
    vault: Vault,
}

impl ObsidianAnnotationAction {
    pub fn new(ctx: ActionContext, config: &ObsidianConfig) -> Self {
        Self {
            ctx,
            vault: Vault::new(config),
        }
    }
}

/// Markdown for one annotation: optional `##` headline, quote, discussion,
/// link, and tags.
pub fn annotation_block(detail: &AnnotationDetail, tags: &[String]) -> String {
    static PARAGRAPH_BREAK: OnceLock<Regex> = OnceLock::new();
    let paragraph_break = PARAGRAPH_BREAK
        .get_or_init(|| Regex::new(r"\s*\n\s*\n\s*").expect("paragraph pattern is valid"));

    let quote = paragraph_break
        .replace_all(detail.quote.trim(), "\n")
        .replace('\n', "\n> ");

    let text = detail.text.trim();
    let (headline, discussion) = if text.starts_with("##") {
        match text.split_once('\n') {
            Some((h, d)) => (Some(h), d.trim()),
            None => (Some(text), ""),
        }
    } else {
        (None, text)
    };

    let mut block = String::new();
    if let Some(h) = headline {
        block.push_str(&format!("{}\n", h));
    }
    if !quote.is_empty() {
        block.push_str(&format!("> {}\n", quote));
    }
    if !discussion.is_empty() {
        block.push_str(&format!("{}\n", discussion));
    }
    if let Some(link) = &detail.link_incontext {
        block.push_str(&format!("\n- Link to [annotation]({})\n", link));
    }
    if !tags.is_empty() {
        block.push_str(&format!("- Tags:: {}\n", tag_links(tags)));
    }
    block.push('\n');
    block
}

#[async_trait]
impl Action for ObsidianAnnotationAction {
    fn name(&self) -> &str {
        "ObsidianAnnotateAction"
    }

    fn description(&self) -> &str {
        "Append the annotation to its page's source note"
    }

    fn applies_to(&self) -> &[Origin] {
        &[Origin::HypothesisAnnotation]
    }

    async fn process(&self, conn: &mut SqliteConnection, resource: &Resource) -> Result<(), ActionError> {
        let detail = store::annotation_detail(conn, resource.id)
            .await?
            .ok_or_else(|| anyhow!("annotation {} has no details", resource.id))?;
        let target = store::get(conn, detail.page_id).await?;

        let mut page = self.vault.source_page(&target.headline())?;
        page.content.push_str(&annotation_block(&detail, &resource.tags));

        if self.ctx.dry_run {
            println!("{}", page.path.display());
            println!("{}", page.render()?);
        } else {
            page.save()?;
        }
        let filename = page.path.to_string_lossy().to_string();
        results::save_note(conn, NoteKind::Annotation, resource.id, &filename).await?;
        info!(resource_id = resource.id, page_id = detail.page_id, %filename, "appended annotation");
        Ok(())
    }
}

/// Add bookmarks to the daily page's readings list.
pub struct ObsidianDailyAction {
    ctx: ActionContext,
    vault: Vault,
    date: Option<NaiveDate>,
}

impl ObsidianDailyAction {
    pub fn new(ctx: ActionContext, config: &ObsidianConfig) -> Self {
        Self {
            ctx,
            vault: Vault::new(config),
            date: None,
        }
    }

    /// Write to the page for `date` instead of today's.
    pub fn for_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }
}

/// One entry in the readings list.
pub fn reading_entry(resource: &Resource) -> String {
    let link = wiki_link(&title_to_page(&resource.headline()));
    match resource.publisher() {
        Some(publisher) => format!("{}Resource: {} ({})", resource.origin.label(), link, publisher),
        None => format!("{}Resource: {}", resource.origin.label(), link),
    }
}

#[async_trait]
impl Action for ObsidianDailyAction {
    fn name(&self) -> &str {
        "ObsidianDailyAction"
    }

    fn description(&self) -> &str {
        "Add the bookmark to the daily page's readings"
    }

    fn applies_to(&self) -> &[Origin] {
        &[Origin::Pinboard]
    }

    async fn process(&self, conn: &mut SqliteConnection, resource: &Resource) -> Result<(), ActionError> {
        let date = self.date.unwrap_or_else(|| Local::now().date_naive());
        let mut daily = self.vault.daily_page(date)?;

        let entry = reading_entry(resource);
        if !daily.readings.contains(&entry) {
            daily.readings.push(entry);
        }

        if self.ctx.dry_run {
            println!("{}", daily.path.display());
            println!("{}", daily.render()?);
        } else {
            daily.save()?;
        }
        let filename = daily.path.to_string_lossy().to_string();
        results::save_note(conn, NoteKind::Daily, resource.id, &filename).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewAnnotation, Visibility};
    use crate::results::SummaryResult;
    use crate::runner::Runner;
    use crate::testing::{context, new_resource, seed, temp_config, temp_pool};
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn obsidian(tmp: &TempDir) -> ObsidianConfig {
        ObsidianConfig {
            db_directory: tmp.path().join("vault"),
            source_directory: "Sources".into(),
            daily_directory: "Daily".into(),
            template_directory: "Templates".into(),
        }
    }

    #[tokio::test]
    async fn source_page_carries_metadata_and_summaries() {
        let (tmp, pool) = temp_pool().await;
        let id = seed(
            &pool,
            &new_resource(
                Origin::Pinboard,
                "https://example.com/ffmpeg",
                "Processing Recordings with FFMPEG | DLTJ",
            ),
        )
        .await;
        {
            let mut conn = pool.acquire().await.unwrap();
            results::save_summary(
                &mut conn,
                id,
                &SummaryResult {
                    summary: "Recordings were processed.".into(),
                    derived_date: "2024-09-18".into(),
                },
            )
            .await
            .unwrap();
            results::save_kagi(&mut conn, id, "Kagi says so.").await.unwrap();
        }

        let cfg = obsidian(&tmp);
        let action = ObsidianSourceAction::new(context(temp_config(&tmp)), &cfg);
        Runner::new(pool.clone(), 5).run(&action).await.unwrap();

        let path = cfg
            .db_directory
            .join("Sources")
            .join("Processing Recordings with FFMPEG.md");
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("---\ntype: Source\n"));
        assert!(text.contains("source_url:"));
        assert!(text.contains("https://example.com/ffmpeg"));
        assert!(text.contains("2024-09-18"));
        assert!(text.contains("publisher: DLTJ"));
        assert!(text.contains("Kagi summary:: Kagi says so.\n\nAutomated summary:: Recordings were processed."));
        assert!(text.contains("Tags:: [[reading]]"));

        let mut conn = pool.acquire().await.unwrap();
        let note = results::note(&mut conn, NoteKind::Source, id).await.unwrap();
        assert_eq!(note.as_deref(), Some(path.to_string_lossy().as_ref()));
    }

    #[tokio::test]
    async fn annotation_is_appended_to_the_page_note() {
        let (tmp, pool) = temp_pool().await;
        let page_id = seed(
            &pool,
            &new_resource(Origin::HypothesisPage, "https://example.com/p", "Annotated Page"),
        )
        .await;
        let mut annotation = new_resource(Origin::HypothesisAnnotation, "anno-1", "Annotated Page");
        annotation.url = "https://example.com/p".into();
        annotation.shared = Visibility::Public;
        let anno_id = seed(&pool, &annotation).await;
        {
            let mut conn = pool.acquire().await.unwrap();
            let at = Utc.with_ymd_and_hms(2024, 9, 20, 8, 0, 0).unwrap();
            store::upsert_annotation(
                &mut conn,
                anno_id,
                page_id,
                &NewAnnotation {
                    quote: "First line\n\nSecond line".into(),
                    text: "## Key point\nThis matters.".into(),
                    link_html: None,
                    link_incontext: Some("https://hyp.is/anno-1".into()),
                    flagged: false,
                    created_at: at,
                    updated_at: at,
                },
            )
            .await
            .unwrap();
        }

        let cfg = obsidian(&tmp);
        let action = ObsidianAnnotationAction::new(context(temp_config(&tmp)), &cfg);
        let summary = Runner::new(pool.clone(), 5).run(&action).await.unwrap();
        assert_eq!(summary.selected, 1);

        let text =
            std::fs::read_to_string(cfg.db_directory.join("Sources").join("Annotated Page.md"))
                .unwrap();
        assert!(text.contains(
            "## Key point\n> First line\n> Second line\nThis matters.\n\n- Link to [annotation](https://hyp.is/anno-1)\n- Tags:: [[reading]]\n"
        ));
    }

    #[tokio::test]
    async fn daily_page_lists_the_bookmark_once() {
        let (tmp, pool) = temp_pool().await;
        seed(
            &pool,
            &new_resource(Origin::Pinboard, "https://example.com/a", "Reading: Part 1 | Blog"),
        )
        .await;
        seed(
            &pool,
            &new_resource(Origin::HypothesisPage, "https://example.com/p", "Page"),
        )
        .await;

        let cfg = obsidian(&tmp);
        let date = NaiveDate::from_ymd_opt(2024, 9, 20).unwrap();
        let action = ObsidianDailyAction::new(context(temp_config(&tmp)), &cfg).for_date(date);
        let summary = Runner::new(pool.clone(), 5).run(&action).await.unwrap();
        assert_eq!(summary.completed, 1);

        let text =
            std::fs::read_to_string(cfg.db_directory.join("Daily").join("2024-09-20.md")).unwrap();
        assert!(text.contains("## Yesterday's readings\n- PinboardResource: [[Reading— Part 1]] (Blog)\n"));
    }

    #[test]
    fn annotation_without_headline() {
        let at = Utc::now();
        let detail = AnnotationDetail {
            resource_id: 2,
            page_id: 1,
            quote: String::new(),
            text: "Just a thought".into(),
            link_html: None,
            link_incontext: None,
            flagged: false,
            created_at: at,
            updated_at: at,
        };
        assert_eq!(annotation_block(&detail, &[]), "Just a thought\n\n");
    }
}
