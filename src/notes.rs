//! Notes vault writer.
//!
//! Pages are Markdown files with a YAML front matter block:
//!
//! ```text
//! ---
//! type: Source
//! source_url: https://example.com/a
//! ---
//! Body text
//! ```
//!
//! Source pages live under the vault's source directory and are named after
//! the resource headline (see [`title_to_page`]). Daily pages live under the
//! daily directory, one per date, and carry a `## Yesterday's readings` list
//! that the daily action appends to.
//!
//! A page that does not exist yet starts from `Header — Source.md` or
//! `Header — Daily.md` in the template directory, or from nothing when the
//! template is absent.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use regex::Regex;
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::config::ObsidianConfig;

const SOURCE_TEMPLATE: &str = "Header — Source.md";
const DAILY_TEMPLATE: &str = "Header — Daily.md";
const READINGS_HEADING: &str = "## Yesterday's readings";
const MAX_PAGE_NAME: usize = 250;

/// Turn a title into a page name that is safe as a file name.
///
/// ```rust
/// use kmtools::notes::title_to_page;
/// assert_eq!(title_to_page("Project: Overview/Final"), "Project— Overview-Final");
/// ```
pub fn title_to_page(title: &str) -> String {
    title
        .trim()
        .replace(':', "—")
        .replace('/', "-")
        .chars()
        .take(MAX_PAGE_NAME)
        .collect()
}

/// `[[Page]]` link syntax.
pub fn wiki_link(page: &str) -> String {
    format!("[[{}]]", page.trim_end_matches(".md"))
}

/// Paths into one vault.
#[derive(Debug, Clone)]
pub struct Vault {
    source_dir: PathBuf,
    daily_dir: PathBuf,
    template_dir: PathBuf,
}

impl Vault {
    pub fn new(config: &ObsidianConfig) -> Self {
        Self {
            source_dir: config.db_directory.join(&config.source_directory),
            daily_dir: config.db_directory.join(&config.daily_directory),
            template_dir: config.db_directory.join(&config.template_directory),
        }
    }

    pub fn source_path(&self, headline: &str) -> PathBuf {
        self.source_dir
            .join(format!("{}.md", title_to_page(headline)))
    }

    pub fn daily_path(&self, date: NaiveDate) -> PathBuf {
        self.daily_dir
            .join(format!("{}.md", date.format("%Y-%m-%d")))
    }

    /// Open (or start) the source page for a headline.
    pub fn source_page(&self, headline: &str) -> Result<Page> {
        let mut page = self.open(self.source_path(headline), SOURCE_TEMPLATE)?;
        page.set("type", "Source");
        Ok(page)
    }

    /// Open (or start) the daily page for a date.
    pub fn daily_page(&self, date: NaiveDate) -> Result<DailyPage> {
        let page = self.open(self.daily_path(date), DAILY_TEMPLATE)?;
        Ok(DailyPage::from_page(page))
    }

    fn open(&self, path: PathBuf, template: &str) -> Result<Page> {
        let existing = match std::fs::read_to_string(&path) {
            Ok(text) if !text.trim().is_empty() => Some(text),
            Ok(_) => None,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                return Err(e).with_context(|| format!("reading note {}", path.display()))
            }
        };

        let text = match existing {
            Some(text) => text,
            None => self.template(template)?,
        };
        Page::parse(path, &text)
    }

    fn template(&self, name: &str) -> Result<String> {
        let path = self.template_dir.join(name);
        match std::fs::read_to_string(&path) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e).with_context(|| format!("reading template {}", path.display())),
        }
    }
}

/// One Markdown page with YAML front matter.
#[derive(Debug, Clone)]
pub struct Page {
    pub path: PathBuf,
    pub front_matter: Mapping,
    pub content: String,
}

impl Page {
    pub fn parse(path: PathBuf, text: &str) -> Result<Self> {
        let (front_matter, content) = split_front_matter(text)
            .with_context(|| format!("parsing front matter of {}", path.display()))?;
        Ok(Self {
            path,
            front_matter,
            content,
        })
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.front_matter
            .insert(Value::String(key.to_string()), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.front_matter.get(key)
    }

    pub fn render(&self) -> Result<String> {
        Ok(format!(
            "---\n{}---\n{}",
            render_front_matter(&self.front_matter)?,
            self.content
        ))
    }

    pub fn save(&self) -> Result<()> {
        write_page(&self.path, &self.render()?)
    }
}

/// A daily page, with its readings list pulled out of the body.
#[derive(Debug, Clone)]
pub struct DailyPage {
    pub path: PathBuf,
    pub front_matter: Mapping,
    pub readings: Vec<String>,
    before: String,
    after: String,
}

impl DailyPage {
    fn from_page(page: Page) -> Self {
        static HEADING: OnceLock<Regex> = OnceLock::new();
        static BLANK_LINE: OnceLock<Regex> = OnceLock::new();
        let heading = HEADING.get_or_init(|| {
            Regex::new(r"(?m)^## Yesterday's readings\s*?$").expect("heading pattern is valid")
        });
        let blank_line =
            BLANK_LINE.get_or_init(|| Regex::new(r"\n\s*\n").expect("blank line pattern is valid"));

        let content = page.content;
        let (before, section, after) = match heading.find(&content) {
            None => (content.clone(), String::new(), String::new()),
            Some(m) => {
                let rest = &content[m.end()..];
                match blank_line.find(rest) {
                    Some(end) => (
                        content[..m.start()].to_string(),
                        rest[..end.start()].trim().to_string(),
                        rest[end.end()..].to_string(),
                    ),
                    None => (
                        content[..m.start()].to_string(),
                        rest.trim().to_string(),
                        String::new(),
                    ),
                }
            }
        };

        let readings = section
            .lines()
            .filter_map(|line| line.strip_prefix("- "))
            .map(|item| item.trim().to_string())
            .collect();

        Self {
            path: page.path,
            front_matter: page.front_matter,
            readings,
            before,
            after,
        }
    }

    pub fn render(&self) -> Result<String> {
        let list: Vec<String> = self.readings.iter().map(|r| format!("- {}", r)).collect();
        Ok(format!(
            "---\n{}---\n{}{}\n{}\n\n{}",
            render_front_matter(&self.front_matter)?,
            self.before,
            READINGS_HEADING,
            list.join("\n"),
            self.after.trim()
        ))
    }

    pub fn save(&self) -> Result<()> {
        write_page(&self.path, &self.render()?)
    }
}

fn split_front_matter(text: &str) -> Result<(Mapping, String)> {
    let Some(rest) = text.strip_prefix("---") else {
        return Ok((Mapping::new(), text.to_string()));
    };
    let Some(end) = rest.find("\n---") else {
        return Ok((Mapping::new(), text.to_string()));
    };

    let yaml = rest[..end].trim();
    let body = &rest[end + "\n---".len()..];
    let body = body.strip_prefix('\n').unwrap_or(body);

    let front_matter = if yaml.is_empty() {
        Mapping::new()
    } else {
        match serde_yaml::from_str::<Value>(yaml)? {
            Value::Mapping(m) => m,
            Value::Null => Mapping::new(),
            other => anyhow::bail!("front matter is not a mapping: {:?}", other),
        }
    };
    Ok((front_matter, body.to_string()))
}

fn render_front_matter(front_matter: &Mapping) -> Result<String> {
    if front_matter.is_empty() {
        return Ok(String::new());
    }
    Ok(serde_yaml::to_string(front_matter)?)
}

fn write_page(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    std::fs::write(path, text).with_context(|| format!("writing note {}", path.display()))
}
