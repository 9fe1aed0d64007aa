//! TOML configuration.
//!
//! The loaded [`Config`] is created once in `main` and handed (behind an
//! `Arc`) to the runner and to every action constructor. Nothing in the
//! crate reads configuration from anywhere else.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    pub pinboard: Option<PinboardConfig>,
    pub hypothesis: Option<HypothesisConfig>,
    pub wayback: Option<WaybackConfig>,
    pub mastodon: Option<MastodonConfig>,
    pub kagi: Option<KagiConfig>,
    pub obsidian: Option<ObsidianConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    /// Retryable failures allowed per (resource, action) before the pair is
    /// parked as `RETRIES_EXCEEDED`.
    #[serde(default = "default_retry_limit")]
    pub retry_limit: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry_limit: default_retry_limit(),
        }
    }
}

fn default_retry_limit() -> i64 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/109.0.0.0 Safari/537.36".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    pub file: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PinboardConfig {
    pub auth_token: String,
    #[serde(default = "default_pinboard_url")]
    pub base_url: String,
}

fn default_pinboard_url() -> String {
    "https://api.pinboard.in".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct HypothesisConfig {
    pub user: String,
    pub api_token: String,
    #[serde(default = "default_hypothesis_url")]
    pub base_url: String,
}

fn default_hypothesis_url() -> String {
    "https://api.hypothes.is".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct WaybackConfig {
    pub access_key: String,
    pub secret_key: String,
    #[serde(default = "default_wayback_url")]
    pub base_url: String,
}

fn default_wayback_url() -> String {
    "https://web.archive.org".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct MastodonConfig {
    pub base_url: String,
    pub access_token: String,
    #[serde(default = "default_hashtag")]
    pub hashtag: String,
}

fn default_hashtag() -> String {
    "#BookmarkShare".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct KagiConfig {
    pub api_token: String,
    #[serde(default = "default_kagi_url")]
    pub base_url: String,
}

fn default_kagi_url() -> String {
    "https://kagi.com".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ObsidianConfig {
    /// Vault root.
    pub db_directory: PathBuf,
    #[serde(default = "default_source_directory")]
    pub source_directory: PathBuf,
    #[serde(default = "default_daily_directory")]
    pub daily_directory: PathBuf,
    #[serde(default = "default_template_directory")]
    pub template_directory: PathBuf,
}

fn default_source_directory() -> PathBuf {
    PathBuf::from("Sources")
}
fn default_daily_directory() -> PathBuf {
    PathBuf::from("Daily")
}
fn default_template_directory() -> PathBuf {
    PathBuf::from("Templates")
}

impl Config {
    /// Configuration with only a database path; every service is disabled.
    pub fn minimal(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            engine: EngineConfig::default(),
            http: HttpConfig::default(),
            logging: LoggingConfig::default(),
            pinboard: None,
            hypothesis: None,
            wayback: None,
            mastodon: None,
            kagi: None,
            obsidian: None,
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.engine.retry_limit < 0 {
        anyhow::bail!("engine.retry_limit must be >= 0");
    }
    if config.http.timeout_secs == 0 {
        anyhow::bail!("http.timeout_secs must be > 0");
    }

    let credentials = [
        ("pinboard.auth_token", config.pinboard.as_ref().map(|c| &c.auth_token)),
        ("hypothesis.api_token", config.hypothesis.as_ref().map(|c| &c.api_token)),
        ("hypothesis.user", config.hypothesis.as_ref().map(|c| &c.user)),
        ("wayback.access_key", config.wayback.as_ref().map(|c| &c.access_key)),
        ("wayback.secret_key", config.wayback.as_ref().map(|c| &c.secret_key)),
        ("mastodon.access_token", config.mastodon.as_ref().map(|c| &c.access_token)),
        ("mastodon.base_url", config.mastodon.as_ref().map(|c| &c.base_url)),
        ("kagi.api_token", config.kagi.as_ref().map(|c| &c.api_token)),
    ];
    for (key, value) in credentials {
        if let Some(value) = value {
            if value.trim().is_empty() {
                anyhow::bail!("{} must not be empty when its section is present", key);
            }
        }
    }

    Ok(())
}
