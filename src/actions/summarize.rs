//! Extractive summary of a web page.
//!
//! The page is fetched, reduced to paragraph text, and scored by word
//! frequency. The summary is the seven highest-scoring short sentences in
//! score order. Pages with fewer than seven sentences (often raw transcripts)
//! get the fifty most frequent terms instead.

use async_trait::async_trait;
use regex::Regex;
use sqlx::SqliteConnection;
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::debug;

use super::WEB_ORIGINS;
use crate::action::{Action, ActionContext, ActionError};
use crate::http;
use crate::models::{Origin, Resource};
use crate::results::{self, SummaryResult};

const SUMMARY_SENTENCES: usize = 7;
const FALLBACK_WORDS: usize = 50;
/// Sentences with this many words or more are not candidates.
const MAX_SENTENCE_WORDS: usize = 30;

pub struct SummarizeAction {
    ctx: ActionContext,
}

impl SummarizeAction {
    pub fn new(ctx: ActionContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Action for SummarizeAction {
    fn name(&self) -> &str {
        "SummarizeAction"
    }

    fn description(&self) -> &str {
        "Word-frequency summary and publication date of the page"
    }

    fn applies_to(&self) -> &[Origin] {
        &WEB_ORIGINS
    }

    async fn process(&self, conn: &mut SqliteConnection, resource: &Resource) -> Result<(), ActionError> {
        let result = summarize_url(&self.ctx.http, &resource.url).await?;
        debug!(resource_id = resource.id, derived_date = %result.derived_date, "summarized");
        results::save_summary(conn, resource.id, &result).await?;
        Ok(())
    }
}

/// Fetch a page and summarize it. Also used by `km summarize`.
pub async fn summarize_url(client: &reqwest::Client, url: &str) -> Result<SummaryResult, ActionError> {
    let response = http::send("page fetch", client.get(url)).await?;
    let html = response
        .text()
        .await
        .map_err(|e| http::classify("page fetch", e))?;

    let text = extract_text(&html);
    let summary = summarize(&text)
        .ok_or_else(|| ActionError::Retryable(format!("no readable text at {}", url)))?;
    Ok(SummaryResult {
        summary,
        derived_date: derived_date(&html).unwrap_or_else(|| "unknown".to_string()),
    })
}

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("summarizer pattern is valid"))
}

/// Paragraph-level text of an HTML document, one block per line.
pub fn extract_text(html: &str) -> String {
    static NOISE: OnceLock<Regex> = OnceLock::new();
    static BLOCK: OnceLock<Regex> = OnceLock::new();
    static TAG: OnceLock<Regex> = OnceLock::new();

    let cleaned = regex(
        &NOISE,
        r"(?is)<(script|style|noscript|nav|header|footer|aside|form)\b.*?</(script|style|noscript|nav|header|footer|aside|form)>|<!--.*?-->",
    )
    .replace_all(html, " ");

    let mut blocks = Vec::new();
    for caps in regex(&BLOCK, r"(?is)<(p|li|h[1-6]|blockquote|pre)\b[^>]*>(.*?)</(p|li|h[1-6]|blockquote|pre)>")
        .captures_iter(&cleaned)
    {
        let inner = regex(&TAG, r"(?s)<[^>]+>").replace_all(&caps[2], " ");
        let block = collapse_whitespace(&decode_entities(&inner));
        if !block.is_empty() {
            blocks.push(block);
        }
    }

    if blocks.is_empty() {
        let body = regex(&TAG, r"(?s)<[^>]+>").replace_all(&cleaned, " ");
        return collapse_whitespace(&decode_entities(&body));
    }
    blocks.join("\n")
}

fn decode_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&rsquo;", "'")
        .replace("&lsquo;", "'")
        .replace("&quot;", "\"")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&mdash;", "—")
        .replace("&ndash;", "–")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Publication date announced by the page's metadata, as `YYYY-MM-DD`.
pub fn derived_date(html: &str) -> Option<String> {
    static META: OnceLock<Regex> = OnceLock::new();
    static TIME: OnceLock<Regex> = OnceLock::new();
    static DATE: OnceLock<Regex> = OnceLock::new();

    let meta = regex(
        &META,
        r#"(?is)<meta\b[^>]*(?:property|name|itemprop)\s*=\s*["'](?:article:published_time|datePublished|date|dc\.date|DC\.date\.issued|pubdate)["'][^>]*>"#,
    );
    let time = regex(&TIME, r#"(?is)<time\b[^>]*datetime\s*=\s*["']([^"']+)["']"#);
    let date = regex(&DATE, r"(\d{4}-\d{2}-\d{2})");

    let candidate = meta
        .find(html)
        .map(|m| m.as_str().to_string())
        .or_else(|| time.captures(html).map(|c| c[1].to_string()))
        .or_else(|| {
            static LD: OnceLock<Regex> = OnceLock::new();
            regex(&LD, r#""datePublished"\s*:\s*"([^"]+)""#)
                .captures(html)
                .map(|c| c[1].to_string())
        })?;

    date.captures(&candidate).map(|c| c[1].to_string())
}

/// Extractive summary of plain text, or `None` when there is nothing to score.
pub fn summarize(text: &str) -> Option<String> {
    static TIMESTAMP_LINE: OnceLock<Regex> = OnceLock::new();
    static NON_WORD: OnceLock<Regex> = OnceLock::new();

    let text = regex(&TIMESTAMP_LINE, r"\n[0-9]+:[0-9]+:[0-9]+\n").replace_all(text, " ");
    let normalized = regex(&NON_WORD, r"[^a-zA-Z']").replace_all(&text, " ");

    // first-seen order matters for ties
    let mut order: Vec<&str> = Vec::new();
    let mut counts: HashMap<&str, f64> = HashMap::new();
    for word in normalized.split_whitespace() {
        if is_stopword(word) {
            continue;
        }
        let count = counts.entry(word).or_insert_with(|| {
            order.push(word);
            0.0
        });
        *count += 1.0;
    }
    let max = counts.values().cloned().fold(0.0_f64, f64::max);
    if max == 0.0 {
        return None;
    }
    let freq: HashMap<&str, f64> = counts.iter().map(|(w, c)| (*w, c / max)).collect();

    let sentences = split_sentences(&text);
    if sentences.len() < SUMMARY_SENTENCES {
        let mut ranked: Vec<&str> = order.clone();
        ranked.sort_by(|a, b| freq[a].total_cmp(&freq[b]));
        let start = ranked.len().saturating_sub(FALLBACK_WORDS);
        return Some(ranked[start..].join(" "));
    }

    let mut scored: Vec<(usize, f64)> = Vec::new();
    for (idx, sentence) in sentences.iter().enumerate() {
        if sentence.split(' ').count() >= MAX_SENTENCE_WORDS {
            continue;
        }
        let lower = sentence.to_lowercase();
        let score: f64 = lower
            .split(|c: char| !(c.is_ascii_alphabetic() || c == '\''))
            .filter_map(|w| freq.get(w))
            .sum();
        if score > 0.0 {
            scored.push((idx, score));
        }
    }
    if scored.is_empty() {
        return None;
    }
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

    let picked: Vec<&str> = scored
        .iter()
        .take(SUMMARY_SENTENCES)
        .map(|(idx, _)| sentences[*idx])
        .collect();
    Some(picked.join(" "))
}

/// Split on terminal punctuation followed by whitespace, and on line breaks.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    for (i, &(pos, c)) in chars.iter().enumerate() {
        let boundary = match c {
            '\n' => true,
            '.' | '!' | '?' => chars.get(i + 1).map_or(true, |&(_, next)| next.is_whitespace()),
            _ => false,
        };
        if boundary {
            let end = pos + c.len_utf8();
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = end;
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

fn is_stopword(word: &str) -> bool {
    STOPWORDS.binary_search(&word).is_ok()
}

/// English stopwords, sorted for binary search.
const STOPWORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "ain", "all", "am", "an", "and", "any",
    "are", "aren", "aren't", "as", "at", "be", "because", "been", "before", "being", "below",
    "between", "both", "but", "by", "can", "couldn", "couldn't", "d", "did", "didn", "didn't",
    "do", "does", "doesn", "doesn't", "doing", "don", "don't", "down", "during", "each", "few",
    "for", "from", "further", "had", "hadn", "hadn't", "has", "hasn", "hasn't", "have", "haven",
    "haven't", "having", "he", "her", "here", "hers", "herself", "him", "himself", "his", "how",
    "i", "if", "in", "into", "is", "isn", "isn't", "it", "it's", "its", "itself", "just", "ll",
    "m", "ma", "me", "mightn", "mightn't", "more", "most", "mustn", "mustn't", "my", "myself",
    "needn", "needn't", "no", "nor", "not", "now", "o", "of", "off", "on", "once", "only", "or",
    "other", "our", "ours", "ourselves", "out", "over", "own", "re", "s", "same", "shan",
    "shan't", "she", "she's", "should", "should've", "shouldn", "shouldn't", "so", "some",
    "such", "t", "than", "that", "that'll", "the", "their", "theirs", "them", "themselves",
    "then", "there", "these", "they", "this", "those", "through", "to", "too", "under", "until",
    "up", "ve", "very", "was", "wasn", "wasn't", "we", "were", "weren", "weren't", "what", "when",
    "where", "which", "while", "who", "whom", "why", "will", "with", "won", "won't", "wouldn",
    "wouldn't", "y", "you", "you'd", "you'll", "you're", "you've", "your", "yours", "yourself",
    "yourselves",
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::runner::Runner;
    use crate::testing::{context, seed_bookmark, temp_config, temp_pool};
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ARTICLE: &str = r#"<html><head>
        <meta property="article:published_time" content="2024-09-18T10:00:00Z">
        <script>var ignored = "Archive archive archive";</script>
        </head><body>
        <p>Libraries collect recordings of conference sessions.</p>
        <p>Recordings need captions before libraries publish them.</p>
        <p>Captions make recordings searchable for everyone.</p>
        <p>Volunteers review captions for accuracy.</p>
        <p>Review takes time when recordings are long.</p>
        <p>Short recordings are reviewed first.</p>
        <p>Libraries then publish the reviewed recordings with captions.</p>
        <p>Weather was pleasant.</p>
        </body></html>"#;

    #[test]
    fn stopword_table_is_sorted() {
        assert!(STOPWORDS.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn extracts_paragraphs_without_scripts() {
        let text = extract_text(ARTICLE);
        assert!(text.starts_with("Libraries collect recordings"));
        assert!(!text.contains("ignored"));
        assert_eq!(text.lines().count(), 8);
    }

    #[test]
    fn finds_published_date() {
        assert_eq!(derived_date(ARTICLE).as_deref(), Some("2024-09-18"));
        assert_eq!(
            derived_date(r#"<time datetime="2023-01-02">Jan 2</time>"#).as_deref(),
            Some("2023-01-02")
        );
        assert_eq!(derived_date("<p>no date</p>"), None);
    }

    #[test]
    fn long_text_gets_seven_sentences() {
        let summary = summarize(&extract_text(ARTICLE)).unwrap();
        assert_eq!(split_sentences(&summary).len(), 7);
        assert!(!summary.contains("Weather"));
    }

    #[test]
    fn short_text_gets_frequent_words() {
        let summary = summarize("Rust rust Rust crates. Cargo builds crates.").unwrap();
        assert_eq!(summary, "rust Cargo builds Rust crates");
    }

    #[test]
    fn nothing_to_score_is_none() {
        assert_eq!(summarize("the and of"), None);
        assert_eq!(summarize(""), None);
    }

    #[tokio::test]
    async fn stores_summary_from_fetched_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/article"))
            .respond_with(ResponseTemplate::new(200).set_body_string(ARTICLE))
            .mount(&server)
            .await;

        let (tmp, pool) = temp_pool().await;
        let id = seed_bookmark(&pool, &format!("{}/article", server.uri())).await;
        let action = SummarizeAction::new(context(temp_config(&tmp)));

        let summary = Runner::new(pool.clone(), 5).run(&action).await.unwrap();
        assert_eq!(summary.completed, 1);

        let mut conn = pool.acquire().await.unwrap();
        let stored = results::summary(&mut conn, id).await.unwrap().unwrap();
        assert_eq!(stored.derived_date, "2024-09-18");
    }

    #[tokio::test]
    async fn missing_page_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let action = SummarizeAction::new(context(Config::minimal(tmp.path().join("x.sqlite"))));
        let (_db, pool) = temp_pool().await;
        seed_bookmark(&pool, &format!("{}/gone", server.uri())).await;

        let summary = Runner::new(pool, 5).run(&action).await.unwrap();
        assert_eq!(summary.failed, 1);
    }
}
