//! Data models for collected articles and run reports.
//!
//! - [`Candidate`]: a `(url, title)` pair discovered on a landing page
//! - [`ExtractedContent`]: what a fetch strategy pulled out of an article page
//! - [`ArticlePayload`] / [`LandingLink`]: the JSON schemas the extractor answers in
//! - [`Record`]: the persisted article
//! - [`SourceOutcome`]: the per-source line of the final report

use chrono::{Local, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

use crate::utils::truncate_chars;

pub const TITLE_MAX_CHARS: usize = 255;
pub const SOURCE_MAX_CHARS: usize = 100;
pub const TAGS_MAX_CHARS: usize = 255;
pub const KIND_MAX_CHARS: usize = 50;

/// A link found on a landing page, before any fetching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub url: String,
    pub title: String,
}

impl Candidate {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
        }
    }
}

/// Content pulled from one article page by a fetch strategy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedContent {
    pub title: Option<String>,
    pub content: String,
    pub tags: String,
    /// Publication time exactly as the page or the model reported it.
    pub time: Option<String>,
}

/// Article schema the extractor is asked to fill.
#[derive(Debug, Deserialize, Serialize)]
pub struct ArticlePayload {
    pub content: String,
    #[serde(default)]
    pub tags: serde_json::Value,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

impl From<ArticlePayload> for ExtractedContent {
    fn from(payload: ArticlePayload) -> Self {
        Self {
            title: payload.title.filter(|t| !t.trim().is_empty()),
            content: payload.content,
            tags: normalize_tags(&payload.tags),
            time: payload.time,
        }
    }
}

/// Landing-page schema: one entry per article link.
#[derive(Debug, Deserialize, Serialize)]
pub struct LandingLink {
    pub url: String,
    pub title: String,
}

/// A stored article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Assigned by the store on insert.
    pub id: Option<i64>,
    /// Publication time, or ingestion time when the page gave nothing usable.
    pub time: NaiveDateTime,
    pub title: String,
    pub source: String,
    pub content: String,
    pub tags: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
}

impl Record {
    /// Build a record from a successful extraction.
    ///
    /// An unparseable publication time never rejects the record; it is
    /// replaced with `now` and logged.
    pub fn from_extraction(
        candidate: &Candidate,
        extracted: ExtractedContent,
        source: &str,
        kind: &str,
        content_limit: usize,
        now: NaiveDateTime,
    ) -> Self {
        let time = match extracted.time.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => parse_publication_time(raw).unwrap_or_else(|| {
                warn!(url = %candidate.url, time = %raw, "Unparseable publication time; using current time");
                now
            }),
            _ => {
                warn!(url = %candidate.url, "No publication time extracted; using current time");
                now
            }
        };

        let title = extracted
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| candidate.title.clone());

        Self {
            id: None,
            time,
            title: truncate_chars(title.trim(), TITLE_MAX_CHARS),
            source: truncate_chars(source, SOURCE_MAX_CHARS),
            content: truncate_chars(&extracted.content, content_limit),
            tags: truncate_chars(&extracted.tags, TAGS_MAX_CHARS),
            kind: truncate_chars(kind, KIND_MAX_CHARS),
            url: candidate.url.clone(),
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<Record id={:?} time={} title={:?} source={} content_len={} tags={:?} type={} url={}>",
            self.id,
            self.time,
            self.title,
            self.source,
            self.content.chars().count(),
            self.tags,
            self.kind,
            self.url
        )
    }
}

/// Outcome of one source's run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SourceOutcome {
    Completed {
        discovered: usize,
        fetched: usize,
        stored: usize,
        not_stored: usize,
        attempts: u32,
    },
    Failed {
        attempts: u32,
        error: String,
    },
    Skipped {
        interval: u32,
        day_of_year: u32,
    },
}

impl SourceOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, SourceOutcome::Failed { .. })
    }
}

impl fmt::Display for SourceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceOutcome::Completed {
                discovered,
                fetched,
                stored,
                not_stored,
                attempts,
            } => write!(
                f,
                "discovered={discovered} fetched={fetched} stored={stored} not_stored={not_stored} attempts={attempts}"
            ),
            SourceOutcome::Failed { attempts, error } => {
                write!(f, "FAILED after {attempts} attempt(s): {error}")
            }
            SourceOutcome::Skipped {
                interval,
                day_of_year,
            } => write!(f, "skipped (day {day_of_year} not a multiple of interval {interval})"),
        }
    }
}

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d", "%Y年%m月%d日"];

/// Parse the publication time formats pages and models commonly produce.
pub fn parse_publication_time(raw: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Local).naive_local());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(raw, fmt) {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    None
}

static TAG_SEPARATORS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[\[\]{}"'，,、;；|]+"#).expect("static regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));

/// Flatten whatever the extractor returned for `tags` into a space-separated
/// string free of commas and JSON punctuation.
pub fn normalize_tags(tags: &serde_json::Value) -> String {
    let joined = match tags {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => match serde_json::from_str::<serde_json::Value>(s) {
            Ok(inner @ serde_json::Value::Array(_)) => return normalize_tags(&inner),
            _ => s.clone(),
        },
        serde_json::Value::Array(items) => items
            .iter()
            .map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(" "),
        other => other.to_string(),
    };
    let cleaned = TAG_SEPARATORS.replace_all(&joined, " ");
    WHITESPACE.replace_all(cleaned.trim(), " ").into_owned()
}
