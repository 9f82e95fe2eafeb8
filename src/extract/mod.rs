//! Structured extraction through an LLM.
//!
//! The extractor is an external collaborator: it receives page text and a
//! target [`Schema`] and answers with JSON. Answers are untrusted. They may
//! be fenced, wrapped in a list, or cut off, and a non-conforming answer only
//! ever fails the one URL it was for.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use tracing::warn;

use crate::error::ExtractError;
use crate::models::{ArticlePayload, LandingLink};
use crate::utils::{looks_truncated, strip_code_fence, truncate_for_log};

pub mod llm;

pub use llm::AwfulExtractor;

/// Page text beyond this many characters is not sent to the extractor.
pub const MAX_INPUT_CHARS: usize = 24_000;

/// Target schema of an extraction call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schema {
    /// `{content, tags, time, title}` for an article page.
    Article,
    /// `[{url, title}]` for a landing page.
    Landing,
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schema::Article => f.write_str("article"),
            Schema::Landing => f.write_str("landing"),
        }
    }
}

#[async_trait(?Send)]
pub trait Extractor {
    /// Ask for `schema`-shaped JSON describing `text`.
    async fn extract(&self, text: &str, schema: Schema) -> Result<String, ExtractError>;
}

/// Why an extraction produced nothing usable.
#[derive(Debug)]
pub enum ExtractFailure {
    Call(ExtractError),
    Schema(serde_json::Error),
}

/// Ask, parse, and re-ask once when the answer looks cut off mid-JSON.
pub async fn extract_parsed<T, F>(
    extractor: &dyn Extractor,
    text: &str,
    schema: Schema,
    parse: F,
) -> Result<T, ExtractFailure>
where
    F: Fn(&str) -> Result<T, serde_json::Error>,
{
    let raw = extractor
        .extract(text, schema)
        .await
        .map_err(ExtractFailure::Call)?;

    match parse(&raw) {
        Ok(parsed) => Ok(parsed),
        Err(e) if looks_truncated(&e) => {
            warn!(%schema, error = %e, "EOF while parsing; re-asking once");
            let retry = extractor
                .extract(text, schema)
                .await
                .map_err(ExtractFailure::Call)?;
            parse(&retry).map_err(|e| {
                warn!(%schema, error = %e, response_preview = %truncate_for_log(&retry, 300), "Re-ask still non-conforming");
                ExtractFailure::Schema(e)
            })
        }
        Err(e) => {
            warn!(%schema, error = %e, response_preview = %truncate_for_log(&raw, 300), "Model returned non-conforming JSON");
            Err(ExtractFailure::Schema(e))
        }
    }
}

/// Parse an article answer. A list answer contributes its first object.
pub fn parse_article(raw: &str) -> Result<ArticlePayload, serde_json::Error> {
    let value: Value = serde_json::from_str(strip_code_fence(raw))?;
    let object = match value {
        Value::Array(items) => items
            .into_iter()
            .find(|v| v.is_object())
            .unwrap_or(Value::Null),
        other => other,
    };
    from_value(object)
}

/// Parse a landing answer. Accepts a bare list, a single object, or an object
/// wrapping the list under any key.
pub fn parse_landing(raw: &str) -> Result<Vec<LandingLink>, serde_json::Error> {
    let value: Value = serde_json::from_str(strip_code_fence(raw))?;
    match value {
        Value::Array(items) => Ok(landing_entries(items)),
        Value::Object(mut map) => {
            let list_key = map.iter().find(|(_, v)| v.is_array()).map(|(k, _)| k.clone());
            if let Some(Value::Array(items)) = list_key.and_then(|k| map.remove(&k)) {
                return Ok(landing_entries(items));
            }
            Ok(vec![from_value(Value::Object(map))?])
        }
        other => from_value(other),
    }
}

/// Malformed entries are dropped, not fatal.
fn landing_entries(items: Vec<Value>) -> Vec<LandingLink> {
    items
        .into_iter()
        .filter_map(|v| serde_json::from_value::<LandingLink>(v).ok())
        .collect()
}

fn from_value<T: DeserializeOwned>(value: Value) -> Result<T, serde_json::Error> {
    serde_json::from_value(value)
}
