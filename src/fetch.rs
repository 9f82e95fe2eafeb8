//! Article content fetching.
//!
//! A [`FallbackChain`] renders the page once, then tries its strategies on
//! that HTML in order until one yields non-empty content:
//!
//! 1. [`LlmStrategy`] (when an extractor is configured): visible page text is
//!    sent to the extractor with the article schema.
//! 2. [`DomStrategy`]: a fixed list of content selectors, then a paragraph
//!    heuristic.
//!
//! Whatever wins is truncated to the content limit.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::error::FetchError;
use crate::extract::{ExtractFailure, Extractor, MAX_INPUT_CHARS, Schema, extract_parsed, parse_article};
use crate::models::ExtractedContent;
use crate::render::Renderer;
use crate::utils::truncate_chars;

#[async_trait(?Send)]
pub trait ContentFetcher {
    async fn fetch(&self, url: &str) -> Result<ExtractedContent, FetchError>;
}

/// Container selectors tried in order; the first with text wins.
const CONTENT_SELECTORS: &[&str] = &[
    "article",
    ".content",
    ".article-content",
    ".post-content",
    ".entry-content",
    ".article-body",
    ".post-body",
    ".story-body",
    ".news-content",
    ".post-article",
    "main",
    ".main-content",
];

const PARAGRAPH_MIN_CHARS: usize = 20;
const PARAGRAPH_MAX_COUNT: usize = 10;

static CONTENT: Lazy<Vec<Selector>> = Lazy::new(|| {
    CONTENT_SELECTORS
        .iter()
        .map(|s| Selector::parse(s).expect("static selector"))
        .collect()
});
static PARAGRAPH: Lazy<Selector> = Lazy::new(|| Selector::parse("p").expect("static selector"));
static PUBLISHED: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"meta[property="article:published_time"], meta[name="pubdate"]"#)
        .expect("static selector")
});
static TIME_TAG: Lazy<Selector> = Lazy::new(|| Selector::parse("time[datetime]").expect("static selector"));

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Pull article text out of `html` with the selector list, falling back to
/// the first long paragraphs.
pub fn extract_dom_content(html: &str) -> ExtractedContent {
    let document = Html::parse_document(html);

    let content = CONTENT
        .iter()
        .filter_map(|selector| document.select(selector).next())
        .map(element_text)
        .find(|text| !text.is_empty())
        .unwrap_or_else(|| {
            document
                .select(&PARAGRAPH)
                .map(|p| p.text().collect::<String>().trim().to_string())
                .filter(|t| t.chars().count() > PARAGRAPH_MIN_CHARS)
                .take(PARAGRAPH_MAX_COUNT)
                .collect::<Vec<_>>()
                .join("\n")
        });

    let time = document
        .select(&PUBLISHED)
        .find_map(|m| m.value().attr("content"))
        .or_else(|| document.select(&TIME_TAG).find_map(|t| t.value().attr("datetime")))
        .map(str::to_string);

    ExtractedContent {
        title: None,
        content,
        tags: String::new(),
        time,
    }
}

/// Text a reader would see: every text node outside script, style and
/// template elements.
pub fn visible_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut lines = Vec::new();
    for node in document.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node
            .parent()
            .and_then(|p| p.value().as_element().map(|e| e.name()))
            .is_some_and(|name| matches!(name, "script" | "style" | "noscript" | "template"));
        let text = text.trim();
        if !hidden && !text.is_empty() {
            lines.push(text);
        }
    }
    lines.join("\n")
}

/// One way of turning a rendered page into article content.
#[async_trait(?Send)]
pub trait ExtractStrategy {
    async fn extract(&self, url: &str, html: &str) -> Result<ExtractedContent, FetchError>;
}

/// Selector and paragraph heuristics over rendered HTML.
pub struct DomStrategy;

#[async_trait(?Send)]
impl ExtractStrategy for DomStrategy {
    async fn extract(&self, _url: &str, html: &str) -> Result<ExtractedContent, FetchError> {
        let extracted = extract_dom_content(html);
        if extracted.content.trim().is_empty() {
            return Err(FetchError::Empty);
        }
        Ok(extracted)
    }
}

/// Structured extraction of the page's visible text through the extractor.
pub struct LlmStrategy {
    extractor: Arc<dyn Extractor>,
}

impl LlmStrategy {
    pub fn new(extractor: Arc<dyn Extractor>) -> Self {
        Self { extractor }
    }
}

#[async_trait(?Send)]
impl ExtractStrategy for LlmStrategy {
    #[instrument(level = "debug", name = "llm_extract", skip(self, html))]
    async fn extract(&self, url: &str, html: &str) -> Result<ExtractedContent, FetchError> {
        let text = truncate_chars(&visible_text(html), MAX_INPUT_CHARS);
        if text.is_empty() {
            return Err(FetchError::Empty);
        }
        let prompt = format!("Source URL: {url}\n\n{text}");

        let payload = extract_parsed(self.extractor.as_ref(), &prompt, Schema::Article, parse_article)
            .await
            .map_err(|failure| match failure {
                ExtractFailure::Call(e) => FetchError::Extract(e),
                ExtractFailure::Schema(e) => FetchError::Schema(e.to_string()),
            })?;

        let extracted = ExtractedContent::from(payload);
        if extracted.content.trim().is_empty() {
            return Err(FetchError::Empty);
        }
        Ok(extracted)
    }
}

/// Renders a page once, then tries its strategies in order; the first
/// non-empty result wins.
pub struct FallbackChain {
    renderer: Arc<dyn Renderer>,
    strategies: Vec<(&'static str, Box<dyn ExtractStrategy>)>,
    content_limit: usize,
}

impl FallbackChain {
    pub fn new(renderer: Arc<dyn Renderer>, content_limit: usize) -> Self {
        Self {
            renderer,
            strategies: Vec::new(),
            content_limit,
        }
    }

    pub fn then(mut self, name: &'static str, strategy: impl ExtractStrategy + 'static) -> Self {
        self.strategies.push((name, Box::new(strategy)));
        self
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|(name, _)| *name).collect()
    }
}

#[async_trait(?Send)]
impl ContentFetcher for FallbackChain {
    #[instrument(level = "debug", name = "fetch", skip(self))]
    async fn fetch(&self, url: &str) -> Result<ExtractedContent, FetchError> {
        let html = self.renderer.render(url).await?;
        let mut last_error = FetchError::Empty;
        for (name, strategy) in &self.strategies {
            match strategy.extract(url, &html).await {
                Ok(mut extracted) if !extracted.content.trim().is_empty() => {
                    debug!(%url, strategy = *name, "Content extracted");
                    extracted.content = truncate_chars(extracted.content.trim(), self.content_limit);
                    return Ok(extracted);
                }
                Ok(_) => {
                    debug!(%url, strategy = *name, "Strategy returned empty content");
                    last_error = FetchError::Empty;
                }
                Err(e) => {
                    warn!(%url, strategy = *name, error = %e, "Strategy failed; trying next");
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExtractError;
    use crate::extract::tests::ScriptedExtractor;
    use crate::render::tests::StaticRenderer;

    const URL: &str = "https://example.com/news/2025/story";

    fn long_paragraphs(n: usize) -> String {
        (0..n)
            .map(|i| format!("<p>Paragraph number {i} has enough words to count.</p>"))
            .collect()
    }

    #[test]
    fn test_first_listed_selector_wins() {
        let html = "<html><body><main>Main area</main><div class='content'>Content div</div>\
                    <article><h1>Head</h1><p>Article body</p></article></body></html>";
        assert_eq!(extract_dom_content(html).content, "Head\nArticle body");
    }

    #[test]
    fn test_empty_container_is_skipped() {
        let html = "<html><body><article>  </article><div class='post-content'>Post text</div></body></html>";
        assert_eq!(extract_dom_content(html).content, "Post text");
    }

    #[test]
    fn test_paragraph_fallback_keeps_first_ten_long_paragraphs() {
        let html = format!("<html><body><p>too short</p>{}</body></html>", long_paragraphs(12));
        let content = extract_dom_content(&html).content;
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 10);
        assert!(lines[0].starts_with("Paragraph number 0"));
        assert!(!content.contains("too short"));
    }

    #[test]
    fn test_publication_time_from_meta() {
        let html = r#"<html><head><meta property="article:published_time" content="2025-08-14T08:00:00Z"></head>
                      <body><article>Body</article></body></html>"#;
        assert_eq!(extract_dom_content(html).time.as_deref(), Some("2025-08-14T08:00:00Z"));
    }

    #[test]
    fn test_visible_text_skips_scripts() {
        let html = "<html><head><style>p{}</style></head><body><p>Hello</p><script>var x = 1;</script></body></html>";
        assert_eq!(visible_text(html), "Hello");
    }

    #[tokio::test]
    async fn test_dom_strategy_reports_empty_page() {
        let result = DomStrategy.extract(URL, "<html><body></body></html>").await;
        assert!(matches!(result, Err(FetchError::Empty)));
    }

    #[tokio::test]
    async fn test_llm_strategy_parses_article() {
        let extractor = Arc::new(ScriptedExtractor::ok(&[
            r#"```json
{"content": "Markets rallied.", "tags": ["财经"], "time": "2025-08-14", "title": "Rally"}
```"#,
        ]));
        let fetched = LlmStrategy::new(extractor)
            .extract(URL, "<p>Markets rallied today.</p>")
            .await
            .unwrap();
        assert_eq!(fetched.content, "Markets rallied.");
        assert_eq!(fetched.tags, "财经");
        assert_eq!(fetched.title.as_deref(), Some("Rally"));
    }

    #[tokio::test]
    async fn test_llm_strategy_schema_mismatch_is_per_url_error() {
        let extractor = Arc::new(ScriptedExtractor::ok(&[r#"{"headline": "no content field"}"#]));
        let result = LlmStrategy::new(extractor).extract(URL, "<p>Text</p>").await;
        assert!(matches!(result, Err(FetchError::Schema(_))));
    }

    #[tokio::test]
    async fn test_chain_falls_back_to_dom_without_rendering_twice() {
        let renderer = Arc::new(StaticRenderer::default().with_page(URL, "<article>DOM body</article>"));
        let extractor = Arc::new(ScriptedExtractor::new(vec![Err(ExtractError::Timeout(80))]));
        let chain = FallbackChain::new(renderer.clone(), 10_000)
            .then("llm", LlmStrategy::new(extractor.clone()))
            .then("dom", DomStrategy);
        assert_eq!(chain.strategy_names(), vec!["llm", "dom"]);
        let fetched = chain.fetch(URL).await.unwrap();
        assert_eq!(fetched.content, "DOM body");
        assert_eq!(extractor.call_count(), 1);
        assert_eq!(renderer.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_chain_stops_at_first_success() {
        let renderer = Arc::new(StaticRenderer::default().with_page(URL, "<article>DOM body</article>"));
        let extractor = Arc::new(ScriptedExtractor::ok(&[r#"{"content": "LLM body"}"#]));
        let chain = FallbackChain::new(renderer, 10_000)
            .then("llm", LlmStrategy::new(extractor))
            .then("dom", DomStrategy);
        assert_eq!(chain.fetch(URL).await.unwrap().content, "LLM body");
    }

    #[tokio::test]
    async fn test_chain_truncates_and_reports_render_error() {
        let renderer = Arc::new(StaticRenderer::default().with_page(URL, "<article>abcdefghij</article>"));
        let chain = FallbackChain::new(renderer, 4).then("dom", DomStrategy);
        assert_eq!(chain.fetch(URL).await.unwrap().content, "abcd");

        let missing = chain.fetch("https://example.com/news/2025/gone").await;
        assert!(matches!(missing, Err(FetchError::Render(_))));
    }

    #[tokio::test]
    async fn test_chain_reports_last_strategy_error() {
        let renderer = Arc::new(StaticRenderer::default().with_page(URL, "<html><body><div>x</div></body></html>"));
        let extractor = Arc::new(ScriptedExtractor::ok(&[r#"{"headline": "none"}"#]));
        let chain = FallbackChain::new(renderer, 100)
            .then("dom", DomStrategy)
            .then("llm", LlmStrategy::new(extractor));
        assert!(matches!(chain.fetch(URL).await, Err(FetchError::Schema(_))));
    }
}
