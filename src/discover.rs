//! Landing-page link discovery.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use std::sync::Arc;
use tracing::{info, instrument};
use url::Url;

use crate::error::DiscoveryError;
use crate::extract::{ExtractFailure, Extractor, MAX_INPUT_CHARS, Schema, extract_parsed, parse_landing};
use crate::models::Candidate;
use crate::render::Renderer;
use crate::utils::truncate_chars;

#[async_trait(?Send)]
pub trait LinkDiscoverer {
    /// Candidate article links found on `landing_url`, unfiltered.
    async fn discover(&self, landing_url: &str) -> Result<Vec<Candidate>, DiscoveryError>;
}

static ANCHOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").expect("static selector"));
static TITLED: Lazy<Selector> = Lazy::new(|| Selector::parse("[title]").expect("static selector"));

fn parse_landing_url(landing_url: &str) -> Result<Url, DiscoveryError> {
    Url::parse(landing_url).map_err(|source| DiscoveryError::InvalidUrl {
        url: landing_url.to_string(),
        source,
    })
}

/// Resolve `href` against `base`.
///
/// Fragment-only links and non-http schemes (`javascript:`, `mailto:`) are
/// returned untouched so the URL filter can see and reject them.
pub fn resolve_href(base: &Url, href: &str) -> String {
    let href = href.trim();
    if href.starts_with('#') {
        return href.to_string();
    }
    match Url::parse(href) {
        Ok(absolute) if matches!(absolute.scheme(), "http" | "https") => absolute.to_string(),
        Ok(_) => href.to_string(),
        Err(_) => base
            .join(href)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| href.to_string()),
    }
}

fn anchor_title(anchor: ElementRef<'_>) -> String {
    let attr = |el: ElementRef<'_>| {
        el.value()
            .attr("title")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    };
    attr(anchor)
        .or_else(|| anchor.select(&TITLED).find_map(attr))
        .unwrap_or_else(|| anchor.text().flat_map(str::split_whitespace).collect::<Vec<_>>().join(" "))
}

/// Every `a[href]` on the page as a `(resolved url, title)` candidate.
pub fn parse_anchors(html: &str, base: &Url) -> Vec<Candidate> {
    let document = Html::parse_document(html);
    document
        .select(&ANCHOR)
        .filter_map(|anchor| {
            let href = anchor.value().attr("href")?;
            Some(Candidate::new(resolve_href(base, href), anchor_title(anchor)))
        })
        .collect()
}

/// Anchors of the rendered landing page.
pub struct AnchorDiscoverer {
    renderer: Arc<dyn Renderer>,
}

impl AnchorDiscoverer {
    pub fn new(renderer: Arc<dyn Renderer>) -> Self {
        Self { renderer }
    }
}

#[async_trait(?Send)]
impl LinkDiscoverer for AnchorDiscoverer {
    #[instrument(level = "info", name = "anchor_discover", skip(self))]
    async fn discover(&self, landing_url: &str) -> Result<Vec<Candidate>, DiscoveryError> {
        let base = parse_landing_url(landing_url)?;
        let html = self.renderer.render(landing_url).await?;
        let candidates = parse_anchors(&html, &base);
        info!(count = candidates.len(), "Indexed landing page anchors");
        Ok(candidates)
    }
}

/// Asks the extractor to pick the article links out of the landing page.
pub struct LlmDiscoverer {
    renderer: Arc<dyn Renderer>,
    extractor: Arc<dyn Extractor>,
}

impl LlmDiscoverer {
    pub fn new(renderer: Arc<dyn Renderer>, extractor: Arc<dyn Extractor>) -> Self {
        Self { renderer, extractor }
    }
}

#[async_trait(?Send)]
impl LinkDiscoverer for LlmDiscoverer {
    #[instrument(level = "info", name = "llm_discover", skip(self))]
    async fn discover(&self, landing_url: &str) -> Result<Vec<Candidate>, DiscoveryError> {
        let base = parse_landing_url(landing_url)?;
        let html = self.renderer.render(landing_url).await?;

        let listing = parse_anchors(&html, &base)
            .into_iter()
            .filter(|c| !c.title.is_empty())
            .map(|c| format!("[{}]({})", c.title, c.url))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = truncate_chars(&format!("Landing page: {landing_url}\n\n{listing}"), MAX_INPUT_CHARS);

        let links = extract_parsed(self.extractor.as_ref(), &prompt, Schema::Landing, parse_landing)
            .await
            .map_err(|failure| match failure {
                ExtractFailure::Call(e) => DiscoveryError::Extract(e),
                ExtractFailure::Schema(e) => DiscoveryError::Schema(e.to_string()),
            })?;

        let candidates: Vec<Candidate> = links
            .into_iter()
            .map(|link| Candidate::new(resolve_href(&base, &link.url), link.title.trim()))
            .collect();
        info!(count = candidates.len(), "Extractor selected landing links");
        Ok(candidates)
    }
}
