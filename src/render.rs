//! Page rendering: turn a URL into HTML.
//!
//! The renderer is an external collaborator. Two adapters are provided:
//!
//! | Adapter | Notes |
//! |---------|-------|
//! | [`HttpRenderer`] | plain GET, no script execution |
//! | [`BrowserlessRenderer`] | Browserless `/content` API, fully rendered DOM |
//!
//! Both are wrapped in a [`TabPool`], which bounds how many browsing
//! contexts are open at once and closes each one through an RAII guard, so
//! a failed or cancelled render never leaks a context into later fetches.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, info, instrument};

use crate::config::RendererConfig;
use crate::error::RenderError;

#[async_trait(?Send)]
pub trait Renderer {
    /// Load `url` and return its HTML.
    async fn render(&self, url: &str) -> Result<String, RenderError>;
}

/// Build the configured renderer, already wrapped in a [`TabPool`].
pub fn build_renderer(config: &RendererConfig) -> Result<Arc<dyn Renderer>, RenderError> {
    let inner: Box<dyn Renderer> = match config {
        RendererConfig::Http { timeout_secs, .. } => Box::new(HttpRenderer::new(*timeout_secs)?),
        RendererConfig::Browserless {
            base_url,
            token,
            timeout_secs,
            ..
        } => Box::new(BrowserlessRenderer::new(base_url, token.as_deref(), *timeout_secs)?),
    };
    Ok(Arc::new(TabPool::new(inner, config.max_tabs())))
}

/// Plain HTTP renderer.
#[derive(Debug)]
pub struct HttpRenderer {
    client: reqwest::Client,
}

impl HttpRenderer {
    pub fn new(timeout_secs: u64) -> Result<Self, RenderError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("open_eyes/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait(?Send)]
impl Renderer for HttpRenderer {
    #[instrument(level = "debug", skip(self))]
    async fn render(&self, url: &str) -> Result<String, RenderError> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(RenderError::Api {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("unknown").to_string(),
            });
        }
        Ok(resp.text().await?)
    }
}

/// Client for the Browserless `/content` endpoint.
#[derive(Debug)]
pub struct BrowserlessRenderer {
    client: reqwest::Client,
    endpoint: String,
}

impl BrowserlessRenderer {
    pub fn new(base_url: &str, token: Option<&str>, timeout_secs: u64) -> Result<Self, RenderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        let mut endpoint = format!("{}/content", base_url.trim_end_matches('/'));
        if let Some(token) = token {
            endpoint.push_str(&format!("?token={}", urlencoding::encode(token)));
        }
        Ok(Self { client, endpoint })
    }
}

#[async_trait(?Send)]
impl Renderer for BrowserlessRenderer {
    #[instrument(level = "debug", skip(self))]
    async fn render(&self, url: &str) -> Result<String, RenderError> {
        let body = serde_json::json!({ "url": url });
        let resp = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(RenderError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(resp.text().await?)
    }
}

/// Bounded pool of browsing contexts in front of a renderer.
pub struct TabPool {
    inner: Box<dyn Renderer>,
    semaphore: Semaphore,
    open: AtomicUsize,
}

/// An open browsing context. Dropping it closes the context and frees the slot.
pub struct TabGuard<'a> {
    _permit: SemaphorePermit<'a>,
    open: &'a AtomicUsize,
}

impl Drop for TabGuard<'_> {
    fn drop(&mut self) {
        let remaining = self.open.fetch_sub(1, Ordering::SeqCst) - 1;
        debug!(open_tabs = remaining, "Closed tab");
    }
}

impl TabPool {
    pub fn new(inner: Box<dyn Renderer>, max_tabs: usize) -> Self {
        let max_tabs = max_tabs.max(1);
        info!(max_tabs, "Tab pool initialized");
        Self {
            inner,
            semaphore: Semaphore::new(max_tabs),
            open: AtomicUsize::new(0),
        }
    }

    /// Number of contexts currently open.
    #[cfg(test)]
    pub fn open_tabs(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    async fn open_tab(&self) -> Result<TabGuard<'_>, RenderError> {
        let permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| RenderError::PoolClosed)?;
        let open = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(open_tabs = open, "Opened tab");
        Ok(TabGuard {
            _permit: permit,
            open: &self.open,
        })
    }
}

#[async_trait(?Send)]
impl Renderer for TabPool {
    async fn render(&self, url: &str) -> Result<String, RenderError> {
        let _tab = self.open_tab().await?;
        self.inner.render(url).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use futures::future::join_all;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Renderer serving fixed pages; unknown URLs answer 404.
    #[derive(Default)]
    pub(crate) struct StaticRenderer {
        pages: HashMap<String, String>,
        pub(crate) calls: Mutex<Vec<String>>,
    }

    impl StaticRenderer {
        pub(crate) fn with_page(mut self, url: &str, html: &str) -> Self {
            self.pages.insert(url.to_string(), html.to_string());
            self
        }
    }

    #[async_trait(?Send)]
    impl Renderer for StaticRenderer {
        async fn render(&self, url: &str) -> Result<String, RenderError> {
            self.calls.lock().unwrap().push(url.to_string());
            self.pages.get(url).cloned().ok_or(RenderError::Api {
                status: 404,
                message: "Not Found".to_string(),
            })
        }
    }

    /// Renderer that sleeps, tracks its peak concurrency, and fails on `/fail/` URLs.
    struct SlowRenderer {
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait(?Send)]
    impl Renderer for SlowRenderer {
        async fn render(&self, url: &str) -> Result<String, RenderError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            if url.contains("/fail/") {
                Err(RenderError::Network("connection reset".to_string()))
            } else {
                Ok(format!("<html>{url}</html>"))
            }
        }
    }

    fn pool(max_tabs: usize) -> (TabPool, Arc<AtomicUsize>) {
        let peak = Arc::new(AtomicUsize::new(0));
        let inner = SlowRenderer {
            active: Arc::new(AtomicUsize::new(0)),
            peak: peak.clone(),
        };
        (TabPool::new(Box::new(inner), max_tabs), peak)
    }

    #[tokio::test]
    async fn test_tabs_closed_after_success_and_failure() {
        let (pool, _) = pool(2);
        assert!(pool.render("https://a.com/ok/1").await.is_ok());
        assert!(pool.render("https://a.com/fail/1").await.is_err());
        assert_eq!(pool.open_tabs(), 0);
    }

    #[tokio::test]
    async fn test_concurrency_bounded_by_max_tabs() {
        let (pool, peak) = pool(2);
        let urls: Vec<String> = (0..6).map(|i| format!("https://a.com/ok/{i}")).collect();
        let results = join_all(urls.iter().map(|u| pool.render(u))).await;
        assert!(results.iter().all(|r| r.is_ok()));
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.open_tabs(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_render_releases_tab() {
        let (pool, _) = pool(1);
        let cancelled =
            tokio::time::timeout(Duration::from_millis(1), pool.render("https://a.com/ok/slow")).await;
        assert!(cancelled.is_err());
        assert_eq!(pool.open_tabs(), 0);
        assert!(pool.render("https://a.com/ok/next").await.is_ok());
    }

    #[test]
    fn test_browserless_endpoint_encodes_token() {
        let r = BrowserlessRenderer::new("http://localhost:3000/", Some("a b&c"), 5).unwrap();
        assert_eq!(r.endpoint, "http://localhost:3000/content?token=a%20b%26c");
    }
}
