//! `awful_aj`-backed extractor with per-call timeout and exponential backoff.
//!
//! - [`AskAsync`]: one async LLM round trip
//! - [`TemplateAsk`]: `awful_aj::api::ask` bound to one chat template, with a timeout
//! - [`RetryAsk`]: decorator that retries any [`AskAsync`] with backoff and jitter
//!
//! Backoff between attempts:
//! ```text
//! delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
//! ```

use async_trait::async_trait;
use awful_aj::api::ask;
use awful_aj::{config::AwfulJadeConfig, config_dir, template, template::ChatTemplate};
use rand::{Rng, rng};
use std::error::Error;
use std::fmt;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{error, info, instrument, warn};

use super::{Extractor, Schema};
use crate::config::LlmConfig;
use crate::error::ExtractError;

/// One async round trip to the model.
///
/// [`TemplateAsk`] talks to the endpoint; [`RetryAsk`] wraps any
/// implementation with backoff. Tests plug in scripted implementations.
pub trait AskAsync {
    /// What a successful call yields.
    type Response;

    /// Send `text` to the model.
    ///
    /// # Arguments
    ///
    /// * `text` - Prompt body, already truncated to the model's input budget
    ///
    /// # Returns
    ///
    /// The model's answer, or the error of the failed call.
    async fn ask(&self, text: &str) -> Result<Self::Response, Box<dyn Error>>;
}

/// Retries the wrapped [`AskAsync`] with exponential backoff.
///
/// The first call is not a retry: `max_retries = 3` allows up to four calls.
///
/// # Backoff
///
/// ```text
/// delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
/// ```
pub struct RetryAsk<T> {
    /// The wrapped client.
    inner: T,
    /// Retries after the first failure before the error is returned.
    max_retries: usize,
    /// Delay before the first retry; doubles each attempt.
    base_delay: Duration,
    /// Upper bound on the delay before jitter.
    max_delay: Duration,
}

impl<T> RetryAsk<T>
where
    T: AskAsync,
{
    /// Wrap `inner` with retries.
    ///
    /// # Arguments
    ///
    /// * `inner` - The client to retry
    /// * `max_retries` - Retries after the first failure
    /// * `base_delay` - Delay before the first retry; the cap is 30s
    ///
    /// # Example
    ///
    /// ```ignore
    /// let client = TemplateAsk { config: &config, template: &template, timeout };
    /// let retrying = RetryAsk::new(client, 3, Duration::from_secs(1));
    /// ```
    pub fn new(inner: T, max_retries: usize, base_delay: Duration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: Duration::from_secs(30),
        }
    }

    fn delay_for(&self, attempt: usize) -> Duration {
        let shift = (attempt.saturating_sub(1)).min(16) as u32;
        let delay = self.base_delay.saturating_mul(1 << shift).min(self.max_delay);
        let jitter_ms: u64 = rng().random_range(0..=250);
        delay + Duration::from_millis(jitter_ms)
    }
}

impl<T> fmt::Debug for RetryAsk<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryAsk")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl<T> AskAsync for RetryAsk<T>
where
    T: AskAsync,
{
    type Response = T::Response;

    async fn ask(&self, text: &str) -> Result<Self::Response, Box<dyn Error>> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            match self.inner.ask(text).await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    attempt += 1;
                    let total_dt = total_t0.elapsed();

                    if attempt > self.max_retries {
                        error!(
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_total = total_dt.as_millis(),
                            error = %e,
                            "ask() exhausted retries"
                        );
                        return Err(e);
                    }

                    let delay = self.delay_for(attempt);
                    warn!(
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_total = total_dt.as_millis(),
                        ?delay,
                        error = %e,
                        "ask() attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

/// `awful_aj::api::ask` bound to a config and one chat template.
///
/// A call that outlives `timeout` is dropped and reported as
/// [`ExtractError::Timeout`], which [`RetryAsk`] treats like any other failure.
///
/// # Lifetime Parameters
///
/// * `'a` - Borrow of the extractor's loaded config and template
pub struct TemplateAsk<'a> {
    /// Endpoint, API key and model settings.
    pub config: &'a AwfulJadeConfig,
    /// System prompt and response format for one schema.
    pub template: &'a ChatTemplate,
    /// Per-call limit.
    pub timeout: Duration,
}

impl AskAsync for TemplateAsk<'_> {
    type Response = String;

    async fn ask(&self, text: &str) -> Result<Self::Response, Box<dyn Error>> {
        let t0 = Instant::now();
        let res = match timeout(
            self.timeout,
            ask(self.config, text.to_string(), self.template, None, None),
        )
        .await
        {
            Ok(res) => res,
            Err(_) => Err(Box::new(ExtractError::Timeout(self.timeout.as_secs())) as Box<dyn Error>),
        };
        if let Err(e) = &res {
            warn!(elapsed_ms = t0.elapsed().as_millis(), error = %e, "API call failed");
        }
        res
    }
}

/// Extractor backed by an OpenAI-compatible endpoint through `awful_aj`.
pub struct AwfulExtractor {
    config: AwfulJadeConfig,
    article_template: ChatTemplate,
    landing_template: ChatTemplate,
    timeout: Duration,
    max_retries: usize,
}

impl fmt::Debug for AwfulExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwfulExtractor")
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl AwfulExtractor {
    /// Load the awful_aj config and both chat templates.
    #[instrument(level = "info", skip_all)]
    pub async fn load(llm: &LlmConfig) -> Result<Self, ExtractError> {
        let config_path = match &llm.config_path {
            Some(path) => path.clone(),
            None => config_dir()
                .map_err(|e| ExtractError::Setup(e.to_string()))?
                .join("config.yaml")
                .to_string_lossy()
                .into_owned(),
        };
        let config = awful_aj::config::load_config(&config_path)
            .map_err(|e| ExtractError::Setup(format!("{config_path}: {e:?}")))?;
        info!(%config_path, "Loaded LLM configuration");

        let article_template = template::load_template(&llm.article_template)
            .await
            .map_err(|e| ExtractError::Setup(format!("template {}: {e}", llm.article_template)))?;
        let landing_template = template::load_template(&llm.landing_template)
            .await
            .map_err(|e| ExtractError::Setup(format!("template {}: {e}", llm.landing_template)))?;
        info!(
            article = %llm.article_template,
            landing = %llm.landing_template,
            "Loaded extraction templates"
        );

        Ok(Self {
            config,
            article_template,
            landing_template,
            timeout: Duration::from_secs(llm.timeout_secs),
            max_retries: llm.max_retries,
        })
    }

    fn template_for(&self, schema: Schema) -> &ChatTemplate {
        match schema {
            Schema::Article => &self.article_template,
            Schema::Landing => &self.landing_template,
        }
    }
}

#[async_trait(?Send)]
impl Extractor for AwfulExtractor {
    #[instrument(level = "info", skip_all, fields(%schema, chars = text.len()))]
    async fn extract(&self, text: &str, schema: Schema) -> Result<String, ExtractError> {
        let t0 = Instant::now();
        let client = TemplateAsk {
            config: &self.config,
            template: self.template_for(schema),
            timeout: self.timeout,
        };
        let api = RetryAsk::new(client, self.max_retries, Duration::from_secs(1));
        let res = api.ask(text).await;

        match res {
            Ok(answer) => {
                info!(elapsed_ms_total = t0.elapsed().as_millis(), "Extraction succeeded");
                Ok(answer)
            }
            Err(e) => {
                error!(elapsed_ms_total = t0.elapsed().as_millis(), error = %e, "Extraction failed");
                Err(ExtractError::Call(e.to_string()))
            }
        }
    }
}
