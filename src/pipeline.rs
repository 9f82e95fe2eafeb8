//! Per-source collection pipeline.
//!
//! ```text
//! Idle -> DiscoveringUrls -> FilteringUrls -> FetchingContent -> Persisting -> Done
//! ```
//!
//! A discovery error, or a fetch stage where every candidate failed, aborts
//! the attempt. The next attempt starts again from discovery; nothing from a
//! failed attempt is carried over.

use chrono::Local;
use futures::FutureExt;
use futures::stream::{self, StreamExt};
use itertools::Itertools;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{Instrument, Span, debug, error, info, info_span, warn};

use crate::config::{Mode, PipelineSettings, SourceConfig};
use crate::dedup::DedupOracle;
use crate::error::{FetchError, PipelineError};
use crate::filter::is_useful;
use crate::models::{Candidate, ExtractedContent, Record, SourceOutcome};
use crate::persist::PersistenceGateway;
use crate::registry::Collector;
use crate::utils::panic_message;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    DiscoveringUrls,
    FilteringUrls,
    FetchingContent,
    Persisting,
    Done { success: bool },
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Idle => f.write_str("idle"),
            Stage::DiscoveringUrls => f.write_str("discovering_urls"),
            Stage::FilteringUrls => f.write_str("filtering_urls"),
            Stage::FetchingContent => f.write_str("fetching_content"),
            Stage::Persisting => f.write_str("persisting"),
            Stage::Done { success: true } => f.write_str("done"),
            Stage::Done { success: false } => f.write_str("failed"),
        }
    }
}

/// Counts from one successful attempt.
#[derive(Debug, Default, PartialEq, Eq)]
struct AttemptReport {
    discovered: usize,
    fetched: usize,
    stored: usize,
    not_stored: usize,
}

pub struct SourcePipeline {
    source: SourceConfig,
    collector: Collector,
    oracle: DedupOracle,
    gateway: PersistenceGateway,
    settings: PipelineSettings,
    url_cap: usize,
    span: Span,
}

impl SourcePipeline {
    pub fn new(
        source: SourceConfig,
        collector: Collector,
        oracle: DedupOracle,
        gateway: PersistenceGateway,
        settings: PipelineSettings,
        mode: Mode,
    ) -> Self {
        let span = info_span!("source", source = %source.source);
        let url_cap = settings.url_cap(mode);
        Self {
            source,
            collector,
            oracle,
            gateway,
            settings,
            url_cap,
            span,
        }
    }

    pub fn source(&self) -> &SourceConfig {
        &self.source
    }

    fn enter(&self, stage: Stage) {
        debug!(%stage, "Stage transition");
    }

    /// Run the pipeline with bounded retries. Never returns an error: the
    /// outcome carries it.
    pub async fn run(&self) -> SourceOutcome {
        self.run_attempts().instrument(self.span.clone()).await
    }

    async fn run_attempts(&self) -> SourceOutcome {
        let max_attempts = self.settings.max_attempts.max(1);
        self.enter(Stage::Idle);
        info!(url = %self.source.url, collector = %self.source.collector, "Starting collection");

        let mut last_error = String::new();
        for attempt in 1..=max_attempts {
            match self.attempt().await {
                Ok(report) => {
                    self.enter(Stage::Done { success: true });
                    info!(
                        attempt,
                        discovered = report.discovered,
                        fetched = report.fetched,
                        stored = report.stored,
                        "Collection finished"
                    );
                    return SourceOutcome::Completed {
                        discovered: report.discovered,
                        fetched: report.fetched,
                        stored: report.stored,
                        not_stored: report.not_stored,
                        attempts: attempt,
                    };
                }
                Err(e) => {
                    warn!(attempt, max_attempts, error = %e, "Attempt failed");
                    last_error = e.to_string();
                    if attempt < max_attempts {
                        sleep(Duration::from_millis(self.settings.retry_delay_ms)).await;
                    }
                }
            }
        }

        self.enter(Stage::Done { success: false });
        error!(attempts = max_attempts, error = %last_error, "Collection failed");
        SourceOutcome::Failed {
            attempts: max_attempts,
            error: last_error,
        }
    }

    async fn attempt(&self) -> Result<AttemptReport, PipelineError> {
        self.enter(Stage::DiscoveringUrls);
        let discovered = self.collector.discoverer.discover(&self.source.url).await?;
        let discovered_count = discovered.len();

        self.enter(Stage::FilteringUrls);
        let candidates = self.select_candidates(discovered).await;
        info!(discovered = discovered_count, selected = candidates.len(), "Filtered candidates");

        self.enter(Stage::FetchingContent);
        let fetched = self.fetch_all(&candidates).await;
        let failures = fetched.values().filter(|r| r.is_err()).count();
        if !candidates.is_empty() && failures == candidates.len() {
            return Err(PipelineError::FetchExhausted(failures));
        }

        let now = Local::now().naive_local();
        let records: Vec<Record> = candidates
            .iter()
            .filter_map(|candidate| match fetched.get(&candidate.url) {
                Some(Ok(content)) => Some(Record::from_extraction(
                    candidate,
                    content.clone(),
                    &self.source.source,
                    &self.source.kind,
                    self.settings.content_limit,
                    now,
                )),
                _ => None,
            })
            .collect();
        let fetched_count = records.len();

        self.enter(Stage::Persisting);
        let summary = if records.is_empty() {
            Default::default()
        } else {
            self.gateway.save_batch(records).await
        };

        Ok(AttemptReport {
            discovered: discovered_count,
            fetched: fetched_count,
            stored: summary.success,
            not_stored: summary.failed,
        })
    }

    /// Filter, dedup within the page, drop already-stored URLs, then cap.
    async fn select_candidates(&self, discovered: Vec<Candidate>) -> Vec<Candidate> {
        let mut selected = Vec::new();
        for candidate in discovered
            .into_iter()
            .filter(|c| is_useful(&c.url, &c.title))
            .unique_by(|c| c.url.clone())
        {
            if selected.len() >= self.url_cap {
                break;
            }
            if self.oracle.is_known(&candidate.url, &candidate.title).await {
                debug!(url = %candidate.url, "Already stored; skipping fetch");
                continue;
            }
            selected.push(candidate);
        }
        selected
    }

    /// Fetch every candidate, at most `fetch_workers` at once. A failing or
    /// panicking fetch only affects its own URL.
    async fn fetch_all(&self, candidates: &[Candidate]) -> HashMap<String, Result<ExtractedContent, FetchError>> {
        let fetcher = self.collector.fetcher.as_ref();
        stream::iter(candidates)
            .map(|candidate| async move {
                let result = AssertUnwindSafe(fetcher.fetch(&candidate.url))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| Err(FetchError::Panicked(panic_message(panic))));
                match &result {
                    Ok(content) => {
                        debug!(url = %candidate.url, chars = content.content.chars().count(), "Fetched")
                    }
                    Err(e) => warn!(url = %candidate.url, error = %e, "Fetch failed"),
                }
                (candidate.url.clone(), result)
            })
            .buffer_unordered(self.settings.fetch_workers.max(1))
            .collect()
            .await
    }
}
