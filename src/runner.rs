//! Runs every source pipeline with bounded concurrency.

use futures::FutureExt;
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use tracing::{error, info, instrument};

use crate::error::PipelineError;
use crate::models::SourceOutcome;
use crate::pipeline::SourcePipeline;
use crate::utils::panic_message;

/// Run the pipelines scheduled for `day_of_year`, at most `source_workers`
/// at once, and key every outcome by source id.
///
/// Unscheduled sources are reported as skipped without being touched. A
/// pipeline that panics is reported as failed; the others keep running.
#[instrument(level = "info", skip(pipelines), fields(sources = pipelines.len()))]
pub async fn run_sources(
    pipelines: Vec<SourcePipeline>,
    day_of_year: u32,
    source_workers: usize,
) -> BTreeMap<String, SourceOutcome> {
    let mut outcomes = BTreeMap::new();
    let mut scheduled = Vec::with_capacity(pipelines.len());

    for pipeline in pipelines {
        let source = pipeline.source();
        if source.is_scheduled(day_of_year) {
            scheduled.push(pipeline);
        } else {
            info!(source = %source.source, interval = source.interval, day_of_year, "Not scheduled today; skipping");
            outcomes.insert(
                source.source.clone(),
                SourceOutcome::Skipped {
                    interval: source.interval,
                    day_of_year,
                },
            );
        }
    }

    info!(scheduled = scheduled.len(), workers = source_workers, "Running sources");
    let results: Vec<(String, SourceOutcome)> = stream::iter(&scheduled)
        .map(|pipeline| async move {
            let id = pipeline.source().source.clone();
            let outcome = AssertUnwindSafe(pipeline.run())
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    let e = PipelineError::Panicked(panic_message(panic));
                    error!(source = %id, error = %e, "Source pipeline panicked");
                    SourceOutcome::Failed {
                        attempts: 1,
                        error: e.to_string(),
                    }
                });
            (id, outcome)
        })
        .buffer_unordered(source_workers.max(1))
        .collect()
        .await;

    outcomes.extend(results);
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DedupPolicy, Mode};
    use crate::dedup::DedupOracle;
    use crate::discover::LinkDiscoverer;
    use crate::error::DiscoveryError;
    use crate::models::Candidate;
    use crate::persist::PersistenceGateway;
    use crate::pipeline::tests::{FixedDiscoverer, MapFetcher, content, fast_settings, pipeline, source};
    use crate::registry::Collector;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct PanickingDiscoverer;

    #[async_trait(?Send)]
    impl LinkDiscoverer for PanickingDiscoverer {
        async fn discover(&self, _landing_url: &str) -> Result<Vec<Candidate>, DiscoveryError> {
            panic!("landing page parser crashed");
        }
    }

    const A: &str = "https://news.example.com/world/2025/a";

    fn working(store: Arc<MemoryStore>, id: &str, interval: u32, calls: Arc<AtomicUsize>) -> SourcePipeline {
        pipeline(
            store,
            source(id, interval),
            FixedDiscoverer {
                candidates: Some(vec![Candidate::new(format!("{A}-{id}"), "Summit opens in Alaska")]),
                calls,
            },
            MapFetcher {
                pages: HashMap::from([(format!("{A}-{id}"), content("Body", None))]),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_unscheduled_source_skipped_without_discovery() {
        let store = Arc::new(MemoryStore::new());
        let every_other_day = Arc::new(AtomicUsize::new(0));
        let daily = Arc::new(AtomicUsize::new(0));
        let pipelines = vec![
            working(store.clone(), "biweekly", 2, every_other_day.clone()),
            working(store.clone(), "daily", 1, daily.clone()),
        ];

        let outcomes = run_sources(pipelines, 11, 5).await;
        assert_eq!(
            outcomes["biweekly"],
            SourceOutcome::Skipped {
                interval: 2,
                day_of_year: 11
            }
        );
        assert_eq!(every_other_day.load(Ordering::SeqCst), 0);
        assert_eq!(daily.load(Ordering::SeqCst), 1);
        assert!(matches!(outcomes["daily"], SourceOutcome::Completed { stored: 1, .. }));
    }

    #[tokio::test]
    async fn test_failing_and_panicking_units_are_isolated() {
        let store = Arc::new(MemoryStore::new());
        let oracle = DedupOracle::new(store.clone(), DedupPolicy::Url);
        let panicking = SourcePipeline::new(
            source("panics", 1),
            Collector {
                discoverer: Box::new(PanickingDiscoverer),
                fetcher: Box::new(MapFetcher::default()),
            },
            oracle.clone(),
            PersistenceGateway::new(store.clone(), oracle),
            fast_settings(),
            Mode::Simple,
        );
        let failing = pipeline(
            store.clone(),
            source("down", 1),
            FixedDiscoverer {
                candidates: None,
                calls: Arc::new(AtomicUsize::new(0)),
            },
            MapFetcher::default(),
        );
        let healthy = working(store.clone(), "healthy", 1, Arc::new(AtomicUsize::new(0)));

        let outcomes = run_sources(vec![panicking, failing, healthy], 100, 2).await;
        assert_eq!(outcomes.len(), 3);
        match &outcomes["panics"] {
            SourceOutcome::Failed { error, .. } => assert!(error.contains("landing page parser crashed")),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(matches!(outcomes["down"], SourceOutcome::Failed { attempts: 3, .. }));
        assert!(matches!(outcomes["healthy"], SourceOutcome::Completed { stored: 1, .. }));
        assert_eq!(store.records().len(), 1);
    }
}
