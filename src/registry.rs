//! Collector tags to discoverer/fetcher pairs.
//!
//! | Tag | Discovery | Fetch chain |
//! |-----|-----------|-------------|
//! | `simple` | anchors | DOM heuristics |
//! | `llm` | extractor over the anchor listing | extractor, then DOM heuristics |
//!
//! When no extractor is configured, `llm` sources degrade to the `simple`
//! pair with a warning instead of failing.

use itertools::Itertools;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::config::SourceConfig;
use crate::discover::{AnchorDiscoverer, LinkDiscoverer, LlmDiscoverer};
use crate::error::ConfigError;
use crate::extract::Extractor;
use crate::fetch::{ContentFetcher, DomStrategy, FallbackChain, LlmStrategy};
use crate::render::Renderer;

/// Shared collaborators every collector is built from.
#[derive(Clone)]
pub struct Collaborators {
    pub renderer: Arc<dyn Renderer>,
    pub extractor: Option<Arc<dyn Extractor>>,
    pub content_limit: usize,
}

pub struct Collector {
    pub discoverer: Box<dyn LinkDiscoverer>,
    pub fetcher: Box<dyn ContentFetcher>,
}

type Builder = fn(&SourceConfig, &Collaborators) -> Collector;

pub struct CollectorRegistry {
    builders: HashMap<&'static str, Builder>,
}

impl Default for CollectorRegistry {
    fn default() -> Self {
        let mut builders: HashMap<&'static str, Builder> = HashMap::new();
        builders.insert("simple", build_simple);
        builders.insert("llm", build_llm);
        Self { builders }
    }
}

fn build_simple(source: &SourceConfig, collab: &Collaborators) -> Collector {
    let chain = FallbackChain::new(collab.renderer.clone(), collab.content_limit).then("dom", DomStrategy);
    debug!(source = %source.source, strategies = ?chain.strategy_names(), "Built anchor collector");
    Collector {
        discoverer: Box::new(AnchorDiscoverer::new(collab.renderer.clone())),
        fetcher: Box::new(chain),
    }
}

fn build_llm(source: &SourceConfig, collab: &Collaborators) -> Collector {
    let Some(extractor) = &collab.extractor else {
        warn!(source = %source.source, "No extractor configured; using anchor discovery and DOM fetch");
        return build_simple(source, collab);
    };
    let chain = FallbackChain::new(collab.renderer.clone(), collab.content_limit)
        .then("llm", LlmStrategy::new(extractor.clone()))
        .then("dom", DomStrategy);
    debug!(source = %source.source, strategies = ?chain.strategy_names(), "Built extractor collector");
    Collector {
        discoverer: Box::new(LlmDiscoverer::new(collab.renderer.clone(), extractor.clone())),
        fetcher: Box::new(chain),
    }
}

impl CollectorRegistry {
    pub fn known_tags(&self) -> String {
        self.builders.keys().sorted().join(", ")
    }

    pub fn build(&self, source: &SourceConfig, collab: &Collaborators) -> Result<Collector, ConfigError> {
        let builder = self
            .builders
            .get(source.collector.as_str())
            .ok_or_else(|| ConfigError::UnknownCollector {
                source_id: source.source.clone(),
                tag: source.collector.clone(),
                known: self.known_tags(),
            })?;
        Ok(builder(source, collab))
    }

    /// Build a collector per source; sources with an unknown tag are logged
    /// and dropped.
    pub fn build_all(
        &self,
        sources: &[SourceConfig],
        collab: &Collaborators,
    ) -> Vec<(SourceConfig, Collector)> {
        sources
            .iter()
            .filter_map(|source| match self.build(source, collab) {
                Ok(collector) => Some((source.clone(), collector)),
                Err(e) => {
                    error!(error = %e, "Dropping source");
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::tests::ScriptedExtractor;
    use crate::render::tests::StaticRenderer;

    fn source(id: &str, collector: &str) -> SourceConfig {
        SourceConfig {
            source: id.to_string(),
            kind: "时政".to_string(),
            url: "https://news.example.com/".to_string(),
            interval: 1,
            collector: collector.to_string(),
        }
    }

    fn collab(extractor: bool) -> Collaborators {
        Collaborators {
            renderer: Arc::new(StaticRenderer::default()),
            extractor: extractor.then(|| Arc::new(ScriptedExtractor::ok(&[])) as Arc<dyn Extractor>),
            content_limit: 10_000,
        }
    }

    #[test]
    fn test_unknown_tag_rejected_with_known_list() {
        let registry = CollectorRegistry::default();
        let err = registry.build(&source("a", "selenium"), &collab(false)).err().unwrap();
        let message = err.to_string();
        assert!(message.contains("selenium"));
        assert!(message.contains("llm, simple"));
    }

    #[test]
    fn test_build_all_drops_only_bad_sources() {
        let registry = CollectorRegistry::default();
        let sources = vec![source("a", "simple"), source("b", "nope"), source("c", "llm")];
        let built = registry.build_all(&sources, &collab(true));
        let ids: Vec<&str> = built.iter().map(|(s, _)| s.source.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn test_llm_tag_without_extractor_degrades() {
        let registry = CollectorRegistry::default();
        assert!(registry.build(&source("a", "llm"), &collab(false)).is_ok());
    }
}
