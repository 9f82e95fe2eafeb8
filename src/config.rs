//! YAML configuration: sources to collect, pipeline limits, collaborators.
//!
//! A missing or broken config file never aborts the process. [`Config::load_or_default`]
//! logs the problem and hands back an empty configuration.
//!
//! ```yaml
//! mode: simple            # or `test` to cap each source at a handful of URLs
//! dedup: url              # or `url_or_title`
//! pipeline:
//!   max_attempts: 3
//!   max_urls: 50
//! renderer:
//!   kind: browserless
//!   base_url: http://localhost:3000
//! llm:
//!   article_template: article_extractor
//!   landing_template: landing_extractor
//! sources:
//!   - source: nytimes_cn
//!     type: 时政
//!     url: https://cn.nytimes.com/
//!     interval: 1
//!     collector: llm
//! storage:
//!   host: localhost
//!   database: openeyes
//! ```

use serde::Deserialize;
use std::fmt;
use std::path::Path;
use tracing::{error, info, warn};

use crate::error::ConfigError;

/// Item cap applied per source in [`Mode::Test`].
pub const TEST_MODE_URL_CAP: usize = 6;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mode: Mode,
    pub dedup: DedupPolicy,
    pub pipeline: PipelineSettings,
    pub renderer: RendererConfig,
    pub llm: Option<LlmConfig>,
    pub sources: Vec<SourceConfig>,
    pub storage: Option<StorageConfig>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Simple,
    /// Caps collected URLs per source to keep development runs cheap.
    Test,
}

/// Which keys count as "already stored".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    /// URL only.
    #[default]
    Url,
    /// URL, then exact title when the URL is unknown.
    UrlOrTitle,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub max_attempts: u32,
    pub max_urls: usize,
    pub content_limit: usize,
    pub source_workers: usize,
    pub fetch_workers: usize,
    pub retry_delay_ms: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            max_urls: 50,
            content_limit: 10_000,
            source_workers: 5,
            fetch_workers: 4,
            retry_delay_ms: 1_000,
        }
    }
}

impl PipelineSettings {
    /// Candidate cap for a source under `mode`.
    pub fn url_cap(&self, mode: Mode) -> usize {
        match mode {
            Mode::Simple => self.max_urls,
            Mode::Test => self.max_urls.min(TEST_MODE_URL_CAP),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RendererConfig {
    /// Plain HTTP GET; no script execution.
    Http {
        #[serde(default = "default_render_timeout")]
        timeout_secs: u64,
        #[serde(default = "default_max_tabs")]
        max_tabs: usize,
    },
    /// Browserless `/content` endpoint returning fully rendered HTML.
    Browserless {
        base_url: String,
        #[serde(default)]
        token: Option<String>,
        #[serde(default = "default_render_timeout")]
        timeout_secs: u64,
        #[serde(default = "default_max_tabs")]
        max_tabs: usize,
    },
}

impl Default for RendererConfig {
    fn default() -> Self {
        RendererConfig::Http {
            timeout_secs: default_render_timeout(),
            max_tabs: default_max_tabs(),
        }
    }
}

impl RendererConfig {
    pub fn max_tabs(&self) -> usize {
        match self {
            RendererConfig::Http { max_tabs, .. } | RendererConfig::Browserless { max_tabs, .. } => {
                (*max_tabs).max(1)
            }
        }
    }
}

fn default_render_timeout() -> u64 {
    30
}

fn default_max_tabs() -> usize {
    4
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Path to the awful_aj `config.yaml`; defaults to the awful_aj config dir.
    pub config_path: Option<String>,
    pub article_template: String,
    pub landing_template: String,
    pub timeout_secs: u64,
    pub max_retries: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            config_path: None,
            article_template: "article_extractor".to_string(),
            landing_template: "landing_extractor".to_string(),
            timeout_secs: 80,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SourceConfig {
    pub source: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    #[serde(default = "default_interval")]
    pub interval: u32,
    #[serde(default = "default_collector")]
    pub collector: String,
}

impl SourceConfig {
    /// Whether this source runs on the given day of the year.
    pub fn is_scheduled(&self, day_of_year: u32) -> bool {
        self.interval != 0 && day_of_year % self.interval == 0
    }
}

impl fmt::Display for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<{} collector={} type={} url={} interval={}>",
            self.source, self.collector, self.kind, self.url, self.interval
        )
    }
}

fn default_interval() -> u32 {
    1
}

fn default_collector() -> String {
    "simple".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            username: "postgres".to_string(),
            password: String::new(),
            database: "openeyes".to_string(),
            max_connections: 8,
        }
    }
}

impl fmt::Display for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "postgres://{}:***@{}:{}/{}",
            self.username, self.host, self.port, self.database
        )
    }
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Config = serde_yaml::from_str(yaml)?;
        config.drop_invalid_sources();
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&yaml)
    }

    /// Load `path`, or log why not and continue with an empty configuration.
    pub fn load_or_default(path: Option<&str>) -> Self {
        let Some(path) = path else {
            warn!("No config file given; nothing to collect");
            return Config::default();
        };
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                error!(%path, error = %e, "Failed to load config; continuing with no sources");
                Config::default()
            }
        }
    }

    fn drop_invalid_sources(&mut self) {
        self.sources.retain(|s| {
            if s.interval == 0 {
                let e = ConfigError::ZeroInterval {
                    source_id: s.source.clone(),
                };
                error!(error = %e, "Dropping source");
                false
            } else {
                true
            }
        });
    }

    pub fn log_summary(&self, config_path: Option<&str>) {
        info!(config = ?config_path, mode = ?self.mode, dedup = ?self.dedup, "Configuration");
        for source in &self.sources {
            info!(%source, "Collection target");
        }
        match &self.storage {
            Some(storage) => info!(%storage, "Store config"),
            None => info!("Store config: not configured"),
        }
        match &self.llm {
            Some(llm) => info!(
                article_template = %llm.article_template,
                landing_template = %llm.landing_template,
                timeout_secs = llm.timeout_secs,
                "LLM extraction enabled"
            ),
            None => info!("LLM extraction disabled; using DOM heuristics"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const FULL: &str = r#"
mode: test
dedup: url_or_title
pipeline:
  max_attempts: 2
  max_urls: 20
renderer:
  kind: browserless
  base_url: http://localhost:3000
  token: secret
llm:
  timeout_secs: 60
sources:
  - source: nytimes_cn
    type: 时政
    url: https://cn.nytimes.com/
    interval: 2
    collector: llm
  - source: netease
    type: 财经
    url: https://money.163.com/
storage:
  host: db
  password: hunter2
"#;

    #[test]
    fn test_parse_full_config() {
        let config = Config::from_yaml(FULL).unwrap();
        assert_eq!(config.mode, Mode::Test);
        assert_eq!(config.dedup, DedupPolicy::UrlOrTitle);
        assert_eq!(config.pipeline.max_attempts, 2);
        assert_eq!(config.pipeline.content_limit, 10_000);
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.sources[0].collector, "llm");
        assert_eq!(config.sources[1].collector, "simple");
        assert_eq!(config.sources[1].interval, 1);
        assert_eq!(config.llm.as_ref().unwrap().timeout_secs, 60);
        assert_eq!(config.llm.as_ref().unwrap().article_template, "article_extractor");
        assert!(matches!(config.renderer, RendererConfig::Browserless { .. }));
        let storage = config.storage.unwrap();
        assert_eq!(storage.port, 5432);
        assert!(!storage.to_string().contains("hunter2"));
    }

    #[test]
    fn test_defaults_for_empty_document() {
        let config = Config::from_yaml("{}").unwrap();
        assert_eq!(config.mode, Mode::Simple);
        assert_eq!(config.dedup, DedupPolicy::Url);
        assert!(config.sources.is_empty());
        assert!(config.llm.is_none());
        assert!(matches!(config.renderer, RendererConfig::Http { timeout_secs: 30, .. }));
    }

    #[test]
    fn test_url_cap_by_mode() {
        let settings = PipelineSettings::default();
        assert_eq!(settings.url_cap(Mode::Simple), 50);
        assert_eq!(settings.url_cap(Mode::Test), TEST_MODE_URL_CAP);
    }

    #[test]
    fn test_schedule_by_day_of_year() {
        let source = SourceConfig {
            source: "s".to_string(),
            kind: "t".to_string(),
            url: "https://example.com".to_string(),
            interval: 2,
            collector: "simple".to_string(),
        };
        assert!(source.is_scheduled(10));
        assert!(!source.is_scheduled(11));
    }

    #[test]
    fn test_zero_interval_source_dropped() {
        let yaml = "sources:\n  - {source: a, type: t, url: 'https://a.com', interval: 0}\n";
        let config = Config::from_yaml(yaml).unwrap();
        assert!(config.sources.is_empty());
    }

    #[test]
    fn test_missing_file_degrades_to_empty() {
        let config = Config::load_or_default(Some("/definitely/not/here.yaml"));
        assert!(config.sources.is_empty());
        assert!(Config::load_or_default(None).sources.is_empty());
    }

    #[test]
    fn test_broken_yaml_degrades_to_empty() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "sources: [unterminated").unwrap();
        let path = file.path().to_str().unwrap().to_string();
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse(_))));
        assert!(Config::load_or_default(Some(&path)).sources.is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FULL.as_bytes()).unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.sources[0].source, "nytimes_cn");
    }
}
