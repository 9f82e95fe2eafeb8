//! Error types for each collaborator seam.
//!
//! Per-URL errors ([`FetchError`]) are absorbed by the pipeline; per-source
//! errors ([`PipelineError`]) drive the retry loop; [`StoreError`] is either
//! failed open (dedup lookups) or fails a whole batch (inserts).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("source `{source_id}` uses unknown collector `{tag}` (known: {known})")]
    UnknownCollector {
        source_id: String,
        tag: String,
        known: String,
    },

    #[error("source `{source_id}` has interval 0")]
    ZeroInterval { source_id: String },
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("network error: {0}")]
    Network(String),

    #[error("renderer returned status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("tab pool closed")]
    PoolClosed,
}

impl From<reqwest::Error> for RenderError {
    fn from(err: reqwest::Error) -> Self {
        RenderError::Network(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("extractor call failed: {0}")]
    Call(String),

    #[error("extractor timed out after {0}s")]
    Timeout(u64),

    #[error("extractor setup failed: {0}")]
    Setup(String),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error("extracted payload does not match schema: {0}")]
    Schema(String),

    #[error("no content found")]
    Empty,

    #[error("fetch panicked: {0}")]
    Panicked(String),
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error("invalid landing url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("landing payload does not match schema: {0}")]
    Schema(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("all {0} candidate fetches failed")]
    FetchExhausted(usize),

    #[error("unit panicked: {0}")]
    Panicked(String),
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid duration `{0}`, expected <N>d or <N>w")]
    InvalidDuration(String),

    #[error("invalid date `{value}`, expected YYYY-MM-DD: {source}")]
    InvalidDate {
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("a time window is required: --duration, or --start with --end")]
    MissingWindow,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("cannot write output: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot serialize records: {0}")]
    Json(#[from] serde_json::Error),
}
