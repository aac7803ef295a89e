//! Error types for mind map generation.
//!
//! Provider failures during labeling ([`LlmError`]) are absorbed by the label
//! generator's retry/fallback policy and never reach the caller. Embedding,
//! clustering and assembly failures abort the whole run.

use thiserror::Error;

/// Main error type for a mind map run.
#[derive(Error, Debug)]
pub enum Error {
    /// Caller supplied something unusable (bad language tag, limits out of range)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Text could not be pulled out of an uploaded file
    #[error("extraction error: {0}")]
    Extraction(String),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbedError),

    #[error("clustering error: {0}")]
    Clustering(#[from] ClusterError),

    #[error("assembly error: {0}")]
    Assembly(#[from] AssemblyError),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// True when the request itself was at fault (maps to HTTP 400).
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::InvalidInput(_) | Error::Extraction(_))
    }
}

/// Embedding provider errors.
#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("model loading failed: {0}")]
    ModelLoad(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("timed out after {0}s")]
    Timeout(u64),

    #[error("expected {expected} vectors, got {got}")]
    CountMismatch { expected: usize, got: usize },

    #[error("vector {index} has dimension {found}, expected {expected}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        found: usize,
    },

    #[error("vector {0} is empty or contains non-finite values")]
    InvalidVector(usize),

    #[error("cancelled before completion")]
    Cancelled,
}

/// Language model provider errors.
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("{0} API key not set")]
    MissingApiKey(&'static str),

    #[error("HTTP request failed: {0}")]
    Request(String),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("failed to parse response: {0}")]
    Parse(String),

    #[error("empty response")]
    EmptyResponse,

    #[error("timed out after {0}s")]
    Timeout(u64),
}

/// Clustering engine errors.
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("no vectors to cluster")]
    EmptyInput,

    #[error("vector {index} has dimension {found}, expected {expected}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        found: usize,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("clustering task failed: {0}")]
    Aborted(String),
}

/// Contract violations detected while turning clusters into nodes.
#[derive(Error, Debug)]
pub enum AssemblyError {
    #[error("partition violated: {0}")]
    PartitionViolation(String),

    #[error("cluster at depth {0} has no segments")]
    EmptyCluster(usize),

    #[error("expected {expected} labels, got {got}")]
    LabelCountMismatch { expected: usize, got: usize },
}

/// Result type alias for mind map operations.
pub type Result<T> = std::result::Result<T, Error>;
