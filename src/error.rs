//! Error types for the ingestion and answer pipelines.
//!
//! Every failure that crosses a pipeline boundary is a [`RagError`]. External
//! failures carry the [`Stage`] that produced them so callers can tell an
//! embedding timeout from an index outage without parsing messages.
//!
//! Application edges (CLI, config loading, migrations) use `anyhow` instead;
//! `RagError` converts into `anyhow::Error` through `std::error::Error`.

use std::fmt;

use thiserror::Error;

/// The pipeline step an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Chunk,
    Embed,
    Upsert,
    Query,
    Complete,
    Store,
    Extract,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Chunk => "chunk",
            Stage::Embed => "embed",
            Stage::Upsert => "upsert",
            Stage::Query => "query",
            Stage::Complete => "complete",
            Stage::Store => "store",
            Stage::Extract => "extract",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced by the RAG core.
#[derive(Debug, Error)]
pub enum RagError {
    /// Invalid settings (e.g. chunk overlap not smaller than chunk size).
    /// Never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Timeout, rate limit, connection failure or 5xx from an external
    /// service. Retried by [`crate::retry`]; surfaced once attempts run out.
    #[error("{stage} failed (transient): {message}")]
    Transient { stage: Stage, message: String },

    /// A non-retryable failure reported by an external service, or a
    /// response that does not have the expected shape.
    #[error("{stage} failed: {message}")]
    Upstream { stage: Stage, message: String },

    /// Caller-supplied input was rejected before any external call.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Upload with a file type the extractor does not handle.
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),

    /// The file was recognised but its text could not be extracted.
    #[error("text extraction failed: {0}")]
    Extraction(String),

    /// Relational store failure.
    #[error("store error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl RagError {
    pub fn transient(stage: Stage, message: impl Into<String>) -> Self {
        RagError::Transient {
            stage,
            message: message.into(),
        }
    }

    pub fn upstream(stage: Stage, message: impl Into<String>) -> Self {
        RagError::Upstream {
            stage,
            message: message.into(),
        }
    }

    /// Whether a retry with backoff may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, RagError::Transient { .. })
    }

    /// The pipeline stage this error belongs to, when there is one.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            RagError::Transient { stage, .. } | RagError::Upstream { stage, .. } => Some(*stage),
            RagError::Configuration(_) => Some(Stage::Chunk),
            RagError::Storage(_) => Some(Stage::Store),
            RagError::Extraction(_) | RagError::UnsupportedFormat(_) => Some(Stage::Extract),
            RagError::InvalidInput(_) => None,
        }
    }
}

/// Convenience alias used across the pipeline modules.
pub type Result<T> = std::result::Result<T, RagError>;

/// Classify a `reqwest` transport error for the given stage.
///
/// Timeouts and connection failures are transient; anything else (bad URL,
/// body decoding) is reported as an upstream failure.
pub(crate) fn from_reqwest(stage: Stage, err: reqwest::Error) -> RagError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RagError::transient(stage, err.to_string())
    } else {
        RagError::upstream(stage, err.to_string())
    }
}

/// Classify a non-success HTTP status: 429 and 5xx are transient, other
/// client errors are not.
pub(crate) fn from_status(
    stage: Stage,
    service: &str,
    status: reqwest::StatusCode,
    body: &str,
) -> RagError {
    let message = format!("{} API error {}: {}", service, status, body);
    if status.as_u16() == 429 || status.is_server_error() {
        RagError::transient(stage, message)
    } else {
        RagError::upstream(stage, message)
    }
}
