//! Error types and result alias for the ModelMux library.
//!
//! Every fallible public API returns [`Result<T>`]. Errors carry a stable
//! category rather than a raw provider-specific failure, so callers can map
//! them to transport status codes without knowing which backend was used.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelMuxError {
    /// The request failed validation before any provider was contacted.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// No provider is mapped to the requested model identifier.
    #[error("Model not supported: {0}")]
    UnsupportedModel(String),

    /// The provider rejected our credentials.
    #[error("Upstream authentication failed: {0}")]
    UpstreamAuth(String),

    /// The provider could not be reached.
    #[error("Upstream connection failed: {0}")]
    UpstreamConnection(String),

    /// The provider call exceeded its deadline.
    #[error("Upstream request timed out: {0}")]
    UpstreamTimeout(String),

    /// Any other provider-reported failure.
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// All retry attempts were consumed; carries the last underlying cause.
    #[error("Retries exhausted after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<ModelMuxError>,
    },

    /// An embedding vector did not match the configured dimension.
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A tool was unknown or its invocation failed.
    #[error("Tool error: {0}")]
    ToolExecution(String),

    /// The knowledge-retrieval collaborator failed. Never retried.
    #[error("Retrieval error: {0}")]
    Retrieval(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl ModelMuxError {
    /// Whether the orchestrator may retry after this error.
    ///
    /// Only the upstream categories are transient. Auth failures are kept
    /// retryable to match the reference behavior; they are always logged
    /// with the underlying cause before a retry is attempted.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ModelMuxError::UpstreamAuth(_)
                | ModelMuxError::UpstreamConnection(_)
                | ModelMuxError::UpstreamTimeout(_)
                | ModelMuxError::Upstream(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ModelMuxError>;
