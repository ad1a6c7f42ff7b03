//! Error types for embedding and vector search.

use thiserror::Error;

/// Errors from embedding clients and the vector index.
#[derive(Error, Debug, Clone)]
pub enum SearchError {
    /// HTTP transport failure against the embedding provider.
    #[error("embedding transport error: {0}")]
    Http(String),

    /// Non-success status from the provider.
    #[error("embedding provider returned {status}")]
    Status { status: u16, body: String },

    /// Provider response could not be interpreted.
    #[error("malformed provider response: {0}")]
    InvalidResponse(String),

    /// The provider call exceeded its deadline.
    #[error("embedding request timed out after {0} ms")]
    Timeout(u64),

    /// Vector/query dimension mismatch.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// A result set spanned more than one embedding version.
    #[error("mixed embedding versions in candidate set: {0:?}")]
    MixedVersions(Vec<String>),

    /// Index persistence failure.
    #[error("index persistence error: {0}")]
    Persist(String),

    /// Internal error.
    #[error("internal search error: {0}")]
    Internal(String),
}

pub type SearchResult<T> = std::result::Result<T, SearchError>;

impl SearchError {
    /// Transient failures are retried with backoff; permanent ones are
    /// recorded per-item and never retried.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) | Self::Timeout(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
