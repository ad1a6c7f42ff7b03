//! Retrieval error types

use product_kb_db::DbError;
use product_kb_search::SearchError;
use thiserror::Error;

/// Errors from the retrieval router.
#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("{entity} not found: {identifier}")]
    NotFound {
        entity: &'static str,
        identifier: String,
    },

    /// The candidate set spans more than one embedding version. Fatal for
    /// the request; no partial results.
    #[error("mixed embedding versions: {0:?}")]
    MixedVersions(Vec<String>),

    /// A returned row belongs to a foreign tenant. Fatal.
    #[error("tenant isolation violated: requested {requested}, row owned by {found}")]
    TenantMismatch { requested: i64, found: i64 },

    #[error("search failure: {0}")]
    Search(String),
}

impl RetrievalError {
    /// The stable error code string for this error.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Db(e) => e.error_code(),
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::MixedVersions(_) => "MIXED_VERSIONS",
            Self::TenantMismatch { .. } => "TENANT_MISMATCH",
            Self::Search(_) => "UPSTREAM_UNAVAILABLE",
        }
    }
}

impl From<SearchError> for RetrievalError {
    fn from(e: SearchError) -> Self {
        match e {
            SearchError::MixedVersions(versions) => Self::MixedVersions(versions),
            other => Self::Search(other.to_string()),
        }
    }
}
