//! Ingestion error types

use product_kb_db::DbError;
use product_kb_parser::ParseError;
use thiserror::Error;

/// Errors from the ingestion pipeline and publisher.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("{entity} not found: {identifier}")]
    NotFound {
        entity: &'static str,
        identifier: String,
    },

    #[error("internal ingestion error: {0}")]
    Internal(String),
}

impl IngestError {
    /// The stable error code string for this error.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Db(e) => e.error_code(),
            Self::Parse(_) => "BAD_REQUEST",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
