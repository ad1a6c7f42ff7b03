//! Error types for the database layer

use thiserror::Error;

/// Database error types
#[derive(Error, Debug)]
pub enum DbError {
    /// `SQLite` error from underlying driver
    #[error("SQLite error: {0}")]
    Sqlite(String),

    /// Connection pool error
    #[error("Pool error: {0}")]
    Pool(String),

    /// Record not found
    #[error("{entity} not found: {identifier}")]
    NotFound {
        entity: &'static str,
        identifier: String,
    },

    /// Duplicate record
    #[error("{entity} already exists: {identifier}")]
    Duplicate {
        entity: &'static str,
        identifier: String,
    },

    /// Invalid argument
    #[error("Invalid {field}: {message}")]
    InvalidArgument {
        field: &'static str,
        message: String,
    },

    /// Publish refused: the target campaign is not a draft.
    #[error("campaign {campaign_id} is not a draft (status {status})")]
    NotDraft { campaign_id: i64, status: String },

    /// Publish refused: the campaign has unresolved value conflicts.
    #[error("campaign {campaign_id} has {conflicts} unresolved conflicts")]
    ConflictExists { campaign_id: i64, conflicts: i64 },

    /// A returned row belongs to a different tenant than the request scope.
    /// Always fatal; callers must abort without partial data.
    #[error("tenant isolation violated: requested {requested}, row owned by {found}")]
    TenantMismatch { requested: i64, found: i64 },

    /// Publishing would leave more than one open published row per
    /// `(tenant, product, locale, trim, market)`.
    #[error("duplicate published campaign for tuple: {0}")]
    DuplicatePublished(String),

    /// Schema/migration error
    #[error("Schema error: {0}")]
    Schema(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for database operations
pub type DbResult<T> = std::result::Result<T, DbError>;

impl DbError {
    /// Create a not found error
    pub fn not_found(entity: &'static str, identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            identifier: identifier.into(),
        }
    }

    /// Create an invalid argument error
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field,
            message: message.into(),
        }
    }

    /// Whether this error indicates a retryable lock/busy condition.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Sqlite(msg) | Self::Pool(msg) => is_lock_error(msg),
            _ => false,
        }
    }

    /// The stable error code string for this error.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Duplicate { .. } => "DUPLICATE",
            Self::NotDraft { .. } => "NOT_DRAFT",
            Self::ConflictExists { .. } => "CONFLICT_EXISTS",
            Self::InvalidArgument { .. } => "BAD_REQUEST",
            Self::TenantMismatch { .. } => "TENANT_MISMATCH",
            Self::DuplicatePublished(_) => "DUPLICATE_PUBLISHED",
            Self::Sqlite(_) | Self::Pool(_) => "STORAGE_UNAVAILABLE",
            _ => "INTERNAL_ERROR",
        }
    }
}

/// Check whether an error message indicates a database lock/busy condition.
#[must_use]
pub fn is_lock_error(msg: &str) -> bool {
    let lower = msg.to_lowercase();
    lower.contains("database is locked")
        || lower.contains("database is busy")
        || lower.contains("locked")
        || lower.contains("unable to open database")
}

impl From<serde_json::Error> for DbError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes() {
        assert_eq!(DbError::not_found("tenant", "7").error_code(), "NOT_FOUND");
        assert_eq!(
            DbError::TenantMismatch {
                requested: 1,
                found: 2
            }
            .error_code(),
            "TENANT_MISMATCH"
        );
        assert_eq!(
            DbError::DuplicatePublished("1:2:en".into()).error_code(),
            "DUPLICATE_PUBLISHED"
        );
    }

    #[test]
    fn lock_errors_are_retryable() {
        assert!(DbError::Sqlite("database is locked".into()).is_retryable());
        assert!(!DbError::Internal("nope".into()).is_retryable());
    }
}
