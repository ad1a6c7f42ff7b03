//! Wire-level error representation.
//!
//! Every user-visible failure carries a short stable code, a human message,
//! and optional detail. Layer-specific error enums live in their own crates
//! and convert into this shape at the HTTP boundary.

use serde::{Deserialize, Serialize};

/// Stable error codes surfaced to callers.
pub mod codes {
    pub const BAD_REQUEST: &str = "BAD_REQUEST";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const CONFLICT_EXISTS: &str = "CONFLICT_EXISTS";
    pub const NOT_DRAFT: &str = "NOT_DRAFT";
    pub const TENANT_MISMATCH: &str = "TENANT_MISMATCH";
    pub const MIXED_VERSIONS: &str = "MIXED_VERSIONS";
    pub const DUPLICATE_PUBLISHED: &str = "DUPLICATE_PUBLISHED";
    pub const UPSTREAM_UNAVAILABLE: &str = "UPSTREAM_UNAVAILABLE";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
    pub const STORAGE_UNAVAILABLE: &str = "STORAGE_UNAVAILABLE";
}

/// JSON error body returned by the HTTP surface.
///
/// Messages identify resources by ID only; stored content never leaks into
/// error text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl ErrorBody {
    #[must_use]
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            detail: None,
        }
    }

    #[must_use]
    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }

    /// The HTTP status this code maps to.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self.code.as_str() {
            codes::BAD_REQUEST => 400,
            codes::NOT_FOUND => 404,
            codes::CONFLICT_EXISTS | codes::NOT_DRAFT => 409,
            codes::STORAGE_UNAVAILABLE | codes::UPSTREAM_UNAVAILABLE => 503,
            _ => 500,
        }
    }
}

impl std::fmt::Display for ErrorBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(ErrorBody::new(codes::BAD_REQUEST, "x").http_status(), 400);
        assert_eq!(ErrorBody::new(codes::NOT_FOUND, "x").http_status(), 404);
        assert_eq!(ErrorBody::new(codes::NOT_DRAFT, "x").http_status(), 409);
        assert_eq!(ErrorBody::new(codes::MIXED_VERSIONS, "x").http_status(), 500);
        assert_eq!(
            ErrorBody::new(codes::STORAGE_UNAVAILABLE, "x").http_status(),
            503
        );
    }

    #[test]
    fn detail_is_optional_in_json() {
        let body = ErrorBody::new(codes::NOT_FOUND, "tenant not found: 7");
        let json = serde_json::to_string(&body).unwrap();
        assert!(!json.contains("detail"));
    }
}
