//! Parser error types

use thiserror::Error;

/// Errors from brochure parsing. Malformed rows and tables are warnings,
/// not errors; only inputs the parser cannot make sense of at all fail.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("invalid front-matter: {0}")]
    FrontMatter(String),

    #[error("empty document")]
    EmptyDocument,
}

pub type ParseResult<T> = std::result::Result<T, ParseError>;
