//! Brochure Markdown parser for the Product Knowledge Engine.
//!
//! Turns a Markdown brochure (with YAML front-matter) into spec-value
//! candidates, row chunks, feature blocks, USPs, and paragraph chunks.
//! Parsing is pure: no I/O, deterministic output ordering.

#![forbid(unsafe_code)]

pub mod availability;
pub mod chunker;
pub mod error;
pub mod frontmatter;
pub mod parser;
pub mod types;

pub use availability::{AvailabilityReading, parse_availability};
pub use error::{ParseError, ParseResult};
pub use parser::parse;
pub use types::{
    BrochureMeta, FeatureEntry, ParagraphChunk, ParsedBrochure, RowChunk, SpecCandidate, UspEntry,
    spec_fact_text,
};
