//! Ingestion pipeline and campaign publisher for the Product Knowledge
//! Engine.
//!
//! [`pipeline::IngestPipeline`] turns one parsed brochure into spec
//! values, deduplicated knowledge chunks, embeddings, and vector-index
//! entries, recording lineage throughout. [`publisher`] flips drafts to
//! published under the single-open-published-row invariant.

#![forbid(unsafe_code)]

pub mod error;
pub mod explain;
pub mod pipeline;
pub mod publisher;

pub use error::IngestError;
pub use explain::{
    ExplanationClient, FailingExplanationClient, HttpExplanationClient, HttpExplanationConfig,
    RowFields, StubExplanationClient, validate_explanation,
};
pub use pipeline::{IngestOutcome, IngestPipeline, IngestRequest};
pub use publisher::{publish, rollback};
