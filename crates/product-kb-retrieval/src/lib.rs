//! Hybrid retrieval for the Product Knowledge Engine.
//!
//! Structured-first: questions are classified, answered from the
//! materialized spec view when keyword confidence is high, and fall back
//! to per-campaign vector search otherwise. Comparison questions serve
//! pre-materialized product-pair rows.

#![forbid(unsafe_code)]

pub mod cache;
pub mod compare;
pub mod error;
pub mod intent;
pub mod router;

pub use cache::{ResponseCache, fingerprint};
pub use compare::{
    ComparisonCache, ComparisonMaterializer, ComparisonRequest, ComparisonResponse, ComparisonRow,
};
pub use error::RetrievalError;
pub use intent::{Classified, classify};
pub use router::{
    FactSource, RetrievalFilters, RetrievalRequest, RetrievalResponse, RetrievalRouter,
    SemanticChunk, StructuredFact, extract_keywords,
};
