//! Core types, configuration, and canonicalization for the Product Knowledge
//! Engine.
//!
//! This crate holds everything the other layers share: the domain enums
//! (chunk types, statuses, intents), the env-driven [`Config`], the text
//! canonicalization + content-hash helpers that ingestion and retrieval both
//! depend on, and the wire-level error body used by the HTTP surface.

#![forbid(unsafe_code)]

pub mod canonical;
pub mod config;
pub mod error;
pub mod types;

pub use canonical::{
    canonicalize, content_hash, estimate_tokens, first_sentence, sha256_hex, split_numeric_unit,
};
pub use config::{Config, env_value};
pub use error::{ErrorBody, codes};
pub use types::{
    AlertStatus, AlertType, CampaignStatus, ChunkType, CompletionStatus, Intent, LineageAction,
    ReembedStatus, Shareability, SpecDataType, ValueStatus, Verdict, Visibility,
};
