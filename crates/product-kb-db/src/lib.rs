//! Versioned fact store for the Product Knowledge Engine
//!
//! This crate provides:
//! - `SQLite` database operations via the `sqlmodel` stack
//! - Connection pooling
//! - Schema migrations
//! - Tenant-scoped queries for every entity the engine persists
//!
//! # Timestamp Convention
//!
//! All timestamps are stored as `i64` (microseconds since Unix epoch).
//! Helper functions convert to/from `chrono::NaiveDateTime`.

#![forbid(unsafe_code)]

pub mod audit_queries;
pub mod chunk_queries;
pub mod error;
pub mod lineage_sink;
pub mod models;
pub mod pool;
pub mod queries;
pub mod schema;
pub mod spec_queries;
pub mod timestamps;

pub use error::{DbError, DbResult, is_lock_error};
pub use lineage_sink::LineageSink;
pub use models::*;
pub use pool::{DbConn, DbPool, DbPoolConfig, create_pool};
pub use spec_queries::SpecViewRow;
pub use timestamps::{
    MICROS_PER_DAY, micros_to_iso, micros_to_naive, naive_to_micros, now_micros,
};

// Re-export sqlmodel for convenience
pub use sqlmodel;
pub use sqlmodel_sqlite;
