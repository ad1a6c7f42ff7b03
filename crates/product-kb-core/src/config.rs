//! Configuration for the Product Knowledge Engine.
//!
//! Loaded once from environment variables at startup and passed down
//! explicitly; nothing else reads the environment at runtime.

use std::env;
use std::path::PathBuf;

/// Read a value from the environment.
#[must_use]
pub fn env_value(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env_value(key)
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env_value(key).map_or(default, |s| {
        matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
    })
}

/// Main configuration struct.
#[derive(Debug, Clone)]
pub struct Config {
    // Database
    pub database_url: String,

    // Vector index
    /// Root directory for per-campaign index files
    /// (`<index_root>/<campaign_id>/index.bin`).
    pub index_root: PathBuf,
    pub embedding_dimension: usize,

    // Embedding provider
    pub embedding_endpoint: String,
    pub embedding_api_key: Option<String>,
    pub embedding_model: String,
    pub embedding_version: String,
    /// Default batch size for embed requests. Callers may split further but
    /// never exceed [`Config::embedding_batch_cap`].
    pub embedding_batch_size: usize,
    pub embedding_batch_cap: usize,
    pub embedding_timeout_ms: u64,

    // Explanation provider
    pub llm_endpoint: String,
    pub llm_api_key: Option<String>,
    pub llm_model: String,
    pub llm_timeout_ms: u64,
    /// Deterministic stub output instead of live LLM calls (tests, offline).
    pub llm_stub: bool,

    // Retrieval
    pub retrieval_min_results: usize,
    pub retrieval_keyword_threshold: f64,
    pub retrieval_default_chunks: usize,
    pub retrieval_max_chunks: usize,
    pub retrieval_cache_ttl_secs: u64,
    pub retrieval_cache_capacity: usize,

    // Comparison cache
    pub comparison_cache_ttl_secs: u64,

    // Monitoring
    pub lineage_queue_capacity: usize,
    pub lineage_flush_batch: usize,
    pub lineage_flush_interval_ms: u64,
    pub drift_interval_secs: u64,
    /// Published campaigns older than this are flagged stale.
    pub freshness_threshold_days: i64,

    // HTTP
    pub http_host: String,
    pub http_port: u16,
    pub http_bearer_token: Option<String>,

    // Timeouts
    pub db_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite:///./product_kb.sqlite3".to_string(),
            index_root: PathBuf::from("./indices"),
            embedding_dimension: 384,
            embedding_endpoint: "http://127.0.0.1:8091/embeddings".to_string(),
            embedding_api_key: None,
            embedding_model: "text-embed-small".to_string(),
            embedding_version: "v1".to_string(),
            embedding_batch_size: 75,
            embedding_batch_cap: 100,
            embedding_timeout_ms: 30_000,
            llm_endpoint: "http://127.0.0.1:8092/v1/chat/completions".to_string(),
            llm_api_key: None,
            llm_model: "gloss-mini".to_string(),
            llm_timeout_ms: 10_000,
            llm_stub: false,
            retrieval_min_results: 3,
            retrieval_keyword_threshold: 0.8,
            retrieval_default_chunks: 8,
            retrieval_max_chunks: 20,
            retrieval_cache_ttl_secs: 60,
            retrieval_cache_capacity: 512,
            comparison_cache_ttl_secs: 300,
            lineage_queue_capacity: 1000,
            lineage_flush_batch: 100,
            lineage_flush_interval_ms: 5000,
            drift_interval_secs: 3600,
            freshness_threshold_days: 180,
            http_host: "127.0.0.1".to_string(),
            http_port: 8080,
            http_bearer_token: None,
            db_timeout_ms: 5000,
        }
    }
}

impl Config {
    /// Load configuration from the environment, falling back to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            database_url: env_value("DATABASE_URL").unwrap_or(d.database_url),
            index_root: env_value("INDEX_ROOT").map_or(d.index_root, PathBuf::from),
            embedding_dimension: env_parse("EMBEDDING_DIMENSION", d.embedding_dimension),
            embedding_endpoint: env_value("EMBEDDING_ENDPOINT").unwrap_or(d.embedding_endpoint),
            embedding_api_key: env_value("EMBEDDING_API_KEY"),
            embedding_model: env_value("EMBEDDING_MODEL").unwrap_or(d.embedding_model),
            embedding_version: env_value("EMBEDDING_VERSION").unwrap_or(d.embedding_version),
            embedding_batch_size: env_parse("EMBEDDING_BATCH_SIZE", d.embedding_batch_size)
                .clamp(1, d.embedding_batch_cap),
            embedding_batch_cap: d.embedding_batch_cap,
            embedding_timeout_ms: env_parse("EMBEDDING_TIMEOUT_MS", d.embedding_timeout_ms),
            llm_endpoint: env_value("LLM_ENDPOINT").unwrap_or(d.llm_endpoint),
            llm_api_key: env_value("LLM_API_KEY"),
            llm_model: env_value("LLM_MODEL").unwrap_or(d.llm_model),
            llm_timeout_ms: env_parse("LLM_TIMEOUT_MS", d.llm_timeout_ms),
            llm_stub: env_bool("LLM_STUB", d.llm_stub),
            retrieval_min_results: env_parse("RETRIEVAL_MIN_RESULTS", d.retrieval_min_results),
            retrieval_keyword_threshold: env_parse(
                "RETRIEVAL_KEYWORD_THRESHOLD",
                d.retrieval_keyword_threshold,
            ),
            retrieval_default_chunks: env_parse(
                "RETRIEVAL_DEFAULT_CHUNKS",
                d.retrieval_default_chunks,
            ),
            retrieval_max_chunks: d.retrieval_max_chunks,
            retrieval_cache_ttl_secs: env_parse(
                "RETRIEVAL_CACHE_TTL_SECS",
                d.retrieval_cache_ttl_secs,
            ),
            retrieval_cache_capacity: env_parse(
                "RETRIEVAL_CACHE_CAPACITY",
                d.retrieval_cache_capacity,
            ),
            comparison_cache_ttl_secs: env_parse(
                "COMPARISON_CACHE_TTL_SECS",
                d.comparison_cache_ttl_secs,
            ),
            lineage_queue_capacity: env_parse("LINEAGE_QUEUE_CAPACITY", d.lineage_queue_capacity),
            lineage_flush_batch: env_parse("LINEAGE_FLUSH_BATCH", d.lineage_flush_batch),
            lineage_flush_interval_ms: env_parse(
                "LINEAGE_FLUSH_INTERVAL_MS",
                d.lineage_flush_interval_ms,
            ),
            drift_interval_secs: env_parse("DRIFT_INTERVAL_SECS", d.drift_interval_secs),
            freshness_threshold_days: env_parse(
                "FRESHNESS_THRESHOLD_DAYS",
                d.freshness_threshold_days,
            ),
            http_host: env_value("HTTP_HOST").unwrap_or(d.http_host),
            http_port: env_parse("HTTP_PORT", d.http_port),
            http_bearer_token: env_value("HTTP_BEARER_TOKEN"),
            db_timeout_ms: env_parse("DB_TIMEOUT_MS", d.db_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = Config::default();
        assert_eq!(c.embedding_batch_size, 75);
        assert_eq!(c.embedding_batch_cap, 100);
        assert_eq!(c.retrieval_min_results, 3);
        assert!((c.retrieval_keyword_threshold - 0.8).abs() < f64::EPSILON);
        assert_eq!(c.retrieval_default_chunks, 8);
        assert_eq!(c.retrieval_max_chunks, 20);
        assert_eq!(c.lineage_queue_capacity, 1000);
        assert_eq!(c.lineage_flush_batch, 100);
        assert_eq!(c.freshness_threshold_days, 180);
        assert_eq!(c.embedding_timeout_ms, 30_000);
        assert_eq!(c.llm_timeout_ms, 10_000);
        assert_eq!(c.db_timeout_ms, 5000);
    }
}
