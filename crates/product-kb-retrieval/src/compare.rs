//! Comparison materializer.
//!
//! Serves pre-computed product-pair comparison rows from an in-memory TTL
//! cache, then an optional external cache, then the store. Absent rows
//! are an empty response, never an error; absence of the whole store tier
//! must not break retrieval.

use asupersync::{Cx, Outcome};
use product_kb_core::{Shareability, Verdict};
use product_kb_db::{ComparisonRowRecord, DbPool, audit_queries, comparison_pair_key, now_micros};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::ResponseCache;
use crate::error::RetrievalError;

/// One comparison row as surfaced to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonRow {
    pub dimension: String,
    pub primary_value: String,
    pub secondary_value: String,
    /// "better" | "worse" | "equal" | "not_comparable"
    pub verdict: String,
    pub narrative: String,
    /// "public" | "restricted"
    pub shareability: String,
}

impl From<&ComparisonRowRecord> for ComparisonRow {
    fn from(r: &ComparisonRowRecord) -> Self {
        Self {
            dimension: r.dimension.clone(),
            primary_value: r.primary_value.clone(),
            secondary_value: r.secondary_value.clone(),
            verdict: r.verdict.clone(),
            narrative: r.narrative.clone(),
            shareability: r.shareability.clone(),
        }
    }
}

/// A comparison lookup.
#[derive(Debug, Clone)]
pub struct ComparisonRequest {
    pub tenant_id: i64,
    pub primary_product_id: i64,
    pub secondary_product_id: i64,
    pub dimensions: Option<Vec<String>>,
    pub max_rows: Option<usize>,
}

/// The comparison result; empty rows when nothing is materialized.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComparisonResponse {
    pub pair_key: String,
    pub rows: Vec<ComparisonRow>,
    /// True when served from a cache tier.
    pub cache_hit: bool,
}

/// External cache tier (e.g. a shared key-value store). Optional.
pub trait ComparisonCache: Send + Sync {
    fn get(&self, tenant_id: i64, pair_key: &str) -> Option<Vec<ComparisonRow>>;
    fn put(&self, tenant_id: i64, pair_key: &str, rows: &[ComparisonRow]);
}

const DEFAULT_MAX_ROWS: usize = 50;

/// Serves and materializes comparison rows.
pub struct ComparisonMaterializer {
    pool: Option<DbPool>,
    memory: ResponseCache<Vec<ComparisonRow>>,
    external: Option<Arc<dyn ComparisonCache>>,
}

impl ComparisonMaterializer {
    /// The store tier is optional: `None` serves cache-only (and responds
    /// with empty rows on misses).
    #[must_use]
    pub fn new(pool: Option<DbPool>, ttl: Duration, capacity: usize) -> Self {
        Self {
            pool,
            memory: ResponseCache::new(ttl, capacity),
            external: None,
        }
    }

    #[must_use]
    pub fn with_external_cache(mut self, cache: Arc<dyn ComparisonCache>) -> Self {
        self.external = Some(cache);
        self
    }

    fn memory_key(tenant_id: i64, pair_key: &str) -> String {
        format!("{tenant_id}:{pair_key}")
    }

    /// Serve a comparison request: memory → external → store → empty.
    pub async fn compare(
        &self,
        cx: &Cx,
        request: &ComparisonRequest,
    ) -> Outcome<ComparisonResponse, RetrievalError> {
        let pair_key =
            comparison_pair_key(request.primary_product_id, request.secondary_product_id);
        let max_rows = request.max_rows.unwrap_or(DEFAULT_MAX_ROWS).max(1);
        let key = Self::memory_key(request.tenant_id, &pair_key);

        if let Some(rows) = self.memory.get(&key) {
            return Outcome::Ok(ComparisonResponse {
                rows: filter_rows(rows, request.dimensions.as_deref(), max_rows),
                pair_key,
                cache_hit: true,
            });
        }

        if let Some(external) = &self.external
            && let Some(rows) = external.get(request.tenant_id, &pair_key)
        {
            self.memory.put(key, rows.clone());
            return Outcome::Ok(ComparisonResponse {
                rows: filter_rows(rows, request.dimensions.as_deref(), max_rows),
                pair_key,
                cache_hit: true,
            });
        }

        let Some(pool) = &self.pool else {
            return Outcome::Ok(ComparisonResponse {
                pair_key,
                ..Default::default()
            });
        };

        let records = match audit_queries::comparison_rows_for_pair(
            cx,
            pool,
            request.tenant_id,
            &pair_key,
            None,
            usize::MAX,
        )
        .await
        {
            Outcome::Ok(rows) => rows,
            Outcome::Err(e) => return Outcome::Err(RetrievalError::Db(e)),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        let rows: Vec<ComparisonRow> = records.iter().map(ComparisonRow::from).collect();
        if !rows.is_empty() {
            self.memory.put(key.clone(), rows.clone());
            if let Some(external) = &self.external {
                external.put(request.tenant_id, &pair_key, &rows);
            }
        }

        Outcome::Ok(ComparisonResponse {
            rows: filter_rows(rows, request.dimensions.as_deref(), max_rows),
            pair_key,
            cache_hit: false,
        })
    }

    /// Persist pre-computed rows and prime the caches.
    pub async fn materialize(
        &self,
        cx: &Cx,
        tenant_id: i64,
        primary_product_id: i64,
        secondary_product_id: i64,
        rows: &[ComparisonRow],
    ) -> Outcome<usize, RetrievalError> {
        let pair_key = comparison_pair_key(primary_product_id, secondary_product_id);

        if let Some(pool) = &self.pool {
            let records: Vec<ComparisonRowRecord> = rows
                .iter()
                .map(|r| ComparisonRowRecord {
                    tenant_id,
                    pair_key: pair_key.clone(),
                    primary_product_id: primary_product_id.min(secondary_product_id),
                    secondary_product_id: primary_product_id.max(secondary_product_id),
                    dimension: r.dimension.clone(),
                    primary_value: r.primary_value.clone(),
                    secondary_value: r.secondary_value.clone(),
                    // Unknown verdict/shareability strings normalize to the
                    // conservative variants rather than persisting garbage.
                    verdict: Verdict::parse(&r.verdict)
                        .unwrap_or(Verdict::NotComparable)
                        .as_str()
                        .to_string(),
                    narrative: r.narrative.clone(),
                    shareability: Shareability::parse(&r.shareability)
                        .unwrap_or_default()
                        .as_str()
                        .to_string(),
                    created_at: now_micros(),
                    ..Default::default()
                })
                .collect();
            match audit_queries::upsert_comparison_rows(cx, pool, &records).await {
                Outcome::Ok(_) => {}
                Outcome::Err(e) => return Outcome::Err(RetrievalError::Db(e)),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }

        self.memory
            .put(Self::memory_key(tenant_id, &pair_key), rows.to_vec());
        if let Some(external) = &self.external {
            external.put(tenant_id, &pair_key, rows);
        }
        Outcome::Ok(rows.len())
    }
}

impl std::fmt::Debug for ComparisonMaterializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComparisonMaterializer")
            .field("has_store", &self.pool.is_some())
            .field("has_external_cache", &self.external.is_some())
            .finish_non_exhaustive()
    }
}

fn filter_rows(
    rows: Vec<ComparisonRow>,
    dimensions: Option<&[String]>,
    max_rows: usize,
) -> Vec<ComparisonRow> {
    let mut rows = rows;
    if let Some(dims) = dimensions
        && !dims.is_empty()
    {
        rows.retain(|r| dims.iter().any(|d| d.eq_ignore_ascii_case(&r.dimension)));
    }
    rows.truncate(max_rows);
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use asupersync::runtime::RuntimeBuilder;

    fn row(dimension: &str) -> ComparisonRow {
        ComparisonRow {
            dimension: dimension.to_string(),
            primary_value: "25.49 km/l".to_string(),
            secondary_value: "23.10 km/l".to_string(),
            verdict: "better".to_string(),
            narrative: String::new(),
            shareability: "restricted".to_string(),
        }
    }

    fn request(tenant_id: i64) -> ComparisonRequest {
        ComparisonRequest {
            tenant_id,
            primary_product_id: 9,
            secondary_product_id: 3,
            dimensions: None,
            max_rows: None,
        }
    }

    #[test]
    fn storeless_materializer_serves_empty() {
        let cx = Cx::for_testing();
        let rt = RuntimeBuilder::current_thread().build().unwrap();
        let materializer =
            ComparisonMaterializer::new(None, Duration::from_secs(60), 16);

        let response = rt
            .block_on(materializer.compare(&cx, &request(1)))
            .into_result()
            .unwrap();
        assert_eq!(response.pair_key, "3:9");
        assert!(response.rows.is_empty());
        assert!(!response.cache_hit);
    }

    #[test]
    fn materialize_primes_memory_cache() {
        let cx = Cx::for_testing();
        let rt = RuntimeBuilder::current_thread().build().unwrap();
        let materializer =
            ComparisonMaterializer::new(None, Duration::from_secs(60), 16);

        rt.block_on(materializer.materialize(&cx, 1, 9, 3, &[row("mileage"), row("power")]))
            .into_result()
            .unwrap();

        let response = rt
            .block_on(materializer.compare(&cx, &request(1)))
            .into_result()
            .unwrap();
        assert_eq!(response.rows.len(), 2);
        assert!(response.cache_hit);
    }

    #[test]
    fn tenants_do_not_share_cache_entries() {
        let cx = Cx::for_testing();
        let rt = RuntimeBuilder::current_thread().build().unwrap();
        let materializer =
            ComparisonMaterializer::new(None, Duration::from_secs(60), 16);

        rt.block_on(materializer.materialize(&cx, 1, 9, 3, &[row("mileage")]))
            .into_result()
            .unwrap();

        let foreign = rt
            .block_on(materializer.compare(&cx, &request(2)))
            .into_result()
            .unwrap();
        assert!(foreign.rows.is_empty());
    }

    #[test]
    fn dimension_filter_and_cap_apply() {
        let cx = Cx::for_testing();
        let rt = RuntimeBuilder::current_thread().build().unwrap();
        let materializer =
            ComparisonMaterializer::new(None, Duration::from_secs(60), 16);

        rt.block_on(materializer.materialize(&cx, 1, 9, 3, &[row("mileage"), row("power")]))
            .into_result()
            .unwrap();

        let mut req = request(1);
        req.dimensions = Some(vec!["Mileage".to_string()]);
        let response = rt
            .block_on(materializer.compare(&cx, &req))
            .into_result()
            .unwrap();
        assert_eq!(response.rows.len(), 1);
        assert_eq!(response.rows[0].dimension, "mileage");

        let mut req = request(1);
        req.max_rows = Some(1);
        let response = rt
            .block_on(materializer.compare(&cx, &req))
            .into_result()
            .unwrap();
        assert_eq!(response.rows.len(), 1);
    }
}
