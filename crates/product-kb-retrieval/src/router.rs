//! The hybrid retrieval router.
//!
//! Pipeline per request: intent classification → cache probe →
//! structured keyword lookup against the materialized spec view →
//! confidence gate → semantic fallback against the per-campaign vector
//! index → response assembly with provenance → async lineage record.
//!
//! Tenant isolation is absolute: every store and index read is filtered
//! by tenant, and any row that still comes back foreign aborts the
//! request without partial data.

use asupersync::{Cx, Outcome};
use product_kb_core::{ChunkType, Config, Intent, Visibility, first_sentence, sha256_hex};
use product_kb_db::{
    DbPool, LineageEventRow, LineageSink, SpecViewRow, audit_queries, chunk_queries, queries,
    spec_queries,
};
use product_kb_search::{Embedder, IndexManager, VectorFilter};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cache::{ResponseCache, fingerprint};
use crate::compare::{ComparisonMaterializer, ComparisonRequest, ComparisonRow};
use crate::error::RetrievalError;
use crate::intent;

/// Unwrap an `Outcome`: on non-`Ok`, return early.
macro_rules! try_out {
    ($out:expr) => {
        match $out {
            Outcome::Ok(v) => v,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }
    };
}

fn map_db<T>(out: Outcome<T, product_kb_db::DbError>) -> Outcome<T, RetrievalError> {
    match out {
        Outcome::Ok(v) => Outcome::Ok(v),
        Outcome::Err(e) => Outcome::Err(RetrievalError::Db(e)),
        Outcome::Cancelled(r) => Outcome::Cancelled(r),
        Outcome::Panicked(p) => Outcome::Panicked(p),
    }
}

/// Sanitized explanation surfaced to callers: first sentence, bounded.
const SURFACED_EXPLANATION_CHARS: usize = 160;

/// Optional filters on a retrieval request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalFilters {
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub chunk_types: Vec<ChunkType>,
}

/// A retrieval request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalRequest {
    pub tenant_id: i64,
    #[serde(default)]
    pub product_ids: Vec<i64>,
    #[serde(default)]
    pub campaign_variant_id: Option<i64>,
    pub question: String,
    #[serde(default)]
    pub intent_hint: Option<Intent>,
    #[serde(default)]
    pub filters: RetrievalFilters,
    /// 0 means "use the default"; hard-capped at 20.
    #[serde(default)]
    pub max_chunks: usize,
    #[serde(default)]
    pub include_lineage: bool,
}

/// Provenance of a structured fact.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FactSource {
    pub doc_id: Option<String>,
    pub page: Option<i64>,
    pub url: Option<String>,
}

/// One structured fact from the spec view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredFact {
    pub spec_item_id: i64,
    pub spec_value_id: i64,
    pub category: String,
    pub name: String,
    pub value: String,
    pub unit: Option<String>,
    pub confidence: f64,
    /// Keyword-match score in [0, 1].
    pub score: f64,
    pub campaign_variant_id: i64,
    pub product_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    pub source: FactSource,
}

/// One semantic chunk from the vector fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticChunk {
    pub chunk_id: i64,
    pub chunk_type: ChunkType,
    pub text: String,
    pub distance: f32,
    pub metadata: serde_json::Value,
    pub source: FactSource,
}

/// The assembled response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResponse {
    pub intent: Intent,
    pub intent_confidence: f64,
    pub latency_ms: u64,
    pub structured_facts: Vec<StructuredFact>,
    pub semantic_chunks: Vec<SemanticChunk>,
    pub comparisons: Vec<ComparisonRow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lineage: Option<Vec<LineageEventRow>>,
    /// True when served from the response cache.
    pub cache_hit: bool,
}

/// The retrieval router.
pub struct RetrievalRouter {
    pool: DbPool,
    index: Arc<IndexManager>,
    embedder: Arc<dyn Embedder>,
    lineage: Arc<dyn LineageSink>,
    comparisons: Arc<ComparisonMaterializer>,
    cache: ResponseCache<RetrievalResponse>,
    config: Config,
}

impl RetrievalRouter {
    #[must_use]
    pub fn new(
        pool: DbPool,
        index: Arc<IndexManager>,
        embedder: Arc<dyn Embedder>,
        lineage: Arc<dyn LineageSink>,
        comparisons: Arc<ComparisonMaterializer>,
        config: Config,
    ) -> Self {
        let cache = ResponseCache::new(
            Duration::from_secs(config.retrieval_cache_ttl_secs),
            config.retrieval_cache_capacity,
        );
        Self {
            pool,
            index,
            embedder,
            lineage,
            comparisons,
            cache,
            config,
        }
    }

    /// Invalidate cached responses (called after publish/rollback so
    /// reads stay linearizable with the latest publish).
    pub fn invalidate_cache(&self) {
        self.cache.clear();
    }

    /// The comparison materializer behind this router.
    #[must_use]
    pub fn comparisons(&self) -> &ComparisonMaterializer {
        &self.comparisons
    }

    /// Answer one retrieval request.
    pub async fn query(
        &self,
        cx: &Cx,
        request: &RetrievalRequest,
    ) -> Outcome<RetrievalResponse, RetrievalError> {
        let started = Instant::now();

        if request.tenant_id <= 0 {
            return Outcome::Err(RetrievalError::BadRequest(
                "tenant_id is required".to_string(),
            ));
        }
        if request.question.trim().is_empty() {
            return Outcome::Err(RetrievalError::BadRequest(
                "question must not be empty".to_string(),
            ));
        }

        // Step 1: intent.
        let classified = intent::resolve(
            &request.question,
            request.intent_hint,
            self.config.retrieval_keyword_threshold,
        );

        // Step 2: cache probe.
        let chunk_type_keys: Vec<String> = request
            .filters
            .chunk_types
            .iter()
            .map(|t| t.as_str().to_string())
            .collect();
        let cache_key = fingerprint(
            request.tenant_id,
            &request.question,
            &request.product_ids,
            request.campaign_variant_id,
            &request.filters.categories,
            &chunk_type_keys,
        );
        if let Some(mut cached) = self.cache.get(&cache_key) {
            cached.cache_hit = true;
            cached.latency_ms = elapsed_ms(started);
            return Outcome::Ok(cached);
        }

        // Pinned campaigns must belong to the requesting tenant.
        if let Some(campaign_id) = request.campaign_variant_id {
            let campaign = try_out!(map_db(
                queries::get_campaign(cx, &self.pool, request.tenant_id, campaign_id).await
            ));
            if campaign.is_none() {
                return Outcome::Err(RetrievalError::NotFound {
                    entity: "campaign",
                    identifier: campaign_id.to_string(),
                });
            }
        }

        let mut response = RetrievalResponse {
            intent: classified.intent,
            intent_confidence: classified.confidence,
            latency_ms: 0,
            structured_facts: Vec::new(),
            semantic_chunks: Vec::new(),
            comparisons: Vec::new(),
            lineage: None,
            cache_hit: false,
        };

        if classified.intent == Intent::Comparison {
            // Comparison intent bypasses spec lookup entirely.
            response.comparisons = try_out!(self.lookup_comparisons(cx, request).await);
        } else {
            // Step 3: structured lookup.
            response.structured_facts = try_out!(self.structured_lookup(cx, request).await);

            // Step 4: confidence gate.
            let top_score = response
                .structured_facts
                .first()
                .map_or(0.0, |f| f.score);
            let needs_fallback = response.structured_facts.len()
                < self.config.retrieval_min_results
                || top_score < self.config.retrieval_keyword_threshold
                || classified.intent == Intent::Unknown;

            // Step 5: semantic fallback.
            if needs_fallback {
                tracing::debug!(
                    tenant_id = request.tenant_id,
                    structured = response.structured_facts.len(),
                    top_score,
                    "keyword confidence below gate; running semantic fallback"
                );
                response.semantic_chunks = try_out!(self.semantic_fallback(cx, request).await);
            }
        }

        // Step 6: assembly extras.
        if request.include_lineage {
            response.lineage = Some(try_out!(self.fact_lineage(cx, request, &response).await));
        }

        // Step 7: async lineage record.
        self.lineage.record(LineageEventRow {
            tenant_id: request.tenant_id,
            campaign_variant_id: request.campaign_variant_id,
            resource_type: "retrieval_request".to_string(),
            resource_id: 0,
            action: "created".to_string(),
            payload: serde_json::json!({
                "question_sha256": sha256_hex(request.question.as_bytes()),
                "intent": classified.intent.as_str(),
                "structured_count": response.structured_facts.len(),
                "semantic_count": response.semantic_chunks.len(),
                "comparison_count": response.comparisons.len(),
            })
            .to_string(),
            ..Default::default()
        });

        response.latency_ms = elapsed_ms(started);
        self.cache.put(cache_key, response.clone());
        Outcome::Ok(response)
    }

    /// Step 3: keyword lookup against the materialized spec view.
    async fn structured_lookup(
        &self,
        cx: &Cx,
        request: &RetrievalRequest,
    ) -> Outcome<Vec<StructuredFact>, RetrievalError> {
        let view = try_out!(map_db(
            spec_queries::spec_view_for_products(
                cx,
                &self.pool,
                request.tenant_id,
                &request.product_ids,
                request.campaign_variant_id,
            )
            .await
        ));

        let keywords = extract_keywords(&request.question);
        if keywords.is_empty() {
            return Outcome::Ok(Vec::new());
        }

        let category_filter: Vec<String> = request
            .filters
            .categories
            .iter()
            .map(|c| c.to_lowercase())
            .collect();

        let mut scored: Vec<(f64, StructuredFact)> = Vec::new();
        for row in &view {
            if !category_filter.is_empty()
                && !category_filter
                    .iter()
                    .any(|c| row.category.to_lowercase().contains(c))
            {
                continue;
            }
            let score = score_row(row, &keywords);
            if score <= 0.0 {
                continue;
            }
            scored.push((
                score,
                StructuredFact {
                    spec_item_id: row.spec_item_id,
                    spec_value_id: row.spec_value_id,
                    category: row.category.clone(),
                    name: row.name.clone(),
                    value: row.display_value(),
                    unit: row.unit.clone(),
                    confidence: row.confidence,
                    score,
                    campaign_variant_id: row.campaign_variant_id,
                    product_id: row.product_id,
                    explanation: row
                        .explanation
                        .as_deref()
                        .map(|e| first_sentence(e, SURFACED_EXPLANATION_CHARS)),
                    source: FactSource {
                        doc_id: row.source_doc_id.clone(),
                        page: row.source_page,
                        url: None,
                    },
                },
            ));
        }

        // Descending score; ties by confidence, then spec_item_id (stable
        // across runs).
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    b.1.confidence
                        .partial_cmp(&a.1.confidence)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.1.spec_item_id.cmp(&b.1.spec_item_id))
        });

        Outcome::Ok(scored.into_iter().map(|(_, fact)| fact).collect())
    }

    /// Step 5: embed the question and query the campaign partitions.
    async fn semantic_fallback(
        &self,
        cx: &Cx,
        request: &RetrievalRequest,
    ) -> Outcome<Vec<SemanticChunk>, RetrievalError> {
        let campaign_ids = match request.campaign_variant_id {
            Some(id) => vec![id],
            None => try_out!(map_db(
                queries::published_campaign_ids_for_products(
                    cx,
                    &self.pool,
                    request.tenant_id,
                    &request.product_ids,
                )
                .await
            )),
        };
        if campaign_ids.is_empty() {
            return Outcome::Ok(Vec::new());
        }

        // Guard: a campaign already holding mixed embedding versions in
        // the store fails before any vector math.
        for &campaign_id in &campaign_ids {
            let versions = try_out!(map_db(
                chunk_queries::distinct_embedding_versions(
                    cx,
                    &self.pool,
                    request.tenant_id,
                    campaign_id,
                )
                .await
            ));
            if versions.len() > 1 {
                tracing::warn!(
                    tenant_id = request.tenant_id,
                    campaign_id,
                    ?versions,
                    "refusing query over mixed embedding versions"
                );
                return Outcome::Err(RetrievalError::MixedVersions(versions));
            }
        }

        let embedded = match self.embedder.embed_single(cx, &request.question).await {
            Ok(e) => e,
            Err(e) => return Outcome::Err(RetrievalError::from(e)),
        };

        let k = if request.max_chunks == 0 {
            self.config.retrieval_default_chunks
        } else {
            request.max_chunks
        }
        .min(self.config.retrieval_max_chunks);

        let mut filter = VectorFilter::new()
            .with_tenant(request.tenant_id)
            .with_visibilities(vec![Visibility::Private, Visibility::PublicBenchmark])
            .with_embedding_version(embedded.version.clone());
        if !request.product_ids.is_empty() {
            filter = filter.with_products(request.product_ids.clone());
        }
        if !request.filters.chunk_types.is_empty() {
            filter = filter.with_chunk_types(request.filters.chunk_types.clone());
        }

        let hits = match self
            .index
            .search_campaigns(&campaign_ids, &embedded.vector, k, &filter)
        {
            Ok(hits) => hits,
            Err(e) => return Outcome::Err(RetrievalError::from(e)),
        };

        // Tenant isolation is a hard invariant: a foreign row in the hit
        // set aborts the request.
        for hit in &hits {
            if hit.tenant_id != request.tenant_id {
                return Outcome::Err(RetrievalError::TenantMismatch {
                    requested: request.tenant_id,
                    found: hit.tenant_id,
                });
            }
        }

        let chunk_ids: Vec<i64> = hits.iter().map(|h| h.chunk_id).collect();
        let rows = try_out!(map_db(
            chunk_queries::chunks_by_ids(cx, &self.pool, request.tenant_id, &chunk_ids).await
        ));

        let chunks = hits
            .iter()
            .zip(rows)
            .map(|(hit, row)| SemanticChunk {
                chunk_id: hit.chunk_id,
                chunk_type: hit.chunk_type,
                text: row.text,
                distance: hit.distance,
                metadata: hit.metadata.clone(),
                source: FactSource {
                    doc_id: row.source_doc_id,
                    page: row.source_page,
                    url: None,
                },
            })
            .collect();

        Outcome::Ok(chunks)
    }

    /// Comparison intent: serve materialized rows for the product pair.
    async fn lookup_comparisons(
        &self,
        cx: &Cx,
        request: &RetrievalRequest,
    ) -> Outcome<Vec<ComparisonRow>, RetrievalError> {
        if request.product_ids.len() < 2 {
            return Outcome::Ok(Vec::new());
        }
        let comparison = try_out!(
            self.comparisons
                .compare(
                    cx,
                    &ComparisonRequest {
                        tenant_id: request.tenant_id,
                        primary_product_id: request.product_ids[0],
                        secondary_product_id: request.product_ids[1],
                        dimensions: None,
                        max_rows: None,
                    },
                )
                .await
        );
        Outcome::Ok(comparison.rows)
    }

    /// Lineage trail of the returned facts, when requested.
    async fn fact_lineage(
        &self,
        cx: &Cx,
        request: &RetrievalRequest,
        response: &RetrievalResponse,
    ) -> Outcome<Vec<LineageEventRow>, RetrievalError> {
        let mut events = Vec::new();
        for fact in &response.structured_facts {
            let trail = try_out!(map_db(
                audit_queries::lineage_for_resource(
                    cx,
                    &self.pool,
                    request.tenant_id,
                    "spec_value",
                    fact.spec_value_id,
                )
                .await
            ));
            events.extend(trail);
        }
        Outcome::Ok(events)
    }
}

impl std::fmt::Debug for RetrievalRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalRouter")
            .field("pool", &self.pool)
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis().min(u128::from(u64::MAX))).unwrap_or(u64::MAX)
}

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "can", "do", "does", "for", "from", "has", "have", "how", "in", "is",
    "it", "its", "of", "on", "or", "tell", "the", "their", "this", "to", "was", "what",
    "whats", "when", "where", "which", "who", "why", "will", "with", "you",
];

/// Lowercased question tokens minus stopwords.
#[must_use]
pub fn extract_keywords(question: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    question
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 2 && !STOPWORDS.contains(t))
        .filter(|t| seen.insert((*t).to_string()))
        .map(String::from)
        .collect()
}

/// Composite keyword score for one spec-view row.
///
/// Name matches dominate category matches dominate value matches; the
/// result is the per-keyword average, clamped to [0, 1].
fn score_row(row: &SpecViewRow, keywords: &[String]) -> f64 {
    if keywords.is_empty() {
        return 0.0;
    }
    let name = row.name.to_lowercase();
    let category = row.category.to_lowercase();
    let value = row
        .value_text
        .as_deref()
        .map(str::to_lowercase)
        .unwrap_or_default();

    let mut total = 0.0;
    for kw in keywords {
        if name.contains(kw.as_str()) {
            total += 1.0;
        } else if category.contains(kw.as_str()) {
            total += 0.6;
        } else if !value.is_empty() && value.contains(kw.as_str()) {
            total += 0.3;
        }
    }
    (total / keywords.len() as f64).min(1.0)
}
