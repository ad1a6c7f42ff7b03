//! Database models using sqlmodel derive macros
//!
//! These models map directly to `SQLite` tables. All datetime fields use
//! `i64` (microseconds since Unix epoch) for sqlmodel compatibility; JSON
//! sub-documents (`settings`, `metadata`, `payload`, tags, aliases) are
//! stored as TEXT and only documented keys are read.

use serde::{Deserialize, Serialize};
use sqlmodel::Model;

use crate::timestamps::now_micros;

// =============================================================================
// Tenant
// =============================================================================

/// Root of every ownership chain; all queries are scoped by tenant id.
#[derive(Model, Debug, Clone, Serialize, Deserialize)]
#[sqlmodel(table = "tenants")]
pub struct TenantRow {
    #[sqlmodel(primary_key, auto_increment)]
    pub id: Option<i64>,

    #[sqlmodel(unique)]
    pub name: String,

    /// Opaque JSON settings document
    #[sqlmodel(default = "'{}'")]
    pub settings: String,

    pub created_at: i64,
}

impl Default for TenantRow {
    fn default() -> Self {
        Self {
            id: None,
            name: String::new(),
            settings: "{}".to_string(),
            created_at: now_micros(),
        }
    }
}

impl TenantRow {
    #[must_use]
    pub fn new(name: String) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }
}

// =============================================================================
// Product
// =============================================================================

/// A product owned by a tenant.
#[derive(Model, Debug, Clone, Serialize, Deserialize)]
#[sqlmodel(table = "products")]
pub struct ProductRow {
    #[sqlmodel(primary_key, auto_increment)]
    pub id: Option<i64>,

    pub tenant_id: i64,
    pub name: String,

    #[sqlmodel(nullable)]
    pub model_year: Option<i64>,

    /// Opaque JSON metadata document
    #[sqlmodel(default = "'{}'")]
    pub metadata: String,

    pub created_at: i64,
}

impl Default for ProductRow {
    fn default() -> Self {
        Self {
            id: None,
            tenant_id: 0,
            name: String::new(),
            model_year: None,
            metadata: "{}".to_string(),
            created_at: now_micros(),
        }
    }
}

impl ProductRow {
    #[must_use]
    pub fn new(tenant_id: i64, name: String, model_year: Option<i64>) -> Self {
        Self {
            tenant_id,
            name,
            model_year,
            ..Self::default()
        }
    }
}

// =============================================================================
// CampaignVariant
// =============================================================================

/// A locale/trim/market-scoped version of a product's marketing content.
///
/// # Invariants
/// - `version` is monotonic per `(tenant, product, locale, trim, market)`.
/// - At most one `published` row per tuple has `effective_through = NULL`.
#[derive(Model, Debug, Clone, Serialize, Deserialize)]
#[sqlmodel(table = "campaign_variants")]
pub struct CampaignVariantRow {
    #[sqlmodel(primary_key, auto_increment)]
    pub id: Option<i64>,

    pub tenant_id: i64,
    pub product_id: i64,
    pub locale: String,

    #[sqlmodel(default = "''")]
    pub trim: String,

    #[sqlmodel(default = "''")]
    pub market: String,

    /// "draft" | "published" | "archived"
    #[sqlmodel(default = "'draft'")]
    pub status: String,

    #[sqlmodel(default = "1")]
    pub version: i64,

    #[sqlmodel(nullable)]
    pub effective_from: Option<i64>,

    #[sqlmodel(nullable)]
    pub effective_through: Option<i64>,

    #[sqlmodel(default = "1")]
    pub is_draft: i64, // SQLite doesn't have bool, use 0/1

    #[sqlmodel(nullable)]
    pub last_published_by: Option<String>,

    pub created_at: i64,
}

impl Default for CampaignVariantRow {
    fn default() -> Self {
        Self {
            id: None,
            tenant_id: 0,
            product_id: 0,
            locale: String::new(),
            trim: String::new(),
            market: String::new(),
            status: "draft".to_string(),
            version: 1,
            effective_from: None,
            effective_through: None,
            is_draft: 1,
            last_published_by: None,
            created_at: now_micros(),
        }
    }
}

impl CampaignVariantRow {
    #[must_use]
    pub const fn is_draft_bool(&self) -> bool {
        self.is_draft != 0
    }

    /// The scope tuple identity, used for publish-uniqueness checks.
    #[must_use]
    pub fn scope_key(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}",
            self.tenant_id, self.product_id, self.locale, self.trim, self.market
        )
    }
}

// =============================================================================
// SpecCategory / SpecItem
// =============================================================================

/// Canonical spec category (e.g. "Engine", "Dimensions").
#[derive(Model, Debug, Clone, Serialize, Deserialize)]
#[sqlmodel(table = "spec_categories")]
pub struct SpecCategoryRow {
    #[sqlmodel(primary_key, auto_increment)]
    pub id: Option<i64>,

    #[sqlmodel(unique)]
    pub name: String,
}

impl Default for SpecCategoryRow {
    fn default() -> Self {
        Self {
            id: None,
            name: String::new(),
        }
    }
}

/// A canonical spec item within a category, created on demand during
/// ingest. Brochure section labels map onto this hierarchy via `aliases`.
#[derive(Model, Debug, Clone, Serialize, Deserialize)]
#[sqlmodel(table = "spec_items")]
pub struct SpecItemRow {
    #[sqlmodel(primary_key, auto_increment)]
    pub id: Option<i64>,

    pub category_id: i64,
    pub display_name: String,

    #[sqlmodel(nullable)]
    pub unit: Option<String>,

    /// "text" | "numeric" | "enum"
    #[sqlmodel(default = "'text'")]
    pub data_type: String,

    /// JSON array of alias strings
    #[sqlmodel(default = "'[]'")]
    pub aliases: String,
}

impl Default for SpecItemRow {
    fn default() -> Self {
        Self {
            id: None,
            category_id: 0,
            display_name: String::new(),
            unit: None,
            data_type: "text".to_string(),
            aliases: "[]".to_string(),
        }
    }
}

// =============================================================================
// SpecValue
// =============================================================================

/// A typed, provenance-tagged fact about a product for a given campaign.
///
/// # Invariants
/// - Exactly one of `value_numeric` / `value_text` is non-null.
/// - `explanation` ≤ 200 chars, one terminal punctuation mark, no line
///   breaks; a null explanation implies `explanation_failed = 1`.
#[derive(Model, Debug, Clone, Serialize, Deserialize)]
#[sqlmodel(table = "spec_values")]
pub struct SpecValueRow {
    #[sqlmodel(primary_key, auto_increment)]
    pub id: Option<i64>,

    pub tenant_id: i64,
    pub product_id: i64,
    pub campaign_variant_id: i64,
    pub spec_item_id: i64,

    #[sqlmodel(nullable)]
    pub value_numeric: Option<f64>,

    #[sqlmodel(nullable)]
    pub value_text: Option<String>,

    #[sqlmodel(nullable)]
    pub unit: Option<String>,

    #[sqlmodel(default = "1.0")]
    pub confidence: f64,

    /// "active" | "superseded" | "conflict"
    #[sqlmodel(default = "'active'")]
    pub status: String,

    #[sqlmodel(nullable)]
    pub source_doc_id: Option<String>,

    #[sqlmodel(nullable)]
    pub source_page: Option<i64>,

    #[sqlmodel(nullable)]
    pub key_features: Option<String>,

    #[sqlmodel(nullable)]
    pub variant_availability: Option<String>,

    #[sqlmodel(nullable)]
    pub explanation: Option<String>,

    #[sqlmodel(default = "0")]
    pub explanation_failed: i64,

    #[sqlmodel(default = "1")]
    pub version: i64,

    #[sqlmodel(nullable)]
    pub effective_from: Option<i64>,

    #[sqlmodel(nullable)]
    pub effective_through: Option<i64>,

    pub created_at: i64,
}

impl Default for SpecValueRow {
    fn default() -> Self {
        Self {
            id: None,
            tenant_id: 0,
            product_id: 0,
            campaign_variant_id: 0,
            spec_item_id: 0,
            value_numeric: None,
            value_text: None,
            unit: None,
            confidence: 1.0,
            status: "active".to_string(),
            source_doc_id: None,
            source_page: None,
            key_features: None,
            variant_availability: None,
            explanation: None,
            explanation_failed: 0,
            version: 1,
            effective_from: None,
            effective_through: None,
            created_at: now_micros(),
        }
    }
}

impl SpecValueRow {
    /// The displayable value: numeric formatted without trailing zeros, or
    /// the text value.
    #[must_use]
    pub fn display_value(&self) -> String {
        if let Some(n) = self.value_numeric {
            if (n - n.trunc()).abs() < f64::EPSILON {
                format!("{}", n as i64)
            } else {
                format!("{n}")
            }
        } else {
            self.value_text.clone().unwrap_or_default()
        }
    }

    #[must_use]
    pub const fn explanation_failed_bool(&self) -> bool {
        self.explanation_failed != 0
    }
}

// =============================================================================
// FeatureBlock
// =============================================================================

/// A feature/highlight block extracted from brochure prose.
#[derive(Model, Debug, Clone, Serialize, Deserialize)]
#[sqlmodel(table = "feature_blocks")]
pub struct FeatureBlockRow {
    #[sqlmodel(primary_key, auto_increment)]
    pub id: Option<i64>,

    pub tenant_id: i64,
    pub product_id: i64,
    pub campaign_variant_id: i64,
    pub body: String,

    /// JSON array of tag strings
    #[sqlmodel(default = "'[]'")]
    pub tags: String,

    /// JSON array of f32, when embedded
    #[sqlmodel(nullable)]
    pub embedding: Option<String>,

    #[sqlmodel(nullable)]
    pub embedding_version: Option<String>,

    pub created_at: i64,
}

impl Default for FeatureBlockRow {
    fn default() -> Self {
        Self {
            id: None,
            tenant_id: 0,
            product_id: 0,
            campaign_variant_id: 0,
            body: String::new(),
            tags: "[]".to_string(),
            embedding: None,
            embedding_version: None,
            created_at: now_micros(),
        }
    }
}

// =============================================================================
// KnowledgeChunk
// =============================================================================

/// An embeddable text unit derived from rows, features, USPs, or
/// paragraphs.
///
/// Chunks are deduplicated across documents by `(tenant_id, content_hash)`;
/// on collision the existing chunk is reused and `metadata.parsed_spec_ids`
/// is appended.
#[derive(Model, Debug, Clone, Serialize, Deserialize)]
#[sqlmodel(table = "knowledge_chunks")]
pub struct KnowledgeChunkRow {
    #[sqlmodel(primary_key, auto_increment)]
    pub id: Option<i64>,

    pub tenant_id: i64,
    pub product_id: i64,

    #[sqlmodel(nullable)]
    pub campaign_variant_id: Option<i64>,

    /// See `ChunkType`
    pub chunk_type: String,

    pub text: String,

    /// Opaque JSON metadata; documented keys: `parsed_spec_ids`,
    /// `category`, `spec_name`, `page`.
    #[sqlmodel(default = "'{}'")]
    pub metadata: String,

    /// SHA-256 of the canonicalized text
    pub content_hash: String,

    /// JSON array of f32, when embedded
    #[sqlmodel(nullable)]
    pub embedding_vector: Option<String>,

    #[sqlmodel(nullable)]
    pub embedding_model: Option<String>,

    #[sqlmodel(nullable)]
    pub embedding_version: Option<String>,

    #[sqlmodel(nullable)]
    pub source_doc_id: Option<String>,

    #[sqlmodel(nullable)]
    pub source_page: Option<i64>,

    /// "private" | "public_benchmark"
    #[sqlmodel(default = "'private'")]
    pub visibility: String,

    /// "complete" | "incomplete" | "retry_needed"
    #[sqlmodel(default = "'complete'")]
    pub completion_status: String,

    pub created_at: i64,
}

impl Default for KnowledgeChunkRow {
    fn default() -> Self {
        Self {
            id: None,
            tenant_id: 0,
            product_id: 0,
            campaign_variant_id: None,
            chunk_type: "paragraph".to_string(),
            text: String::new(),
            metadata: "{}".to_string(),
            content_hash: String::new(),
            embedding_vector: None,
            embedding_model: None,
            embedding_version: None,
            source_doc_id: None,
            source_page: None,
            visibility: "private".to_string(),
            completion_status: "complete".to_string(),
            created_at: now_micros(),
        }
    }
}

impl KnowledgeChunkRow {
    /// Decode the stored embedding, if any.
    #[must_use]
    pub fn embedding(&self) -> Option<Vec<f32>> {
        self.embedding_vector
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok())
    }

    /// Encode and attach an embedding plus its model/version tags.
    pub fn set_embedding(&mut self, vector: &[f32], model: &str, version: &str) {
        self.embedding_vector = serde_json::to_string(vector).ok();
        self.embedding_model = Some(model.to_string());
        self.embedding_version = Some(version.to_string());
    }
}

// =============================================================================
// DocumentSource
// =============================================================================

/// The raw brochure document an ingestion consumed, with its byte hash.
/// Drift checks recompute the hash and alert on divergence.
#[derive(Model, Debug, Clone, Serialize, Deserialize)]
#[sqlmodel(table = "document_sources")]
pub struct DocumentSourceRow {
    #[sqlmodel(primary_key)]
    pub id: String,

    pub tenant_id: i64,
    pub campaign_variant_id: i64,
    pub uri: String,
    pub sha256: String,
    pub ingested_at: i64,
}

impl Default for DocumentSourceRow {
    fn default() -> Self {
        Self {
            id: String::new(),
            tenant_id: 0,
            campaign_variant_id: 0,
            uri: String::new(),
            sha256: String::new(),
            ingested_at: now_micros(),
        }
    }
}

// =============================================================================
// LineageEvent
// =============================================================================

/// An immutable record of a mutation or significant read. Append-only.
#[derive(Model, Debug, Clone, Serialize, Deserialize)]
#[sqlmodel(table = "lineage_events")]
pub struct LineageEventRow {
    #[sqlmodel(primary_key, auto_increment)]
    pub id: Option<i64>,

    pub tenant_id: i64,

    #[sqlmodel(nullable)]
    pub product_id: Option<i64>,

    #[sqlmodel(nullable)]
    pub campaign_variant_id: Option<i64>,

    /// e.g. "spec_value" | "feature_block" | "knowledge_chunk" |
    /// "ingestion_job" | "retrieval_request" | "comparison"
    pub resource_type: String,

    pub resource_id: i64,

    #[sqlmodel(nullable)]
    pub document_source_id: Option<String>,

    #[sqlmodel(nullable)]
    pub ingestion_job_id: Option<i64>,

    /// See `LineageAction`
    pub action: String,

    /// Opaque JSON payload
    #[sqlmodel(default = "'{}'")]
    pub payload: String,

    #[sqlmodel(nullable)]
    pub operator: Option<String>,

    pub occurred_at: i64,
}

impl Default for LineageEventRow {
    fn default() -> Self {
        Self {
            id: None,
            tenant_id: 0,
            product_id: None,
            campaign_variant_id: None,
            resource_type: String::new(),
            resource_id: 0,
            document_source_id: None,
            ingestion_job_id: None,
            action: "created".to_string(),
            payload: "{}".to_string(),
            operator: None,
            occurred_at: now_micros(),
        }
    }
}

// =============================================================================
// DriftAlert
// =============================================================================

/// A drift finding: stale content, hash divergence, mixed embedding
/// versions, or a value conflict.
#[derive(Model, Debug, Clone, Serialize, Deserialize)]
#[sqlmodel(table = "drift_alerts")]
pub struct DriftAlertRow {
    #[sqlmodel(primary_key, auto_increment)]
    pub id: Option<i64>,

    pub tenant_id: i64,

    #[sqlmodel(nullable)]
    pub product_id: Option<i64>,

    #[sqlmodel(nullable)]
    pub campaign_variant_id: Option<i64>,

    /// See `AlertType`
    pub alert_type: String,

    /// Opaque JSON details
    #[sqlmodel(default = "'{}'")]
    pub details: String,

    /// "open" | "acknowledged" | "resolved"
    #[sqlmodel(default = "'open'")]
    pub status: String,

    pub detected_at: i64,

    #[sqlmodel(nullable)]
    pub resolved_at: Option<i64>,
}

impl Default for DriftAlertRow {
    fn default() -> Self {
        Self {
            id: None,
            tenant_id: 0,
            product_id: None,
            campaign_variant_id: None,
            alert_type: String::new(),
            details: "{}".to_string(),
            status: "open".to_string(),
            detected_at: now_micros(),
            resolved_at: None,
        }
    }
}

// =============================================================================
// ComparisonRow
// =============================================================================

/// One pre-computed comparison dimension for a product pair.
///
/// `pair_key` is the canonical ordered pair `"{min_id}:{max_id}"`.
#[derive(Model, Debug, Clone, Serialize, Deserialize)]
#[sqlmodel(table = "comparison_rows")]
pub struct ComparisonRowRecord {
    #[sqlmodel(primary_key, auto_increment)]
    pub id: Option<i64>,

    pub tenant_id: i64,
    pub pair_key: String,
    pub primary_product_id: i64,
    pub secondary_product_id: i64,
    pub dimension: String,
    pub primary_value: String,
    pub secondary_value: String,

    /// "better" | "worse" | "equal" | "not_comparable"
    pub verdict: String,

    #[sqlmodel(default = "''")]
    pub narrative: String,

    /// "public" | "restricted"
    #[sqlmodel(default = "'restricted'")]
    pub shareability: String,

    pub created_at: i64,
}

impl Default for ComparisonRowRecord {
    fn default() -> Self {
        Self {
            id: None,
            tenant_id: 0,
            pair_key: String::new(),
            primary_product_id: 0,
            secondary_product_id: 0,
            dimension: String::new(),
            primary_value: String::new(),
            secondary_value: String::new(),
            verdict: "not_comparable".to_string(),
            narrative: String::new(),
            shareability: "restricted".to_string(),
            created_at: now_micros(),
        }
    }
}

/// Canonical pair key for two product ids, ordered `min:max`.
#[must_use]
pub fn comparison_pair_key(a: i64, b: i64) -> String {
    format!("{}:{}", a.min(b), a.max(b))
}

// =============================================================================
// ReembedJob
// =============================================================================

/// A queued re-embedding job produced by the embedding guard when a
/// resource's vector version lags the target version.
#[derive(Model, Debug, Clone, Serialize, Deserialize)]
#[sqlmodel(table = "reembed_jobs")]
pub struct ReembedJobRow {
    #[sqlmodel(primary_key, auto_increment)]
    pub id: Option<i64>,

    pub tenant_id: i64,

    /// "knowledge_chunk" | "feature_block"
    pub resource_type: String,

    pub resource_id: i64,
    pub current_version: String,
    pub target_version: String,

    /// "pending" | "running" | "done" | "failed"
    #[sqlmodel(default = "'pending'")]
    pub status: String,

    pub created_at: i64,
}

impl Default for ReembedJobRow {
    fn default() -> Self {
        Self {
            id: None,
            tenant_id: 0,
            resource_type: String::new(),
            resource_id: 0,
            current_version: String::new(),
            target_version: String::new(),
            status: "pending".to_string(),
            created_at: now_micros(),
        }
    }
}

// =============================================================================
// IngestionJob
// =============================================================================

/// Tracks one ingestion run for 202-status reporting and lineage.
#[derive(Model, Debug, Clone, Serialize, Deserialize)]
#[sqlmodel(table = "ingestion_jobs")]
pub struct IngestionJobRow {
    #[sqlmodel(primary_key, auto_increment)]
    pub id: Option<i64>,

    pub tenant_id: i64,
    pub product_id: i64,
    pub campaign_variant_id: i64,

    /// "pending" | "running" | "succeeded" | "failed"
    #[sqlmodel(default = "'pending'")]
    pub status: String,

    #[sqlmodel(nullable)]
    pub operator: Option<String>,

    pub started_at: i64,

    #[sqlmodel(nullable)]
    pub finished_at: Option<i64>,

    /// JSON object of created-entity counts
    #[sqlmodel(default = "'{}'")]
    pub counts: String,
}

impl Default for IngestionJobRow {
    fn default() -> Self {
        Self {
            id: None,
            tenant_id: 0,
            product_id: 0,
            campaign_variant_id: 0,
            status: "pending".to_string(),
            operator: None,
            started_at: now_micros(),
            finished_at: None,
            counts: "{}".to_string(),
        }
    }
}
