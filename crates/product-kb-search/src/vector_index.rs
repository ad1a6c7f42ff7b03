//! Per-campaign flat vector index with exact cosine search.
//!
//! Each campaign owns one partition holding
//! `(chunk_id, tenant_id, product_id, campaign_id, chunk_type, visibility,
//! embedding_version, vector, metadata)` tuples. Search applies metadata
//! filters first, then brute-force cosine over the surviving entries, with
//! deterministic ascending-distance ordering and `chunk_id` tie-breaks.
//!
//! A flat index is sufficient at brochure scale; ANN would buy nothing
//! under a few hundred thousand vectors per campaign.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

use crate::embedder::{dot_product, normalize_l2};
use crate::error::{SearchError, SearchResult};
use product_kb_core::{ChunkType, Visibility};

// ────────────────────────────────────────────────────────────────────
// Types
// ────────────────────────────────────────────────────────────────────

/// A scored hit from vector search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorHit {
    pub chunk_id: i64,
    pub tenant_id: i64,
    pub product_id: i64,
    pub campaign_id: i64,
    pub chunk_type: ChunkType,
    /// Cosine distance (0.0 = identical direction), lower is better.
    pub distance: f32,
    pub embedding_version: String,
    /// Opaque metadata copied from the entry.
    pub metadata: serde_json::Value,
}

/// Ordering: ascending distance, ties by `chunk_id` ascending.
impl Ord for VectorHit {
    fn cmp(&self, other: &Self) -> Ordering {
        match self
            .distance
            .partial_cmp(&other.distance)
            .unwrap_or(Ordering::Equal)
        {
            Ordering::Equal => self.chunk_id.cmp(&other.chunk_id),
            ord => ord,
        }
    }
}

impl PartialOrd for VectorHit {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Eq for VectorHit {}

impl PartialEq for VectorHit {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

/// One indexed vector plus the fields search filters on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub chunk_id: i64,
    pub tenant_id: i64,
    pub product_id: i64,
    pub campaign_id: i64,
    pub chunk_type: ChunkType,
    pub visibility: Visibility,
    pub embedding_version: String,
    /// L2-normalized embedding
    pub vector: Vec<f32>,
    /// JSON-encoded metadata. Stored as text because the partition file
    /// is bincode, which cannot round-trip self-describing JSON values.
    #[serde(default)]
    pub metadata: String,
}

impl IndexEntry {
    /// Create an entry; the vector is L2-normalized on the way in.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chunk_id: i64,
        tenant_id: i64,
        product_id: i64,
        campaign_id: i64,
        chunk_type: ChunkType,
        visibility: Visibility,
        embedding_version: impl Into<String>,
        vector: &[f32],
    ) -> Self {
        Self {
            chunk_id,
            tenant_id,
            product_id,
            campaign_id,
            chunk_type,
            visibility,
            embedding_version: embedding_version.into(),
            vector: normalize_l2(vector),
            metadata: String::new(),
        }
    }

    /// Builder: attach metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata.to_string();
        self
    }
}

/// Filter criteria applied before scoring.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VectorFilter {
    pub tenant_id: Option<i64>,
    pub product_ids: Option<Vec<i64>>,
    pub chunk_types: Option<Vec<ChunkType>>,
    /// Visibilities the caller may see.
    pub visibilities: Option<Vec<Visibility>>,
    /// Required embedding version for every candidate.
    pub embedding_version: Option<String>,
}

impl VectorFilter {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            tenant_id: None,
            product_ids: None,
            chunk_types: None,
            visibilities: None,
            embedding_version: None,
        }
    }

    #[must_use]
    pub const fn with_tenant(mut self, tenant_id: i64) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    #[must_use]
    pub fn with_products(mut self, product_ids: Vec<i64>) -> Self {
        self.product_ids = Some(product_ids);
        self
    }

    #[must_use]
    pub fn with_chunk_types(mut self, chunk_types: Vec<ChunkType>) -> Self {
        self.chunk_types = Some(chunk_types);
        self
    }

    #[must_use]
    pub fn with_visibilities(mut self, visibilities: Vec<Visibility>) -> Self {
        self.visibilities = Some(visibilities);
        self
    }

    #[must_use]
    pub fn with_embedding_version(mut self, version: impl Into<String>) -> Self {
        self.embedding_version = Some(version.into());
        self
    }

    /// Check whether an entry passes this filter. The embedding-version
    /// requirement is NOT applied here; see
    /// [`CampaignIndex::search`], which must distinguish "filtered out"
    /// from "mixed versions present".
    #[must_use]
    pub fn matches(&self, entry: &IndexEntry) -> bool {
        if let Some(tid) = self.tenant_id
            && entry.tenant_id != tid
        {
            return false;
        }
        if let Some(ref pids) = self.product_ids
            && !pids.contains(&entry.product_id)
        {
            return false;
        }
        if let Some(ref kinds) = self.chunk_types
            && !kinds.contains(&entry.chunk_type)
        {
            return false;
        }
        if let Some(ref vis) = self.visibilities
            && !vis.contains(&entry.visibility)
        {
            return false;
        }
        true
    }
}

// ────────────────────────────────────────────────────────────────────
// Campaign index
// ────────────────────────────────────────────────────────────────────

/// Flat per-campaign index. Serialized whole to `index.bin`; the chunk-id
/// map is rebuilt on load.
#[derive(Debug, Serialize, Deserialize)]
pub struct CampaignIndex {
    dimension: usize,
    entries: Vec<IndexEntry>,
    #[serde(skip)]
    chunk_index: HashMap<i64, usize>,
}

impl CampaignIndex {
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            entries: Vec::new(),
            chunk_index: HashMap::new(),
        }
    }

    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    /// Rebuild the chunk-id lookup after deserialization (the map is not
    /// persisted).
    pub fn rebuild_lookup(&mut self) {
        self.chunk_index = self
            .entries
            .iter()
            .enumerate()
            .map(|(pos, e)| (e.chunk_id, pos))
            .collect();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn contains(&self, chunk_id: i64) -> bool {
        self.chunk_index.contains_key(&chunk_id)
    }

    /// Add or update a vector.
    ///
    /// # Errors
    /// `DimensionMismatch` when the vector length is wrong.
    pub fn upsert(&mut self, entry: IndexEntry) -> SearchResult<()> {
        if entry.vector.len() != self.dimension {
            return Err(SearchError::DimensionMismatch {
                expected: self.dimension,
                got: entry.vector.len(),
            });
        }

        if let Some(&pos) = self.chunk_index.get(&entry.chunk_id) {
            self.entries[pos] = entry;
        } else {
            let pos = self.entries.len();
            self.chunk_index.insert(entry.chunk_id, pos);
            self.entries.push(entry);
        }
        Ok(())
    }

    /// Remove a vector. Returns true if it was present.
    pub fn remove(&mut self, chunk_id: i64) -> bool {
        if let Some(pos) = self.chunk_index.remove(&chunk_id) {
            self.entries.swap_remove(pos);
            if pos < self.entries.len() {
                let swapped_id = self.entries[pos].chunk_id;
                self.chunk_index.insert(swapped_id, pos);
            }
            true
        } else {
            false
        }
    }

    /// Distinct embedding versions among entries passing the filter.
    #[must_use]
    pub fn versions_in_scope(&self, filter: &VectorFilter) -> Vec<String> {
        let set: BTreeSet<&str> = self
            .entries
            .iter()
            .filter(|e| filter.matches(e))
            .map(|e| e.embedding_version.as_str())
            .collect();
        set.into_iter().map(String::from).collect()
    }

    /// Top-k nearest entries by cosine distance.
    ///
    /// Embedding-version safety: when the filtered candidate set spans
    /// more than one `embedding_version`, or the query-side version is
    /// absent from the set while others exist, the search fails with
    /// `MixedVersions` rather than returning a partial answer.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: &VectorFilter,
    ) -> SearchResult<Vec<VectorHit>> {
        if query.len() != self.dimension {
            return Err(SearchError::DimensionMismatch {
                expected: self.dimension,
                got: query.len(),
            });
        }
        if self.entries.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let versions = self.versions_in_scope(filter);
        if versions.len() > 1 {
            return Err(SearchError::MixedVersions(versions));
        }
        if let (Some(required), Some(present)) =
            (filter.embedding_version.as_deref(), versions.first())
            && required != present
        {
            return Err(SearchError::MixedVersions(vec![
                present.clone(),
                required.to_string(),
            ]));
        }

        let query_normalized = normalize_l2(query);
        let mut hits: Vec<VectorHit> = self
            .entries
            .iter()
            .filter(|e| filter.matches(e))
            .map(|e| VectorHit {
                chunk_id: e.chunk_id,
                tenant_id: e.tenant_id,
                product_id: e.product_id,
                campaign_id: e.campaign_id,
                chunk_type: e.chunk_type,
                distance: 1.0 - dot_product(&query_normalized, &e.vector),
                embedding_version: e.embedding_version.clone(),
                metadata: serde_json::from_str(&e.metadata)
                    .unwrap_or(serde_json::Value::Null),
            })
            .collect();

        hits.sort();
        hits.truncate(k);
        Ok(hits)
    }
}
