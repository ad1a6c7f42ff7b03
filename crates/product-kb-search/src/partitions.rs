//! Per-campaign partition management with disk persistence.
//!
//! Partitions live at `<root>/<campaign_id>/index.bin` and load lazily.
//! One writer at a time per partition (the partition `RwLock`), many
//! concurrent readers. Inserts persist after the in-memory update so a
//! replayed batch is idempotent by `chunk_id`.

use crate::error::{SearchError, SearchResult};
use crate::vector_index::{CampaignIndex, IndexEntry, VectorFilter, VectorHit};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

const INDEX_FILE_NAME: &str = "index.bin";

/// Manages all campaign partitions under one root directory.
pub struct IndexManager {
    root: PathBuf,
    dimension: usize,
    partitions: RwLock<HashMap<i64, Arc<RwLock<CampaignIndex>>>>,
}

impl IndexManager {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, dimension: usize) -> Self {
        Self {
            root: root.into(),
            dimension,
            partitions: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn partition_path(&self, campaign_id: i64) -> PathBuf {
        self.root.join(campaign_id.to_string()).join(INDEX_FILE_NAME)
    }

    /// Get (loading from disk if present) or create the partition.
    fn partition(&self, campaign_id: i64) -> SearchResult<Arc<RwLock<CampaignIndex>>> {
        if let Some(existing) = self
            .partitions
            .read()
            .map_err(|_| lock_poisoned())?
            .get(&campaign_id)
        {
            return Ok(Arc::clone(existing));
        }

        let mut partitions = self.partitions.write().map_err(|_| lock_poisoned())?;
        // Re-check: another writer may have loaded it while we waited.
        if let Some(existing) = partitions.get(&campaign_id) {
            return Ok(Arc::clone(existing));
        }

        let path = self.partition_path(campaign_id);
        let index = if path.exists() {
            load_index(&path, self.dimension)?
        } else {
            CampaignIndex::new(self.dimension)
        };
        let handle = Arc::new(RwLock::new(index));
        partitions.insert(campaign_id, Arc::clone(&handle));
        Ok(handle)
    }

    /// Insert a batch of entries into one campaign's partition and persist
    /// it. Entries already present (same `chunk_id`) are overwritten.
    pub fn insert_batch(&self, campaign_id: i64, entries: Vec<IndexEntry>) -> SearchResult<usize> {
        if entries.is_empty() {
            return Ok(0);
        }
        let partition = self.partition(campaign_id)?;
        let mut guard = partition.write().map_err(|_| lock_poisoned())?;
        let count = entries.len();
        for entry in entries {
            guard.upsert(entry)?;
        }
        self.persist_locked(campaign_id, &guard)?;
        Ok(count)
    }

    /// Remove one chunk's vector; persists when something was removed.
    pub fn remove(&self, campaign_id: i64, chunk_id: i64) -> SearchResult<bool> {
        let partition = self.partition(campaign_id)?;
        let mut guard = partition.write().map_err(|_| lock_poisoned())?;
        let removed = guard.remove(chunk_id);
        if removed {
            self.persist_locked(campaign_id, &guard)?;
        }
        Ok(removed)
    }

    /// Filtered k-NN over one campaign partition.
    pub fn search(
        &self,
        campaign_id: i64,
        query: &[f32],
        k: usize,
        filter: &VectorFilter,
    ) -> SearchResult<Vec<VectorHit>> {
        let partition = self.partition(campaign_id)?;
        let guard = partition.read().map_err(|_| lock_poisoned())?;
        guard.search(query, k, filter)
    }

    /// Filtered k-NN across several campaign partitions, merged into a
    /// single ascending-distance list. Mixed embedding versions across
    /// the union of campaigns fail the whole query.
    pub fn search_campaigns(
        &self,
        campaign_ids: &[i64],
        query: &[f32],
        k: usize,
        filter: &VectorFilter,
    ) -> SearchResult<Vec<VectorHit>> {
        let mut merged: Vec<VectorHit> = Vec::new();
        let mut versions: Vec<String> = Vec::new();
        for &campaign_id in campaign_ids {
            let partition = self.partition(campaign_id)?;
            let guard = partition.read().map_err(|_| lock_poisoned())?;
            for v in guard.versions_in_scope(filter) {
                if !versions.contains(&v) {
                    versions.push(v);
                }
            }
            merged.extend(guard.search(query, k, filter)?);
        }
        if versions.len() > 1 {
            return Err(SearchError::MixedVersions(versions));
        }
        merged.sort();
        merged.truncate(k);
        Ok(merged)
    }

    /// Number of vectors in a partition.
    pub fn count(&self, campaign_id: i64) -> SearchResult<usize> {
        let partition = self.partition(campaign_id)?;
        let guard = partition.read().map_err(|_| lock_poisoned())?;
        Ok(guard.len())
    }

    /// Drop a partition from memory and disk (campaign cascade delete).
    pub fn delete_partition(&self, campaign_id: i64) -> SearchResult<()> {
        self.partitions
            .write()
            .map_err(|_| lock_poisoned())?
            .remove(&campaign_id);
        let dir = self.root.join(campaign_id.to_string());
        if dir.exists() {
            std::fs::remove_dir_all(&dir)
                .map_err(|e| SearchError::Persist(format!("remove {}: {e}", dir.display())))?;
        }
        Ok(())
    }

    /// Persist a partition while its write lock is held.
    fn persist_locked(&self, campaign_id: i64, index: &CampaignIndex) -> SearchResult<()> {
        let path = self.partition_path(campaign_id);
        persist_index(&path, index)
    }
}

impl std::fmt::Debug for IndexManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexManager")
            .field("root", &self.root)
            .field("dimension", &self.dimension)
            .finish_non_exhaustive()
    }
}

fn lock_poisoned() -> SearchError {
    SearchError::Internal("partition lock poisoned".to_string())
}

fn persist_index(path: &Path, index: &CampaignIndex) -> SearchResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| SearchError::Persist(format!("create {}: {e}", parent.display())))?;
    }
    let bytes = bincode::serialize(index)
        .map_err(|e| SearchError::Persist(format!("encode index: {e}")))?;
    // Write-then-rename keeps readers off a torn file.
    let tmp = path.with_extension("bin.tmp");
    std::fs::write(&tmp, bytes)
        .map_err(|e| SearchError::Persist(format!("write {}: {e}", tmp.display())))?;
    std::fs::rename(&tmp, path)
        .map_err(|e| SearchError::Persist(format!("rename {}: {e}", path.display())))?;
    Ok(())
}

fn load_index(path: &Path, dimension: usize) -> SearchResult<CampaignIndex> {
    let bytes = std::fs::read(path)
        .map_err(|e| SearchError::Persist(format!("read {}: {e}", path.display())))?;
    let mut index: CampaignIndex = bincode::deserialize(&bytes)
        .map_err(|e| SearchError::Persist(format!("decode {}: {e}", path.display())))?;
    index.rebuild_lookup();
    if index.dimension() != dimension {
        return Err(SearchError::DimensionMismatch {
            expected: dimension,
            got: index.dimension(),
        });
    }
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_index::IndexEntry;
    use product_kb_core::{ChunkType, Visibility};

    fn entry(chunk_id: i64, campaign_id: i64, vector: &[f32]) -> IndexEntry {
        IndexEntry::new(
            chunk_id,
            1,
            10,
            campaign_id,
            ChunkType::SpecFact,
            Visibility::Private,
            "v1",
            vector,
        )
    }

    #[test]
    fn insert_search_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let manager = IndexManager::new(dir.path(), 3);

        manager
            .insert_batch(
                100,
                vec![entry(1, 100, &[1.0, 0.0, 0.0]), entry(2, 100, &[0.0, 1.0, 0.0])],
            )
            .unwrap();
        assert_eq!(manager.count(100).unwrap(), 2);

        let hits = manager
            .search(100, &[1.0, 0.0, 0.0], 5, &VectorFilter::new())
            .unwrap();
        assert_eq!(hits[0].chunk_id, 1);
    }

    #[test]
    fn partitions_persist_across_managers() {
        let dir = tempfile::tempdir().unwrap();
        {
            let manager = IndexManager::new(dir.path(), 3);
            manager
                .insert_batch(100, vec![entry(1, 100, &[1.0, 0.0, 0.0])])
                .unwrap();
        }
        assert!(dir.path().join("100").join("index.bin").exists());

        let reloaded = IndexManager::new(dir.path(), 3);
        assert_eq!(reloaded.count(100).unwrap(), 1);
        let hits = reloaded
            .search(100, &[1.0, 0.0, 0.0], 5, &VectorFilter::new())
            .unwrap();
        assert_eq!(hits[0].chunk_id, 1);
    }

    #[test]
    fn reinsert_same_chunk_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let manager = IndexManager::new(dir.path(), 3);
        manager
            .insert_batch(100, vec![entry(1, 100, &[1.0, 0.0, 0.0])])
            .unwrap();
        manager
            .insert_batch(100, vec![entry(1, 100, &[1.0, 0.0, 0.0])])
            .unwrap();
        assert_eq!(manager.count(100).unwrap(), 1);
    }

    #[test]
    fn partitions_are_isolated_per_campaign() {
        let dir = tempfile::tempdir().unwrap();
        let manager = IndexManager::new(dir.path(), 3);
        manager
            .insert_batch(100, vec![entry(1, 100, &[1.0, 0.0, 0.0])])
            .unwrap();
        manager
            .insert_batch(200, vec![entry(2, 200, &[0.0, 1.0, 0.0])])
            .unwrap();

        assert_eq!(manager.count(100).unwrap(), 1);
        assert_eq!(manager.count(200).unwrap(), 1);
        let hits = manager
            .search(100, &[0.0, 1.0, 0.0], 5, &VectorFilter::new())
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, 1);
    }

    #[test]
    fn delete_partition_removes_file_and_memory() {
        let dir = tempfile::tempdir().unwrap();
        let manager = IndexManager::new(dir.path(), 3);
        manager
            .insert_batch(100, vec![entry(1, 100, &[1.0, 0.0, 0.0])])
            .unwrap();
        assert!(dir.path().join("100").exists());

        manager.delete_partition(100).unwrap();
        assert!(!dir.path().join("100").exists());
        assert_eq!(manager.count(100).unwrap(), 0);
    }

    #[test]
    fn cross_campaign_search_merges_and_guards_versions() {
        let dir = tempfile::tempdir().unwrap();
        let manager = IndexManager::new(dir.path(), 3);
        manager
            .insert_batch(100, vec![entry(1, 100, &[1.0, 0.0, 0.0])])
            .unwrap();
        manager
            .insert_batch(200, vec![entry(2, 200, &[0.9, 0.1, 0.0])])
            .unwrap();

        let hits = manager
            .search_campaigns(&[100, 200], &[1.0, 0.0, 0.0], 5, &VectorFilter::new())
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk_id, 1);

        // A second campaign embedded with a different version poisons the
        // union.
        let mut v2 = entry(3, 300, &[0.0, 0.0, 1.0]);
        v2.embedding_version = "v2".to_string();
        manager.insert_batch(300, vec![v2]).unwrap();
        assert!(
            manager
                .search_campaigns(&[100, 300], &[1.0, 0.0, 0.0], 5, &VectorFilter::new())
                .is_err()
        );
    }

    #[test]
    fn remove_persists() {
        let dir = tempfile::tempdir().unwrap();
        {
            let manager = IndexManager::new(dir.path(), 3);
            manager
                .insert_batch(100, vec![entry(1, 100, &[1.0, 0.0, 0.0])])
                .unwrap();
            assert!(manager.remove(100, 1).unwrap());
            assert!(!manager.remove(100, 1).unwrap());
        }
        let reloaded = IndexManager::new(dir.path(), 3);
        assert_eq!(reloaded.count(100).unwrap(), 0);
    }
}
