//! Response cache keyed by request fingerprint.
//!
//! The fingerprint hashes the tenant, canonicalized question, product
//! set, pinned campaign, and filters. Entries expire after a TTL and the
//! map evicts oldest-first at capacity.

use indexmap::IndexMap;
use product_kb_core::canonicalize;
use sha2::{Digest, Sha256};
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Compute the cache fingerprint for a request.
#[must_use]
pub fn fingerprint(
    tenant_id: i64,
    question: &str,
    product_ids: &[i64],
    campaign_id: Option<i64>,
    categories: &[String],
    chunk_types: &[String],
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tenant_id.to_le_bytes());
    hasher.update(canonicalize(question).as_bytes());
    let mut sorted_products = product_ids.to_vec();
    sorted_products.sort_unstable();
    for id in sorted_products {
        hasher.update(id.to_le_bytes());
    }
    hasher.update(campaign_id.unwrap_or(-1).to_le_bytes());
    let mut cats = categories.to_vec();
    cats.sort();
    for c in cats {
        hasher.update(c.to_lowercase().as_bytes());
        hasher.update([0u8]);
    }
    let mut kinds = chunk_types.to_vec();
    kinds.sort();
    for k in kinds {
        hasher.update(k.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

struct Entry<T> {
    value: T,
    inserted_at: Instant,
}

/// A TTL + capacity bounded response cache.
pub struct ResponseCache<T> {
    entries: RwLock<IndexMap<String, Entry<T>>>,
    ttl: Duration,
    capacity: usize,
}

impl<T: Clone> ResponseCache<T> {
    #[must_use]
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: RwLock::new(IndexMap::new()),
            ttl,
            capacity: capacity.max(1),
        }
    }

    /// Look up a fresh entry.
    pub fn get(&self, key: &str) -> Option<T> {
        let guard = self.entries.read().ok()?;
        let entry = guard.get(key)?;
        if entry.inserted_at.elapsed() > self.ttl {
            return None;
        }
        Some(entry.value.clone())
    }

    /// Insert, evicting expired and oldest entries as needed.
    pub fn put(&self, key: String, value: T) {
        let Ok(mut guard) = self.entries.write() else {
            return;
        };
        let ttl = self.ttl;
        guard.retain(|_, e| e.inserted_at.elapsed() <= ttl);
        while guard.len() >= self.capacity {
            guard.shift_remove_index(0);
        }
        guard.insert(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Drop everything (used after publishes to keep reads linearizable
    /// with the latest published campaign).
    pub fn clear(&self) {
        if let Ok(mut guard) = self.entries.write() {
            guard.clear();
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().map(|g| g.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_canonicalizes_question_and_products() {
        let a = fingerprint(1, "What is the mileage?", &[3, 1], None, &[], &[]);
        let b = fingerprint(1, "  what IS the mileage ", &[1, 3], None, &[], &[]);
        assert_eq!(a, b);

        let other_tenant = fingerprint(2, "What is the mileage?", &[3, 1], None, &[], &[]);
        assert_ne!(a, other_tenant);

        let pinned = fingerprint(1, "What is the mileage?", &[3, 1], Some(9), &[], &[]);
        assert_ne!(a, pinned);
    }

    #[test]
    fn cache_get_put_and_ttl() {
        let cache: ResponseCache<String> = ResponseCache::new(Duration::from_millis(40), 8);
        cache.put("k".to_string(), "v".to_string());
        assert_eq!(cache.get("k"), Some("v".to_string()));

        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn cache_evicts_oldest_at_capacity() {
        let cache: ResponseCache<i32> = ResponseCache::new(Duration::from_secs(60), 2);
        cache.put("a".to_string(), 1);
        cache.put("b".to_string(), 2);
        cache.put("c".to_string(), 3);
        assert!(cache.get("a").is_none());
        assert_eq!(cache.get("b"), Some(2));
        assert_eq!(cache.get("c"), Some(3));
    }

    #[test]
    fn clear_empties_the_cache() {
        let cache: ResponseCache<i32> = ResponseCache::new(Duration::from_secs(60), 8);
        cache.put("a".to_string(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
