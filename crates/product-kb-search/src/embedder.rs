//! Embedder abstraction.
//!
//! The [`Embedder`] trait is the seam between the engine and the vector
//! provider: the HTTP implementation talks to an external embeddings API,
//! while [`HashEmbedder`] deterministically hashes text into a unit vector
//! of the configured dimension for tests and offline use.
//!
//! Every vector carries the producing model id and version tag; retrieval
//! refuses to mix versions.

use crate::error::{SearchError, SearchResult};
use asupersync::Cx;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::pin::Pin;

/// Boxed future used for object-safe async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A dense embedding vector.
pub type EmbeddingVec = Vec<f32>;

/// The result of embedding one text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedResult {
    /// L2-normalized embedding
    pub vector: EmbeddingVec,
    /// Model that produced this embedding
    pub model: String,
    /// Deterministic model+weights version tag
    pub version: String,
}

/// Text → vector provider interface.
///
/// `embed_batch` preserves input order and reports failures per item: a
/// whole-batch transport failure is the outer `Err`, a single rejected
/// text is an inner `Err` at its input position.
pub trait Embedder: Send + Sync {
    fn embed_batch<'a>(
        &'a self,
        cx: &'a Cx,
        texts: &'a [String],
    ) -> BoxFuture<'a, SearchResult<Vec<SearchResult<EmbedResult>>>>;

    fn embed_single<'a>(
        &'a self,
        cx: &'a Cx,
        text: &'a str,
    ) -> BoxFuture<'a, SearchResult<EmbedResult>>;

    /// Model identifier (e.g. "text-embed-small").
    fn model(&self) -> &str;

    /// Version tag stored alongside every vector.
    fn version(&self) -> &str;

    /// Embedding dimension.
    fn dimension(&self) -> usize;
}

/// L2-normalize a vector. Zero vectors are returned unchanged.
#[must_use]
pub fn normalize_l2(vector: &[f32]) -> Vec<f32> {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm <= f32::EPSILON {
        return vector.to_vec();
    }
    vector.iter().map(|x| x / norm).collect()
}

/// Dot product of two equal-length vectors.
#[inline]
#[must_use]
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Cosine similarity of two vectors (normalizes internally).
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    dot_product(&normalize_l2(a), &normalize_l2(b))
}

// ────────────────────────────────────────────────────────────────────
// Hash-based mock embedder
// ────────────────────────────────────────────────────────────────────

/// Deterministic mock: expands SHA-256 of the text into a unit vector of
/// the configured dimension. Identical text always maps to the identical
/// vector, which is what retrieval-determinism tests rely on.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    model: String,
    version: String,
    dimension: usize,
}

impl HashEmbedder {
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            model: "hash-embedder".to_string(),
            version: "hash-v1".to_string(),
            dimension,
        }
    }

    /// Override the advertised version tag (mixed-version tests).
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    fn embed_text(&self, text: &str) -> EmbedResult {
        // Counter-mode expansion of the content hash: each round hashes
        // `text || round`, each byte becomes one lane in [-1, 1].
        let mut raw = Vec::with_capacity(self.dimension);
        let mut round: u32 = 0;
        while raw.len() < self.dimension {
            let mut hasher = Sha256::new();
            hasher.update(text.as_bytes());
            hasher.update(round.to_le_bytes());
            for byte in hasher.finalize() {
                if raw.len() == self.dimension {
                    break;
                }
                raw.push((f32::from(byte) / 127.5) - 1.0);
            }
            round += 1;
        }
        EmbedResult {
            vector: normalize_l2(&raw),
            model: self.model.clone(),
            version: self.version.clone(),
        }
    }
}

impl Embedder for HashEmbedder {
    fn embed_batch<'a>(
        &'a self,
        _cx: &'a Cx,
        texts: &'a [String],
    ) -> BoxFuture<'a, SearchResult<Vec<SearchResult<EmbedResult>>>> {
        Box::pin(async move { Ok(texts.iter().map(|t| Ok(self.embed_text(t))).collect()) })
    }

    fn embed_single<'a>(
        &'a self,
        _cx: &'a Cx,
        text: &'a str,
    ) -> BoxFuture<'a, SearchResult<EmbedResult>> {
        Box::pin(async move { Ok(self.embed_text(text)) })
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// A failing embedder for exercising `retry_needed` paths in tests.
#[derive(Debug, Clone)]
pub struct FailingEmbedder {
    dimension: usize,
}

impl FailingEmbedder {
    #[must_use]
    pub const fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Embedder for FailingEmbedder {
    fn embed_batch<'a>(
        &'a self,
        _cx: &'a Cx,
        _texts: &'a [String],
    ) -> BoxFuture<'a, SearchResult<Vec<SearchResult<EmbedResult>>>> {
        Box::pin(async move { Err(SearchError::Http("provider unavailable".to_string())) })
    }

    fn embed_single<'a>(
        &'a self,
        _cx: &'a Cx,
        _text: &'a str,
    ) -> BoxFuture<'a, SearchResult<EmbedResult>> {
        Box::pin(async move { Err(SearchError::Http("provider unavailable".to_string())) })
    }

    fn model(&self) -> &str {
        "failing-embedder"
    }

    fn version(&self) -> &str {
        "none"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asupersync::runtime::RuntimeBuilder;

    fn block_on<F: Future>(fut: F) -> F::Output {
        RuntimeBuilder::current_thread()
            .build()
            .expect("build runtime")
            .block_on(fut)
    }

    #[test]
    fn normalize_l2_unit_norm() {
        let v = normalize_l2(&[3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn normalize_l2_zero_vector_unchanged() {
        assert_eq!(normalize_l2(&[0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn hash_embedder_is_deterministic() {
        let cx = Cx::for_testing();
        let embedder = HashEmbedder::new(64);
        let a = block_on(embedder.embed_single(&cx, "panoramic sunroof")).unwrap();
        let b = block_on(embedder.embed_single(&cx, "panoramic sunroof")).unwrap();
        assert_eq!(a.vector, b.vector);
        assert_eq!(a.version, "hash-v1");
        assert_eq!(a.vector.len(), 64);
    }

    #[test]
    fn hash_embedder_distinct_texts_differ() {
        let cx = Cx::for_testing();
        let embedder = HashEmbedder::new(64);
        let a = block_on(embedder.embed_single(&cx, "sunroof")).unwrap();
        let b = block_on(embedder.embed_single(&cx, "airbags")).unwrap();
        assert!(cosine_similarity(&a.vector, &b.vector) < 0.99);
    }

    #[test]
    fn hash_embedder_vectors_are_unit_length() {
        let cx = Cx::for_testing();
        let embedder = HashEmbedder::new(384);
        let r = block_on(embedder.embed_single(&cx, "anything at all")).unwrap();
        let norm: f32 = r.vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn batch_preserves_order() {
        let cx = Cx::for_testing();
        let embedder = HashEmbedder::new(32);
        let texts = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let batch = block_on(embedder.embed_batch(&cx, &texts)).unwrap();
        assert_eq!(batch.len(), 3);
        for (text, item) in texts.iter().zip(&batch) {
            let single = block_on(embedder.embed_single(&cx, text)).unwrap();
            assert_eq!(item.as_ref().unwrap().vector, single.vector);
        }
    }

    #[test]
    fn failing_embedder_fails() {
        let cx = Cx::for_testing();
        let embedder = FailingEmbedder::new(32);
        assert!(block_on(embedder.embed_single(&cx, "x")).is_err());
    }
}
