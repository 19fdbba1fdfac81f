//! Embedder Port and Validation
//!
//! The engine never talks to an embedding provider directly: hosts supply an
//! implementation of [`Embedder`], and the pipeline wraps it in
//! [`ValidatedEmbedder`], which enforces the invariants downstream code
//! relies on (matching counts, declared dimension, finite components).

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SearchError};

/// Provider metadata, surfaced in status output and the diagnostic snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedderInfo {
    /// Provider name ("openai", "ollama", ...)
    pub provider: String,
    /// Model identifier
    pub model: String,
    /// Embedding dimensionality
    pub dimension: usize,
}

/// Uniform embedding interface.
///
/// Implementations must be `Send + Sync`; batches are owned so remote
/// providers can move them into request bodies.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    /// Declared embedding dimension.
    fn dimension(&self) -> usize;

    /// Provider metadata.
    fn info(&self) -> EmbedderInfo;
}

/// Wraps an embedder and validates every response.
///
/// Violations are reported as [`SearchError::CountMismatch`] /
/// [`SearchError::DimensionMismatch`] / [`SearchError::Embedding`] so the
/// state manager can categorize them as data errors rather than provider
/// outages.
pub struct ValidatedEmbedder {
    inner: Arc<dyn Embedder>,
}

impl ValidatedEmbedder {
    /// Wrap an embedder.
    pub fn new(inner: Arc<dyn Embedder>) -> Self {
        Self { inner }
    }

    /// The wrapped embedder's metadata.
    pub fn info(&self) -> EmbedderInfo {
        self.inner.info()
    }

    /// The wrapped embedder's dimension.
    pub fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    /// Embed a batch, checking every invariant on the response.
    pub async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let sent = texts.len();
        let vectors = self.inner.embed_batch(texts).await?;

        if vectors.len() != sent {
            return Err(SearchError::CountMismatch {
                sent,
                received: vectors.len(),
            });
        }

        let expected = self.inner.dimension();
        for vector in &vectors {
            if vector.len() != expected {
                return Err(SearchError::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
            if vector.iter().any(|v| !v.is_finite()) {
                return Err(SearchError::Embedding(
                    "embedding contains non-finite components".to_string(),
                ));
            }
        }

        Ok(vectors)
    }

    /// Embed a single text.
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(vec![text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| SearchError::Embedding("no embedding returned".to_string()))
    }
}

// ============================================================================
// Deterministic embedder
// ============================================================================

/// Deterministic token-hash embedder.
///
/// Maps each whitespace token into a bucket of the output vector and
/// L2-normalizes. No provider, no network: the same text always produces
/// the same vector, which is exactly what integration tests need.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    /// Create with the given dimensionality.
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn bucket(&self, token: &str) -> usize {
        // FNV-1a, cheap and stable across runs
        let mut hash: u64 = 0xcbf29ce484222325;
        for byte in token.bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
        (hash % self.dimension as u64) as usize
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut vector = vec![0.0f32; self.dimension];
                for token in text.split_whitespace() {
                    let token = token.to_lowercase();
                    vector[self.bucket(&token)] += 1.0;
                }
                let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
                if norm > 0.0 {
                    for v in &mut vector {
                        *v /= norm;
                    }
                }
                vector
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn info(&self) -> EmbedderInfo {
        EmbedderInfo {
            provider: "hash".to_string(),
            model: "token-hash".to_string(),
            dimension: self.dimension,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenEmbedder {
        vectors: Vec<Vec<f32>>,
    }

    #[async_trait]
    impl Embedder for BrokenEmbedder {
        async fn embed_batch(&self, _texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
            Ok(self.vectors.clone())
        }
        fn dimension(&self) -> usize {
            4
        }
        fn info(&self) -> EmbedderInfo {
            EmbedderInfo {
                provider: "test".into(),
                model: "broken".into(),
                dimension: 4,
            }
        }
    }

    #[tokio::test]
    async fn test_hash_embedder_deterministic() {
        let embedder = HashEmbedder::new(64);
        let a = embedder.embed_batch(vec!["user service".into()]).await.unwrap();
        let b = embedder.embed_batch(vec!["user service".into()]).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 64);
    }

    #[tokio::test]
    async fn test_hash_embedder_normalized() {
        let embedder = HashEmbedder::new(32);
        let v = embedder.embed_one_for_test("alpha beta gamma").await;
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    impl HashEmbedder {
        async fn embed_one_for_test(&self, text: &str) -> Vec<f32> {
            self.embed_batch(vec![text.to_string()])
                .await
                .unwrap()
                .pop()
                .unwrap()
        }
    }

    #[tokio::test]
    async fn test_validation_rejects_count_mismatch() {
        let embedder = ValidatedEmbedder::new(Arc::new(BrokenEmbedder {
            vectors: vec![vec![0.0; 4], vec![0.0; 4]],
        }));
        let result = embedder.embed_batch(vec!["one".into()]).await;
        assert!(matches!(result, Err(SearchError::CountMismatch { sent: 1, received: 2 })));
    }

    #[tokio::test]
    async fn test_validation_rejects_wrong_dimension() {
        let embedder = ValidatedEmbedder::new(Arc::new(BrokenEmbedder {
            vectors: vec![vec![0.0; 3]],
        }));
        let result = embedder.embed_batch(vec!["one".into()]).await;
        assert!(matches!(
            result,
            Err(SearchError::DimensionMismatch { expected: 4, actual: 3 })
        ));
    }

    #[tokio::test]
    async fn test_validation_rejects_nan() {
        let embedder = ValidatedEmbedder::new(Arc::new(BrokenEmbedder {
            vectors: vec![vec![0.0, f32::NAN, 0.0, 0.0]],
        }));
        let result = embedder.embed_batch(vec!["one".into()]).await;
        assert!(matches!(result, Err(SearchError::Embedding(_))));
    }

    #[tokio::test]
    async fn test_empty_batch_short_circuits() {
        let embedder = ValidatedEmbedder::new(Arc::new(HashEmbedder::new(8)));
        assert!(embedder.embed_batch(Vec::new()).await.unwrap().is_empty());
    }
}
