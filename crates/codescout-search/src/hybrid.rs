//! Hybrid Search
//!
//! Runs the dense (vector) and sparse (BM25) backends in parallel and fuses
//! their rankings. Two fusion modes:
//!
//! - **Weighted**: per-list min-max normalization (an all-equal list
//!   normalizes to 1.0), then `w_v * v̂ + w_b * b̂`.
//! - **Reciprocal Rank Fusion**: `score(d) = Σ 1/(k + rank_i(d))` with
//!   1-based ranks and k = 60.
//!
//! A document present in only one list contributes 0 for the missing
//! component. Query embeddings go through a bounded LRU cache so repeated
//! queries skip the embedder.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use codescout_core::{Bm25Index, CodeBlock, PointPayload, SegmentId};

use crate::embed::ValidatedEmbedder;
use crate::error::Result;
use crate::vector::VectorStore;

// ============================================================================
// Fusion
// ============================================================================

/// How vector and BM25 rankings are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FusionMode {
    /// Min-max normalized weighted sum
    #[default]
    Weighted,
    /// Reciprocal rank fusion
    ReciprocalRank,
}

/// Fusion tuning.
#[derive(Debug, Clone, Copy)]
pub struct FusionConfig {
    pub mode: FusionMode,
    /// Weight of the normalized vector score
    pub vector_weight: f32,
    /// Weight of the normalized BM25 score
    pub bm25_weight: f32,
    /// RRF constant
    pub rrf_k: f32,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            mode: FusionMode::Weighted,
            vector_weight: 0.7,
            bm25_weight: 0.3,
            rrf_k: 60.0,
        }
    }
}

/// Min-max normalize scores into [0, 1]; an all-equal list maps to 1.0.
pub fn min_max_normalize(scores: &[f32]) -> Vec<f32> {
    let Some(&first) = scores.first() else {
        return Vec::new();
    };
    let (min, max) = scores.iter().fold((first, first), |(lo, hi), &s| {
        (lo.min(s), hi.max(s))
    });
    let range = max - min;
    scores
        .iter()
        .map(|&s| if range <= f32::EPSILON { 1.0 } else { (s - min) / range })
        .collect()
}

/// Weighted fusion of two scored lists.
pub fn fuse_weighted(
    vector: &[(SegmentId, f32)],
    bm25: &[(SegmentId, f32)],
    vector_weight: f32,
    bm25_weight: f32,
) -> Vec<(SegmentId, f32)> {
    let vector_norm = min_max_normalize(&vector.iter().map(|(_, s)| *s).collect::<Vec<_>>());
    let bm25_norm = min_max_normalize(&bm25.iter().map(|(_, s)| *s).collect::<Vec<_>>());

    let mut fused: HashMap<SegmentId, f32> = HashMap::new();
    for ((id, _), norm) in vector.iter().zip(vector_norm) {
        *fused.entry(id.clone()).or_insert(0.0) += vector_weight * norm;
    }
    for ((id, _), norm) in bm25.iter().zip(bm25_norm) {
        *fused.entry(id.clone()).or_insert(0.0) += bm25_weight * norm;
    }

    sort_fused(fused)
}

/// Reciprocal rank fusion of two ranked lists (ranks are 1-based).
pub fn fuse_rrf(
    vector: &[(SegmentId, f32)],
    bm25: &[(SegmentId, f32)],
    k: f32,
) -> Vec<(SegmentId, f32)> {
    let mut fused: HashMap<SegmentId, f32> = HashMap::new();
    for (rank, (id, _)) in vector.iter().enumerate() {
        *fused.entry(id.clone()).or_insert(0.0) += 1.0 / (k + rank as f32 + 1.0);
    }
    for (rank, (id, _)) in bm25.iter().enumerate() {
        *fused.entry(id.clone()).or_insert(0.0) += 1.0 / (k + rank as f32 + 1.0);
    }

    sort_fused(fused)
}

fn sort_fused(fused: HashMap<SegmentId, f32>) -> Vec<(SegmentId, f32)> {
    let mut result: Vec<(SegmentId, f32)> = fused.into_iter().collect();
    result.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    result
}

// ============================================================================
// Hybrid service
// ============================================================================

/// One fused search result.
#[derive(Debug, Clone)]
pub struct HybridHit {
    pub segment_id: SegmentId,
    /// Fused score
    pub score: f32,
    /// Block metadata, when either backend could supply it
    pub payload: Option<PointPayload>,
}

/// Response of a hybrid search.
#[derive(Debug, Default)]
pub struct HybridResponse {
    pub hits: Vec<HybridHit>,
    /// Set when the vector backend failed and results are BM25-only
    pub vector_error: Option<String>,
}

/// Entries kept in the query-embedding LRU cache.
const QUERY_CACHE_SIZE: usize = 128;

/// Parallel vector + BM25 search with rank fusion.
pub struct HybridSearchService {
    embedder: Arc<ValidatedEmbedder>,
    vector_store: Arc<dyn VectorStore>,
    bm25: Arc<Bm25Index>,
    config: FusionConfig,
    /// Segment id → payload, for results the vector backend did not return
    payloads: RwLock<HashMap<SegmentId, PointPayload>>,
    query_cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl HybridSearchService {
    /// Create a service with default fusion configuration.
    pub fn new(
        embedder: Arc<ValidatedEmbedder>,
        vector_store: Arc<dyn VectorStore>,
        bm25: Arc<Bm25Index>,
    ) -> Self {
        Self::with_config(embedder, vector_store, bm25, FusionConfig::default())
    }

    /// Create a service with explicit fusion configuration.
    pub fn with_config(
        embedder: Arc<ValidatedEmbedder>,
        vector_store: Arc<dyn VectorStore>,
        bm25: Arc<Bm25Index>,
        config: FusionConfig,
    ) -> Self {
        Self {
            embedder,
            vector_store,
            bm25,
            config,
            payloads: RwLock::new(HashMap::new()),
            query_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(QUERY_CACHE_SIZE).expect("cache size is non-zero"),
            )),
        }
    }

    /// The active fusion configuration.
    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Record block metadata so BM25-only hits can carry payloads.
    pub fn register_blocks(&self, blocks: &[CodeBlock]) {
        let mut payloads = self.payloads.write();
        for block in blocks {
            payloads.insert(block.segment_id.clone(), PointPayload::from_block(block));
        }
    }

    /// Drop metadata for a file's blocks.
    pub fn remove_file(&self, file_path: &str) {
        self.payloads.write().retain(|_, p| p.file_path != file_path);
    }

    /// Drop all recorded metadata.
    pub fn clear(&self) {
        self.payloads.write().clear();
        self.query_cache.lock().clear();
    }

    async fn query_embedding(&self, query: &str) -> Result<Vec<f32>> {
        if let Some(cached) = self.query_cache.lock().get(query) {
            return Ok(cached.clone());
        }
        let embedding = self.embedder.embed_one(query).await?;
        self.query_cache.lock().put(query.to_string(), embedding.clone());
        Ok(embedding)
    }

    /// Run the hybrid search.
    ///
    /// Each backend fetches up to `2 * limit` candidates; the fused top
    /// `limit` are returned. `weights` overrides the configured
    /// vector/BM25 weights (used by the orchestrator after renormalizing
    /// analyzer weights). A vector-side failure degrades to BM25-only and
    /// is reported in [`HybridResponse::vector_error`].
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        min_score: f32,
        directory_prefix: Option<&str>,
        weights: Option<(f32, f32)>,
    ) -> Result<HybridResponse> {
        let pool = limit.max(1) * 2;

        let (vector_result, bm25_hits) = tokio::join!(
            self.vector_candidates(query, pool, min_score, directory_prefix),
            async { self.bm25.search(query, pool) },
        );

        let (vector_hits, vector_error) = match vector_result {
            Ok(hits) => (hits, None),
            Err(e) => {
                warn!("Vector search failed, continuing with BM25 only: {}", e);
                (Vec::new(), Some(e.to_string()))
            }
        };

        debug!(
            "Hybrid candidates: {} vector, {} bm25",
            vector_hits.len(),
            bm25_hits.len()
        );

        // Payload sources: vector payloads win, the catalog fills the rest
        let mut payload_by_id: HashMap<SegmentId, PointPayload> = HashMap::new();
        let vector_scored: Vec<(SegmentId, f32)> = vector_hits
            .into_iter()
            .map(|hit| {
                payload_by_id.insert(hit.segment_id.clone(), hit.payload);
                (hit.segment_id, hit.score)
            })
            .collect();

        let (vector_weight, bm25_weight) = weights.unwrap_or((
            self.config.vector_weight,
            self.config.bm25_weight,
        ));

        let fused = match self.config.mode {
            FusionMode::Weighted => {
                fuse_weighted(&vector_scored, &bm25_hits, vector_weight, bm25_weight)
            }
            FusionMode::ReciprocalRank => fuse_rrf(&vector_scored, &bm25_hits, self.config.rrf_k),
        };

        let catalog = self.payloads.read();
        let hits = fused
            .into_iter()
            .take(limit)
            .map(|(segment_id, score)| {
                let payload = payload_by_id
                    .remove(&segment_id)
                    .or_else(|| catalog.get(&segment_id).cloned());
                HybridHit {
                    segment_id,
                    score,
                    payload,
                }
            })
            .collect();

        Ok(HybridResponse { hits, vector_error })
    }

    async fn vector_candidates(
        &self,
        query: &str,
        pool: usize,
        min_score: f32,
        directory_prefix: Option<&str>,
    ) -> Result<Vec<crate::vector::VectorHit>> {
        let embedding = self.query_embedding(query).await?;
        self.vector_store
            .search(embedding, directory_prefix, min_score, pool)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::HashEmbedder;
    use crate::vector::MemoryVectorStore;
    use codescout_core::BlockType;

    fn id(s: &str) -> SegmentId {
        SegmentId(s.to_string())
    }

    #[test]
    fn test_min_max_normalize() {
        assert_eq!(min_max_normalize(&[1.0, 0.5]), vec![1.0, 0.0]);
        // All-equal lists normalize to 1.0
        assert_eq!(min_max_normalize(&[3.0, 3.0]), vec![1.0, 1.0]);
        assert!(min_max_normalize(&[]).is_empty());
    }

    #[test]
    fn test_weighted_fusion_matches_formula() {
        // Vector: a=1.0, b=0.5; BM25: b=10, c=5; weights 0.7/0.3
        let vector = vec![(id("a"), 1.0), (id("b"), 0.5)];
        let bm25 = vec![(id("b"), 10.0), (id("c"), 5.0)];
        let fused = fuse_weighted(&vector, &bm25, 0.7, 0.3);

        let scores: HashMap<&str, f32> = fused.iter().map(|(i, s)| (i.as_str(), *s)).collect();
        assert!((scores["a"] - 0.7).abs() < 1e-6);
        assert!((scores["b"] - 0.3).abs() < 1e-6);
        assert!((scores["c"] - 0.0).abs() < 1e-6);
        // Top-2 is [a, b]
        assert_eq!(fused[0].0.as_str(), "a");
        assert_eq!(fused[1].0.as_str(), "b");
    }

    #[test]
    fn test_rrf_fusion_matches_formula() {
        // Vector ranks: a=1, b=2; BM25 ranks: b=1, c=2; k=60
        let vector = vec![(id("a"), 0.9), (id("b"), 0.8)];
        let bm25 = vec![(id("b"), 12.0), (id("c"), 7.0)];
        let fused = fuse_rrf(&vector, &bm25, 60.0);

        let scores: HashMap<&str, f32> = fused.iter().map(|(i, s)| (i.as_str(), *s)).collect();
        assert!((scores["a"] - 1.0 / 61.0).abs() < 1e-6);
        assert!((scores["b"] - (1.0 / 62.0 + 1.0 / 61.0)).abs() < 1e-6);
        assert!((scores["c"] - 1.0 / 62.0).abs() < 1e-6);
        // Ordered: b, a, c
        let order: Vec<&str> = fused.iter().map(|(i, _)| i.as_str()).collect();
        assert_eq!(order, vec!["b", "a", "c"]);
    }

    fn block(name: &str, path: &str, content: &str) -> CodeBlock {
        let mut b = CodeBlock::new(path, format!("fh-{name}"), 1, 5, content, BlockType::Function);
        b.identifier = Some(name.to_string());
        b
    }

    async fn service_with_corpus() -> (HybridSearchService, Vec<CodeBlock>) {
        let embedder = Arc::new(ValidatedEmbedder::new(Arc::new(HashEmbedder::new(64))));
        let store = Arc::new(MemoryVectorStore::new(64));
        let bm25 = Arc::new(Bm25Index::new());

        let blocks = vec![
            block("getUser", "src/user.rs", "fn get_user fetch user account by id"),
            block("openConn", "src/db.rs", "fn open_connection database pool setup"),
        ];

        let mut points = Vec::new();
        for b in &blocks {
            bm25.add(b);
            let embedding = embedder.embed_one(&b.content).await.unwrap();
            points.push(codescout_core::Point {
                segment_id: b.segment_id.clone(),
                embedding,
                payload: codescout_core::PointPayload::from_block(b),
            });
        }
        store.upsert(points).await.unwrap();

        let service = HybridSearchService::new(embedder, store, bm25);
        service.register_blocks(&blocks);
        (service, blocks)
    }

    #[tokio::test]
    async fn test_end_to_end_hybrid_search() {
        let (service, blocks) = service_with_corpus().await;
        let response = service.search("fetch user account", 5, 0.0, None, None).await.unwrap();
        assert!(response.vector_error.is_none());
        assert!(!response.hits.is_empty());
        assert_eq!(response.hits[0].segment_id, blocks[0].segment_id);
        // Results in the union of both candidate sets carry payloads
        assert!(response.hits.iter().all(|h| h.payload.is_some()));
        // Scores are non-increasing
        for pair in response.hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn test_vector_failure_degrades_to_bm25() {
        let embedder = Arc::new(ValidatedEmbedder::new(Arc::new(HashEmbedder::new(64))));
        // Store with a different dimension: every vector search fails
        let store = Arc::new(MemoryVectorStore::new(32));
        let bm25 = Arc::new(Bm25Index::new());
        let b = block("getUser", "src/user.rs", "fn get_user fetch user by id");
        bm25.add(&b);

        let service = HybridSearchService::new(embedder, store, bm25);
        service.register_blocks(std::slice::from_ref(&b));

        let response = service.search("get_user", 5, 0.0, None, None).await.unwrap();
        assert!(response.vector_error.is_some());
        assert_eq!(response.hits.len(), 1);
        assert!(response.hits[0].payload.is_some());
    }

    #[tokio::test]
    async fn test_limit_respected() {
        let (service, _) = service_with_corpus().await;
        let response = service.search("fn", 1, 0.0, None, None).await.unwrap();
        assert!(response.hits.len() <= 1);
    }

    #[tokio::test]
    async fn test_remove_file_drops_payloads() {
        let (service, _) = service_with_corpus().await;
        service.remove_file("src/user.rs");
        // BM25 still has the doc (engine removes it separately); the payload is gone
        let payloads = service.payloads.read();
        assert!(payloads.values().all(|p| p.file_path != "src/user.rs"));
    }
}
