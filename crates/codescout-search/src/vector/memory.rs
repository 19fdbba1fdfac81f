//! In-Memory Vector Store
//!
//! Brute-force cosine scan over an in-process map. Exact rather than
//! approximate; fine for tests and small offline corpora.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use codescout_core::{Point, SegmentId};

use crate::error::{Result, SearchError};

use super::{InitOutcome, VectorHit, VectorStore};

/// Vector store backed by a `HashMap`, cosine-scanned on search.
#[derive(Debug, Default)]
pub struct MemoryVectorStore {
    dimension: usize,
    points: RwLock<HashMap<SegmentId, Point>>,
    incomplete: AtomicBool,
}

impl MemoryVectorStore {
    /// Create a store for vectors of the given dimension.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            points: RwLock::new(HashMap::new()),
            incomplete: AtomicBool::new(false),
        }
    }

    /// Number of stored points.
    pub fn len(&self) -> usize {
        self.points.read().len()
    }

    /// Whether the store holds no points.
    pub fn is_empty(&self) -> bool {
        self.points.read().is_empty()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn initialize(&self) -> Result<InitOutcome> {
        let points = self.points.read();
        Ok(InitOutcome {
            had_prior_data: !points.is_empty(),
            stored_dimension: points.values().next().map(|p| p.embedding.len()),
            indexing_incomplete: self.incomplete.load(Ordering::SeqCst),
        })
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn upsert(&self, points: Vec<Point>) -> Result<()> {
        for point in &points {
            if point.embedding.len() != self.dimension {
                return Err(SearchError::DimensionMismatch {
                    expected: self.dimension,
                    actual: point.embedding.len(),
                });
            }
        }
        let mut map = self.points.write();
        for point in points {
            map.insert(point.segment_id.clone(), point);
        }
        Ok(())
    }

    async fn delete_by_file(&self, file_path: &str) -> Result<()> {
        self.points
            .write()
            .retain(|_, p| p.payload.file_path != file_path);
        Ok(())
    }

    async fn delete_by_files(&self, file_paths: &[String]) -> Result<()> {
        self.points
            .write()
            .retain(|_, p| !file_paths.iter().any(|f| *f == p.payload.file_path));
        Ok(())
    }

    async fn search(
        &self,
        vector: Vec<f32>,
        directory_prefix: Option<&str>,
        min_score: f32,
        limit: usize,
    ) -> Result<Vec<VectorHit>> {
        if vector.len() != self.dimension {
            return Err(SearchError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        let points = self.points.read();
        let mut hits: Vec<VectorHit> = points
            .values()
            .filter(|p| match directory_prefix {
                Some(prefix) => {
                    let prefix = prefix.trim_end_matches('/');
                    p.payload.file_path.starts_with(&format!("{prefix}/"))
                }
                None => true,
            })
            .map(|p| VectorHit {
                segment_id: p.segment_id.clone(),
                score: cosine_similarity(&vector, &p.embedding),
                payload: p.payload.clone(),
            })
            .filter(|hit| hit.score >= min_score)
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn clear_collection(&self) -> Result<()> {
        self.points.write().clear();
        self.incomplete.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn mark_indexing_incomplete(&self) -> Result<()> {
        self.incomplete.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn mark_indexing_complete(&self) -> Result<()> {
        self.incomplete.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codescout_core::PointPayload;

    fn point(id: &str, file: &str, embedding: Vec<f32>) -> Point {
        Point {
            segment_id: SegmentId(id.to_string()),
            embedding,
            payload: PointPayload {
                file_path: file.to_string(),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn test_upsert_and_search() {
        let store = MemoryVectorStore::new(3);
        store
            .upsert(vec![
                point("a", "src/a.rs", vec![1.0, 0.0, 0.0]),
                point("b", "src/b.rs", vec![0.0, 1.0, 0.0]),
            ])
            .await
            .unwrap();

        let hits = store.search(vec![1.0, 0.0, 0.0], None, 0.5, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].segment_id.as_str(), "a");
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_directory_prefix_filter() {
        let store = MemoryVectorStore::new(2);
        store
            .upsert(vec![
                point("a", "src/api/a.rs", vec![1.0, 0.0]),
                point("b", "tests/b.rs", vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        let hits = store.search(vec![1.0, 0.0], Some("src"), 0.0, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].payload.file_path, "src/api/a.rs");
    }

    #[tokio::test]
    async fn test_delete_by_file() {
        let store = MemoryVectorStore::new(2);
        store
            .upsert(vec![
                point("a", "src/a.rs", vec![1.0, 0.0]),
                point("b", "src/b.rs", vec![0.0, 1.0]),
            ])
            .await
            .unwrap();
        store.delete_by_file("src/a.rs").await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let store = MemoryVectorStore::new(3);
        let result = store.upsert(vec![point("a", "a.rs", vec![1.0])]).await;
        assert!(matches!(result, Err(SearchError::DimensionMismatch { .. })));
    }

    #[tokio::test]
    async fn test_initialize_reports_prior_data_and_marker() {
        let store = MemoryVectorStore::new(2);
        let fresh = store.initialize().await.unwrap();
        assert!(!fresh.had_prior_data);

        store.upsert(vec![point("a", "a.rs", vec![1.0, 0.0])]).await.unwrap();
        store.mark_indexing_incomplete().await.unwrap();
        let after = store.initialize().await.unwrap();
        assert!(after.had_prior_data);
        assert_eq!(after.stored_dimension, Some(2));
        assert!(after.indexing_incomplete);

        store.mark_indexing_complete().await.unwrap();
        assert!(!store.initialize().await.unwrap().indexing_incomplete);
    }
}
