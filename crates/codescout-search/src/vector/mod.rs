//! Vector Store Port
//!
//! The dense half of hybrid search. [`VectorStore`] is the contract the
//! engine indexes against; [`QdrantVectorStore`] backs it with a Qdrant
//! collection and [`MemoryVectorStore`] with an in-process cosine scan for
//! tests and offline use.

pub mod memory;
pub mod qdrant;

pub use memory::MemoryVectorStore;
pub use qdrant::{QdrantConfig, QdrantVectorStore};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use codescout_core::{Point, PointPayload, SegmentId};

use crate::error::Result;

/// One similarity-search match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorHit {
    pub segment_id: SegmentId,
    /// Cosine similarity in [0, 1]
    pub score: f32,
    pub payload: PointPayload,
}

/// What `initialize` learned about pre-existing data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitOutcome {
    /// The store already held points from a previous run
    pub had_prior_data: bool,
    /// Dimension of the stored vectors, when prior data exists
    pub stored_dimension: Option<usize>,
    /// A previous indexing run was interrupted before completing
    pub indexing_incomplete: bool,
}

/// Interface to an external (or in-process) ANN store.
///
/// The orchestrator must clear and re-index when `initialize` reports prior
/// data whose `stored_dimension` no longer matches the embedder's.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Ensure the backing collection exists and report what it found.
    async fn initialize(&self) -> Result<InitOutcome>;

    /// The dimension this store was configured for.
    fn dimension(&self) -> usize;

    /// Insert or overwrite points by segment id.
    async fn upsert(&self, points: Vec<Point>) -> Result<()>;

    /// Delete every point belonging to a file.
    async fn delete_by_file(&self, file_path: &str) -> Result<()>;

    /// Delete every point belonging to any of the files.
    async fn delete_by_files(&self, file_paths: &[String]) -> Result<()>;

    /// Similarity search.
    ///
    /// `directory_prefix` restricts results to paths under that directory;
    /// hits scoring below `min_score` are dropped; at most `limit` results,
    /// best first.
    async fn search(
        &self,
        vector: Vec<f32>,
        directory_prefix: Option<&str>,
        min_score: f32,
        limit: usize,
    ) -> Result<Vec<VectorHit>>;

    /// Drop every point.
    async fn clear_collection(&self) -> Result<()>;

    /// Record that an indexing run has started and not yet finished.
    async fn mark_indexing_incomplete(&self) -> Result<()>;

    /// Record that the indexing run finished cleanly.
    async fn mark_indexing_complete(&self) -> Result<()>;
}

/// Ancestor directories of a path, used for directory-prefix filtering.
///
/// `"src/api/users.ts"` → `["src", "src/api"]`.
pub(crate) fn path_directories(path: &str) -> Vec<String> {
    let mut dirs = Vec::new();
    let mut current = String::new();
    let segments: Vec<&str> = path.split('/').collect();
    for segment in segments.iter().take(segments.len().saturating_sub(1)) {
        if !current.is_empty() {
            current.push('/');
        }
        current.push_str(segment);
        dirs.push(current.clone());
    }
    dirs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_directories() {
        assert_eq!(
            path_directories("src/api/users.ts"),
            vec!["src".to_string(), "src/api".to_string()]
        );
        assert!(path_directories("top.rs").is_empty());
    }
}
