//! Qdrant-Backed Vector Store
//!
//! Wraps the Qdrant client behind the [`VectorStore`] port: one collection
//! per workspace, cosine distance, payload indexes on the fields the engine
//! filters by. Upserts are batched and waited on, so a completed upsert is
//! durable before the file's cache entry is updated.
//!
//! A reserved marker point records the indexing-incomplete flag so an
//! interrupted run is detectable after a restart.

use qdrant_client::qdrant::{
    point_id::PointIdOptions, vectors_config::Config, Condition, CreateCollectionBuilder,
    CreateFieldIndexCollectionBuilder, DeletePointsBuilder, Distance, FieldType, Filter,
    PointStruct, ScrollPointsBuilder, SearchPointsBuilder, UpsertPointsBuilder, VectorParams,
    VectorsConfig,
};
use qdrant_client::{Payload, Qdrant};
use serde_json::json;
use tracing::{debug, info};

use async_trait::async_trait;
use codescout_core::{Point, PointPayload, SegmentId};

use crate::error::{Result, SearchError};

use super::{path_directories, InitOutcome, VectorHit, VectorStore};

/// Reserved point id for the indexing-state marker.
const MARKER_POINT_ID: u64 = u64::MAX;

/// Payload field names.
mod fields {
    pub const SEGMENT_ID: &str = "segment_id";
    pub const FILE_PATH: &str = "file_path";
    pub const DIRS: &str = "dirs";
    pub const META: &str = "meta";
    pub const PAYLOAD_JSON: &str = "payload_json";
    pub const INCOMPLETE: &str = "indexing_incomplete";
}

/// Configuration for connecting to Qdrant.
#[derive(Debug, Clone)]
pub struct QdrantConfig {
    /// Qdrant server URL (e.g., "http://localhost:6334")
    pub url: String,
    /// Optional API key for authentication
    pub api_key: Option<String>,
    /// Collection name, typically derived from the workspace path
    pub collection: String,
    /// Embedding dimension the collection is created with
    pub dimension: usize,
    /// Points per upsert request
    pub upsert_batch_size: usize,
}

impl QdrantConfig {
    /// Create a config with the required fields and defaults elsewhere.
    pub fn new(url: impl Into<String>, collection: impl Into<String>, dimension: usize) -> Self {
        Self {
            url: url.into(),
            api_key: None,
            collection: collection.into(),
            dimension,
            upsert_batch_size: 100,
        }
    }

    /// Set the API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }
}

/// Vector store backed by a Qdrant collection.
pub struct QdrantVectorStore {
    client: Qdrant,
    config: QdrantConfig,
}

impl QdrantVectorStore {
    /// Connect to Qdrant and verify the server responds.
    pub async fn connect(config: QdrantConfig) -> Result<Self> {
        info!("Connecting to Qdrant at {}", config.url);

        let mut builder = Qdrant::from_url(&config.url);
        if let Some(api_key) = &config.api_key {
            builder = builder.api_key(api_key.clone());
        }
        let client = builder
            .build()
            .map_err(|e| SearchError::Connection(format!("Failed to build Qdrant client: {e}")))?;

        // Probe the connection before reporting success
        client
            .list_collections()
            .await
            .map_err(|e| SearchError::Connection(format!("Failed to connect to Qdrant: {e}")))?;

        Ok(Self { client, config })
    }

    async fn ensure_collection(&self) -> Result<()> {
        if self.client.collection_exists(&self.config.collection).await? {
            return Ok(());
        }

        info!(
            "Creating collection '{}' (dim={})",
            self.config.collection, self.config.dimension
        );

        let vectors_config = VectorsConfig {
            config: Some(Config::Params(VectorParams {
                size: self.config.dimension as u64,
                distance: Distance::Cosine.into(),
                ..Default::default()
            })),
        };

        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.config.collection).vectors_config(vectors_config),
            )
            .await?;

        // Payload indexes for the fields deletes and searches filter by
        for field in [fields::FILE_PATH, fields::DIRS, fields::META, fields::SEGMENT_ID] {
            self.client
                .create_field_index(CreateFieldIndexCollectionBuilder::new(
                    &self.config.collection,
                    field,
                    FieldType::Keyword,
                ))
                .await?;
        }

        debug!("Collection '{}' created", self.config.collection);
        Ok(())
    }

    /// Dimension recorded in the collection's vector params.
    async fn stored_dimension(&self) -> Result<Option<usize>> {
        let info = self.client.collection_info(&self.config.collection).await?;
        let dimension = info
            .result
            .as_ref()
            .and_then(|r| r.config.as_ref())
            .and_then(|c| c.params.as_ref())
            .and_then(|p| p.vectors_config.as_ref())
            .and_then(|v| v.config.as_ref())
            .and_then(|c| match c {
                Config::Params(params) => Some(params.size as usize),
                Config::ParamsMap(_) => None,
            });
        Ok(dimension)
    }

    async fn point_count(&self) -> Result<u64> {
        let info = self.client.collection_info(&self.config.collection).await?;
        Ok(info.result.and_then(|r| r.points_count).unwrap_or(0))
    }

    async fn write_marker(&self, incomplete: bool) -> Result<()> {
        let payload = Payload::try_from(json!({
            fields::META: "marker",
            fields::INCOMPLETE: if incomplete { 1 } else { 0 },
        }))
        .map_err(|e| SearchError::VectorStore(format!("marker payload: {e}")))?;

        let point = PointStruct::new(
            MARKER_POINT_ID,
            vec![0.0f32; self.config.dimension],
            payload,
        );
        self.client
            .upsert_points(
                UpsertPointsBuilder::new(&self.config.collection, vec![point]).wait(true),
            )
            .await?;
        Ok(())
    }

    async fn read_marker(&self) -> Result<Option<bool>> {
        let filter = Filter::must([Condition::matches(fields::META, "marker".to_string())]);
        let response = self
            .client
            .scroll(
                ScrollPointsBuilder::new(&self.config.collection)
                    .filter(filter)
                    .limit(1)
                    .with_payload(true),
            )
            .await?;

        Ok(response.result.first().map(|point| {
            point
                .payload
                .get(fields::INCOMPLETE)
                .and_then(|v| v.as_integer())
                .map(|i| i != 0)
                .unwrap_or(false)
        }))
    }

    fn to_point_struct(&self, point: &Point) -> Result<PointStruct> {
        let payload_json = serde_json::to_string(&point.payload)?;
        let payload = Payload::try_from(json!({
            fields::SEGMENT_ID: point.segment_id.as_str(),
            fields::FILE_PATH: point.payload.file_path,
            fields::DIRS: path_directories(&point.payload.file_path),
            fields::PAYLOAD_JSON: payload_json,
        }))
        .map_err(|e| SearchError::VectorStore(format!("point payload: {e}")))?;

        Ok(PointStruct::new(
            point.segment_id.as_u64(),
            point.embedding.clone(),
            payload,
        ))
    }
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    async fn initialize(&self) -> Result<InitOutcome> {
        let existed = self.client.collection_exists(&self.config.collection).await?;
        if !existed {
            self.ensure_collection().await?;
            self.write_marker(false).await?;
            return Ok(InitOutcome {
                had_prior_data: false,
                stored_dimension: None,
                indexing_incomplete: false,
            });
        }

        let stored_dimension = self.stored_dimension().await?;
        let count = self.point_count().await?;
        let marker = self.read_marker().await?;
        // The marker itself is a point; prior data means anything beyond it
        let had_prior_data = count > marker.map(|_| 1).unwrap_or(0);

        Ok(InitOutcome {
            had_prior_data,
            stored_dimension,
            indexing_incomplete: marker.unwrap_or(false),
        })
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    async fn upsert(&self, points: Vec<Point>) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }

        for point in &points {
            if point.embedding.len() != self.config.dimension {
                return Err(SearchError::DimensionMismatch {
                    expected: self.config.dimension,
                    actual: point.embedding.len(),
                });
            }
        }

        let total = points.len();
        debug!(
            "Upserting {} points to '{}' in batches of {}",
            total, self.config.collection, self.config.upsert_batch_size
        );

        for batch in points.chunks(self.config.upsert_batch_size) {
            let structs: Result<Vec<PointStruct>> =
                batch.iter().map(|p| self.to_point_struct(p)).collect();
            self.client
                .upsert_points(
                    UpsertPointsBuilder::new(&self.config.collection, structs?).wait(true),
                )
                .await?;
        }

        Ok(())
    }

    async fn delete_by_file(&self, file_path: &str) -> Result<()> {
        debug!("Deleting points for '{}' from '{}'", file_path, self.config.collection);
        let filter = Filter::must([Condition::matches(
            fields::FILE_PATH,
            file_path.to_string(),
        )]);
        self.client
            .delete_points(
                DeletePointsBuilder::new(&self.config.collection)
                    .points(filter)
                    .wait(true),
            )
            .await?;
        Ok(())
    }

    async fn delete_by_files(&self, file_paths: &[String]) -> Result<()> {
        if file_paths.is_empty() {
            return Ok(());
        }
        // One filter with OR'd path conditions; a single round-trip
        let mut filter = Filter::default();
        filter.should = file_paths
            .iter()
            .map(|p| Condition::matches(fields::FILE_PATH, p.clone()))
            .collect();
        self.client
            .delete_points(
                DeletePointsBuilder::new(&self.config.collection)
                    .points(filter)
                    .wait(true),
            )
            .await?;
        Ok(())
    }

    async fn search(
        &self,
        vector: Vec<f32>,
        directory_prefix: Option<&str>,
        min_score: f32,
        limit: usize,
    ) -> Result<Vec<VectorHit>> {
        let mut filter = Filter::default();
        // The marker point must never surface as a search result
        filter.must_not = vec![Condition::matches(fields::META, "marker".to_string())];
        if let Some(prefix) = directory_prefix {
            filter
                .must
                .push(Condition::matches(fields::DIRS, prefix.trim_end_matches('/').to_string()));
        }

        let response = self
            .client
            .search_points(
                SearchPointsBuilder::new(&self.config.collection, vector, limit as u64)
                    .filter(filter)
                    .score_threshold(min_score)
                    .with_payload(true),
            )
            .await?;

        let hits = response
            .result
            .into_iter()
            .filter_map(|point| {
                let payload_json = point.payload.get(fields::PAYLOAD_JSON)?.as_str()?.to_string();
                let payload: PointPayload = serde_json::from_str(&payload_json).ok()?;
                let segment_id = point
                    .payload
                    .get(fields::SEGMENT_ID)
                    .and_then(|v| v.as_str())
                    .map(|s| SegmentId(s.to_string()))
                    .or_else(|| {
                        // Fallback: reconstruct from the numeric point id
                        point.id.as_ref().and_then(|id| match id.point_id_options {
                            Some(PointIdOptions::Num(n)) => Some(SegmentId(format!("{n:x}"))),
                            _ => None,
                        })
                    })?;

                Some(VectorHit {
                    segment_id,
                    score: point.score,
                    payload,
                })
            })
            .collect();

        Ok(hits)
    }

    async fn clear_collection(&self) -> Result<()> {
        info!("Clearing collection '{}'", self.config.collection);
        if self.client.collection_exists(&self.config.collection).await? {
            self.client.delete_collection(&self.config.collection).await?;
        }
        self.ensure_collection().await?;
        self.write_marker(false).await?;
        Ok(())
    }

    async fn mark_indexing_incomplete(&self) -> Result<()> {
        self.write_marker(true).await
    }

    async fn mark_indexing_complete(&self) -> Result<()> {
        self.write_marker(false).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = QdrantConfig::new("http://localhost:6334", "ws-1", 768).with_api_key("k");
        assert_eq!(config.collection, "ws-1");
        assert_eq!(config.dimension, 768);
        assert_eq!(config.api_key.as_deref(), Some("k"));
        assert_eq!(config.upsert_batch_size, 100);
    }
}
