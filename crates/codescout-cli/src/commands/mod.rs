//! CLI command implementations

pub mod clear;
pub mod index;
pub mod search;
pub mod status;
pub mod watch;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use codescout_config::{ConfigLoader, ScoutConfig};
use codescout_engine::{BroadcastProgress, IndexManager, IndexPorts};
use codescout_search::{
    GraphService, HashEmbedder, MemoryGraphService, MemoryVectorStore, QdrantConfig,
    QdrantVectorStore, VectorStore,
};

use crate::GlobalOptions;

/// Dimension of the built-in deterministic embedder when the config does
/// not name one.
const DEFAULT_DIMENSION: usize = 256;

/// Sentinel vector-store URL selecting the in-process store.
const MEMORY_STORE_URL: &str = "memory";

/// Load the merged configuration for the workspace.
pub fn load_config(workspace_root: &Path) -> Result<ScoutConfig> {
    let mut loader = ConfigLoader::new();
    loader
        .load(workspace_root, None)
        .context("failed to load configuration")
}

/// Build and initialize a manager for the workspace.
///
/// The CLI runs with the built-in deterministic embedder (no network);
/// hosts embedding with a remote provider wire their adapter through the
/// library API instead. The vector store is Qdrant at
/// `vector_store.url`, or in-process when the URL is the literal
/// `memory`.
pub async fn create_manager(
    global: &GlobalOptions,
) -> Result<(Arc<IndexManager>, Arc<BroadcastProgress>)> {
    let workspace_root = global.workspace_root()?;
    let config = load_config(&workspace_root)?;

    let dimension = config
        .embedder
        .model_dimension
        .map(|d| d as usize)
        .unwrap_or(DEFAULT_DIMENSION);
    let embedder = Arc::new(HashEmbedder::new(dimension));

    let vector_store: Arc<dyn VectorStore> = if config.vector_store.url == MEMORY_STORE_URL {
        Arc::new(MemoryVectorStore::new(dimension))
    } else {
        let collection = collection_name(&workspace_root);
        let mut qdrant_config =
            QdrantConfig::new(config.vector_store.url.clone(), collection, dimension);
        if let Some(key) = &config.vector_store.api_key {
            qdrant_config = qdrant_config.with_api_key(key.clone());
        }
        Arc::new(
            QdrantVectorStore::connect(qdrant_config)
                .await
                .context("failed to connect to the vector store")?,
        )
    };

    let graph: Option<Arc<dyn GraphService>> = config
        .graph
        .enabled
        .then(|| Arc::new(MemoryGraphService::new()) as Arc<dyn GraphService>);

    let progress = Arc::new(BroadcastProgress::new());
    let manager = Arc::new(IndexManager::new(
        &workspace_root,
        config,
        IndexPorts {
            embedder,
            vector_store,
            graph,
        },
        progress.sink(),
    ));

    manager
        .initialize()
        .await
        .context("failed to initialize the index manager")?;

    Ok((manager, progress))
}

/// Derive a stable collection name from the workspace path.
fn collection_name(workspace_root: &Path) -> String {
    let stem = workspace_root
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("workspace");
    let sanitized: String = stem
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect();
    format!("codescout-{}", sanitized.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_name_sanitized() {
        assert_eq!(
            collection_name(Path::new("/home/dev/My Project")),
            "codescout-my-project"
        );
        assert_eq!(collection_name(Path::new("/")), "codescout-workspace");
    }
}
