//! Graph Service Port
//!
//! Optional backend storing code-relationship nodes and edges. The engine
//! writes through [`RetryingGraphService`], which chunks writes to a
//! configurable batch size and retries transient failures with exponential
//! backoff; reads dispatch straight through.
//!
//! [`MemoryGraphService`] backs the port with the in-process
//! [`CodeGraph`]; remote graph databases plug in behind the same trait.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use codescout_core::{CodeGraph, GraphNode, GraphRelationship};

use crate::error::{Result, SearchError};

// ============================================================================
// Port
// ============================================================================

/// Node/edge counts for status output.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
}

/// Interface to a code-relationship graph store.
#[async_trait]
pub trait GraphService: Send + Sync {
    /// Verify the backend is reachable and ready.
    async fn initialize(&self) -> Result<()>;

    /// Insert or replace nodes by id.
    async fn upsert_nodes(&self, nodes: Vec<GraphNode>) -> Result<()>;

    /// Insert relationships. Edges referencing unknown nodes are silently
    /// dropped unless strict validation is configured on the backend.
    async fn create_relationships(&self, relationships: Vec<GraphRelationship>) -> Result<()>;

    /// Delete every node (and its edges) belonging to a file.
    async fn delete_nodes_by_file(&self, file_path: &str) -> Result<()>;

    /// Drop everything.
    async fn clear_all(&self) -> Result<()>;

    /// Nodes that call the named entity.
    async fn find_callers(&self, name: &str) -> Result<Vec<GraphNode>>;

    /// Nodes the named entity calls.
    async fn find_callees(&self, name: &str) -> Result<Vec<GraphNode>>;

    /// Nodes the named entity depends on.
    async fn find_dependencies(&self, name: &str) -> Result<Vec<GraphNode>>;

    /// Nodes that depend on the named entity.
    async fn find_dependents(&self, name: &str) -> Result<Vec<GraphNode>>;

    /// Blast radius: nodes reachable via reverse dependency edges within
    /// `depth` hops.
    async fn find_impacted_nodes(&self, name: &str, depth: usize) -> Result<Vec<GraphNode>>;

    /// Run a named query with JSON parameters.
    async fn execute_query(&self, query: &str, params: Value) -> Result<Value>;

    /// Current graph size.
    async fn stats(&self) -> Result<GraphStats>;
}

// ============================================================================
// In-memory backend
// ============================================================================

/// Graph service over the in-process [`CodeGraph`].
#[derive(Debug, Default)]
pub struct MemoryGraphService {
    graph: RwLock<CodeGraph>,
    /// Error instead of dropping dangling edges
    strict: bool,
}

impl MemoryGraphService {
    /// Create a service with lenient dangling-edge handling.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a service that rejects dangling edges.
    pub fn strict() -> Self {
        Self {
            graph: RwLock::new(CodeGraph::new()),
            strict: true,
        }
    }
}

#[async_trait]
impl GraphService for MemoryGraphService {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn upsert_nodes(&self, nodes: Vec<GraphNode>) -> Result<()> {
        let mut graph = self.graph.write();
        for node in nodes {
            graph.upsert_node(node);
        }
        Ok(())
    }

    async fn create_relationships(&self, relationships: Vec<GraphRelationship>) -> Result<()> {
        let mut graph = self.graph.write();
        let mut dropped = 0usize;
        for rel in &relationships {
            if !graph.add_relationship(rel) {
                dropped += 1;
            }
        }
        drop(graph);

        if dropped > 0 {
            if self.strict {
                return Err(SearchError::Graph(format!(
                    "{dropped} relationships reference unknown nodes"
                )));
            }
            debug!("Dropped {} dangling relationships", dropped);
        }
        Ok(())
    }

    async fn delete_nodes_by_file(&self, file_path: &str) -> Result<()> {
        self.graph.write().remove_file(file_path);
        Ok(())
    }

    async fn clear_all(&self) -> Result<()> {
        self.graph.write().clear();
        Ok(())
    }

    async fn find_callers(&self, name: &str) -> Result<Vec<GraphNode>> {
        Ok(self.graph.read().find_callers(name))
    }

    async fn find_callees(&self, name: &str) -> Result<Vec<GraphNode>> {
        Ok(self.graph.read().find_callees(name))
    }

    async fn find_dependencies(&self, name: &str) -> Result<Vec<GraphNode>> {
        Ok(self.graph.read().find_dependencies(name))
    }

    async fn find_dependents(&self, name: &str) -> Result<Vec<GraphNode>> {
        Ok(self.graph.read().find_dependents(name))
    }

    async fn find_impacted_nodes(&self, name: &str, depth: usize) -> Result<Vec<GraphNode>> {
        Ok(self.graph.read().find_impacted(name, depth))
    }

    async fn execute_query(&self, query: &str, params: Value) -> Result<Value> {
        let name = params.get("name").and_then(|v| v.as_str()).unwrap_or("");
        let nodes = match query {
            "callers" => self.find_callers(name).await?,
            "callees" => self.find_callees(name).await?,
            "dependencies" => self.find_dependencies(name).await?,
            "dependents" => self.find_dependents(name).await?,
            "impacted" => {
                let depth = params.get("depth").and_then(|v| v.as_u64()).unwrap_or(3) as usize;
                self.find_impacted_nodes(name, depth).await?
            }
            "stats" => {
                let stats = self.stats().await?;
                return Ok(serde_json::to_value(stats)?);
            }
            other => {
                return Err(SearchError::Graph(format!("Unknown graph query: {other}")));
            }
        };
        Ok(serde_json::to_value(nodes)?)
    }

    async fn stats(&self) -> Result<GraphStats> {
        let graph = self.graph.read();
        Ok(GraphStats {
            node_count: graph.node_count(),
            edge_count: graph.edge_count(),
        })
    }
}

// ============================================================================
// Batching + retry decorator
// ============================================================================

/// Write batching and retry policy.
#[derive(Debug, Clone, Copy)]
pub struct GraphWriteConfig {
    /// Maximum items per write call
    pub batch_size: usize,
    /// Retries per batch on transient errors
    pub max_retries: u32,
    /// First backoff delay; doubles per attempt
    pub base_delay: Duration,
}

impl Default for GraphWriteConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_retries: 3,
            base_delay: Duration::from_millis(250),
        }
    }
}

/// Decorator enforcing the write contract over any [`GraphService`].
pub struct RetryingGraphService {
    inner: Arc<dyn GraphService>,
    config: GraphWriteConfig,
}

impl RetryingGraphService {
    /// Wrap a backend with the default write policy.
    pub fn new(inner: Arc<dyn GraphService>) -> Self {
        Self::with_config(inner, GraphWriteConfig::default())
    }

    /// Wrap a backend with an explicit write policy.
    pub fn with_config(inner: Arc<dyn GraphService>, config: GraphWriteConfig) -> Self {
        Self { inner, config }
    }

    async fn retry<F, Fut>(&self, what: &str, mut call: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        let mut attempt = 0u32;
        loop {
            match call().await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.config.max_retries => {
                    let delay = self.config.base_delay * 2u32.saturating_pow(attempt);
                    warn!("Graph {} failed (attempt {}): {}; retrying in {:?}", what, attempt + 1, e, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl GraphService for RetryingGraphService {
    async fn initialize(&self) -> Result<()> {
        self.inner.initialize().await
    }

    async fn upsert_nodes(&self, nodes: Vec<GraphNode>) -> Result<()> {
        for chunk in nodes.chunks(self.config.batch_size) {
            let chunk = chunk.to_vec();
            self.retry("upsert_nodes", || self.inner.upsert_nodes(chunk.clone()))
                .await?;
        }
        Ok(())
    }

    async fn create_relationships(&self, relationships: Vec<GraphRelationship>) -> Result<()> {
        for chunk in relationships.chunks(self.config.batch_size) {
            let chunk = chunk.to_vec();
            self.retry("create_relationships", || {
                self.inner.create_relationships(chunk.clone())
            })
            .await?;
        }
        Ok(())
    }

    async fn delete_nodes_by_file(&self, file_path: &str) -> Result<()> {
        self.retry("delete_nodes_by_file", || {
            self.inner.delete_nodes_by_file(file_path)
        })
        .await
    }

    async fn clear_all(&self) -> Result<()> {
        self.retry("clear_all", || self.inner.clear_all()).await
    }

    async fn find_callers(&self, name: &str) -> Result<Vec<GraphNode>> {
        self.inner.find_callers(name).await
    }

    async fn find_callees(&self, name: &str) -> Result<Vec<GraphNode>> {
        self.inner.find_callees(name).await
    }

    async fn find_dependencies(&self, name: &str) -> Result<Vec<GraphNode>> {
        self.inner.find_dependencies(name).await
    }

    async fn find_dependents(&self, name: &str) -> Result<Vec<GraphNode>> {
        self.inner.find_dependents(name).await
    }

    async fn find_impacted_nodes(&self, name: &str, depth: usize) -> Result<Vec<GraphNode>> {
        self.inner.find_impacted_nodes(name, depth).await
    }

    async fn execute_query(&self, query: &str, params: Value) -> Result<Value> {
        self.inner.execute_query(query, params).await
    }

    async fn stats(&self) -> Result<GraphStats> {
        self.inner.stats().await
    }
}

/// Build graph nodes and relationships from parsed blocks.
///
/// One node per block with an identifier, one file node per file, CONTAINS
/// edges from file to entity, and CALLS edges resolved by callee name
/// against the nodes in this batch (unresolved callees are skipped; the
/// backend drops anything still dangling).
pub fn graph_items_from_blocks(
    blocks: &[codescout_core::CodeBlock],
) -> (Vec<GraphNode>, Vec<GraphRelationship>) {
    use codescout_core::{BlockType, GraphEdgeKind, GraphNodeKind};
    use std::collections::HashMap;

    let mut nodes = Vec::new();
    let mut relationships = Vec::new();
    let mut files: HashMap<&str, String> = HashMap::new();
    let mut by_name: HashMap<&str, String> = HashMap::new();

    for block in blocks {
        let file_id = files.entry(block.file_path.as_str()).or_insert_with(|| {
            let id = format!("file:{}", block.file_path);
            nodes.push(GraphNode {
                id: id.clone(),
                name: block.file_path.clone(),
                kind: GraphNodeKind::File,
                file_path: block.file_path.clone(),
                start_line: 0,
                end_line: 0,
            });
            id
        });
        let file_id = file_id.clone();

        let Some(identifier) = &block.identifier else {
            continue;
        };

        let kind = match block.block_type {
            BlockType::Function => GraphNodeKind::Function,
            BlockType::Method => GraphNodeKind::Method,
            BlockType::Class | BlockType::Struct | BlockType::Enum | BlockType::Module => {
                GraphNodeKind::Class
            }
            BlockType::Interface => GraphNodeKind::Interface,
            BlockType::Variable => GraphNodeKind::Variable,
            BlockType::Import => GraphNodeKind::Import,
            BlockType::Chunk => continue,
        };

        let node_id = block.segment_id.to_string();
        nodes.push(GraphNode {
            id: node_id.clone(),
            name: identifier.clone(),
            kind,
            file_path: block.file_path.clone(),
            start_line: block.start_line,
            end_line: block.end_line,
        });
        by_name.insert(identifier.as_str(), node_id.clone());

        relationships.push(GraphRelationship {
            from_id: file_id,
            kind: GraphEdgeKind::Contains,
            to_id: node_id,
        });
    }

    // Resolve call edges against the names in this batch
    for block in blocks {
        let Some(identifier) = &block.identifier else {
            continue;
        };
        let Some(from_id) = by_name.get(identifier.as_str()) else {
            continue;
        };
        for callee in &block.calls {
            if callee == identifier {
                continue;
            }
            if let Some(to_id) = by_name.get(callee.as_str()) {
                relationships.push(GraphRelationship {
                    from_id: from_id.clone(),
                    kind: GraphEdgeKind::Calls,
                    to_id: to_id.clone(),
                });
            }
        }
    }

    (nodes, relationships)
}

#[cfg(test)]
mod tests {
    use super::*;
    use codescout_core::{BlockType, CodeBlock, GraphEdgeKind, GraphNodeKind};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn node(id: &str, name: &str) -> GraphNode {
        GraphNode {
            id: id.to_string(),
            name: name.to_string(),
            kind: GraphNodeKind::Function,
            file_path: "src/a.rs".to_string(),
            start_line: 1,
            end_line: 5,
        }
    }

    #[tokio::test]
    async fn test_memory_service_round_trip() {
        let service = MemoryGraphService::new();
        service
            .upsert_nodes(vec![node("a", "alpha"), node("b", "beta")])
            .await
            .unwrap();
        service
            .create_relationships(vec![GraphRelationship {
                from_id: "a".into(),
                kind: GraphEdgeKind::Calls,
                to_id: "b".into(),
            }])
            .await
            .unwrap();

        let callers = service.find_callers("beta").await.unwrap();
        assert_eq!(callers.len(), 1);
        assert_eq!(callers[0].name, "alpha");
    }

    #[tokio::test]
    async fn test_strict_mode_rejects_dangling_edges() {
        let service = MemoryGraphService::strict();
        service.upsert_nodes(vec![node("a", "alpha")]).await.unwrap();
        let result = service
            .create_relationships(vec![GraphRelationship {
                from_id: "a".into(),
                kind: GraphEdgeKind::Calls,
                to_id: "missing".into(),
            }])
            .await;
        assert!(matches!(result, Err(SearchError::Graph(_))));
    }

    #[tokio::test]
    async fn test_execute_query_dispatch() {
        let service = MemoryGraphService::new();
        service
            .upsert_nodes(vec![node("a", "alpha"), node("b", "beta")])
            .await
            .unwrap();
        service
            .create_relationships(vec![GraphRelationship {
                from_id: "a".into(),
                kind: GraphEdgeKind::Calls,
                to_id: "b".into(),
            }])
            .await
            .unwrap();

        let result = service
            .execute_query("callers", json!({"name": "beta"}))
            .await
            .unwrap();
        assert_eq!(result.as_array().unwrap().len(), 1);

        let err = service.execute_query("drop_all", json!({})).await;
        assert!(err.is_err());
    }

    struct FlakyGraph {
        inner: MemoryGraphService,
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl GraphService for FlakyGraph {
        async fn initialize(&self) -> Result<()> {
            Ok(())
        }
        async fn upsert_nodes(&self, nodes: Vec<GraphNode>) -> Result<()> {
            if self.failures_left.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1)).is_ok() {
                return Err(SearchError::Graph("transient".into()));
            }
            self.inner.upsert_nodes(nodes).await
        }
        async fn create_relationships(&self, r: Vec<GraphRelationship>) -> Result<()> {
            self.inner.create_relationships(r).await
        }
        async fn delete_nodes_by_file(&self, f: &str) -> Result<()> {
            self.inner.delete_nodes_by_file(f).await
        }
        async fn clear_all(&self) -> Result<()> {
            self.inner.clear_all().await
        }
        async fn find_callers(&self, n: &str) -> Result<Vec<GraphNode>> {
            self.inner.find_callers(n).await
        }
        async fn find_callees(&self, n: &str) -> Result<Vec<GraphNode>> {
            self.inner.find_callees(n).await
        }
        async fn find_dependencies(&self, n: &str) -> Result<Vec<GraphNode>> {
            self.inner.find_dependencies(n).await
        }
        async fn find_dependents(&self, n: &str) -> Result<Vec<GraphNode>> {
            self.inner.find_dependents(n).await
        }
        async fn find_impacted_nodes(&self, n: &str, d: usize) -> Result<Vec<GraphNode>> {
            self.inner.find_impacted_nodes(n, d).await
        }
        async fn execute_query(&self, q: &str, p: Value) -> Result<Value> {
            self.inner.execute_query(q, p).await
        }
        async fn stats(&self) -> Result<GraphStats> {
            self.inner.stats().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retrying_service_recovers_from_transient_failures() {
        let flaky = Arc::new(FlakyGraph {
            inner: MemoryGraphService::new(),
            failures_left: AtomicU32::new(2),
        });
        let service = RetryingGraphService::with_config(
            flaky.clone(),
            GraphWriteConfig {
                batch_size: 10,
                max_retries: 3,
                base_delay: Duration::from_millis(10),
            },
        );

        service.upsert_nodes(vec![node("a", "alpha")]).await.unwrap();
        assert_eq!(service.stats().await.unwrap().node_count, 1);
    }

    #[tokio::test]
    async fn test_writes_are_batched() {
        struct CountingGraph {
            inner: MemoryGraphService,
            calls: AtomicU32,
        }

        #[async_trait]
        impl GraphService for CountingGraph {
            async fn initialize(&self) -> Result<()> {
                Ok(())
            }
            async fn upsert_nodes(&self, nodes: Vec<GraphNode>) -> Result<()> {
                assert!(nodes.len() <= 2, "batch larger than configured size");
                self.calls.fetch_add(1, Ordering::SeqCst);
                self.inner.upsert_nodes(nodes).await
            }
            async fn create_relationships(&self, r: Vec<GraphRelationship>) -> Result<()> {
                self.inner.create_relationships(r).await
            }
            async fn delete_nodes_by_file(&self, f: &str) -> Result<()> {
                self.inner.delete_nodes_by_file(f).await
            }
            async fn clear_all(&self) -> Result<()> {
                self.inner.clear_all().await
            }
            async fn find_callers(&self, n: &str) -> Result<Vec<GraphNode>> {
                self.inner.find_callers(n).await
            }
            async fn find_callees(&self, n: &str) -> Result<Vec<GraphNode>> {
                self.inner.find_callees(n).await
            }
            async fn find_dependencies(&self, n: &str) -> Result<Vec<GraphNode>> {
                self.inner.find_dependencies(n).await
            }
            async fn find_dependents(&self, n: &str) -> Result<Vec<GraphNode>> {
                self.inner.find_dependents(n).await
            }
            async fn find_impacted_nodes(&self, n: &str, d: usize) -> Result<Vec<GraphNode>> {
                self.inner.find_impacted_nodes(n, d).await
            }
            async fn execute_query(&self, q: &str, p: Value) -> Result<Value> {
                self.inner.execute_query(q, p).await
            }
            async fn stats(&self) -> Result<GraphStats> {
                self.inner.stats().await
            }
        }

        let counting = Arc::new(CountingGraph {
            inner: MemoryGraphService::new(),
            calls: AtomicU32::new(0),
        });
        let service = RetryingGraphService::with_config(
            counting.clone(),
            GraphWriteConfig {
                batch_size: 2,
                ..Default::default()
            },
        );

        let nodes: Vec<GraphNode> = (0..5).map(|i| node(&format!("n{i}"), &format!("f{i}"))).collect();
        service.upsert_nodes(nodes).await.unwrap();
        assert_eq!(counting.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_graph_items_from_blocks() {
        let mut caller = CodeBlock::new("src/a.rs", "fh", 1, 5, "pub fn alpha() { beta() }", BlockType::Function);
        caller.identifier = Some("alpha".into());
        caller.calls = vec!["beta".into(), "unresolved".into()];
        let mut callee = CodeBlock::new("src/b.rs", "fh2", 1, 3, "fn beta() {}", BlockType::Function);
        callee.identifier = Some("beta".into());

        let (nodes, rels) = graph_items_from_blocks(&[caller.clone(), callee.clone()]);

        // Two entity nodes plus two file nodes
        assert_eq!(nodes.len(), 4);
        let calls: Vec<_> = rels.iter().filter(|r| r.kind == GraphEdgeKind::Calls).collect();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].from_id, caller.segment_id.to_string());
        assert_eq!(calls[0].to_id, callee.segment_id.to_string());
        let contains = rels.iter().filter(|r| r.kind == GraphEdgeKind::Contains).count();
        assert_eq!(contains, 2);
    }
}
