//! Search Orchestrator
//!
//! Routes a query across the hybrid (vector + BM25) and graph backends per
//! the analyzer's decision, executes them concurrently, and merges the
//! results: dedupe by id keeping the higher score, apply intent
//! enhancements (exported boost, test-file filter), sort, truncate.
//!
//! Failure semantics: a failing backend is logged and skipped; the search
//! only errors when every selected backend failed.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use codescout_core::GraphNode;

use crate::analyzer::{BackendWeights, QueryAnalysis, QueryAnalyzer, QueryIntent, SearchBackend};
use crate::error::{Result, SearchError};
use crate::graph_service::GraphService;
use crate::hybrid::HybridSearchService;

// ============================================================================
// Options and results
// ============================================================================

/// Caller-supplied overrides for one search.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Cap on returned results (default from config)
    pub max_results: Option<usize>,
    /// Similarity floor for the vector backend
    pub min_score: Option<f32>,
    /// Restrict results to paths under this directory
    pub directory_prefix: Option<String>,
    /// Force a backend set, overriding the analyzer
    pub backends: Option<Vec<SearchBackend>>,
    /// Force weights, overriding the analyzer
    pub weights: Option<BackendWeights>,
}

/// One merged search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResultItem {
    /// Segment id, or graph node id for graph-only results
    pub id: String,
    pub score: f32,
    pub file_path: String,
    pub start_line: u32,
    pub end_line: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exports: Vec<String>,
}

/// Search response with routing metadata attached.
#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResultItem>,
    pub query_analysis: QueryAnalysis,
    pub used_backends: Vec<SearchBackend>,
}

/// Default result cap when neither options nor config say otherwise.
const DEFAULT_MAX_RESULTS: usize = 50;

/// Default vector similarity floor.
const DEFAULT_MIN_SCORE: f32 = 0.4;

/// Multiplier applied to results with at least one export when the intent
/// asks for implementations.
const EXPORT_BOOST: f32 = 1.15;

/// Traversal depth for impact-style intents.
const IMPACT_DEPTH: usize = 3;

/// Path fragments that mark a file as a test file.
const TEST_PATH_MARKERS: &[&str] = &[".test.", ".spec.", "__tests__", "/test/", "/tests/"];

fn is_test_path(path: &str) -> bool {
    TEST_PATH_MARKERS.iter().any(|m| path.contains(m))
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Defaults inherited from configuration.
#[derive(Debug, Clone, Copy)]
pub struct SearchDefaults {
    pub max_results: usize,
    pub min_score: f32,
}

impl Default for SearchDefaults {
    fn default() -> Self {
        Self {
            max_results: DEFAULT_MAX_RESULTS,
            min_score: DEFAULT_MIN_SCORE,
        }
    }
}

/// Routes queries across backends and merges their results.
pub struct SearchOrchestrator {
    analyzer: QueryAnalyzer,
    hybrid: Arc<HybridSearchService>,
    graph: Option<Arc<dyn GraphService>>,
    defaults: SearchDefaults,
}

impl SearchOrchestrator {
    /// Create an orchestrator. `graph` is `None` when the graph backend is
    /// disabled or unavailable.
    pub fn new(
        hybrid: Arc<HybridSearchService>,
        graph: Option<Arc<dyn GraphService>>,
        defaults: SearchDefaults,
    ) -> Self {
        Self {
            analyzer: QueryAnalyzer::new(),
            hybrid,
            graph,
            defaults,
        }
    }

    /// Analyze without searching. Used by status and diagnostics output.
    pub fn analyze(&self, query: &str) -> QueryAnalysis {
        self.analyzer.analyze(query)
    }

    /// Execute a search.
    pub async fn search(&self, query: &str, options: SearchOptions) -> Result<SearchResponse> {
        let mut analysis = self.analyzer.analyze(query);
        if let Some(weights) = options.weights {
            analysis.weights = weights;
            analysis.backends = weights.backends();
        }
        if let Some(backends) = &options.backends {
            analysis.backends = backends.clone();
        }

        let max_results = options.max_results.unwrap_or(self.defaults.max_results);
        let min_score = options.min_score.unwrap_or(self.defaults.min_score);
        let directory_prefix = options.directory_prefix.as_deref();

        let wants_hybrid = analysis
            .backends
            .iter()
            .any(|b| matches!(b, SearchBackend::Vector | SearchBackend::Bm25));
        let wants_graph = analysis.backends.contains(&SearchBackend::Graph);
        let graph = if wants_graph { self.graph.clone() } else { None };

        debug!(
            "Search '{}': intent={}, backends={:?}",
            query, analysis.intent, analysis.backends
        );

        let mut used_backends = Vec::new();
        let mut failures: Vec<String> = Vec::new();
        let mut selected = 0usize;

        // Run hybrid and graph concurrently
        let hybrid_fut = async {
            if wants_hybrid {
                let weights = analysis.weights.renormalized_hybrid();
                Some(
                    self.hybrid
                        .search(query, max_results, min_score, directory_prefix, Some(weights))
                        .await,
                )
            } else {
                None
            }
        };
        let graph_fut = async {
            match &graph {
                Some(service) => Some(
                    self.graph_search(service.as_ref(), &analysis)
                        .await,
                ),
                None => None,
            }
        };
        let (hybrid_result, graph_result) = tokio::join!(hybrid_fut, graph_fut);

        let mut merged: HashMap<String, SearchResultItem> = HashMap::new();

        if wants_hybrid {
            selected += 1;
            match hybrid_result.expect("hybrid future ran") {
                Ok(response) => {
                    if analysis.weights.vector > 0.0 && response.vector_error.is_none() {
                        used_backends.push(SearchBackend::Vector);
                    }
                    if analysis.weights.bm25 > 0.0 {
                        used_backends.push(SearchBackend::Bm25);
                    }
                    if let Some(e) = response.vector_error {
                        failures.push(e);
                    }
                    for hit in response.hits {
                        let item = SearchResultItem {
                            id: hit.segment_id.to_string(),
                            score: hit.score,
                            file_path: hit
                                .payload
                                .as_ref()
                                .map(|p| p.file_path.clone())
                                .unwrap_or_default(),
                            start_line: hit.payload.as_ref().map(|p| p.start_line).unwrap_or(0),
                            end_line: hit.payload.as_ref().map(|p| p.end_line).unwrap_or(0),
                            identifier: hit.payload.as_ref().and_then(|p| p.identifier.clone()),
                            block_type: hit
                                .payload
                                .as_ref()
                                .map(|p| p.block_type.as_str().to_string()),
                            snippet: hit.payload.as_ref().map(|p| p.content.clone()),
                            exports: hit.payload.map(|p| p.exports).unwrap_or_default(),
                        };
                        merge_item(&mut merged, item);
                    }
                }
                Err(e) => {
                    warn!("Hybrid search failed: {}", e);
                    failures.push(e.to_string());
                }
            }
        }

        if wants_graph && self.graph.is_some() {
            selected += 1;
            match graph_result.expect("graph future ran") {
                Ok(nodes) => {
                    used_backends.push(SearchBackend::Graph);
                    let score = analysis.weights.graph;
                    for node in nodes {
                        merge_item(&mut merged, graph_item(node, score));
                    }
                }
                Err(e) => {
                    warn!("Graph search failed: {}", e);
                    failures.push(e.to_string());
                }
            }
        }

        if selected > 0 && used_backends.is_empty() {
            return Err(SearchError::AllBackendsFailed(failures.join("; ")));
        }

        let mut results: Vec<SearchResultItem> = merged.into_values().collect();

        // Intent enhancements
        if analysis.boost_exported {
            for item in &mut results {
                if !item.exports.is_empty() {
                    item.score *= EXPORT_BOOST;
                }
            }
        }
        if analysis.test_files_only {
            results.retain(|item| is_test_path(&item.file_path));
        }

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        results.truncate(max_results);

        Ok(SearchResponse {
            results,
            query_analysis: analysis,
            used_backends,
        })
    }

    /// Dispatch the graph lookup matching the intent. Intents without a
    /// graph form produce empty results.
    async fn graph_search(
        &self,
        service: &dyn GraphService,
        analysis: &QueryAnalysis,
    ) -> Result<Vec<GraphNode>> {
        let Some(symbol) = analysis.symbol.as_deref() else {
            debug!("Graph backend selected but no symbol extracted");
            return Ok(Vec::new());
        };

        match analysis.intent {
            QueryIntent::FindCallers => service.find_callers(symbol).await,
            QueryIntent::FindCallees => service.find_callees(symbol).await,
            QueryIntent::FindDependencies => service.find_dependencies(symbol).await,
            QueryIntent::FindDependents => service.find_dependents(symbol).await,
            QueryIntent::ImpactAnalysis | QueryIntent::BlastRadius | QueryIntent::ChangeSafety => {
                service.find_impacted_nodes(symbol, IMPACT_DEPTH).await
            }
            QueryIntent::DependencyAnalysis => {
                let mut nodes = service.find_dependencies(symbol).await?;
                let dependents = service.find_dependents(symbol).await?;
                for node in dependents {
                    if !nodes.iter().any(|n| n.id == node.id) {
                        nodes.push(node);
                    }
                }
                Ok(nodes)
            }
            QueryIntent::FindUsages => {
                let mut nodes = service.find_callers(symbol).await?;
                let dependents = service.find_dependents(symbol).await?;
                for node in dependents {
                    if !nodes.iter().any(|n| n.id == node.id) {
                        nodes.push(node);
                    }
                }
                Ok(nodes)
            }
            // No graph form for the remaining intents
            _ => Ok(Vec::new()),
        }
    }
}

fn graph_item(node: GraphNode, score: f32) -> SearchResultItem {
    SearchResultItem {
        id: node.id,
        score,
        file_path: node.file_path,
        start_line: node.start_line,
        end_line: node.end_line,
        identifier: Some(node.name),
        block_type: Some(node.kind.as_str().to_string()),
        snippet: None,
        exports: Vec::new(),
    }
}

/// Dedupe by id, keeping the higher score. Metadata from the richer entry
/// (the one with a snippet) wins on collision.
fn merge_item(merged: &mut HashMap<String, SearchResultItem>, item: SearchResultItem) {
    match merged.get_mut(&item.id) {
        Some(existing) => {
            if item.score > existing.score {
                existing.score = item.score;
            }
            if existing.snippet.is_none() && item.snippet.is_some() {
                existing.snippet = item.snippet;
                existing.block_type = item.block_type;
                existing.exports = item.exports;
            }
        }
        None => {
            merged.insert(item.id.clone(), item);
        }
    }
}
