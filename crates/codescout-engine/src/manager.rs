//! Index Manager
//!
//! Owns every sub-component and drives the two pipelines:
//!
//! - **Indexing**: scanner → parser → adaptive batches → embedder →
//!   vector/BM25/graph writes, with the cache entry for a file updated only
//!   after all of its writes succeeded. Unchanged files produce zero
//!   writes; per file, deletes precede inserts.
//! - **Query**: delegation to the search orchestrator with the configured
//!   defaults.
//!
//! Sub-components never see the manager; they receive narrow sinks. One
//! manager exists per workspace, enforced by [`ManagerRegistry`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use codescout_config::{ConfigChange, ScoutConfig};
use codescout_core::{
    Bm25Index, Bm25Stats, CodeBlock, CodeParser, FileHashCache, ParsedFile, Point, PointPayload,
    Scanner, ScannerConfig,
};
use codescout_search::{
    graph_items_from_blocks, Embedder, EmbedderInfo, GraphService, HybridSearchService,
    RetryingGraphService, SearchDefaults, SearchOptions, SearchOrchestrator, SearchResponse,
    ValidatedEmbedder, VectorStore,
};

use crate::batcher::{estimate_tokens, BatchOptimizer, BatchPerformance};
use crate::error::{categorize, EngineError, ErrorCategory, Result, RetryAdvice};
use crate::events::{ProgressEvent, ProgressSink};
use crate::limiter::{RateDecision, RateLimiter};
use crate::metrics::MetricsCollector;
use crate::state::{Component, ComponentState, StateManager, StateSnapshot, SystemState};
use crate::watcher::{ChangeBatch, ChangeDebouncer, FileEvent};

/// Retries per batch before a sub-component degrades.
pub const MAX_BATCH_RETRIES: u32 = 3;

/// First delay of the embed retry backoff.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Files processed between cache persists during a run.
const CACHE_PERSIST_INTERVAL: usize = 25;

// ============================================================================
// Construction
// ============================================================================

/// Host-supplied adapters behind the engine's ports.
pub struct IndexPorts {
    pub embedder: Arc<dyn Embedder>,
    pub vector_store: Arc<dyn VectorStore>,
    pub graph: Option<Arc<dyn GraphService>>,
}

/// What `initialize` discovered.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct InitReport {
    /// Prior vector data exists
    pub had_prior_data: bool,
    /// Prior data was cleared (dimension change or interrupted run)
    pub reindex_required: bool,
}

/// What `handle_settings_change` decided.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SettingsOutcome {
    /// The caller must tear this manager down and build a new one
    pub requires_restart: bool,
}

/// Snapshot returned by `get_current_status`.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub state: StateSnapshot,
    pub cached_files: usize,
    pub bm25: Bm25Stats,
    pub embedder: EmbedderInfo,
    pub processed_files: usize,
    pub total_files: usize,
    pub processed_blocks: usize,
}

// ============================================================================
// Manager
// ============================================================================

/// Per-workspace indexing and search façade.
pub struct IndexManager {
    workspace_root: PathBuf,
    config: RwLock<ScoutConfig>,
    provider_name: String,

    state: Arc<StateManager>,
    metrics: Arc<MetricsCollector>,
    limiter: Arc<RateLimiter>,
    batcher: Mutex<BatchOptimizer>,
    cache: tokio::sync::Mutex<FileHashCache>,

    bm25: Arc<Bm25Index>,
    scanner: Arc<Scanner>,
    embedder: Arc<ValidatedEmbedder>,
    vector_store: Arc<dyn VectorStore>,
    graph: Option<Arc<dyn GraphService>>,
    hybrid: Arc<HybridSearchService>,

    progress: Arc<dyn ProgressSink>,
    cancel: Mutex<Option<CancellationToken>>,
    watcher_cancel: Mutex<Option<CancellationToken>>,
    initialized: AtomicBool,

    processed_files: AtomicUsize,
    total_files: AtomicUsize,
    processed_blocks: AtomicUsize,
}

impl IndexManager {
    /// Assemble a manager for one workspace.
    pub fn new(
        workspace_root: impl AsRef<Path>,
        config: ScoutConfig,
        ports: IndexPorts,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        let workspace_root = workspace_root.as_ref().to_path_buf();

        let parser = Arc::new(CodeParser::new());
        let scanner_config = ScannerConfig {
            max_file_size: config.scanner.max_file_size,
            concurrency: config.scanner.concurrency,
            ignore_patterns: config.scanner.ignore_patterns.clone(),
            ..ScannerConfig::default()
        };
        let scanner = Arc::new(Scanner::new(&workspace_root, parser, scanner_config));

        let bm25 = Arc::new(Bm25Index::new());
        let embedder = Arc::new(ValidatedEmbedder::new(ports.embedder));
        let hybrid = Arc::new(HybridSearchService::new(
            Arc::clone(&embedder),
            Arc::clone(&ports.vector_store),
            Arc::clone(&bm25),
        ));
        let graph = ports
            .graph
            .map(|g| Arc::new(RetryingGraphService::new(g)) as Arc<dyn GraphService>);

        let state = Arc::new(StateManager::new(config.graph.enabled && graph.is_some()));
        let provider_name = config.embedder.provider.to_string();
        let cache_dir = workspace_root.join(codescout_config::STATE_DIR);

        Self {
            workspace_root,
            provider_name,
            config: RwLock::new(config),
            state,
            metrics: Arc::new(MetricsCollector::new()),
            limiter: Arc::new(RateLimiter::new()),
            batcher: Mutex::new(BatchOptimizer::new()),
            cache: tokio::sync::Mutex::new(FileHashCache::new(cache_dir)),
            bm25,
            scanner,
            embedder,
            vector_store: ports.vector_store,
            graph,
            hybrid,
            progress,
            cancel: Mutex::new(None),
            watcher_cancel: Mutex::new(None),
            initialized: AtomicBool::new(false),
            processed_files: AtomicUsize::new(0),
            total_files: AtomicUsize::new(0),
            processed_blocks: AtomicUsize::new(0),
        }
    }

    /// The workspace this manager indexes.
    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Validate configuration, connect the stores, and load the cache.
    ///
    /// Idempotent: a second call re-checks the stores but keeps state. A
    /// fatal configuration error moves the system to Error and indexing is
    /// refused until re-initialized.
    pub async fn initialize(&self) -> Result<InitReport> {
        let config = self.config.read().clone();
        if let Err(e) = config.validate() {
            let message = e.to_string();
            self.metrics.record_error(ErrorCategory::Configuration);
            self.state.fail(&message);
            return Err(EngineError::Configuration(message));
        }

        let mut report = InitReport::default();

        // Vector store is mandatory: a failure here is fatal
        match self.vector_store.initialize().await {
            Ok(outcome) => {
                report.had_prior_data = outcome.had_prior_data;
                let dimension_changed = outcome.had_prior_data
                    && outcome
                        .stored_dimension
                        .map(|d| d != self.embedder.dimension())
                        .unwrap_or(false);

                if dimension_changed || outcome.indexing_incomplete {
                    if dimension_changed {
                        info!(
                            "Stored embedding dimension {:?} != {}; clearing for reindex",
                            outcome.stored_dimension,
                            self.embedder.dimension()
                        );
                    } else {
                        info!("Previous indexing run did not complete; forcing full reindex");
                    }
                    self.vector_store.clear_collection().await?;
                    let mut cache = self.cache.lock().await;
                    cache.load()?;
                    cache.clear();
                    cache.persist()?;
                    report.reindex_required = true;
                }
                self.state.record_component_success(Component::Vector);
                self.state.set_component(Component::Vector, ComponentState::Idle);
            }
            Err(e) => {
                let message = e.to_string();
                self.state.record_component_error(Component::Vector, &message);
                self.metrics.record_error(categorize(&message).category);
                self.state.fail(&message);
                return Err(EngineError::Search(e));
            }
        }

        // Graph is optional: a failure degrades, initialization continues
        if let Some(graph) = &self.graph {
            match graph.initialize().await {
                Ok(()) => {
                    self.state.record_component_success(Component::Graph);
                    self.state.set_component(Component::Graph, ComponentState::Idle);
                }
                Err(e) => {
                    let message = e.to_string();
                    warn!("Graph service unavailable, continuing without it: {}", message);
                    let categorized = self.state.record_component_error(Component::Graph, &message);
                    self.metrics.record_error(categorized.category);
                }
            }
        }

        if !report.reindex_required {
            self.cache.lock().await.load()?;
        }

        self.initialized.store(true, Ordering::SeqCst);
        info!("Manager initialized for {:?}", self.workspace_root);
        Ok(report)
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(EngineError::NotInitialized)
        }
    }

    /// Run a full (or incremental, cache permitting) indexing pass.
    pub async fn start_indexing(&self) -> Result<()> {
        self.ensure_initialized()?;
        if !self.config.read().enabled {
            return Err(EngineError::Configuration(
                "indexing is disabled in the configuration".to_string(),
            ));
        }

        self.state.begin_indexing()?;
        let cancel = CancellationToken::new();
        *self.cancel.lock() = Some(cancel.clone());

        let result = self.run_indexing(cancel.clone()).await;
        *self.cancel.lock() = None;

        match result {
            Ok(true) => {
                if let Err(e) = self.vector_store.mark_indexing_complete().await {
                    warn!("Failed to clear indexing marker: {}", e);
                }
                self.state.finish_indexing();
                self.emit_progress(Some("indexing complete".to_string()), None);
                Ok(())
            }
            Ok(false) => {
                // Cancellation is not an error
                self.state.cancelled();
                self.emit_progress(Some("cancelled by user".to_string()), None);
                Ok(())
            }
            Err(e) => {
                self.state.fail(e.to_string());
                self.emit_progress(Some(e.to_string()), None);
                Err(e)
            }
        }
    }

    /// The indexing body. Returns `Ok(true)` on completion, `Ok(false)` on
    /// cancellation.
    async fn run_indexing(&self, cancel: CancellationToken) -> Result<bool> {
        let started = Instant::now();
        self.processed_files.store(0, Ordering::SeqCst);
        self.processed_blocks.store(0, Ordering::SeqCst);

        if let Err(e) = self.vector_store.mark_indexing_incomplete().await {
            warn!("Failed to set indexing marker: {}", e);
        }

        // Walk and hash off the async workers
        let scanner = Arc::clone(&self.scanner);
        let (files, scan_stats) =
            tokio::task::spawn_blocking(move || scanner.list_files())
                .await
                .map_err(|e| EngineError::Fatal(format!("scan task panicked: {e}")))??;
        self.metrics.add("scan_files_found", scan_stats.files_found as u64);
        self.metrics
            .add("scan_skipped_oversized", scan_stats.skipped_oversized as u64);

        let scanner = Arc::clone(&self.scanner);
        let hash_files = files.clone();
        let hashes: HashMap<String, String> =
            tokio::task::spawn_blocking(move || scanner.hash_files(&hash_files))
                .await
                .map_err(|e| EngineError::Fatal(format!("hash task panicked: {e}")))?
                .into_iter()
                .collect();

        // Decide the work set against the cache
        let (changed, deleted, unchanged) = {
            let cache = self.cache.lock().await;
            let mut changed = Vec::new();
            let mut unchanged = 0usize;
            for file in &files {
                match (hashes.get(file), cache.get(file)) {
                    (Some(new_hash), Some(old_hash)) if new_hash == old_hash => unchanged += 1,
                    (Some(_), _) => changed.push(file.clone()),
                    (None, _) => {}
                }
            }
            let deleted: Vec<String> = cache
                .paths()
                .filter(|p| !hashes.contains_key(*p))
                .map(|p| p.to_string())
                .collect();
            (changed, deleted, unchanged)
        };

        info!(
            "Indexing plan: {} changed, {} deleted, {} unchanged",
            changed.len(),
            deleted.len(),
            unchanged
        );
        self.total_files.store(changed.len(), Ordering::SeqCst);
        self.emit_progress(Some("scanning".to_string()), None);

        // Deletions first
        for path in &deleted {
            if cancel.is_cancelled() {
                return Ok(false);
            }
            self.delete_file_everywhere(path).await;
            let mut cache = self.cache.lock().await;
            cache.delete(path);
        }

        // Parse changed files with bounded concurrency; consume as they come
        let (tx, mut rx) = self.scanner.channel();
        let scanner = Arc::clone(&self.scanner);
        let producer_cancel = cancel.clone();
        let producer = tokio::spawn(async move {
            scanner.scan_files(changed, tx, producer_cancel).await;
        });

        let mut since_persist = 0usize;
        let completed = loop {
            let parsed = tokio::select! {
                _ = cancel.cancelled() => break false,
                parsed = rx.recv() => match parsed {
                    Some(p) => p,
                    None => break true,
                },
            };

            match self.process_file(parsed, &cancel).await {
                Ok(true) => {}
                Ok(false) => break false,
                Err(e) => {
                    // A fatal category aborts the run; everything else was
                    // already degraded inside process_file
                    warn!("File processing error: {}", e);
                    if matches!(e, EngineError::Configuration(_) | EngineError::Fatal(_)) {
                        producer.abort();
                        return Err(e);
                    }
                }
            }

            let processed = self.processed_files.fetch_add(1, Ordering::SeqCst) + 1;
            since_persist += 1;
            if since_persist >= CACHE_PERSIST_INTERVAL {
                since_persist = 0;
                self.cache.lock().await.persist()?;
            }

            let total = self.total_files.load(Ordering::SeqCst);
            let eta = if processed > 0 && total > processed {
                let per_file = started.elapsed().as_secs_f64() / processed as f64;
                Some((per_file * (total - processed) as f64) as u64)
            } else {
                None
            };
            self.emit_progress(Some("indexing".to_string()), eta);
        };

        producer.abort();
        self.cache.lock().await.persist()?;
        self.metrics
            .record_timing("indexing_run", started.elapsed().as_millis() as u64);
        Ok(completed)
    }

    /// Process one parsed file: delete-then-insert into every store, then
    /// record the cache entry. Returns `Ok(false)` on cancellation.
    async fn process_file(&self, parsed: ParsedFile, cancel: &CancellationToken) -> Result<bool> {
        let rel_path = parsed.rel_path;
        let file_hash = parsed.outcome.file_hash.clone();
        if parsed.outcome.used_fallback {
            self.metrics.incr("parser_fallback_files");
        }

        // Deletes precede inserts for the same file
        let had_prior = self.cache.lock().await.get(&rel_path).is_some();
        if had_prior {
            self.delete_file_everywhere(&rel_path).await;
        }

        // Reject items over the per-item token ceiling upstream of batching
        let max_item_tokens = self.batcher.lock().max_item_tokens();
        let mut blocks = parsed.outcome.blocks;
        let before = blocks.len();
        blocks.retain(|b| estimate_tokens(&b.content).tokens <= max_item_tokens);
        if blocks.len() < before {
            self.metrics.add("blocks_oversized", (before - blocks.len()) as u64);
            self.metrics.record_error(ErrorCategory::Data);
        }

        if blocks.is_empty() {
            let mut cache = self.cache.lock().await;
            cache.set(rel_path, file_hash);
            return Ok(true);
        }

        let mut vector_ok = true;
        let mut offset = 0usize;
        while offset < blocks.len() {
            if cancel.is_cancelled() {
                return Ok(false);
            }

            let decision = self.batcher.lock().plan_batch(&blocks[offset..]);
            let take = decision.size.max(1).min(blocks.len() - offset);
            let batch = &blocks[offset..offset + take];
            debug!("Batch of {} blocks ({})", take, decision.reason);

            match self.index_batch(batch, cancel).await {
                Ok(true) => {}
                Ok(false) => vector_ok = false,
                Err(EngineError::Cancelled) => return Ok(false),
                Err(e) => return Err(e),
            }

            self.processed_blocks.fetch_add(take, Ordering::SeqCst);
            offset += take;
        }

        // The cache entry is written only when every store accepted the
        // file; a partial failure leaves the file due for a retry next scan
        if vector_ok {
            let mut cache = self.cache.lock().await;
            cache.set(rel_path, file_hash);
        }
        Ok(true)
    }

    /// Index one batch into all stores. Returns `Ok(false)` when the vector
    /// path failed (sparse/graph writes may still have happened).
    async fn index_batch(&self, batch: &[CodeBlock], cancel: &CancellationToken) -> Result<bool> {
        let batch_started = Instant::now();
        let texts: Vec<String> = batch.iter().map(|b| b.content.clone()).collect();
        let batch_tokens: u64 = batch
            .iter()
            .map(|b| estimate_tokens(&b.content).tokens as u64)
            .sum();

        // Sparse writes cannot fail; do them first so a degraded vector
        // path still leaves the file findable by keyword
        self.bm25.add_many(batch);
        self.hybrid.register_blocks(batch);

        // Graph writes are optional and circuit-protected
        if let Some(graph) = &self.graph {
            if self.state.component(Component::Graph) != ComponentState::Disabled
                && !self.state.writes_suspended(Component::Graph)
            {
                let (nodes, relationships) = graph_items_from_blocks(batch);
                let write = async {
                    graph.upsert_nodes(nodes).await?;
                    graph.create_relationships(relationships).await
                };
                match write.await {
                    Ok(()) => self.state.record_component_success(Component::Graph),
                    Err(e) => {
                        let categorized =
                            self.state.record_component_error(Component::Graph, &e.to_string());
                        self.metrics.record_error(categorized.category);
                    }
                }
            }
        }

        // Dense path: rate-limited, validated, retried
        let vectors = match self.embed_with_retry(&texts, batch_tokens, cancel).await {
            Ok(vectors) => vectors,
            Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
            Err(e) => {
                self.batcher.lock().record(BatchPerformance {
                    latency_ms: batch_started.elapsed().as_millis() as u64,
                    success: false,
                    batch_size: batch.len(),
                });
                let categorized =
                    self.state.record_component_error(Component::Vector, &e.to_string());
                self.metrics.record_error(categorized.category);
                // Auth and configuration failures will not heal on retry
                if categorized.category == ErrorCategory::Auth {
                    return Err(EngineError::Configuration(format!(
                        "embedding provider rejected credentials: {e}"
                    )));
                }
                return Ok(false);
            }
        };

        let points: Vec<Point> = batch
            .iter()
            .zip(vectors)
            .map(|(block, embedding)| Point {
                segment_id: block.segment_id.clone(),
                embedding,
                payload: PointPayload::from_block(block),
            })
            .collect();

        match self.vector_store.upsert(points).await {
            Ok(()) => {
                self.state.record_component_success(Component::Vector);
                self.batcher.lock().record(BatchPerformance {
                    latency_ms: batch_started.elapsed().as_millis() as u64,
                    success: true,
                    batch_size: batch.len(),
                });
                Ok(true)
            }
            Err(e) => {
                let categorized =
                    self.state.record_component_error(Component::Vector, &e.to_string());
                self.metrics.record_error(categorized.category);
                self.batcher.lock().record(BatchPerformance {
                    latency_ms: batch_started.elapsed().as_millis() as u64,
                    success: false,
                    batch_size: batch.len(),
                });
                Ok(false)
            }
        }
    }

    /// Embed a batch under the rate limiter, retrying per the error
    /// taxonomy up to [`MAX_BATCH_RETRIES`].
    async fn embed_with_retry(
        &self,
        texts: &[String],
        batch_tokens: u64,
        cancel: &CancellationToken,
    ) -> Result<Vec<Vec<f32>>> {
        let provider = self.provider_name.as_str();
        let mut attempt = 0u32;

        loop {
            // Limiter gate: suspend (cancellably) as directed
            loop {
                match self.limiter.can_request(provider, batch_tokens as f64) {
                    RateDecision::Proceed => break,
                    RateDecision::Wait { wait_ms, reason } => {
                        debug!("Rate limiter: wait {}ms ({:?})", wait_ms, reason);
                        tokio::select! {
                            _ = cancel.cancelled() => {
                                return Err(EngineError::Cancelled)
                            }
                            _ = tokio::time::sleep(Duration::from_millis(wait_ms)) => {}
                        }
                    }
                }
            }

            let started = Instant::now();
            match self.embedder.embed_batch(texts.to_vec()).await {
                Ok(vectors) => {
                    self.limiter.record_success(provider);
                    self.metrics.record_provider(provider, batch_tokens, true);
                    self.metrics
                        .record_timing("embed_batch", started.elapsed().as_millis() as u64);
                    return Ok(vectors);
                }
                Err(e) => {
                    self.metrics.record_provider(provider, batch_tokens, false);
                    let categorized = categorize(&e.to_string());
                    self.metrics.record_error(categorized.category);

                    if attempt >= MAX_BATCH_RETRIES {
                        return Err(EngineError::Search(e));
                    }
                    attempt += 1;

                    match categorized.retry {
                        Some(RetryAdvice::UseLimiterSchedule) => {
                            self.limiter.record_rate_limit_error(provider);
                            tokio::select! {
                                _ = cancel.cancelled() => {
                                    return Err(EngineError::Cancelled)
                                }
                                _ = self.limiter.wait_for_reset(provider) => {}
                            }
                        }
                        Some(RetryAdvice::RetryWithBackoff) => {
                            let delay = RETRY_BASE_DELAY * 2u32.saturating_pow(attempt - 1);
                            tokio::select! {
                                _ = cancel.cancelled() => {
                                    return Err(EngineError::Cancelled)
                                }
                                _ = tokio::time::sleep(delay) => {}
                            }
                        }
                        // Shrinking is handled by the optimizer reading the
                        // failure from its history; no point retrying the
                        // same oversized batch
                        _ => return Err(EngineError::Search(e)),
                    }
                }
            }
        }
    }

    /// Remove a file's blocks from every store.
    async fn delete_file_everywhere(&self, rel_path: &str) {
        if let Err(e) = self.vector_store.delete_by_file(rel_path).await {
            let categorized = self.state.record_component_error(Component::Vector, &e.to_string());
            self.metrics.record_error(categorized.category);
        }
        self.bm25.remove_by_file(rel_path);
        self.hybrid.remove_file(rel_path);
        if let Some(graph) = &self.graph {
            if self.state.component(Component::Graph) != ComponentState::Disabled
                && !self.state.writes_suspended(Component::Graph)
            {
                if let Err(e) = graph.delete_nodes_by_file(rel_path).await {
                    let categorized =
                        self.state.record_component_error(Component::Graph, &e.to_string());
                    self.metrics.record_error(categorized.category);
                }
            }
        }
    }

    /// Signal every outstanding indexing task to stop.
    ///
    /// Idempotent; in-flight tasks observe the token at their next
    /// suspension point and the run ends in Standby, not Error.
    pub fn cancel_indexing(&self) {
        if let Some(cancel) = self.cancel.lock().as_ref() {
            info!("Cancelling indexing");
            cancel.cancel();
        }
    }

    // ------------------------------------------------------------------
    // Watcher
    // ------------------------------------------------------------------

    /// Start consuming file events. Batches are debounced and drive the
    /// incremental pipeline. Returns immediately; processing runs in the
    /// background until `stop_watcher` or manager teardown.
    pub fn start_watcher(self: &Arc<Self>, events: mpsc::Receiver<FileEvent>) {
        let cancel = CancellationToken::new();
        *self.watcher_cancel.lock() = Some(cancel.clone());

        let (batch_tx, mut batch_rx) = mpsc::channel::<ChangeBatch>(8);
        let debouncer_cancel = cancel.clone();
        tokio::spawn(async move {
            ChangeDebouncer::new()
                .run(events, batch_tx, debouncer_cancel)
                .await;
        });

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let batch = tokio::select! {
                    _ = cancel.cancelled() => break,
                    batch = batch_rx.recv() => match batch {
                        Some(b) => b,
                        None => break,
                    },
                };
                if let Err(e) = manager.process_change_batch(batch, &cancel).await {
                    warn!("Incremental update failed: {}", e);
                }
            }
            debug!("Watcher loop stopped");
        });
    }

    /// Stop the watcher loop. Idempotent.
    pub fn stop_watcher(&self) {
        if let Some(cancel) = self.watcher_cancel.lock().take() {
            cancel.cancel();
        }
    }

    /// Apply one coalesced change batch: unchanged files are skipped,
    /// changed files re-indexed, deleted files removed everywhere.
    pub async fn process_change_batch(
        &self,
        batch: ChangeBatch,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.ensure_initialized()?;
        info!(
            "Incremental update: {} changed, {} deleted",
            batch.changed.len(),
            batch.deleted.len()
        );

        for path in &batch.deleted {
            self.delete_file_everywhere(path).await;
            let mut cache = self.cache.lock().await;
            cache.delete(path);
        }

        for path in &batch.changed {
            if cancel.is_cancelled() {
                break;
            }
            let scanner = Arc::clone(&self.scanner);
            let parse_path = path.clone();
            let parsed = tokio::task::spawn_blocking(move || {
                scanner.parse_one(&parse_path)
            })
            .await
            .map_err(|e| EngineError::Fatal(format!("parse task panicked: {e}")))?;

            let parsed = match parsed {
                Ok(Some(p)) => p,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Skipping unparsable file {}: {}", path, e);
                    self.metrics.record_error(ErrorCategory::Data);
                    continue;
                }
            };

            // Unchanged content: zero writes
            let cached = self.cache.lock().await.get(path).map(|h| h.to_string());
            if cached.as_deref() == Some(parsed.outcome.file_hash.as_str()) {
                debug!("Unchanged file {}, skipping", path);
                continue;
            }

            self.process_file(parsed, cancel).await?;
        }

        self.cache.lock().await.persist()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Query and control
    // ------------------------------------------------------------------

    /// Route a search through the orchestrator with configured defaults.
    pub async fn search(&self, query: &str, options: SearchOptions) -> Result<SearchResponse> {
        self.ensure_initialized()?;
        let defaults = {
            let config = self.config.read();
            SearchDefaults {
                max_results: config.search.max_results,
                min_score: config.search.min_score,
            }
        };
        let graph = match self.state.component(Component::Graph) {
            ComponentState::Disabled => None,
            _ => self.graph.clone(),
        };
        let orchestrator = SearchOrchestrator::new(Arc::clone(&self.hybrid), graph, defaults);
        Ok(orchestrator.search(query, options).await?)
    }

    /// Wipe every store and the cache. Idempotent: clearing twice leaves
    /// the same empty state.
    pub async fn clear_index_data(&self) -> Result<()> {
        self.cancel_indexing();
        self.vector_store.clear_collection().await?;
        self.bm25.clear();
        self.hybrid.clear();
        if let Some(graph) = &self.graph {
            if let Err(e) = graph.clear_all().await {
                warn!("Graph clear failed: {}", e);
            }
        }
        {
            let mut cache = self.cache.lock().await;
            cache.clear();
            cache.persist()?;
        }
        self.processed_files.store(0, Ordering::SeqCst);
        self.processed_blocks.store(0, Ordering::SeqCst);
        self.total_files.store(0, Ordering::SeqCst);
        self.state.reset();
        info!("Index data cleared");
        Ok(())
    }

    /// Apply a settings change. Minor changes (search tuning) take effect
    /// in place; critical changes report `requires_restart` and the caller
    /// rebuilds the pipeline.
    pub fn handle_settings_change(&self, new_config: ScoutConfig) -> Result<SettingsOutcome> {
        new_config
            .validate()
            .map_err(|e| EngineError::Configuration(e.to_string()))?;

        let change = self.config.read().classify_change(&new_config);
        match change {
            ConfigChange::None => Ok(SettingsOutcome {
                requires_restart: false,
            }),
            ConfigChange::Minor => {
                *self.config.write() = new_config;
                info!("Applied minor settings change in place");
                Ok(SettingsOutcome {
                    requires_restart: false,
                })
            }
            ConfigChange::Critical => Ok(SettingsOutcome {
                requires_restart: true,
            }),
        }
    }

    /// Current status for hosts and the CLI.
    pub async fn get_current_status(&self) -> StatusReport {
        StatusReport {
            state: self.state.snapshot(),
            cached_files: self.cache.lock().await.len(),
            bm25: self.bm25.stats(),
            embedder: self.embedder.info(),
            processed_files: self.processed_files.load(Ordering::SeqCst),
            total_files: self.total_files.load(Ordering::SeqCst),
            processed_blocks: self.processed_blocks.load(Ordering::SeqCst),
        }
    }

    /// Error → Standby, closing the circuit breakers.
    pub fn recover_from_error(&self) {
        self.state.recover();
        info!("Recovered from error state");
    }

    /// One JSON document with everything a bug report needs. Credentials
    /// are masked.
    pub async fn get_diagnostic_snapshot(&self) -> serde_json::Value {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let status = self.get_current_status().await;
        let masked_config = self.config.read().masked();

        json!({
            "timestamp": timestamp,
            "workspace": self.workspace_root.display().to_string(),
            "state": status.state,
            "metrics": self.metrics.snapshot(),
            "components": {
                "embedder": status.embedder,
                "vector_dimension": self.embedder.dimension(),
                "bm25": status.bm25,
                "graph_enabled": self.graph.is_some(),
            },
            "configuration": masked_config,
        })
    }

    fn emit_progress(&self, message: Option<String>, eta: Option<u64>) {
        let snapshot = self.state.snapshot();
        self.progress.emit(ProgressEvent {
            system_state: snapshot.system,
            vector_state: snapshot.vector,
            graph_state: snapshot.graph,
            processed_files: self.processed_files.load(Ordering::SeqCst),
            total_files: self.total_files.load(Ordering::SeqCst),
            processed_blocks: self.processed_blocks.load(Ordering::SeqCst),
            current_op: match snapshot.system {
                SystemState::Indexing => Some("indexing".to_string()),
                _ => None,
            },
            estimated_remaining_seconds: eta,
            message,
        });
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Per-workspace manager registry.
///
/// At most one manager exists per workspace path, which is what prevents
/// two writers from racing on the same stores. Lookups return handles, not
/// globals.
#[derive(Default)]
pub struct ManagerRegistry {
    managers: Mutex<HashMap<PathBuf, Arc<IndexManager>>>,
}

impl ManagerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the manager for a workspace.
    pub fn get(&self, workspace_root: &Path) -> Option<Arc<IndexManager>> {
        self.managers.lock().get(workspace_root).cloned()
    }

    /// Register a manager. Fails when the workspace already has one.
    pub fn register(&self, manager: Arc<IndexManager>) -> Result<()> {
        let mut managers = self.managers.lock();
        let key = manager.workspace_root().to_path_buf();
        if managers.contains_key(&key) {
            return Err(EngineError::Configuration(format!(
                "a manager is already registered for {key:?}"
            )));
        }
        managers.insert(key, manager);
        Ok(())
    }

    /// Remove a workspace's manager, returning it for teardown.
    pub fn remove(&self, workspace_root: &Path) -> Option<Arc<IndexManager>> {
        self.managers.lock().remove(workspace_root)
    }

    /// Number of registered managers.
    pub fn len(&self) -> usize {
        self.managers.lock().len()
    }

    /// Whether no managers are registered.
    pub fn is_empty(&self) -> bool {
        self.managers.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_enforces_one_manager_per_workspace() {
        use crate::events::NullProgress;
        use codescout_search::{HashEmbedder, MemoryVectorStore};

        let registry = ManagerRegistry::new();
        let make = || {
            Arc::new(IndexManager::new(
                "/tmp/ws",
                ScoutConfig::default(),
                IndexPorts {
                    embedder: Arc::new(HashEmbedder::new(16)),
                    vector_store: Arc::new(MemoryVectorStore::new(16)),
                    graph: None,
                },
                Arc::new(NullProgress),
            ))
        };

        registry.register(make()).unwrap();
        assert!(registry.register(make()).is_err());
        assert_eq!(registry.len(), 1);

        registry.remove(Path::new("/tmp/ws")).unwrap();
        assert!(registry.is_empty());
        registry.register(make()).unwrap();
    }
}
