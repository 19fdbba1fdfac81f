//! CodeScout Core - Code block extraction and sparse indexing
//!
//! This crate provides the CPU-bound leaves of the indexing engine:
//! - Tree-sitter semantic splitting with line-chunking fallback
//! - Content hashing and the per-file hash cache behind incremental updates
//! - The in-memory BM25 inverted index
//! - The workspace scanner (gitignore-aware, bounded concurrency)
//! - The code-relationship graph model

pub mod bm25;
pub mod cache;
pub mod graph;
pub mod parser;
pub mod scanner;
pub mod types;

// Re-exports for convenience
pub use bm25::{Bm25Index, Bm25Params, Bm25Stats};
pub use cache::{CacheError, FileHashCache, CACHE_FILE_NAME};
pub use graph::{CodeGraph, GraphEdgeKind, GraphNode, GraphNodeKind, GraphRelationship};
pub use parser::{chunk_lines, CodeParser, ParseError, ParseOutcome, ParserLimits, SupportedLanguage};
pub use scanner::{ParsedFile, ScanError, ScanStats, Scanner, ScannerConfig};
pub use types::{
    compute_content_hash, compute_file_hash, compute_segment_id, truncate_chars, BlockType,
    CodeBlock, Point, PointPayload, SegmentId, SymbolMetadata,
};
