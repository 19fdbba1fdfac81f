//! Core Data Model for CodeScout Indexing
//!
//! Defines the indexed unit ([`CodeBlock`]), the vector-store record
//! ([`Point`]), and the content-addressed identifiers that join the vector,
//! BM25, and graph stores.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ============================================================================
// Hashing
// ============================================================================

/// Compute the hex-encoded SHA-256 hash of raw file bytes.
pub fn compute_file_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Compute the hex-encoded SHA-256 hash of a block's trimmed content.
///
/// Trimming makes the hash insensitive to leading/trailing whitespace churn,
/// so a re-indented block keeps its identity.
pub fn compute_content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.trim().as_bytes());
    hex::encode(hasher.finalize())
}

/// Compute a stable segment id from a block's file hash, content hash, and
/// line range.
///
/// The segment id is the document identity in every store (vector, BM25,
/// graph). It is deterministic: re-scanning an unchanged file reproduces the
/// same ids, which is what makes incremental reindexing cheap.
pub fn compute_segment_id(file_hash: &str, content_hash: &str, start_line: u32, end_line: u32) -> SegmentId {
    let mut hasher = Sha256::new();
    hasher.update(file_hash.as_bytes());
    hasher.update(content_hash.as_bytes());
    hasher.update(start_line.to_le_bytes());
    hasher.update(end_line.to_le_bytes());
    let digest = hasher.finalize();
    // 16 bytes of the digest is plenty for corpus-level uniqueness
    SegmentId(hex::encode(&digest[..16]))
}

/// Stable content-addressed identifier for an indexed code block.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentId(pub String);

impl SegmentId {
    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derive a numeric id for stores that key points by `u64`.
    ///
    /// Uses the first 8 bytes of the hex id; the mapping is deterministic
    /// so upserts for the same segment overwrite rather than duplicate.
    pub fn as_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        if let Ok(decoded) = hex::decode(&self.0) {
            for (i, b) in decoded.iter().take(8).enumerate() {
                bytes[i] = *b;
            }
        }
        u64::from_le_bytes(bytes)
    }
}

impl std::fmt::Display for SegmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SegmentId {
    fn from(s: &str) -> Self {
        SegmentId(s.to_string())
    }
}

// ============================================================================
// Block Types
// ============================================================================

/// Kind of code entity a block represents.
///
/// `Chunk` is used by the fallback line chunker when no AST information is
/// available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BlockType {
    Function,
    Method,
    Class,
    Interface,
    Struct,
    Enum,
    Module,
    Variable,
    Import,
    #[default]
    Chunk,
}

impl BlockType {
    /// Get the string representation used in store payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockType::Function => "function",
            BlockType::Method => "method",
            BlockType::Class => "class",
            BlockType::Interface => "interface",
            BlockType::Struct => "struct",
            BlockType::Enum => "enum",
            BlockType::Module => "module",
            BlockType::Variable => "variable",
            BlockType::Import => "import",
            BlockType::Chunk => "chunk",
        }
    }
}

impl std::fmt::Display for BlockType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Code Blocks
// ============================================================================

/// Optional symbol-level metadata attached to a block.
///
/// All fields are best-effort; absence never fails indexing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SymbolMetadata {
    /// Visibility: "public", "private", "protected", "internal"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility: Option<String>,

    /// Async callable
    #[serde(rename = "async", skip_serializing_if = "Option::is_none")]
    pub is_async: Option<bool>,

    /// Static member
    #[serde(rename = "static", skip_serializing_if = "Option::is_none")]
    pub is_static: Option<bool>,

    /// Fully-qualified parent (class/module) name, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

/// An indexed unit: a contiguous span of source code.
///
/// Produced by the parser, embedded by the batch pipeline, and stored under
/// its [`SegmentId`] in the vector, BM25, and graph stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeBlock {
    /// Path relative to the workspace root
    pub file_path: String,
    /// 1-based first line of the block
    pub start_line: u32,
    /// 1-based last line of the block (inclusive)
    pub end_line: u32,
    /// Symbol name, when the block corresponds to a named entity
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    /// Kind of entity
    pub block_type: BlockType,
    /// Raw block text
    pub content: String,
    /// SHA-256 over trimmed content
    pub content_hash: String,
    /// SHA-256 over the whole file's bytes
    pub file_hash: String,
    /// Stable join key across all stores
    pub segment_id: SegmentId,

    // --- Optional enrichments ---
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol_metadata: Option<SymbolMetadata>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub imports: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exports: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,
    /// Opaque type annotation from an LSP, when one was attached
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lsp_type_info: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub calls: Vec<String>,
}

impl CodeBlock {
    /// Build a block, deriving content hash and segment id from the inputs.
    pub fn new(
        file_path: impl Into<String>,
        file_hash: impl Into<String>,
        start_line: u32,
        end_line: u32,
        content: impl Into<String>,
        block_type: BlockType,
    ) -> Self {
        let file_path = file_path.into();
        let file_hash = file_hash.into();
        let content = content.into();
        let content_hash = compute_content_hash(&content);
        let segment_id = compute_segment_id(&file_hash, &content_hash, start_line, end_line);

        Self {
            file_path,
            start_line,
            end_line,
            identifier: None,
            block_type,
            content,
            content_hash,
            file_hash,
            segment_id,
            symbol_metadata: None,
            imports: Vec::new(),
            exports: Vec::new(),
            documentation: None,
            lsp_type_info: None,
            calls: Vec::new(),
        }
    }

    /// Set the symbol name.
    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    /// Number of lines spanned by the block.
    pub fn line_count(&self) -> u32 {
        self.end_line.saturating_sub(self.start_line) + 1
    }
}

// ============================================================================
// Vector Store Points
// ============================================================================

/// Payload stored alongside each vector: the subset of [`CodeBlock`] the
/// search orchestrator needs without re-reading files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PointPayload {
    pub file_path: String,
    pub start_line: u32,
    pub end_line: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    pub block_type: BlockType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exports: Vec<String>,
    /// Block text, truncated for payload size limits
    pub content: String,
}

/// Maximum characters of block content carried in a payload.
///
/// Truncation preserves the prefix at a char boundary.
pub const MAX_PAYLOAD_CONTENT_CHARS: usize = 4096;

impl PointPayload {
    /// Build a payload from a block, truncating content as needed.
    pub fn from_block(block: &CodeBlock) -> Self {
        Self {
            file_path: block.file_path.clone(),
            start_line: block.start_line,
            end_line: block.end_line,
            identifier: block.identifier.clone(),
            block_type: block.block_type,
            exports: block.exports.clone(),
            content: truncate_chars(&block.content, MAX_PAYLOAD_CONTENT_CHARS),
        }
    }
}

/// What the vector store holds for one block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub segment_id: SegmentId,
    pub embedding: Vec<f32>,
    pub payload: PointPayload,
}

/// Truncate a string to at most `max` characters, preserving the prefix.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_id_stable_for_same_content() {
        let a = compute_segment_id("fh", "ch", 1, 10);
        let b = compute_segment_id("fh", "ch", 1, 10);
        assert_eq!(a, b);
    }

    #[test]
    fn test_segment_id_changes_with_line_range() {
        let a = compute_segment_id("fh", "ch", 1, 10);
        let b = compute_segment_id("fh", "ch", 2, 10);
        assert_ne!(a, b);
    }

    #[test]
    fn test_content_hash_ignores_outer_whitespace() {
        assert_eq!(
            compute_content_hash("  fn main() {}\n"),
            compute_content_hash("fn main() {}")
        );
    }

    #[test]
    fn test_block_derives_ids() {
        let block = CodeBlock::new("src/lib.rs", "abc", 5, 9, "fn f() {}", BlockType::Function);
        assert_eq!(block.content_hash, compute_content_hash("fn f() {}"));
        assert_eq!(
            block.segment_id,
            compute_segment_id("abc", &block.content_hash, 5, 9)
        );
        assert_eq!(block.line_count(), 5);
    }

    #[test]
    fn test_segment_id_as_u64_deterministic() {
        let id = compute_segment_id("fh", "ch", 1, 2);
        assert_eq!(id.as_u64(), id.as_u64());
        assert_ne!(id.as_u64(), 0);
    }

    #[test]
    fn test_truncate_chars_preserves_prefix() {
        assert_eq!(truncate_chars("hello", 3), "hel");
        assert_eq!(truncate_chars("hi", 10), "hi");
    }

    #[test]
    fn test_payload_from_block_carries_exports() {
        let mut block = CodeBlock::new("a.ts", "fh", 1, 2, "export class A {}", BlockType::Class);
        block.exports.push("A".to_string());
        let payload = PointPayload::from_block(&block);
        assert_eq!(payload.exports, vec!["A".to_string()]);
        assert_eq!(payload.block_type, BlockType::Class);
    }
}
