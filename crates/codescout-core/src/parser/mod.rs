//! Semantic Code Splitting
//!
//! Parses source files with tree-sitter and splits them into [`CodeBlock`]s
//! at semantic boundaries (functions, classes, impls, ...). Three limits
//! govern the split:
//!
//! - a **target** size blocks are coalesced toward,
//! - an absolute **maximum**: oversized nodes are split at the deepest
//!   contained boundary, or by lines when no boundary fits,
//! - a **minimum**: smaller blocks are dropped.
//!
//! Unsupported languages and failed parses degrade to line-aware chunking
//! ([`fallback::chunk_lines`]); that path is reported so the caller can
//! count it. Enrichment (identifier, documentation, imports, exports,
//! calls) is best-effort and never fails a block.

mod fallback;
mod languages;

pub use fallback::chunk_lines;
pub use languages::SupportedLanguage;

use std::path::Path;

use thiserror::Error;
use tracing::{debug, warn};
use tree_sitter::{Node, Parser};

use crate::types::{compute_file_hash, BlockType, CodeBlock};

// ============================================================================
// Errors
// ============================================================================

/// Errors that abort parsing of a whole file.
///
/// AST-level failures are not errors: they degrade to fallback chunking.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The file could not be read
    #[error("Failed to read {path}: {source}")]
    Unreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid UTF-8
    #[error("Failed to decode {path} as UTF-8")]
    Decode { path: String },
}

/// Result type for parser operations.
pub type Result<T> = std::result::Result<T, ParseError>;

// ============================================================================
// Limits
// ============================================================================

/// Size limits for semantic splitting, in characters.
#[derive(Debug, Clone, Copy)]
pub struct ParserLimits {
    /// Preferred block size; small sibling nodes coalesce toward it
    pub target_chars: usize,
    /// Hard ceiling; larger nodes are split at a deeper boundary
    pub max_chars: usize,
    /// Blocks below this are discarded
    pub min_chars: usize,
}

impl Default for ParserLimits {
    fn default() -> Self {
        Self {
            target_chars: 1_000,
            max_chars: 4_000,
            min_chars: 100,
        }
    }
}

// ============================================================================
// Parse Outcome
// ============================================================================

/// Output of parsing one file.
#[derive(Debug, Default)]
pub struct ParseOutcome {
    /// Extracted blocks, in file order
    pub blocks: Vec<CodeBlock>,
    /// Whether the line chunker was used instead of the AST
    pub used_fallback: bool,
    /// Detected language, when one was
    pub language: Option<SupportedLanguage>,
    /// Hash of the file's bytes
    pub file_hash: String,
}

// ============================================================================
// Code Parser
// ============================================================================

/// Splits files into semantic code blocks.
///
/// Stateless apart from its limits: each parse builds a fresh tree-sitter
/// parser, so a single `CodeParser` may be shared across threads.
#[derive(Debug, Clone, Default)]
pub struct CodeParser {
    limits: ParserLimits,
}

impl CodeParser {
    /// Create a parser with default limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a parser with custom limits.
    pub fn with_limits(limits: ParserLimits) -> Self {
        Self { limits }
    }

    /// The configured limits.
    pub fn limits(&self) -> &ParserLimits {
        &self.limits
    }

    /// Read and parse a file under the workspace root.
    ///
    /// `rel_path` is recorded verbatim on every block.
    pub fn parse_file(&self, workspace_root: &Path, rel_path: &str) -> Result<ParseOutcome> {
        let full_path = workspace_root.join(rel_path);
        let bytes = std::fs::read(&full_path).map_err(|source| ParseError::Unreadable {
            path: rel_path.to_string(),
            source,
        })?;
        let source = String::from_utf8(bytes).map_err(|_| ParseError::Decode {
            path: rel_path.to_string(),
        })?;
        let file_hash = compute_file_hash(source.as_bytes());
        Ok(self.parse_source(&source, rel_path, &file_hash))
    }

    /// Parse in-memory source. Never fails: parse problems degrade to the
    /// line chunker.
    pub fn parse_source(&self, source: &str, rel_path: &str, file_hash: &str) -> ParseOutcome {
        let language = SupportedLanguage::from_path(Path::new(rel_path));

        let Some(language) = language else {
            debug!("No grammar for {}, using line chunker", rel_path);
            return self.fallback_outcome(source, rel_path, file_hash, None);
        };

        let mut parser = Parser::new();
        if parser.set_language(&language.tree_sitter_language()).is_err() {
            warn!("Grammar rejected for {}, using line chunker", language);
            return self.fallback_outcome(source, rel_path, file_hash, Some(language));
        }

        let Some(tree) = parser.parse(source, None) else {
            warn!("Parse failed for {}, using line chunker", rel_path);
            return self.fallback_outcome(source, rel_path, file_hash, Some(language));
        };

        let root = tree.root_node();
        if root.has_error() {
            debug!("Syntax errors in {}, using line chunker", rel_path);
            return self.fallback_outcome(source, rel_path, file_hash, Some(language));
        }

        let mut splitter = Splitter {
            source,
            rel_path,
            file_hash,
            language,
            limits: &self.limits,
            file_imports: Vec::new(),
            blocks: Vec::new(),
            pending: None,
        };
        splitter.collect_children(root, false);
        splitter.flush_pending();

        let mut blocks = splitter.blocks;
        let file_imports = splitter.file_imports;
        for block in &mut blocks {
            block.imports = file_imports.clone();
        }

        ParseOutcome {
            blocks,
            used_fallback: false,
            language: Some(language),
            file_hash: file_hash.to_string(),
        }
    }

    fn fallback_outcome(
        &self,
        source: &str,
        rel_path: &str,
        file_hash: &str,
        language: Option<SupportedLanguage>,
    ) -> ParseOutcome {
        ParseOutcome {
            blocks: chunk_lines(source, rel_path, file_hash, &self.limits),
            used_fallback: true,
            language,
            file_hash: file_hash.to_string(),
        }
    }
}

// ============================================================================
// Splitter
// ============================================================================

/// Span accumulated from consecutive small sibling nodes.
struct Pending {
    start_byte: usize,
    end_byte: usize,
    start_line: u32,
    end_line: u32,
}

struct Splitter<'a> {
    source: &'a str,
    rel_path: &'a str,
    file_hash: &'a str,
    language: SupportedLanguage,
    limits: &'a ParserLimits,
    file_imports: Vec<String>,
    blocks: Vec<CodeBlock>,
    pending: Option<Pending>,
}

impl<'a> Splitter<'a> {
    /// Walk the named children of `node`, emitting blocks.
    fn collect_children(&mut self, node: Node<'a>, inherited_export: bool) {
        let mut cursor = node.walk();
        let children: Vec<Node<'a>> = node.named_children(&mut cursor).collect();
        for child in children {
            self.visit(child, inherited_export);
        }
    }

    fn visit(&mut self, node: Node<'a>, inherited_export: bool) {
        let kind = node.kind();

        // Comments are documentation for the next block, never blocks themselves
        if kind.contains("comment") {
            return;
        }

        // Export wrappers: classify the wrapped declaration, remember the export
        if kind == "export_statement" {
            if let Some(decl) = node.named_child(0) {
                if self.language.block_type_for_node(decl.kind()).is_some() {
                    self.visit(decl, true);
                    return;
                }
            }
        }

        let size = node.end_byte() - node.start_byte();
        let block_type = self.language.block_type_for_node(kind);

        if block_type == Some(BlockType::Import) {
            self.flush_pending();
            if let Ok(text) = node.utf8_text(self.source.as_bytes()) {
                self.file_imports.push(text.trim().to_string());
            }
            return;
        }

        if size > self.limits.max_chars {
            self.flush_pending();
            // Oversized: split at the deepest boundary that fits
            if self.language.is_container_node(kind) || block_type.is_none() {
                let before = self.blocks.len();
                self.collect_children(node, inherited_export);
                self.flush_pending();
                if self.blocks.len() == before {
                    self.line_split(node);
                }
            } else {
                self.line_split(node);
            }
            return;
        }

        match block_type {
            Some(bt) => {
                if size >= self.limits.min_chars {
                    self.flush_pending();
                    self.emit_block(node, bt, inherited_export);
                } else {
                    self.accumulate(node);
                }
            }
            None => {
                // Not a boundary; small unmapped nodes join the pending run
                if size >= self.limits.min_chars && node.named_child_count() > 0 {
                    // Might contain boundaries (e.g. an if-guard around defs)
                    let before = self.blocks.len();
                    self.collect_children(node, inherited_export);
                    if self.blocks.len() == before {
                        self.accumulate(node);
                    }
                } else {
                    self.accumulate(node);
                }
            }
        }
    }

    /// Merge a small node into the pending span; flush at the target size.
    fn accumulate(&mut self, node: Node<'a>) {
        let start_line = node.start_position().row as u32 + 1;
        let end_line = node.end_position().row as u32 + 1;

        match &mut self.pending {
            Some(pending) => {
                pending.end_byte = node.end_byte();
                pending.end_line = end_line;
            }
            None => {
                self.pending = Some(Pending {
                    start_byte: node.start_byte(),
                    end_byte: node.end_byte(),
                    start_line,
                    end_line,
                });
            }
        }

        let pending = self.pending.as_ref().expect("pending just set");
        if pending.end_byte - pending.start_byte >= self.limits.target_chars {
            self.flush_pending();
        }
    }

    fn flush_pending(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        let content = &self.source[pending.start_byte..pending.end_byte];
        if content.trim().len() < self.limits.min_chars {
            return;
        }
        self.blocks.push(CodeBlock::new(
            self.rel_path,
            self.file_hash,
            pending.start_line,
            pending.end_line,
            content,
            BlockType::Chunk,
        ));
    }

    fn emit_block(&mut self, node: Node<'a>, block_type: BlockType, inherited_export: bool) {
        let content = &self.source[node.start_byte()..node.end_byte()];
        let mut block = CodeBlock::new(
            self.rel_path,
            self.file_hash,
            node.start_position().row as u32 + 1,
            node.end_position().row as u32 + 1,
            content,
            block_type,
        );

        // Best-effort enrichment; nothing here may fail the block
        if let Some(name) = extract_identifier(node, self.source) {
            if inherited_export || is_exported(node, self.source, &name, self.language) {
                block.exports.push(name.clone());
            }
            block.identifier = Some(name);
        }
        block.documentation = extract_documentation(node, self.source);
        block.calls = extract_calls(node, self.source);

        self.blocks.push(block);
    }

    /// Split an oversized leaf node by lines, offsetting line numbers to the
    /// node's position in the file.
    fn line_split(&mut self, node: Node<'a>) {
        let content = &self.source[node.start_byte()..node.end_byte()];
        let offset = node.start_position().row as u32;
        for mut block in chunk_lines(content, self.rel_path, self.file_hash, self.limits) {
            let start = block.start_line + offset;
            let end = block.end_line + offset;
            // Re-derive with corrected line numbers so the segment id matches
            block = CodeBlock::new(
                self.rel_path,
                self.file_hash,
                start,
                end,
                block.content,
                BlockType::Chunk,
            );
            self.blocks.push(block);
        }
    }
}

// ============================================================================
// Enrichment helpers
// ============================================================================

/// Extract the declared name of a node, when it has one.
fn extract_identifier(node: Node<'_>, source: &str) -> Option<String> {
    if let Some(name) = node.child_by_field_name("name") {
        return name.utf8_text(source.as_bytes()).ok().map(|s| s.to_string());
    }
    // decorated_definition and friends: name lives on the inner definition
    if let Some(inner) = node.child_by_field_name("definition") {
        return extract_identifier(inner, source);
    }
    // declarations without a name field: first identifier-ish child
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        let kind = child.kind();
        if kind == "identifier" || kind == "type_identifier" || kind == "field_identifier" {
            return child.utf8_text(source.as_bytes()).ok().map(|s| s.to_string());
        }
        if kind == "variable_declarator" {
            return extract_identifier(child, source);
        }
    }
    None
}

/// Whether a declaration is visible outside its file.
fn is_exported(node: Node<'_>, source: &str, name: &str, language: SupportedLanguage) -> bool {
    match language {
        SupportedLanguage::Rust => {
            let mut cursor = node.walk();
            let result = node
                .children(&mut cursor)
                .any(|c| c.kind() == "visibility_modifier");
            result
        }
        SupportedLanguage::Python => !name.starts_with('_'),
        SupportedLanguage::Go => name.chars().next().map(|c| c.is_uppercase()).unwrap_or(false),
        SupportedLanguage::CSharp => {
            let mut cursor = node.walk();
            let result = node.children(&mut cursor).any(|c| {
                c.kind() == "modifier"
                    && c.utf8_text(source.as_bytes())
                        .map(|t| t == "public")
                        .unwrap_or(false)
            });
            result
        }
        // JS/TS exports are carried by the export_statement wrapper
        _ => false,
    }
}

/// The comment immediately preceding a node, when there is one.
fn extract_documentation(node: Node<'_>, source: &str) -> Option<String> {
    let mut sibling = node.prev_named_sibling()?;
    // Skip decorators back to the comment
    while sibling.kind() == "decorator" || sibling.kind() == "attribute_item" {
        sibling = sibling.prev_named_sibling()?;
    }
    if !sibling.kind().contains("comment") {
        return None;
    }
    // Only adjacent comments count as documentation
    if node.start_position().row - sibling.end_position().row > 1 {
        return None;
    }
    sibling.utf8_text(source.as_bytes()).ok().map(|s| s.to_string())
}

/// Maximum distinct callees recorded per block.
const MAX_CALLS_PER_BLOCK: usize = 32;

/// Collect names of functions called within a node's subtree.
fn extract_calls(node: Node<'_>, source: &str) -> Vec<String> {
    let mut calls = Vec::new();
    let mut stack = vec![node];

    while let Some(current) = stack.pop() {
        if calls.len() >= MAX_CALLS_PER_BLOCK {
            break;
        }
        let kind = current.kind();
        if kind == "call_expression" || kind == "call" || kind == "invocation_expression" {
            if let Some(callee) = current
                .child_by_field_name("function")
                .or_else(|| current.child_by_field_name("name"))
            {
                if let Ok(text) = callee.utf8_text(source.as_bytes()) {
                    // Keep the rightmost path segment: `api.users.fetch` → `fetch`
                    let name = text.rsplit(['.', ':']).next().unwrap_or(text).trim();
                    if !name.is_empty() && !calls.iter().any(|c| c == name) {
                        calls.push(name.to_string());
                    }
                }
            }
        }
        let mut cursor = current.walk();
        for child in current.named_children(&mut cursor) {
            stack.push(child);
        }
    }

    calls
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> CodeParser {
        CodeParser::with_limits(ParserLimits {
            target_chars: 200,
            max_chars: 600,
            min_chars: 20,
        })
    }

    const RUST_SOURCE: &str = r#"
use std::collections::HashMap;

/// Fetches a user by id.
pub fn get_user(id: u32) -> Option<String> {
    let table: HashMap<u32, String> = HashMap::new();
    lookup(&table, id)
}

fn lookup(table: &HashMap<u32, String>, id: u32) -> Option<String> {
    table.get(&id).cloned()
}
"#;

    #[test]
    fn test_rust_functions_become_blocks() {
        let outcome = parser().parse_source(RUST_SOURCE, "src/user.rs", "fh");
        assert!(!outcome.used_fallback);
        let names: Vec<_> = outcome
            .blocks
            .iter()
            .filter_map(|b| b.identifier.as_deref())
            .collect();
        assert!(names.contains(&"get_user"));
        assert!(names.contains(&"lookup"));
    }

    #[test]
    fn test_pub_function_is_exported() {
        let outcome = parser().parse_source(RUST_SOURCE, "src/user.rs", "fh");
        let get_user = outcome
            .blocks
            .iter()
            .find(|b| b.identifier.as_deref() == Some("get_user"))
            .unwrap();
        assert_eq!(get_user.exports, vec!["get_user".to_string()]);

        let lookup = outcome
            .blocks
            .iter()
            .find(|b| b.identifier.as_deref() == Some("lookup"))
            .unwrap();
        assert!(lookup.exports.is_empty());
    }

    #[test]
    fn test_imports_attached_to_blocks() {
        let outcome = parser().parse_source(RUST_SOURCE, "src/user.rs", "fh");
        let block = &outcome.blocks[0];
        assert!(block.imports.iter().any(|i| i.contains("HashMap")));
    }

    #[test]
    fn test_documentation_and_calls_extracted() {
        let outcome = parser().parse_source(RUST_SOURCE, "src/user.rs", "fh");
        let get_user = outcome
            .blocks
            .iter()
            .find(|b| b.identifier.as_deref() == Some("get_user"))
            .unwrap();
        assert!(get_user
            .documentation
            .as_deref()
            .unwrap_or("")
            .contains("Fetches a user"));
        assert!(get_user.calls.iter().any(|c| c == "lookup"));
    }

    #[test]
    fn test_typescript_export_class() {
        let source = r#"
export class UserService {
    private repo: Repo;

    getUser(id: number): User {
        return this.repo.find(id);
    }
}
"#;
        let outcome = parser().parse_source(source, "src/service.ts", "fh");
        assert!(!outcome.used_fallback);
        let class_block = outcome
            .blocks
            .iter()
            .find(|b| b.identifier.as_deref() == Some("UserService"))
            .unwrap();
        assert!(class_block.exports.contains(&"UserService".to_string()));
    }

    #[test]
    fn test_unknown_extension_uses_fallback() {
        let source = "some plain text\nthat is long enough to form a block of content\n";
        let outcome = parser().parse_source(source, "notes.txt", "fh");
        assert!(outcome.used_fallback);
        assert!(outcome.language.is_none());
    }

    #[test]
    fn test_oversized_class_is_split_into_methods() {
        let mut source = String::from("class Big:\n");
        for i in 0..30 {
            source.push_str(&format!(
                "    def method_{i}(self):\n        return compute_value({i}) + compute_value({i})\n"
            ));
        }
        let outcome = parser().parse_source(&source, "big.py", "fh");
        assert!(!outcome.used_fallback);
        // The class is far over max_chars, so blocks come from inside it
        assert!(outcome.blocks.len() > 1);
        for block in &outcome.blocks {
            assert!(block.content.len() <= 600 + 1, "block too large: {}", block.content.len());
        }
    }

    #[test]
    fn test_segment_ids_stable_across_parses() {
        let a = parser().parse_source(RUST_SOURCE, "src/user.rs", "fh");
        let b = parser().parse_source(RUST_SOURCE, "src/user.rs", "fh");
        let ids_a: Vec<_> = a.blocks.iter().map(|x| x.segment_id.clone()).collect();
        let ids_b: Vec<_> = b.blocks.iter().map(|x| x.segment_id.clone()).collect();
        assert_eq!(ids_a, ids_b);
    }
}
