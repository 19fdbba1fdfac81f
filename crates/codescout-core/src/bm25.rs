//! In-Memory BM25 Index
//!
//! Standard Okapi BM25 (k1 = 1.2, b = 0.75) over code blocks, with a
//! code-aware tokenizer that splits camelCase and snake_case identifiers.
//! The index is purely in-memory: it is rebuilt from the parser's output on
//! startup and mutated in place by incremental updates.
//!
//! Reads take a shared lock and may run concurrently; writes are serialized
//! behind the same `RwLock`.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use serde::Serialize;

use crate::types::{CodeBlock, SegmentId};

/// BM25 tuning parameters.
#[derive(Debug, Clone, Copy)]
pub struct Bm25Params {
    /// Term-frequency saturation
    pub k1: f32,
    /// Length normalization strength
    pub b: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75 }
    }
}

/// Snapshot of index size, exposed in status output.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Bm25Stats {
    /// Number of indexed documents
    pub doc_count: usize,
    /// Number of distinct terms
    pub term_count: usize,
    /// Average document length in tokens
    pub avg_doc_len: f32,
}

/// Per-document bookkeeping.
#[derive(Debug)]
struct DocInfo {
    file_path: String,
    /// Token count (document length for normalization)
    len: u32,
    /// Monotonic insertion counter, used as the tie-breaker
    order: u64,
    /// Term → frequency within this document
    term_freqs: HashMap<String, u32>,
}

#[derive(Debug, Default)]
struct Inner {
    docs: HashMap<SegmentId, DocInfo>,
    /// Term → set of documents containing it
    postings: HashMap<String, HashSet<SegmentId>>,
    /// Documents per file, for `remove_by_file`
    by_file: HashMap<String, HashSet<SegmentId>>,
    total_len: u64,
    next_order: u64,
}

/// In-memory sparse inverted index over code blocks.
#[derive(Debug, Default)]
pub struct Bm25Index {
    params: Bm25Params,
    inner: RwLock<Inner>,
}

impl Bm25Index {
    /// Create an index with default Okapi parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an index with custom parameters.
    pub fn with_params(params: Bm25Params) -> Self {
        Self {
            params,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Index one block. Re-adding an existing segment id replaces it.
    pub fn add(&self, block: &CodeBlock) {
        let mut inner = self.inner.write();
        Self::add_locked(&mut inner, block);
    }

    /// Index a batch of blocks under a single write lock.
    pub fn add_many(&self, blocks: &[CodeBlock]) {
        let mut inner = self.inner.write();
        for block in blocks {
            Self::add_locked(&mut inner, block);
        }
    }

    fn add_locked(inner: &mut Inner, block: &CodeBlock) {
        // Replace semantics: drop any previous version of the segment first
        Self::remove_locked(inner, &block.segment_id);

        let mut tokens = tokenize(&block.content);
        if let Some(identifier) = &block.identifier {
            tokens.extend(tokenize(identifier));
        }

        let mut term_freqs: HashMap<String, u32> = HashMap::new();
        for token in &tokens {
            *term_freqs.entry(token.clone()).or_insert(0) += 1;
        }

        for term in term_freqs.keys() {
            inner
                .postings
                .entry(term.clone())
                .or_default()
                .insert(block.segment_id.clone());
        }

        inner
            .by_file
            .entry(block.file_path.clone())
            .or_default()
            .insert(block.segment_id.clone());

        let order = inner.next_order;
        inner.next_order += 1;
        inner.total_len += tokens.len() as u64;
        inner.docs.insert(
            block.segment_id.clone(),
            DocInfo {
                file_path: block.file_path.clone(),
                len: tokens.len() as u32,
                order,
                term_freqs,
            },
        );
    }

    /// Remove one document by segment id. Unknown ids are a no-op.
    pub fn remove(&self, id: &SegmentId) {
        let mut inner = self.inner.write();
        Self::remove_locked(&mut inner, id);
    }

    fn remove_locked(inner: &mut Inner, id: &SegmentId) {
        let Some(doc) = inner.docs.remove(id) else {
            return;
        };

        inner.total_len -= doc.len as u64;
        for term in doc.term_freqs.keys() {
            if let Some(set) = inner.postings.get_mut(term) {
                set.remove(id);
                if set.is_empty() {
                    inner.postings.remove(term);
                }
            }
        }
        if let Some(set) = inner.by_file.get_mut(&doc.file_path) {
            set.remove(id);
            if set.is_empty() {
                inner.by_file.remove(&doc.file_path);
            }
        }
    }

    /// Remove every document belonging to a file. Returns how many were removed.
    pub fn remove_by_file(&self, file_path: &str) -> usize {
        let mut inner = self.inner.write();
        let ids: Vec<SegmentId> = inner
            .by_file
            .get(file_path)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        for id in &ids {
            Self::remove_locked(&mut inner, id);
        }
        ids.len()
    }

    /// Drop every document.
    pub fn clear(&self) {
        *self.inner.write() = Inner::default();
    }

    /// Search, returning at most `limit` `(id, score)` pairs ordered by
    /// descending score; ties broken by insertion order.
    pub fn search(&self, query: &str, limit: usize) -> Vec<(SegmentId, f32)> {
        let inner = self.inner.read();
        let n = inner.docs.len();
        if n == 0 || limit == 0 {
            return Vec::new();
        }

        let query_terms = tokenize(query);
        if query_terms.is_empty() {
            return Vec::new();
        }

        let avg_len = inner.total_len as f32 / n as f32;
        let mut scores: HashMap<&SegmentId, f32> = HashMap::new();

        // Deduplicate query terms; repeated query terms do not re-score
        let unique_terms: HashSet<&String> = query_terms.iter().collect();

        for term in unique_terms {
            let Some(doc_ids) = inner.postings.get(term.as_str()) else {
                continue;
            };
            let df = doc_ids.len() as f32;
            let idf = ((n as f32 - df + 0.5) / (df + 0.5) + 1.0).ln();

            for id in doc_ids {
                let doc = &inner.docs[id];
                let tf = doc.term_freqs.get(term.as_str()).copied().unwrap_or(0) as f32;
                let norm = self.params.k1
                    * (1.0 - self.params.b + self.params.b * doc.len as f32 / avg_len);
                let contribution = idf * (tf * (self.params.k1 + 1.0)) / (tf + norm);
                *scores.entry(id).or_insert(0.0) += contribution;
            }
        }

        let mut ranked: Vec<(SegmentId, f32, u64)> = scores
            .into_iter()
            .map(|(id, score)| (id.clone(), score, inner.docs[id].order))
            .collect();

        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.2.cmp(&b.2))
        });
        ranked.truncate(limit);
        ranked.into_iter().map(|(id, score, _)| (id, score)).collect()
    }

    /// Current index size.
    pub fn stats(&self) -> Bm25Stats {
        let inner = self.inner.read();
        let doc_count = inner.docs.len();
        Bm25Stats {
            doc_count,
            term_count: inner.postings.len(),
            avg_doc_len: if doc_count == 0 {
                0.0
            } else {
                inner.total_len as f32 / doc_count as f32
            },
        }
    }
}

// ============================================================================
// Tokenizer
// ============================================================================

/// Tokenize text for code search.
///
/// Splits on non-alphanumerics, then splits camelCase runs. Emits the
/// lowercased subtokens plus the lowercased compound when it was compound,
/// so both `getUserById` and `user` match the same block.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();

    for word in text.split(|c: char| !c.is_alphanumeric() && c != '_') {
        if word.is_empty() {
            continue;
        }
        let parts = split_identifier(word);
        if parts.len() > 1 {
            tokens.push(word.to_lowercase().replace('_', ""));
        }
        for part in parts {
            if !part.is_empty() {
                tokens.push(part);
            }
        }
    }

    tokens
}

/// Split an identifier on `_` and camelCase boundaries, lowercasing parts.
fn split_identifier(word: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;

    for c in word.chars() {
        if c == '_' {
            if !current.is_empty() {
                parts.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if c.is_uppercase() && prev_lower {
            parts.push(std::mem::take(&mut current));
        }
        prev_lower = c.is_lowercase() || c.is_numeric();
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        parts.push(current);
    }

    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BlockType;

    fn block(id_suffix: &str, path: &str, content: &str) -> CodeBlock {
        let mut b = CodeBlock::new(path, format!("fh-{id_suffix}"), 1, 3, content, BlockType::Function);
        b.identifier = Some(id_suffix.to_string());
        b
    }

    #[test]
    fn test_tokenize_splits_camel_and_snake() {
        let tokens = tokenize("getUserById user_name");
        assert!(tokens.contains(&"get".to_string()));
        assert!(tokens.contains(&"user".to_string()));
        assert!(tokens.contains(&"by".to_string()));
        assert!(tokens.contains(&"id".to_string()));
        assert!(tokens.contains(&"getuserbyid".to_string()));
        assert!(tokens.contains(&"name".to_string()));
    }

    #[test]
    fn test_search_ranks_matching_doc_first() {
        let index = Bm25Index::new();
        index.add(&block("a", "src/user.rs", "fn get_user_by_id(id: u32) -> User"));
        index.add(&block("b", "src/db.rs", "fn open_connection(pool: Pool)"));
        index.add(&block("c", "src/user.rs", "fn delete_user(id: u32)"));

        let results = index.search("get user", 10);
        assert!(!results.is_empty());
        assert_eq!(results[0].0, block("a", "src/user.rs", "fn get_user_by_id(id: u32) -> User").segment_id);
    }

    #[test]
    fn test_search_respects_limit_and_ordering() {
        let index = Bm25Index::new();
        for i in 0..20 {
            index.add(&block(&format!("f{i}"), "src/x.rs", "fn shared_token() {}"));
        }
        let results = index.search("shared_token", 5);
        assert_eq!(results.len(), 5);
        // Equal scores: ties resolved by insertion order
        for window in results.windows(2) {
            assert!(window[0].1 >= window[1].1);
        }
        assert_eq!(results[0].0, block("f0", "src/x.rs", "fn shared_token() {}").segment_id);
    }

    #[test]
    fn test_remove_by_file() {
        let index = Bm25Index::new();
        index.add(&block("a", "src/user.rs", "fn get_user()"));
        index.add(&block("b", "src/db.rs", "fn get_user()"));
        let removed = index.remove_by_file("src/user.rs");
        assert_eq!(removed, 1);
        assert_eq!(index.stats().doc_count, 1);
        let results = index.search("get user", 10);
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_readd_replaces_document() {
        let index = Bm25Index::new();
        let b = block("a", "src/user.rs", "fn get_user()");
        index.add(&b);
        index.add(&b);
        assert_eq!(index.stats().doc_count, 1);
    }

    #[test]
    fn test_clear_and_stats() {
        let index = Bm25Index::new();
        index.add(&block("a", "src/a.rs", "fn alpha()"));
        assert_eq!(index.stats().doc_count, 1);
        index.clear();
        let stats = index.stats();
        assert_eq!(stats.doc_count, 0);
        assert_eq!(stats.term_count, 0);
        assert!(index.search("alpha", 10).is_empty());
    }

    #[test]
    fn test_empty_query_returns_nothing() {
        let index = Bm25Index::new();
        index.add(&block("a", "src/a.rs", "fn alpha()"));
        assert!(index.search("   ", 10).is_empty());
    }
}
