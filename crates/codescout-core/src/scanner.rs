//! Workspace Scanner
//!
//! Walks the workspace respecting `.gitignore` and user ignore rules,
//! filters by size and extension, and feeds files through the parser with
//! bounded concurrency. Parsed files are pushed into a bounded channel, so
//! a slow consumer (the embedding pipeline) applies backpressure to the
//! walk instead of letting parsed blocks pile up in memory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ignore::overrides::OverrideBuilder;
use ignore::WalkBuilder;
use rayon::prelude::*;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::parser::{CodeParser, ParseOutcome, SupportedLanguage};
use crate::types::compute_file_hash;

// ============================================================================
// Errors
// ============================================================================

/// Errors that can occur while scanning.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Workspace root does not exist: {0}")]
    RootNotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid ignore pattern '{pattern}': {reason}")]
    BadIgnorePattern { pattern: String, reason: String },
}

/// Result type for scanner operations.
pub type Result<T> = std::result::Result<T, ScanError>;

// ============================================================================
// Configuration
// ============================================================================

/// Scanner tuning knobs.
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Files larger than this are skipped (bytes)
    pub max_file_size: u64,
    /// Maximum concurrent parses
    pub concurrency: usize,
    /// Maximum parsed files waiting for the consumer before the walk stalls
    pub pending_limit: usize,
    /// Extra ignore globs applied on top of `.gitignore`
    pub ignore_patterns: Vec<String>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            max_file_size: 1024 * 1024,
            concurrency: 10,
            pending_limit: 20,
            ignore_patterns: Vec::new(),
        }
    }
}

// ============================================================================
// Scan output
// ============================================================================

/// One file's parse result, as delivered to the indexing pipeline.
#[derive(Debug)]
pub struct ParsedFile {
    /// Workspace-relative path
    pub rel_path: String,
    /// Parse outcome (blocks, fallback flag, file hash)
    pub outcome: ParseOutcome,
}

/// Counters from a completed walk.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct ScanStats {
    /// Candidate files found by the walk
    pub files_found: usize,
    /// Files skipped for exceeding the size limit
    pub skipped_oversized: usize,
    /// Files skipped for an unsupported extension
    pub skipped_extension: usize,
}

// ============================================================================
// Scanner
// ============================================================================

/// Walks a workspace and dispatches files to the parser.
pub struct Scanner {
    root: PathBuf,
    config: ScannerConfig,
    parser: Arc<CodeParser>,
}

impl Scanner {
    /// Create a scanner over a workspace root.
    pub fn new(root: impl AsRef<Path>, parser: Arc<CodeParser>, config: ScannerConfig) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            config,
            parser,
        }
    }

    /// The workspace root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Enumerate indexable files (workspace-relative), honoring `.gitignore`,
    /// user ignore globs, the size limit, and the supported-extension set.
    pub fn list_files(&self) -> Result<(Vec<String>, ScanStats)> {
        if !self.root.exists() {
            return Err(ScanError::RootNotFound(self.root.clone()));
        }

        let mut overrides = OverrideBuilder::new(&self.root);
        for pattern in &self.config.ignore_patterns {
            // Override globs are whitelist by default; '!' inverts to ignore
            overrides
                .add(&format!("!{pattern}"))
                .map_err(|e| ScanError::BadIgnorePattern {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })?;
        }
        let overrides = overrides
            .build()
            .map_err(|e| ScanError::BadIgnorePattern {
                pattern: String::new(),
                reason: e.to_string(),
            })?;

        let mut stats = ScanStats::default();
        let mut files = Vec::new();

        let walker = WalkBuilder::new(&self.root)
            .hidden(true)
            .git_ignore(true)
            .git_exclude(true)
            // Honor .gitignore files even when the workspace is not a git
            // checkout (exports, tarballs, bare directories)
            .require_git(false)
            .overrides(overrides)
            .build();

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("Walk error: {}", e);
                    continue;
                }
            };
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let path = entry.path();

            if SupportedLanguage::from_path(path).is_none() {
                stats.skipped_extension += 1;
                continue;
            }

            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            if size > self.config.max_file_size {
                debug!("Skipping oversized file ({} bytes): {:?}", size, path);
                stats.skipped_oversized += 1;
                continue;
            }

            if let Ok(rel) = path.strip_prefix(&self.root) {
                files.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }

        files.sort();
        stats.files_found = files.len();
        info!(
            "Scan found {} files ({} oversized, {} unsupported skipped)",
            stats.files_found, stats.skipped_oversized, stats.skipped_extension
        );
        Ok((files, stats))
    }

    /// Hash a set of files in parallel without parsing them.
    ///
    /// Used for change detection: comparing these hashes against the cache
    /// decides which files need re-indexing at all. Unreadable files are
    /// omitted.
    pub fn hash_files(&self, rel_paths: &[String]) -> Vec<(String, String)> {
        rel_paths
            .par_iter()
            .filter_map(|rel| {
                let bytes = std::fs::read(self.root.join(rel)).ok()?;
                Some((rel.clone(), compute_file_hash(&bytes)))
            })
            .collect()
    }

    /// Parse the given files with bounded concurrency, pushing results into
    /// `tx`. The channel should be bounded to the configured pending limit;
    /// a full channel stalls the scan (backpressure).
    ///
    /// Cancellation is observed between files and while waiting for channel
    /// capacity; on cancel the scan stops promptly without error.
    pub async fn scan_files(
        &self,
        rel_paths: Vec<String>,
        tx: mpsc::Sender<ParsedFile>,
        cancel: CancellationToken,
    ) {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut join_set = tokio::task::JoinSet::new();

        for rel_path in rel_paths {
            if cancel.is_cancelled() {
                break;
            }

            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => break,
                },
            };

            let parser = Arc::clone(&self.parser);
            let root = self.root.clone();
            let tx = tx.clone();
            let cancel = cancel.clone();

            join_set.spawn(async move {
                let parse_root = root.clone();
                let parse_path = rel_path.clone();
                // Parsing is CPU-bound; keep it off the async workers
                let parsed = tokio::task::spawn_blocking(move || {
                    parser.parse_file(&parse_root, &parse_path)
                })
                .await;

                drop(permit);

                match parsed {
                    Ok(Ok(outcome)) => {
                        let item = ParsedFile { rel_path, outcome };
                        tokio::select! {
                            _ = cancel.cancelled() => {}
                            _ = tx.send(item) => {}
                        }
                    }
                    Ok(Err(e)) => {
                        warn!("Skipping unparsable file: {}", e);
                    }
                    Err(e) => {
                        warn!("Parse task for {} failed: {}", rel_path, e);
                    }
                }
            });
        }

        // Drain the remaining tasks so every sent file is accounted for
        while join_set.join_next().await.is_some() {}
    }

    /// Channel capacity matching the configured pending limit.
    pub fn channel(&self) -> (mpsc::Sender<ParsedFile>, mpsc::Receiver<ParsedFile>) {
        mpsc::channel(self.config.pending_limit.max(1))
    }

    /// Parse a single file through the same filters as a walk.
    ///
    /// Returns `Ok(None)` when the file does not exist (deleted between the
    /// event and now), has an unsupported extension, or exceeds the size
    /// limit. Used by the incremental path, where paths arrive from the
    /// watcher rather than a walk.
    pub fn parse_one(&self, rel_path: &str) -> crate::parser::Result<Option<ParsedFile>> {
        let full_path = self.root.join(rel_path);
        if !full_path.is_file() {
            return Ok(None);
        }
        if SupportedLanguage::from_path(&full_path).is_none() {
            return Ok(None);
        }
        if let Ok(metadata) = full_path.metadata() {
            if metadata.len() > self.config.max_file_size {
                debug!("Skipping oversized changed file: {}", rel_path);
                return Ok(None);
            }
        }

        let outcome = self.parser.parse_file(&self.root, rel_path)?;
        Ok(Some(ParsedFile {
            rel_path: rel_path.to_string(),
            outcome,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn scanner(root: &Path) -> Scanner {
        Scanner::new(root, Arc::new(CodeParser::new()), ScannerConfig::default())
    }

    #[test]
    fn test_list_files_filters_extensions() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "src/main.rs", "fn main() {}");
        write(dir.path(), "README.md", "# readme");
        let (files, stats) = scanner(dir.path()).list_files().unwrap();
        assert_eq!(files, vec!["src/main.rs".to_string()]);
        assert_eq!(stats.skipped_extension, 1);
    }

    #[test]
    fn test_list_files_respects_gitignore() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), ".gitignore", "generated/\n");
        write(dir.path(), "src/lib.rs", "pub fn a() {}");
        write(dir.path(), "generated/out.rs", "pub fn b() {}");
        let (files, _) = scanner(dir.path()).list_files().unwrap();
        assert_eq!(files, vec!["src/lib.rs".to_string()]);
    }

    #[test]
    fn test_list_files_respects_user_ignores() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "src/lib.rs", "pub fn a() {}");
        write(dir.path(), "vendor/dep.rs", "pub fn b() {}");
        let mut config = ScannerConfig::default();
        config.ignore_patterns.push("vendor/**".to_string());
        let scanner = Scanner::new(dir.path(), Arc::new(CodeParser::new()), config);
        let (files, _) = scanner.list_files().unwrap();
        assert_eq!(files, vec!["src/lib.rs".to_string()]);
    }

    #[test]
    fn test_oversized_files_skipped() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "src/big.rs", &"x".repeat(64));
        let mut config = ScannerConfig::default();
        config.max_file_size = 16;
        let scanner = Scanner::new(dir.path(), Arc::new(CodeParser::new()), config);
        let (files, stats) = scanner.list_files().unwrap();
        assert!(files.is_empty());
        assert_eq!(stats.skipped_oversized, 1);
    }

    #[test]
    fn test_missing_root_errors() {
        let result = scanner(Path::new("/nonexistent/workspace/path")).list_files();
        assert!(matches!(result, Err(ScanError::RootNotFound(_))));
    }

    #[test]
    fn test_hash_files_parallel() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.rs", "fn a() {}");
        write(dir.path(), "b.rs", "fn b() {}");
        let hashes = scanner(dir.path()).hash_files(&["a.rs".to_string(), "b.rs".to_string()]);
        assert_eq!(hashes.len(), 2);
        assert_eq!(
            hashes.iter().find(|(p, _)| p == "a.rs").unwrap().1,
            compute_file_hash(b"fn a() {}")
        );
    }

    #[tokio::test]
    async fn test_scan_files_delivers_parsed_files() {
        let dir = TempDir::new().unwrap();
        let source = format!(
            "/// Adds numbers.\npub fn add(a: u32, b: u32) -> u32 {{\n    {}\n    {}\n    a + b\n}}\n",
            "// padding so the block clears the minimum size limit",
            "// more padding to keep this function above the minimum"
        );
        write(dir.path(), "src/math.rs", &source);

        let scanner = scanner(dir.path());
        let (files, _) = scanner.list_files().unwrap();
        let (tx, mut rx) = scanner.channel();

        scanner
            .scan_files(files, tx, CancellationToken::new())
            .await;

        let parsed = rx.recv().await.expect("one parsed file");
        assert_eq!(parsed.rel_path, "src/math.rs");
        assert!(!parsed.outcome.blocks.is_empty());
    }

    #[tokio::test]
    async fn test_scan_files_observes_cancellation() {
        let dir = TempDir::new().unwrap();
        for i in 0..5 {
            write(dir.path(), &format!("src/f{i}.rs"), "pub fn f() {}");
        }
        let scanner = scanner(dir.path());
        let (files, _) = scanner.list_files().unwrap();
        let (tx, rx) = scanner.channel();

        let cancel = CancellationToken::new();
        cancel.cancel();
        scanner.scan_files(files, tx, cancel).await;
        drop(rx);
        // Reaching here without hanging is the assertion: a cancelled scan
        // returns promptly even though the receiver never drained.
    }
}
