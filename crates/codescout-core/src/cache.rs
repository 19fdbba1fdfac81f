//! Per-File Content-Hash Cache
//!
//! Backs incremental reindexing: each entry maps a workspace-relative path
//! to the SHA-256 of the file's bytes at the time its blocks were last
//! written to every store. A missing cache file means "never indexed".
//!
//! Persistence is all-or-nothing: the map is serialized to a temp file in
//! the same directory and renamed over the target.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that can occur during cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

/// File name of the persisted hash map inside the state directory.
pub const CACHE_FILE_NAME: &str = "file-hashes.json";

/// Map of file path to content hash, persisted atomically.
///
/// Single-writer by construction: the orchestrator owns the cache and is
/// the only component that mutates it. The entry for a file is updated only
/// after all downstream writes for that file succeeded, so a crash mid-index
/// re-processes the file rather than losing it.
#[derive(Debug)]
pub struct FileHashCache {
    /// Path of the persisted cache file
    path: PathBuf,
    /// In-memory map: workspace-relative path → hex SHA-256
    entries: HashMap<String, String>,
    /// Whether the in-memory state diverges from disk
    dirty: bool,
}

impl FileHashCache {
    /// Create a cache rooted at the given state directory.
    ///
    /// Does not touch the filesystem; call [`FileHashCache::load`] to read
    /// any persisted state.
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            path: state_dir.as_ref().join(CACHE_FILE_NAME),
            entries: HashMap::new(),
            dirty: false,
        }
    }

    /// Load persisted entries, treating a missing file as an empty cache.
    pub fn load(&mut self) -> Result<()> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => {
                self.entries = serde_json::from_str(&raw)?;
                self.dirty = false;
                info!("Loaded {} cached file hashes", self.entries.len());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No cache file at {:?}, starting empty", self.path);
                self.entries.clear();
                self.dirty = false;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Get the recorded hash for a path.
    pub fn get(&self, path: &str) -> Option<&str> {
        self.entries.get(path).map(|s| s.as_str())
    }

    /// Record the hash for a path.
    pub fn set(&mut self, path: impl Into<String>, hash: impl Into<String>) {
        self.entries.insert(path.into(), hash.into());
        self.dirty = true;
    }

    /// Forget a path (the file was deleted).
    pub fn delete(&mut self, path: &str) {
        if self.entries.remove(path).is_some() {
            self.dirty = true;
        }
    }

    /// Number of tracked files.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache tracks no files.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All tracked paths.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|s| s.as_str())
    }

    /// Drop every entry. Does not persist; pair with [`FileHashCache::persist`].
    pub fn clear(&mut self) {
        if !self.entries.is_empty() {
            self.entries.clear();
            self.dirty = true;
        }
    }

    /// Write the map to disk atomically (temp file + rename).
    ///
    /// A no-op when nothing changed since the last persist.
    pub fn persist(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = self.path.with_extension("json.tmp");
        {
            let mut tmp = fs::File::create(&tmp_path)?;
            serde_json::to_writer(&mut tmp, &self.entries)?;
            tmp.flush()?;
            tmp.sync_all()?;
        }

        if let Err(e) = fs::rename(&tmp_path, &self.path) {
            // Leave no stray temp file behind on failure
            let _ = fs::remove_file(&tmp_path);
            warn!("Failed to persist cache: {}", e);
            return Err(e.into());
        }

        self.dirty = false;
        debug!("Persisted {} file hashes to {:?}", self.entries.len(), self.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_cache_is_empty() {
        let dir = TempDir::new().unwrap();
        let mut cache = FileHashCache::new(dir.path());
        cache.load().unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_set_get_delete() {
        let dir = TempDir::new().unwrap();
        let mut cache = FileHashCache::new(dir.path());
        cache.set("src/a.rs", "h1");
        assert_eq!(cache.get("src/a.rs"), Some("h1"));
        cache.delete("src/a.rs");
        assert_eq!(cache.get("src/a.rs"), None);
    }

    #[test]
    fn test_persist_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut cache = FileHashCache::new(dir.path());
        cache.set("src/a.rs", "h1");
        cache.set("src/b.rs", "h2");
        cache.persist().unwrap();

        let mut reloaded = FileHashCache::new(dir.path());
        reloaded.load().unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.get("src/b.rs"), Some("h2"));
    }

    #[test]
    fn test_persist_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let mut cache = FileHashCache::new(dir.path());
        cache.set("src/a.rs", "h1");
        cache.persist().unwrap();

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map(|x| x == "tmp").unwrap_or(false))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_clear_then_persist_empties_disk() {
        let dir = TempDir::new().unwrap();
        let mut cache = FileHashCache::new(dir.path());
        cache.set("src/a.rs", "h1");
        cache.persist().unwrap();
        cache.clear();
        cache.persist().unwrap();

        let mut reloaded = FileHashCache::new(dir.path());
        reloaded.load().unwrap();
        assert!(reloaded.is_empty());
    }

    #[test]
    fn test_persist_is_noop_when_clean() {
        let dir = TempDir::new().unwrap();
        let mut cache = FileHashCache::new(dir.path());
        cache.load().unwrap();
        // No writes yet, so no file should appear
        cache.persist().unwrap();
        assert!(!dir.path().join(CACHE_FILE_NAME).exists());
    }
}
