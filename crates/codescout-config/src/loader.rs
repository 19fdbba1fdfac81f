//! Configuration loader with inheritance support.
//!
//! Loads configuration from multiple sources and merges them:
//! 1. Global config: `~/.codescout/config.toml`
//! 2. Local config: `.codescout/config.toml` (in workspace)
//! 3. Caller overrides
//!
//! Later sources override earlier ones. The global and local layers merge
//! field by field: an overlay field wins only when it differs from its
//! type's default, so a local file declaring just `[search]` leaves the
//! global `[embedder]`/`[vector_store]`/`[graph]` settings intact.
//! Overrides patch individual fields last.

use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::error::ConfigError;
use crate::{EmbedderProvider, ScoutConfig};

/// Configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// State directory name, both global (under `$HOME`) and local (under the
/// workspace root).
pub const STATE_DIR: &str = ".codescout";

/// Field-level overrides applied after file loading.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub enabled: Option<bool>,
    pub embedder_provider: Option<EmbedderProvider>,
    pub model_id: Option<String>,
    pub model_dimension: Option<u32>,
    pub vector_store_url: Option<String>,
    pub min_score: Option<f32>,
    pub max_results: Option<usize>,
    pub graph_enabled: Option<bool>,
}

/// Configuration loader with a cached global layer.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Global config directory (e.g., `~/.codescout`)
    global_config_dir: Option<PathBuf>,

    /// Cached global config
    global_config: Option<ScoutConfig>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a loader rooted at the detected home directory.
    pub fn new() -> Self {
        let global_config_dir = dirs::home_dir().map(|h| h.join(STATE_DIR));
        Self {
            global_config_dir,
            global_config: None,
        }
    }

    /// Create a loader with a custom global directory. Useful for testing.
    pub fn with_global_dir(global_dir: impl Into<PathBuf>) -> Self {
        Self {
            global_config_dir: Some(global_dir.into()),
            global_config: None,
        }
    }

    /// Path of the global config file, when a home directory exists.
    pub fn global_config_path(&self) -> Option<PathBuf> {
        self.global_config_dir
            .as_ref()
            .map(|d| d.join(CONFIG_FILE_NAME))
    }

    /// Path of the local config file for a workspace.
    pub fn local_config_path(&self, workspace_root: &Path) -> PathBuf {
        workspace_root.join(STATE_DIR).join(CONFIG_FILE_NAME)
    }

    /// Load configuration for a workspace with optional overrides.
    ///
    /// Merges config in order: global → local → overrides.
    pub fn load(
        &mut self,
        workspace_root: &Path,
        overrides: Option<&ConfigOverrides>,
    ) -> Result<ScoutConfig, ConfigError> {
        let mut config = ScoutConfig::default();

        if let Some(global) = self.load_global()? {
            config = merge_configs(config, global);
        }

        if let Some(local) = self.load_local(workspace_root)? {
            config = merge_configs(config, local);
        }

        if let Some(overrides) = overrides {
            apply_overrides(&mut config, overrides);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load only the global configuration, caching the result.
    pub fn load_global(&mut self) -> Result<Option<ScoutConfig>, ConfigError> {
        if let Some(ref config) = self.global_config {
            return Ok(Some(config.clone()));
        }

        let Some(global_path) = self.global_config_path() else {
            debug!("No home directory found, skipping global config");
            return Ok(None);
        };

        if !global_path.exists() {
            trace!("Global config not found at {:?}", global_path);
            return Ok(None);
        }

        debug!("Loading global config from {:?}", global_path);
        let config = load_config_file(&global_path)?;
        self.global_config = Some(config.clone());
        Ok(Some(config))
    }

    /// Load only the local configuration for a workspace.
    pub fn load_local(&self, workspace_root: &Path) -> Result<Option<ScoutConfig>, ConfigError> {
        let local_path = self.local_config_path(workspace_root);

        if !local_path.exists() {
            trace!("Local config not found at {:?}", local_path);
            return Ok(None);
        }

        debug!("Loading local config from {:?}", local_path);
        load_config_file(&local_path).map(Some)
    }
}

fn load_config_file(path: &Path) -> Result<ScoutConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&raw).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Merge two configurations, with `overlay` taking precedence.
///
/// This performs a field-by-field merge, allowing partial configs.
fn merge_configs(base: ScoutConfig, overlay: ScoutConfig) -> ScoutConfig {
    ScoutConfig {
        // enabled defaults to true, so only an explicit `false` overrides
        enabled: if !overlay.enabled { false } else { base.enabled },
        embedder: merge_embedder(base.embedder, overlay.embedder),
        vector_store: merge_vector_store(base.vector_store, overlay.vector_store),
        search: merge_search(base.search, overlay.search),
        graph: merge_graph(base.graph, overlay.graph),
        scanner: merge_scanner(base.scanner, overlay.scanner),
    }
}

/// Merge embedder config, overlay values override base.
fn merge_embedder(
    base: crate::EmbedderConfig,
    overlay: crate::EmbedderConfig,
) -> crate::EmbedderConfig {
    crate::EmbedderConfig {
        // Use overlay if it differs from default, otherwise keep base
        provider: if overlay.provider != EmbedderProvider::default() {
            overlay.provider
        } else {
            base.provider
        },
        api_key: overlay.api_key.or(base.api_key),
        api_key_env: overlay.api_key_env.or(base.api_key_env),
        base_url: overlay.base_url.or(base.base_url),
        model_id: overlay.model_id.or(base.model_id),
        model_dimension: overlay.model_dimension.or(base.model_dimension),
    }
}

/// Merge vector store config.
fn merge_vector_store(
    base: crate::VectorStoreConfig,
    overlay: crate::VectorStoreConfig,
) -> crate::VectorStoreConfig {
    crate::VectorStoreConfig {
        url: if overlay.url != "http://localhost:6334" {
            overlay.url
        } else {
            base.url
        },
        api_key: overlay.api_key.or(base.api_key),
        api_key_env: overlay.api_key_env.or(base.api_key_env),
    }
}

/// Merge search config.
fn merge_search(base: crate::SearchConfig, overlay: crate::SearchConfig) -> crate::SearchConfig {
    crate::SearchConfig {
        min_score: if (overlay.min_score - 0.4).abs() > f32::EPSILON {
            overlay.min_score
        } else {
            base.min_score
        },
        max_results: if overlay.max_results != 50 {
            overlay.max_results
        } else {
            base.max_results
        },
    }
}

/// Merge graph config.
fn merge_graph(base: crate::GraphConfig, overlay: crate::GraphConfig) -> crate::GraphConfig {
    crate::GraphConfig {
        // enabled defaults to false, so only an explicit `true` overrides
        enabled: if overlay.enabled { true } else { base.enabled },
        url: if !overlay.url.is_empty() {
            overlay.url
        } else {
            base.url
        },
        username: overlay.username.or(base.username),
        password: overlay.password.or(base.password),
        database: overlay.database.or(base.database),
    }
}

/// Merge scanner config.
fn merge_scanner(
    base: crate::ScannerConfig,
    overlay: crate::ScannerConfig,
) -> crate::ScannerConfig {
    crate::ScannerConfig {
        max_file_size: if overlay.max_file_size != 1024 * 1024 {
            overlay.max_file_size
        } else {
            base.max_file_size
        },
        concurrency: if overlay.concurrency != 10 {
            overlay.concurrency
        } else {
            base.concurrency
        },
        // Merge patterns: overlay patterns extend base patterns
        ignore_patterns: if overlay.ignore_patterns.is_empty() {
            base.ignore_patterns
        } else {
            let mut patterns = base.ignore_patterns;
            for pattern in overlay.ignore_patterns {
                if !patterns.contains(&pattern) {
                    patterns.push(pattern);
                }
            }
            patterns
        },
    }
}

fn apply_overrides(config: &mut ScoutConfig, overrides: &ConfigOverrides) {
    if let Some(enabled) = overrides.enabled {
        config.enabled = enabled;
    }
    if let Some(provider) = overrides.embedder_provider {
        config.embedder.provider = provider;
    }
    if let Some(model_id) = &overrides.model_id {
        config.embedder.model_id = Some(model_id.clone());
    }
    if let Some(dimension) = overrides.model_dimension {
        config.embedder.model_dimension = Some(dimension);
    }
    if let Some(url) = &overrides.vector_store_url {
        config.vector_store.url = url.clone();
    }
    if let Some(min_score) = overrides.min_score {
        config.search.min_score = min_score;
    }
    if let Some(max_results) = overrides.max_results {
        config.search.max_results = max_results;
    }
    if let Some(graph_enabled) = overrides.graph_enabled {
        config.graph.enabled = graph_enabled;
    }
}
