//! CodeScout Configuration Management
//!
//! Provides configuration loading with support for:
//! - Global config: `~/.codescout/config.toml`
//! - Local config: `.codescout/config.toml` (in workspace)
//! - Explicit overrides from the caller
//!
//! Configuration is merged in order: global → local → overrides. Secrets
//! may be inlined or referenced through environment variables
//! (`api_key_env`); the masked view replaces every credential with
//! `********` and is the only form that may be logged or dumped.

mod error;
mod loader;

pub use error::ConfigError;
pub use loader::{ConfigLoader, ConfigOverrides, STATE_DIR};

use serde::{Deserialize, Serialize};

/// Mask used wherever credentials appear in logs or dumps.
pub const CREDENTIAL_MASK: &str = "********";

// ============================================================================
// Root config
// ============================================================================

/// Root configuration for CodeScout.
///
/// Represents the fully merged configuration from all sources.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScoutConfig {
    /// Master switch; a disabled engine refuses to index
    pub enabled: bool,

    /// Embedding provider configuration
    pub embedder: EmbedderConfig,

    /// Vector store connection
    pub vector_store: VectorStoreConfig,

    /// Search defaults
    pub search: SearchConfig,

    /// Optional code-graph backend
    pub graph: GraphConfig,

    /// Scanner limits
    pub scanner: ScannerConfig,
}

impl Default for ScoutConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            embedder: EmbedderConfig::default(),
            vector_store: VectorStoreConfig::default(),
            search: SearchConfig::default(),
            graph: GraphConfig::default(),
            scanner: ScannerConfig::default(),
        }
    }
}

impl ScoutConfig {
    /// Validate every field, returning the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.vector_store.url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "vector_store.url is required".to_string(),
            ));
        }
        if let Some(dimension) = self.embedder.model_dimension {
            if dimension == 0 {
                return Err(ConfigError::ValidationError(
                    "embedder.model_dimension must be greater than 0".to_string(),
                ));
            }
        }
        if !(0.0..=1.0).contains(&self.search.min_score) {
            return Err(ConfigError::ValidationError(format!(
                "search.min_score must be in [0, 1], got {}",
                self.search.min_score
            )));
        }
        if !(1..=1000).contains(&self.search.max_results) {
            return Err(ConfigError::ValidationError(format!(
                "search.max_results must be in [1, 1000], got {}",
                self.search.max_results
            )));
        }
        if self.graph.enabled && self.graph.url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "graph.url is required when graph.enabled is true".to_string(),
            ));
        }
        Ok(())
    }

    /// A clone with every credential replaced by [`CREDENTIAL_MASK`].
    ///
    /// The only form of the config that may appear in logs or diagnostic
    /// dumps.
    pub fn masked(&self) -> ScoutConfig {
        let mut masked = self.clone();
        if masked.embedder.api_key.is_some() {
            masked.embedder.api_key = Some(CREDENTIAL_MASK.to_string());
        }
        if masked.vector_store.api_key.is_some() {
            masked.vector_store.api_key = Some(CREDENTIAL_MASK.to_string());
        }
        if masked.graph.password.is_some() {
            masked.graph.password = Some(CREDENTIAL_MASK.to_string());
        }
        masked
    }

    /// Classify what a settings change requires of a running pipeline.
    pub fn classify_change(&self, new: &ScoutConfig) -> ConfigChange {
        if self == new {
            return ConfigChange::None;
        }

        let critical = self.enabled != new.enabled
            || self.embedder != new.embedder
            || self.vector_store != new.vector_store
            || self.graph != new.graph
            || self.scanner != new.scanner;

        if critical {
            ConfigChange::Critical
        } else {
            ConfigChange::Minor
        }
    }
}

/// What a configuration change forces on the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigChange {
    /// Nothing changed
    None,
    /// Takes effect in place (search tuning)
    Minor,
    /// Requires recreating the whole pipeline
    Critical,
}

// ============================================================================
// Embedder
// ============================================================================

/// Embedding provider selection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum EmbedderProvider {
    #[default]
    Openai,
    Ollama,
    OpenaiCompatible,
    Gemini,
    Mistral,
    Openrouter,
    VercelAiGateway,
}

impl std::fmt::Display for EmbedderProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Openai => "openai",
            Self::Ollama => "ollama",
            Self::OpenaiCompatible => "openai-compatible",
            Self::Gemini => "gemini",
            Self::Mistral => "mistral",
            Self::Openrouter => "openrouter",
            Self::VercelAiGateway => "vercel-ai-gateway",
        };
        write!(f, "{name}")
    }
}

impl std::str::FromStr for EmbedderProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::Openai),
            "ollama" => Ok(Self::Ollama),
            "openai-compatible" | "openai_compatible" => Ok(Self::OpenaiCompatible),
            "gemini" => Ok(Self::Gemini),
            "mistral" => Ok(Self::Mistral),
            "openrouter" => Ok(Self::Openrouter),
            "vercel-ai-gateway" | "vercel" => Ok(Self::VercelAiGateway),
            _ => Err(ConfigError::ValidationError(format!(
                "Unknown embedder provider: '{s}'. Valid values: openai, ollama, \
                 openai-compatible, gemini, mistral, openrouter, vercel-ai-gateway"
            ))),
        }
    }
}

/// Embedding provider settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct EmbedderConfig {
    /// Which provider generates embeddings
    pub provider: EmbedderProvider,

    /// Inline API key (prefer `api_key_env`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Environment variable holding the API key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Base URL for self-hosted / compatible endpoints
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Model identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,

    /// Embedding dimension; must be > 0 when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_dimension: Option<u32>,
}

impl EmbedderConfig {
    /// Resolve the API key: inline value first, then the named env var.
    pub fn resolved_api_key(&self) -> Result<Option<String>, ConfigError> {
        if let Some(key) = &self.api_key {
            return Ok(Some(key.clone()));
        }
        match &self.api_key_env {
            Some(var) => match std::env::var(var) {
                Ok(value) => Ok(Some(value)),
                Err(_) => Err(ConfigError::MissingEnvVar(var.clone())),
            },
            None => Ok(None),
        }
    }
}

// ============================================================================
// Vector store
// ============================================================================

/// Vector store connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VectorStoreConfig {
    /// Store URL (required)
    pub url: String,

    /// Inline API key (prefer `api_key_env`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Environment variable holding the API key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:6334".to_string(),
            api_key: None,
            api_key_env: None,
        }
    }
}

// ============================================================================
// Search
// ============================================================================

/// Search defaults, adjustable without a pipeline restart.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchConfig {
    /// Similarity floor for the vector backend, in [0, 1]
    pub min_score: f32,
    /// Result cap, in [1, 1000]
    pub max_results: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            min_score: 0.4,
            max_results: 50,
        }
    }
}

// ============================================================================
// Graph
// ============================================================================

/// Optional graph backend settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct GraphConfig {
    pub enabled: bool,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
}

// ============================================================================
// Scanner
// ============================================================================

/// Scanner limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScannerConfig {
    /// Files larger than this are skipped (bytes)
    pub max_file_size: u64,
    /// Concurrent parses
    pub concurrency: usize,
    /// Extra ignore globs on top of `.gitignore`
    pub ignore_patterns: Vec<String>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            max_file_size: 1024 * 1024,
            concurrency: 10,
            ignore_patterns: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config_validates() {
        ScoutConfig::default().validate().unwrap();
    }

    #[test]
    fn test_empty_vector_url_rejected() {
        let mut config = ScoutConfig::default();
        config.vector_store.url = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_dimension_rejected() {
        let mut config = ScoutConfig::default();
        config.embedder.model_dimension = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_search_bounds_enforced() {
        let mut config = ScoutConfig::default();
        config.search.min_score = 1.5;
        assert!(config.validate().is_err());

        let mut config = ScoutConfig::default();
        config.search.max_results = 0;
        assert!(config.validate().is_err());

        let mut config = ScoutConfig::default();
        config.search.max_results = 1001;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_graph_url_required_when_enabled() {
        let mut config = ScoutConfig::default();
        config.graph.enabled = true;
        assert!(config.validate().is_err());
        config.graph.url = "bolt://localhost:7687".to_string();
        config.validate().unwrap();
    }

    #[test]
    fn test_masked_hides_credentials() {
        let mut config = ScoutConfig::default();
        config.embedder.api_key = Some("sk-secret".to_string());
        config.vector_store.api_key = Some("qdrant-secret".to_string());
        config.graph.password = Some("hunter2".to_string());

        let masked = config.masked();
        assert_eq!(masked.embedder.api_key.as_deref(), Some(CREDENTIAL_MASK));
        assert_eq!(masked.vector_store.api_key.as_deref(), Some(CREDENTIAL_MASK));
        assert_eq!(masked.graph.password.as_deref(), Some(CREDENTIAL_MASK));
        // Masking must not invent credentials that were absent
        assert!(masked.embedder.api_key_env.is_none());
    }

    #[test]
    fn test_change_classification() {
        let base = ScoutConfig::default();

        assert_eq!(base.classify_change(&base.clone()), ConfigChange::None);

        let mut minor = base.clone();
        minor.search.min_score = 0.6;
        assert_eq!(base.classify_change(&minor), ConfigChange::Minor);

        let mut critical = base.clone();
        critical.embedder.provider = EmbedderProvider::Ollama;
        assert_eq!(base.classify_change(&critical), ConfigChange::Critical);

        let mut critical = base.clone();
        critical.vector_store.url = "http://elsewhere:6334".to_string();
        assert_eq!(base.classify_change(&critical), ConfigChange::Critical);

        let mut critical = base.clone();
        critical.enabled = false;
        assert_eq!(base.classify_change(&critical), ConfigChange::Critical);
    }

    #[test]
    fn test_provider_round_trip() {
        for provider in [
            "openai",
            "ollama",
            "openai-compatible",
            "gemini",
            "mistral",
            "openrouter",
            "vercel-ai-gateway",
        ] {
            let parsed: EmbedderProvider = provider.parse().unwrap();
            assert_eq!(parsed.to_string(), provider);
        }
        assert!("carrier-pigeon".parse::<EmbedderProvider>().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = ScoutConfig::default();
        config.enabled = true;
        config.embedder.model_id = Some("text-embedding-3-small".to_string());
        config.graph.enabled = true;
        config.graph.url = "bolt://localhost:7687".to_string();

        let serialized = toml::to_string(&config).unwrap();
        let parsed: ScoutConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed, config);
    }
}
