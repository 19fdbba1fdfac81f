//! Configuration errors

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Failed to read config file {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML
    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    /// A field failed validation
    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    /// An environment variable named by the config is not set
    #[error("Environment variable '{0}' referenced by the config is not set")]
    MissingEnvVar(String),
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;
