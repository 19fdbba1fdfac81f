//! Error types for codescout-search

use thiserror::Error;

/// Errors that can occur in codescout-search operations
#[derive(Error, Debug)]
pub enum SearchError {
    /// Vector store error
    #[error("Vector store error: {0}")]
    VectorStore(String),

    /// Connection error
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Embedding error
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Embedding dimension mismatch
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Embedder returned the wrong number of vectors
    #[error("Embedding count mismatch: sent {sent} texts, got {received} vectors")]
    CountMismatch { sent: usize, received: usize },

    /// Graph service error
    #[error("Graph error: {0}")]
    Graph(String),

    /// Every backend selected for a query failed
    #[error("All selected backends failed: {0}")]
    AllBackendsFailed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<qdrant_client::QdrantError> for SearchError {
    fn from(err: qdrant_client::QdrantError) -> Self {
        SearchError::VectorStore(err.to_string())
    }
}

/// Result type for codescout-search operations
pub type Result<T> = std::result::Result<T, SearchError>;
