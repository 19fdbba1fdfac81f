//! Engine Errors and the Error Taxonomy
//!
//! Every failure in the pipeline maps to a category that decides the retry
//! policy: network problems back off, auth problems do not retry, rate
//! limits defer to the limiter's schedule, resource exhaustion shrinks the
//! batch, configuration problems surface to the user.

use serde::Serialize;
use thiserror::Error;

/// Errors that can occur in engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Configuration rejected; indexing refuses to start
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The manager was used before `initialize`
    #[error("Manager is not initialized")]
    NotInitialized,

    /// An indexing run is already active
    #[error("Indexing is already in progress")]
    AlreadyIndexing,

    /// The operation was cancelled by the user; callers convert this back
    /// into a clean Standby transition, never into a failure
    #[error("Cancelled by user")]
    Cancelled,

    /// Scan error
    #[error("Scan error: {0}")]
    Scan(#[from] codescout_core::ScanError),

    /// Cache error
    #[error("Cache error: {0}")]
    Cache(#[from] codescout_core::CacheError),

    /// Search/store error
    #[error("Search error: {0}")]
    Search(#[from] codescout_search::SearchError),

    /// Unexpected invariant violation; context preserved for diagnostics
    #[error("Fatal error: {0}")]
    Fatal(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

// ============================================================================
// Categorization
// ============================================================================

/// Failure category per the degradation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    Configuration,
    Network,
    Auth,
    RateLimit,
    ResourceExhausted,
    Data,
    Unknown,
}

impl ErrorCategory {
    /// Get the string representation used in metric keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Network => "network",
            ErrorCategory::Auth => "auth",
            ErrorCategory::RateLimit => "rate-limit",
            ErrorCategory::ResourceExhausted => "resource-exhausted",
            ErrorCategory::Data => "data",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

/// What the caller should do about a categorized error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetryAdvice {
    /// Retry with jittered exponential backoff
    RetryWithBackoff,
    /// Ask the rate limiter when the provider resets
    UseLimiterSchedule,
    /// Retry with a smaller batch
    ShrinkBatch,
    /// Do not retry; fix credentials
    NoRetry,
    /// Do not retry; surface the message to the user
    SurfaceToUser,
}

/// A provider/transport error mapped into the taxonomy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategorizedError {
    pub category: ErrorCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryAdvice>,
    pub message: String,
}

/// Map an error message onto the taxonomy.
///
/// Matching is substring-based over the lowercased message, the same signals
/// providers actually emit (status codes, "rate limit", "too large", ...).
pub fn categorize(message: &str) -> CategorizedError {
    let lowered = message.to_lowercase();

    let (category, retry) = if lowered.contains("timeout")
        || lowered.contains("timed out")
        || lowered.contains("connection refused")
        || lowered.contains("connection reset")
        || lowered.contains("connect error")
        || lowered.contains("dns")
        || lowered.contains("unreachable")
        || lowered.contains("broken pipe")
    {
        (ErrorCategory::Network, Some(RetryAdvice::RetryWithBackoff))
    } else if lowered.contains("401")
        || lowered.contains("403")
        || lowered.contains("unauthorized")
        || lowered.contains("forbidden")
        || lowered.contains("invalid api key")
        || lowered.contains("missing api key")
        || lowered.contains("authentication")
    {
        (ErrorCategory::Auth, Some(RetryAdvice::NoRetry))
    } else if lowered.contains("429") || lowered.contains("rate limit") {
        (ErrorCategory::RateLimit, Some(RetryAdvice::UseLimiterSchedule))
    } else if lowered.contains("resource exhausted")
        || lowered.contains("resource_exhausted")
        || lowered.contains("out of memory")
        || lowered.contains("oom")
        || lowered.contains("too large")
        || lowered.contains("payload size")
        || lowered.contains("context length")
    {
        (ErrorCategory::ResourceExhausted, Some(RetryAdvice::ShrinkBatch))
    } else if lowered.contains("config") || lowered.contains("invalid url") {
        (ErrorCategory::Configuration, Some(RetryAdvice::SurfaceToUser))
    } else if lowered.contains("dimension mismatch") || lowered.contains("count mismatch") {
        (ErrorCategory::Data, None)
    } else {
        (ErrorCategory::Unknown, None)
    };

    CategorizedError {
        category,
        retry,
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_errors_retry_with_backoff() {
        for message in ["request timed out", "connection refused", "dns failure"] {
            let c = categorize(message);
            assert_eq!(c.category, ErrorCategory::Network, "{message}");
            assert_eq!(c.retry, Some(RetryAdvice::RetryWithBackoff));
        }
    }

    #[test]
    fn test_auth_errors_do_not_retry() {
        let c = categorize("server returned 401 Unauthorized");
        assert_eq!(c.category, ErrorCategory::Auth);
        assert_eq!(c.retry, Some(RetryAdvice::NoRetry));
    }

    #[test]
    fn test_rate_limit_uses_limiter_schedule() {
        let c = categorize("429 Too Many Requests: rate limit exceeded");
        assert_eq!(c.category, ErrorCategory::RateLimit);
        assert_eq!(c.retry, Some(RetryAdvice::UseLimiterSchedule));
    }

    #[test]
    fn test_resource_exhausted_shrinks_batch() {
        let c = categorize("payload too large for model");
        assert_eq!(c.category, ErrorCategory::ResourceExhausted);
        assert_eq!(c.retry, Some(RetryAdvice::ShrinkBatch));
    }

    #[test]
    fn test_config_surfaces_to_user() {
        let c = categorize("invalid configuration: vector_store_url missing");
        assert_eq!(c.category, ErrorCategory::Configuration);
        assert_eq!(c.retry, Some(RetryAdvice::SurfaceToUser));
    }

    #[test]
    fn test_unknown_has_no_advice() {
        let c = categorize("something inexplicable");
        assert_eq!(c.category, ErrorCategory::Unknown);
        assert_eq!(c.retry, None);
    }
}
