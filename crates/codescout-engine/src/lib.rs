//! CodeScout Engine - Indexing orchestration and lifecycle
//!
//! Ties the core and search crates into a running system:
//! - The per-workspace [`IndexManager`] (full scans, incremental updates,
//!   search delegation, lifecycle commands)
//! - The adaptive batch optimizer and token estimation
//! - The per-provider rate limiter
//! - The state machine with per-component circuit breakers
//! - File-change debouncing for the watcher path
//! - Metrics and progress events

pub mod batcher;
pub mod error;
pub mod events;
pub mod limiter;
pub mod manager;
pub mod metrics;
pub mod state;
pub mod watcher;

// Re-exports for convenience
pub use batcher::{
    estimate_tokens, BatchDecision, BatchOptimizer, BatchOptimizerConfig, BatchPerformance,
    TokenEstimate,
};
pub use error::{categorize, CategorizedError, EngineError, ErrorCategory, Result, RetryAdvice};
pub use events::{BroadcastProgress, NullProgress, ProgressEvent, ProgressSink};
pub use limiter::{RateDecision, RateLimiter, RateLimiterConfig, WaitReason};
pub use manager::{
    IndexManager, IndexPorts, InitReport, ManagerRegistry, SettingsOutcome, StatusReport,
    MAX_BATCH_RETRIES,
};
pub use metrics::{MetricsCollector, MetricsSnapshot, ProviderStats, TimingStats};
pub use state::{
    CircuitBreaker, Component, ComponentState, StateManager, StateSnapshot, SystemState,
    BREAKER_COOLDOWN, BREAKER_THRESHOLD,
};
pub use watcher::{ChangeBatch, ChangeDebouncer, DebounceConfig, FileEvent};
