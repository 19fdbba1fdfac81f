//! Metrics Collector
//!
//! Per-operation counters and timings, per-provider request accounting, and
//! categorized error counters. Everything lands in the diagnostic snapshot
//! as plain JSON. Backed by `DashMap`, so hot paths increment without a
//! global lock.

use std::collections::BTreeMap;

use dashmap::DashMap;
use serde::Serialize;

use crate::error::ErrorCategory;

/// Aggregated timing for one operation.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TimingStats {
    pub count: u64,
    pub total_ms: u64,
    pub max_ms: u64,
}

impl TimingStats {
    /// Mean duration in milliseconds.
    pub fn avg_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_ms as f64 / self.count as f64
        }
    }
}

/// Per-provider request accounting.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ProviderStats {
    pub requests: u64,
    pub failures: u64,
    pub tokens: u64,
}

/// Concurrent counter tables for the whole engine.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    counters: DashMap<String, u64>,
    errors: DashMap<ErrorCategory, u64>,
    timings: DashMap<String, TimingStats>,
    providers: DashMap<String, ProviderStats>,
}

/// Stable-ordered snapshot of every table.
#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<String, u64>,
    pub errors: BTreeMap<&'static str, u64>,
    pub timings: BTreeMap<String, TimingStats>,
    pub providers: BTreeMap<String, ProviderStats>,
}

impl MetricsCollector {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter by one.
    pub fn incr(&self, counter: &str) {
        self.add(counter, 1);
    }

    /// Increment a counter by `n`.
    pub fn add(&self, counter: &str, n: u64) {
        *self.counters.entry(counter.to_string()).or_insert(0) += n;
    }

    /// Read a counter.
    pub fn get(&self, counter: &str) -> u64 {
        self.counters.get(counter).map(|v| *v).unwrap_or(0)
    }

    /// Count a categorized error.
    pub fn record_error(&self, category: ErrorCategory) {
        *self.errors.entry(category).or_insert(0) += 1;
    }

    /// Record one timed operation.
    pub fn record_timing(&self, operation: &str, ms: u64) {
        let mut entry = self.timings.entry(operation.to_string()).or_default();
        entry.count += 1;
        entry.total_ms += ms;
        entry.max_ms = entry.max_ms.max(ms);
    }

    /// Record one provider request.
    pub fn record_provider(&self, provider: &str, tokens: u64, success: bool) {
        let mut entry = self.providers.entry(provider.to_string()).or_default();
        entry.requests += 1;
        entry.tokens += tokens;
        if !success {
            entry.failures += 1;
        }
    }

    /// Copy every table into a stable-ordered snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self
                .counters
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
            errors: self
                .errors
                .iter()
                .map(|e| (e.key().as_str(), *e.value()))
                .collect(),
            timings: self
                .timings
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
            providers: self
                .providers
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
        }
    }

    /// Reset every table.
    pub fn clear(&self) {
        self.counters.clear();
        self.errors.clear();
        self.timings.clear();
        self.providers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = MetricsCollector::new();
        metrics.incr("files_indexed");
        metrics.add("files_indexed", 4);
        assert_eq!(metrics.get("files_indexed"), 5);
        assert_eq!(metrics.get("missing"), 0);
    }

    #[test]
    fn test_timings_aggregate() {
        let metrics = MetricsCollector::new();
        metrics.record_timing("embed_batch", 100);
        metrics.record_timing("embed_batch", 300);
        let snapshot = metrics.snapshot();
        let stats = snapshot.timings["embed_batch"];
        assert_eq!(stats.count, 2);
        assert_eq!(stats.max_ms, 300);
        assert!((stats.avg_ms() - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_error_categories_counted() {
        let metrics = MetricsCollector::new();
        metrics.record_error(ErrorCategory::Network);
        metrics.record_error(ErrorCategory::Network);
        metrics.record_error(ErrorCategory::Auth);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.errors["network"], 2);
        assert_eq!(snapshot.errors["auth"], 1);
    }

    #[test]
    fn test_provider_stats() {
        let metrics = MetricsCollector::new();
        metrics.record_provider("openai", 1_000, true);
        metrics.record_provider("openai", 2_000, false);
        let snapshot = metrics.snapshot();
        let stats = snapshot.providers["openai"];
        assert_eq!(stats.requests, 2);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.tokens, 3_000);
    }

    #[test]
    fn test_clear() {
        let metrics = MetricsCollector::new();
        metrics.incr("x");
        metrics.clear();
        assert_eq!(metrics.get("x"), 0);
    }
}
