//! Adaptive Batch Sizing
//!
//! Groups code blocks into embedding batches under a provider token budget
//! and an item-count cap, then adapts the size to observed behavior:
//! latency over the target shrinks batches proportionally, comfortable
//! latency grows them (up to 1.5x), and a poor success rate shrinks them
//! again. A confidence-weighted safety margin (10-30% of the token budget)
//! absorbs token-estimation error.

use std::collections::VecDeque;

use serde::Serialize;

use codescout_core::CodeBlock;

// ============================================================================
// Token estimation
// ============================================================================

/// Language keywords counted by the complexity estimator.
const KEYWORDS: &[&str] = &[
    "fn", "def", "function", "class", "struct", "enum", "impl", "trait", "interface", "return",
    "if", "else", "for", "while", "match", "switch", "import", "use", "pub", "async", "await",
    "let", "const", "var", "type",
];

/// A token count with how much to trust it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TokenEstimate {
    pub tokens: u32,
    /// Agreement between the two estimators, in [0, 1]
    pub confidence: f32,
}

/// Estimate tokens for a block of code.
///
/// Combines a length-based estimate (`chars / 4`) with a complexity-based
/// estimate (words, keywords, brackets, comment lines) at 60/40. Confidence
/// is the ratio of the smaller estimate to the larger: when the two
/// estimators agree the number is trustworthy.
pub fn estimate_tokens(text: &str) -> TokenEstimate {
    let length_estimate = text.chars().count() as f32 / 4.0;

    let mut words = 0u32;
    let mut keywords = 0u32;
    for word in text.split_whitespace() {
        words += 1;
        let trimmed = word.trim_matches(|c: char| !c.is_alphanumeric());
        if KEYWORDS.contains(&trimmed) {
            keywords += 1;
        }
    }
    let brackets = text
        .chars()
        .filter(|c| matches!(c, '{' | '}' | '(' | ')' | '[' | ']'))
        .count() as u32;
    let comment_lines = text
        .lines()
        .filter(|l| {
            let t = l.trim_start();
            t.starts_with("//") || t.starts_with('#') || t.starts_with("/*") || t.starts_with('*')
        })
        .count() as u32;

    // Code tokenizes denser than prose: operators and brackets each cost
    let complexity_estimate =
        words as f32 * 1.1 + keywords as f32 + brackets as f32 * 0.5 + comment_lines as f32;

    let combined = 0.6 * length_estimate + 0.4 * complexity_estimate;

    let (lo, hi) = if length_estimate <= complexity_estimate {
        (length_estimate, complexity_estimate)
    } else {
        (complexity_estimate, length_estimate)
    };
    let confidence = if hi <= f32::EPSILON { 1.0 } else { (lo / hi).clamp(0.0, 1.0) };

    TokenEstimate {
        tokens: combined.ceil() as u32,
        confidence,
    }
}

// ============================================================================
// Optimizer
// ============================================================================

/// Batch-sizing limits and targets.
#[derive(Debug, Clone)]
pub struct BatchOptimizerConfig {
    /// Token budget per batch (provider ceiling)
    pub max_batch_tokens: u32,
    /// Per-item ceiling; larger items are rejected upstream
    pub max_item_tokens: u32,
    /// Item-count cap per batch
    pub max_batch_items: usize,
    /// Latency the optimizer steers toward
    pub target_latency_ms: u64,
    /// Observations kept in the rolling window
    pub history_window: usize,
}

impl Default for BatchOptimizerConfig {
    fn default() -> Self {
        Self {
            max_batch_tokens: 100_000,
            max_item_tokens: 8_192,
            max_batch_items: 96,
            target_latency_ms: 2_000,
            history_window: 20,
        }
    }
}

/// One observed batch outcome.
#[derive(Debug, Clone, Copy)]
pub struct BatchPerformance {
    pub latency_ms: u64,
    pub success: bool,
    pub batch_size: usize,
}

/// A sizing decision with its rationale.
#[derive(Debug, Clone, Serialize)]
pub struct BatchDecision {
    /// How many leading items to take
    pub size: usize,
    /// Human-readable explanation of the applied adjustments
    pub reason: String,
    /// Mean estimate confidence of the included items, in [0, 1]
    pub confidence: f32,
}

/// Computes batch sizes from token estimates and recent performance.
#[derive(Debug)]
pub struct BatchOptimizer {
    config: BatchOptimizerConfig,
    history: VecDeque<BatchPerformance>,
}

impl BatchOptimizer {
    /// Create an optimizer with default limits.
    pub fn new() -> Self {
        Self::with_config(BatchOptimizerConfig::default())
    }

    /// Create an optimizer with explicit limits.
    pub fn with_config(config: BatchOptimizerConfig) -> Self {
        Self {
            config,
            history: VecDeque::new(),
        }
    }

    /// The configured per-item token ceiling.
    pub fn max_item_tokens(&self) -> u32 {
        self.config.max_item_tokens
    }

    /// Record a completed batch.
    pub fn record(&mut self, perf: BatchPerformance) {
        self.history.push_back(perf);
        while self.history.len() > self.config.history_window {
            self.history.pop_front();
        }
    }

    fn rolling_latency_ms(&self) -> Option<f64> {
        if self.history.is_empty() {
            return None;
        }
        let sum: u64 = self.history.iter().map(|p| p.latency_ms).sum();
        Some(sum as f64 / self.history.len() as f64)
    }

    fn rolling_success_rate(&self) -> Option<f64> {
        if self.history.is_empty() {
            return None;
        }
        let ok = self.history.iter().filter(|p| p.success).count();
        Some(ok as f64 / self.history.len() as f64)
    }

    /// Decide how many of the leading `blocks` form the next batch.
    ///
    /// Items whose estimate exceeds the per-item ceiling must already have
    /// been rejected by the caller; any encountered here stop the batch in
    /// front of themselves.
    pub fn plan_batch(&self, blocks: &[CodeBlock]) -> BatchDecision {
        if blocks.is_empty() {
            return BatchDecision {
                size: 0,
                reason: "no items".to_string(),
                confidence: 1.0,
            };
        }

        let mut reasons: Vec<String> = Vec::new();

        // Item cap, adjusted by observed latency and success rate
        let mut item_cap = self.config.max_batch_items as f64;
        if let Some(avg) = self.rolling_latency_ms() {
            let target = self.config.target_latency_ms as f64;
            if avg > target {
                item_cap /= avg / target;
                reasons.push(format!("latency {avg:.0}ms over target, shrinking"));
            } else if avg < target * 0.5 {
                item_cap *= 1.5;
                reasons.push("latency well under target, growing 1.5x".to_string());
            }
        }
        if let Some(rate) = self.rolling_success_rate() {
            if rate < 0.9 {
                item_cap *= 0.8;
                reasons.push(format!("success rate {:.0}% below 90%, shrinking", rate * 100.0));
            }
        }
        let item_cap = (item_cap as usize)
            .min(self.config.max_batch_items * 2)
            .max(1);

        // Confidence-weighted safety margin over the token budget
        let estimates: Vec<TokenEstimate> = blocks
            .iter()
            .take(item_cap)
            .map(|b| estimate_tokens(&b.content))
            .collect();
        let min_confidence = estimates
            .iter()
            .map(|e| e.confidence)
            .fold(1.0f32, f32::min);
        let margin = (0.10 + (1.0 - min_confidence) * 0.20).clamp(0.10, 0.30);
        let budget = (self.config.max_batch_tokens as f32 * (1.0 - margin)) as u32;
        reasons.push(format!("{:.0}% token safety margin", margin * 100.0));

        let mut size = 0usize;
        let mut spent = 0u32;
        let mut confidence_sum = 0.0f32;
        for estimate in &estimates {
            if estimate.tokens > self.config.max_item_tokens {
                // Oversized item: close the batch before it
                break;
            }
            if spent + estimate.tokens > budget && size > 0 {
                reasons.push("token budget reached".to_string());
                break;
            }
            spent += estimate.tokens;
            confidence_sum += estimate.confidence;
            size += 1;
        }

        let confidence = if size == 0 {
            min_confidence
        } else {
            confidence_sum / size as f32
        };

        BatchDecision {
            size,
            reason: reasons.join("; "),
            confidence,
        }
    }
}

impl Default for BatchOptimizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codescout_core::BlockType;

    fn block(content: &str) -> CodeBlock {
        CodeBlock::new("src/x.rs", "fh", 1, 10, content, BlockType::Function)
    }

    fn blocks(n: usize, content: &str) -> Vec<CodeBlock> {
        (0..n).map(|_| block(content)).collect()
    }

    #[test]
    fn test_estimate_tokens_scales_with_length() {
        let small = estimate_tokens("fn a() {}");
        let large = estimate_tokens(&"fn a() { let x = compute(); }\n".repeat(50));
        assert!(large.tokens > small.tokens * 10);
        assert!(small.confidence > 0.0 && small.confidence <= 1.0);
    }

    #[test]
    fn test_estimate_confidence_reflects_agreement() {
        // Dense one-line code: estimators roughly agree
        let code = estimate_tokens("let total = items.iter().map(|i| i.price).sum::<u32>();");
        // A single enormous word: length says many tokens, complexity says one word
        let blob = estimate_tokens(&"x".repeat(4000));
        assert!(code.confidence > blob.confidence);
    }

    #[test]
    fn test_plan_respects_item_cap() {
        let optimizer = BatchOptimizer::with_config(BatchOptimizerConfig {
            max_batch_items: 4,
            ..Default::default()
        });
        let decision = optimizer.plan_batch(&blocks(20, "fn tiny() {}"));
        assert_eq!(decision.size, 4);
    }

    #[test]
    fn test_plan_respects_token_budget() {
        let optimizer = BatchOptimizer::with_config(BatchOptimizerConfig {
            max_batch_tokens: 100,
            max_batch_items: 100,
            ..Default::default()
        });
        let content = "fn handler() { dispatch(route, request, response) }";
        let decision = optimizer.plan_batch(&blocks(50, content));
        assert!(decision.size >= 1);
        assert!(decision.size < 50, "token budget must bound the batch");
    }

    #[test]
    fn test_high_latency_shrinks_batch() {
        let mut optimizer = BatchOptimizer::with_config(BatchOptimizerConfig {
            max_batch_items: 32,
            target_latency_ms: 1_000,
            ..Default::default()
        });
        let baseline = optimizer.plan_batch(&blocks(64, "fn tiny() {}")).size;

        for _ in 0..5 {
            optimizer.record(BatchPerformance {
                latency_ms: 4_000,
                success: true,
                batch_size: 32,
            });
        }
        let adjusted = optimizer.plan_batch(&blocks(64, "fn tiny() {}"));
        // 4x the target latency shrinks by ~4x
        assert!(adjusted.size <= baseline / 3, "{} vs {}", adjusted.size, baseline);
        assert!(adjusted.reason.contains("latency"));
    }

    #[test]
    fn test_low_latency_grows_batch() {
        let mut optimizer = BatchOptimizer::with_config(BatchOptimizerConfig {
            max_batch_items: 16,
            target_latency_ms: 2_000,
            ..Default::default()
        });
        let baseline = optimizer.plan_batch(&blocks(64, "fn tiny() {}")).size;

        for _ in 0..5 {
            optimizer.record(BatchPerformance {
                latency_ms: 300,
                success: true,
                batch_size: 16,
            });
        }
        let grown = optimizer.plan_batch(&blocks(64, "fn tiny() {}"));
        assert!(grown.size > baseline);
        assert!(grown.size <= 32, "growth is capped at 2x the configured max");
    }

    #[test]
    fn test_poor_success_rate_shrinks_batch() {
        let mut optimizer = BatchOptimizer::with_config(BatchOptimizerConfig {
            max_batch_items: 20,
            ..Default::default()
        });
        for i in 0..10 {
            optimizer.record(BatchPerformance {
                latency_ms: 2_000,
                success: i % 2 == 0,
                batch_size: 20,
            });
        }
        let decision = optimizer.plan_batch(&blocks(64, "fn tiny() {}"));
        assert_eq!(decision.size, 16);
        assert!(decision.reason.contains("success rate"));
    }

    #[test]
    fn test_oversized_item_stops_batch() {
        let optimizer = BatchOptimizer::with_config(BatchOptimizerConfig {
            max_item_tokens: 50,
            ..Default::default()
        });
        let huge = block(&"let x = 1;\n".repeat(200));
        let items = vec![block("fn a() {}"), huge, block("fn b() {}")];
        let decision = optimizer.plan_batch(&items);
        assert_eq!(decision.size, 1);
    }

    #[test]
    fn test_empty_input() {
        let optimizer = BatchOptimizer::new();
        assert_eq!(optimizer.plan_batch(&[]).size, 0);
    }
}
