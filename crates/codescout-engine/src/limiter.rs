//! Provider Rate Limiter
//!
//! Per-provider token bucket plus a sliding-window request log. The bucket
//! bounds burst token spend; the window predicts when recent usage is about
//! to hit the provider's request cap and throttles before the provider
//! does. A reported 429 puts the provider into a limited period computed
//! with jittered exponential backoff; no request is issued before that
//! period ends.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};

// ============================================================================
// Configuration
// ============================================================================

/// Per-provider limits.
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Token bucket capacity
    pub max_tokens: f64,
    /// Tokens restored per second
    pub refill_rate: f64,
    /// Sliding-window length for request counting
    pub window: Duration,
    /// Requests allowed per window
    pub window_capacity: usize,
    /// Fraction of window capacity at which predictive throttling starts
    pub predictive_threshold: f64,
    /// First backoff after a reported rate-limit error
    pub base_backoff: Duration,
    /// Backoff ceiling
    pub max_backoff: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_tokens: 150_000.0,
            refill_rate: 2_500.0,
            window: Duration::from_secs(60),
            window_capacity: 300,
            predictive_threshold: 0.8,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

// ============================================================================
// Decisions
// ============================================================================

/// Why a request must wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum WaitReason {
    /// The provider reported a rate limit; waiting for its reset time
    CurrentlyLimited,
    /// The token bucket cannot cover the requested tokens yet
    BucketExhausted,
    /// Recent request volume is close to the window cap
    PredictiveThrottle,
}

/// Outcome of `can_request`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateDecision {
    /// Tokens were reserved; go ahead
    Proceed,
    /// Hold off for at least `wait_ms`
    Wait { wait_ms: u64, reason: WaitReason },
}

// ============================================================================
// Limiter
// ============================================================================

#[derive(Debug)]
struct ProviderState {
    tokens: f64,
    last_refill: Instant,
    request_log: VecDeque<Instant>,
    is_limited: bool,
    reset_time: Option<Instant>,
    consecutive_limits: u32,
}

impl ProviderState {
    fn new(config: &RateLimiterConfig) -> Self {
        Self {
            tokens: config.max_tokens,
            last_refill: Instant::now(),
            request_log: VecDeque::new(),
            is_limited: false,
            reset_time: None,
            consecutive_limits: 0,
        }
    }

    fn refill(&mut self, config: &RateLimiterConfig) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * config.refill_rate).min(config.max_tokens);
        self.last_refill = now;
    }

    fn prune_window(&mut self, config: &RateLimiterConfig) {
        while self
            .request_log
            .front()
            .map(|t| t.elapsed() > config.window)
            .unwrap_or(false)
        {
            self.request_log.pop_front();
        }
    }
}

/// Token-bucket + sliding-window limiter keyed by provider name.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    providers: Mutex<HashMap<String, ProviderState>>,
}

impl RateLimiter {
    /// Create a limiter with default limits.
    pub fn new() -> Self {
        Self::with_config(RateLimiterConfig::default())
    }

    /// Create a limiter with explicit limits.
    pub fn with_config(config: RateLimiterConfig) -> Self {
        Self {
            config,
            providers: Mutex::new(HashMap::new()),
        }
    }

    /// Decide whether a request spending `tokens` may go out now.
    ///
    /// On `Proceed` the tokens are reserved and the request is logged; on
    /// `Wait` nothing is consumed.
    pub fn can_request(&self, provider: &str, tokens: f64) -> RateDecision {
        let mut providers = self.providers.lock();
        let state = providers
            .entry(provider.to_string())
            .or_insert_with(|| ProviderState::new(&self.config));

        // A reported limit wins over everything until its reset time
        if state.is_limited {
            if let Some(reset) = state.reset_time {
                let now = Instant::now();
                if now < reset {
                    return RateDecision::Wait {
                        wait_ms: (reset - now).as_millis() as u64,
                        reason: WaitReason::CurrentlyLimited,
                    };
                }
            }
            state.is_limited = false;
            state.reset_time = None;
        }

        state.refill(&self.config);
        state.prune_window(&self.config);

        // Predictive throttle: back off before the provider has to tell us
        let threshold =
            (self.config.window_capacity as f64 * self.config.predictive_threshold) as usize;
        if state.request_log.len() >= threshold.max(1) {
            let wait_ms = state
                .request_log
                .front()
                .map(|&oldest| {
                    let leaves_at = oldest + self.config.window;
                    leaves_at.saturating_duration_since(Instant::now()).as_millis() as u64
                })
                .unwrap_or(0)
                .max(1);
            debug!("Predictive throttle for '{}': {}ms", provider, wait_ms);
            return RateDecision::Wait {
                wait_ms,
                reason: WaitReason::PredictiveThrottle,
            };
        }

        if state.tokens < tokens {
            let deficit = tokens - state.tokens;
            let wait_ms = ((deficit / self.config.refill_rate) * 1000.0).ceil() as u64;
            return RateDecision::Wait {
                wait_ms: wait_ms.max(1),
                reason: WaitReason::BucketExhausted,
            };
        }

        state.tokens -= tokens;
        state.request_log.push_back(Instant::now());
        RateDecision::Proceed
    }

    /// Record a provider-reported rate-limit error.
    ///
    /// Sets the limited flag and computes the reset time with exponential
    /// backoff (`base * 2^(consecutive-1)`, capped) plus up to 10% jitter.
    pub fn record_rate_limit_error(&self, provider: &str) {
        let mut providers = self.providers.lock();
        let state = providers
            .entry(provider.to_string())
            .or_insert_with(|| ProviderState::new(&self.config));

        state.consecutive_limits += 1;
        let exponent = state.consecutive_limits.saturating_sub(1).min(16);
        let backoff = self
            .config
            .base_backoff
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.config.max_backoff);

        // Deterministic jitter in [0, 10%), derived from the attempt count
        let jitter_frac = jitter_fraction(provider, state.consecutive_limits);
        let backoff = backoff.mul_f64(1.0 + jitter_frac);

        state.is_limited = true;
        state.reset_time = Some(Instant::now() + backoff);
        warn!(
            "Provider '{}' rate limited (hit {}), backing off {:?}",
            provider, state.consecutive_limits, backoff
        );
    }

    /// Record a successful request; resets the consecutive-limit counter.
    pub fn record_success(&self, provider: &str) {
        let mut providers = self.providers.lock();
        if let Some(state) = providers.get_mut(provider) {
            state.consecutive_limits = 0;
        }
    }

    /// Suspend until the provider's limited period is over. Returns
    /// immediately when the provider is not limited.
    pub async fn wait_for_reset(&self, provider: &str) {
        let reset = {
            let providers = self.providers.lock();
            providers.get(provider).and_then(|s| {
                if s.is_limited {
                    s.reset_time
                } else {
                    None
                }
            })
        };

        if let Some(reset) = reset {
            tokio::time::sleep_until(reset).await;
        }
    }

    /// Whether the provider is inside a reported limited period.
    pub fn is_limited(&self, provider: &str) -> bool {
        let providers = self.providers.lock();
        providers
            .get(provider)
            .map(|s| {
                s.is_limited && s.reset_time.map(|r| Instant::now() < r).unwrap_or(false)
            })
            .unwrap_or(false)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Deterministic pseudo-jitter in [0, 0.1).
fn jitter_fraction(provider: &str, attempt: u32) -> f64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in provider.bytes().chain(attempt.to_le_bytes()) {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    (hash % 1000) as f64 / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RateLimiterConfig {
        RateLimiterConfig {
            max_tokens: 100.0,
            refill_rate: 50.0,
            window: Duration::from_secs(10),
            window_capacity: 10,
            predictive_threshold: 0.8,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(8),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_bucket_consumes_and_refills() {
        let limiter = RateLimiter::with_config(config());
        assert_eq!(limiter.can_request("openai", 80.0), RateDecision::Proceed);

        // Bucket has 20 left; 80 more must wait
        match limiter.can_request("openai", 80.0) {
            RateDecision::Wait { reason, wait_ms } => {
                assert_eq!(reason, WaitReason::BucketExhausted);
                assert!(wait_ms > 0);
            }
            other => panic!("expected wait, got {other:?}"),
        }

        // After refill time passes the request goes through
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(limiter.can_request("openai", 80.0), RateDecision::Proceed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_predictive_throttle_near_window_cap() {
        let limiter = RateLimiter::with_config(config());
        // 8 of 10 requests used (threshold = 0.8 * 10)
        for _ in 0..8 {
            assert_eq!(limiter.can_request("p", 1.0), RateDecision::Proceed);
        }
        match limiter.can_request("p", 1.0) {
            RateDecision::Wait { reason, .. } => {
                assert_eq!(reason, WaitReason::PredictiveThrottle)
            }
            other => panic!("expected predictive throttle, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_request_before_reset_time() {
        let limiter = RateLimiter::with_config(config());
        limiter.record_rate_limit_error("p");
        assert!(limiter.is_limited("p"));

        match limiter.can_request("p", 1.0) {
            RateDecision::Wait { reason, .. } => assert_eq!(reason, WaitReason::CurrentlyLimited),
            other => panic!("expected limited, got {other:?}"),
        }

        // wait_for_reset suspends until the limited period passes
        limiter.wait_for_reset("p").await;
        assert!(!limiter.is_limited("p"));
        assert_eq!(limiter.can_request("p", 1.0), RateDecision::Proceed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_grows_and_is_capped() {
        let limiter = RateLimiter::with_config(config());

        limiter.record_rate_limit_error("p");
        let first = match limiter.can_request("p", 1.0) {
            RateDecision::Wait { wait_ms, .. } => wait_ms,
            _ => panic!("expected wait"),
        };

        limiter.record_rate_limit_error("p");
        let second = match limiter.can_request("p", 1.0) {
            RateDecision::Wait { wait_ms, .. } => wait_ms,
            _ => panic!("expected wait"),
        };
        assert!(second > first, "backoff should grow: {first} -> {second}");

        // Many consecutive hits: bounded by max_backoff + 10% jitter
        for _ in 0..10 {
            limiter.record_rate_limit_error("p");
        }
        let capped = match limiter.can_request("p", 1.0) {
            RateDecision::Wait { wait_ms, .. } => wait_ms,
            _ => panic!("expected wait"),
        };
        assert!(capped <= 8_800, "expected cap near 8s, got {capped}ms");
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_consecutive_count() {
        let limiter = RateLimiter::with_config(config());
        limiter.record_rate_limit_error("p");
        limiter.record_rate_limit_error("p");
        limiter.wait_for_reset("p").await;
        limiter.record_success("p");

        // The next limit starts from the base backoff again
        limiter.record_rate_limit_error("p");
        let wait_ms = match limiter.can_request("p", 1.0) {
            RateDecision::Wait { wait_ms, .. } => wait_ms,
            _ => panic!("expected wait"),
        };
        assert!(wait_ms <= 1_100, "expected ~1s base backoff, got {wait_ms}ms");
    }

    #[test]
    fn test_jitter_bounded() {
        for attempt in 0..50 {
            let j = jitter_fraction("provider", attempt);
            assert!((0.0..0.1).contains(&j));
        }
    }
}
