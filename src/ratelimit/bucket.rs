//! Per-key token bucket state.

use std::time::{Duration, Instant};

use super::policy::LimiterConfig;

/// Token state for a single key.
///
/// `tokens` stays within `[0, max_tokens]` of the config the bucket was
/// created with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bucket {
    /// Tokens currently available (may be fractional)
    tokens: f64,
    /// When the last refill was computed
    last_refill: Instant,
}

impl Bucket {
    /// Create the bucket for a key's first request.
    ///
    /// The creating request consumes one token, so the bucket starts one below
    /// capacity.
    pub fn first_request(config: &LimiterConfig, now: Instant) -> Self {
        Self {
            tokens: (config.max_tokens() - 1) as f64,
            last_refill: now,
        }
    }

    /// Tokens currently available.
    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    /// When the last refill was computed.
    pub fn last_refill(&self) -> Instant {
        self.last_refill
    }

    /// Add tokens for the time elapsed since the last refill, capped at capacity.
    pub fn refill(&mut self, config: &LimiterConfig, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * config.refill_rate_per_second())
            .min(config.max_tokens() as f64);
        self.last_refill = now;
    }

    /// Take one token if a whole token is available.
    pub fn try_consume(&mut self) -> bool {
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Whether the bucket has gone unobserved for at least `idle_after`.
    pub fn is_idle(&self, now: Instant, idle_after: Duration) -> bool {
        now.saturating_duration_since(self.last_refill) >= idle_after
    }
}
