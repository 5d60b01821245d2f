//! Core token bucket limiter.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use super::bucket::Bucket;
use super::clock::{Clock, SystemClock};
use super::policy::LimiterConfig;
use super::store::{BucketStore, InMemoryBucketStore};

/// Token bucket limiter with one lazily created bucket per key.
///
/// Keys are opaque and case-sensitive; callers normalize identifiers before
/// checking them. This struct is thread-safe and can be shared across tasks.
pub struct TokenBucketLimiter {
    config: LimiterConfig,
    store: Arc<dyn BucketStore>,
    clock: Arc<dyn Clock>,
}

impl TokenBucketLimiter {
    /// Create a limiter backed by the system clock and an in-memory store.
    pub fn new(config: LimiterConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a limiter with an explicit time source.
    pub fn with_clock(config: LimiterConfig, clock: Arc<dyn Clock>) -> Self {
        Self::with_store_and_clock(config, Arc::new(InMemoryBucketStore::new()), clock)
    }

    /// Create a limiter with an explicit store and time source.
    pub fn with_store_and_clock(
        config: LimiterConfig,
        store: Arc<dyn BucketStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            store,
            clock,
        }
    }

    /// The policy shared by every bucket of this limiter.
    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// Decide whether a request for `key` may proceed, consuming a token if so.
    ///
    /// The refill is applied even when the request is denied.
    pub fn is_allowed(&self, key: &str) -> bool {
        let now = self.clock.now();
        let mut allowed = false;

        self.store.modify(key, &mut |existing| match existing {
            None => {
                debug!(
                    key = %key,
                    max_tokens = self.config.max_tokens(),
                    "Creating new token bucket"
                );
                allowed = true;
                Bucket::first_request(&self.config, now)
            }
            Some(mut bucket) => {
                bucket.refill(&self.config, now);
                allowed = bucket.try_consume();
                bucket
            }
        });

        trace!(key = %key, allowed = allowed, "Checked token bucket");
        if !allowed {
            debug!(key = %key, "Rate limit exceeded");
        }

        allowed
    }

    /// Whole tokens left for `key` as of its last check.
    ///
    /// No refill is computed here, so the value can lag behind what the next
    /// `is_allowed` call will see. Untracked keys report full capacity.
    pub fn remaining_tokens(&self, key: &str) -> u32 {
        match self.store.get(key) {
            Some(bucket) => bucket.tokens().floor() as u32,
            None => self.config.max_tokens(),
        }
    }

    /// Forget `key`; its next check behaves like a first request.
    pub fn reset(&self, key: &str) {
        if self.store.remove(key) {
            debug!(key = %key, "Reset token bucket");
        }
    }

    /// Forget every key.
    pub fn clear_all(&self) {
        self.store.clear();
    }

    /// Number of keys currently tracked.
    pub fn size(&self) -> usize {
        self.store.len()
    }

    /// Drop buckets idle for at least `multiplier` full refill periods.
    ///
    /// A bucket idle that long has refilled to capacity, so removing it does
    /// not change any future decision. Multipliers below 1 (or NaN) are treated
    /// as 1, and thresholds too large to represent never evict.
    /// Returns the number of buckets removed.
    pub fn evict_idle(&self, multiplier: f64) -> usize {
        let full = self.config.full_refill_duration().as_secs_f64();
        let idle_after = Duration::try_from_secs_f64(full * multiplier.max(1.0))
            .unwrap_or(Duration::MAX);
        let now = self.clock.now();

        self.store
            .retain(&mut |_key, bucket| !bucket.is_idle(now, idle_after))
    }
}
