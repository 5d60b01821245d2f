//! Named limiters for the authentication flows.
//!
//! Each flow gets its own [`TokenBucketLimiter`]. Keys are namespaced per
//! limiter (`otp:`, `reset:`, `ip:`) so they cannot collide should the
//! limiters ever share a backing store. Email and phone identifiers are
//! lowercased before the key is built; IP addresses are used as given.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use super::clock::{Clock, SystemClock};
use super::limiter::TokenBucketLimiter;
use crate::config::LimitersConfig;
use crate::error::{AtalError, Result};

/// The limiters used by calling code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimiterName {
    /// OTP code requests, keyed by email or phone
    Otp,
    /// Password reset requests, keyed by email or phone
    PasswordReset,
    /// Requests per client IP
    Ip,
}

impl LimiterName {
    /// Every named limiter, in reporting order.
    pub const ALL: [LimiterName; 3] = [
        LimiterName::Otp,
        LimiterName::PasswordReset,
        LimiterName::Ip,
    ];

    /// Key prefix for this limiter.
    pub fn namespace(&self) -> &'static str {
        match self {
            LimiterName::Otp => "otp:",
            LimiterName::PasswordReset => "reset:",
            LimiterName::Ip => "ip:",
        }
    }

    /// Build the storage key for an identifier.
    ///
    /// Email and phone identifiers are lowercased; IP addresses are not.
    pub fn key(&self, identifier: &str) -> String {
        match self {
            LimiterName::Otp | LimiterName::PasswordReset => {
                format!("{}{}", self.namespace(), identifier.to_lowercase())
            }
            LimiterName::Ip => format!("{}{}", self.namespace(), identifier),
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            LimiterName::Otp => "otp",
            LimiterName::PasswordReset => "password_reset",
            LimiterName::Ip => "ip",
        }
    }
}

impl fmt::Display for LimiterName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LimiterName {
    type Err = AtalError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "otp" => Ok(LimiterName::Otp),
            "password_reset" | "reset" => Ok(LimiterName::PasswordReset),
            "ip" => Ok(LimiterName::Ip),
            other => Err(AtalError::Config(format!("Unknown limiter: {}", other))),
        }
    }
}

/// Per-limiter monitoring snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LimiterStats {
    /// Distinct keys currently tracked
    pub tracked_keys: usize,
    /// Human-readable policy, e.g. `5 requests per hour`
    pub policy: String,
    /// Bucket capacity
    pub max_tokens: u32,
}

/// Monitoring snapshot across all named limiters.
///
/// Intended for dashboards, not for making decisions.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitStats {
    /// When the snapshot was taken
    pub generated_at: DateTime<Utc>,
    /// OTP request limiter
    pub otp: LimiterStats,
    /// Password reset limiter
    pub password_reset: LimiterStats,
    /// Per-IP limiter
    pub ip: LimiterStats,
}

/// The set of named limiters shared by request handlers in one process.
///
/// Construct one at startup and pass it (usually in an `Arc`) to whatever
/// needs it. Tests build their own instance, so no state leaks between them.
pub struct RateLimiters {
    otp: TokenBucketLimiter,
    password_reset: TokenBucketLimiter,
    ip: TokenBucketLimiter,
}

impl RateLimiters {
    /// Build the limiters from configuration.
    pub fn new(config: &LimitersConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Build the limiters from configuration with an explicit time source.
    pub fn with_clock(config: &LimitersConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let otp = config.otp.to_limiter_config()?;
        let password_reset = config.password_reset.to_limiter_config()?;
        let ip = config.ip.to_limiter_config()?;

        info!(
            otp = %otp.describe(),
            password_reset = %password_reset.describe(),
            ip = %ip.describe(),
            "Rate limiters initialized"
        );

        Ok(Self {
            otp: TokenBucketLimiter::with_clock(otp, clock.clone()),
            password_reset: TokenBucketLimiter::with_clock(password_reset, clock.clone()),
            ip: TokenBucketLimiter::with_clock(ip, clock),
        })
    }

    /// Access a limiter directly.
    pub fn limiter(&self, name: LimiterName) -> &TokenBucketLimiter {
        match name {
            LimiterName::Otp => &self.otp,
            LimiterName::PasswordReset => &self.password_reset,
            LimiterName::Ip => &self.ip,
        }
    }

    /// Check a namespaced identifier against the named limiter.
    pub fn check(&self, name: LimiterName, identifier: &str) -> bool {
        let allowed = self.limiter(name).is_allowed(&name.key(identifier));
        if !allowed {
            warn!(limiter = %name, "Request rate limited");
        }
        allowed
    }

    /// Like [`RateLimiters::check`], but returns an error on denial.
    pub fn ensure(&self, name: LimiterName, identifier: &str) -> Result<()> {
        if self.check(name, identifier) {
            Ok(())
        } else {
            Err(AtalError::RateLimited { limiter: name })
        }
    }

    /// Check an OTP request for an email or phone identifier.
    pub fn check_otp(&self, identifier: &str) -> bool {
        self.check(LimiterName::Otp, identifier)
    }

    /// Check a password reset request for an email or phone identifier.
    pub fn check_password_reset(&self, identifier: &str) -> bool {
        self.check(LimiterName::PasswordReset, identifier)
    }

    /// Check a request from a client IP.
    pub fn check_ip(&self, ip: &str) -> bool {
        self.check(LimiterName::Ip, ip)
    }

    /// Like [`RateLimiters::check_otp`], but returns an error on denial.
    pub fn ensure_otp(&self, identifier: &str) -> Result<()> {
        self.ensure(LimiterName::Otp, identifier)
    }

    /// Like [`RateLimiters::check_password_reset`], but returns an error on denial.
    pub fn ensure_password_reset(&self, identifier: &str) -> Result<()> {
        self.ensure(LimiterName::PasswordReset, identifier)
    }

    /// Like [`RateLimiters::check_ip`], but returns an error on denial.
    pub fn ensure_ip(&self, ip: &str) -> Result<()> {
        self.ensure(LimiterName::Ip, ip)
    }

    /// Remaining tokens for an identifier, as of its last check.
    pub fn remaining(&self, name: LimiterName, identifier: &str) -> u32 {
        self.limiter(name).remaining_tokens(&name.key(identifier))
    }

    /// Forget an identifier in the named limiter.
    pub fn reset(&self, name: LimiterName, identifier: &str) {
        self.limiter(name).reset(&name.key(identifier));
    }

    /// Forget every key in every limiter.
    pub fn clear_all(&self) {
        for name in LimiterName::ALL {
            self.limiter(name).clear_all();
        }
    }

    /// Evict idle buckets from every limiter. Returns the total removed.
    pub fn evict_idle(&self, multiplier: f64) -> usize {
        LimiterName::ALL
            .iter()
            .map(|name| self.limiter(*name).evict_idle(multiplier))
            .sum()
    }

    /// Snapshot of tracked keys and policies.
    pub fn stats(&self) -> RateLimitStats {
        RateLimitStats {
            generated_at: Utc::now(),
            otp: limiter_stats(&self.otp),
            password_reset: limiter_stats(&self.password_reset),
            ip: limiter_stats(&self.ip),
        }
    }
}

impl Default for RateLimiters {
    fn default() -> Self {
        Self::new(&LimitersConfig::default()).expect("default rate limit policies are valid")
    }
}

fn limiter_stats(limiter: &TokenBucketLimiter) -> LimiterStats {
    LimiterStats {
        tracked_keys: limiter.size(),
        policy: limiter.config().describe(),
        max_tokens: limiter.config().max_tokens(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use std::time::Duration;

    fn registry() -> (RateLimiters, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let registry = RateLimiters::with_clock(&LimitersConfig::default(), clock.clone()).unwrap();
        (registry, clock)
    }

    #[test]
    fn test_default_policies() {
        let limiters = RateLimiters::default();
        assert_eq!(limiters.limiter(LimiterName::Otp).config().max_tokens(), 5);
        assert_eq!(
            limiters
                .limiter(LimiterName::PasswordReset)
                .config()
                .max_tokens(),
            3
        );
        assert_eq!(limiters.limiter(LimiterName::Ip).config().max_tokens(), 10);
    }

    #[test]
    fn test_key_namespacing() {
        assert_eq!(LimiterName::Otp.key("User@Example.com"), "otp:user@example.com");
        assert_eq!(
            LimiterName::PasswordReset.key("User@Example.com"),
            "reset:user@example.com"
        );
        assert_eq!(LimiterName::Ip.key("10.0.0.1"), "ip:10.0.0.1");
        assert_eq!(LimiterName::Ip.key("FE80::1"), "ip:FE80::1");
    }

    #[test]
    fn test_otp_exhaustion() {
        let (limiters, _) = registry();

        for _ in 0..5 {
            assert!(limiters.check_otp("test@example.com"));
        }
        assert!(!limiters.check_otp("test@example.com"));
    }

    #[test]
    fn test_password_reset_exhaustion() {
        let (limiters, _) = registry();

        for _ in 0..3 {
            assert!(limiters.ensure_password_reset("+15551234567").is_ok());
        }
        let err = limiters.ensure_password_reset("+15551234567").unwrap_err();
        assert!(matches!(
            err,
            AtalError::RateLimited {
                limiter: LimiterName::PasswordReset
            }
        ));
        assert_eq!(err.to_string(), "Too many requests. Please try again later.");
    }

    #[test]
    fn test_ip_limit_refills_per_minute() {
        let (limiters, clock) = registry();

        for _ in 0..10 {
            assert!(limiters.check_ip("192.168.1.10"));
        }
        assert!(!limiters.check_ip("192.168.1.10"));

        clock.advance(Duration::from_secs(7));
        assert!(limiters.check_ip("192.168.1.10"));
    }

    #[test]
    fn test_wrapper_folds_case() {
        let (limiters, _) = registry();

        for _ in 0..5 {
            assert!(limiters.check_otp("Test@Example.COM"));
        }
        assert!(!limiters.check_otp("test@example.com"));
        assert_eq!(limiters.limiter(LimiterName::Otp).size(), 1);
    }

    #[test]
    fn test_limiters_do_not_share_buckets() {
        let (limiters, _) = registry();

        for _ in 0..5 {
            limiters.check_otp("user@example.com");
        }
        assert!(!limiters.check_otp("user@example.com"));
        assert!(limiters.check_password_reset("user@example.com"));
    }

    #[test]
    fn test_remaining_and_reset() {
        let (limiters, _) = registry();

        limiters.check_otp("user@example.com");
        limiters.check_otp("user@example.com");
        assert_eq!(limiters.remaining(LimiterName::Otp, "USER@example.com"), 3);
        assert_eq!(limiters.remaining(LimiterName::Otp, "other@example.com"), 5);

        limiters.reset(LimiterName::Otp, "User@Example.com");
        assert_eq!(limiters.remaining(LimiterName::Otp, "user@example.com"), 5);
    }

    #[test]
    fn test_stats() {
        let (limiters, _) = registry();

        limiters.check_otp("a@example.com");
        limiters.check_otp("b@example.com");
        limiters.check_ip("10.0.0.1");

        let stats = limiters.stats();
        assert_eq!(stats.otp.tracked_keys, 2);
        assert_eq!(stats.otp.policy, "5 requests per hour");
        assert_eq!(stats.password_reset.tracked_keys, 0);
        assert_eq!(stats.password_reset.policy, "3 requests per hour");
        assert_eq!(stats.ip.tracked_keys, 1);
        assert_eq!(stats.ip.policy, "10 requests per minute");

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["otp"]["tracked_keys"], 2);
        assert!(json["generated_at"].is_string());
    }

    #[test]
    fn test_clear_all_and_evict() {
        let (limiters, clock) = registry();

        limiters.check_otp("a@example.com");
        limiters.check_ip("10.0.0.1");

        // The IP bucket refills in a minute; OTP needs an hour
        clock.advance(Duration::from_secs(121));
        assert_eq!(limiters.evict_idle(2.0), 1);
        assert_eq!(limiters.limiter(LimiterName::Ip).size(), 0);
        assert_eq!(limiters.limiter(LimiterName::Otp).size(), 1);

        limiters.clear_all();
        assert_eq!(limiters.limiter(LimiterName::Otp).size(), 0);
    }

    #[test]
    fn test_limiter_name_parsing() {
        assert_eq!("otp".parse::<LimiterName>().unwrap(), LimiterName::Otp);
        assert_eq!(
            "reset".parse::<LimiterName>().unwrap(),
            LimiterName::PasswordReset
        );
        assert_eq!(
            "password_reset".parse::<LimiterName>().unwrap(),
            LimiterName::PasswordReset
        );
        assert_eq!("ip".parse::<LimiterName>().unwrap(), LimiterName::Ip);
        assert!("sms".parse::<LimiterName>().is_err());
        assert_eq!(LimiterName::PasswordReset.to_string(), "password_reset");
    }
}
