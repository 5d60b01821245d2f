//! Limiter policy: bucket capacity and refill rate.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{AtalError, Result};

/// Time unit for configured policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
}

impl TimeUnit {
    /// Get the duration of this time unit.
    pub fn duration(&self) -> Duration {
        match self {
            TimeUnit::Second => Duration::from_secs(1),
            TimeUnit::Minute => Duration::from_secs(60),
            TimeUnit::Hour => Duration::from_secs(3600),
            TimeUnit::Day => Duration::from_secs(86400),
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            TimeUnit::Second => "second",
            TimeUnit::Minute => "minute",
            TimeUnit::Hour => "hour",
            TimeUnit::Day => "day",
        }
    }

    const ALL: [TimeUnit; 4] = [
        TimeUnit::Second,
        TimeUnit::Minute,
        TimeUnit::Hour,
        TimeUnit::Day,
    ];
}

/// Configuration shared by every bucket of one limiter.
///
/// A valid config always has `max_tokens >= 1` and a finite, positive refill
/// rate; the only way to build one is through [`LimiterConfig::new`] or
/// [`LimiterConfig::per_unit`], both of which reject anything else.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LimiterConfig {
    max_tokens: u32,
    refill_rate_per_second: f64,
}

impl LimiterConfig {
    /// Create a config from a capacity and a per-second refill rate.
    pub fn new(max_tokens: u32, refill_rate_per_second: f64) -> Result<Self> {
        if max_tokens == 0 {
            return Err(AtalError::InvalidConfig(
                "max_tokens must be greater than zero".to_string(),
            ));
        }
        if !refill_rate_per_second.is_finite() || refill_rate_per_second <= 0.0 {
            return Err(AtalError::InvalidConfig(format!(
                "refill_rate_per_second must be a positive number, got {}",
                refill_rate_per_second
            )));
        }

        Ok(Self {
            max_tokens,
            refill_rate_per_second,
        })
    }

    /// Create a config allowing `requests` per `unit`, with a burst of `requests`.
    pub fn per_unit(requests: u32, unit: TimeUnit) -> Result<Self> {
        Self::new(requests, requests as f64 / unit.duration().as_secs_f64())
    }

    /// Bucket capacity.
    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    /// Tokens regenerated per second of elapsed time.
    pub fn refill_rate_per_second(&self) -> f64 {
        self.refill_rate_per_second
    }

    /// Time for an empty bucket to refill to capacity.
    ///
    /// Saturates at [`Duration::MAX`] for rates too slow to represent.
    pub fn full_refill_duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.max_tokens as f64 / self.refill_rate_per_second)
            .unwrap_or(Duration::MAX)
    }

    /// Human-readable description of the sustained rate, e.g. `5 requests per hour`.
    ///
    /// Picks the smallest unit in which the sustained rate is a whole number of
    /// requests.
    pub fn describe(&self) -> String {
        for unit in TimeUnit::ALL {
            let per_unit = self.refill_rate_per_second * unit.duration().as_secs_f64();
            let rounded = per_unit.round();
            if rounded >= 1.0 && (per_unit - rounded).abs() < 1e-6 {
                let noun = if rounded == 1.0 { "request" } else { "requests" };
                return format!("{} {} per {}", rounded as u64, noun, unit.as_str());
            }
        }

        format!("{:.4} requests per second", self.refill_rate_per_second)
    }
}
