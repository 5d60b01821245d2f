//! Configuration management for ATAL rate limiting.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::error::{AtalError, Result};
use crate::ratelimit::{LimiterConfig, TimeUnit};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AtalConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Policies for the named limiters
    #[serde(default)]
    pub limiters: LimitersConfig,

    /// Idle bucket eviction
    #[serde(default)]
    pub sweeper: SweeperConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// A rate policy as written in configuration: `requests_per_unit` per `unit`.
///
/// The burst capacity equals `requests_per_unit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub requests_per_unit: u32,
    pub unit: TimeUnit,
}

impl PolicyConfig {
    pub fn new(requests_per_unit: u32, unit: TimeUnit) -> Self {
        Self {
            requests_per_unit,
            unit,
        }
    }

    /// Validate and convert into a limiter config.
    pub fn to_limiter_config(&self) -> Result<LimiterConfig> {
        LimiterConfig::per_unit(self.requests_per_unit, self.unit)
    }
}

/// Policies for the named limiters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitersConfig {
    #[serde(default = "default_otp_policy")]
    pub otp: PolicyConfig,

    #[serde(default = "default_password_reset_policy")]
    pub password_reset: PolicyConfig,

    #[serde(default = "default_ip_policy")]
    pub ip: PolicyConfig,
}

impl Default for LimitersConfig {
    fn default() -> Self {
        Self {
            otp: default_otp_policy(),
            password_reset: default_password_reset_policy(),
            ip: default_ip_policy(),
        }
    }
}

fn default_otp_policy() -> PolicyConfig {
    PolicyConfig::new(5, TimeUnit::Hour)
}

fn default_password_reset_policy() -> PolicyConfig {
    PolicyConfig::new(3, TimeUnit::Hour)
}

fn default_ip_policy() -> PolicyConfig {
    PolicyConfig::new(10, TimeUnit::Minute)
}

/// Idle bucket sweeper configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperConfig {
    /// Run the sweeper at all
    #[serde(default = "default_sweeper_enabled")]
    pub enabled: bool,

    /// Seconds between sweeps
    #[serde(default = "default_sweep_interval")]
    pub interval_secs: u64,

    /// A bucket is evicted after this many full refill periods without a check
    #[serde(default = "default_idle_multiplier")]
    pub idle_multiplier: f64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: default_sweeper_enabled(),
            interval_secs: default_sweep_interval(),
            idle_multiplier: default_idle_multiplier(),
        }
    }
}

impl SweeperConfig {
    /// Reject multipliers that are not finite or below one refill period.
    pub fn validate(&self) -> Result<()> {
        if !self.idle_multiplier.is_finite() || self.idle_multiplier < 1.0 {
            return Err(AtalError::Config(format!(
                "sweeper.idle_multiplier must be a finite number >= 1, got {}",
                self.idle_multiplier
            )));
        }
        Ok(())
    }
}

fn default_sweeper_enabled() -> bool {
    true
}

fn default_sweep_interval() -> u64 {
    300
}

fn default_idle_multiplier() -> f64 {
    2.0
}

impl AtalConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    ///
    /// An empty document yields the default configuration.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: AtalConfig = serde_yaml::from_str(yaml)
            .map_err(|e| AtalError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.sweeper.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AtalConfig::from_yaml("").unwrap();
        assert_eq!(config.limiters.otp, PolicyConfig::new(5, TimeUnit::Hour));
        assert_eq!(
            config.limiters.password_reset,
            PolicyConfig::new(3, TimeUnit::Hour)
        );
        assert_eq!(config.limiters.ip, PolicyConfig::new(10, TimeUnit::Minute));
        assert_eq!(config.logging.level, "info");
        assert!(config.sweeper.enabled);
    }

    #[test]
    fn test_parse_partial_config() {
        let yaml = r#"
logging:
  json: true
limiters:
  ip:
    requests_per_unit: 100
    unit: second
sweeper:
  interval_secs: 60
"#;
        let config = AtalConfig::from_yaml(yaml).unwrap();
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.limiters.ip, PolicyConfig::new(100, TimeUnit::Second));
        assert_eq!(config.limiters.otp, PolicyConfig::new(5, TimeUnit::Hour));
        assert_eq!(config.sweeper.interval_secs, 60);
        assert_eq!(config.sweeper.idle_multiplier, 2.0);
    }

    #[test]
    fn test_parse_invalid_unit() {
        let yaml = r#"
limiters:
  otp:
    requests_per_unit: 5
    unit: fortnight
"#;
        let err = AtalConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, AtalError::Config(_)));
    }

    #[test]
    fn test_rejects_unusable_idle_multiplier() {
        for value in [".inf", ".nan", "0.5", "-2"] {
            let yaml = format!("sweeper:\n  idle_multiplier: {}\n", value);
            let err = AtalConfig::from_yaml(&yaml).unwrap_err();
            assert!(matches!(err, AtalError::Config(_)), "accepted {}", value);
        }

        let config = AtalConfig::from_yaml("sweeper:\n  idle_multiplier: 1.0\n").unwrap();
        assert_eq!(config.sweeper.idle_multiplier, 1.0);
    }

    #[test]
    fn test_from_file_missing_path() {
        let path = std::env::temp_dir().join("atal-ratelimit-missing-config.yaml");
        let _ = std::fs::remove_file(&path);

        let err = AtalConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, AtalError::Io(_)));
    }

    #[test]
    fn test_from_file_reads_yaml() {
        let path = std::env::temp_dir().join(format!(
            "atal-ratelimit-config-{}.yaml",
            std::process::id()
        ));
        std::fs::write(&path, "limiters:\n  otp:\n    requests_per_unit: 7\n    unit: day\n")
            .unwrap();

        let config = AtalConfig::from_file(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(config.limiters.otp, PolicyConfig::new(7, TimeUnit::Day));
    }

    #[test]
    fn test_zero_requests_rejected_on_conversion() {
        let policy = PolicyConfig::new(0, TimeUnit::Minute);
        assert!(matches!(
            policy.to_limiter_config(),
            Err(AtalError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_default_policy_rates() {
        let otp = default_otp_policy().to_limiter_config().unwrap();
        assert!((otp.refill_rate_per_second() - 5.0 / 3600.0).abs() < 1e-12);

        let reset = default_password_reset_policy().to_limiter_config().unwrap();
        assert!((reset.refill_rate_per_second() - 3.0 / 3600.0).abs() < 1e-12);

        let ip = default_ip_policy().to_limiter_config().unwrap();
        assert!((ip.refill_rate_per_second() - 10.0 / 60.0).abs() < 1e-12);
    }
}
