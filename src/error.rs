//! Error types for ATAL rate limiting.

use thiserror::Error;

use crate::ratelimit::LimiterName;

/// Main error type for rate limiting operations.
#[derive(Error, Debug)]
pub enum AtalError {
    /// Configuration file could not be parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// A limiter was constructed with a non-positive capacity or refill rate
    #[error("Invalid limiter configuration: {0}")]
    InvalidConfig(String),

    /// The caller exceeded the named limiter's policy
    #[error("Too many requests. Please try again later.")]
    RateLimited {
        /// Which limiter denied the request
        limiter: LimiterName,
    },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for rate limiting operations.
pub type Result<T> = std::result::Result<T, AtalError>;
