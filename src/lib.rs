//! ATAL rate limiting
//!
//! This crate implements the in-memory token bucket limiter that guards the
//! ATAL AI authentication flows (OTP requests, password resets and per-IP
//! throttling). State lives in a single process; every server instance keeps
//! its own independent set of buckets.

pub mod config;
pub mod error;
pub mod ratelimit;
