//! Token bucket rate limiting and the named limiters built on it.

mod bucket;
mod clock;
mod limiter;
mod policy;
mod registry;
mod store;
mod sweeper;

pub use bucket::Bucket;
pub use clock::{Clock, ManualClock, SystemClock};
pub use limiter::TokenBucketLimiter;
pub use policy::{LimiterConfig, TimeUnit};
pub use registry::{LimiterName, LimiterStats, RateLimitStats, RateLimiters};
pub use store::{BucketStore, InMemoryBucketStore};
pub use sweeper::spawn_sweeper;
