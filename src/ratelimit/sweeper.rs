//! Periodic eviction of idle buckets.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::registry::RateLimiters;
use crate::config::SweeperConfig;

/// Spawn a task that evicts idle buckets from every limiter on an interval.
///
/// The task exits once `shutdown` is set to `true` or its sender is dropped.
pub fn spawn_sweeper(
    limiters: Arc<RateLimiters>,
    config: SweeperConfig,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let period = Duration::from_secs(config.interval_secs.max(1));

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        interval.tick().await;

        info!(
            interval_secs = period.as_secs(),
            idle_multiplier = config.idle_multiplier,
            "Bucket sweeper started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let evicted = limiters.evict_idle(config.idle_multiplier);
                    if evicted > 0 {
                        info!(evicted = evicted, "Evicted idle rate limit buckets");
                    } else {
                        debug!("No idle rate limit buckets to evict");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Bucket sweeper stopped");
    })
}
