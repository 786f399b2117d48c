//! Periodic removal of idle buckets

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::limiter::RateLimiter;

/// Spawn a background cleanup task that runs every `interval`
///
/// The task exits when `shutdown` flips to `true` or its sender is dropped.
pub fn spawn_cleanup_task(
    limiter: Arc<dyn RateLimiter>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(
            interval_secs = interval.as_secs(),
            "Starting rate limiter cleanup task"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = sleep(interval) => {
                    let removed = limiter.cleanup().await;
                    if removed > 0 {
                        tracing::debug!(
                            removed,
                            remaining = limiter.bucket_count(),
                            "Removed idle rate limit buckets"
                        );
                    }
                }
            }
        }

        tracing::info!("Rate limiter cleanup task shutting down");
    })
}
