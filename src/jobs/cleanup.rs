//! Background job: purge expired rate-limit windows.
//!
//! The in-memory limiter also sweeps opportunistically on each window
//! change; this job bounds storage for backends that don't.

use std::sync::Arc;
use std::time::Duration;

use tokio::time;

use crate::middleware::rate_limit::RateLimiter;

/// Spawn the background cleanup task. Call this once at startup.
pub fn spawn(limiter: Arc<dyn RateLimiter>) {
    tokio::spawn(async move {
        let mut interval = time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            match limiter.purge_stale(chrono::Utc::now()).await {
                Ok(0) => {}
                Ok(rows) => tracing::debug!(rows, "purged stale rate limit entries"),
                Err(e) => tracing::error!("rate limit cleanup failed: {}", e),
            }
        }
    });
}
