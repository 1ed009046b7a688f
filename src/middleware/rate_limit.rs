use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

/// Window length. Counters reset on every UTC minute boundary.
pub const WINDOW_SECS: i64 = 60;
/// Entries whose window started more than this long ago may be dropped.
pub const RETENTION_SECS: i64 = 120;

/// Fixed-window, per-credential request counter.
///
/// Because windows are fixed, a burst straddling a boundary can see up to
/// twice the limit in a short interval.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Atomically admit one request if the current window is below `limit`.
    ///
    /// - no entry: create it with count 1, return `true`
    /// - count < limit: increment, return `true`
    /// - otherwise: return `false` and leave the count untouched
    async fn check_and_increment(
        &self,
        credential_id: Uuid,
        limit: u32,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool>;

    /// Requests left in the current window (`limit` when nothing was counted).
    async fn remaining(
        &self,
        credential_id: Uuid,
        limit: u32,
        now: DateTime<Utc>,
    ) -> anyhow::Result<u32>;

    /// Drop entries older than [`RETENTION_SECS`]. Returns how many went.
    async fn purge_stale(&self, now: DateTime<Utc>) -> anyhow::Result<u64>;
}

/// Start of the window containing `now`, as unix seconds.
pub fn window_start(now: DateTime<Utc>) -> i64 {
    now.timestamp().div_euclid(WINDOW_SECS) * WINDOW_SECS
}

/// Unix seconds of the next window boundary.
pub fn next_reset(now: DateTime<Utc>) -> i64 {
    window_start(now) + WINDOW_SECS
}

/// In-process limiter. DashMap's entry API holds the shard lock for the
/// whole read-modify-write, so concurrent requests on one credential
/// cannot both slip under the limit.
#[derive(Default)]
pub struct MemoryRateLimiter {
    entries: DashMap<(Uuid, i64), u32>,
    last_sweep: AtomicI64,
}

impl MemoryRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw counter for the window containing `now`.
    pub fn count(&self, credential_id: Uuid, now: DateTime<Utc>) -> u32 {
        self.entries
            .get(&(credential_id, window_start(now)))
            .map(|c| *c)
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn sweep(&self, now: DateTime<Utc>) -> u64 {
        let cutoff = now.timestamp() - RETENTION_SECS;
        let before = self.entries.len();
        self.entries.retain(|(_, window), _| *window >= cutoff);
        before.saturating_sub(self.entries.len()) as u64
    }

    /// Sweep at most once per window, from whichever caller gets there first.
    fn maybe_sweep(&self, now: DateTime<Utc>) {
        let window = window_start(now);
        let last = self.last_sweep.load(Ordering::Relaxed);
        if window > last
            && self
                .last_sweep
                .compare_exchange(last, window, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
        {
            let removed = self.sweep(now);
            if removed > 0 {
                tracing::debug!(removed, "purged stale rate limit entries");
            }
        }
    }
}

#[async_trait]
impl RateLimiter for MemoryRateLimiter {
    async fn check_and_increment(
        &self,
        credential_id: Uuid,
        limit: u32,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        self.maybe_sweep(now);

        let admitted = match self.entries.entry((credential_id, window_start(now))) {
            Entry::Vacant(slot) => {
                slot.insert(1);
                true
            }
            Entry::Occupied(mut slot) => {
                let count = slot.get_mut();
                if *count < limit {
                    *count += 1;
                    true
                } else {
                    false
                }
            }
        };
        Ok(admitted)
    }

    async fn remaining(
        &self,
        credential_id: Uuid,
        limit: u32,
        now: DateTime<Utc>,
    ) -> anyhow::Result<u32> {
        Ok(limit.saturating_sub(self.count(credential_id, now)))
    }

    async fn purge_stale(&self, now: DateTime<Utc>) -> anyhow::Result<u64> {
        Ok(self.sweep(now))
    }
}
