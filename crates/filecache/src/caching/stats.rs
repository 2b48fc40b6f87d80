use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Running counters of a single cache.
#[derive(Debug, Default)]
pub(super) struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub opens: AtomicU64,
    pub open_failures: AtomicU64,
    pub evictions: AtomicU64,
    pub stale: AtomicU64,
    pub close_failures: AtomicU64,
    pub detached: AtomicU64,
}

/// A point-in-time copy of the counters of a cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Acquires served by an idle cached instance.
    pub hits: u64,
    /// Acquires which had to open a new instance.
    pub misses: u64,
    /// Successful opens through the factory.
    pub opens: u64,
    /// Failed or cancelled opens through the factory.
    pub open_failures: u64,
    /// Instances removed by eviction, clearing or ejection.
    pub evictions: u64,
    /// Idle instances that were discarded on reuse because they went stale.
    pub stale: u64,
    /// Instances whose close reported an error.
    pub close_failures: u64,
    /// In-use instances that were removed by a forced clear and closed on release.
    pub detached: u64,
}

impl CacheStats {
    pub fn incr(counter: &AtomicU64) {
        Self::add(counter, 1);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let get = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        StatsSnapshot {
            hits: get(&self.hits),
            misses: get(&self.misses),
            opens: get(&self.opens),
            open_failures: get(&self.open_failures),
            evictions: get(&self.evictions),
            stale: get(&self.stale),
            close_failures: get(&self.close_failures),
            detached: get(&self.detached),
        }
    }
}
