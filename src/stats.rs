//! Hit, miss, and eviction accounting.
//!
//! The map core only ever talks to the [`StatsCounter`] contract. By default
//! a disabled counter is installed and every call is a no-op; call
//! [`MapMaker::record_stats`][crate::MapMaker::record_stats] to install the
//! concurrent counter.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::CachePadded;

/// A snapshot of accumulated statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    hit_count: u64,
    miss_count: u64,
    eviction_count: u64,
}

impl CacheStats {
    pub(crate) fn new(hit_count: u64, miss_count: u64, eviction_count: u64) -> Self {
        Self {
            hit_count,
            miss_count,
            eviction_count,
        }
    }

    pub fn hit_count(&self) -> u64 {
        self.hit_count
    }

    pub fn miss_count(&self) -> u64 {
        self.miss_count
    }

    /// Removals whose cause reports `was_evicted()`.
    pub fn eviction_count(&self) -> u64 {
        self.eviction_count
    }

    pub fn request_count(&self) -> u64 {
        self.hit_count.saturating_add(self.miss_count)
    }

    pub fn hit_rate(&self) -> f64 {
        let req_count = self.request_count();
        if req_count == 0 {
            1.0
        } else {
            self.hit_count as f64 / req_count as f64
        }
    }
}

/// Accumulates statistics on behalf of a map. Implementations must be
/// thread-safe; every method may be called concurrently.
pub trait StatsCounter: Send + Sync + 'static {
    fn record_hit(&self);
    fn record_miss(&self);
    fn record_eviction(&self);
    fn snapshot(&self) -> CacheStats;
}

/// The default counter. Records nothing and snapshots as all zeros.
#[derive(Default)]
pub(crate) struct DisabledStatsCounter;

impl StatsCounter for DisabledStatsCounter {
    fn record_hit(&self) {}
    fn record_miss(&self) {}
    fn record_eviction(&self) {}

    fn snapshot(&self) -> CacheStats {
        CacheStats::default()
    }
}

/// A lock-free counter using relaxed atomics. Snapshots are weakly
/// consistent, like the bulk operations of the map itself.
#[derive(Default)]
pub(crate) struct ConcurrentStatsCounter {
    hit_count: CachePadded<AtomicU64>,
    miss_count: CachePadded<AtomicU64>,
    eviction_count: CachePadded<AtomicU64>,
}

impl StatsCounter for ConcurrentStatsCounter {
    fn record_hit(&self) {
        self.hit_count.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.miss_count.fetch_add(1, Ordering::Relaxed);
    }

    fn record_eviction(&self) {
        self.eviction_count.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats::new(
            self.hit_count.load(Ordering::Relaxed),
            self.miss_count.load(Ordering::Relaxed),
            self.eviction_count.load(Ordering::Relaxed),
        )
    }
}
