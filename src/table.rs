//! The segmented table: a fixed array of independently lockable segments,
//! a hash spreader, and the segment selector. Every operation is routed to
//! one segment by the top bits of the spread hash; bulk operations visit
//! the segments one at a time and are weakly consistent.

use std::sync::{Arc, Weak};

use crossbeam_utils::CachePadded;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use scheduled_thread_pool::{JobHandle, ScheduledThreadPool};
use triomphe::Arc as TrioArc;

use crate::{
    builder::CacheConfig,
    computing::ComputingState,
    entry::EntryRef,
    error::{BoxError, ComputeError},
    segment::{ComputeProbe, Lookup, Segment},
};

/// The user-supplied computing function of a computing map.
pub(crate) type ComputeFn<K, V> =
    Arc<dyn Fn(&Arc<K>) -> Result<Arc<V>, BoxError> + Send + Sync + 'static>;

const MAX_SEGMENTS: usize = 1 << 16;

/// Shared by every map configured with a cleanup executor. The jobs hold
/// only weak table handles, so a dropped map cannot be kept alive by its
/// job.
static CLEANUP_POOL: Lazy<ScheduledThreadPool> =
    Lazy::new(|| ScheduledThreadPool::with_name("mapmaker-cleanup-{}", 1));

/// Applies an avalanche function to defend against poorly distributed user
/// hashes. Both the segment selector (top bits) and the bucket index (low
/// bits) depend on it.
#[inline]
pub(crate) fn spread(mut h: u64) -> u64 {
    h = h.wrapping_add((h << 15) ^ 0xffff_cd7d);
    h ^= h >> 10;
    h = h.wrapping_add(h << 3);
    h ^= h >> 6;
    h = h.wrapping_add((h << 2).wrapping_add(h << 14));
    h ^ (h >> 16)
}

pub(crate) struct Table<K, V> {
    segments: Box<[CachePadded<Segment<K, V>>]>,
    segment_shift: u32,
    segment_mask: usize,
    cleanup_job: Mutex<Option<JobHandle>>,
    config: Arc<CacheConfig<K, V>>,
}

impl<K, V> Drop for Table<K, V> {
    fn drop(&mut self) {
        if let Some(handle) = self.cleanup_job.get_mut().take() {
            handle.cancel();
        }
    }
}

impl<K: 'static, V: 'static> Table<K, V> {
    pub(crate) fn new(config: Arc<CacheConfig<K, V>>) -> Self {
        let segment_count = config
            .concurrency_level
            .next_power_of_two()
            .min(MAX_SEGMENTS);
        let segment_shift = 64 - segment_count.trailing_zeros();
        let segment_mask = segment_count - 1;
        let buckets_per_segment =
            (config.initial_capacity + segment_count - 1) / segment_count;
        let max_per_segment = config
            .maximum_size
            .map(|max| (max + segment_count - 1) / segment_count);

        let segments = (0..segment_count)
            .map(|_| {
                CachePadded::new(Segment::new(
                    buckets_per_segment,
                    max_per_segment,
                    Arc::clone(&config),
                ))
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            segments,
            segment_shift,
            segment_mask,
            cleanup_job: Mutex::new(None),
            config,
        }
    }

    pub(crate) fn config(&self) -> &Arc<CacheConfig<K, V>> {
        &self.config
    }

    pub(crate) fn hash_key(&self, key: &K) -> u64 {
        spread(self.config.key_equivalence.hash(key))
    }

    #[inline]
    fn segment_for(&self, hash: u64) -> &Segment<K, V> {
        let index = if self.segment_shift == 64 {
            0
        } else {
            (hash >> self.segment_shift) as usize & self.segment_mask
        };
        &self.segments[index]
    }

    // ------------------------------------------------------------------
    // Single-key operations
    // ------------------------------------------------------------------

    pub(crate) fn get(&self, key: &K) -> Option<Arc<V>> {
        let hash = self.hash_key(key);
        match self.segment_for(hash).get(key, hash, true) {
            Lookup::Present(value) => {
                self.config.stats.record_hit();
                Some(value)
            }
            // A pending computation is invisible to a plain read.
            Lookup::Pending(_) | Lookup::Absent => {
                self.config.stats.record_miss();
                None
            }
        }
    }

    pub(crate) fn insert(&self, key: Arc<K>, value: Arc<V>) -> Option<Arc<V>> {
        let hash = self.hash_key(&key);
        self.segment_for(hash).insert(key, hash, value, false)
    }

    pub(crate) fn insert_if_absent(&self, key: Arc<K>, value: Arc<V>) -> Option<Arc<V>> {
        let hash = self.hash_key(&key);
        self.segment_for(hash).insert(key, hash, value, true)
    }

    pub(crate) fn remove(&self, key: &K) -> Option<Arc<V>> {
        let hash = self.hash_key(key);
        self.segment_for(hash).remove(key, hash)
    }

    pub(crate) fn remove_if_equals(&self, key: &K, expected: &V) -> bool {
        let hash = self.hash_key(key);
        self.segment_for(hash).remove_if_equals(key, hash, expected)
    }

    pub(crate) fn replace(&self, key: &K, value: Arc<V>) -> Option<Arc<V>> {
        let hash = self.hash_key(key);
        self.segment_for(hash).replace(key, hash, value)
    }

    pub(crate) fn replace_if_equals(&self, key: &K, expected: &V, value: Arc<V>) -> bool {
        let hash = self.hash_key(key);
        self.segment_for(hash)
            .replace_if_equals(key, hash, expected, value)
    }

    pub(crate) fn contains_key(&self, key: &K) -> bool {
        let hash = self.hash_key(key);
        self.segment_for(hash).contains_key(key, hash)
    }

    // ------------------------------------------------------------------
    // Bulk operations (weakly consistent)
    // ------------------------------------------------------------------

    pub(crate) fn len(&self) -> usize {
        self.segments.iter().map(|s| s.len()).sum()
    }

    /// Two scan passes validated by the segments' modification counts; if
    /// the table would not sit still, the last pass's answer is returned.
    pub(crate) fn contains_value(&self, value: &V) -> bool {
        const RETRIES: usize = 2;
        for _ in 0..RETRIES {
            let before = self.mod_count_sum();
            if self.segments.iter().any(|s| s.scan_value(value)) {
                return true;
            }
            if before == self.mod_count_sum() {
                return false;
            }
        }
        self.segments.iter().any(|s| s.scan_value(value))
    }

    fn mod_count_sum(&self) -> u64 {
        self.segments
            .iter()
            .fold(0u64, |acc, s| acc.wrapping_add(s.mod_count()))
    }

    pub(crate) fn clear(&self) {
        for segment in self.segments.iter() {
            segment.clear();
        }
    }

    pub(crate) fn run_cleanup(&self) {
        for segment in self.segments.iter() {
            segment.run_cleanup();
        }
    }

    pub(crate) fn release_soft_references(&self) {
        for segment in self.segments.iter() {
            segment.release_soft_references();
        }
    }

    pub(crate) fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub(crate) fn segment_snapshot(&self, index: usize) -> Vec<(Arc<K>, Arc<V>)> {
        self.segments[index].snapshot()
    }
}

impl<K, V> Table<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Starts the out-of-line cleanup job if an executor interval was
    /// configured. Cleanup stays amortized onto caller threads either way;
    /// the job only bounds how long a quiet map can defer its sweeps.
    pub(crate) fn start_cleanup_job(self: &Arc<Self>) {
        let Some(interval) = self.config.cleanup_interval else {
            return;
        };
        let weak: Weak<Self> = Arc::downgrade(self);
        let handle = CLEANUP_POOL.execute_at_fixed_rate(interval, interval, move || {
            if let Some(table) = weak.upgrade() {
                table.run_cleanup();
            }
        });
        *self.cleanup_job.lock() = Some(handle);
    }

    /// The computing protocol: return the cached value, wait on another
    /// thread's computation, or compute here with no lock held.
    pub(crate) fn get_or_compute(
        &self,
        key: &Arc<K>,
        compute: &ComputeFn<K, V>,
    ) -> Result<Arc<V>, ComputeError> {
        let hash = self.hash_key(key);
        let segment = self.segment_for(hash);

        // Fast path: shared lock only.
        match segment.get(key, hash, true) {
            Lookup::Present(value) => {
                self.config.stats.record_hit();
                return Ok(value);
            }
            Lookup::Pending(state) => {
                self.config.stats.record_miss();
                return state.wait().into_result();
            }
            Lookup::Absent => {}
        }

        match segment.compute_probe(key, hash) {
            ComputeProbe::Present(value) => {
                self.config.stats.record_hit();
                Ok(value)
            }
            ComputeProbe::Wait(state) => {
                self.config.stats.record_miss();
                state.wait().into_result()
            }
            ComputeProbe::Compute(entry, state) => {
                self.config.stats.record_miss();
                let mut guard = AbandonGuard {
                    segment,
                    entry: &entry,
                    state: &state,
                    armed: true,
                };
                let outcome = compute(key);
                guard.armed = false;
                match outcome {
                    Ok(value) => Ok(segment.publish_computed(&entry, &state, value)),
                    Err(cause) => {
                        let error = ComputeError::from_cause(cause);
                        match segment.abandon_computation(&entry, &state, error.clone()) {
                            // An external insert won the race; its value is
                            // what every caller observes.
                            Some(winner) => Ok(winner),
                            None => Err(error),
                        }
                    }
                }
            }
        }
    }
}

/// Rolls back the pending entry if the computing function panics, so
/// waiters are released instead of hanging on the latch.
struct AbandonGuard<'a, K: 'static, V: 'static> {
    segment: &'a Segment<K, V>,
    entry: &'a EntryRef<K, V>,
    state: &'a TrioArc<ComputingState<V>>,
    armed: bool,
}

impl<'a, K: 'static, V: 'static> Drop for AbandonGuard<'a, K, V> {
    fn drop(&mut self) {
        if self.armed {
            let _ = self
                .segment
                .abandon_computation(self.entry, self.state, ComputeError::Abandoned);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{spread, Table};
    use crate::builder::CacheConfig;
    use std::sync::Arc;

    #[test]
    fn spread_separates_dense_keys() {
        // Sequential hashes must not collapse onto one segment/bucket.
        let spread_values: std::collections::HashSet<u64> = (0u64..64).map(spread).collect();
        assert_eq!(spread_values.len(), 64);
    }

    #[test]
    fn segment_count_rounds_up_to_power_of_two() {
        let config: Arc<CacheConfig<u32, u32>> = Arc::new(CacheConfig::with_defaults());
        let table = Table::new(config);
        assert_eq!(table.segment_count(), 4);

        let mut config: CacheConfig<u32, u32> = CacheConfig::with_defaults();
        config.concurrency_level = 5;
        let table = Table::new(Arc::new(config));
        assert_eq!(table.segment_count(), 8);

        let mut config: CacheConfig<u32, u32> = CacheConfig::with_defaults();
        config.concurrency_level = 1;
        let table = Table::new(Arc::new(config));
        assert_eq!(table.segment_count(), 1);
    }

    #[test]
    fn routes_operations_by_key() {
        let table: Table<u32, String> = Table::new(Arc::new(CacheConfig::with_defaults()));
        assert!(table.insert(Arc::new(1), Arc::new("one".into())).is_none());
        assert!(table.insert(Arc::new(2), Arc::new("two".into())).is_none());
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(&1).as_deref(), Some(&"one".to_string()));
        assert!(table.contains_key(&2));
        assert!(table.contains_value(&"two".to_string()));
        assert!(!table.contains_value(&"three".to_string()));
        assert_eq!(table.remove(&1).as_deref(), Some(&"one".to_string()));
        assert!(table.get(&1).is_none());
        table.clear();
        assert_eq!(table.len(), 0);
    }
}
