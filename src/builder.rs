//! The map builder.
//!
//! `MapMaker` collects configuration through a fluent pipeline in which
//! every knob may be set at most once, then selects one of three build
//! targets: the stock segmented table when nothing was customized, the
//! null variant when a zero bound or zero duration makes every entry
//! evict on insert, and the full table otherwise.

use std::{fmt, hash::Hash, sync::Arc, time::Duration};

use crate::{
    cache::{CacheMap, ComputingMap, NullMap},
    equivalence::Equivalence,
    error::BoxError,
    notification::{RemovalCause, RemovalListener, RemovalNotifier},
    reference::Strength,
    stats::{ConcurrentStatsCounter, DisabledStatsCounter, StatsCounter},
    table::Table,
    time::{Clock, Instant, Ticker},
};

const DEFAULT_INITIAL_CAPACITY: usize = 16;
const DEFAULT_CONCURRENCY_LEVEL: usize = 4;

/// A builder of concurrent maps with any combination of these features:
/// weak or soft keys, weak or soft values, size-based eviction, timed
/// expiration, removal notification, and on-demand computation of values.
///
/// ```rust
/// use mapmaker::MapMaker;
/// use std::{sync::Arc, time::Duration};
///
/// let graphs = MapMaker::new()
///     .concurrency_level(4)
///     .maximum_size(10_000)
///     .expire_after_write(Duration::from_secs(10 * 60))
///     .make_map();
///
/// graphs.insert(Arc::new("k1"), Arc::new("v1"));
/// assert_eq!(graphs.get(&"k1").as_deref(), Some(&"v1"));
/// ```
///
/// These features are all optional; `MapMaker::new().make_map()` returns a
/// map with strong references, no eviction, and no expiration.
///
/// Building a map does not consume the builder, so one configuration can
/// produce several independent maps.
///
/// # Panics
///
/// Each knob may be set at most once; a second assignment panics. So do a
/// zero `concurrency_level` and an attempt to combine `expire_after_write`
/// with `expire_after_access`.
pub struct MapMaker<K, V> {
    initial_capacity: Option<usize>,
    concurrency_level: Option<usize>,
    maximum_size: Option<usize>,
    key_strength: Option<Strength>,
    value_strength: Option<Strength>,
    expire_after_write: Option<Duration>,
    expire_after_access: Option<Duration>,
    key_equivalence: Option<Arc<dyn Equivalence<K>>>,
    value_equivalence: Option<Arc<dyn Equivalence<V>>>,
    removal_listener: Option<RemovalListener<K, V>>,
    ticker: Option<Arc<dyn Ticker>>,
    cleanup_interval: Option<Duration>,
    record_stats: bool,
    null_removal_cause: Option<RemovalCause>,
}

impl<K, V> Default for MapMaker<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> MapMaker<K, V> {
    /// A builder with default settings: strong keys, strong values, and no
    /// automatic eviction of any kind.
    pub fn new() -> Self {
        Self {
            initial_capacity: None,
            concurrency_level: None,
            maximum_size: None,
            key_strength: None,
            value_strength: None,
            expire_after_write: None,
            expire_after_access: None,
            key_equivalence: None,
            value_equivalence: None,
            removal_listener: None,
            ticker: None,
            cleanup_interval: None,
            record_stats: false,
            null_removal_cause: None,
        }
    }

    /// Sets a custom initial capacity (defaults to 16). This is a sizing
    /// hint for the bucket arrays; resizing is relatively slow, so provide
    /// an estimate when one is known.
    pub fn initial_capacity(mut self, capacity: usize) -> Self {
        assert!(
            self.initial_capacity.is_none(),
            "initial capacity was already set to {}",
            self.initial_capacity.unwrap()
        );
        self.initial_capacity = Some(capacity);
        self
    }

    /// Guides the allowed concurrency among update operations (defaults to
    /// 4). The table is partitioned into this many independently lockable
    /// segments, rounded up to a power of two.
    pub fn concurrency_level(mut self, concurrency_level: usize) -> Self {
        assert!(
            self.concurrency_level.is_none(),
            "concurrency level was already set to {}",
            self.concurrency_level.unwrap()
        );
        assert!(concurrency_level > 0, "concurrency level must be positive");
        self.concurrency_level = Some(concurrency_level);
        self
    }

    /// Specifies the maximum number of entries the map may contain. As the
    /// size approaches the maximum, the map evicts entries that are less
    /// likely to be used again, notifying the listener with cause `Size`.
    ///
    /// The bound is maintained per segment, each segment's share being
    /// `ceil(size / segment_count)`, so momentary totals may vary around
    /// `size` by up to `concurrency_level - 1`.
    ///
    /// When `size` is zero, entries can be inserted but are evicted
    /// immediately.
    pub fn maximum_size(mut self, size: usize) -> Self {
        assert!(
            self.maximum_size.is_none(),
            "maximum size was already set to {}",
            self.maximum_size.unwrap()
        );
        self.maximum_size = Some(size);
        if size == 0 {
            // SIZE trumps EXPIRED
            self.null_removal_cause = Some(RemovalCause::Size);
        }
        self
    }

    /// Stores keys as non-owning weak references: the map never keeps a
    /// key's referent alive, and an entry whose key is dropped elsewhere is
    /// removed with cause `Collected`.
    ///
    /// Weak keys switch key equality to identity, so a lookup with a
    /// logically equal key from a different allocation always misses.
    pub fn weak_keys(self) -> Self {
        self.set_key_strength(Strength::Weak)
    }

    /// Stores keys as soft references, surrendered in response to
    /// [`release_soft_references`][CacheMap::release_soft_references].
    /// Like weak keys, soft keys switch key equality to identity.
    pub fn soft_keys(self) -> Self {
        self.set_key_strength(Strength::Soft)
    }

    fn set_key_strength(mut self, strength: Strength) -> Self {
        assert!(
            self.key_strength.is_none(),
            "key strength was already set to {:?}",
            self.key_strength.unwrap()
        );
        self.key_strength = Some(strength);
        self
    }

    /// Stores values as non-owning weak references. Weak values switch
    /// value equality to identity, which affects `contains_value`,
    /// `remove_if_equals`, and `replace_if_equals`.
    pub fn weak_values(self) -> Self {
        self.set_value_strength(Strength::Weak)
    }

    /// Stores values as soft references, surrendered in response to the
    /// memory-pressure signal. Like weak values, soft values switch value
    /// equality to identity.
    pub fn soft_values(self) -> Self {
        self.set_value_strength(Strength::Soft)
    }

    fn set_value_strength(mut self, strength: Strength) -> Self {
        assert!(
            self.value_strength.is_none(),
            "value strength was already set to {:?}",
            self.value_strength.unwrap()
        );
        self.value_strength = Some(strength);
        self
    }

    /// Expires each entry a fixed duration after its creation or most
    /// recent replacement. A zero duration admits entries and evicts them
    /// immediately.
    pub fn expire_after_write(mut self, duration: Duration) -> Self {
        self.check_expiration();
        self.expire_after_write = Some(duration);
        if duration.is_zero() && self.null_removal_cause.is_none() {
            // SIZE trumps EXPIRED
            self.null_removal_cause = Some(RemovalCause::Expired);
        }
        self
    }

    /// Expires each entry a fixed duration after its last read or write.
    /// A zero duration admits entries and evicts them immediately.
    pub fn expire_after_access(mut self, duration: Duration) -> Self {
        self.check_expiration();
        self.expire_after_access = Some(duration);
        if duration.is_zero() && self.null_removal_cause.is_none() {
            // SIZE trumps EXPIRED
            self.null_removal_cause = Some(RemovalCause::Expired);
        }
        self
    }

    /// Old name of [`expire_after_write`][MapMaker::expire_after_write].
    #[deprecated(note = "use `expire_after_write`, which behaves exactly the same")]
    pub fn expiration(self, duration: Duration) -> Self {
        self.expire_after_write(duration)
    }

    fn check_expiration(&self) {
        assert!(
            self.expire_after_write.is_none(),
            "expire_after_write was already set to {:?}",
            self.expire_after_write.unwrap()
        );
        assert!(
            self.expire_after_access.is_none(),
            "expire_after_access was already set to {:?}",
            self.expire_after_access.unwrap()
        );
    }

    /// Sets a custom key equality discipline. Defaults to logical equality
    /// for strong keys and identity for weak or soft keys; a custom
    /// equivalence must hash consistently with its own equality.
    pub fn key_equivalence(mut self, equivalence: impl Equivalence<K>) -> Self {
        assert!(
            self.key_equivalence.is_none(),
            "key equivalence was already set"
        );
        self.key_equivalence = Some(Arc::new(equivalence));
        self
    }

    /// Sets a custom value equality discipline, used by `contains_value`
    /// and the conditional remove and replace operations.
    pub fn value_equivalence(mut self, equivalence: impl Equivalence<V>) -> Self {
        assert!(
            self.value_equivalence.is_none(),
            "value equivalence was already set"
        );
        self.value_equivalence = Some(Arc::new(equivalence));
        self
    }

    /// Specifies a listener notified each time an entry is removed, by any
    /// means. The listener runs synchronously on the thread performing the
    /// removal, after the entry has been unlinked and outside every lock;
    /// it must not re-enter the map.
    pub fn removal_listener(
        mut self,
        listener: impl Fn(Option<Arc<K>>, Option<Arc<V>>, RemovalCause) + Send + Sync + 'static,
    ) -> Self {
        assert!(
            self.removal_listener.is_none(),
            "removal listener was already set"
        );
        self.removal_listener = Some(Arc::new(listener));
        self
    }

    /// Supplies the time source used for expiration. Defaults to a
    /// monotonic nanosecond clock; replace it to control time in tests.
    pub fn ticker(mut self, ticker: impl Ticker) -> Self {
        assert!(self.ticker.is_none(), "ticker was already set");
        self.ticker = Some(Arc::new(ticker));
        self
    }

    /// Runs the cleanup loop out of line on a shared background executor
    /// at the given interval, instead of relying purely on caller threads.
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        assert!(
            self.cleanup_interval.is_none(),
            "cleanup interval was already set to {:?}",
            self.cleanup_interval.unwrap()
        );
        self.cleanup_interval = Some(interval);
        self
    }

    /// Records hit, miss, and eviction counts, exposed through
    /// [`CacheMap::stats`].
    pub fn record_stats(mut self) -> Self {
        self.record_stats = true;
        self
    }
}

impl<K, V> MapMaker<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Eq + Hash + Send + Sync + 'static,
{
    /// Builds a map without on-demand computation.
    pub fn make_map(&self) -> CacheMap<K, V> {
        match self.null_removal_cause {
            Some(cause) => CacheMap::from_null(NullMap::new(
                self.notifier(),
                cause,
                self.stats_counter(),
            )),
            None => {
                let config = Arc::new(self.freeze());
                let table = Arc::new(Table::new(config));
                table.start_cleanup_job();
                CacheMap::from_table(table)
            }
        }
    }

    /// Builds a map that computes missing values with `compute`.
    ///
    /// `get` on the returned map never reports absence: it returns the
    /// cached value, computes it, or fails with the computation failure.
    /// The function may run concurrently for distinct keys but is invoked
    /// at most once at a time per key.
    pub fn make_computing_map<F>(&self, compute: F) -> ComputingMap<K, V>
    where
        F: Fn(&Arc<K>) -> Result<Arc<V>, BoxError> + Send + Sync + 'static,
    {
        ComputingMap::new(self.make_map(), Arc::new(compute))
    }

    fn notifier(&self) -> Option<RemovalNotifier<K, V>> {
        self.removal_listener
            .as_ref()
            .map(|listener| RemovalNotifier::new(Arc::clone(listener)))
    }

    fn stats_counter(&self) -> Arc<dyn StatsCounter> {
        if self.record_stats {
            Arc::new(ConcurrentStatsCounter::default())
        } else {
            Arc::new(DisabledStatsCounter)
        }
    }

    /// Resolves defaults and freezes the configuration.
    fn freeze(&self) -> CacheConfig<K, V> {
        let key_strength = self.key_strength.unwrap_or(Strength::Strong);
        let value_strength = self.value_strength.unwrap_or(Strength::Strong);
        CacheConfig {
            initial_capacity: self.initial_capacity.unwrap_or(DEFAULT_INITIAL_CAPACITY),
            concurrency_level: self.concurrency_level.unwrap_or(DEFAULT_CONCURRENCY_LEVEL),
            maximum_size: self.maximum_size,
            key_strength,
            value_strength,
            expire_after_write_nanos: self
                .expire_after_write
                .map(Instant::duration_to_saturating_nanos),
            expire_after_access_nanos: self
                .expire_after_access
                .map(Instant::duration_to_saturating_nanos),
            key_equivalence: self
                .key_equivalence
                .clone()
                .unwrap_or_else(|| key_strength.default_equivalence()),
            value_equivalence: self
                .value_equivalence
                .clone()
                .unwrap_or_else(|| value_strength.default_equivalence()),
            clock: self
                .ticker
                .clone()
                .map(Clock::custom)
                .unwrap_or_default(),
            notifier: self.notifier(),
            stats: self.stats_counter(),
            cleanup_interval: self.cleanup_interval,
        }
    }
}

impl<K, V> fmt::Debug for MapMaker<K, V> {
    /// Renders only the explicitly set knobs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("MapMaker");
        if let Some(v) = self.initial_capacity {
            s.field("initial_capacity", &v);
        }
        if let Some(v) = self.concurrency_level {
            s.field("concurrency_level", &v);
        }
        if let Some(v) = self.maximum_size {
            s.field("maximum_size", &v);
        }
        if let Some(v) = self.key_strength {
            s.field("key_strength", &v);
        }
        if let Some(v) = self.value_strength {
            s.field("value_strength", &v);
        }
        if let Some(v) = self.expire_after_write {
            s.field("expire_after_write", &v);
        }
        if let Some(v) = self.expire_after_access {
            s.field("expire_after_access", &v);
        }
        if self.key_equivalence.is_some() {
            s.field("key_equivalence", &"<set>");
        }
        if self.value_equivalence.is_some() {
            s.field("value_equivalence", &"<set>");
        }
        if self.removal_listener.is_some() {
            s.field("removal_listener", &"<set>");
        }
        if self.ticker.is_some() {
            s.field("ticker", &"<set>");
        }
        if let Some(v) = self.cleanup_interval {
            s.field("cleanup_interval", &v);
        }
        if self.record_stats {
            s.field("record_stats", &true);
        }
        s.finish()
    }
}

/// The frozen configuration a table is built from.
pub(crate) struct CacheConfig<K, V> {
    pub(crate) initial_capacity: usize,
    pub(crate) concurrency_level: usize,
    pub(crate) maximum_size: Option<usize>,
    pub(crate) key_strength: Strength,
    pub(crate) value_strength: Strength,
    pub(crate) expire_after_write_nanos: Option<u64>,
    pub(crate) expire_after_access_nanos: Option<u64>,
    pub(crate) key_equivalence: Arc<dyn Equivalence<K>>,
    pub(crate) value_equivalence: Arc<dyn Equivalence<V>>,
    pub(crate) clock: Clock,
    pub(crate) notifier: Option<RemovalNotifier<K, V>>,
    pub(crate) stats: Arc<dyn StatsCounter>,
    pub(crate) cleanup_interval: Option<Duration>,
}

impl<K, V> CacheConfig<K, V> {
    /// Reads refresh the access time when either access expiration or the
    /// size bound needs recency.
    pub(crate) fn records_access(&self) -> bool {
        self.expire_after_access_nanos.is_some() || self.maximum_size.is_some()
    }

    pub(crate) fn uses_access_deque(&self) -> bool {
        self.records_access()
    }

    pub(crate) fn uses_write_deque(&self) -> bool {
        self.expire_after_write_nanos.is_some()
    }
}

#[cfg(test)]
impl<K, V> CacheConfig<K, V>
where
    K: Eq + Hash + 'static,
    V: Eq + Hash + 'static,
{
    pub(crate) fn with_defaults() -> Self {
        Self {
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
            concurrency_level: DEFAULT_CONCURRENCY_LEVEL,
            maximum_size: None,
            key_strength: Strength::Strong,
            value_strength: Strength::Strong,
            expire_after_write_nanos: None,
            expire_after_access_nanos: None,
            key_equivalence: Strength::Strong.default_equivalence(),
            value_equivalence: Strength::Strong.default_equivalence(),
            clock: Clock::default(),
            notifier: None,
            stats: Arc::new(DisabledStatsCounter),
            cleanup_interval: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::MapMaker;
    use std::{sync::Arc, time::Duration};

    #[test]
    fn unconfigured_builder_makes_a_plain_map() {
        let map = MapMaker::new().make_map();
        assert!(map.insert(Arc::new('a'), Arc::new("Alice")).is_none());
        assert_eq!(map.get(&'a').as_deref(), Some(&"Alice"));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn builder_is_reusable() {
        let maker: MapMaker<u32, u32> = MapMaker::new().maximum_size(10);
        let a = maker.make_map();
        let b = maker.make_map();
        a.insert(Arc::new(1), Arc::new(1));
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 0);
    }

    #[test]
    fn debug_lists_only_set_knobs() {
        let maker: MapMaker<u32, u32> = MapMaker::new();
        assert_eq!(format!("{maker:?}"), "MapMaker");

        let maker: MapMaker<u32, u32> = MapMaker::new()
            .maximum_size(100)
            .expire_after_write(Duration::from_secs(1));
        let rendered = format!("{maker:?}");
        assert!(rendered.contains("maximum_size: 100"));
        assert!(rendered.contains("expire_after_write"));
        assert!(!rendered.contains("concurrency_level"));
    }

    #[test]
    #[should_panic(expected = "initial capacity was already set to 16")]
    fn initial_capacity_is_one_shot() {
        let _ = MapMaker::<u32, u32>::new()
            .initial_capacity(16)
            .initial_capacity(32);
    }

    #[test]
    #[should_panic(expected = "concurrency level must be positive")]
    fn zero_concurrency_level_is_rejected() {
        let _ = MapMaker::<u32, u32>::new().concurrency_level(0);
    }

    #[test]
    #[should_panic(expected = "concurrency level was already set to 4")]
    fn concurrency_level_is_one_shot() {
        let _ = MapMaker::<u32, u32>::new()
            .concurrency_level(4)
            .concurrency_level(8);
    }

    #[test]
    #[should_panic(expected = "maximum size was already set to 1")]
    fn maximum_size_is_one_shot() {
        let _ = MapMaker::<u32, u32>::new().maximum_size(1).maximum_size(2);
    }

    #[test]
    #[should_panic(expected = "key strength was already set to Weak")]
    fn key_strength_is_one_shot() {
        let _ = MapMaker::<u32, u32>::new().weak_keys().soft_keys();
    }

    #[test]
    #[should_panic(expected = "value strength was already set to Soft")]
    fn value_strength_is_one_shot() {
        let _ = MapMaker::<u32, u32>::new().soft_values().weak_values();
    }

    #[test]
    #[should_panic(expected = "expire_after_write was already set")]
    fn write_and_access_expiration_are_mutually_exclusive() {
        let _ = MapMaker::<u32, u32>::new()
            .expire_after_write(Duration::from_secs(1))
            .expire_after_access(Duration::from_secs(1));
    }

    #[test]
    #[should_panic(expected = "expire_after_access was already set")]
    fn access_then_write_expiration_is_rejected() {
        let _ = MapMaker::<u32, u32>::new()
            .expire_after_access(Duration::from_secs(1))
            .expire_after_write(Duration::from_secs(1));
    }

    #[test]
    #[should_panic(expected = "removal listener was already set")]
    fn removal_listener_is_one_shot() {
        let _ = MapMaker::<u32, u32>::new()
            .removal_listener(|_, _, _| {})
            .removal_listener(|_, _, _| {});
    }

    #[test]
    fn expiration_alias_sets_write_expiration() {
        #[allow(deprecated)]
        let maker: MapMaker<u32, u32> = MapMaker::new().expiration(Duration::from_secs(5));
        assert!(format!("{maker:?}").contains("expire_after_write"));
    }

    #[test]
    fn size_trumps_expired_for_the_null_cause() {
        use crate::RemovalCause;
        use std::sync::Mutex;

        let causes = Arc::new(Mutex::new(Vec::new()));
        let causes2 = Arc::clone(&causes);
        let map = MapMaker::new()
            .expire_after_write(Duration::ZERO)
            .maximum_size(0)
            .removal_listener(move |_, _, cause| causes2.lock().unwrap().push(cause))
            .make_map();
        map.insert(Arc::new(1_u32), Arc::new(1_u32));
        assert_eq!(&*causes.lock().unwrap(), &[RemovalCause::Size]);
    }
}
