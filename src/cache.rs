//! The maps produced by [`MapMaker`][crate::MapMaker].
//!
//! `CacheMap` is the plain concurrent map; `ComputingMap` adds atomic
//! on-demand computation of missing values. Both are cheap to clone and
//! share one underlying table. A map configured with a maximum size of
//! zero or a zero expiration is backed by the null variant, which stores
//! nothing and immediately notifies the eviction of everything inserted.

use std::{fmt, sync::Arc};

use crate::{
    error::ComputeError,
    notification::{RemovalCause, RemovalNotifier},
    stats::{CacheStats, StatsCounter},
    table::{ComputeFn, Table},
};

enum MapVariant<K, V> {
    Table(Arc<Table<K, V>>),
    Null(Arc<NullMap<K, V>>),
}

impl<K, V> Clone for MapVariant<K, V> {
    fn clone(&self) -> Self {
        match self {
            Self::Table(table) => Self::Table(Arc::clone(table)),
            Self::Null(null) => Self::Null(Arc::clone(null)),
        }
    }
}

/// A concurrent map with the features selected at build time: size-based
/// eviction, timed expiration, weak or soft references, and removal
/// notification.
///
/// Keys and values travel as `Arc`s. The map holds them according to the
/// configured reference strength; with weak keys or values, the map never
/// keeps the referent alive by itself, and with the default strong
/// strength it owns them outright.
///
/// Single-key operations are linearizable per key. The bulk operations
/// (`len`, `iter`, `contains_value`, `clear`, and the `Debug` rendering)
/// are weakly consistent.
pub struct CacheMap<K, V> {
    inner: MapVariant<K, V>,
}

impl<K, V> Clone for CacheMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K: 'static, V: 'static> CacheMap<K, V> {
    pub(crate) fn from_table(table: Arc<Table<K, V>>) -> Self {
        Self {
            inner: MapVariant::Table(table),
        }
    }

    pub(crate) fn from_null(null: NullMap<K, V>) -> Self {
        Self {
            inner: MapVariant::Null(Arc::new(null)),
        }
    }

    /// Returns the value mapped to `key`, refreshing its recency.
    ///
    /// With identity key equality (weak or soft keys), `key` must borrow
    /// from the same allocation that was inserted; a logically equal key
    /// from a different allocation never matches.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        match &self.inner {
            MapVariant::Table(table) => table.get(key),
            MapVariant::Null(null) => null.get(),
        }
    }

    /// Maps `key` to `value`, returning the previously mapped value. A
    /// replaced value fires the removal listener with cause `Replaced`.
    pub fn insert(&self, key: Arc<K>, value: Arc<V>) -> Option<Arc<V>> {
        match &self.inner {
            MapVariant::Table(table) => table.insert(key, value),
            MapVariant::Null(null) => null.insert(key, value),
        }
    }

    /// Maps `key` to `value` unless a value is already present, in which
    /// case the present value is returned and nothing changes.
    pub fn insert_if_absent(&self, key: Arc<K>, value: Arc<V>) -> Option<Arc<V>> {
        match &self.inner {
            MapVariant::Table(table) => table.insert_if_absent(key, value),
            MapVariant::Null(null) => null.insert(key, value),
        }
    }

    /// Replaces the value mapped to `key` only if one is present.
    pub fn replace(&self, key: &K, value: Arc<V>) -> Option<Arc<V>> {
        match &self.inner {
            MapVariant::Table(table) => table.replace(key, value),
            MapVariant::Null(_) => None,
        }
    }

    /// Replaces the value mapped to `key` only if the present value is
    /// equivalent to `expected`.
    pub fn replace_if_equals(&self, key: &K, expected: &V, value: Arc<V>) -> bool {
        match &self.inner {
            MapVariant::Table(table) => table.replace_if_equals(key, expected, value),
            MapVariant::Null(_) => false,
        }
    }

    /// Removes the entry for `key`, firing the listener with cause
    /// `Explicit`.
    pub fn remove(&self, key: &K) -> Option<Arc<V>> {
        match &self.inner {
            MapVariant::Table(table) => table.remove(key),
            MapVariant::Null(_) => None,
        }
    }

    /// Removes the entry for `key` only if its value is equivalent to
    /// `expected`.
    pub fn remove_if_equals(&self, key: &K, expected: &V) -> bool {
        match &self.inner {
            MapVariant::Table(table) => table.remove_if_equals(key, expected),
            MapVariant::Null(_) => false,
        }
    }

    pub fn contains_key(&self, key: &K) -> bool {
        match &self.inner {
            MapVariant::Table(table) => table.contains_key(key),
            MapVariant::Null(_) => false,
        }
    }

    pub fn contains_value(&self, value: &V) -> bool {
        match &self.inner {
            MapVariant::Table(table) => table.contains_value(value),
            MapVariant::Null(_) => false,
        }
    }

    /// The number of live entries, summed segment by segment.
    pub fn len(&self) -> usize {
        match &self.inner {
            MapVariant::Table(table) => table.len(),
            MapVariant::Null(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry, firing `Explicit` for each live one.
    pub fn clear(&self) {
        if let MapVariant::Table(table) = &self.inner {
            table.clear();
        }
    }

    /// Iterates over the live entries, weakly consistently: the traversal
    /// reflects some state of the map between its start and its end, and
    /// never yields a reclaimed, expired, or still-computing entry.
    pub fn iter(&self) -> Iter<K, V> {
        let table = match &self.inner {
            MapVariant::Table(table) => Some(Arc::clone(table)),
            MapVariant::Null(_) => None,
        };
        Iter {
            table,
            segment_index: 0,
            current: Vec::new().into_iter(),
        }
    }

    /// Runs the cleanup loop on every segment: drains reclamation queues,
    /// applies batched recency promotions, expires stale entries, and
    /// trims to the size bound. Cleanup also happens as a side effect of
    /// ordinary operations; this merely forces it.
    pub fn cleanup(&self) {
        if let MapVariant::Table(table) = &self.inner {
            table.run_cleanup();
        }
    }

    /// The memory-pressure signal: surrenders every softly held key and
    /// value, removing the affected entries with cause `Collected`.
    pub fn release_soft_references(&self) {
        if let MapVariant::Table(table) = &self.inner {
            table.release_soft_references();
        }
    }

    /// A snapshot of the statistics recorded so far. All zeros unless the
    /// map was built with [`record_stats`][crate::MapMaker::record_stats].
    pub fn stats(&self) -> CacheStats {
        match &self.inner {
            MapVariant::Table(table) => table.config().stats.snapshot(),
            MapVariant::Null(null) => null.stats.snapshot(),
        }
    }
}

impl<K: fmt::Debug + 'static, V: fmt::Debug + 'static> fmt::Debug for CacheMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

/// A weakly-consistent iterator over a map's live entries. Snapshots one
/// segment at a time; never raises on concurrent modification.
pub struct Iter<K, V> {
    table: Option<Arc<Table<K, V>>>,
    segment_index: usize,
    current: std::vec::IntoIter<(Arc<K>, Arc<V>)>,
}

impl<K: 'static, V: 'static> Iterator for Iter<K, V> {
    type Item = (Arc<K>, Arc<V>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(pair) = self.current.next() {
                return Some(pair);
            }
            let table = self.table.as_ref()?;
            if self.segment_index >= table.segment_count() {
                return None;
            }
            self.current = table.segment_snapshot(self.segment_index).into_iter();
            self.segment_index += 1;
        }
    }
}

/// A map that supports atomic, on-demand computation of values.
///
/// [`get`][ComputingMap::get] either returns the already-computed value for
/// the key, computes it with the configured function, or, if another
/// thread is computing it right now, waits for that computation and
/// returns its outcome. The function runs with no lock held and is invoked
/// at most once per miss, however many threads ask concurrently.
pub struct ComputingMap<K, V> {
    map: CacheMap<K, V>,
    compute: ComputeFn<K, V>,
}

impl<K, V> Clone for ComputingMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            map: self.map.clone(),
            compute: Arc::clone(&self.compute),
        }
    }
}

impl<K: 'static, V: 'static> ComputingMap<K, V> {
    pub(crate) fn new(map: CacheMap<K, V>, compute: ComputeFn<K, V>) -> Self {
        Self { map, compute }
    }

    /// The plain map surface backing this computing map. Mutations through
    /// it interact with in-flight computations: an `insert` for a key being
    /// computed wins the race, and every waiter observes the inserted
    /// value.
    pub fn as_map(&self) -> &CacheMap<K, V> {
        &self.map
    }

    /// Probes for a cached value without computing.
    pub fn get_if_present(&self, key: &K) -> Option<Arc<V>> {
        self.map.get(key)
    }

    pub fn insert(&self, key: Arc<K>, value: Arc<V>) -> Option<Arc<V>> {
        self.map.insert(key, value)
    }

    pub fn remove(&self, key: &K) -> Option<Arc<V>> {
        self.map.remove(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&self) {
        self.map.clear()
    }
}

impl<K, V> ComputingMap<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Returns the value for `key`, computing it if necessary. Never
    /// reports absence: the result is the cached or computed value, or the
    /// failure shared by everyone waiting on the same computation.
    pub fn get(&self, key: &Arc<K>) -> Result<Arc<V>, ComputeError> {
        match &self.map.inner {
            MapVariant::Table(table) => table.get_or_compute(key, &self.compute),
            MapVariant::Null(null) => {
                null.stats.record_miss();
                let value = (self.compute)(key).map_err(ComputeError::from_cause)?;
                null.notify_removed(Arc::clone(key), Arc::clone(&value));
                Ok(value)
            }
        }
    }
}

impl<K: fmt::Debug + 'static, V: fmt::Debug + 'static> fmt::Debug for ComputingMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.map.fmt(f)
    }
}

/// The degenerate variant behind `maximum_size(0)` and zero expirations:
/// accepts every insert, immediately notifies its removal, and stores
/// nothing.
pub(crate) struct NullMap<K, V> {
    notifier: Option<RemovalNotifier<K, V>>,
    cause: RemovalCause,
    pub(crate) stats: Arc<dyn StatsCounter>,
}

impl<K, V> NullMap<K, V> {
    pub(crate) fn new(
        notifier: Option<RemovalNotifier<K, V>>,
        cause: RemovalCause,
        stats: Arc<dyn StatsCounter>,
    ) -> Self {
        Self {
            notifier,
            cause,
            stats,
        }
    }

    fn get(&self) -> Option<Arc<V>> {
        self.stats.record_miss();
        None
    }

    fn insert(&self, key: Arc<K>, value: Arc<V>) -> Option<Arc<V>> {
        self.notify_removed(key, value);
        None
    }

    fn notify_removed(&self, key: Arc<K>, value: Arc<V>) {
        self.stats.record_eviction();
        if let Some(notifier) = &self.notifier {
            notifier.notify(Some(key), Some(value), self.cause);
        }
    }
}
