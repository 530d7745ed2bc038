//! An independently lockable shard of the hash table.
//!
//! A segment owns a chained bucket array, the two intrusive ordering deques
//! (recency order and write order), a bounded read buffer that batches
//! recency promotions, and a queue of entries observed with reclaimed
//! references. Reads take only the shared lock; every mutating operation
//! takes the exclusive lock and starts by running the cleanup loop, so
//! expired, reclaimed, and over-bound entries are swept as a side effect of
//! normal traffic. Removal notifications are recorded under the lock and
//! delivered after it is released.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::RwLock;
use triomphe::Arc as TrioArc;

use crate::{
    builder::CacheConfig,
    computing::{ComputingState, Outcome},
    deque::{DeqNode, Deque},
    entry::{Entry, EntryRef, ValueSlot},
    error::ComputeError,
    notification::{Notices, RemovalCause},
    reference::StrengthRef,
    time::Instant,
};

/// Recency promotions recorded by readers, drained on the next cleanup.
/// When the buffer is full the promotion is simply dropped; correctness
/// only requires the ordering lists to be consistent when cleanup runs.
const READ_BUFFER_CAPACITY: usize = 64;

/// Buckets inspected for reclaimed references per cleanup when a non-strong
/// strength is configured. Keeps the sweep incremental while bounding the
/// number of segment operations before a reclaimed entry is noticed.
const SWEEP_BUCKETS_PER_CLEANUP: usize = 8;

const MAX_BUCKET_CAPACITY: usize = 1 << 30;

/// The outcome of a read probe.
pub(crate) enum Lookup<V> {
    Present(Arc<V>),
    /// The key is being computed; visible only to a computing `get`.
    Pending(TrioArc<ComputingState<V>>),
    Absent,
}

/// The outcome of the locked re-probe that starts a computation.
pub(crate) enum ComputeProbe<K, V> {
    /// A live value was found; no computation is needed.
    Present(Arc<V>),
    /// Another thread is computing this key; wait on its latch.
    Wait(TrioArc<ComputingState<V>>),
    /// A pending entry was installed; the caller must run the computing
    /// function and then publish or abandon.
    Compute(EntryRef<K, V>, TrioArc<ComputingState<V>>),
}

/// A snapshot of what an entry's value slot held at probe time.
enum SlotView<V> {
    Computing(TrioArc<ComputingState<V>>),
    Live(Arc<V>),
    Dead,
}

pub(crate) struct Segment<K, V> {
    inner: RwLock<SegmentInner<K, V>>,
    /// Mirror of `SegmentInner::count` for lock-free `len()`.
    len: AtomicUsize,
    read_tx: Sender<EntryRef<K, V>>,
    read_rx: Receiver<EntryRef<K, V>>,
    reclaim_tx: Sender<EntryRef<K, V>>,
    reclaim_rx: Receiver<EntryRef<K, V>>,
    /// Per-segment eviction target: `ceil(global_max / segment_count)`.
    max_entries: Option<usize>,
    config: Arc<CacheConfig<K, V>>,
}

struct SegmentInner<K, V> {
    buckets: Box<[Option<EntryRef<K, V>>]>,
    count: usize,
    mod_count: u64,
    threshold: usize,
    sweep_cursor: usize,
    access_deque: Deque<EntryRef<K, V>>,
    write_deque: Deque<EntryRef<K, V>>,
}

#[inline]
fn bucket_index(hash: u64, len: usize) -> usize {
    debug_assert!(len.is_power_of_two());
    hash as usize & (len - 1)
}

impl<K: 'static, V: 'static> Segment<K, V> {
    pub(crate) fn new(
        initial_buckets: usize,
        max_entries: Option<usize>,
        config: Arc<CacheConfig<K, V>>,
    ) -> Self {
        let capacity = initial_buckets
            .min(MAX_BUCKET_CAPACITY)
            .next_power_of_two()
            .max(1);
        let (read_tx, read_rx) = crossbeam_channel::bounded(READ_BUFFER_CAPACITY);
        let (reclaim_tx, reclaim_rx) = crossbeam_channel::unbounded();
        Self {
            inner: RwLock::new(SegmentInner {
                buckets: vec![None; capacity].into_boxed_slice(),
                count: 0,
                mod_count: 0,
                threshold: capacity * 3 / 4,
                sweep_cursor: 0,
                access_deque: Deque::default(),
                write_deque: Deque::default(),
            }),
            len: AtomicUsize::new(0),
            read_tx,
            read_rx,
            reclaim_tx,
            reclaim_rx,
            max_entries,
            config,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub(crate) fn mod_count(&self) -> u64 {
        self.inner.read().mod_count
    }

    fn now(&self) -> Instant {
        self.config.clock.now()
    }

    fn is_expired(&self, entry: &Entry<K, V>, now: Instant) -> bool {
        if let (Some(ttl), Some(accessed)) =
            (self.config.expire_after_access_nanos, entry.access_time())
        {
            if now.saturating_elapsed_nanos(accessed) >= ttl {
                return true;
            }
        }
        if let (Some(ttl), Some(written)) =
            (self.config.expire_after_write_nanos, entry.write_time())
        {
            if now.saturating_elapsed_nanos(written) >= ttl {
                return true;
            }
        }
        false
    }

    /// # Safety
    ///
    /// The segment lock must be held, shared or exclusive.
    unsafe fn slot_view(entry: &Entry<K, V>) -> SlotView<V> {
        match entry.value_slot() {
            ValueSlot::Computing(state) => SlotView::Computing(state.clone()),
            ValueSlot::Present(vref) => match vref.get() {
                Some(value) => SlotView::Live(value),
                None => SlotView::Dead,
            },
        }
    }

    // ------------------------------------------------------------------
    // Read path
    // ------------------------------------------------------------------

    /// Probes for `key` while holding only the shared lock. Observing a
    /// dead reference or an expired entry schedules an out-of-line cleanup
    /// so the corresponding removal fires before this call returns.
    pub(crate) fn get(&self, key: &K, hash: u64, record: bool) -> Lookup<V> {
        let now = self.now();
        let mut schedule_cleanup = false;
        let result = {
            let inner = self.inner.read();
            let idx = bucket_index(hash, inner.buckets.len());
            let mut cur = inner.buckets[idx].as_ref();
            let mut found = Lookup::Absent;
            while let Some(entry) = cur {
                if entry.hash() == hash {
                    match entry.key().get() {
                        None => {
                            let _ = self.reclaim_tx.send(entry.clone());
                            schedule_cleanup = true;
                        }
                        Some(stored) if self.config.key_equivalence.equivalent(&stored, key) => {
                            match unsafe { Self::slot_view(entry) } {
                                SlotView::Computing(state) => {
                                    found = Lookup::Pending(state);
                                }
                                SlotView::Dead => {
                                    let _ = self.reclaim_tx.send(entry.clone());
                                    schedule_cleanup = true;
                                }
                                SlotView::Live(value) => {
                                    if self.is_expired(entry, now) {
                                        schedule_cleanup = true;
                                    } else {
                                        if record && self.config.records_access() {
                                            entry.set_access_time(now);
                                            let _ = self.read_tx.try_send(entry.clone());
                                        }
                                        found = Lookup::Present(value);
                                    }
                                }
                            }
                            break;
                        }
                        Some(_) => {}
                    }
                }
                cur = unsafe { entry.next_ref() };
            }
            found
        };
        if schedule_cleanup {
            self.post_read_cleanup();
        }
        result
    }

    pub(crate) fn contains_key(&self, key: &K, hash: u64) -> bool {
        matches!(self.get(key, hash, false), Lookup::Present(_))
    }

    /// Scans every live entry for a value equivalent to `value`.
    pub(crate) fn scan_value(&self, value: &V) -> bool {
        let now = self.now();
        let inner = self.inner.read();
        for head in inner.buckets.iter() {
            let mut cur = head.as_ref();
            while let Some(entry) = cur {
                if entry.key().get().is_some() && !self.is_expired(entry, now) {
                    if let SlotView::Live(stored) = unsafe { Self::slot_view(entry) } {
                        if self.config.value_equivalence.equivalent(&stored, value) {
                            return true;
                        }
                    }
                }
                cur = unsafe { entry.next_ref() };
            }
        }
        false
    }

    /// Collects the live entries for weakly-consistent iteration.
    pub(crate) fn snapshot(&self) -> Vec<(Arc<K>, Arc<V>)> {
        let now = self.now();
        let inner = self.inner.read();
        let mut pairs = Vec::with_capacity(inner.count);
        for head in inner.buckets.iter() {
            let mut cur = head.as_ref();
            while let Some(entry) = cur {
                if let Some(key) = entry.key().get() {
                    if !self.is_expired(entry, now) {
                        if let SlotView::Live(value) = unsafe { Self::slot_view(entry) } {
                            pairs.push((key, value));
                        }
                    }
                }
                cur = unsafe { entry.next_ref() };
            }
        }
        pairs
    }

    // ------------------------------------------------------------------
    // Write path
    // ------------------------------------------------------------------

    pub(crate) fn insert(
        &self,
        key: Arc<K>,
        hash: u64,
        value: Arc<V>,
        only_if_absent: bool,
    ) -> Option<Arc<V>> {
        let mut notices = Notices::default();
        let mut completion: Option<(TrioArc<ComputingState<V>>, Arc<V>)> = None;
        let result = {
            let mut inner = self.inner.write();
            let now = self.now();
            self.cleanup(&mut inner, now, &mut notices);

            match self.find_entry(&inner, &key, hash) {
                Some(entry) => match unsafe { Self::slot_view(&entry) } {
                    SlotView::Computing(state) => {
                        // An external insert wins over the in-flight
                        // computation: publish this value and wake every
                        // waiter with it. The computation's own result will
                        // be discarded on completion.
                        unsafe {
                            entry.set_value_slot(ValueSlot::Present(StrengthRef::new(
                                self.config.value_strength,
                                Arc::clone(&value),
                            )));
                        }
                        entry.set_access_time(now);
                        entry.set_write_time(now);
                        self.link_deques(&mut inner, &entry);
                        inner.count += 1;
                        inner.mod_count += 1;
                        self.len.store(inner.count, Ordering::Release);
                        completion = Some((state, Arc::clone(&value)));
                        self.evict_to_size(&mut inner, &mut notices);
                        None
                    }
                    SlotView::Live(old) if !self.is_expired(&entry, now) => {
                        if only_if_absent {
                            // Refresh recency like a read.
                            if self.config.records_access() {
                                entry.set_access_time(now);
                                let node = entry.nodes().access_node;
                                if let Some(node) = node {
                                    unsafe { inner.access_deque.move_to_back(node) };
                                }
                            }
                            Some(old)
                        } else {
                            unsafe {
                                entry.set_value_slot(ValueSlot::Present(StrengthRef::new(
                                    self.config.value_strength,
                                    Arc::clone(&value),
                                )));
                            }
                            self.record_write(&mut inner, &entry, now);
                            notices.push(
                                entry.key().get(),
                                Some(Arc::clone(&old)),
                                RemovalCause::Replaced,
                            );
                            Some(old)
                        }
                    }
                    view => {
                        // A collected or expired entry is invisible: remove
                        // it and insert afresh.
                        let cause = match view {
                            SlotView::Dead => RemovalCause::Collected,
                            _ => RemovalCause::Expired,
                        };
                        self.unlink_entry(&mut inner, &entry, cause, &mut notices);
                        self.insert_fresh(&mut inner, key, hash, value, now, &mut notices);
                        None
                    }
                },
                None => {
                    self.insert_fresh(&mut inner, key, hash, value, now, &mut notices);
                    None
                }
            }
        };
        if let Some((state, inserted)) = completion {
            state.complete(Outcome::Value(inserted));
        }
        self.deliver(notices);
        result
    }

    pub(crate) fn remove(&self, key: &K, hash: u64) -> Option<Arc<V>> {
        let mut notices = Notices::default();
        let result = {
            let mut inner = self.inner.write();
            let now = self.now();
            self.cleanup(&mut inner, now, &mut notices);

            match self.find_entry(&inner, key, hash) {
                Some(entry) => match unsafe { Self::slot_view(&entry) } {
                    SlotView::Live(value) if !self.is_expired(&entry, now) => {
                        self.unlink_entry(&mut inner, &entry, RemovalCause::Explicit, &mut notices);
                        Some(value)
                    }
                    SlotView::Computing(_) => None,
                    view => {
                        let cause = match view {
                            SlotView::Dead => RemovalCause::Collected,
                            _ => RemovalCause::Expired,
                        };
                        self.unlink_entry(&mut inner, &entry, cause, &mut notices);
                        None
                    }
                },
                None => None,
            }
        };
        self.deliver(notices);
        result
    }

    pub(crate) fn remove_if_equals(&self, key: &K, hash: u64, expected: &V) -> bool {
        let mut notices = Notices::default();
        let result = {
            let mut inner = self.inner.write();
            let now = self.now();
            self.cleanup(&mut inner, now, &mut notices);

            match self.find_entry(&inner, key, hash) {
                Some(entry) => match unsafe { Self::slot_view(&entry) } {
                    SlotView::Live(value) if !self.is_expired(&entry, now) => {
                        if self.config.value_equivalence.equivalent(&value, expected) {
                            self.unlink_entry(
                                &mut inner,
                                &entry,
                                RemovalCause::Explicit,
                                &mut notices,
                            );
                            true
                        } else {
                            false
                        }
                    }
                    _ => false,
                },
                None => false,
            }
        };
        self.deliver(notices);
        result
    }

    pub(crate) fn replace(&self, key: &K, hash: u64, value: Arc<V>) -> Option<Arc<V>> {
        let mut notices = Notices::default();
        let result = {
            let mut inner = self.inner.write();
            let now = self.now();
            self.cleanup(&mut inner, now, &mut notices);

            match self.find_entry(&inner, key, hash) {
                Some(entry) => match unsafe { Self::slot_view(&entry) } {
                    SlotView::Live(old) if !self.is_expired(&entry, now) => {
                        unsafe {
                            entry.set_value_slot(ValueSlot::Present(StrengthRef::new(
                                self.config.value_strength,
                                value,
                            )));
                        }
                        self.record_write(&mut inner, &entry, now);
                        notices.push(
                            entry.key().get(),
                            Some(Arc::clone(&old)),
                            RemovalCause::Replaced,
                        );
                        Some(old)
                    }
                    _ => None,
                },
                None => None,
            }
        };
        self.deliver(notices);
        result
    }

    pub(crate) fn replace_if_equals(
        &self,
        key: &K,
        hash: u64,
        expected: &V,
        value: Arc<V>,
    ) -> bool {
        let mut notices = Notices::default();
        let result = {
            let mut inner = self.inner.write();
            let now = self.now();
            self.cleanup(&mut inner, now, &mut notices);

            match self.find_entry(&inner, key, hash) {
                Some(entry) => match unsafe { Self::slot_view(&entry) } {
                    SlotView::Live(old) if !self.is_expired(&entry, now) => {
                        if self.config.value_equivalence.equivalent(&old, expected) {
                            unsafe {
                                entry.set_value_slot(ValueSlot::Present(StrengthRef::new(
                                    self.config.value_strength,
                                    value,
                                )));
                            }
                            self.record_write(&mut inner, &entry, now);
                            notices.push(
                                entry.key().get(),
                                Some(old),
                                RemovalCause::Replaced,
                            );
                            true
                        } else {
                            false
                        }
                    }
                    _ => false,
                },
                None => false,
            }
        };
        self.deliver(notices);
        result
    }

    /// Drops every entry, firing `Explicit` for each live one. Entries whose
    /// key or value reference is already dead fire `Collected` instead.
    /// Pending computations are detached silently; the computing thread
    /// completes their latches when it finishes.
    pub(crate) fn clear(&self) {
        let mut notices = Notices::default();
        {
            let mut inner = self.inner.write();
            for i in 0..inner.buckets.len() {
                let mut cur = inner.buckets[i].take();
                while let Some(entry) = cur {
                    cur = unsafe { entry.take_next() };
                    let mut nodes = entry.nodes();
                    nodes.access_node = None;
                    nodes.write_node = None;
                    drop(nodes);
                    match unsafe { Self::slot_view(&entry) } {
                        SlotView::Computing(_) => {}
                        SlotView::Live(value) => {
                            let key = entry.key().get();
                            let cause = if key.is_some() {
                                RemovalCause::Explicit
                            } else {
                                RemovalCause::Collected
                            };
                            notices.push(key, Some(value), cause);
                        }
                        SlotView::Dead => {
                            notices.push(entry.key().get(), None, RemovalCause::Collected);
                        }
                    }
                }
            }
            while inner.access_deque.pop_front().is_some() {}
            while inner.write_deque.pop_front().is_some() {}
            inner.count = 0;
            inner.mod_count += 1;
            self.len.store(0, Ordering::Release);
        }
        self.deliver(notices);
    }

    /// Runs the cleanup loop under the exclusive lock.
    pub(crate) fn run_cleanup(&self) {
        let mut notices = Notices::default();
        {
            let mut inner = self.inner.write();
            let now = self.now();
            self.cleanup(&mut inner, now, &mut notices);
        }
        self.deliver(notices);
    }

    /// Surrenders every softly held key and value in this segment and
    /// sweeps the affected entries out.
    pub(crate) fn release_soft_references(&self) {
        {
            let inner = self.inner.read();
            for head in inner.buckets.iter() {
                let mut cur = head.as_ref();
                while let Some(entry) = cur {
                    let mut released = entry.key().surrender_soft();
                    if let ValueSlot::Present(vref) = unsafe { entry.value_slot() } {
                        released |= vref.surrender_soft();
                    }
                    if released {
                        let _ = self.reclaim_tx.send(entry.clone());
                    }
                    cur = unsafe { entry.next_ref() };
                }
            }
        }
        self.run_cleanup();
    }

    // ------------------------------------------------------------------
    // Computing
    // ------------------------------------------------------------------

    /// The locked re-probe that begins a computation.
    pub(crate) fn compute_probe(&self, key: &Arc<K>, hash: u64) -> ComputeProbe<K, V> {
        let mut notices = Notices::default();
        let result = {
            let mut inner = self.inner.write();
            let now = self.now();
            self.cleanup(&mut inner, now, &mut notices);

            let existing = self.find_entry(&inner, key, hash);
            match existing {
                Some(entry) => match unsafe { Self::slot_view(&entry) } {
                    SlotView::Computing(state) => ComputeProbe::Wait(state),
                    SlotView::Live(value) if !self.is_expired(&entry, now) => {
                        if self.config.records_access() {
                            entry.set_access_time(now);
                            let node = entry.nodes().access_node;
                            if let Some(node) = node {
                                unsafe { inner.access_deque.move_to_back(node) };
                            }
                        }
                        ComputeProbe::Present(value)
                    }
                    view => {
                        let cause = match view {
                            SlotView::Dead => RemovalCause::Collected,
                            _ => RemovalCause::Expired,
                        };
                        self.unlink_entry(&mut inner, &entry, cause, &mut notices);
                        self.install_pending(&mut inner, key, hash)
                    }
                },
                None => self.install_pending(&mut inner, key, hash),
            }
        };
        self.deliver(notices);
        result
    }

    /// Installs a pending entry. It is reachable from the hash array so
    /// concurrent callers find its latch, but it joins no ordering list and
    /// does not count toward the size bound until the value is published.
    fn install_pending(
        &self,
        inner: &mut SegmentInner<K, V>,
        key: &Arc<K>,
        hash: u64,
    ) -> ComputeProbe<K, V> {
        let state = TrioArc::new(ComputingState::default());
        let entry = TrioArc::new(Entry::new(
            hash,
            StrengthRef::new(self.config.key_strength, Arc::clone(key)),
            ValueSlot::Computing(state.clone()),
        ));
        let idx = bucket_index(hash, inner.buckets.len());
        unsafe { entry.set_next(inner.buckets[idx].take()) };
        inner.buckets[idx] = Some(entry.clone());
        inner.mod_count += 1;
        ComputeProbe::Compute(entry, state)
    }

    /// Publishes a computed value, unless an external insert won the race,
    /// in which case the inserted value is returned and the computed one is
    /// discarded. Always completes the latch.
    pub(crate) fn publish_computed(
        &self,
        entry: &EntryRef<K, V>,
        state: &TrioArc<ComputingState<V>>,
        value: Arc<V>,
    ) -> Arc<V> {
        let mut notices = Notices::default();
        let mut result = Arc::clone(&value);
        {
            let mut inner = self.inner.write();
            let now = self.now();
            match unsafe { Self::slot_view(entry) } {
                SlotView::Computing(current) if TrioArc::ptr_eq(&current, state) => {
                    // Detached by `clear` while computing: complete the
                    // latch but store nothing.
                    if unsafe { self.chain_contains(&inner, entry) } {
                        unsafe {
                            entry.set_value_slot(ValueSlot::Present(StrengthRef::new(
                                self.config.value_strength,
                                Arc::clone(&value),
                            )));
                        }
                        entry.set_access_time(now);
                        entry.set_write_time(now);
                        self.link_deques(&mut inner, entry);
                        inner.count += 1;
                        inner.mod_count += 1;
                        self.len.store(inner.count, Ordering::Release);
                        self.evict_to_size(&mut inner, &mut notices);
                    }
                }
                SlotView::Live(winner) => {
                    result = winner;
                }
                _ => {}
            }
        }
        state.complete(Outcome::Value(Arc::clone(&result)));
        self.deliver(notices);
        result
    }

    /// Rolls back a failed computation. Returns the externally inserted
    /// value if one won the race; otherwise the failure is shared with
    /// every waiter and `None` is returned.
    pub(crate) fn abandon_computation(
        &self,
        entry: &EntryRef<K, V>,
        state: &TrioArc<ComputingState<V>>,
        error: ComputeError,
    ) -> Option<Arc<V>> {
        let mut result = None;
        {
            let mut inner = self.inner.write();
            match unsafe { Self::slot_view(entry) } {
                SlotView::Computing(current) if TrioArc::ptr_eq(&current, state) => {
                    if unsafe { self.remove_from_chain(&mut inner, entry) } {
                        inner.mod_count += 1;
                    }
                }
                SlotView::Live(winner) => {
                    result = Some(winner);
                }
                _ => {}
            }
        }
        state.complete(Outcome::Failed(error));
        result
    }

    // ------------------------------------------------------------------
    // The cleanup loop
    // ------------------------------------------------------------------

    fn cleanup(&self, inner: &mut SegmentInner<K, V>, now: Instant, notices: &mut Notices<K, V>) {
        self.drain_reclaimed(inner, notices);
        self.sweep_reclaimed(inner, notices);
        self.drain_read_buffer(inner);
        self.expire_entries(inner, now, notices);
        self.evict_to_size(inner, notices);
    }

    fn post_read_cleanup(&self) {
        let mut notices = Notices::default();
        if let Some(mut inner) = self.inner.try_write() {
            let now = self.now();
            self.cleanup(&mut inner, now, &mut notices);
        }
        self.deliver(notices);
    }

    fn drain_reclaimed(&self, inner: &mut SegmentInner<K, V>, notices: &mut Notices<K, V>) {
        while let Ok(entry) = self.reclaim_rx.try_recv() {
            if !unsafe { self.chain_contains(inner, &entry) } {
                continue;
            }
            let dead = match unsafe { Self::slot_view(&entry) } {
                SlotView::Computing(_) => false,
                SlotView::Dead => true,
                SlotView::Live(_) => entry.key().is_dead(),
            };
            if dead {
                self.unlink_entry(inner, &entry, RemovalCause::Collected, notices);
            }
        }
    }

    /// Incrementally scans buckets for entries whose references died
    /// without being observed by a reader.
    fn sweep_reclaimed(&self, inner: &mut SegmentInner<K, V>, notices: &mut Notices<K, V>) {
        use crate::reference::Strength;

        if self.config.key_strength == Strength::Strong
            && self.config.value_strength == Strength::Strong
        {
            return;
        }
        let mut dead = Vec::new();
        for _ in 0..SWEEP_BUCKETS_PER_CLEANUP {
            let idx = inner.sweep_cursor % inner.buckets.len();
            inner.sweep_cursor = (idx + 1) % inner.buckets.len();
            let mut cur = inner.buckets[idx].clone();
            while let Some(entry) = cur {
                let is_dead = match unsafe { Self::slot_view(&entry) } {
                    SlotView::Computing(_) => false,
                    SlotView::Dead => true,
                    SlotView::Live(_) => entry.key().is_dead(),
                };
                if is_dead {
                    dead.push(entry.clone());
                }
                cur = unsafe { entry.next_cloned() };
            }
        }
        for entry in dead {
            self.unlink_entry(inner, &entry, RemovalCause::Collected, notices);
        }
    }

    fn drain_read_buffer(&self, inner: &mut SegmentInner<K, V>) {
        while let Ok(entry) = self.read_rx.try_recv() {
            let node = entry.nodes().access_node;
            if let Some(node) = node {
                unsafe { inner.access_deque.move_to_back(node) };
            }
        }
    }

    fn expire_entries(
        &self,
        inner: &mut SegmentInner<K, V>,
        now: Instant,
        notices: &mut Notices<K, V>,
    ) {
        if let Some(ttl) = self.config.expire_after_access_nanos {
            while let Some(node) = inner.access_deque.peek_front_ptr() {
                let entry = unsafe { node.as_ref() }.element.clone();
                let stale = entry
                    .access_time()
                    .map_or(false, |t| now.saturating_elapsed_nanos(t) >= ttl);
                if !stale {
                    break;
                }
                self.unlink_entry(inner, &entry, RemovalCause::Expired, notices);
            }
        }
        if let Some(ttl) = self.config.expire_after_write_nanos {
            while let Some(node) = inner.write_deque.peek_front_ptr() {
                let entry = unsafe { node.as_ref() }.element.clone();
                let stale = entry
                    .write_time()
                    .map_or(false, |t| now.saturating_elapsed_nanos(t) >= ttl);
                if !stale {
                    break;
                }
                self.unlink_entry(inner, &entry, RemovalCause::Expired, notices);
            }
        }
    }

    fn evict_to_size(&self, inner: &mut SegmentInner<K, V>, notices: &mut Notices<K, V>) {
        if let Some(max) = self.max_entries {
            while inner.count > max {
                let Some(node) = inner.access_deque.peek_front_ptr() else {
                    break;
                };
                let entry = unsafe { node.as_ref() }.element.clone();
                self.unlink_entry(inner, &entry, RemovalCause::Size, notices);
            }
        }
    }

    // ------------------------------------------------------------------
    // Locked plumbing
    // ------------------------------------------------------------------

    /// Finds the entry with a live key equivalent to `key`. Entries with
    /// reclaimed keys are queued for collection as they are passed over.
    fn find_entry(&self, inner: &SegmentInner<K, V>, key: &K, hash: u64) -> Option<EntryRef<K, V>> {
        let idx = bucket_index(hash, inner.buckets.len());
        let mut cur = inner.buckets[idx].clone();
        while let Some(entry) = cur {
            if entry.hash() == hash {
                match entry.key().get() {
                    None => {
                        let _ = self.reclaim_tx.send(entry.clone());
                    }
                    Some(stored) => {
                        if self.config.key_equivalence.equivalent(&stored, key) {
                            return Some(entry);
                        }
                    }
                }
            }
            cur = unsafe { entry.next_cloned() };
        }
        None
    }

    /// # Safety
    ///
    /// The exclusive lock for `inner` must be held.
    unsafe fn remove_from_chain(
        &self,
        inner: &mut SegmentInner<K, V>,
        entry: &EntryRef<K, V>,
    ) -> bool {
        let idx = bucket_index(entry.hash(), inner.buckets.len());
        let mut prev: Option<EntryRef<K, V>> = None;
        let mut cur = inner.buckets[idx].clone();
        while let Some(c) = cur {
            if TrioArc::ptr_eq(&c, entry) {
                let next = c.take_next();
                match &prev {
                    None => inner.buckets[idx] = next,
                    Some(p) => p.set_next(next),
                }
                return true;
            }
            let next = c.next_cloned();
            prev = Some(c);
            cur = next;
        }
        false
    }

    /// # Safety
    ///
    /// A lock for `inner` must be held, shared or exclusive.
    unsafe fn chain_contains(&self, inner: &SegmentInner<K, V>, entry: &EntryRef<K, V>) -> bool {
        let idx = bucket_index(entry.hash(), inner.buckets.len());
        let mut cur = inner.buckets[idx].as_ref();
        while let Some(c) = cur {
            if TrioArc::ptr_eq(c, entry) {
                return true;
            }
            cur = c.next_ref();
        }
        false
    }

    /// Unlinks a counted entry from the hash array and both ordering lists,
    /// recording the removal notification. No-op if the entry is no longer
    /// in the table.
    fn unlink_entry(
        &self,
        inner: &mut SegmentInner<K, V>,
        entry: &EntryRef<K, V>,
        cause: RemovalCause,
        notices: &mut Notices<K, V>,
    ) {
        if !unsafe { self.remove_from_chain(inner, entry) } {
            return;
        }
        let mut nodes = entry.nodes();
        let access_node = nodes.access_node.take();
        let write_node = nodes.write_node.take();
        drop(nodes);
        if let Some(node) = access_node {
            unsafe { inner.access_deque.unlink_and_drop(node) };
        }
        if let Some(node) = write_node {
            unsafe { inner.write_deque.unlink_and_drop(node) };
        }
        inner.count -= 1;
        inner.mod_count += 1;
        self.len.store(inner.count, Ordering::Release);
        let value = match unsafe { entry.value_slot() } {
            ValueSlot::Present(vref) => vref.get(),
            ValueSlot::Computing(_) => None,
        };
        notices.push(entry.key().get(), value, cause);
    }

    fn insert_fresh(
        &self,
        inner: &mut SegmentInner<K, V>,
        key: Arc<K>,
        hash: u64,
        value: Arc<V>,
        now: Instant,
        notices: &mut Notices<K, V>,
    ) {
        self.expand_if_needed(inner);
        let entry = TrioArc::new(Entry::new(
            hash,
            StrengthRef::new(self.config.key_strength, key),
            ValueSlot::Present(StrengthRef::new(self.config.value_strength, value)),
        ));
        entry.set_access_time(now);
        entry.set_write_time(now);
        let idx = bucket_index(hash, inner.buckets.len());
        unsafe { entry.set_next(inner.buckets[idx].take()) };
        inner.buckets[idx] = Some(entry.clone());
        self.link_deques(inner, &entry);
        inner.count += 1;
        inner.mod_count += 1;
        self.len.store(inner.count, Ordering::Release);
        self.evict_to_size(inner, notices);
    }

    /// Appends the entry to the tail of every ordering list enabled by the
    /// configuration.
    fn link_deques(&self, inner: &mut SegmentInner<K, V>, entry: &EntryRef<K, V>) {
        let mut nodes = entry.nodes();
        if self.config.uses_access_deque() && nodes.access_node.is_none() {
            let node = inner
                .access_deque
                .push_back(Box::new(DeqNode::new(entry.clone())));
            nodes.access_node = Some(node);
        }
        if self.config.uses_write_deque() && nodes.write_node.is_none() {
            let node = inner
                .write_deque
                .push_back(Box::new(DeqNode::new(entry.clone())));
            nodes.write_node = Some(node);
        }
    }

    /// Refreshes the write timestamp and moves the entry to the tail of
    /// the write-order list after a value replacement. The recency list
    /// and the access time are left alone; only reads promote recency.
    fn record_write(&self, inner: &mut SegmentInner<K, V>, entry: &EntryRef<K, V>, now: Instant) {
        entry.set_write_time(now);
        let node = entry.nodes().write_node;
        if let Some(node) = node {
            unsafe { inner.write_deque.move_to_back(node) };
        }
    }

    /// Doubles the bucket array at load factor 3/4. Each chain is split
    /// into the tail run that already lands in its new bucket, which is
    /// reused in place, and the remaining entries, which are relinked one
    /// by one.
    fn expand_if_needed(&self, inner: &mut SegmentInner<K, V>) {
        if inner.count + 1 <= inner.threshold || inner.buckets.len() >= MAX_BUCKET_CAPACITY {
            return;
        }
        let old_len = inner.buckets.len();
        let new_len = old_len * 2;
        let mut new_buckets: Vec<Option<EntryRef<K, V>>> = vec![None; new_len];

        for i in 0..old_len {
            let Some(head) = inner.buckets[i].take() else {
                continue;
            };
            if unsafe { head.next_ref() }.is_none() {
                let idx = bucket_index(head.hash(), new_len);
                new_buckets[idx] = Some(head);
                continue;
            }

            // Find the start of the longest tail run mapping to a single
            // new bucket.
            let mut tail_run = head.clone();
            let mut tail_index = bucket_index(head.hash(), new_len);
            let mut node = unsafe { head.next_cloned() };
            while let Some(n) = node {
                let idx = bucket_index(n.hash(), new_len);
                if idx != tail_index {
                    tail_index = idx;
                    tail_run = n.clone();
                }
                node = unsafe { n.next_cloned() };
            }
            new_buckets[tail_index] = Some(tail_run.clone());

            // Relink everything before the run.
            let mut node = Some(head);
            while let Some(n) = node {
                if TrioArc::ptr_eq(&n, &tail_run) {
                    break;
                }
                let next = unsafe { n.take_next() };
                let idx = bucket_index(n.hash(), new_len);
                unsafe { n.set_next(new_buckets[idx].take()) };
                new_buckets[idx] = Some(n);
                node = next;
            }
        }

        inner.buckets = new_buckets.into_boxed_slice();
        inner.threshold = new_len * 3 / 4;
        inner.sweep_cursor = 0;
    }

    fn deliver(&self, notices: Notices<K, V>) {
        if notices.is_empty() {
            return;
        }
        for (key, value, cause) in notices.drain() {
            if cause.was_evicted() {
                self.config.stats.record_eviction();
            }
            if let Some(notifier) = &self.config.notifier {
                notifier.notify(key, value, cause);
            }
        }
    }
}
