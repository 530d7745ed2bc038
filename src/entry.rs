//! A single hash-table node.
//!
//! An entry is shared between its bucket chain, the per-segment ordering
//! deques, and the segment's read and reclamation queues, so it is reference
//! counted. The chain link and the value slot are interior-mutable and
//! guarded by the owning segment's lock: readers access them while holding
//! the shared lock, and all mutation happens under the exclusive lock. The
//! timestamps are atomics so the read path can refresh the access time
//! without writing anything else.

use std::{cell::UnsafeCell, ptr::NonNull};

use parking_lot::{Mutex, MutexGuard};
use triomphe::Arc as TrioArc;

use crate::{
    computing::ComputingState,
    deque::DeqNode,
    reference::StrengthRef,
    time::{AtomicInstant, Instant},
};

pub(crate) type EntryRef<K, V> = TrioArc<Entry<K, V>>;

/// What the entry currently holds: a published value reference, or the
/// latch of an in-flight computation. A computing entry is reachable from
/// the hash array but invisible to every query except a computing `get`,
/// and it participates in no ordering list.
pub(crate) enum ValueSlot<V> {
    Present(StrengthRef<V>),
    Computing(TrioArc<ComputingState<V>>),
}

/// Pointers to this entry's nodes in the per-segment ordering deques.
/// `None` means the entry is not linked into that list.
pub(crate) struct DeqNodes<K, V> {
    pub(crate) access_node: Option<NonNull<DeqNode<EntryRef<K, V>>>>,
    pub(crate) write_node: Option<NonNull<DeqNode<EntryRef<K, V>>>>,
}

// The NonNull pointers target nodes owned by the segment's deques and are
// only dereferenced under the segment's exclusive lock.
unsafe impl<K: Send, V: Send> Send for DeqNodes<K, V> {}

pub(crate) struct Entry<K, V> {
    hash: u64,
    key: StrengthRef<K>,
    value: UnsafeCell<ValueSlot<V>>,
    next: UnsafeCell<Option<EntryRef<K, V>>>,
    access_time: AtomicInstant,
    write_time: AtomicInstant,
    nodes: Mutex<DeqNodes<K, V>>,
}

// `value` and `next` are guarded by the segment lock; see the accessor
// safety contracts.
unsafe impl<K: Send + Sync, V: Send + Sync> Send for Entry<K, V> {}
unsafe impl<K: Send + Sync, V: Send + Sync> Sync for Entry<K, V> {}

impl<K, V> Entry<K, V> {
    pub(crate) fn new(hash: u64, key: StrengthRef<K>, slot: ValueSlot<V>) -> Self {
        Self {
            hash,
            key,
            value: UnsafeCell::new(slot),
            next: UnsafeCell::new(None),
            access_time: AtomicInstant::default(),
            write_time: AtomicInstant::default(),
            nodes: Mutex::new(DeqNodes {
                access_node: None,
                write_node: None,
            }),
        }
    }

    pub(crate) fn hash(&self) -> u64 {
        self.hash
    }

    pub(crate) fn key(&self) -> &StrengthRef<K> {
        &self.key
    }

    /// # Safety
    ///
    /// The segment lock must be held (shared or exclusive) for the lifetime
    /// of the returned borrow.
    pub(crate) unsafe fn value_slot(&self) -> &ValueSlot<V> {
        &*self.value.get()
    }

    /// # Safety
    ///
    /// The segment's exclusive lock must be held.
    pub(crate) unsafe fn set_value_slot(&self, slot: ValueSlot<V>) {
        *self.value.get() = slot;
    }

    /// # Safety
    ///
    /// The segment lock must be held (shared or exclusive) for the lifetime
    /// of the returned borrow.
    pub(crate) unsafe fn next_ref(&self) -> Option<&EntryRef<K, V>> {
        (*self.next.get()).as_ref()
    }

    /// # Safety
    ///
    /// The segment lock must be held, shared or exclusive.
    pub(crate) unsafe fn next_cloned(&self) -> Option<EntryRef<K, V>> {
        (*self.next.get()).clone()
    }

    /// # Safety
    ///
    /// The segment's exclusive lock must be held.
    pub(crate) unsafe fn set_next(&self, next: Option<EntryRef<K, V>>) {
        *self.next.get() = next;
    }

    /// # Safety
    ///
    /// The segment's exclusive lock must be held.
    pub(crate) unsafe fn take_next(&self) -> Option<EntryRef<K, V>> {
        (*self.next.get()).take()
    }

    pub(crate) fn access_time(&self) -> Option<Instant> {
        self.access_time.instant()
    }

    pub(crate) fn set_access_time(&self, timestamp: Instant) {
        self.access_time.set_instant(timestamp);
    }

    pub(crate) fn write_time(&self) -> Option<Instant> {
        self.write_time.instant()
    }

    pub(crate) fn set_write_time(&self, timestamp: Instant) {
        self.write_time.set_instant(timestamp);
    }

    pub(crate) fn nodes(&self) -> MutexGuard<'_, DeqNodes<K, V>> {
        self.nodes.lock()
    }
}
