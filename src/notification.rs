//! Removal notification.
//!
//! Every removal, whether explicit or by the eviction engine, passes a
//! `(key, value, cause)` tuple to the optional listener. Notifications are
//! recorded while the segment lock is held and delivered synchronously on
//! the calling thread once the lock has been released, so listener code can
//! never observe (or deadlock against) a locked segment.

use std::sync::Arc;

use smallvec::SmallVec;

/// The reason an entry was removed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemovalCause {
    /// The entry was manually removed by the user.
    Explicit,
    /// The entry's value was replaced by the user.
    Replaced,
    /// The entry's key or value reference was reclaimed.
    Collected,
    /// The entry's expiration timestamp has passed.
    Expired,
    /// The entry was evicted due to the size constraint.
    Size,
}

impl RemovalCause {
    /// Returns `true` if the removal was an eviction (not user-driven).
    pub fn was_evicted(&self) -> bool {
        matches!(self, Self::Collected | Self::Expired | Self::Size)
    }
}

/// Invoked with the removed key, the removed value, and the cause. An
/// argument is `None` when the corresponding reference was already
/// reclaimed.
pub type RemovalListener<K, V> =
    Arc<dyn Fn(Option<Arc<K>>, Option<Arc<V>>, RemovalCause) + Send + Sync + 'static>;

/// Notifications recorded under a segment lock, awaiting delivery.
pub(crate) struct Notices<K, V> {
    entries: SmallVec<[(Option<Arc<K>>, Option<Arc<V>>, RemovalCause); 4]>,
}

impl<K, V> Default for Notices<K, V> {
    fn default() -> Self {
        Self {
            entries: SmallVec::new(),
        }
    }
}

impl<K, V> Notices<K, V> {
    pub(crate) fn push(&mut self, key: Option<Arc<K>>, value: Option<Arc<V>>, cause: RemovalCause) {
        self.entries.push((key, value, cause));
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[allow(clippy::type_complexity)]
    pub(crate) fn drain(
        self,
    ) -> impl Iterator<Item = (Option<Arc<K>>, Option<Arc<V>>, RemovalCause)> {
        self.entries.into_iter()
    }
}

/// Delivers notifications to the listener, containing listener panics so a
/// failing listener cannot abort the map operation that has already
/// unlinked the entry.
pub(crate) struct RemovalNotifier<K, V> {
    listener: RemovalListener<K, V>,
}

impl<K, V> Clone for RemovalNotifier<K, V> {
    fn clone(&self) -> Self {
        Self {
            listener: Arc::clone(&self.listener),
        }
    }
}

impl<K, V> RemovalNotifier<K, V> {
    pub(crate) fn new(listener: RemovalListener<K, V>) -> Self {
        Self { listener }
    }

    pub(crate) fn notify(&self, key: Option<Arc<K>>, value: Option<Arc<V>>, cause: RemovalCause) {
        use std::panic::{catch_unwind, AssertUnwindSafe};

        let listener = &self.listener;
        let _ = catch_unwind(AssertUnwindSafe(|| listener(key, value, cause)));
    }
}

#[cfg(test)]
mod tests {
    use super::{Notices, RemovalCause, RemovalNotifier};
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    #[test]
    fn eviction_causes() {
        assert!(!RemovalCause::Explicit.was_evicted());
        assert!(!RemovalCause::Replaced.was_evicted());
        assert!(RemovalCause::Collected.was_evicted());
        assert!(RemovalCause::Expired.was_evicted());
        assert!(RemovalCause::Size.was_evicted());
    }

    #[test]
    fn notifier_contains_listener_panics() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = Arc::clone(&calls);
        let notifier: RemovalNotifier<u32, u32> = RemovalNotifier::new(Arc::new(move |_, _, _| {
            calls2.fetch_add(1, Ordering::SeqCst);
            panic!("listener failure");
        }));
        notifier.notify(Some(Arc::new(1)), Some(Arc::new(2)), RemovalCause::Explicit);
        notifier.notify(Some(Arc::new(3)), Some(Arc::new(4)), RemovalCause::Size);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn notices_preserve_order() {
        let mut notices: Notices<u32, u32> = Notices::default();
        assert!(notices.is_empty());
        notices.push(Some(Arc::new(1)), None, RemovalCause::Collected);
        notices.push(None, Some(Arc::new(2)), RemovalCause::Size);
        let drained: Vec<_> = notices.drain().collect();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].2, RemovalCause::Collected);
        assert_eq!(drained[1].2, RemovalCause::Size);
    }
}
