//! Reference-strength policy.
//!
//! A map may hold its keys and values strongly (owned), softly (owned but
//! surrenderable under an external memory-pressure signal), or weakly
//! (non-owning). Rust has no reclaiming runtime, so the two non-strong modes
//! are modeled explicitly: a weak reference dies when the caller drops its
//! last `Arc`, and a soft reference dies when the owning map is asked to
//! release soft references. Either way the map observes the dead reference
//! during traversal and removes the entry with cause `Collected`.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::equivalence::{Equivalence, IdentityEquivalence, LogicalEquivalence};

/// Retention mode for stored keys or values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Strength {
    Strong,
    Soft,
    Weak,
}

impl Strength {
    /// The equality discipline the mode implies: logical for strong
    /// references, identity for the reclaimable modes.
    pub(crate) fn default_equivalence<T>(&self) -> Arc<dyn Equivalence<T>>
    where
        T: Eq + std::hash::Hash + 'static,
    {
        match self {
            Strength::Strong => Arc::new(LogicalEquivalence::default()),
            Strength::Soft | Strength::Weak => Arc::new(IdentityEquivalence),
        }
    }
}

/// A stored key or value reference of configurable strength.
pub(crate) enum StrengthRef<T> {
    Strong(Arc<T>),
    Soft(SoftCell<T>),
    Weak(Weak<T>),
}

impl<T> StrengthRef<T> {
    pub(crate) fn new(strength: Strength, referent: Arc<T>) -> Self {
        match strength {
            Strength::Strong => Self::Strong(referent),
            Strength::Soft => Self::Soft(SoftCell::new(referent)),
            Strength::Weak => Self::Weak(Arc::downgrade(&referent)),
        }
    }

    /// Returns the referent, or `None` if it has been reclaimed.
    pub(crate) fn get(&self) -> Option<Arc<T>> {
        match self {
            Self::Strong(referent) => Some(Arc::clone(referent)),
            Self::Soft(cell) => cell.get(),
            Self::Weak(weak) => weak.upgrade(),
        }
    }

    pub(crate) fn is_dead(&self) -> bool {
        match self {
            Self::Strong(_) => false,
            Self::Soft(cell) => cell.get().is_none(),
            Self::Weak(weak) => weak.strong_count() == 0,
        }
    }

    /// Surrenders a softly held referent. Returns `true` if a referent was
    /// actually released.
    pub(crate) fn surrender_soft(&self) -> bool {
        match self {
            Self::Soft(cell) => cell.clear(),
            _ => false,
        }
    }
}

/// A surrenderable strong reference. Cleared in response to the owning map's
/// memory-pressure signal, after which the entry reads as reclaimed.
pub(crate) struct SoftCell<T> {
    referent: Mutex<Option<Arc<T>>>,
}

impl<T> SoftCell<T> {
    fn new(referent: Arc<T>) -> Self {
        Self {
            referent: Mutex::new(Some(referent)),
        }
    }

    fn get(&self) -> Option<Arc<T>> {
        self.referent.lock().clone()
    }

    fn clear(&self) -> bool {
        self.referent.lock().take().is_some()
    }
}
