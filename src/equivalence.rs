//! Equality disciplines for keys and values.
//!
//! A map compares keys (and, for `contains_value`-style operations, values)
//! through an `Equivalence` rather than through `Eq` directly, because the
//! reference strength dictates the discipline: strongly held entries use
//! logical equality, while weakly or softly held entries use identity. The
//! hash an equivalence produces must always agree with its notion of
//! equality.

use std::{
    collections::hash_map::RandomState,
    hash::{BuildHasher, Hash, Hasher},
    marker::PhantomData,
};

/// A strategy for comparing and hashing borrowed values of type `T`.
pub trait Equivalence<T: ?Sized>: Send + Sync + 'static {
    /// Returns `true` if `a` and `b` are considered equivalent.
    fn equivalent(&self, a: &T, b: &T) -> bool;

    /// Returns a hash consistent with [`equivalent`][Equivalence::equivalent]:
    /// equivalent values must produce equal hashes.
    fn hash(&self, value: &T) -> u64;
}

/// Compares with `Eq` and hashes with `Hash`. The default for strongly held
/// keys and values.
pub struct LogicalEquivalence<T> {
    build_hasher: RandomState,
    _marker: PhantomData<fn(&T)>,
}

impl<T> Default for LogicalEquivalence<T> {
    fn default() -> Self {
        Self {
            build_hasher: RandomState::default(),
            _marker: PhantomData,
        }
    }
}

impl<T> Equivalence<T> for LogicalEquivalence<T>
where
    T: Eq + Hash + 'static,
{
    fn equivalent(&self, a: &T, b: &T) -> bool {
        a == b
    }

    fn hash(&self, value: &T) -> u64 {
        let mut hasher = self.build_hasher.build_hasher();
        value.hash(&mut hasher);
        hasher.finish()
    }
}

/// Compares and hashes by referent address. The default for weakly and
/// softly held keys and values, where a reclaimed referent must never match
/// a fresh, logically equal one.
#[derive(Default)]
pub struct IdentityEquivalence;

impl<T: 'static> Equivalence<T> for IdentityEquivalence {
    fn equivalent(&self, a: &T, b: &T) -> bool {
        std::ptr::eq(a, b)
    }

    fn hash(&self, value: &T) -> u64 {
        value as *const T as usize as u64
    }
}

#[cfg(test)]
mod tests {
    use super::{Equivalence, IdentityEquivalence, LogicalEquivalence};
    use std::sync::Arc;

    #[test]
    fn logical_matches_eq() {
        let eq = LogicalEquivalence::<String>::default();
        let a = "alpha".to_string();
        let b = "alpha".to_string();
        assert!(eq.equivalent(&a, &b));
        assert_eq!(eq.hash(&a), eq.hash(&b));
        assert!(!eq.equivalent(&a, &"beta".to_string()));
    }

    #[test]
    fn identity_distinguishes_equal_allocations() {
        let eq = IdentityEquivalence;
        let a = Arc::new(7_i32);
        let b = Arc::new(7_i32);
        assert!(eq.equivalent(&*a, &*a));
        assert!(!eq.equivalent(&*a, &*b));
        assert_eq!(eq.hash(&*a), eq.hash(&*a));
        assert_ne!(eq.hash(&*a), eq.hash(&*b));
    }
}
