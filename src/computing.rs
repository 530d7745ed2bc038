//! The one-shot completion latch behind on-demand value computation.
//!
//! While a value is being computed, its entry holds a `ComputingState`.
//! Waiters clone the state before the segment lock is released, so a signal
//! can never be lost, and then block on the latch outside any lock. The
//! latch completes exactly once: with the computed value, with the value of
//! an external `insert` that won the race, or with the shared failure.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::error::ComputeError;

/// The terminal state of a computation, shared by every waiter.
pub(crate) enum Outcome<V> {
    Value(Arc<V>),
    Failed(ComputeError),
}

impl<V> Clone for Outcome<V> {
    fn clone(&self) -> Self {
        match self {
            Self::Value(value) => Self::Value(Arc::clone(value)),
            Self::Failed(error) => Self::Failed(error.clone()),
        }
    }
}

impl<V> Outcome<V> {
    pub(crate) fn into_result(self) -> Result<Arc<V>, ComputeError> {
        match self {
            Outcome::Value(value) => Ok(value),
            Outcome::Failed(error) => Err(error),
        }
    }
}

pub(crate) struct ComputingState<V> {
    outcome: Mutex<Option<Outcome<V>>>,
    completed: Condvar,
}

impl<V> Default for ComputingState<V> {
    fn default() -> Self {
        Self {
            outcome: Mutex::new(None),
            completed: Condvar::new(),
        }
    }
}

impl<V> ComputingState<V> {
    /// Completes the latch. Only the first completion takes effect; later
    /// calls are ignored, which is what makes an external `insert` win over
    /// the in-flight computation.
    pub(crate) fn complete(&self, outcome: Outcome<V>) {
        let mut slot = self.outcome.lock();
        if slot.is_none() {
            *slot = Some(outcome);
            self.completed.notify_all();
        }
    }

    /// Blocks until the latch completes.
    pub(crate) fn wait(&self) -> Outcome<V> {
        let mut slot = self.outcome.lock();
        while slot.is_none() {
            self.completed.wait(&mut slot);
        }
        slot.as_ref().expect("latch completed").clone()
    }

    #[cfg(test)]
    pub(crate) fn is_complete(&self) -> bool {
        self.outcome.lock().is_some()
    }
}
