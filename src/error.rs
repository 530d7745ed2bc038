//! Error types for computing maps.

use std::{error::Error, sync::Arc};

/// The boxed error a computing function may fail with.
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// The error returned by [`ComputingMap::get`][crate::ComputingMap::get].
///
/// A failure is shared by every caller waiting on the same computation, so
/// the underlying cause is reference counted.
#[derive(thiserror::Error, Debug, Clone)]
pub enum ComputeError {
    /// The computing function returned an error. The cause is wrapped
    /// exactly once: a cause that is already a `ComputeError` is propagated
    /// as-is instead of being re-wrapped.
    #[error("computing function failed: {0}")]
    Failed(Arc<BoxError>),

    /// The computation never produced an outcome (the computing thread
    /// panicked or its entry was discarded) and the waiter was released
    /// without a value.
    #[error("computation was abandoned before completing")]
    Abandoned,
}

impl ComputeError {
    /// Wraps a computing-function error, avoiding double wrapping.
    pub(crate) fn from_cause(cause: BoxError) -> Self {
        match cause.downcast::<ComputeError>() {
            Ok(inner) => *inner,
            Err(cause) => Self::Failed(Arc::new(cause)),
        }
    }

    /// The underlying computing-function error, if any.
    pub fn cause(&self) -> Option<&(dyn Error + Send + Sync + 'static)> {
        match self {
            Self::Failed(cause) => Some(cause.as_ref().as_ref()),
            Self::Abandoned => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{BoxError, ComputeError};

    #[test]
    fn wraps_plain_errors() {
        let cause: BoxError = "boom".into();
        let err = ComputeError::from_cause(cause);
        assert!(matches!(err, ComputeError::Failed(_)));
        assert_eq!(err.to_string(), "computing function failed: boom");
    }

    #[test]
    fn does_not_rewrap_compute_errors() {
        let inner = ComputeError::from_cause("boom".into());
        let outer = ComputeError::from_cause(Box::new(inner.clone()));
        assert_eq!(outer.to_string(), inner.to_string());
    }
}
