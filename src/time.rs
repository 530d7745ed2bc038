//! Time sources for expiration bookkeeping.
//!
//! All timestamps are nanoseconds measured from the creation of the owning
//! map's `Clock`, so they fit in a `u64` and can be stored atomically.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

/// A nanosecond-precision time source.
///
/// The default source is a monotonic clock. Supply your own implementation
/// through [`MapMaker::ticker`][crate::MapMaker::ticker] to control time in
/// tests:
///
/// ```rust
/// use mapmaker::Ticker;
/// use std::sync::atomic::{AtomicU64, Ordering};
///
/// #[derive(Default)]
/// struct FakeTicker(AtomicU64);
///
/// impl FakeTicker {
///     fn advance(&self, nanos: u64) {
///         self.0.fetch_add(nanos, Ordering::SeqCst);
///     }
/// }
///
/// impl Ticker for FakeTicker {
///     fn read(&self) -> u64 {
///         self.0.load(Ordering::SeqCst)
///     }
/// }
/// # let t = FakeTicker::default();
/// # t.advance(10);
/// # assert_eq!(t.read(), 10);
/// ```
pub trait Ticker: Send + Sync + 'static {
    /// Returns the number of nanoseconds elapsed since some fixed but
    /// arbitrary point in time. Successive reads must not decrease.
    fn read(&self) -> u64;
}

// `u64::MAX` is reserved by `AtomicInstant` to mean "unset".
pub(crate) const MAX_NANOS: u64 = u64::MAX - 1;

/// A point in time with nanosecond precision, relative to the start of the
/// `Clock` that produced it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct Instant {
    elapsed_ns: u64,
}

impl Instant {
    pub(crate) fn from_nanos(nanos: u64) -> Instant {
        debug_assert!(nanos <= MAX_NANOS);
        Instant { elapsed_ns: nanos }
    }

    pub(crate) fn as_nanos(&self) -> u64 {
        self.elapsed_ns
    }

    /// Converts a `Duration` to nanoseconds, saturating to `MAX_NANOS` if the
    /// duration does not fit. (`Duration::as_nanos` returns `u128`.)
    pub(crate) fn duration_to_saturating_nanos(duration: Duration) -> u64 {
        u64::try_from(duration.as_nanos())
            .map(|n| n.min(MAX_NANOS))
            .unwrap_or(MAX_NANOS)
    }

    pub(crate) fn saturating_elapsed_nanos(&self, earlier: Instant) -> u64 {
        self.elapsed_ns.saturating_sub(earlier.elapsed_ns)
    }
}

/// The map-wide source of `Instant`s. Either a monotonic system clock or a
/// caller-supplied [`Ticker`].
#[derive(Clone)]
pub(crate) struct Clock {
    ty: ClockType,
}

#[derive(Clone)]
enum ClockType {
    Monotonic {
        clock: quanta::Clock,
        origin: quanta::Instant,
    },
    Custom {
        ticker: Arc<dyn Ticker>,
        origin: u64,
    },
}

impl Default for Clock {
    fn default() -> Self {
        let clock = quanta::Clock::new();
        let origin = clock.now();
        Self {
            ty: ClockType::Monotonic { clock, origin },
        }
    }
}

impl Clock {
    pub(crate) fn custom(ticker: Arc<dyn Ticker>) -> Self {
        let origin = ticker.read();
        Self {
            ty: ClockType::Custom { ticker, origin },
        }
    }

    pub(crate) fn now(&self) -> Instant {
        match &self.ty {
            ClockType::Monotonic { clock, origin } => Instant::from_nanos(
                Instant::duration_to_saturating_nanos(clock.now().duration_since(*origin)),
            ),
            ClockType::Custom { ticker, origin } => {
                Instant::from_nanos(ticker.read().saturating_sub(*origin).min(MAX_NANOS))
            }
        }
    }
}

/// A lock-free optional `Instant`. `u64::MAX` stands for "unset".
#[derive(Debug)]
pub(crate) struct AtomicInstant {
    instant: AtomicU64,
}

impl Default for AtomicInstant {
    fn default() -> Self {
        Self {
            instant: AtomicU64::new(u64::MAX),
        }
    }
}

impl AtomicInstant {
    pub(crate) fn instant(&self) -> Option<Instant> {
        let ts = self.instant.load(Ordering::Acquire);
        if ts == u64::MAX {
            None
        } else {
            Some(Instant::from_nanos(ts))
        }
    }

    pub(crate) fn set_instant(&self, instant: Instant) {
        self.instant.store(instant.as_nanos(), Ordering::Release);
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::Ticker;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    pub(crate) struct MockTicker {
        nanos: AtomicU64,
    }

    impl MockTicker {
        pub(crate) fn advance(&self, nanos: u64) {
            self.nanos.fetch_add(nanos, Ordering::SeqCst);
        }
    }

    impl Ticker for MockTicker {
        fn read(&self) -> u64 {
            self.nanos.load(Ordering::SeqCst)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{test_util::MockTicker, AtomicInstant, Clock, Instant, MAX_NANOS};
    use std::{sync::Arc, time::Duration};

    #[test]
    fn saturating_conversion() {
        assert_eq!(
            Instant::duration_to_saturating_nanos(Duration::from_nanos(42)),
            42
        );
        assert_eq!(
            Instant::duration_to_saturating_nanos(Duration::from_secs(u64::MAX)),
            MAX_NANOS
        );
    }

    #[test]
    fn elapsed_nanos() {
        let a = Instant::from_nanos(100);
        let b = Instant::from_nanos(160);
        assert_eq!(b.saturating_elapsed_nanos(a), 60);
        assert_eq!(a.saturating_elapsed_nanos(b), 0);
    }

    #[test]
    fn custom_clock_follows_ticker() {
        let ticker = Arc::new(MockTicker::default());
        let clock = Clock::custom(ticker.clone());
        assert_eq!(clock.now(), Instant::from_nanos(0));
        ticker.advance(250);
        assert_eq!(clock.now(), Instant::from_nanos(250));
    }

    #[test]
    fn atomic_instant_unset_by_default() {
        let ai = AtomicInstant::default();
        assert!(ai.instant().is_none());
        ai.set_instant(Instant::from_nanos(7));
        assert_eq!(ai.instant(), Some(Instant::from_nanos(7)));
    }

    #[test]
    fn monotonic_clock_advances() {
        let clock = Clock::default();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
