#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};

use mapmaker::{RemovalCause, Ticker};

pub type Event<K, V> = (Option<Arc<K>>, Option<Arc<V>>, RemovalCause);

/// Captures removal notifications for assertions.
pub struct EventLog<K, V> {
    events: Mutex<Vec<Event<K, V>>>,
}

impl<K, V> EventLog<K, V> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn listener(
        self: &Arc<Self>,
    ) -> impl Fn(Option<Arc<K>>, Option<Arc<V>>, RemovalCause) + Send + Sync + 'static
    where
        K: Send + Sync + 'static,
        V: Send + Sync + 'static,
    {
        let log = Arc::clone(self);
        move |key, value, cause| log.events.lock().unwrap().push((key, value, cause))
    }

    pub fn events(&self) -> Vec<Event<K, V>> {
        self.events.lock().unwrap().clone()
    }

    pub fn causes(&self) -> Vec<RemovalCause> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, cause)| *cause)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }
}

/// A hand-cranked time source for expiration tests.
#[derive(Default)]
pub struct FakeTicker {
    nanos: Arc<AtomicU64>,
}

impl FakeTicker {
    /// Returns the ticker to install and a handle for advancing it.
    pub fn pair() -> (FakeTicker, FakeTicker) {
        let nanos = Arc::new(AtomicU64::new(0));
        (
            FakeTicker {
                nanos: Arc::clone(&nanos),
            },
            FakeTicker { nanos },
        )
    }

    pub fn advance(&self, nanos: u64) {
        self.nanos.fetch_add(nanos, Ordering::SeqCst);
    }
}

impl Ticker for FakeTicker {
    fn read(&self) -> u64 {
        self.nanos.load(Ordering::SeqCst)
    }
}
