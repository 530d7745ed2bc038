#![warn(clippy::all)]
#![warn(rust_2018_idioms)]

//! A concurrent map builder, providing any combination of these features:
//! weak or soft keys, weak or soft values, size-based eviction, timed
//! expiration, removal notification, and on-demand computation of values.
//!
//! ```rust
//! use mapmaker::MapMaker;
//! use std::{sync::Arc, time::Duration};
//!
//! let graphs = MapMaker::new()
//!     .concurrency_level(4)
//!     .maximum_size(10_000)
//!     .expire_after_write(Duration::from_secs(10 * 60))
//!     .make_computing_map(|key: &Arc<String>| Ok(Arc::new(key.len())));
//!
//! assert_eq!(*graphs.get(&Arc::new("hello".to_string())).unwrap(), 5);
//! ```
//!
//! The maps are backed by a segmented hash table: operations on a key are
//! routed by hash to one of a fixed set of independently lockable
//! segments, so updates to distinct segments never contend. Reads take
//! only a segment's shared lock. Iteration is weakly consistent: it
//! reflects some state of the map between its start and its end, never
//! raises on concurrent modification, and never yields a reclaimed,
//! expired, or still-computing entry.
//!
//! Eviction and expiration are amortized onto the threads using the map:
//! every mutation (and any read that observes something stale) runs a
//! cleanup pass over its segment. An entry past its bound or its
//! expiration is therefore guaranteed to be invisible, but its removal
//! notification may be deferred until the next operation reaches the
//! segment.

mod builder;
mod cache;
mod computing;
mod deque;
mod entry;
mod equivalence;
mod error;
mod notification;
mod reference;
mod segment;
mod stats;
mod table;
mod time;

pub use builder::MapMaker;
pub use cache::{CacheMap, ComputingMap, Iter};
pub use equivalence::{Equivalence, IdentityEquivalence, LogicalEquivalence};
pub use error::{BoxError, ComputeError};
pub use notification::{RemovalCause, RemovalListener};
pub use stats::{CacheStats, StatsCounter};
pub use time::Ticker;
