// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Eviction policies.
//!
//! A policy only keeps bookkeeping about keys; the [`CacheTier`][crate::CacheTier] owns the
//! entries and asks the policy for a victim when a new key arrives at a full tier.
//!
//! | policy                 | `touch`             | victim when full                                   |
//! |------------------------|---------------------|----------------------------------------------------|
//! | [`LruPolicy`]          | moves key to tail   | head of the access order                           |
//! | [`LfuPolicy`]          | frequency + 1       | lowest frequency, ties go to the earliest insert   |
//! | [`FifoPolicy`]         | ignored             | earliest insert                                    |
//! | [`TtlPolicy`]          | ignored             | expired keys first, then the earliest expiry       |

use std::{
    fmt::{self, Debug, Display},
    hash::Hash,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};

mod fifo;
mod lfu;
mod lru;
mod ranked;
mod ttl;

pub use fifo::FifoPolicy;
pub use lfu::LfuPolicy;
pub use lru::LruPolicy;
pub use ttl::TtlPolicy;

/// Default time-to-live applied by [`PolicyKind::Ttl`] when none is configured.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Decides which entry leaves a full tier.
///
/// Implementations are driven by a single tier under that tier's lock, so they never need their
/// own synchronization. Keys returned from [`admit`][Self::admit] are already forgotten by the
/// policy; the tier only removes the matching entries.
pub trait EvictionPolicy<K>: Debug + Send {
    /// Which built-in policy this is.
    fn kind(&self) -> PolicyKind;

    /// Expiry applied to entries written without an explicit time-to-live.
    fn default_ttl(&self) -> Option<Duration> {
        None
    }

    /// Starts tracking a key that was just inserted.
    fn record_insert(&mut self, key: &K, expires_at: Option<Instant>);

    /// Records an in-place overwrite of a tracked key. Counts as an access by default.
    fn record_update(&mut self, key: &K, _expires_at: Option<Instant>) {
        self.touch(key);
    }

    /// Records a read of a tracked key.
    fn touch(&mut self, key: &K);

    /// Decides what must leave before `candidate` can be inserted.
    ///
    /// Called only for keys that are not yet tracked. Returns an empty [`Eviction`] while the
    /// tier has room.
    fn admit(&mut self, candidate: &K, occupancy: Occupancy, now: Instant) -> Eviction<K>;

    /// Stops tracking a key that was removed by other means.
    fn forget(&mut self, key: &K);

    /// Stops tracking every key.
    fn clear(&mut self);
}

/// How full a tier is at the time of an admission decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occupancy {
    /// Entries currently held.
    pub len: usize,
    /// Maximum number of entries.
    pub capacity: usize,
}

impl Occupancy {
    /// Returns `true` if one more entry would exceed the capacity.
    #[must_use]
    pub fn is_full(self) -> bool {
        self.len >= self.capacity
    }
}

/// Keys a policy wants removed before an insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eviction<K> {
    /// Keys whose entries already expired. Only the TTL policy sweeps.
    pub expired: Vec<K>,
    /// The live entry chosen to make room, if sweeping was not enough.
    pub victim: Option<K>,
}

impl<K> Eviction<K> {
    /// Nothing has to leave.
    #[must_use]
    pub fn none() -> Self {
        Self {
            expired: Vec::new(),
            victim: None,
        }
    }

    /// A single live entry has to leave.
    #[must_use]
    pub fn victim(victim: Option<K>) -> Self {
        Self { expired: Vec::new(), victim }
    }

    /// Returns `true` if no key has to leave.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.expired.is_empty() && self.victim.is_none()
    }
}

/// Selects one of the built-in eviction policies.
///
/// Deserializes from an internally tagged representation, for example
/// `{"kind": "lfu"}` or `{"kind": "ttl", "default_ttl": {"secs": 60, "nanos": 0}}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[non_exhaustive]
pub enum PolicyKind {
    /// Least recently used.
    #[default]
    Lru,
    /// Least frequently used, ties broken by insertion order.
    Lfu,
    /// First in, first out.
    Fifo,
    /// Earliest expiry first, with expired entries swept before any live one is evicted.
    Ttl {
        /// Time-to-live applied when a write supplies none.
        #[serde(default = "default_ttl")]
        default_ttl: Duration,
    },
}

fn default_ttl() -> Duration {
    DEFAULT_TTL
}

impl PolicyKind {
    /// A TTL policy with the given default time-to-live.
    #[must_use]
    pub fn ttl(default_ttl: Duration) -> Self {
        Self::Ttl { default_ttl }
    }

    /// Short lowercase name, as used in logs and statistics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lru => "lru",
            Self::Lfu => "lfu",
            Self::Fifo => "fifo",
            Self::Ttl { .. } => "ttl",
        }
    }

    /// Creates a fresh policy instance.
    #[must_use]
    pub fn build<K>(self) -> Box<dyn EvictionPolicy<K>>
    where
        K: Clone + Eq + Hash + Debug + Send + 'static,
    {
        match self {
            Self::Lru => Box::new(LruPolicy::new()),
            Self::Lfu => Box::new(LfuPolicy::new()),
            Self::Fifo => Box::new(FifoPolicy::new()),
            Self::Ttl { default_ttl } => Box::new(TtlPolicy::new(default_ttl)),
        }
    }
}

impl Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
