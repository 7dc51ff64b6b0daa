// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::{fmt::Debug, hash::Hash, time::Instant};

use super::{
    EvictionPolicy, Eviction, Occupancy, PolicyKind,
    ranked::{Ranked, Sequence},
};

/// Evicts the earliest inserted key. Reads and overwrites do not change the order.
#[derive(Debug)]
pub struct FifoPolicy<K> {
    order: Ranked<K, u64>,
    inserted: Sequence,
}

impl<K> FifoPolicy<K>
where
    K: Clone + Eq + Hash,
{
    /// Creates an empty FIFO policy.
    #[must_use]
    pub fn new() -> Self {
        Self {
            order: Ranked::new(),
            inserted: Sequence::default(),
        }
    }
}

impl<K> Default for FifoPolicy<K>
where
    K: Clone + Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> EvictionPolicy<K> for FifoPolicy<K>
where
    K: Clone + Eq + Hash + Debug + Send,
{
    fn kind(&self) -> PolicyKind {
        PolicyKind::Fifo
    }

    fn record_insert(&mut self, key: &K, _expires_at: Option<Instant>) {
        self.order.set(key, self.inserted.next());
    }

    fn record_update(&mut self, _key: &K, _expires_at: Option<Instant>) {}

    fn touch(&mut self, _key: &K) {}

    fn admit(&mut self, _candidate: &K, occupancy: Occupancy, _now: Instant) -> Eviction<K> {
        if occupancy.is_full() {
            Eviction::victim(self.order.pop_first())
        } else {
            Eviction::none()
        }
    }

    fn forget(&mut self, key: &K) {
        self.order.remove(key);
    }

    fn clear(&mut self) {
        self.order.clear();
    }
}
