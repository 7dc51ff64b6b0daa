// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::{fmt::Debug, hash::Hash, time::Instant};

use super::{
    EvictionPolicy, Eviction, Occupancy, PolicyKind,
    ranked::{Ranked, Sequence},
};

/// Evicts the least recently used key.
///
/// Inserts and touches move a key to the tail of the access order; the head is evicted.
#[derive(Debug)]
pub struct LruPolicy<K> {
    order: Ranked<K, u64>,
    clock: Sequence,
}

impl<K> LruPolicy<K>
where
    K: Clone + Eq + Hash,
{
    /// Creates an empty LRU policy.
    #[must_use]
    pub fn new() -> Self {
        Self {
            order: Ranked::new(),
            clock: Sequence::default(),
        }
    }
}

impl<K> Default for LruPolicy<K>
where
    K: Clone + Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> EvictionPolicy<K> for LruPolicy<K>
where
    K: Clone + Eq + Hash + Debug + Send,
{
    fn kind(&self) -> PolicyKind {
        PolicyKind::Lru
    }

    fn record_insert(&mut self, key: &K, _expires_at: Option<Instant>) {
        self.order.set(key, self.clock.next());
    }

    fn touch(&mut self, key: &K) {
        if self.order.rank(key).is_some() {
            self.order.set(key, self.clock.next());
        }
    }

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
