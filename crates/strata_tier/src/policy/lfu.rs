// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::{fmt::Debug, hash::Hash, time::Instant};

use super::{
    EvictionPolicy, Eviction, Occupancy, PolicyKind,
    ranked::{Ranked, Sequence},
};

/// Evicts the least frequently used key.
///
/// A key starts at frequency one and gains one per touch or overwrite. Among keys with the lowest
/// frequency, the earliest inserted one is evicted.
#[derive(Debug)]
pub struct LfuPolicy<K> {
    // (frequency, insertion sequence)
    order: Ranked<K, (u64, u64)>,
    inserted: Sequence,
}

impl<K> LfuPolicy<K>
where
    K: Clone + Eq + Hash,
{
    /// Creates an empty LFU policy.
    #[must_use]
    pub fn new() -> Self {
        Self {
            order: Ranked::new(),
            inserted: Sequence::default(),
        }
    }

    /// Current frequency of a tracked key.
    #[must_use]
    pub fn frequency(&self, key: &K) -> Option<u64> {
        self.order.rank(key).map(|(frequency, _)| frequency)
    }
}

impl<K> Default for LfuPolicy<K>
where
    K: Clone + Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> EvictionPolicy<K> for LfuPolicy<K>
where
    K: Clone + Eq + Hash + Debug + Send,
{
    fn kind(&self) -> PolicyKind {
        PolicyKind::Lfu
    }

    fn record_insert(&mut self, key: &K, _expires_at: Option<Instant>) {
        self.order.set(key, (1, self.inserted.next()));
    }

    fn touch(&mut self, key: &K) {
        if let Some((frequency, inserted)) = self.order.rank(key) {
            self.order.set(key, (frequency.saturating_add(1), inserted));
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
