// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::{
    collections::{BTreeMap, HashMap},
    hash::Hash,
};

/// Keys ordered by a unique rank, lowest rank first.
///
/// Every built-in policy is a choice of rank: a touch counter for LRU, an insertion counter for
/// FIFO, `(frequency, insertion)` for LFU and `(deadline, insertion)` for TTL. Ranks must be
/// unique, which all of them guarantee by ending in a monotonically increasing counter.
#[derive(Debug)]
pub(crate) struct Ranked<K, R> {
    ranks: HashMap<K, R>,
    order: BTreeMap<R, K>,
}

impl<K, R> Ranked<K, R>
where
    K: Clone + Eq + Hash,
    R: Ord + Copy,
{
    pub fn new() -> Self {
        Self {
            ranks: HashMap::new(),
            order: BTreeMap::new(),
        }
    }

    pub fn rank(&self, key: &K) -> Option<R> {
        self.ranks.get(key).copied()
    }

    pub fn set(&mut self, key: &K, rank: R) {
        if let Some(previous) = self.ranks.insert(key.clone(), rank) {
            self.order.remove(&previous);
        }
        self.order.insert(rank, key.clone());
    }

    pub fn remove(&mut self, key: &K) -> Option<R> {
        let rank = self.ranks.remove(key)?;
        self.order.remove(&rank);
        Some(rank)
    }

    pub fn first(&self) -> Option<(R, &K)> {
        self.order.first_key_value().map(|(rank, key)| (*rank, key))
    }

    pub fn pop_first(&mut self) -> Option<K> {
        let (_, key) = self.order.pop_first()?;
        self.ranks.remove(&key);
        Some(key)
    }

    pub fn clear(&mut self) {
        self.ranks.clear();
        self.order.clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.ranks.len()
    }
}

/// Hands out strictly increasing sequence numbers.
#[derive(Debug, Default)]
pub(crate) struct Sequence(u64);

impl Sequence {
    pub fn next(&mut self) -> u64 {
        let current = self.0;
        self.0 += 1;
        current
    }
}
