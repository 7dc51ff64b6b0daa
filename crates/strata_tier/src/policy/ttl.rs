// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::{
    fmt::Debug,
    hash::Hash,
    time::{Duration, Instant},
};

use super::{
    EvictionPolicy, Eviction, Occupancy, PolicyKind,
    ranked::{Ranked, Sequence},
};

/// Absolute expiry. `At` sorts before `Never`, so entries without an expiry are evicted last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Deadline {
    At(Instant),
    Never,
}

impl From<Option<Instant>> for Deadline {
    fn from(expires_at: Option<Instant>) -> Self {
        expires_at.map_or(Self::Never, Self::At)
    }
}

/// Evicts by expiry.
///
/// Admission first sweeps every key whose expiry has passed. If the tier is still full, the key
/// with the earliest expiry is evicted, ties going to the earliest insert.
#[derive(Debug)]
pub struct TtlPolicy<K> {
    order: Ranked<K, (Deadline, u64)>,
    inserted: Sequence,
    default_ttl: Duration,
}

impl<K> TtlPolicy<K>
where
    K: Clone + Eq + Hash,
{
    /// Creates an empty TTL policy applying `default_ttl` to writes that carry no expiry.
    #[must_use]
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            order: Ranked::new(),
            inserted: Sequence::default(),
            default_ttl,
        }
    }
}

impl<K> EvictionPolicy<K> for TtlPolicy<K>
where
    K: Clone + Eq + Hash + Debug + Send,
{
    fn kind(&self) -> PolicyKind {
        PolicyKind::Ttl {
            default_ttl: self.default_ttl,
        }
    }

    fn default_ttl(&self) -> Option<Duration> {
        Some(self.default_ttl)
    }

    fn record_insert(&mut self, key: &K, expires_at: Option<Instant>) {
        self.order.set(key, (expires_at.into(), self.inserted.next()));
    }

    fn record_update(&mut self, key: &K, expires_at: Option<Instant>) {
        let inserted = match self.order.rank(key) {
            Some((_, inserted)) => inserted,
            None => self.inserted.next(),
        };
        self.order.set(key, (expires_at.into(), inserted));
    }

    fn touch(&mut self, _key: &K) {}

    fn admit(&mut self, _candidate: &K, occupancy: Occupancy, now: Instant) -> Eviction<K> {
        let mut eviction = Eviction::none();

        while let Some(((Deadline::At(at), _), _)) = self.order.first()
            && at <= now
        {
            if let Some(key) = self.order.pop_first() {
                eviction.expired.push(key);
            }
        }

        let remaining = occupancy.len.saturating_sub(eviction.expired.len());
        if remaining >= occupancy.capacity {
            eviction.victim = self.order.pop_first();
        }

        eviction
    }

    fn forget(&mut self, key: &K) {
        self.order.remove(key);
    }

    fn clear(&mut self) {
        self.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sweeps_expired_before_evicting_live() {
        let now = Instant::now();
        let mut ttl = TtlPolicy::new(Duration::from_secs(60));
        ttl.record_insert(&"old", Some(now - Duration::from_secs(1)));
        ttl.record_insert(&"live", Some(now + Duration::from_secs(10)));

        let eviction = ttl.admit(&"new", Occupancy { len: 2, capacity: 2 }, now);

        assert_eq!(eviction.expired, vec!["old"]);
        assert!(eviction.victim.is_none());
    }

    #[test]
    fn evicts_earliest_expiry_when_nothing_expired() {
        let now = Instant::now();
        let mut ttl = TtlPolicy::new(Duration::from_secs(60));
        ttl.record_insert(&"never", None);
        ttl.record_insert(&"late", Some(now + Duration::from_secs(20)));
        ttl.record_insert(&"soon", Some(now + Duration::from_secs(5)));

        let eviction = ttl.admit(&"new", Occupancy { len: 3, capacity: 3 }, now);

        assert!(eviction.expired.is_empty());
        assert_eq!(eviction.victim, Some("soon"));
    }

    #[test]
    fn equal_expiry_goes_to_earliest_insert() {
        let now = Instant::now();
        let at = Some(now + Duration::from_secs(5));
        let mut ttl = TtlPolicy::new(Duration::from_secs(60));
        ttl.record_insert(&"first", at);
        ttl.record_insert(&"second", at);

        let eviction = ttl.admit(&"new", Occupancy { len: 2, capacity: 2 }, now);

        assert_eq!(eviction.victim, Some("first"));
    }

    #[test]
    fn update_moves_deadline() {
        let now = Instant::now();
        let mut ttl = TtlPolicy::new(Duration::from_secs(60));
        ttl.record_insert(&"a", Some(now + Duration::from_secs(1)));
        ttl.record_insert(&"b", Some(now + Duration::from_secs(2)));
        ttl.record_update(&"a", Some(now + Duration::from_secs(3)));

        let eviction = ttl.admit(&"c", Occupancy { len: 2, capacity: 2 }, now);

        assert_eq!(eviction.victim, Some("b"));
    }

    #[test]
    fn reports_default_ttl() {
        let ttl = TtlPolicy::<String>::new(Duration::from_secs(7));
        assert_eq!(ttl.default_ttl(), Some(Duration::from_secs(7)));
        assert_eq!(ttl.kind(), PolicyKind::ttl(Duration::from_secs(7)));
    }
}
