// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::{
    collections::{HashMap, HashSet},
    fmt::{self, Debug},
    hash::Hash,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use tick::Clock;

use crate::{
    CacheEntry, Error, Result,
    policy::{EvictionPolicy, Occupancy, PolicyKind},
};

/// Result of [`CacheTier::get`].
#[derive(Debug, Clone)]
pub enum Lookup<K, V> {
    /// A live entry. Its access metadata already reflects this read.
    Hit(CacheEntry<K, V>),
    /// The entry had expired. It was removed from the tier by this call and is handed back once
    /// so the caller may serve it as a stale fallback.
    Expired(CacheEntry<K, V>),
    /// No entry for the key.
    Miss,
}

impl<K, V> Lookup<K, V> {
    /// Returns the live entry, if any.
    #[must_use]
    pub fn hit(self) -> Option<CacheEntry<K, V>> {
        match self {
            Self::Hit(entry) => Some(entry),
            Self::Expired(_) | Self::Miss => None,
        }
    }

    /// Returns `true` for a live entry.
    #[must_use]
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }
}

/// Per-write options for [`CacheTier::set`].
#[derive(Debug, Clone)]
pub struct SetOptions<K> {
    /// Time-to-live of the entry. Falls back to the policy default, if it has one.
    pub ttl: Option<Duration>,
    /// Tags used for group invalidation.
    pub tags: HashSet<String>,
    /// Keys whose removal also removes this entry.
    pub depends_on: HashSet<K>,
}

impl<K> Default for SetOptions<K> {
    fn default() -> Self {
        Self {
            ttl: None,
            tags: HashSet::new(),
            depends_on: HashSet::new(),
        }
    }
}

impl<K: Eq + Hash> SetOptions<K> {
    /// Sets the time-to-live.
    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Adds a tag.
    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Adds a dependency.
    #[must_use]
    pub fn depends_on(mut self, key: K) -> Self {
        self.depends_on.insert(key);
        self
    }
}

/// What a write did to the tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetOutcome<K> {
    /// Version stamped on the written entry.
    pub version: u64,
    /// `true` if the key was already present and overwritten in place.
    pub replaced: bool,
    /// Live entries evicted by the policy to make room.
    pub evicted: Vec<K>,
    /// Expired entries swept to make room.
    pub expired: Vec<K>,
}

impl<K> SetOutcome<K> {
    fn replaced(version: u64) -> Self {
        Self {
            version,
            replaced: true,
            evicted: Vec::new(),
            expired: Vec::new(),
        }
    }

    fn inserted(version: u64) -> Self {
        Self {
            replaced: false,
            ..Self::replaced(version)
        }
    }

    /// Every key that left the tier as a side effect of the write.
    pub fn removed(&self) -> impl Iterator<Item = &K> {
        self.evicted.iter().chain(&self.expired)
    }
}

struct TierState<K, V> {
    entries: HashMap<K, CacheEntry<K, V>>,
    policy: Box<dyn EvictionPolicy<K>>,
    versions: u64,
}

impl<K, V> TierState<K, V> {
    fn next_version(&mut self) -> u64 {
        self.versions += 1;
        self.versions
    }
}

/// A bounded key to entry store governed by one [`EvictionPolicy`].
///
/// All operations take the tier's single lock for their full duration and never block on
/// anything else, so a tier can be shared freely between threads and tasks.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use strata_tier::{CacheTier, Lookup, PolicyKind, SetOptions};
/// use tick::ClockControl;
///
/// let control = ClockControl::new();
/// let tier = CacheTier::new("sessions", 10, PolicyKind::Lru, control.to_clock())?;
///
/// tier.set("s1".to_string(), "alice", SetOptions::default().ttl(Duration::from_millis(100)));
/// assert!(tier.get(&"s1".to_string()).is_hit());
///
/// control.advance(Duration::from_millis(150));
/// assert!(matches!(tier.get(&"s1".to_string()), Lookup::Expired(_)));
/// assert!(tier.is_empty());
/// # Ok::<(), strata_tier::Error>(())
/// ```
pub struct CacheTier<K, V> {
    name: String,
    capacity: usize,
    clock: Clock,
    state: Mutex<TierState<K, V>>,
}

impl<K, V> Debug for CacheTier<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CacheTier")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("len", &state.entries.len())
            .field("policy", &state.policy.kind())
            .finish_non_exhaustive()
    }
}

impl<K, V> CacheTier<K, V>
where
    K: Clone + Eq + Hash + Debug + Send + 'static,
    V: Clone,
{
    /// Creates a tier using one of the built-in policies.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ZeroCapacity`] if `capacity` is zero.
    pub fn new(name: impl Into<String>, capacity: usize, policy: PolicyKind, clock: Clock) -> Result<Self> {
        Self::with_policy(name, capacity, policy.build(), clock)
    }

    /// Creates a tier governed by the given policy instance.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ZeroCapacity`] if `capacity` is zero.
    pub fn with_policy(name: impl Into<String>, capacity: usize, policy: Box<dyn EvictionPolicy<K>>, clock: Clock) -> Result<Self> {
        let name = name.into();
        if capacity == 0 {
            return Err(Error::ZeroCapacity { tier: name });
        }

        Ok(Self {
            name,
            capacity,
            clock,
            state: Mutex::new(TierState {
                entries: HashMap::with_capacity(capacity.min(1024)),
                policy,
                versions: 0,
            }),
        })
    }

    /// Name of the tier, used in logs and statistics.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Maximum number of entries.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The policy governing this tier.
    #[must_use]
    pub fn policy_kind(&self) -> PolicyKind {
        self.state.lock().policy.kind()
    }

    /// Number of entries currently held, expired ones included until they are noticed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Returns `true` if the tier holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Returns `true` if the tier holds an entry for `key`, live or expired.
    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.state.lock().entries.contains_key(key)
    }

    /// Reads an entry, recording the access with the policy.
    ///
    /// An expired entry is removed and returned as [`Lookup::Expired`].
    pub fn get(&self, key: &K) -> Lookup<K, V> {
        let now = self.clock.instant();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let Some(entry) = state.entries.get_mut(key) else {
            return Lookup::Miss;
        };

        if entry.is_expired(now) {
            state.policy.forget(key);
            return state.entries.remove(key).map_or(Lookup::Miss, Lookup::Expired);
        }

        entry.record_access(now);
        let hit = entry.clone();
        state.policy.touch(key);
        Lookup::Hit(hit)
    }

    /// Reads a live entry without recording an access or removing expired entries.
    #[must_use]
    pub fn peek(&self, key: &K) -> Option<CacheEntry<K, V>> {
        let now = self.clock.instant();
        self.state.lock().entries.get(key).filter(|entry| !entry.is_expired(now)).cloned()
    }

    /// Writes a value.
    ///
    /// An existing key is overwritten in place and counts as an access. A new key arriving at a
    /// full tier makes the policy pick what leaves first.
    pub fn set(&self, key: K, value: V, options: SetOptions<K>) -> SetOutcome<K> {
        let now = self.clock.instant();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let expires_at = options.ttl.or_else(|| state.policy.default_ttl()).map(|ttl| now + ttl);
        let version = state.next_version();

        if let Some(entry) = state.entries.get_mut(&key) {
            entry.overwrite(value, now, expires_at, options.tags, options.depends_on);
            entry.set_version(version);
            state.policy.record_update(&key, expires_at);
            return SetOutcome::replaced(version);
        }

        let mut entry = CacheEntry::new(value, now).with_tags(options.tags).with_dependencies(options.depends_on);
        entry.set_expiry(expires_at);
        entry.set_version(version);
        self.admit(state, key, entry, now)
    }

    /// Writes a prebuilt entry unless the tier already holds a live one for `key`.
    ///
    /// Used to copy entries between tiers without clobbering a write that got there first. The
    /// entry keeps its timestamps and access count, gets a fresh version from this tier, and gets
    /// the policy default time-to-live if it carries no expiry. Returns `None` when a live entry
    /// was already present; an expired one is replaced.
    pub fn insert_absent(&self, key: K, mut entry: CacheEntry<K, V>) -> Option<SetOutcome<K>> {
        let now = self.clock.instant();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if state.entries.get(&key).is_some_and(|existing| !existing.is_expired(now)) {
            return None;
        }

        if entry.expires_at().is_none()
            && let Some(ttl) = state.policy.default_ttl()
        {
            entry.set_expiry(Some(now + ttl));
        }

        let version = state.next_version();
        entry.set_version(version);
        let expires_at = entry.expires_at();

        if let Some(slot) = state.entries.get_mut(&key) {
            *slot = entry;
            state.policy.record_update(&key, expires_at);
            return Some(SetOutcome::replaced(version));
        }

        Some(self.admit(state, key, entry, now))
    }

    /// Version of the live entry for `key`, if any.
    #[must_use]
    pub fn version_of(&self, key: &K) -> Option<u64> {
        let now = self.clock.instant();
        self.state
            .lock()
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(CacheEntry::version)
    }

    /// Removes an entry. Returns `true` if one was present.
    pub fn delete(&self, key: &K) -> bool {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.policy.forget(key);
        state.entries.remove(key).is_some()
    }

    /// Removes an entry only if it still carries `version`.
    ///
    /// Lets a writer undo its own copy without clobbering a newer write that landed since.
    pub fn remove_if_version(&self, key: &K, version: u64) -> bool {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if state.entries.get(key).is_some_and(|entry| entry.version() == version) {
            state.entries.remove(key);
            state.policy.forget(key);
            true
        } else {
            false
        }
    }

    /// Removes every entry matching `predicate` and returns their keys.
    pub fn remove_where(&self, mut predicate: impl FnMut(&K, &CacheEntry<K, V>) -> bool) -> Vec<K> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let doomed: Vec<K> = state
            .entries
            .iter()
            .filter(|(key, entry)| predicate(key, entry))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &doomed {
            state.entries.remove(key);
            state.policy.forget(key);
        }

        doomed
    }

    /// Removes every expired entry and returns their keys.
    pub fn purge_expired(&self) -> Vec<K> {
        let now = self.clock.instant();
        self.remove_where(|_, entry| entry.is_expired(now))
    }

    /// Removes every entry. Returns how many were held.
    pub fn clear(&self) -> usize {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.policy.clear();
        let removed = state.entries.len();
        state.entries.clear();
        removed
    }

    fn admit(&self, state: &mut TierState<K, V>, key: K, entry: CacheEntry<K, V>, now: Instant) -> SetOutcome<K> {
        let mut outcome = SetOutcome::inserted(entry.version());
        let occupancy = Occupancy {
            len: state.entries.len(),
            capacity: self.capacity,
        };

        if occupancy.is_full() {
            let eviction = state.policy.admit(&key, occupancy, now);

            for expired in eviction.expired {
                if state.entries.remove(&expired).is_some() {
                    tracing::debug!(cache.tier = %self.name, cache.key = ?expired, "cache.expired");
                    outcome.expired.push(expired);
                }
            }

            if let Some(victim) = eviction.victim
                && state.entries.remove(&victim).is_some()
            {
                tracing::debug!(cache.tier = %self.name, cache.key = ?victim, "cache.evicted");
                outcome.evicted.push(victim);
            }

            // A policy that lost track of its keys must not break the bound.
            while state.entries.len() >= self.capacity {
                let Some(stray) = state.entries.keys().next().cloned() else {
                    break;
                };
                tracing::warn!(cache.tier = %self.name, cache.key = ?stray, "policy returned no victim for a full tier");
                state.entries.remove(&stray);
                state.policy.forget(&stray);
                outcome.evicted.push(stray);
            }
        }

        let expires_at = entry.expires_at();
        state.entries.insert(key.clone(), entry);
        state.policy.record_insert(&key, expires_at);
        outcome
    }
}
