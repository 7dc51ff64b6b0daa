// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Multi-tier cache with promotion on read and placement on write.

use std::{
    collections::HashSet,
    fmt::{self, Debug},
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use strata_tier::{CacheEntry, CacheTier, Lookup, PolicyKind, SetOutcome};
use tick::Clock;

use crate::{
    Result,
    builder::TieredCacheBuilder,
    placement::{Placement, PlacementHints},
    telemetry::{CacheActivity, CacheOperation, CacheTelemetry},
};

/// Options for [`TieredCache::set`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use strata::{Placement, WriteOptions};
///
/// let options = WriteOptions::default()
///     .ttl(Duration::from_secs(30))
///     .placement(Placement::Hot)
///     .tag("user")
///     .depends_on("user:1");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteOptions {
    /// Time-to-live of the entry. Tiers with a TTL policy apply their default when unset.
    pub ttl: Option<Duration>,
    /// Target tier. Defaults to the slowest tier.
    pub placement: Placement,
    /// Tags used by [`TieredCache::invalidate_tag`].
    pub tags: HashSet<String>,
    /// Keys whose removal cascades to this entry.
    pub depends_on: HashSet<String>,
}

impl WriteOptions {
    /// Sets the time-to-live.
    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Sets the optional time-to-live.
    #[must_use]
    pub fn maybe_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    /// Sets the target tier.
    #[must_use]
    pub fn placement(mut self, placement: Placement) -> Self {
        self.placement = placement;
        self
    }

    /// Adds a tag.
    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Adds a dependency on another key.
    #[must_use]
    pub fn depends_on(mut self, key: impl Into<String>) -> Self {
        self.depends_on.insert(key.into());
        self
    }

    fn into_tier_options(self) -> strata_tier::SetOptions<String> {
        strata_tier::SetOptions {
            ttl: self.ttl,
            tags: self.tags,
            depends_on: self.depends_on,
        }
    }
}

/// Result of [`TieredCache::lookup`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TieredLookup<V> {
    /// A live value, found in tier `tier` before promotion.
    Hit {
        /// The cached value.
        value: V,
        /// Index of the tier the value was found in.
        tier: usize,
    },
    /// No live value, but an entry expired during this lookup. Its value may serve as a stale
    /// fallback.
    Expired {
        /// The expired value.
        stale: V,
    },
    /// No entry at all.
    Miss,
}

impl<V> TieredLookup<V> {
    /// Returns the live value, if any.
    #[must_use]
    pub fn value(self) -> Option<V> {
        match self {
            Self::Hit { value, .. } => Some(value),
            Self::Expired { .. } | Self::Miss => None,
        }
    }
}

/// Point-in-time statistics of a [`TieredCache`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stats {
    /// Lookups that found a live value.
    pub hits: u64,
    /// Lookups that found nothing live.
    pub misses: u64,
    /// `hits / (hits + misses)`, or zero before the first lookup.
    pub hit_rate: f64,
    /// Per-tier sizes, fastest first.
    pub tiers: Vec<TierStats>,
}

/// Size of one tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierStats {
    /// Tier name.
    pub name: String,
    /// Entries held.
    pub len: usize,
    /// Maximum entries.
    pub capacity: usize,
    /// Eviction policy.
    pub policy: PolicyKind,
}

/// An ordered list of cache tiers, fastest first.
///
/// Reads scan the tiers from fastest to slowest and copy a hit found in a slower tier into every
/// faster tier. Writes land in one tier and drop copies of the key held by any other tier, so no
/// tier keeps a value older than the latest write. Deletes and invalidations remove keys from every
/// tier and cascade to entries that depend on them.
///
/// Each tier has its own lock and no operation holds two tier locks at once. Reads visit tiers
/// fastest first. Writes and removals visit them slowest first, so a promotion that copies a value
/// into faster tiers and then finds its source unchanged knows any later change to the key will
/// still reach those copies. A promotion that finds its source changed removes its copies.
///
/// # Examples
///
/// ```
/// use strata::{PolicyKind, TieredCache, WriteOptions};
/// use tick::Clock;
///
/// let cache = TieredCache::builder(Clock::new_frozen())
///     .tier("hot", 2, PolicyKind::Lru)
///     .tier("cold", 10, PolicyKind::Lfu)
///     .build()?;
///
/// cache.set("a", 1, WriteOptions::default())?;
/// assert_eq!(cache.get("a"), Some(1));
///
/// // The read promoted the value into the hot tier.
/// assert!(cache.tiers()[0].contains(&"a".to_string()));
///
/// cache.delete("a");
/// assert_eq!(cache.get("a"), None);
/// # Ok::<(), strata::Error>(())
/// ```
pub struct TieredCache<V> {
    tiers: Vec<CacheTier<String, V>>,
    hits: AtomicU64,
    misses: AtomicU64,
    telemetry: CacheTelemetry,
}

impl<V> Debug for TieredCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TieredCache")
            .field("name", &self.telemetry.name())
            .field("tiers", &self.tiers)
            .finish_non_exhaustive()
    }
}

impl TieredCache<()> {
    /// Starts building a tiered cache.
    #[must_use]
    pub fn builder<V>(clock: Clock) -> TieredCacheBuilder<V> {
        TieredCacheBuilder::new(clock)
    }
}

impl<V> TieredCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn from_parts(tiers: Vec<CacheTier<String, V>>, telemetry: CacheTelemetry) -> Self {
        Self {
            tiers,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            telemetry,
        }
    }

    /// The tiers, fastest first.
    #[must_use]
    pub fn tiers(&self) -> &[CacheTier<String, V>] {
        &self.tiers
    }

    /// Returns `true` if any tier holds an entry for `key`.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        let key = key.to_owned();
        self.tiers.iter().any(|tier| tier.contains(&key))
    }

    pub(crate) fn telemetry(&self) -> &CacheTelemetry {
        &self.telemetry
    }

    /// Reads a live value, promoting it into every faster tier.
    pub fn get(&self, key: &str) -> Option<V> {
        self.lookup(key).value()
    }

    /// Reads a key, reporting where it was found or whether it just expired.
    pub fn lookup(&self, key: &str) -> TieredLookup<V> {
        let key = key.to_owned();
        let mut stale = None;

        for (index, tier) in self.tiers.iter().enumerate() {
            match tier.get(&key) {
                Lookup::Hit(entry) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    self.telemetry.record_key(CacheOperation::Get, CacheActivity::Hit, &key);
                    if index > 0 {
                        self.promote(&key, &entry, index);
                    }
                    return TieredLookup::Hit {
                        value: entry.into_value(),
                        tier: index,
                    };
                }
                Lookup::Expired(entry) => {
                    self.telemetry.record_key(CacheOperation::Get, CacheActivity::Expired, &key);
                    if stale.is_none() {
                        stale = Some(entry.into_value());
                    }
                }
                Lookup::Miss => {}
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        self.telemetry.record_key(CacheOperation::Get, CacheActivity::Miss, &key);

        match stale {
            Some(stale) => {
                if !self.contains(&key) {
                    self.cascade(vec![key]);
                }
                TieredLookup::Expired { stale }
            }
            None => TieredLookup::Miss,
        }
    }

    /// Writes a value into the tier chosen by `options.placement`.
    ///
    /// Copies of the key held by other tiers are removed. Returns the index of the tier written.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`][crate::Error::Config] if the placement names a missing tier.
    pub fn set(&self, key: &str, value: V, options: WriteOptions) -> Result<usize> {
        let target = options.placement.resolve(self.tiers.len())?;
        let key = key.to_owned();

        for tier in self.tiers[target + 1..].iter().rev() {
            tier.delete(&key);
        }

        let outcome = self.tiers[target].set(key.clone(), value, options.into_tier_options());

        for tier in self.tiers[..target].iter().rev() {
            tier.delete(&key);
        }

        self.telemetry.record_key(CacheOperation::Set, CacheActivity::Inserted, &key);
        self.after_write(target, &outcome);
        Ok(target)
    }

    /// Writes a value into the tier picked by [`PlacementHints::placement`]. Returns the index of
    /// the tier written.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`][crate::Error::Config] if the cache has no tiers.
    pub fn smart_placement(&self, key: &str, value: V, hints: PlacementHints) -> Result<usize> {
        self.set(key, value, WriteOptions::default().placement(hints.placement()))
    }

    /// Removes a key from every tier, then removes entries depending on it.
    ///
    /// Returns `true` if any tier held the key.
    pub fn delete(&self, key: &str) -> bool {
        let key = key.to_owned();

        let mut removed = false;
        for tier in self.tiers.iter().rev() {
            removed |= tier.delete(&key);
        }

        self.telemetry.record_key(CacheOperation::Delete, CacheActivity::Invalidated, &key);
        self.cascade(vec![key]);
        removed
    }

    /// Removes every key starting with `pattern`. A trailing `*` is accepted and ignored.
    ///
    /// Returns how many distinct keys were removed, dependents included.
    pub fn invalidate_pattern(&self, pattern: &str) -> usize {
        let prefix = pattern.strip_suffix('*').unwrap_or(pattern);
        self.remove_matching(|key, _| key.starts_with(prefix))
    }

    /// Removes every entry carrying `tag`.
    ///
    /// Returns how many distinct keys were removed, dependents included.
    pub fn invalidate_tag(&self, tag: &str) -> usize {
        self.remove_matching(|_, entry| entry.has_tag(tag))
    }

    /// Removes every entry from every tier. Returns how many entries were held.
    pub fn clear(&self) -> usize {
        let removed = self.tiers.iter().rev().map(CacheTier::clear).sum();
        self.telemetry.record(CacheOperation::Clear, CacheActivity::Invalidated);
        for index in 0..self.tiers.len() {
            self.record_size(index);
        }
        removed
    }

    /// Current hit and miss counters and tier sizes.
    #[must_use]
    pub fn stats(&self) -> Stats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        #[expect(clippy::cast_precision_loss, reason = "hit rate is an approximation")]
        let hit_rate = if total == 0 { 0.0 } else { hits as f64 / total as f64 };

        Stats {
            hits,
            misses,
            hit_rate,
            tiers: self
                .tiers
                .iter()
                .map(|tier| TierStats {
                    name: tier.name().to_string(),
                    len: tier.len(),
                    capacity: tier.capacity(),
                    policy: tier.policy_kind(),
                })
                .collect(),
        }
    }

    fn promote(&self, key: &String, entry: &CacheEntry<String, V>, found_at: usize) {
        let copies: Vec<(usize, SetOutcome<String>)> = (0..found_at)
            .rev()
            .filter_map(|index| self.tiers[index].insert_absent(key.clone(), entry.clone()).map(|outcome| (index, outcome)))
            .collect();

        // Changes reach the source tier before any faster one. An unchanged source means every
        // later change will also reach the copies.
        let settled = self.tiers[found_at].version_of(key) == Some(entry.version());

        for (index, outcome) in &copies {
            if !settled {
                self.tiers[*index].remove_if_version(key, outcome.version);
            }
            self.after_write(*index, outcome);
        }

        if settled && !copies.is_empty() {
            self.telemetry.record_key(CacheOperation::Get, CacheActivity::Promoted, key);
        }
    }

    fn remove_matching(&self, predicate: impl Fn(&String, &CacheEntry<String, V>) -> bool) -> usize {
        let mut removed = HashSet::new();
        for tier in self.tiers.iter().rev() {
            removed.extend(tier.remove_where(&predicate));
        }

        if !removed.is_empty() {
            self.telemetry.record(CacheOperation::Invalidate, CacheActivity::Invalidated);
        }

        let direct = removed.len();
        direct + self.cascade(removed.into_iter().collect())
    }

    /// Removes every entry that transitively depends on one of `roots`. Returns how many distinct
    /// dependents were removed.
    fn cascade(&self, roots: Vec<String>) -> usize {
        let mut seen: HashSet<String> = roots.iter().cloned().collect();
        let mut pending = roots;
        let mut removed = 0;

        while let Some(parent) = pending.pop() {
            for tier in self.tiers.iter().rev() {
                for child in tier.remove_where(|_, entry| entry.depends_on_key(&parent)) {
                    if seen.insert(child.clone()) {
                        removed += 1;
                        pending.push(child);
                    }
                }
            }
        }

        if removed > 0 {
            self.telemetry.record(CacheOperation::Invalidate, CacheActivity::Invalidated);
        }
        removed
    }

    fn after_write(&self, index: usize, outcome: &SetOutcome<String>) {
        for key in &outcome.evicted {
            self.telemetry.record_key(CacheOperation::Set, CacheActivity::Evicted, key);
        }
        for key in &outcome.expired {
            self.telemetry.record_key(CacheOperation::Set, CacheActivity::Expired, key);
        }

        // A key evicted from one tier may live on in another; only cascade once it is gone.
        let orphans: Vec<String> = outcome.removed().filter(|key| !self.contains(key)).cloned().collect();
        if !orphans.is_empty() {
            self.cascade(orphans);
        }

        self.record_size(index);
    }

    fn record_size(&self, index: usize) {
        if self.telemetry.tracks_size() {
            let tier = &self.tiers[index];
            self.telemetry.record_size(tier.name(), tier.len());
        }
    }
}
