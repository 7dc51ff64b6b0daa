// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::{
    collections::HashSet,
    hash::Hash,
    ops::Deref,
    time::{Duration, Instant},
};

/// A cached value with its access and expiry metadata.
///
/// Entries are owned by the [`CacheTier`][crate::CacheTier] that holds them. Reads hand out
/// clones, so promoting an entry to a faster tier copies it rather than moving it.
///
/// # Examples
///
/// ```
/// use std::time::{Duration, Instant};
///
/// use strata_tier::CacheEntry;
///
/// let now = Instant::now();
/// let entry = CacheEntry::<String, _>::new(42, now).with_expiry(now + Duration::from_secs(1));
///
/// assert_eq!(*entry.value(), 42);
/// assert!(!entry.is_expired(now));
/// assert!(entry.is_expired(now + Duration::from_secs(1)));
/// ```
#[derive(Clone, Debug)]
pub struct CacheEntry<K, V> {
    value: V,
    created_at: Instant,
    last_accessed: Instant,
    access_frequency: u64,
    expires_at: Option<Instant>,
    tags: HashSet<String>,
    depends_on: HashSet<K>,
    version: u64,
}

impl<K, V> CacheEntry<K, V> {
    /// Creates an entry first seen at `now`, with an access frequency of one and no expiry.
    pub fn new(value: V, now: Instant) -> Self {
        Self {
            value,
            created_at: now,
            last_accessed: now,
            access_frequency: 1,
            expires_at: None,
            tags: HashSet::new(),
            depends_on: HashSet::new(),
            version: 0,
        }
    }

    /// Sets the absolute expiry instant.
    #[must_use]
    pub fn with_expiry(mut self, expires_at: Instant) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Sets the expiry relative to the creation time.
    #[must_use]
    pub fn with_ttl(self, ttl: Duration) -> Self {
        let expires_at = self.created_at + ttl;
        self.with_expiry(expires_at)
    }

    /// Replaces the tag set.
    #[must_use]
    pub fn with_tags(mut self, tags: impl IntoIterator<Item = String>) -> Self {
        self.tags = tags.into_iter().collect();
        self
    }

    /// Returns a reference to the cached value.
    #[must_use]
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Consumes the entry and returns the inner value.
    #[must_use]
    pub fn into_value(self) -> V {
        self.value
    }

    /// When the entry was first written.
    #[must_use]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// When the entry was last read or written.
    #[must_use]
    pub fn last_accessed(&self) -> Instant {
        self.last_accessed
    }

    /// How many times the entry was written or read while held by its tier.
    #[must_use]
    pub fn access_frequency(&self) -> u64 {
        self.access_frequency
    }

    /// The absolute expiry instant, if the entry expires.
    #[must_use]
    pub fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }

    /// Returns `true` once `now` has reached the expiry instant.
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    /// Tags used for group invalidation.
    #[must_use]
    pub fn tags(&self) -> &HashSet<String> {
        &self.tags
    }

    /// Keys this entry depends on. Removing any of them from the cache removes this entry too.
    #[must_use]
    pub fn depends_on(&self) -> &HashSet<K> {
        &self.depends_on
    }

    /// Version stamped by the tier on the last write. Versions only ever grow within one tier.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    pub(crate) fn record_access(&mut self, now: Instant) {
        self.last_accessed = now;
        self.access_frequency = self.access_frequency.saturating_add(1);
    }

    pub(crate) fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    pub(crate) fn set_expiry(&mut self, expires_at: Option<Instant>) {
        self.expires_at = expires_at;
    }
}

impl<K: Eq + Hash, V> CacheEntry<K, V> {
    /// Replaces the dependency set.
    #[must_use]
    pub fn with_dependencies(mut self, depends_on: impl IntoIterator<Item = K>) -> Self {
        self.depends_on = depends_on.into_iter().collect();
        self
    }

    /// Returns `true` if the entry depends on `key`.
    #[must_use]
    pub fn depends_on_key(&self, key: &K) -> bool {
        self.depends_on.contains(key)
    }

    /// Returns `true` if the entry carries `tag`.
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Overwrites the value and metadata of a live entry, keeping its creation time.
    pub(crate) fn overwrite(&mut self, value: V, now: Instant, expires_at: Option<Instant>, tags: HashSet<String>, depends_on: HashSet<K>) {
        self.value = value;
        self.expires_at = expires_at;
        self.tags = tags;
        self.depends_on = depends_on;
        self.record_access(now);
    }
}

impl<K: Eq + Hash, V: PartialEq> PartialEq for CacheEntry<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
            && self.created_at == other.created_at
            && self.last_accessed == other.last_accessed
            && self.access_frequency == other.access_frequency
            && self.expires_at == other.expires_at
            && self.tags == other.tags
            && self.depends_on == other.depends_on
            && self.version == other.version
    }
}

impl<K: Eq + Hash, V: Eq> Eq for CacheEntry<K, V> {}

impl<K, V> Deref for CacheEntry<K, V> {
    type Target = V;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}
