// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Builder for [`TieredCache`].

use std::marker::PhantomData;

use strata_tier::{CacheTier, PolicyKind};
use tick::Clock;

use crate::{Error, Result, TelemetryConfig, TierSpec, TieredCache};

/// Builder for a [`TieredCache`].
///
/// Created by [`TieredCache::builder`]. Tiers are added fastest first.
///
/// # Examples
///
/// ```
/// use strata::{PolicyKind, TelemetryConfig, TieredCache};
/// use tick::Clock;
///
/// let cache = TieredCache::builder::<String>(Clock::new_frozen())
///     .name("sessions")
///     .tier("hot", 100, PolicyKind::Lru)
///     .tier("cold", 10_000, PolicyKind::ttl(std::time::Duration::from_secs(600)))
///     .telemetry(TelemetryConfig::new())
///     .build()?;
///
/// assert_eq!(cache.tiers().len(), 2);
/// # Ok::<(), strata::Error>(())
/// ```
#[derive(Debug)]
pub struct TieredCacheBuilder<V> {
    clock: Clock,
    name: String,
    tiers: Vec<TierSpec>,
    telemetry: TelemetryConfig,
    _value: PhantomData<fn() -> V>,
}

impl<V> TieredCacheBuilder<V> {
    pub(crate) fn new(clock: Clock) -> Self {
        Self {
            clock,
            name: "strata".to_string(),
            tiers: Vec::new(),
            telemetry: TelemetryConfig::default(),
            _value: PhantomData,
        }
    }

    /// Sets the cache name used in logs and metrics.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Appends a tier slower than every tier added so far.
    #[must_use]
    pub fn tier(mut self, name: impl Into<String>, capacity: usize, policy: PolicyKind) -> Self {
        self.tiers.push(TierSpec::new(name, capacity, policy));
        self
    }

    /// Appends several tiers, fastest first.
    #[must_use]
    pub fn tiers(mut self, tiers: impl IntoIterator<Item = TierSpec>) -> Self {
        self.tiers.extend(tiers);
        self
    }

    /// Sets the telemetry configuration.
    #[must_use]
    pub fn telemetry(mut self, telemetry: TelemetryConfig) -> Self {
        self.telemetry = telemetry;
        self
    }
}

impl<V> TieredCacheBuilder<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Builds the cache.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if no tier was added and [`Error::Capacity`] if a tier has zero
    /// capacity.
    pub fn build(self) -> Result<TieredCache<V>> {
        if self.tiers.is_empty() {
            return Err(Error::Config("a tiered cache needs at least one tier".to_string()));
        }

        let tiers = self
            .tiers
            .into_iter()
            .map(|spec| CacheTier::new(spec.name, spec.capacity, spec.policy, self.clock.clone()))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(TieredCache::from_parts(tiers, self.telemetry.build(&self.name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_without_tiers_fails() {
        let result = TieredCache::builder::<u8>(Clock::new_frozen()).build();

        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn tiers_keep_insertion_order() {
        let cache = TieredCache::builder::<u8>(Clock::new_frozen())
            .tier("a", 1, PolicyKind::Fifo)
            .tiers([TierSpec::new("b", 2, PolicyKind::Lfu), TierSpec::new("c", 3, PolicyKind::Lru)])
            .build()
            .unwrap();

        let names: Vec<_> = cache.tiers().iter().map(CacheTier::name).collect();
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[test]
    fn name_reaches_telemetry() {
        let cache = TieredCache::builder::<u8>(Clock::new_frozen())
            .name("profiles")
            .tier("a", 1, PolicyKind::Lru)
            .build()
            .unwrap();

        assert_eq!(cache.telemetry().name(), "profiles");
    }
}
