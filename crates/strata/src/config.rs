// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Declarative configuration.
//!
//! Every option struct deserializes with `serde`, and missing fields take their defaults, so the
//! whole engine can be described in a configuration file:
//!
//! ```
//! use strata::{CacheConfig, ConsistencyMode, PolicyKind};
//!
//! let config: CacheConfig = serde_json::from_str(
//!     r#"{
//!         "name": "users",
//!         "tiers": [
//!             { "name": "hot", "capacity": 100, "policy": { "kind": "lru" } },
//!             { "name": "cold", "capacity": 10000, "policy": { "kind": "lfu" } }
//!         ],
//!         "coordinator": { "mode": "write_behind" }
//!     }"#,
//! )?;
//!
//! assert_eq!(config.tiers[1].policy, PolicyKind::Lfu);
//! assert_eq!(config.coordinator.mode, ConsistencyMode::WriteBehind);
//! assert!(!config.bus.replicate_values);
//! # Ok::<(), serde_json::Error>(())
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use strata_tier::PolicyKind;
use tick::Clock;

use crate::{Placement, Result, TelemetryConfig, TieredCache};

/// One tier of a [`TieredCache`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierSpec {
    /// Tier name, used in logs and metrics.
    pub name: String,
    /// Maximum number of entries. Must be positive.
    pub capacity: usize,
    /// Eviction policy.
    #[serde(default)]
    pub policy: PolicyKind,
}

impl TierSpec {
    /// Creates a tier description.
    #[must_use]
    pub fn new(name: impl Into<String>, capacity: usize, policy: PolicyKind) -> Self {
        Self {
            name: name.into(),
            capacity,
            policy,
        }
    }
}

/// How a [`Coordinator`][crate::Coordinator] keeps the cache and the backing store in step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ConsistencyMode {
    /// Write the store first, then the cache.
    #[default]
    WriteThrough,
    /// Write the cache at once and the store later, from a background queue.
    WriteBehind,
    /// Write the store and drop the key from the cache.
    WriteAround,
}

impl ConsistencyMode {
    /// Returns the mode name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WriteThrough => "write_through",
            Self::WriteBehind => "write_behind",
            Self::WriteAround => "write_around",
        }
    }
}

/// Circuit breaker settings.
///
/// The circuit opens when, within one `sampling_duration`, at least `min_throughput` calls were
/// made and the share of failures among them reached `failure_threshold`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerOptions {
    /// Failure rate, from `0.0` to `1.0`, that opens the circuit.
    pub failure_threshold: f32,
    /// Calls needed within the sampling window before the failure rate is considered.
    pub min_throughput: u32,
    /// Window over which failures are counted.
    pub sampling_duration: Duration,
    /// How long the circuit stays open before a trial call is let through.
    pub break_duration: Duration,
}

impl Default for BreakerOptions {
    fn default() -> Self {
        Self {
            failure_threshold: 0.5,
            min_throughput: 5,
            sampling_duration: Duration::from_secs(30),
            break_duration: Duration::from_secs(30),
        }
    }
}

/// Exponential backoff settings. Delays double from `base_delay` up to `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffOptions {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound of any delay.
    pub max_delay: Duration,
}

impl Default for BackoffOptions {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
        }
    }
}

/// Write-behind queue settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteBehindOptions {
    /// Maximum number of queued store writes.
    pub queue_capacity: usize,
    /// How many times an enqueue on a full queue is tried before giving up.
    pub enqueue_attempts: u32,
    /// How many times the flusher tries each store write.
    pub flush_attempts: u32,
    /// Delays between enqueue and flush attempts.
    pub backoff: BackoffOptions,
}

impl Default for WriteBehindOptions {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            enqueue_attempts: 3,
            flush_attempts: 3,
            backoff: BackoffOptions::default(),
        }
    }
}

/// [`Coordinator`][crate::Coordinator] settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorOptions {
    /// Write strategy. Fixed for the lifetime of the coordinator.
    pub mode: ConsistencyMode,
    /// Per-call timeout of the backing store.
    pub store_timeout: Duration,
    /// Circuit breaker around the backing store.
    pub breaker: BreakerOptions,
    /// Write-behind queue, used in [`ConsistencyMode::WriteBehind`] only.
    pub write_behind: WriteBehindOptions,
    /// Time-to-live of values loaded from the store on a miss.
    pub read_ttl: Option<Duration>,
    /// Tier receiving values loaded from the store on a miss.
    pub read_placement: Placement,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            mode: ConsistencyMode::default(),
            store_timeout: Duration::from_secs(5),
            breaker: BreakerOptions::default(),
            write_behind: WriteBehindOptions::default(),
            read_ttl: None,
            read_placement: Placement::Default,
        }
    }
}

/// [`InvalidationBus`][crate::InvalidationBus] settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusOptions {
    /// Transport channel carrying invalidation messages.
    pub channel: String,
    /// Ship values with `set` messages so peers store them. When off, peers drop the key.
    pub replicate_values: bool,
    /// Maximum number of local mutations waiting to be published.
    pub outbox_capacity: usize,
    /// How many recent message fingerprints are remembered for duplicate suppression.
    pub dedup_window: usize,
}

impl Default for BusOptions {
    fn default() -> Self {
        Self {
            channel: "strata.invalidation".to_string(),
            replicate_values: false,
            outbox_capacity: 1024,
            dedup_window: 4096,
        }
    }
}

/// Configuration of a whole cache node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache name, used in logs and metrics.
    pub name: String,
    /// Tiers, fastest first.
    pub tiers: Vec<TierSpec>,
    /// Coordinator settings.
    pub coordinator: CoordinatorOptions,
    /// Invalidation bus settings.
    pub bus: BusOptions,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: "strata".to_string(),
            tiers: Vec::new(),
            coordinator: CoordinatorOptions::default(),
            bus: BusOptions::default(),
        }
    }
}

impl CacheConfig {
    /// Builds the configured tiered cache.
    ///
    /// # Errors
    ///
    /// Returns an error if there are no tiers or a tier has zero capacity.
    pub fn build_cache<V>(&self, clock: Clock, telemetry: TelemetryConfig) -> Result<TieredCache<V>>
    where
        V: Clone + Send + Sync + 'static,
    {
        TieredCache::builder(clock)
            .name(self.name.clone())
            .tiers(self.tiers.iter().cloned())
            .telemetry(telemetry)
            .build()
    }
}
