// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! A multi-tier cache with pluggable eviction, store coordination and cross-node invalidation.
//!
//! The engine is layered:
//!
//! - [`TieredCache`] orders several [`CacheTier`]s from fastest to slowest. Reads search the
//!   tiers in order and promote hits into the faster tiers. Writes land in a single tier chosen
//!   by a [`Placement`]. Entries carry tags and dependencies that drive bulk invalidation.
//! - [`Coordinator`] keeps a tiered cache consistent with a backing [`Store`] in one of three
//!   [`ConsistencyMode`]s, reads through on a miss and falls back to an expired copy when the
//!   store fails.
//! - [`ResilienceGuard`] runs every store call through a `seatbelt` timeout and circuit breaker.
//! - [`InvalidationBus`] publishes local mutations over a [`Transport`] and applies the
//!   mutations of peer nodes, ignoring its own messages and repeats.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//!
//! use strata::{Placement, PolicyKind, TieredCache, WriteOptions};
//! use tick::Clock;
//!
//! let cache = TieredCache::builder(Clock::new_frozen())
//!     .tier("hot", 2, PolicyKind::Lru)
//!     .tier("cold", 10, PolicyKind::Lfu)
//!     .build()?;
//!
//! cache.set(
//!     "report:7",
//!     "quarterly".to_string(),
//!     WriteOptions::default()
//!         .placement(Placement::Cold)
//!         .ttl(Duration::from_secs(60))
//!         .tag("reports"),
//! )?;
//!
//! // The hit in the cold tier is copied into the hot tier.
//! assert_eq!(cache.get("report:7").as_deref(), Some("quarterly"));
//! assert!(cache.tiers()[0].contains(&"report:7".to_string()));
//!
//! assert_eq!(cache.invalidate_tag("reports"), 1);
//! assert!(!cache.contains("report:7"));
//! # Ok::<(), strata::Error>(())
//! ```
//!
//! # Configuration
//!
//! [`CacheConfig`] describes a whole deployment and deserializes with `serde`, so it can be
//! loaded from any format the application already uses.
//!
//! # Telemetry
//!
//! Operations are reported through `tracing` events and OpenTelemetry metrics, both off by
//! default. Enable the `logs` and `metrics` features to compile them in, then turn them on per
//! cache with [`TelemetryConfig`].

mod builder;
mod config;
mod coordinator;
mod error;
mod invalidation;
mod placement;
mod resilience;
mod store;
mod telemetry;
mod tiered;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

#[doc(inline)]
pub use builder::TieredCacheBuilder;
#[doc(inline)]
pub use config::{
    BackoffOptions, BreakerOptions, BusOptions, CacheConfig, ConsistencyMode, CoordinatorOptions, TierSpec, WriteBehindOptions,
};
#[doc(inline)]
pub use coordinator::{Coordinator, CoordinatorBuilder, Read, ReadSource};
#[doc(inline)]
pub use error::{BoxError, Error, Result};
#[doc(inline)]
pub use invalidation::{
    Action, BusTasks, Delivery, InvalidationBus, InvalidationBusBuilder, InvalidationMessage, LocalTransport, Outbox, Transport,
};
#[doc(inline)]
pub use placement::{Level, Placement, PlacementHints, SizeClass};
#[doc(inline)]
pub use resilience::{CircuitState, ResilienceGuard};
#[doc(inline)]
pub use store::Store;
#[doc(inline)]
pub use strata_tier::{CacheEntry, CacheTier, PolicyKind};
#[doc(inline)]
pub use telemetry::TelemetryConfig;
#[doc(inline)]
pub use tiered::{Stats, TierStats, TieredCache, TieredLookup, WriteOptions};
