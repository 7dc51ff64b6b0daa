// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Bounded cache tiers with pluggable eviction policies.
//!
//! This crate provides the leaf storage used by the `strata` cache engine:
//!
//! - [`CacheEntry`] holds a value together with its access and expiry metadata.
//! - [`EvictionPolicy`] decides which entry leaves a full tier. [`PolicyKind`] selects one of
//!   the built-in LRU, LFU, FIFO and TTL policies.
//! - [`CacheTier`] is a bounded, internally synchronized key to entry map governed by one policy.
//!
//! # Examples
//!
//! ```
//! use strata_tier::{CacheTier, Lookup, PolicyKind, SetOptions};
//! use tick::Clock;
//!
//! let tier = CacheTier::new("hot", 2, PolicyKind::Lfu, Clock::new_frozen())?;
//!
//! tier.set("a".to_string(), 1, SetOptions::default());
//! tier.set("b".to_string(), 2, SetOptions::default());
//!
//! // Reading `a` bumps its frequency, so `b` is the least frequently used entry.
//! assert!(matches!(tier.get(&"a".to_string()), Lookup::Hit(_)));
//!
//! let outcome = tier.set("c".to_string(), 3, SetOptions::default());
//! assert_eq!(outcome.evicted, vec!["b".to_string()]);
//! # Ok::<(), strata_tier::Error>(())
//! ```
//!
//! # Capacity
//!
//! A tier never holds more than its capacity once a mutating call returns. A capacity of zero is
//! rejected at construction with [`Error::ZeroCapacity`].

mod entry;
pub mod error;
pub mod policy;
mod tier;

#[doc(inline)]
pub use entry::CacheEntry;
#[doc(inline)]
pub use error::{Error, Result};
#[doc(inline)]
pub use policy::{EvictionPolicy, Eviction, Occupancy, PolicyKind};
#[doc(inline)]
pub use tier::{CacheTier, Lookup, SetOptions, SetOutcome};
