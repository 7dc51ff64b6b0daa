// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Tier placement for writes.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Where a write lands in the tier list.
///
/// Tiers are ordered fastest first. `Hot` is the fastest tier, `Cold` the slowest, and `Warm` the
/// second tier (or the slowest when there is only one).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum Placement {
    /// The default tier, which is the slowest tier.
    #[default]
    Default,
    /// The fastest tier.
    Hot,
    /// The second tier.
    Warm,
    /// The slowest tier.
    Cold,
    /// An explicit tier index.
    Tier(usize),
}

impl Placement {
    /// Resolves the placement against a tier list of `tiers` entries.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the list is empty or an explicit index is out of range.
    pub fn resolve(self, tiers: usize) -> Result<usize> {
        let Some(last) = tiers.checked_sub(1) else {
            return Err(Error::Config("the cache has no tiers".to_string()));
        };

        match self {
            Self::Hot => Ok(0),
            Self::Warm => Ok(last.min(1)),
            Self::Default | Self::Cold => Ok(last),
            Self::Tier(index) if index <= last => Ok(index),
            Self::Tier(index) => Err(Error::Config(format!("tier index {index} is out of range for {tiers} tiers"))),
        }
    }
}

/// Coarse three-level rating used by placement hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    /// Low.
    #[default]
    Low,
    /// Medium.
    Medium,
    /// High.
    High,
}

/// Coarse size class of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeClass {
    /// Small.
    Small,
    /// Medium.
    #[default]
    Medium,
    /// Large.
    Large,
}

/// Caller-supplied metadata for [`TieredCache::smart_placement`][crate::TieredCache::smart_placement].
///
/// # Examples
///
/// ```
/// use strata::{Level, Placement, PlacementHints, SizeClass};
///
/// let hints = PlacementHints {
///     frequency: Level::High,
///     size: SizeClass::Small,
///     ..PlacementHints::default()
/// };
/// assert_eq!(hints.placement(), Placement::Hot);
///
/// assert_eq!(PlacementHints::default().placement(), Placement::Cold);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementHints {
    /// Business priority of the value.
    pub priority: Level,
    /// Expected read frequency.
    pub frequency: Level,
    /// Size of the value.
    pub size: SizeClass,
}

impl PlacementHints {
    /// Picks a placement.
    ///
    /// High priority, or high frequency with a small size, goes hot. Medium priority, or high
    /// priority with a medium size, goes warm. Everything else goes cold. Rules apply in that
    /// order, so high priority with a medium size is already hot.
    #[must_use]
    pub fn placement(self) -> Placement {
        let Self { priority, frequency, size } = self;

        if priority == Level::High || (frequency == Level::High && size == SizeClass::Small) {
            Placement::Hot
        } else if priority == Level::Medium || (priority == Level::High && size == SizeClass::Medium) {
            Placement::Warm
        } else {
            Placement::Cold
        }
    }
}
