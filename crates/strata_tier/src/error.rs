// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Error types for tier construction.

use thiserror::Error;

/// A specialized `Result` type for tier operations that return a tier [`Error`][enum@Error].
pub type Result<T> = std::result::Result<T, Error>;

/// An error raised while configuring a cache tier.
///
/// Tier operations themselves never fail: eviction always succeeds and lookups report misses
/// through [`Lookup`][crate::Lookup]. Only invalid configuration is reported as an error, and it is
/// never worth retrying.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The tier was configured with room for zero entries.
    #[error("cache tier `{tier}` must have a capacity of at least one entry")]
    ZeroCapacity {
        /// Name of the misconfigured tier.
        tier: String,
    },
}
