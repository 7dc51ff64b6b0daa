// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

use thiserror::Error;

/// Boxed error returned by backing stores and transports.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A specialized `Result` type for cache operations that return a cache [`Error`][enum@Error].
pub type Result<T> = std::result::Result<T, Error>;

/// An error originating in the cache engine.
///
/// Tier-internal conditions such as lock contention or eviction are never reported. Callers only
/// see configuration errors, backing store failures, write-behind failures and transport
/// failures. Future versions may add additional enum variants.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A tier was configured with an invalid capacity. Fatal at construction, never retried.
    #[error(transparent)]
    Capacity(#[from] strata_tier::Error),

    /// The cache was configured inconsistently, e.g. with no tiers or a placement that names a
    /// tier that does not exist.
    #[error("invalid cache configuration: {0}")]
    Config(String),

    /// The backing store failed to load or write a key.
    #[error("backing store call for `{key}` failed")]
    Loader {
        /// Key of the failed call.
        key: String,
        /// Error reported by the store.
        #[source]
        source: BoxError,
    },

    /// The backing store did not answer in time.
    #[error("backing store call for `{key}` timed out after {after:?}")]
    Timeout {
        /// Key of the failed call.
        key: String,
        /// Configured timeout.
        after: Duration,
    },

    /// The circuit breaker is open and rejected the call without reaching the store.
    #[error("backing store circuit is open, call for `{key}` rejected")]
    CircuitOpen {
        /// Key of the rejected call.
        key: String,
    },

    /// An invalidation message could not be encoded or decoded.
    #[error("invalidation message serialization failed")]
    Serialization(#[source] BoxError),

    /// A write-behind store write kept failing after every retry. The cached value stays
    /// authoritative locally; the store is stale for this key until a later write succeeds.
    #[error("write-behind flush of `{key}` failed after {attempts} attempts")]
    WriteBehindFlush {
        /// Key of the lost write.
        key: String,
        /// How many store writes were attempted.
        attempts: u32,
        /// Error of the last attempt.
        #[source]
        source: Box<Error>,
    },

    /// The write-behind queue stayed full for every enqueue attempt.
    #[error("write-behind queue is full, write of `{key}` rejected")]
    QueueFull {
        /// Key of the rejected write.
        key: String,
    },

    /// A background task this operation depends on has shut down.
    #[error("background task has shut down")]
    Closed,

    /// The pub/sub transport failed to publish or subscribe.
    #[error("invalidation transport failed")]
    Transport(#[source] BoxError),
}

impl Error {
    /// Returns `true` for failures of the backing store: loader errors, timeouts and calls
    /// rejected by an open circuit. These are the failures that allow a stale fallback.
    #[must_use]
    pub fn is_store_failure(&self) -> bool {
        matches!(self, Self::Loader { .. } | Self::Timeout { .. } | Self::CircuitOpen { .. })
    }

    pub(crate) fn serialization(cause: impl Into<BoxError>) -> Self {
        Self::Serialization(cause.into())
    }
}
