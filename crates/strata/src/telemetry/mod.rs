// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Cache telemetry integration with `tracing` and OpenTelemetry.
//!
//! Every cache component records events through one [`CacheTelemetry`] handle. Depending on the
//! [`TelemetryConfig`] used to build it, an event becomes a structured `tracing` event carrying
//! the key it concerns, an increment of the `cache.event.count` counter, or both. Telemetry is off
//! by default and compiled in only with the `logs` and `metrics` features; exporters and
//! subscribers are the application's concern.

#[cfg(any(feature = "logs", test))]
use opentelemetry::logs::Severity;

mod attributes;
mod config;
pub(crate) mod ext;
#[cfg(any(feature = "metrics", test))]
mod metrics;
mod recorder;
#[cfg(test)]
pub(crate) mod testing;

pub use config::TelemetryConfig;
pub(crate) use recorder::CacheTelemetry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CacheOperation {
    Get,
    Set,
    Delete,
    Clear,
    Invalidate,
    Load,
    Write,
    Flush,
    Publish,
    Receive,
}

impl CacheOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "cache.get",
            Self::Set => "cache.set",
            Self::Delete => "cache.delete",
            Self::Clear => "cache.clear",
            Self::Invalidate => "cache.invalidate",
            Self::Load => "cache.load",
            Self::Write => "cache.write",
            Self::Flush => "cache.flush",
            Self::Publish => "cache.publish",
            Self::Receive => "cache.receive",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CacheActivity {
    Hit,
    Miss,
    Expired,
    Promoted,
    Inserted,
    Evicted,
    Invalidated,
    Loaded,
    NotFound,
    StaleServed,
    Ok,
    Retried,
    Timeout,
    Rejected,
    Error,
    Applied,
    Echo,
    Duplicate,
    Malformed,
}

impl CacheActivity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "cache.hit",
            Self::Miss => "cache.miss",
            Self::Expired => "cache.expired",
            Self::Promoted => "cache.promoted",
            Self::Inserted => "cache.inserted",
            Self::Evicted => "cache.evicted",
            Self::Invalidated => "cache.invalidated",
            Self::Loaded => "cache.loaded",
            Self::NotFound => "cache.not_found",
            Self::StaleServed => "cache.stale_served",
            Self::Ok => "cache.ok",
            Self::Retried => "cache.retried",
            Self::Timeout => "cache.timeout",
            Self::Rejected => "cache.rejected",
            Self::Error => "cache.error",
            Self::Applied => "cache.applied",
            Self::Echo => "cache.echo",
            Self::Duplicate => "cache.duplicate",
            Self::Malformed => "cache.malformed",
        }
    }

    #[cfg(any(feature = "logs", test))]
    pub fn severity(self) -> Severity {
        match self {
            Self::Hit | Self::Miss | Self::Inserted | Self::Loaded | Self::NotFound | Self::Ok | Self::Echo => Severity::Debug,
            Self::Expired | Self::Promoted | Self::Evicted | Self::Invalidated | Self::Applied => Severity::Info,
            Self::StaleServed | Self::Retried | Self::Duplicate => Severity::Warn,
            Self::Timeout | Self::Rejected | Self::Error | Self::Malformed => Severity::Error,
        }
    }
}
