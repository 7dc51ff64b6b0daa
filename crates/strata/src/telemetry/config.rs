// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Telemetry configuration for cache operations.

#[cfg(any(feature = "metrics", test))]
use opentelemetry::metrics::{Meter, MeterProvider};

use crate::telemetry::CacheTelemetry;
#[cfg(any(feature = "logs", feature = "metrics", test))]
use crate::telemetry::recorder::CacheTelemetryInner;

/// Configuration for cache telemetry.
///
/// Use the builder methods to enable logs and/or metrics, then pass this to a cache builder via
/// `.telemetry()`. Logs need the `logs` feature and metrics the `metrics` feature; without them
/// the configuration only names the cache.
///
/// # Examples
///
/// ```
/// # #[cfg(all(feature = "logs", feature = "metrics"))]
/// # {
/// use opentelemetry::metrics::MeterProvider;
/// use strata::TelemetryConfig;
///
/// // Enable logging only
/// let logs_only = TelemetryConfig::new().with_logs();
///
/// // Enable both
/// fn full(provider: &dyn MeterProvider) -> TelemetryConfig {
///     TelemetryConfig::new().with_logs().with_metrics(provider)
/// }
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct TelemetryConfig {
    #[cfg(any(feature = "logs", test))]
    logs_enabled: bool,
    #[cfg(any(feature = "metrics", test))]
    meter: Option<Meter>,
}

impl TelemetryConfig {
    /// Creates a new telemetry configuration with everything disabled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables structured logging for cache events.
    ///
    /// When enabled, cache events are emitted as `tracing` events named `cache.event`.
    #[cfg(any(feature = "logs", test))]
    #[must_use]
    pub fn with_logs(self) -> Self {
        Self {
            logs_enabled: true,
            ..self
        }
    }

    /// Enables metrics collection using the provided meter provider.
    #[cfg(any(feature = "metrics", test))]
    #[must_use]
    pub fn with_metrics(mut self, provider: &dyn MeterProvider) -> Self {
        use crate::telemetry::metrics;
        self.meter = Some(metrics::create_meter(provider));
        self
    }

    /// Builds the telemetry recorder for the cache called `name`.
    #[must_use]
    pub(crate) fn build(&self, name: &str) -> CacheTelemetry {
        #[cfg(not(any(feature = "logs", feature = "metrics", test)))]
        {
            CacheTelemetry::silent(name)
        }

        #[cfg(any(feature = "logs", feature = "metrics", test))]
        {
            #[cfg(any(feature = "metrics", test))]
            let (event_counter, operation_duration, cache_size) = {
                use crate::telemetry::metrics::{create_cache_size_gauge, create_event_counter, create_operation_duration_histogram};
                (
                    self.meter.as_ref().map(create_event_counter),
                    self.meter.as_ref().map(create_operation_duration_histogram),
                    self.meter.as_ref().map(create_cache_size_gauge),
                )
            };

            CacheTelemetry::from_inner(CacheTelemetryInner {
                name: name.into(),
                #[cfg(any(feature = "logs", test))]
                logging_enabled: self.logs_enabled,
                #[cfg(any(feature = "metrics", test))]
                event_counter,
                #[cfg(any(feature = "metrics", test))]
                operation_duration,
                #[cfg(any(feature = "metrics", test))]
                cache_size,
            })
        }
    }
}
