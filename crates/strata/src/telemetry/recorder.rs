// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Cache telemetry recording.

use std::{sync::Arc, time::Duration};

#[cfg(any(feature = "metrics", test))]
use opentelemetry::{
    KeyValue,
    metrics::{Counter, Gauge, Histogram},
};
#[cfg(any(feature = "logs", test))]
use opentelemetry::logs::Severity;

#[cfg(any(feature = "metrics", test))]
use crate::telemetry::attributes;
use crate::telemetry::{CacheActivity, CacheOperation};

#[derive(Debug)]
pub(crate) struct CacheTelemetryInner {
    pub(crate) name: Arc<str>,
    #[cfg(any(feature = "logs", test))]
    pub(crate) logging_enabled: bool,
    #[cfg(any(feature = "metrics", test))]
    pub(crate) event_counter: Option<Counter<u64>>,
    #[cfg(any(feature = "metrics", test))]
    pub(crate) operation_duration: Option<Histogram<f64>>,
    #[cfg(any(feature = "metrics", test))]
    pub(crate) cache_size: Option<Gauge<u64>>,
}

/// Shared telemetry recorder of one cache instance.
#[derive(Clone, Debug)]
pub(crate) struct CacheTelemetry {
    inner: Arc<CacheTelemetryInner>,
}

impl Default for CacheTelemetry {
    fn default() -> Self {
        Self::silent("strata")
    }
}

impl CacheTelemetry {
    pub(crate) fn from_inner(inner: CacheTelemetryInner) -> Self {
        Self { inner: Arc::new(inner) }
    }

    /// A recorder that only carries the cache name.
    pub fn silent(name: &str) -> Self {
        Self::from_inner(CacheTelemetryInner {
            name: Arc::from(name),
            #[cfg(any(feature = "logs", test))]
            logging_enabled: false,
            #[cfg(any(feature = "metrics", test))]
            event_counter: None,
            #[cfg(any(feature = "metrics", test))]
            operation_duration: None,
            #[cfg(any(feature = "metrics", test))]
            cache_size: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Records a cache event that concerns no single key.
    #[inline]
    pub fn record(&self, operation: CacheOperation, activity: CacheActivity) {
        self.record_event(operation, activity, None, None);
    }

    /// Records a cache event for `key`.
    #[inline]
    pub fn record_key(&self, operation: CacheOperation, activity: CacheActivity, key: &str) {
        self.record_event(operation, activity, Some(key), None);
    }

    /// Records a store call for `key` together with how long it took.
    #[inline]
    pub fn record_timed(&self, operation: CacheOperation, activity: CacheActivity, key: &str, duration: Duration) {
        self.record_event(operation, activity, Some(key), Some(duration));
    }

    fn record_event(&self, operation: CacheOperation, activity: CacheActivity, key: Option<&str>, duration: Option<Duration>) {
        #[cfg(not(any(feature = "logs", test)))]
        let _ = key;
        #[cfg(not(any(feature = "logs", feature = "metrics", test)))]
        let _ = (operation, activity, duration);

        #[cfg(any(feature = "metrics", test))]
        {
            let inner = &self.inner;
            if inner.event_counter.is_some() || inner.operation_duration.is_some() {
                // Keys stay out of metric attributes to bound their cardinality.
                let attrs = [
                    KeyValue::new(attributes::CACHE_NAME, inner.name.to_string()),
                    KeyValue::new(attributes::CACHE_OPERATION_NAME, operation.as_str()),
                    KeyValue::new(attributes::CACHE_ACTIVITY_NAME, activity.as_str()),
                ];

                if let Some(c) = &inner.event_counter {
                    c.add(1, &attrs);
                }

                if let (Some(d), Some(h)) = (duration, &inner.operation_duration) {
                    h.record(d.as_secs_f64(), &attrs);
                }
            }
        }

        #[cfg(any(feature = "logs", test))]
        if self.inner.logging_enabled {
            Self::emit(&self.inner.name, operation, activity, key, duration);
        }
    }

    /// Returns `true` if tier sizes are exported.
    pub fn tracks_size(&self) -> bool {
        #[cfg(any(feature = "metrics", test))]
        {
            self.inner.cache_size.is_some()
        }
        #[cfg(not(any(feature = "metrics", test)))]
        {
            false
        }
    }

    /// Records the current number of entries of one tier.
    #[cfg_attr(
        not(any(feature = "metrics", test)),
        expect(unused_variables, reason = "sizes are exported as metrics only")
    )]
    pub fn record_size(&self, tier: &str, size: usize) {
        #[cfg(any(feature = "metrics", test))]
        if let Some(g) = &self.inner.cache_size {
            let attrs = [
                KeyValue::new(attributes::CACHE_NAME, self.inner.name.to_string()),
                KeyValue::new(attributes::CACHE_TIER_NAME, tier.to_string()),
            ];
            g.record(u64::try_from(size).unwrap_or(u64::MAX), &attrs);
        }
    }

    #[cfg(any(feature = "logs", test))]
    fn emit(cache_name: &str, operation: CacheOperation, activity: CacheActivity, key: Option<&str>, duration: Option<Duration>) {
        let op = operation.as_str();
        let ev = activity.as_str();
        let duration_ns = duration.map(|d| d.as_nanos());

        // Tracing level must be constant, so a macro selects the level.
        // Field names must match constants in attributes.rs.
        macro_rules! emit_event {
            ($level:ident) => {
                tracing::$level!(
                    cache.name = cache_name,
                    cache.key = key,
                    cache.operation = op,
                    cache.activity = ev,
                    cache.duration_ns = ?duration_ns,
                    "cache.event"
                )
            };
        }

        match activity.severity() {
            Severity::Error => emit_event!(error),
            Severity::Warn => emit_event!(warn),
            Severity::Info => emit_event!(info),
            Severity::Debug => emit_event!(debug),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::{
        TelemetryConfig,
        telemetry::testing::{LogCapture, MetricTester},
    };

    fn with_metrics(tester: &MetricTester, name: &str) -> CacheTelemetry {
        TelemetryConfig::new().with_metrics(tester.meter_provider()).build(name)
    }

    #[test]
    fn metrics_record_emits_correct_attributes() {
        let tester = MetricTester::new();
        let telemetry = with_metrics(&tester, "my_cache");

        telemetry.record_timed(CacheOperation::Load, CacheActivity::Loaded, "user:1", Duration::from_millis(5));

        tester.assert_attributes_contain(&[
            KeyValue::new(attributes::CACHE_NAME, "my_cache"),
            KeyValue::new(attributes::CACHE_OPERATION_NAME, CacheOperation::Load.as_str()),
            KeyValue::new(attributes::CACHE_ACTIVITY_NAME, CacheActivity::Loaded.as_str()),
        ]);
    }

    #[test]
    fn metrics_leave_keys_out() {
        let tester = MetricTester::new();
        let telemetry = with_metrics(&tester, "keyed");

        telemetry.record_key(CacheOperation::Get, CacheActivity::Hit, "user:1");

        let collected = tester.collect_attributes();
        assert!(!collected.is_empty());
        assert!(collected.iter().all(|kv| kv.key.as_str() != attributes::CACHE_KEY_NAME));
    }

    #[test]
    fn metrics_count_events() {
        let tester = MetricTester::new();
        let telemetry = with_metrics(&tester, "counted");

        telemetry.record(CacheOperation::Get, CacheActivity::Hit);
        telemetry.record_key(CacheOperation::Get, CacheActivity::Hit, "a");
        telemetry.record(CacheOperation::Get, CacheActivity::Miss);

        assert_eq!(tester.event_count(CacheActivity::Hit.as_str()), 2);
        assert_eq!(tester.event_count(CacheActivity::Miss.as_str()), 1);
    }

    #[test]
    fn metrics_record_size_emits_tier_name() {
        let tester = MetricTester::new();
        let telemetry = with_metrics(&tester, "sized");

        assert!(telemetry.tracks_size());
        telemetry.record_size("hot", 42);

        tester.assert_attributes_contain(&[
            KeyValue::new(attributes::CACHE_NAME, "sized"),
            KeyValue::new(attributes::CACHE_TIER_NAME, "hot"),
        ]);
    }

    #[test]
    fn logs_emit_contains_all_fields_and_values() {
        let capture = LogCapture::new();
        let _guard = tracing::subscriber::set_default(capture.subscriber());

        CacheTelemetry::emit(
            "my_test_cache",
            CacheOperation::Invalidate,
            CacheActivity::Error,
            Some("user:42"),
            Some(Duration::from_nanos(12345)),
        );

        capture.assert_contains(attributes::CACHE_NAME);
        capture.assert_contains(attributes::CACHE_KEY_NAME);
        capture.assert_contains(attributes::CACHE_OPERATION_NAME);
        capture.assert_contains(attributes::CACHE_ACTIVITY_NAME);
        capture.assert_contains(attributes::CACHE_DURATION_NAME);
        capture.assert_contains(attributes::CACHE_EVENT_NAME);

        capture.assert_contains("my_test_cache");
        capture.assert_contains("user:42");
        capture.assert_contains(CacheOperation::Invalidate.as_str());
        capture.assert_contains(CacheActivity::Error.as_str());
    }

    #[test]
    fn logs_record_key_of_the_event() {
        let capture = LogCapture::new();
        let _guard = tracing::subscriber::set_default(capture.subscriber());
        let telemetry = TelemetryConfig::new().with_logs().build("logged");

        telemetry.record_key(CacheOperation::Set, CacheActivity::Evicted, "session:7");

        capture.assert_contains(attributes::CACHE_KEY_NAME);
        capture.assert_contains("session:7");
        capture.assert_contains(CacheActivity::Evicted.as_str());
    }

    #[test]
    fn logs_emit_at_correct_severity_levels() {
        let capture = LogCapture::new();
        let _guard = tracing::subscriber::set_default(capture.subscriber());
        CacheTelemetry::emit("cache", CacheOperation::Load, CacheActivity::Timeout, Some("k"), None);
        capture.assert_contains("ERROR");

        let capture = LogCapture::new();
        let _guard = tracing::subscriber::set_default(capture.subscriber());
        CacheTelemetry::emit("cache", CacheOperation::Get, CacheActivity::StaleServed, Some("k"), None);
        capture.assert_contains("WARN");

        let capture = LogCapture::new();
        let _guard = tracing::subscriber::set_default(capture.subscriber());
        CacheTelemetry::emit("cache", CacheOperation::Get, CacheActivity::Promoted, None, None);
        capture.assert_contains("INFO");

        let capture = LogCapture::new();
        let _guard = tracing::subscriber::set_default(capture.subscriber());
        CacheTelemetry::emit("cache", CacheOperation::Get, CacheActivity::Hit, None, None);
        capture.assert_contains("DEBUG");
    }

    #[test]
    fn telemetry_disabled_emits_nothing() {
        let telemetry = CacheTelemetry::default();

        let capture = LogCapture::new();
        let _guard = tracing::subscriber::set_default(capture.subscriber());

        telemetry.record_timed(CacheOperation::Get, CacheActivity::Hit, "k", Duration::from_secs(1));
        telemetry.record_size("hot", 3);

        assert!(!telemetry.tracks_size());
        assert!(capture.output().is_empty());
    }
}
