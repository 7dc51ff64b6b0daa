// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Timeout and circuit breaker around backing store calls.

use std::{
    fmt::{self, Debug},
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
    time::Duration,
};

use futures::future::BoxFuture;
use layered::{DynamicService, DynamicServiceExt, Execute, Layer, Service};
use seatbelt::{
    RecoveryInfo, ResilienceContext,
    breaker::{Breaker, HalfOpenMode},
    timeout::{Timeout, TimeoutOutputArgs},
};
use tick::Clock;

use crate::{
    BoxError, Error, Result, Store,
    config::BreakerOptions,
    telemetry::{CacheActivity, CacheOperation, CacheTelemetry, ext::ClockExt},
};

/// One store call, boxed so every call shape shares a pipeline. Writes reply `None`.
type StoreCall<V> = BoxFuture<'static, std::result::Result<Option<V>, BoxError>>;

type Outcome<V> = std::result::Result<Option<V>, Failure>;

enum Failure {
    Store(BoxError),
    TimedOut(Duration),
    Rejected,
}

/// Observable state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum CircuitState {
    /// Calls flow to the store.
    Closed,
    /// Calls are rejected without reaching the store.
    Open,
    /// A single trial call is testing whether the store recovered.
    HalfOpen,
}

impl CircuitState {
    const fn to_u8(self) -> u8 {
        match self {
            Self::Closed => 0,
            Self::Open => 1,
            Self::HalfOpen => 2,
        }
    }

    const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Open,
            2 => Self::HalfOpen,
            _ => Self::Closed,
        }
    }
}

/// Mirrors the breaker's state changes as they are reported through its callbacks.
#[derive(Debug, Default)]
struct CircuitTracker(AtomicU8);

impl CircuitTracker {
    fn get(&self) -> CircuitState {
        CircuitState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: CircuitState) {
        self.0.store(state.to_u8(), Ordering::Release);
    }

    /// A failed trial call sends the circuit back to open without a callback.
    fn reopen(&self) -> bool {
        self.0
            .compare_exchange(
                CircuitState::HalfOpen.to_u8(),
                CircuitState::Open.to_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

/// Guards every call to a [`Store`].
///
/// Calls run through a `seatbelt` pipeline: a circuit breaker wrapping a timeout measured on the
/// guard's clock. The circuit opens once the failure rate within `sampling_duration` reaches
/// `failure_threshold` over at least `min_throughput` calls; timeouts count as failures. While
/// open, calls fail at once with [`Error::CircuitOpen`]. After `break_duration` a single trial
/// call is let through; its success closes the circuit and its failure opens it again.
///
/// The guard is cheap to share: all clones of the pipeline see the same circuit.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use strata::{BreakerOptions, CircuitState, ResilienceGuard};
/// use tick::Clock;
///
/// let guard = ResilienceGuard::<String>::new(Clock::new_frozen(), Duration::from_secs(1), &BreakerOptions::default());
/// assert_eq!(guard.state(), CircuitState::Closed);
/// ```
pub struct ResilienceGuard<V> {
    service: DynamicService<StoreCall<V>, Outcome<V>>,
    circuit: Arc<CircuitTracker>,
    clock: Clock,
    timeout: Duration,
    telemetry: CacheTelemetry,
}

impl<V> Debug for ResilienceGuard<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilienceGuard")
            .field("state", &self.circuit.get())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl<V> ResilienceGuard<V>
where
    V: Send + 'static,
{
    /// Creates a guard with the given per-call timeout and breaker settings.
    #[must_use]
    pub fn new(clock: Clock, timeout: Duration, breaker: &BreakerOptions) -> Self {
        Self::with_telemetry(clock, timeout, breaker, CacheTelemetry::default())
    }

    pub(crate) fn with_telemetry(clock: Clock, timeout: Duration, options: &BreakerOptions, telemetry: CacheTelemetry) -> Self {
        let circuit = Arc::new(CircuitTracker::default());
        let context: ResilienceContext<StoreCall<V>, Outcome<V>> = ResilienceContext::new(&clock).name(telemetry.name().to_owned());

        let breaker = Breaker::layer("store_breaker", &context)
            .recovery_with(|outcome: &Outcome<V>, _args| match outcome {
                Ok(_) => RecoveryInfo::never(),
                Err(_) => RecoveryInfo::retry(),
            })
            .rejected_input_error(|_call, _args| Failure::Rejected)
            .failure_threshold(options.failure_threshold)
            .min_throughput(options.min_throughput)
            .sampling_duration(options.sampling_duration)
            .break_duration(options.break_duration)
            .half_open_mode(HalfOpenMode::quick())
            .on_opened({
                let circuit = Arc::clone(&circuit);
                let telemetry = telemetry.clone();
                move |_outcome, _args| {
                    circuit.set(CircuitState::Open);
                    tracing::warn!(cache.name = telemetry.name(), "cache.circuit.opened");
                }
            })
            .on_probing({
                let circuit = Arc::clone(&circuit);
                move |_call, _args| circuit.set(CircuitState::HalfOpen)
            })
            .on_closed({
                let circuit = Arc::clone(&circuit);
                let telemetry = telemetry.clone();
                move |_outcome, _args| {
                    circuit.set(CircuitState::Closed);
                    tracing::info!(cache.name = telemetry.name(), "cache.circuit.closed");
                }
            });

        let deadline = Timeout::layer("store_timeout", &context)
            .timeout(timeout)
            .timeout_error(|args: TimeoutOutputArgs| Failure::TimedOut(args.timeout()));

        let call = Execute::new(|call: StoreCall<V>| async move { call.await.map_err(Failure::Store) });

        Self {
            service: breaker.layer(deadline.layer(call)).into_dynamic(),
            circuit,
            clock,
            timeout,
            telemetry,
        }
    }

    /// Current state of the circuit.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.circuit.get()
    }

    /// The per-call timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Loads `key` from `store`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CircuitOpen`], [`Error::Timeout`] or [`Error::Loader`].
    pub async fn load<S>(&self, store: &S, key: &str) -> Result<Option<V>>
    where
        S: Store<V> + Clone + 'static,
    {
        let store = store.clone();
        let owned = key.to_owned();
        let call: StoreCall<V> = Box::pin(async move { store.load(&owned).await });

        self.run(CacheOperation::Load, key, call).await
    }

    /// Writes `value` to `store`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CircuitOpen`], [`Error::Timeout`] or [`Error::Loader`].
    pub async fn write<S>(&self, store: &S, key: &str, value: &V) -> Result<()>
    where
        S: Store<V> + Clone + 'static,
        V: Clone,
    {
        let store = store.clone();
        let owned = key.to_owned();
        let value = value.clone();
        let call: StoreCall<V> = Box::pin(async move { store.write(&owned, &value).await.map(|()| None) });

        self.run(CacheOperation::Write, key, call).await.map(|_| ())
    }

    async fn run(&self, operation: CacheOperation, key: &str, call: StoreCall<V>) -> Result<Option<V>> {
        let timed = self.clock.timed_async(self.service.execute(call)).await;

        let (result, activity) = match timed.result {
            Ok(value) => (Ok(value), CacheActivity::Ok),
            Err(Failure::Rejected) => {
                self.telemetry.record_key(operation, CacheActivity::Rejected, key);
                return Err(Error::CircuitOpen { key: key.to_owned() });
            }
            Err(Failure::Store(source)) => (
                Err(Error::Loader {
                    key: key.to_owned(),
                    source,
                }),
                CacheActivity::Error,
            ),
            Err(Failure::TimedOut(after)) => (
                Err(Error::Timeout {
                    key: key.to_owned(),
                    after,
                }),
                CacheActivity::Timeout,
            ),
        };

        if result.is_err() && self.circuit.reopen() {
            tracing::warn!(cache.name = self.telemetry.name(), cache.key = key, "cache.circuit.reopened");
        }

        self.telemetry.record_timed(operation, activity, key, timed.duration);
        result
    }
}

#[cfg(test)]
mod tests {
    use tick::ClockControl;

    use super::*;
    use crate::testing::{MockStore, StoreOp};

    fn guard(clock: Clock) -> ResilienceGuard<i32> {
        let breaker = BreakerOptions {
            failure_threshold: 1.0,
            min_throughput: 2,
            break_duration: Duration::from_secs(10),
            ..BreakerOptions::default()
        };
        ResilienceGuard::new(clock, Duration::from_millis(100), &breaker)
    }

    #[tokio::test]
    async fn load_passes_values_through() {
        let store = MockStore::new();
        store.insert("k", 5);
        let guard = guard(Clock::new_frozen());

        assert_eq!(guard.load(&store, "k").await.unwrap(), Some(5));
        assert_eq!(guard.load(&store, "missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn write_reaches_the_store() {
        let store = MockStore::new();
        let guard = guard(Clock::new_frozen());

        guard.write(&store, "k", &3).await.unwrap();

        assert_eq!(store.get("k"), Some(3));
    }

    #[tokio::test]
    async fn store_error_becomes_loader_error() {
        let store = MockStore::<i32>::new();
        store.fail_when(|op| matches!(op, StoreOp::Write { .. }));
        let guard = guard(Clock::new_frozen());

        let error = guard.write(&store, "k", &1).await.unwrap_err();

        assert!(matches!(error, Error::Loader { ref key, .. } if key == "k"));
    }

    #[tokio::test]
    async fn slow_store_times_out() {
        let control = ClockControl::new().auto_advance_timers(true);
        let store = MockStore::<i32>::new();
        store.hang_when(|_| true);
        let guard = guard(control.to_clock());

        let error = guard.load(&store, "k").await.unwrap_err();

        assert!(matches!(error, Error::Timeout { after, .. } if after == Duration::from_millis(100)));
    }

    #[tokio::test]
    async fn open_circuit_rejects_without_calling_store() {
        let control = ClockControl::new();
        let store = MockStore::<i32>::new();
        store.fail_when(|_| true);
        let guard = guard(control.to_clock());

        let _ = guard.load(&store, "a").await;
        let _ = guard.load(&store, "b").await;
        assert_eq!(guard.state(), CircuitState::Open);
        store.clear_operations();

        let error = guard.load(&store, "c").await.unwrap_err();

        assert!(matches!(error, Error::CircuitOpen { .. }));
        assert!(store.operations().is_empty());
    }

    #[tokio::test]
    async fn circuit_recovers_after_break() {
        let control = ClockControl::new();
        let store = MockStore::new();
        store.fail_when(|_| true);
        let guard = guard(control.to_clock());
        let _ = guard.load(&store, "a").await;
        let _ = guard.load(&store, "a").await;

        store.clear_failures();
        store.insert("a", 1);
        control.advance(Duration::from_secs(10));

        assert_eq!(guard.load(&store, "a").await.unwrap(), Some(1));
        assert_eq!(guard.state(), CircuitState::Closed);
    }

    #[test]
    fn tracker_reopens_only_from_half_open() {
        let tracker = CircuitTracker::default();
        assert!(!tracker.reopen());

        tracker.set(CircuitState::HalfOpen);
        assert!(tracker.reopen());
        assert_eq!(tracker.get(), CircuitState::Open);
    }
}
