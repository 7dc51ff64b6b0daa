// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Mock backing store for testing.
//!
//! This module provides `MockStore`, an in-memory [`Store`] that records every call and supports
//! failure and latency injection for testing error paths.

use std::{collections::HashMap, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tick::Clock;

use crate::{BoxError, Store};

/// Recorded store call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp<V> {
    /// A load of the given key.
    Load(String),
    /// A write of the given key and value.
    Write {
        /// The key written.
        key: String,
        /// The value written.
        value: V,
    },
}

impl<V> StoreOp<V> {
    /// The key the call was about.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Load(key) | Self::Write { key, .. } => key,
        }
    }
}

type OpPredicate<V> = Box<dyn Fn(&StoreOp<V>) -> bool + Send + Sync>;

/// A configurable mock store for testing.
///
/// Values live in memory. Every call is recorded before it runs, including calls that fail or
/// hang.
///
/// # Examples
///
/// ```
/// use strata::{
///     Store,
///     testing::{MockStore, StoreOp},
/// };
///
/// # futures::executor::block_on(async {
/// let store = MockStore::new();
/// store.write("user:1", &"alice").await.unwrap();
/// assert_eq!(store.load("user:1").await.unwrap(), Some("alice"));
///
/// store.fail_when(|op| matches!(op, StoreOp::Load(key) if key == "user:2"));
/// assert!(store.load("user:2").await.is_err());
///
/// assert_eq!(store.operations().len(), 3);
/// # });
/// ```
pub struct MockStore<V> {
    data: Arc<Mutex<HashMap<String, V>>>,
    operations: Arc<Mutex<Vec<StoreOp<V>>>>,
    fail_when: Arc<Mutex<Option<OpPredicate<V>>>>,
    hang_when: Arc<Mutex<Option<OpPredicate<V>>>>,
    latency: Arc<Mutex<Option<(Clock, Duration)>>>,
}

impl<V: std::fmt::Debug> std::fmt::Debug for MockStore<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockStore")
            .field("data", &self.data)
            .field("operations", &self.operations)
            .field("fail_when", &self.fail_when.lock().is_some())
            .field("hang_when", &self.hang_when.lock().is_some())
            .finish_non_exhaustive()
    }
}

impl<V> Clone for MockStore<V> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            operations: Arc::clone(&self.operations),
            fail_when: Arc::clone(&self.fail_when),
            hang_when: Arc::clone(&self.hang_when),
            latency: Arc::clone(&self.latency),
        }
    }
}

impl<V> Default for MockStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> MockStore<V> {
    /// Creates an empty mock store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: Arc::new(Mutex::new(HashMap::new())),
            operations: Arc::new(Mutex::new(Vec::new())),
            fail_when: Arc::new(Mutex::new(None)),
            hang_when: Arc::new(Mutex::new(None)),
            latency: Arc::new(Mutex::new(None)),
        }
    }

    /// Puts a value directly, without recording an operation.
    pub fn insert(&self, key: impl Into<String>, value: V) {
        self.data.lock().insert(key.into(), value);
    }

    /// Returns `true` if the store holds `key`.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.lock().contains_key(key)
    }

    /// Number of stored values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    /// Returns `true` if the store holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }

    /// Makes matching calls fail.
    pub fn fail_when<F>(&self, predicate: F)
    where
        F: Fn(&StoreOp<V>) -> bool + Send + Sync + 'static,
    {
        *self.fail_when.lock() = Some(Box::new(predicate));
    }

    /// Makes matching calls never complete.
    pub fn hang_when<F>(&self, predicate: F)
    where
        F: Fn(&StoreOp<V>) -> bool + Send + Sync + 'static,
    {
        *self.hang_when.lock() = Some(Box::new(predicate));
    }

    /// Delays every call by `latency`, measured on `clock`.
    pub fn set_latency(&self, clock: Clock, latency: Duration) {
        *self.latency.lock() = Some((clock, latency));
    }

    /// Removes injected failures, hangs and latency.
    pub fn clear_failures(&self) {
        *self.fail_when.lock() = None;
        *self.hang_when.lock() = None;
        *self.latency.lock() = None;
    }

    /// Clears all recorded operations.
    pub fn clear_operations(&self) {
        self.operations.lock().clear();
    }
}

impl<V: Clone> MockStore<V> {
    /// Returns the stored value of `key`, without recording an operation.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<V> {
        self.data.lock().get(key).cloned()
    }

    /// Returns a clone of all recorded operations.
    #[must_use]
    pub fn operations(&self) -> Vec<StoreOp<V>> {
        self.operations.lock().clone()
    }

    /// Recorded writes, in order.
    #[must_use]
    pub fn writes(&self) -> Vec<(String, V)> {
        self.operations
            .lock()
            .iter()
            .filter_map(|op| match op {
                StoreOp::Write { key, value } => Some((key.clone(), value.clone())),
                StoreOp::Load(_) => None,
            })
            .collect()
    }

    async fn enter(&self, op: StoreOp<V>) -> Result<(), BoxError> {
        let latency = self.latency.lock().clone();
        if let Some((clock, latency)) = latency {
            clock.delay(latency).await;
        }

        let fail = self.fail_when.lock().as_ref().is_some_and(|predicate| predicate(&op));
        let hang = self.hang_when.lock().as_ref().is_some_and(|predicate| predicate(&op));
        let key = op.key().to_owned();
        self.operations.lock().push(op);

        if hang {
            std::future::pending::<()>().await;
        }

        if fail {
            return Err(format!("mock: store call for `{key}` failed").into());
        }

        Ok(())
    }
}

impl<V> Store<V> for MockStore<V>
where
    V: Clone + Send + Sync,
{
    async fn load(&self, key: &str) -> Result<Option<V>, BoxError> {
        self.enter(StoreOp::Load(key.to_owned())).await?;
        Ok(self.data.lock().get(key).cloned())
    }

    async fn write(&self, key: &str, value: &V) -> Result<(), BoxError> {
        self.enter(StoreOp::Write {
            key: key.to_owned(),
            value: value.clone(),
        })
        .await?;
        self.data.lock().insert(key.to_owned(), value.clone());
        Ok(())
    }
}
