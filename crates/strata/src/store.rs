// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The backing store contract.

use std::sync::Arc;

use crate::BoxError;

/// The authoritative data source behind a [`Coordinator`][crate::Coordinator].
///
/// Implementations talk to a database, a remote service, or anything else that owns the data.
/// Calls may be slow and may fail; the coordinator wraps every call with a timeout and a circuit
/// breaker, so implementations need neither.
///
/// # Examples
///
/// ```
/// use std::{collections::HashMap, sync::Mutex};
///
/// use strata::{BoxError, Store};
///
/// #[derive(Default)]
/// struct MapStore(Mutex<HashMap<String, u64>>);
///
/// impl Store<u64> for MapStore {
///     async fn load(&self, key: &str) -> Result<Option<u64>, BoxError> {
///         Ok(self.0.lock().map_err(|e| e.to_string())?.get(key).copied())
///     }
///
///     async fn write(&self, key: &str, value: &u64) -> Result<(), BoxError> {
///         self.0.lock().map_err(|e| e.to_string())?.insert(key.to_string(), *value);
///         Ok(())
///     }
/// }
/// ```
pub trait Store<V>: Send + Sync {
    /// Loads the value of `key`, or `None` if the store has none.
    fn load(&self, key: &str) -> impl Future<Output = Result<Option<V>, BoxError>> + Send;

    /// Writes the value of `key`.
    fn write(&self, key: &str, value: &V) -> impl Future<Output = Result<(), BoxError>> + Send;
}

impl<V, S> Store<V> for Arc<S>
where
    S: Store<V>,
{
    fn load(&self, key: &str) -> impl Future<Output = Result<Option<V>, BoxError>> + Send {
        (**self).load(key)
    }

    fn write(&self, key: &str, value: &V) -> impl Future<Output = Result<(), BoxError>> + Send {
        (**self).write(key, value)
    }
}
