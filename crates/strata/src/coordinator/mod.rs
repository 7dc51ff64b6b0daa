// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Keeps a [`TieredCache`] and its backing [`Store`] consistent.

use std::{
    fmt::{self, Debug},
    sync::Arc,
};

use anyspawn::Spawner;
use tick::Clock;

use crate::{
    ConsistencyMode, CoordinatorOptions, Error, ResilienceGuard, Result, Stats, Store, TieredCache, TieredLookup,
    WriteOptions,
    invalidation::{Mutation, Outbox},
    telemetry::{CacheActivity, CacheOperation, CacheTelemetry},
};

mod write_behind;

use write_behind::WriteBehind;

type FlushErrorCallback = Arc<dyn Fn(&Error) + Send + Sync>;

/// Where a [`Read`] value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ReadSource {
    /// A live cache entry, found in the given tier.
    Cache {
        /// Index of the tier the value was found in.
        tier: usize,
    },
    /// The backing store, after a cache miss. The value is now cached.
    Store,
    /// An expired cache entry, served because the store failed.
    Stale,
}

/// A value returned by [`Coordinator::read`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Read<V> {
    /// The value.
    pub value: V,
    /// Where it came from.
    pub source: ReadSource,
}

impl<V> Read<V> {
    /// Returns `true` if the value is an expired copy served in place of a failed store call.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.source == ReadSource::Stale
    }

    /// Returns the value.
    #[must_use]
    pub fn into_value(self) -> V {
        self.value
    }
}

pub(crate) struct Shared<V, S> {
    cache: Arc<TieredCache<V>>,
    store: Arc<S>,
    guard: ResilienceGuard<V>,
    options: CoordinatorOptions,
    clock: Clock,
    telemetry: CacheTelemetry,
    on_flush_error: Option<FlushErrorCallback>,
}

/// Builder for a [`Coordinator`].
pub struct CoordinatorBuilder<V, S> {
    cache: Arc<TieredCache<V>>,
    store: S,
    clock: Clock,
    options: CoordinatorOptions,
    outbox: Option<Outbox<V>>,
    on_flush_error: Option<FlushErrorCallback>,
    spawner: Option<Spawner>,
}

impl<V, S> Debug for CoordinatorBuilder<V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordinatorBuilder")
            .field("cache", &self.cache)
            .field("options", &self.options)
            .field("outbox", &self.outbox)
            .finish_non_exhaustive()
    }
}

impl<V, S> CoordinatorBuilder<V, S>
where
    V: Clone + Send + Sync + 'static,
    S: Store<V> + 'static,
{
    /// Replaces all options.
    #[must_use]
    pub fn options(mut self, options: CoordinatorOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the consistency mode.
    #[must_use]
    pub fn mode(mut self, mode: ConsistencyMode) -> Self {
        self.options.mode = mode;
        self
    }

    /// Publishes local mutations through `outbox`.
    #[must_use]
    pub fn outbox(mut self, outbox: Outbox<V>) -> Self {
        self.outbox = Some(outbox);
        self
    }

    /// Runs the write-behind flusher on `spawner`. Defaults to the ambient `tokio` runtime.
    #[must_use]
    pub fn spawner(mut self, spawner: Spawner) -> Self {
        self.spawner = Some(spawner);
        self
    }

    /// Calls `callback` with every [`Error::WriteBehindFlush`].
    #[must_use]
    pub fn on_flush_error(mut self, callback: impl Fn(&Error) + Send + Sync + 'static) -> Self {
        self.on_flush_error = Some(Arc::new(callback));
        self
    }

    /// Builds the coordinator. In write-behind mode this spawns the flusher task.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if write-behind mode is requested without a
    /// [`spawner`][Self::spawner] outside a `tokio` runtime.
    pub fn build(self) -> Result<Coordinator<V, S>> {
        let mode = self.options.mode;
        let spawner = match self.spawner {
            Some(spawner) => Some(spawner),
            None if tokio::runtime::Handle::try_current().is_ok() => Some(Spawner::new_tokio()),
            None => None,
        };

        let telemetry = self.cache.telemetry().clone();
        let guard = ResilienceGuard::with_telemetry(
            self.clock.clone(),
            self.options.store_timeout,
            &self.options.breaker,
            telemetry.clone(),
        );

        let shared = Arc::new(Shared {
            cache: self.cache,
            store: Arc::new(self.store),
            guard,
            options: self.options,
            clock: self.clock,
            telemetry,
            on_flush_error: self.on_flush_error,
        });

        let write_behind = match (mode, spawner) {
            (ConsistencyMode::WriteBehind, Some(spawner)) => Some(WriteBehind::spawn(Arc::clone(&shared), &spawner)),
            (ConsistencyMode::WriteBehind, None) => {
                return Err(Error::Config("write-behind mode needs a spawner or a tokio runtime".to_string()));
            }
            _ => None,
        };

        Ok(Coordinator {
            shared,
            outbox: self.outbox,
            write_behind,
        })
    }
}

/// Coordinates a [`TieredCache`] with its backing [`Store`].
///
/// Reads are always read-through: a miss loads the value from the store and caches it. A store
/// failure on a miss falls back to the copy that expired during the lookup, if there was one.
///
/// Writes follow the [`ConsistencyMode`] fixed at construction:
///
/// - **Write-through** writes the store first. Only when that succeeds is the cache updated and
///   the change published, so a failed write leaves the cache as it was.
/// - **Write-behind** updates the cache and publishes at once, then queues the store write for a
///   background flusher. A queued write is lost if the process dies before it is flushed.
/// - **Write-around** writes the store, then drops the key from every tier and publishes the
///   delete. The cache is not warmed.
///
/// Store calls run through a [`ResilienceGuard`]. Cache-only mutations ([`set`][Self::set],
/// [`delete`][Self::delete] and the invalidations) are published too; populating the cache on a
/// read miss is not.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use strata::{BoxError, ConsistencyMode, Coordinator, PolicyKind, ReadSource, Store, TieredCache, WriteOptions};
/// use tick::Clock;
///
/// struct Database;
///
/// impl Store<String> for Database {
///     async fn load(&self, key: &str) -> Result<Option<String>, BoxError> {
///         Ok(Some(format!("row for {key}")))
///     }
///
///     async fn write(&self, _key: &str, _value: &String) -> Result<(), BoxError> {
///         Ok(())
///     }
/// }
///
/// # futures::executor::block_on(async {
/// let clock = Clock::new_frozen();
/// let cache = Arc::new(
///     TieredCache::builder(clock.clone())
///         .tier("hot", 100, PolicyKind::Lru)
///         .tier("cold", 1000, PolicyKind::Lfu)
///         .build()?,
/// );
///
/// let coordinator = Coordinator::builder(cache, Database, clock)
///     .mode(ConsistencyMode::WriteThrough)
///     .build()?;
///
/// let read = coordinator.read("user:1").await?.unwrap();
/// assert_eq!(read.value, "row for user:1");
/// assert_eq!(read.source, ReadSource::Store);
///
/// coordinator.write("user:1", "updated".to_string(), WriteOptions::default()).await?;
/// assert_eq!(coordinator.get("user:1").as_deref(), Some("updated"));
/// # Ok::<(), strata::Error>(())
/// # })?;
/// # Ok::<(), strata::Error>(())
/// ```
pub struct Coordinator<V, S> {
    shared: Arc<Shared<V, S>>,
    outbox: Option<Outbox<V>>,
    write_behind: Option<WriteBehind<V>>,
}

impl<V, S> Debug for Coordinator<V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("mode", &self.shared.options.mode)
            .field("cache", &self.shared.cache)
            .field("guard", &self.shared.guard)
            .finish_non_exhaustive()
    }
}

impl<V, S> Coordinator<V, S>
where
    V: Clone + Send + Sync + 'static,
    S: Store<V> + 'static,
{
    /// Starts building a coordinator for `cache` backed by `store`.
    #[must_use]
    pub fn builder(cache: Arc<TieredCache<V>>, store: S, clock: Clock) -> CoordinatorBuilder<V, S> {
        CoordinatorBuilder {
            cache,
            store,
            clock,
            options: CoordinatorOptions::default(),
            outbox: None,
            on_flush_error: None,
            spawner: None,
        }
    }

    /// The consistency mode.
    #[must_use]
    pub fn mode(&self) -> ConsistencyMode {
        self.shared.options.mode
    }

    /// The underlying cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<TieredCache<V>> {
        &self.shared.cache
    }

    /// The backing store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.shared.store
    }

    /// The guard around store calls.
    #[must_use]
    pub fn guard(&self) -> &ResilienceGuard<V> {
        &self.shared.guard
    }

    /// Reads a live cached value without touching the store.
    pub fn get(&self, key: &str) -> Option<V> {
        self.shared.cache.get(key)
    }

    /// Reads a value, loading it from the store on a cache miss.
    ///
    /// Returns `None` if neither the cache nor the store has the key.
    ///
    /// # Errors
    ///
    /// Returns the store failure ([`Error::Loader`], [`Error::Timeout`] or
    /// [`Error::CircuitOpen`]) when the store fails and no expired copy is available.
    pub async fn read(&self, key: &str) -> Result<Option<Read<V>>> {
        let shared = &*self.shared;

        let stale = match shared.cache.lookup(key) {
            TieredLookup::Hit { value, tier } => {
                return Ok(Some(Read {
                    value,
                    source: ReadSource::Cache { tier },
                }));
            }
            TieredLookup::Expired { stale } => Some(stale),
            TieredLookup::Miss => None,
        };

        match shared.guard.load(&shared.store, key).await {
            Ok(Some(value)) => {
                let options = WriteOptions::default()
                    .maybe_ttl(shared.options.read_ttl)
                    .placement(shared.options.read_placement);
                shared.cache.set(key, value.clone(), options)?;
                shared.telemetry.record_key(CacheOperation::Load, CacheActivity::Loaded, key);
                Ok(Some(Read {
                    value,
                    source: ReadSource::Store,
                }))
            }
            Ok(None) => {
                shared.telemetry.record_key(CacheOperation::Load, CacheActivity::NotFound, key);
                Ok(None)
            }
            Err(error) if error.is_store_failure() => match stale {
                Some(value) => {
                    shared.telemetry.record_key(CacheOperation::Get, CacheActivity::StaleServed, key);
                    Ok(Some(Read {
                        value,
                        source: ReadSource::Stale,
                    }))
                }
                None => Err(error),
            },
            Err(error) => Err(error),
        }
    }

    /// Writes a value according to the consistency mode.
    ///
    /// # Errors
    ///
    /// In write-through and write-around modes, returns the store failure; the cache is left
    /// untouched. In write-behind mode, returns [`Error::QueueFull`] or [`Error::Closed`] if the
    /// store write could not be queued; the cache is updated regardless.
    pub async fn write(&self, key: &str, value: V, options: WriteOptions) -> Result<()> {
        let shared = &*self.shared;

        match shared.options.mode {
            ConsistencyMode::WriteThrough => {
                // A placement the cache cannot honour must fail before the store is touched.
                options.placement.resolve(shared.cache.tiers().len())?;
                shared.guard.write(&shared.store, key, &value).await?;
                shared.cache.set(key, value.clone(), options)?;
                self.publish(Mutation::Set {
                    key: key.to_owned(),
                    value,
                })
                .await;
                Ok(())
            }
            ConsistencyMode::WriteBehind => {
                shared.cache.set(key, value.clone(), options)?;
                self.publish(Mutation::Set {
                    key: key.to_owned(),
                    value: value.clone(),
                })
                .await;
                match &self.write_behind {
                    Some(queue) => queue.enqueue(key, value).await,
                    None => Err(Error::Closed),
                }
            }
            ConsistencyMode::WriteAround => {
                shared.guard.write(&shared.store, key, &value).await?;
                shared.cache.delete(key);
                self.publish(Mutation::Delete { key: key.to_owned() }).await;
                Ok(())
            }
        }
    }

    /// Writes a value to the cache only and publishes it. Returns the tier written.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the placement names a missing tier.
    pub async fn set(&self, key: &str, value: V, options: WriteOptions) -> Result<usize> {
        let tier = self.shared.cache.set(key, value.clone(), options)?;
        self.publish(Mutation::Set {
            key: key.to_owned(),
            value,
        })
        .await;
        Ok(tier)
    }

    /// Deletes a key from every tier and publishes the delete.
    pub async fn delete(&self, key: &str) -> bool {
        let removed = self.shared.cache.delete(key);
        self.publish(Mutation::Delete { key: key.to_owned() }).await;
        removed
    }

    /// Removes every key starting with `pattern` and publishes the invalidation.
    pub async fn invalidate_pattern(&self, pattern: &str) -> usize {
        let removed = self.shared.cache.invalidate_pattern(pattern);
        self.publish(Mutation::InvalidatePattern {
            pattern: pattern.to_owned(),
        })
        .await;
        removed
    }

    /// Removes every entry carrying `tag` and publishes the invalidation.
    pub async fn invalidate_tag(&self, tag: &str) -> usize {
        let removed = self.shared.cache.invalidate_tag(tag);
        self.publish(Mutation::InvalidateTag { tag: tag.to_owned() }).await;
        removed
    }

    /// Clears every tier and publishes the clear.
    pub async fn clear(&self) -> usize {
        let removed = self.shared.cache.clear();
        self.publish(Mutation::Clear).await;
        removed
    }

    /// Cache statistics.
    #[must_use]
    pub fn stats(&self) -> Stats {
        self.shared.cache.stats()
    }

    /// Waits until every store write queued so far has been attempted. A no-op outside
    /// write-behind mode.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] after [`shutdown`][Self::shutdown].
    pub async fn flush(&self) -> Result<()> {
        match &self.write_behind {
            Some(queue) => queue.flush().await,
            None => Ok(()),
        }
    }

    /// Flushes queued store writes and stops the flusher. A no-op outside write-behind mode.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] if the flusher already stopped.
    pub async fn shutdown(&self) -> Result<()> {
        match &self.write_behind {
            Some(queue) => queue.shutdown().await,
            None => Ok(()),
        }
    }

    /// Returns `true` while the write-behind flusher is running.
    #[must_use]
    pub fn is_flushing(&self) -> bool {
        self.write_behind.as_ref().is_some_and(WriteBehind::is_running)
    }

    async fn publish(&self, mutation: Mutation<V>) {
        let Some(outbox) = &self.outbox else {
            return;
        };

        if outbox.send(mutation).await.is_err() {
            tracing::warn!(cache.name = self.shared.telemetry.name(), "cache.outbox.closed");
        }
    }
}
