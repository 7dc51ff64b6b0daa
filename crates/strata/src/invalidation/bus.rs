// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::{
    fmt::{self, Debug},
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::UNIX_EPOCH,
};

use anyspawn::Spawner;
use bytes::Bytes;
use futures::{
    FutureExt, StreamExt,
    future::{AbortHandle, abortable},
    stream::BoxStream,
};
use parking_lot::Mutex;
use serde::{Serialize, de::DeserializeOwned};
use tick::Clock;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{
    BusOptions, Error, Result, TieredCache, WriteOptions,
    invalidation::{
        Action, InvalidationMessage, Transport,
        dedup::DedupWindow,
        message::Fingerprint,
    },
    telemetry::{CacheActivity, CacheOperation, CacheTelemetry},
};

/// A local cache mutation waiting to be published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Mutation<V> {
    Set { key: String, value: V },
    Delete { key: String },
    Clear,
    InvalidatePattern { pattern: String },
    InvalidateTag { tag: String },
}

/// Sending half of an [`InvalidationBus`].
///
/// Handed to a [`Coordinator`][crate::Coordinator] so that its local mutations reach other
/// nodes. Sending waits while the outbox is full.
pub struct Outbox<V> {
    sender: mpsc::Sender<Mutation<V>>,
}

impl<V> Debug for Outbox<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Outbox").field("closed", &self.sender.is_closed()).finish()
    }
}

impl<V> Clone for Outbox<V> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<V> Outbox<V> {
    pub(crate) async fn send(&self, mutation: Mutation<V>) -> Result<()> {
        self.sender.send(mutation).await.map_err(|_closed| Error::Closed)
    }
}

/// What [`InvalidationBus::handle`] did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Delivery {
    /// The message was applied to the local cache.
    Applied(Action),
    /// The message originated on this node and was dropped.
    Echo,
    /// The message was seen before and was dropped.
    Duplicate,
    /// The message could not be decoded and was dropped.
    Malformed,
}

/// Builder for an [`InvalidationBus`].
#[derive(Debug)]
pub struct InvalidationBusBuilder<V> {
    cache: Arc<TieredCache<V>>,
    clock: Clock,
    origin_id: Option<String>,
    options: BusOptions,
    spawner: Option<Spawner>,
}

impl<V> InvalidationBusBuilder<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Sets the node identity. Defaults to a random UUID.
    #[must_use]
    pub fn origin_id(mut self, origin_id: impl Into<String>) -> Self {
        self.origin_id = Some(origin_id.into());
        self
    }

    /// Sets the bus options.
    #[must_use]
    pub fn options(mut self, options: BusOptions) -> Self {
        self.options = options;
        self
    }

    /// Runs the publisher and consumer on `spawner`. Defaults to the ambient `tokio` runtime.
    #[must_use]
    pub fn spawner(mut self, spawner: Spawner) -> Self {
        self.spawner = Some(spawner);
        self
    }

    /// Builds the bus. Nothing is published or received until [`InvalidationBus::start`].
    #[must_use]
    pub fn build(self) -> InvalidationBus<V> {
        let (sender, receiver) = mpsc::channel(self.options.outbox_capacity.max(1));
        let telemetry = self.cache.telemetry().clone();

        InvalidationBus {
            inner: Arc::new(BusInner {
                origin_id: self.origin_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
                seen: Mutex::new(DedupWindow::new(self.options.dedup_window)),
                last_timestamp: AtomicU64::new(0),
                cache: self.cache,
                clock: self.clock,
                options: self.options,
                telemetry,
            }),
            outbox: Outbox { sender },
            outgoing: Mutex::new(Some(receiver)),
            spawner: self.spawner.unwrap_or_else(Spawner::new_tokio),
        }
    }
}

/// Carries cache mutations between nodes.
///
/// Local mutations enter through the [`Outbox`] and are published by a background task, one
/// [`InvalidationMessage`] each, tagged with this node's origin id. A second task consumes the
/// subscription and applies remote messages to the local [`TieredCache`]. Messages from this node
/// and messages seen before are dropped. Applying a message never publishes another.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use strata::{InvalidationBus, LocalTransport, PolicyKind, TieredCache};
/// use tick::Clock;
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build()?.block_on(async {
/// let clock = Clock::new_frozen();
/// let cache = Arc::new(
///     TieredCache::builder::<String>(clock.clone())
///         .tier("main", 100, PolicyKind::Lru)
///         .build()?,
/// );
///
/// let bus = InvalidationBus::builder(cache, clock).origin_id("node-a").build();
/// let tasks = bus.start(LocalTransport::default()).await?;
/// tasks.stop();
/// # Ok::<(), strata::Error>(())
/// # })?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct InvalidationBus<V> {
    inner: Arc<BusInner<V>>,
    outbox: Outbox<V>,
    outgoing: Mutex<Option<mpsc::Receiver<Mutation<V>>>>,
    spawner: Spawner,
}

impl<V> Debug for InvalidationBus<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvalidationBus")
            .field("origin_id", &self.inner.origin_id)
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}

struct BusInner<V> {
    cache: Arc<TieredCache<V>>,
    clock: Clock,
    origin_id: String,
    options: BusOptions,
    last_timestamp: AtomicU64,
    seen: Mutex<DedupWindow<Fingerprint>>,
    telemetry: CacheTelemetry,
}

impl<V> InvalidationBus<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Starts building a bus that applies remote mutations to `cache`.
    #[must_use]
    pub fn builder(cache: Arc<TieredCache<V>>, clock: Clock) -> InvalidationBusBuilder<V> {
        InvalidationBusBuilder {
            cache,
            clock,
            origin_id: None,
            options: BusOptions::default(),
            spawner: None,
        }
    }

    /// This node's identity.
    #[must_use]
    pub fn origin_id(&self) -> &str {
        &self.inner.origin_id
    }

    /// The sending half, for coordinators.
    #[must_use]
    pub fn outbox(&self) -> Outbox<V> {
        self.outbox.clone()
    }

    /// Subscribes to the transport and spawns the publisher and consumer tasks.
    ///
    /// Without a [`spawner`][InvalidationBusBuilder::spawner], must be called from within a
    /// `tokio` runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if subscribing fails and [`Error::Config`] if the bus was
    /// already started.
    pub async fn start<T: Transport>(&self, transport: T) -> Result<BusTasks> {
        let Some(outgoing) = self.outgoing.lock().take() else {
            return Err(Error::Config("the invalidation bus is already started".to_string()));
        };

        let incoming = match transport.subscribe(&self.inner.options.channel).await {
            Ok(incoming) => incoming,
            Err(error) => {
                *self.outgoing.lock() = Some(outgoing);
                return Err(Error::Transport(error));
            }
        };

        let running = Arc::new(AtomicUsize::new(2));
        let (publisher, publisher_handle) = abortable(publish(Arc::clone(&self.inner), transport, outgoing));
        let (consumer, consumer_handle) = abortable(consume(Arc::clone(&self.inner), incoming));

        for task in [publisher.boxed(), consumer.boxed()] {
            let running = Arc::clone(&running);
            let _detached = self.spawner.spawn(async move {
                let _ = task.await;
                running.fetch_sub(1, Ordering::AcqRel);
            });
        }

        Ok(BusTasks {
            handles: [publisher_handle, consumer_handle],
            running,
        })
    }

    /// Decodes one incoming message and applies it unless it is an echo or a duplicate.
    pub fn handle(&self, message: &[u8]) -> Delivery {
        self.inner.handle(message)
    }

    #[cfg(test)]
    pub(crate) fn message_for(&self, mutation: Mutation<V>) -> InvalidationMessage {
        self.inner.message_for(mutation)
    }
}

/// Background tasks of a started [`InvalidationBus`]. Dropping the handle stops them.
#[derive(Debug)]
pub struct BusTasks {
    handles: [AbortHandle; 2],
    running: Arc<AtomicUsize>,
}

impl BusTasks {
    /// Stops publishing and consuming. Mutations still in the outbox are not published.
    pub fn stop(&self) {
        for handle in &self.handles {
            handle.abort();
        }
    }

    /// Returns `true` once both tasks have stopped.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.running.load(Ordering::Acquire) == 0
    }
}

impl Drop for BusTasks {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn publish<V, T>(inner: Arc<BusInner<V>>, transport: T, mut outgoing: mpsc::Receiver<Mutation<V>>)
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    T: Transport,
{
    while let Some(mutation) = outgoing.recv().await {
        let message = inner.message_for(mutation);

        let result = match message.encode() {
            Ok(bytes) => transport.publish(&inner.options.channel, bytes).await.map_err(Error::Transport),
            Err(error) => Err(error),
        };

        match result {
            Ok(()) => inner.telemetry.record(CacheOperation::Publish, CacheActivity::Ok),
            Err(error) => {
                tracing::error!(cache.name = inner.telemetry.name(), error = %error, "cache.publish.failed");
                inner.telemetry.record(CacheOperation::Publish, CacheActivity::Error);
            }
        }
    }
}

async fn consume<V>(inner: Arc<BusInner<V>>, mut incoming: BoxStream<'static, Bytes>)
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    while let Some(message) = incoming.next().await {
        inner.handle(&message);
    }
}

impl<V> BusInner<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn handle(&self, bytes: &[u8]) -> Delivery {
        let (message, value) = match self.decode(bytes) {
            Ok(decoded) => decoded,
            Err(error) => {
                tracing::error!(cache.name = self.telemetry.name(), error = %error, "cache.message.malformed");
                self.telemetry.record(CacheOperation::Receive, CacheActivity::Malformed);
                return Delivery::Malformed;
            }
        };

        if message.origin_id == self.origin_id {
            self.telemetry.record(CacheOperation::Receive, CacheActivity::Echo);
            return Delivery::Echo;
        }

        if !self.seen.lock().insert(message.fingerprint()) {
            self.telemetry.record(CacheOperation::Receive, CacheActivity::Duplicate);
            return Delivery::Duplicate;
        }

        self.apply(&message, value);
        match message.key.as_deref() {
            Some(key) => self.telemetry.record_key(CacheOperation::Receive, CacheActivity::Applied, key),
            None => self.telemetry.record(CacheOperation::Receive, CacheActivity::Applied),
        }
        Delivery::Applied(message.action)
    }

    fn decode(&self, bytes: &[u8]) -> Result<(InvalidationMessage, Option<V>)> {
        let message = InvalidationMessage::decode(bytes)?;
        let value = match (message.action, &message.payload) {
            (Action::Set, Some(payload)) => Some(serde_json::from_slice(payload).map_err(Error::serialization)?),
            _ => None,
        };
        Ok((message, value))
    }

    fn apply(&self, message: &InvalidationMessage, value: Option<V>) {
        let target = message.target().unwrap_or_default();

        match (message.action, value) {
            (Action::Set, Some(value)) => {
                if let Err(error) = self.cache.set(target, value, WriteOptions::default()) {
                    tracing::error!(cache.name = self.telemetry.name(), cache.key = target, error = %error, "cache.apply.failed");
                }
            }
            // Without the value, dropping the stale local copy is the best a peer can do.
            (Action::Set | Action::Delete, _) => {
                self.cache.delete(target);
            }
            (Action::Clear, _) => {
                self.cache.clear();
            }
            (Action::InvalidatePattern, _) => {
                self.cache.invalidate_pattern(target);
            }
            (Action::InvalidateTag, _) => {
                self.cache.invalidate_tag(target);
            }
        }
    }

    fn message_for(&self, mutation: Mutation<V>) -> InvalidationMessage {
        let mut message = InvalidationMessage {
            action: Action::Clear,
            key: None,
            pattern: None,
            tag: None,
            origin_id: self.origin_id.clone(),
            timestamp: self.next_timestamp(),
            payload: None,
        };

        match mutation {
            Mutation::Set { key, value } => {
                message.action = Action::Set;
                message.payload = self.payload(&key, &value);
                message.key = Some(key);
            }
            Mutation::Delete { key } => {
                message.action = Action::Delete;
                message.key = Some(key);
            }
            Mutation::Clear => {}
            Mutation::InvalidatePattern { pattern } => {
                message.action = Action::InvalidatePattern;
                message.pattern = Some(pattern);
            }
            Mutation::InvalidateTag { tag } => {
                message.action = Action::InvalidateTag;
                message.tag = Some(tag);
            }
        }

        message
    }

    fn payload(&self, key: &str, value: &V) -> Option<Vec<u8>> {
        if !self.options.replicate_values {
            return None;
        }

        match serde_json::to_vec(value) {
            Ok(payload) => Some(payload),
            Err(error) => {
                // Peers still drop their copy when the value cannot travel.
                tracing::warn!(cache.name = self.telemetry.name(), cache.key = key, error = %error, "cache.payload.skipped");
                None
            }
        }
    }

    /// Microseconds since the UNIX epoch, bumped past the previous stamp when the clock stalls.
    fn next_timestamp(&self) -> u64 {
        let now = self
            .clock
            .system_time()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |since| u64::try_from(since.as_micros()).unwrap_or(u64::MAX));

        let bump = |last: u64| now.max(last.saturating_add(1));
        let previous = self
            .last_timestamp
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(bump(last)))
            .unwrap_or_else(|last| last);
        bump(previous)
    }
}

#[cfg(test)]
mod tests {
    use strata_tier::PolicyKind;

    use super::*;

    fn bus(options: BusOptions) -> InvalidationBus<u32> {
        let clock = Clock::new_frozen();
        let cache = TieredCache::builder(clock.clone())
            .tier("main", 16, PolicyKind::Lru)
            .build()
            .unwrap();
        InvalidationBus::builder(Arc::new(cache), clock)
            .origin_id("local")
            .options(options)
            .build()
    }

    #[test]
    fn timestamps_strictly_increase_on_a_frozen_clock() {
        let bus = bus(BusOptions::default());

        let first = bus.message_for(Mutation::Clear).timestamp;
        let second = bus.message_for(Mutation::Clear).timestamp;
        let third = bus.message_for(Mutation::Clear).timestamp;

        assert!(first < second && second < third);
    }

    #[test]
    fn messages_carry_origin_and_target() {
        let bus = bus(BusOptions::default());

        let delete = bus.message_for(Mutation::Delete { key: "k".to_string() });
        let tag = bus.message_for(Mutation::InvalidateTag { tag: "t".to_string() });

        assert_eq!(delete.origin_id, "local");
        assert_eq!(delete.action, Action::Delete);
        assert_eq!(delete.target(), Some("k"));
        assert_eq!(tag.action, Action::InvalidateTag);
        assert_eq!(tag.target(), Some("t"));
    }

    #[test]
    fn set_payload_follows_replication_option() {
        let plain = bus(BusOptions::default());
        let replicating = bus(BusOptions {
            replicate_values: true,
            ..BusOptions::default()
        });
        let set = || Mutation::Set {
            key: "k".to_string(),
            value: 7,
        };

        assert_eq!(plain.message_for(set()).payload, None);
        assert_eq!(replicating.message_for(set()).payload, Some(b"7".to_vec()));
    }

    #[test]
    fn default_origin_is_random() {
        let clock = Clock::new_frozen();
        let cache = Arc::new(
            TieredCache::builder::<u8>(clock.clone())
                .tier("main", 1, PolicyKind::Lru)
                .build()
                .unwrap(),
        );

        let a = InvalidationBus::builder(Arc::clone(&cache), clock.clone()).build();
        let b = InvalidationBus::builder(cache, clock).build();

        assert_ne!(a.origin_id(), b.origin_id());
        assert!(Uuid::parse_str(a.origin_id()).is_ok());
    }

    #[test]
    fn own_messages_are_echoes() {
        let bus = bus(BusOptions::default());
        let bytes = bus.message_for(Mutation::Clear).encode().unwrap();

        assert_eq!(bus.handle(&bytes), Delivery::Echo);
    }

    #[test]
    fn undecodable_payload_is_malformed() {
        let bus = bus(BusOptions::default());
        // "eA==" is base64 for `x`, which is not a JSON number.
        let bytes = br#"{"action":"set","key":"k","originId":"peer","timestamp":1,"payload":"eA=="}"#;

        assert_eq!(bus.handle(bytes), Delivery::Malformed);
    }
}
