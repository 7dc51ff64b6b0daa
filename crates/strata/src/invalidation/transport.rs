// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::{collections::HashMap, sync::Arc};

use bytes::Bytes;
use futures::{StreamExt, stream::BoxStream};
use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::BoxError;

/// A publish/subscribe channel between cache nodes.
///
/// Delivery is at least once, with no ordering across publishers. Subscribers receive messages
/// published after they subscribed, including their own.
pub trait Transport: Send + Sync + 'static {
    /// Publishes a message on `channel`.
    fn publish(&self, channel: &str, message: Bytes) -> impl Future<Output = Result<(), BoxError>> + Send;

    /// Subscribes to `channel`.
    fn subscribe(&self, channel: &str) -> impl Future<Output = Result<BoxStream<'static, Bytes>, BoxError>> + Send;
}

impl<T: Transport> Transport for Arc<T> {
    fn publish(&self, channel: &str, message: Bytes) -> impl Future<Output = Result<(), BoxError>> + Send {
        (**self).publish(channel, message)
    }

    fn subscribe(&self, channel: &str) -> impl Future<Output = Result<BoxStream<'static, Bytes>, BoxError>> + Send {
        (**self).subscribe(channel)
    }
}

/// In-process [`Transport`] backed by `tokio` broadcast channels.
///
/// Clones share the same channels, so several nodes living in one process can talk to each other.
/// A subscriber that falls more than `capacity` messages behind skips the oldest ones.
#[derive(Debug, Clone)]
pub struct LocalTransport {
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<Bytes>>>>,
    capacity: usize,
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl LocalTransport {
    /// Creates a transport whose channels buffer up to `capacity` messages per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<Bytes> {
        self.channels
            .lock()
            .entry(channel.to_owned())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Transport for LocalTransport {
    async fn publish(&self, channel: &str, message: Bytes) -> Result<(), BoxError> {
        // No subscribers is not an error for a broadcast medium.
        let _ = self.sender(channel).send(message);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<BoxStream<'static, Bytes>, BoxError> {
        let receiver = self.sender(channel).subscribe();
        let channel = channel.to_owned();

        let stream = futures::stream::unfold(receiver, move |mut receiver| {
            let channel = channel.clone();
            async move {
                loop {
                    match receiver.recv().await {
                        Ok(message) => return Some((message, receiver)),
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(cache.channel = %channel, skipped, "cache.transport.lagged");
                        }
                        Err(RecvError::Closed) => return None,
                    }
                }
            }
        });

        Ok(stream.boxed())
    }
}
