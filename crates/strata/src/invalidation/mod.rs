// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Cross-node invalidation.
//!
//! Every local mutation made through a [`Coordinator`][crate::Coordinator] becomes one
//! [`InvalidationMessage`] published on a [`Transport`]. Peers apply it to their own caches,
//! ignoring their own messages and messages they have already applied.
//!
//! There is no global ordering. Messages about the same key are applied in the order they arrive,
//! so two nodes writing the same key at the same time may disagree until the next write.

mod bus;
mod dedup;
mod message;
mod transport;

pub(crate) use bus::Mutation;
pub use bus::{BusTasks, Delivery, InvalidationBus, InvalidationBusBuilder, Outbox};
pub use message::{Action, InvalidationMessage};
pub use transport::{LocalTransport, Transport};
