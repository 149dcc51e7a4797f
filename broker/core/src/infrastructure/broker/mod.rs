// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Message Broker Backend Adapter
//!
//! Uniform publish/subscribe capability over two interchangeable backends: a
//! Kafka-backed durable log and an in-process channel fabric for single-node
//! deployments. The backend is selected once at startup and never mixed at
//! runtime; the delivery engine above this layer only consumes streams.

pub mod channels;
pub mod kafka;

pub use channels::ChannelsBroker;
pub use kafka::KafkaBroker;

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::domain::config::BackendConfig;
use crate::domain::error::BrokerError;
use crate::domain::namespace::SubscriptionKey;
use crate::domain::notification::Notification;

/// Depth of the stream channel handed to the delivery engine.
pub const STREAM_CAPACITY: usize = 256;

/// Backend capability set.
///
/// One subscription stream exists per key at a time; the registry refcounts
/// subscribers and the broker service opens/closes streams accordingly.
#[async_trait]
pub trait MsgBroker: Send + Sync {
    /// Appends/hands off one notification. Errors surface as `PublishFailed`
    /// and are not retried by this layer.
    async fn publish(&self, notification: &Notification) -> Result<(), BrokerError>;

    /// Opens the stream for a key. Wildcard keys receive every topic in the
    /// namespace.
    async fn open_subscription(
        &self,
        key: &SubscriptionKey,
    ) -> Result<mpsc::Receiver<Notification>, BrokerError>;

    /// Closes the stream for a key; a no-op if it is not open.
    async fn close_subscription(&self, key: &SubscriptionKey);

    /// Stops all streams and flushes what the backend buffers.
    async fn shutdown(&self);
}

/// Factory selecting the backend from configuration. A connect failure here
/// is fatal: the broker cannot start without a working backend.
pub async fn create_msg_broker(config: &BackendConfig) -> Result<Arc<dyn MsgBroker>, BrokerError> {
    match config {
        BackendConfig::Kafka { url } => Ok(Arc::new(KafkaBroker::connect(url).await?)),
        BackendConfig::Channels => Ok(Arc::new(ChannelsBroker::new())),
    }
}

// Re-export MockBroker for testing
pub use mock::MockBroker;

mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Records publishes and lets tests inject notifications into open
    /// streams by hand.
    #[derive(Default)]
    pub struct MockBroker {
        published: Mutex<Vec<Notification>>,
        streams: Mutex<HashMap<SubscriptionKey, mpsc::Sender<Notification>>>,
    }

    impl MockBroker {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn published(&self) -> Vec<Notification> {
            self.published.lock().clone()
        }

        pub fn open_keys(&self) -> Vec<SubscriptionKey> {
            self.streams.lock().keys().cloned().collect()
        }

        /// Pushes a notification into the stream for `key`, as the backend
        /// would on delivery.
        pub async fn inject(&self, key: &SubscriptionKey, notification: Notification) -> bool {
            let sender = self.streams.lock().get(key).cloned();
            match sender {
                Some(sender) => sender.send(notification).await.is_ok(),
                None => false,
            }
        }
    }

    #[async_trait]
    impl MsgBroker for MockBroker {
        async fn publish(&self, notification: &Notification) -> Result<(), BrokerError> {
            self.published.lock().push(notification.clone());
            Ok(())
        }

        async fn open_subscription(
            &self,
            key: &SubscriptionKey,
        ) -> Result<mpsc::Receiver<Notification>, BrokerError> {
            let (sender, receiver) = mpsc::channel(STREAM_CAPACITY);
            self.streams.lock().insert(key.clone(), sender);
            Ok(receiver)
        }

        async fn close_subscription(&self, key: &SubscriptionKey) {
            self.streams.lock().remove(key);
        }

        async fn shutdown(&self) {
            self.streams.lock().clear();
        }
    }
}
