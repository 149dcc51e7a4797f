// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-process channel fabric backend.
//!
//! Maps each stream key to an in-memory channel. Publish is a direct, ordered
//! hand-off to the currently attached subscriber streams; delivery is
//! at-most-once and a notification published while no stream is open is lost
//! (no backlog).

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{MsgBroker, STREAM_CAPACITY};
use crate::domain::error::BrokerError;
use crate::domain::namespace::SubscriptionKey;
use crate::domain::notification::Notification;

#[derive(Default)]
pub struct ChannelsBroker {
    streams: Mutex<HashMap<SubscriptionKey, mpsc::Sender<Notification>>>,
}

impl ChannelsBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn matching_senders(&self, notification: &Notification) -> Vec<mpsc::Sender<Notification>> {
        let streams = self.streams.lock();
        [
            SubscriptionKey::exact(&notification.namespace, &notification.topic),
            SubscriptionKey::wildcard(&notification.namespace),
        ]
        .iter()
        .filter_map(|key| streams.get(key).cloned())
        .collect()
    }
}

#[async_trait]
impl MsgBroker for ChannelsBroker {
    async fn publish(&self, notification: &Notification) -> Result<(), BrokerError> {
        let senders = self.matching_senders(notification);
        if senders.is_empty() {
            debug!(
                namespace = %notification.namespace,
                topic = %notification.topic,
                "no subscriber stream attached, notification lost"
            );
            return Ok(());
        }
        for sender in senders {
            // At-most-once: a full or closed stream loses the hand-off.
            if let Err(e) = sender.try_send(notification.clone()) {
                warn!(
                    namespace = %notification.namespace,
                    topic = %notification.topic,
                    error = %e,
                    "in-process stream did not accept notification"
                );
            }
        }
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
