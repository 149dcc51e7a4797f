// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Delivery Engine: backend stream draining and fan-out.
//!
//! One task drains each open backend subscription stream and fans every
//! arriving notification out to the connections subscribed under that stream
//! key. Enqueueing is wait-free (`try_push`); the backpressure policy is
//! drop-new: a full per-connection queue drops the notification for that
//! connection only and never blocks delivery to others.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::application::connections::{ConnectionManager, PushOutcome};
use crate::application::registry::NamespaceRegistry;
use crate::domain::error::BrokerError;
use crate::domain::namespace::SubscriptionKey;
use crate::domain::notification::Notification;
use crate::domain::push::PushFrame;
use crate::infrastructure::broker::MsgBroker;

pub struct DeliveryEngine {
    backend: Arc<dyn MsgBroker>,
    registry: Arc<NamespaceRegistry>,
    connections: Arc<ConnectionManager>,
    streams: Mutex<HashMap<SubscriptionKey, JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl DeliveryEngine {
    pub fn new(
        backend: Arc<dyn MsgBroker>,
        registry: Arc<NamespaceRegistry>,
        connections: Arc<ConnectionManager>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            backend,
            registry,
            connections,
            streams: Mutex::new(HashMap::new()),
            shutdown,
        }
    }

    /// Opens the backend stream for `key` and starts its drain task.
    pub async fn open_stream(&self, key: SubscriptionKey) -> Result<(), BrokerError> {
        let receiver = self.backend.open_subscription(&key).await?;
        let registry = self.registry.clone();
        let connections = self.connections.clone();
        let shutdown = self.shutdown.clone();
        let stream_key = key.clone();

        let task = tokio::spawn(async move {
            drain_stream(stream_key, receiver, registry, connections, shutdown).await;
        });

        if let Some(previous) = self.streams.lock().insert(key, task) {
            previous.abort();
        }
        Ok(())
    }

    /// Stops the drain task and closes the backend stream.
    pub async fn close_stream(&self, key: &SubscriptionKey) {
        if let Some(task) = self.streams.lock().remove(key) {
            task.abort();
        }
        self.backend.close_subscription(key).await;
    }

    pub async fn close_all(&self) {
        let keys: Vec<SubscriptionKey> = {
            let mut streams = self.streams.lock();
            streams
                .drain()
                .map(|(key, task)| {
                    task.abort();
                    key
                })
                .collect()
        };
        for key in keys {
            self.backend.close_subscription(&key).await;
        }
    }

    pub fn open_stream_count(&self) -> usize {
        self.streams.lock().len()
    }
}

async fn drain_stream(
    key: SubscriptionKey,
    mut receiver: mpsc::Receiver<Notification>,
    registry: Arc<NamespaceRegistry>,
    connections: Arc<ConnectionManager>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            next = receiver.recv() => match next {
                Some(notification) => {
                    fan_out(&key, notification, &registry, &connections).await;
                }
                None => break,
            }
        }
    }
    debug!(key = %key, "delivery stream drained");
}

async fn fan_out(
    key: &SubscriptionKey,
    notification: Notification,
    registry: &NamespaceRegistry,
    connections: &ConnectionManager,
) {
    for connection_id in registry.subscribers_for(key).await {
        let Some(handle) = connections.get(connection_id) else {
            continue;
        };
        match handle.try_push(PushFrame::Notification(notification.clone())) {
            PushOutcome::Enqueued => {
                metrics::counter!("edge_notifications_delivered_total").increment(1);
            }
            PushOutcome::Dropped => {
                metrics::counter!("edge_notifications_dropped_total").increment(1);
                warn!(
                    connection = %connection_id,
                    key = %key,
                    "send queue full, dropping notification for this connection"
                );
            }
            PushOutcome::Closed => {}
        }
    }
}
