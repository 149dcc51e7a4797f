// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Broker service: the single owned broker-state object.
//!
//! Composes the registry, the connection manager, the backend handle and the
//! delivery engine behind one handle shared by the API and push-channel
//! layers. There is no process-wide singleton; everything hangs off this
//! object and locking is scoped per namespace inside the registry.

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::application::connections::{ConnectionHandle, ConnectionManager};
use crate::application::delivery::DeliveryEngine;
use crate::application::heartbeat::run_heartbeat_driver;
use crate::application::registry::NamespaceRegistry;
use crate::domain::connection::ConnectionId;
use crate::domain::error::BrokerError;
use crate::domain::identity::AppId;
use crate::domain::namespace::{NamespaceDescriptor, SubscriptionKey};
use crate::domain::notification::Notification;
use crate::domain::push::PushFrame;
use crate::infrastructure::broker::MsgBroker;

pub struct EdgeBroker {
    registry: Arc<NamespaceRegistry>,
    connections: Arc<ConnectionManager>,
    backend: Arc<dyn MsgBroker>,
    delivery: DeliveryEngine,
    heartbeat_interval: Duration,
    shutdown: CancellationToken,
}

impl EdgeBroker {
    pub fn new(
        backend: Arc<dyn MsgBroker>,
        heartbeat_interval: Duration,
        send_queue_capacity: usize,
    ) -> Arc<Self> {
        let registry = Arc::new(NamespaceRegistry::new());
        let connections = Arc::new(ConnectionManager::new(
            send_queue_capacity,
            heartbeat_interval,
        ));
        let shutdown = CancellationToken::new();
        let delivery = DeliveryEngine::new(
            backend.clone(),
            registry.clone(),
            connections.clone(),
            shutdown.child_token(),
        );
        Arc::new(Self {
            registry,
            connections,
            backend,
            delivery,
            heartbeat_interval,
            shutdown,
        })
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Starts the periodic liveness probe. One driver per broker.
    pub fn spawn_heartbeat_driver(self: &Arc<Self>) -> JoinHandle<()> {
        let broker = self.clone();
        let period = self.heartbeat_interval;
        let shutdown = self.shutdown.child_token();
        tokio::spawn(run_heartbeat_driver(broker, period, shutdown))
    }

    pub async fn register_namespace(&self, app_id: &AppId, namespace: &str) -> Result<(), BrokerError> {
        self.ensure_running()?;
        self.registry.register(app_id, namespace)?;
        info!(%app_id, namespace, "namespace registered");
        Ok(())
    }

    /// Unregisters the namespace, closing its streams and telling affected
    /// consumers so they can resubscribe or fail gracefully.
    pub async fn unregister_namespace(
        &self,
        app_id: &AppId,
        namespace: &str,
    ) -> Result<(), BrokerError> {
        self.ensure_running()?;
        let effect = self.registry.unregister(app_id, namespace).await?;
        for key in &effect.close_streams {
            self.delivery.close_stream(key).await;
        }
        for connection_id in effect.notify {
            if let Some(handle) = self.connections.get(connection_id) {
                let _ = handle.try_push(PushFrame::NamespaceRemoved {
                    namespace: namespace.to_string(),
                });
            }
        }
        info!(%app_id, namespace, "namespace unregistered");
        Ok(())
    }

    /// Publishes one notification. All-or-nothing: either the backend accepts
    /// it or the caller gets exactly one error kind.
    pub async fn publish(
        &self,
        app_id: &AppId,
        namespace: &str,
        topic: &str,
        payload: Bytes,
    ) -> Result<(), BrokerError> {
        self.ensure_running()?;
        self.registry
            .authorize_publish(app_id, namespace, topic)
            .await?;
        let notification = Notification::new(namespace, topic, payload);
        self.backend.publish(&notification).await?;
        metrics::counter!("edge_notifications_published_total").increment(1);
        Ok(())
    }

    pub async fn subscribe(
        &self,
        connection: ConnectionId,
        namespace: &str,
        topic: Option<&str>,
    ) -> Result<(), BrokerError> {
        self.ensure_running()?;
        let effect = self.registry.subscribe(connection, namespace, topic).await?;
        if let Some(key) = effect.open_stream {
            if let Err(e) = self.delivery.open_stream(key).await {
                // Keep subscription state consistent with the streams that
                // actually exist.
                let _ = self.registry.unsubscribe(connection, namespace, topic).await;
                return Err(e);
            }
        }
        debug!(%connection, namespace, topic = topic.unwrap_or("*"), "subscribed");
        Ok(())
    }

    pub async fn unsubscribe(
        &self,
        connection: ConnectionId,
        namespace: &str,
        topic: Option<&str>,
    ) -> Result<(), BrokerError> {
        self.ensure_running()?;
        let effect = self
            .registry
            .unsubscribe(connection, namespace, topic)
            .await?;
        if let Some(key) = effect.close_stream {
            self.delivery.close_stream(&key).await;
        }
        Ok(())
    }

    pub async fn list_namespaces(&self) -> Vec<NamespaceDescriptor> {
        self.registry.list().await
    }

    /// Subscriptions currently held by one push-channel connection.
    pub async fn list_subscriptions(&self, connection: ConnectionId) -> Vec<SubscriptionKey> {
        self.registry.subscriptions_of(connection).await
    }

    /// Admits a resolved push-channel connection.
    pub fn attach_connection(&self, app_id: AppId) -> (Arc<ConnectionHandle>, mpsc::Receiver<PushFrame>) {
        self.connections.attach(app_id)
    }

    /// Removes a connection and every subscription it held; closes streams
    /// that lost their last subscriber. Used both for orderly disconnect and
    /// heartbeat-expiry teardown.
    pub async fn teardown_connection(&self, connection: ConnectionId) {
        let closed = self.registry.remove_connection(connection).await;
        for key in &closed {
            self.delivery.close_stream(key).await;
        }
        self.connections.detach(connection);
    }

    /// Begins shutdown: no new operations are accepted, open backend
    /// subscriptions and connection tasks are cancelled, in-flight publishes
    /// finish on their own.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.delivery.close_all().await;
        self.backend.shutdown().await;
        for handle in self.connections.snapshot() {
            self.connections.detach(handle.id);
        }
        info!("broker shut down");
    }

    fn ensure_running(&self) -> Result<(), BrokerError> {
        if self.shutdown.is_cancelled() {
            Err(BrokerError::ShuttingDown)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::namespace::SubscriptionKey;
    use crate::infrastructure::broker::MockBroker;

    const HEARTBEAT: Duration = Duration::from_secs(10);

    fn broker_with_mock() -> (Arc<EdgeBroker>, Arc<MockBroker>) {
        let backend = Arc::new(MockBroker::new());
        let broker = EdgeBroker::new(backend.clone(), HEARTBEAT, 16);
        (broker, backend)
    }

    #[tokio::test]
    async fn publish_forwards_to_backend() {
        let (broker, backend) = broker_with_mock();
        let owner = AppId::from("testapp");

        broker.register_namespace(&owner, "sensors").await.unwrap();
        broker
            .publish(&owner, "sensors", "temp", Bytes::from_static(b"42"))
            .await
            .unwrap();

        let published = backend.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].namespace, "sensors");
        assert_eq!(published[0].topic, "temp");
        assert_eq!(published[0].payload, Bytes::from_static(b"42"));
    }

    #[tokio::test]
    async fn stream_opens_on_first_subscriber_and_closes_on_last() {
        let (broker, backend) = broker_with_mock();
        let owner = AppId::from("testapp");
        broker.register_namespace(&owner, "sensors").await.unwrap();

        let (first, _rx1) = broker.attach_connection(AppId::from("consumer-a"));
        let (second, _rx2) = broker.attach_connection(AppId::from("consumer-b"));

        broker.subscribe(first.id, "sensors", Some("temp")).await.unwrap();
        broker.subscribe(second.id, "sensors", Some("temp")).await.unwrap();
        assert_eq!(backend.open_keys(), vec![SubscriptionKey::exact("sensors", "temp")]);

        broker.unsubscribe(first.id, "sensors", Some("temp")).await.unwrap();
        assert_eq!(backend.open_keys().len(), 1);

        broker.unsubscribe(second.id, "sensors", Some("temp")).await.unwrap();
        assert!(backend.open_keys().is_empty());
    }

    #[tokio::test]
    async fn teardown_closes_orphaned_streams() {
        let (broker, backend) = broker_with_mock();
        let owner = AppId::from("testapp");
        broker.register_namespace(&owner, "sensors").await.unwrap();

        let (connection, _rx) = broker.attach_connection(AppId::from("consumer"));
        broker.subscribe(connection.id, "sensors", None).await.unwrap();
        assert_eq!(backend.open_keys().len(), 1);

        broker.teardown_connection(connection.id).await;
        assert!(backend.open_keys().is_empty());
        assert!(broker.connections().is_empty());
    }

    #[tokio::test]
    async fn no_new_operations_after_shutdown() {
        let (broker, _backend) = broker_with_mock();
        let owner = AppId::from("testapp");
        broker.register_namespace(&owner, "sensors").await.unwrap();

        broker.shutdown().await;
        let err = broker
            .publish(&owner, "sensors", "temp", Bytes::from_static(b"42"))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::ShuttingDown));
    }
}
