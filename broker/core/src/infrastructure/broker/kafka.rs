// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Kafka-backed durable log backend.
//!
//! Each (namespace, topic) maps to the Kafka topic `<namespace>.<topic>`;
//! the name charset guarantees the mapping is unambiguous. Wildcard keys
//! consume via a `^<namespace>\.` regex subscription. Per-topic ordering and
//! at-least-once redelivery are whatever Kafka provides for the consumer
//! group; this layer adds no retry of its own.

use async_trait::async_trait;
use parking_lot::Mutex;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{MsgBroker, STREAM_CAPACITY};
use crate::domain::error::BrokerError;
use crate::domain::namespace::SubscriptionKey;
use crate::domain::notification::Notification;

const METADATA_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const SEND_TIMEOUT: Duration = Duration::from_secs(5);
const RECV_RETRY_DELAY: Duration = Duration::from_secs(1);

pub struct KafkaBroker {
    producer: FutureProducer,
    brokers: String,
    pumps: Mutex<HashMap<SubscriptionKey, JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl KafkaBroker {
    /// Connects and probes cluster metadata. An unreachable cluster fails
    /// startup with `BackendUnavailable`.
    pub async fn connect(brokers: &str) -> Result<Self, BrokerError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|e| BrokerError::BackendUnavailable(e.to_string()))?;

        let probe = producer.clone();
        tokio::task::spawn_blocking(move || {
            probe
                .client()
                .fetch_metadata(None, METADATA_PROBE_TIMEOUT)
                .map(|_| ())
        })
        .await
        .map_err(|e| BrokerError::BackendUnavailable(e.to_string()))?
        .map_err(|e| BrokerError::BackendUnavailable(e.to_string()))?;

        info!(brokers, "connected to Kafka backend");
        Ok(Self {
            producer,
            brokers: brokers.to_string(),
            pumps: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        })
    }

    fn backend_topic(notification: &Notification) -> String {
        format!("{}.{}", notification.namespace, notification.topic)
    }

    /// Exact keys subscribe to one topic; wildcard keys use librdkafka's
    /// regex form (leading `^`).
    fn subscription_pattern(key: &SubscriptionKey) -> String {
        match &key.topic {
            Some(topic) => format!("{}.{}", key.namespace, topic),
            None => format!("^{}\\..*", key.namespace),
        }
    }

    fn consumer_for(&self, key: &SubscriptionKey) -> Result<StreamConsumer, BrokerError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", format!("aegis-edge.{key}"))
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "latest")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| BrokerError::BackendUnavailable(e.to_string()))?;

        let pattern = Self::subscription_pattern(key);
        consumer
            .subscribe(&[pattern.as_str()])
            .map_err(|e| BrokerError::BackendUnavailable(e.to_string()))?;
        Ok(consumer)
    }
}

#[async_trait]
impl MsgBroker for KafkaBroker {
    async fn publish(&self, notification: &Notification) -> Result<(), BrokerError> {
        let topic = Self::backend_topic(notification);
        let buffer = serde_json::to_vec(notification).map_err(|e| BrokerError::PublishFailed {
            namespace: notification.namespace.clone(),
            topic: notification.topic.clone(),
            reason: e.to_string(),
        })?;

        self.producer
            .send(
                FutureRecord::to(&topic)
                    .key(notification.namespace.as_str())
                    .payload(&buffer),
                Timeout::After(SEND_TIMEOUT),
            )
            .await
            .map(|_| ())
            .map_err(|(e, _)| BrokerError::PublishFailed {
                namespace: notification.namespace.clone(),
                topic: notification.topic.clone(),
                reason: e.to_string(),
            })
    }

    async fn open_subscription(
        &self,
        key: &SubscriptionKey,
    ) -> Result<mpsc::Receiver<Notification>, BrokerError> {
        let consumer = self.consumer_for(key)?;
        let (sender, receiver) = mpsc::channel(STREAM_CAPACITY);
        let shutdown = self.shutdown.clone();
        let stream_key = key.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    result = consumer.recv() => match result {
                        Ok(message) => {
                            let Some(payload) = message.payload() else { continue };
                            match serde_json::from_slice::<Notification>(payload) {
                                Ok(notification) => {
                                    if sender.send(notification).await.is_err() {
                                        break;
                                    }
                                }
                                Err(e) => {
                                    warn!(key = %stream_key, error = %e, "discarding undecodable record");
                                }
                            }
                        }
                        Err(e) => {
                            // Transient consumer errors surface on the next
                            // recv; back off instead of spinning.
                            error!(key = %stream_key, error = %e, "Kafka consumer error");
                            tokio::time::sleep(RECV_RETRY_DELAY).await;
                        }
                    }
                }
            }
            debug!(key = %stream_key, "Kafka subscription pump stopped");
        });

        if let Some(previous) = self.pumps.lock().insert(key.clone(), task) {
            previous.abort();
        }
        Ok(receiver)
    }

    async fn close_subscription(&self, key: &SubscriptionKey) {
        if let Some(task) = self.pumps.lock().remove(key) {
            task.abort();
        }
    }

    async fn shutdown(&self) {
        self.shutdown.cancel();
        for (_, task) in self.pumps.lock().drain() {
            task.abort();
        }
        let producer = self.producer.clone();
        let _ = tokio::task::spawn_blocking(move || producer.flush(Timeout::After(SEND_TIMEOUT)))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn exact_keys_map_to_dotted_topics() {
        let notification = Notification::new("sensors", "temp", Bytes::from_static(b"42"));
        assert_eq!(KafkaBroker::backend_topic(&notification), "sensors.temp");
        assert_eq!(
            KafkaBroker::subscription_pattern(&SubscriptionKey::exact("sensors", "temp")),
            "sensors.temp"
        );
    }

    #[test]
    fn wildcard_keys_map_to_namespace_regex() {
        assert_eq!(
            KafkaBroker::subscription_pattern(&SubscriptionKey::wildcard("sensors")),
            "^sensors\\..*"
        );
    }
}
