// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Registry property tests: ownership, idempotent registration, publish
//! authorization and namespace lifetime, driven through the broker service
//! against the in-process backend.

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

use edge_core::application::broker::EdgeBroker;
use edge_core::domain::error::BrokerError;
use edge_core::domain::identity::AppId;
use edge_core::infrastructure::broker::ChannelsBroker;

const HEARTBEAT: Duration = Duration::from_secs(60);

fn broker() -> Arc<EdgeBroker> {
    EdgeBroker::new(Arc::new(ChannelsBroker::new()), HEARTBEAT, 16)
}

#[tokio::test]
async fn registration_is_idempotent_for_the_same_owner() {
    let broker = broker();
    let owner = AppId::from("testapp");

    broker.register_namespace(&owner, "sensors").await.unwrap();
    broker.register_namespace(&owner, "sensors").await.unwrap();
}

#[tokio::test]
async fn registration_conflicts_for_a_different_owner() {
    let broker = broker();
    broker
        .register_namespace(&AppId::from("testapp"), "sensors")
        .await
        .unwrap();

    let err = broker
        .register_namespace(&AppId::from("intruder"), "sensors")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BrokerError::NamespaceConflict { ref namespace } if namespace == "sensors"
    ));
}

#[tokio::test]
async fn publishing_to_an_unregistered_namespace_fails() {
    let broker = broker();
    let err = broker
        .publish(&AppId::from("testapp"), "sensors", "temp", Bytes::from_static(b"42"))
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::NamespaceNotFound { .. }));
}

#[tokio::test]
async fn publishing_by_a_non_owner_is_not_authorized() {
    let broker = broker();
    broker
        .register_namespace(&AppId::from("testapp"), "sensors")
        .await
        .unwrap();

    let err = broker
        .publish(&AppId::from("intruder"), "sensors", "temp", Bytes::from_static(b"42"))
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::NotAuthorized { .. }));
}

#[tokio::test]
async fn subscribing_to_an_unregistered_namespace_fails() {
    let broker = broker();
    let (connection, _rx) = broker.attach_connection(AppId::from("consumer"));

    let err = broker
        .subscribe(connection.id, "sensors", Some("temp"))
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::NamespaceNotFound { .. }));
}

#[tokio::test]
async fn only_the_owner_may_unregister() {
    let broker = broker();
    broker
        .register_namespace(&AppId::from("testapp"), "sensors")
        .await
        .unwrap();

    let err = broker
        .unregister_namespace(&AppId::from("intruder"), "sensors")
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::NotAuthorized { .. }));
}

#[tokio::test]
async fn an_unregistered_namespace_can_be_claimed_again() {
    let broker = broker();
    let first = AppId::from("testapp");
    let second = AppId::from("successor");

    broker.register_namespace(&first, "sensors").await.unwrap();
    broker.unregister_namespace(&first, "sensors").await.unwrap();

    // Ownership died with the namespace; a new identity may register it.
    broker.register_namespace(&second, "sensors").await.unwrap();
    let err = broker.register_namespace(&first, "sensors").await.unwrap_err();
    assert!(matches!(err, BrokerError::NamespaceConflict { .. }));
}

#[tokio::test]
async fn listing_reflects_registrations_and_topics() {
    let broker = broker();
    let owner = AppId::from("testapp");

    broker.register_namespace(&owner, "sensors").await.unwrap();
    broker.register_namespace(&owner, "video").await.unwrap();
    broker
        .publish(&owner, "sensors", "temp", Bytes::from_static(b"42"))
        .await
        .unwrap();
    broker
        .publish(&owner, "sensors", "humidity", Bytes::from_static(b"70"))
        .await
        .unwrap();

    let listing = broker.list_namespaces().await;
    assert_eq!(listing.len(), 2);
    let sensors = listing.iter().find(|d| d.name == "sensors").unwrap();
    assert_eq!(sensors.topics, vec!["humidity".to_string(), "temp".to_string()]);
    let video = listing.iter().find(|d| d.name == "video").unwrap();
    assert!(video.topics.is_empty());
}

#[tokio::test]
async fn a_connection_can_list_what_it_holds() {
    let broker = broker();
    let owner = AppId::from("testapp");
    broker.register_namespace(&owner, "sensors").await.unwrap();
    broker.register_namespace(&owner, "video").await.unwrap();

    let (connection, _rx) = broker.attach_connection(AppId::from("consumer"));
    broker
        .subscribe(connection.id, "sensors", Some("temp"))
        .await
        .unwrap();
    broker.subscribe(connection.id, "video", None).await.unwrap();

    let held = broker.list_subscriptions(connection.id).await;
    assert_eq!(held.len(), 2);
    assert!(held.iter().any(|k| k.namespace == "sensors" && k.topic.as_deref() == Some("temp")));
    assert!(held.iter().any(|k| k.namespace == "video" && k.is_wildcard()));

    broker
        .unsubscribe(connection.id, "sensors", Some("temp"))
        .await
        .unwrap();
    assert_eq!(broker.list_subscriptions(connection.id).await.len(), 1);
}

#[tokio::test]
async fn namespaces_outlive_connections() {
    let broker = broker();
    let owner = AppId::from("testapp");
    broker.register_namespace(&owner, "sensors").await.unwrap();

    // The owner's connection goes away; ownership is by identity, not socket.
    let (connection, _rx) = broker.attach_connection(owner.clone());
    broker.teardown_connection(connection.id).await;

    broker
        .publish(&owner, "sensors", "temp", Bytes::from_static(b"42"))
        .await
        .unwrap();
    assert_eq!(broker.list_namespaces().await.len(), 1);
}
