// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Backend selection: the factory yields a working in-process backend and
//! fails startup when the configured Kafka cluster is unreachable.

use edge_core::domain::config::BackendConfig;
use edge_core::domain::error::BrokerError;
use edge_core::infrastructure::broker::create_msg_broker;

#[tokio::test]
async fn channels_backend_needs_no_connection() {
    let backend = create_msg_broker(&BackendConfig::Channels).await;
    assert!(backend.is_ok());
}

#[tokio::test]
async fn unreachable_kafka_is_fatal_at_startup() {
    // Nothing listens on this port; the metadata probe must fail instead of
    // yielding a half-working backend.
    let result = create_msg_broker(&BackendConfig::Kafka {
        url: "127.0.0.1:1".to_string(),
    })
    .await;
    match result {
        Err(BrokerError::BackendUnavailable(_)) => {}
        Err(other) => panic!("expected BackendUnavailable, got {other}"),
        Ok(_) => panic!("expected startup failure against an unreachable cluster"),
    }
}
