// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Broker Configuration Types
//
// Defines the JSON configuration file consumed at startup:
// - listener endpoints (mutual-TLS API endpoint, open push endpoint)
// - validation-service endpoint for IP-to-identity lookup
// - heartbeat interval for the liveness protocol
// - certificate paths and the broker's shared access Common Name
// - message-broker backend selector
//
// Field names are PascalCase to match the deployment manifests this service
// is provisioned with.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::error::BrokerError;

/// Paths to the TLS material used by both listeners.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CertsConfig {
    /// Root CA bundle that client certificates are verified against.
    pub ca_root_path: PathBuf,

    /// Server certificate presented on both endpoints.
    pub server_cert_path: PathBuf,

    /// Private key for the server certificate.
    pub server_key_path: PathBuf,

    /// Shared "access" Common Name. A client certificate bearing this CN is
    /// not a per-application identity; such connections fall through to the
    /// IP-lookup resolution path.
    pub common_name: String,
}

/// Message-broker backend selector. Exactly one backend is active per
/// process; backends are never mixed at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "Type", rename_all = "lowercase")]
pub enum BackendConfig {
    /// Durable log backend: one Kafka topic per (namespace, topic).
    Kafka {
        #[serde(rename = "URL")]
        url: String,
    },

    /// In-process channel fabric for single-node deployments. At-most-once,
    /// no backlog.
    Channels,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EdgeConfig {
    /// Mutual-TLS endpoint serving the register/publish API.
    pub tls_endpoint: SocketAddr,

    /// Open endpoint serving the websocket push channel.
    pub open_endpoint: SocketAddr,

    /// Validation service answering IP-to-identity lookups.
    pub validation_endpoint: String,

    /// Heartbeat period. A connection silent for two periods is torn down.
    #[serde(with = "humantime_serde", default = "default_heartbeat_interval")]
    pub heartbeat_interval: Duration,

    /// Bound on each outbound validation-service call.
    #[serde(with = "humantime_serde", default = "default_lookup_timeout")]
    pub lookup_timeout: Duration,

    /// Per-connection send queue depth; enqueueing onto a full queue drops
    /// the new notification for that connection only.
    #[serde(default = "default_send_queue_capacity")]
    pub send_queue_capacity: usize,

    pub certs: CertsConfig,

    pub msg_broker: BackendConfig,
}

impl EdgeConfig {
    pub fn from_file(path: &Path) -> Result<Self, BrokerError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            BrokerError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            BrokerError::Config(format!("failed to parse {}: {e}", path.display()))
        })
    }
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_lookup_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_send_queue_capacity() -> usize {
    128
}
