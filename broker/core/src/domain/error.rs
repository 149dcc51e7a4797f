// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Error taxonomy for the broker core.
//!
//! Resolution and authorization failures are rejected at the earliest layer
//! and never reach the registry or the backend. Backend failures are
//! surfaced, never silently retried. Heartbeat-driven disconnection is
//! routine lifecycle and is not represented as an API error.

use thiserror::Error;

use crate::domain::connection::ConnectionId;
use crate::domain::identity::AppId;

#[derive(Debug, Error)]
pub enum BrokerError {
    /// Neither a per-application certificate nor the validation service
    /// produced an identity. The connection is rejected before dispatch.
    #[error("identity could not be resolved: {0}")]
    IdentityUnresolved(String),

    /// The namespace exists and is owned by a different application.
    #[error("namespace {namespace} is owned by another application")]
    NamespaceConflict { namespace: String },

    /// The namespace has never been registered (or was unregistered).
    #[error("namespace {namespace} is not registered")]
    NamespaceNotFound { namespace: String },

    /// The caller is not the owner of the namespace.
    #[error("application {app_id} is not authorized for namespace {namespace}")]
    NotAuthorized { app_id: AppId, namespace: String },

    /// The backend reported a publish error; the caller may retry.
    #[error("publish to {namespace}/{topic} failed: {reason}")]
    PublishFailed {
        namespace: String,
        topic: String,
        reason: String,
    },

    /// Backend unreachable. Fatal at startup; surfaced per-operation mid-run.
    #[error("message broker backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Internal: the connection missed two heartbeat intervals and was torn
    /// down. Not surfaced through the API since the client is presumed gone.
    #[error("connection {connection} timed out")]
    ConnectionTimeout { connection: ConnectionId },

    /// Shutdown has begun; no new operations are accepted.
    #[error("broker is shutting down")]
    ShuttingDown,

    /// Startup configuration / TLS material problem.
    #[error("configuration error: {0}")]
    Config(String),
}
