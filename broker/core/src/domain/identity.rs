// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use serde::{Deserialize, Serialize};
use std::fmt;

/// Resolved identity of an edge application instance.
///
/// Opaque to the broker: either a per-application certificate Common Name or
/// the identifier the orchestration layer associates with the peer's address.
/// Immutable for a connection's lifetime once resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppId(String);

impl AppId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AppId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AppId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// How a connection's identity was established.
///
/// One connection type, two resolution paths: applications holding an
/// individually issued certificate authenticate by Common Name; applications
/// connecting without one (or with the broker's shared access certificate)
/// are identified by the orchestrator through their fixed source address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedIdentity {
    /// Leaf certificate carried a per-application Common Name.
    Certificate { app_id: AppId },

    /// Identity returned by the validation service for the peer address.
    IpLookup { app_id: AppId },
}

impl ResolvedIdentity {
    pub fn app_id(&self) -> &AppId {
        match self {
            Self::Certificate { app_id } | Self::IpLookup { app_id } => app_id,
        }
    }
}
