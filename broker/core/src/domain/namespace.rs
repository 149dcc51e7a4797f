// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Namespace and subscription value types.
//!
//! A namespace is an identity-owned logical scope grouping topics. Topics are
//! created lazily on first publish or subscribe. A subscription binds a
//! consumer connection to a (namespace, topic) pair, where the topic may be
//! omitted to match every topic in the namespace.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum accepted length for namespace and topic names.
pub const MAX_NAME_LEN: usize = 128;

/// Key identifying one backend-level subscription stream.
///
/// `topic: None` is the namespace wildcard. The same key type identifies the
/// consumer-side subscriptions held by a connection, so first-subscriber /
/// last-unsubscriber stream refcounting falls out of set membership.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionKey {
    pub namespace: String,
    pub topic: Option<String>,
}

impl SubscriptionKey {
    pub fn exact(namespace: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            topic: Some(topic.into()),
        }
    }

    pub fn wildcard(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            topic: None,
        }
    }

    pub fn is_wildcard(&self) -> bool {
        self.topic.is_none()
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.topic {
            Some(topic) => write!(f, "{}/{}", self.namespace, topic),
            None => write!(f, "{}/*", self.namespace),
        }
    }
}

/// Listing entry returned to the owning identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamespaceDescriptor {
    pub name: String,
    /// Topics seen so far on this namespace, in no particular order.
    pub topics: Vec<String>,
}

/// Accepts DNS-label-ish names. The charset keeps backend topic mapping
/// unambiguous: `<namespace>.<topic>` never collides because names themselves
/// cannot contain a dot.
pub fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
