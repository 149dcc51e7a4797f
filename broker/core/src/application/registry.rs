// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Namespace & Subscription Registry.
//!
//! Single source of truth for namespace ownership and the subscriber sets.
//! Mutations are serialized per namespace: the concurrent map yields an
//! `Arc<NamespaceEntry>` per namespace and every mutating operation takes
//! that entry's async mutex, so operations on different namespaces proceed
//! concurrently while operations on one namespace are linearized.
//!
//! The registry itself performs no I/O. Operations that require a backend
//! stream to be opened or closed return that instruction as an effect; the
//! broker service executes it against the delivery engine.

use dashmap::DashMap;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::domain::connection::ConnectionId;
use crate::domain::error::BrokerError;
use crate::domain::identity::AppId;
use crate::domain::namespace::{NamespaceDescriptor, SubscriptionKey};

#[derive(Debug, Default)]
struct NamespaceInner {
    /// Set while unregistration drains the entry; late holders of the Arc
    /// observe it and report `NamespaceNotFound`.
    removed: bool,
    topics: BTreeSet<String>,
    subscribers: HashMap<SubscriptionKey, HashSet<ConnectionId>>,
}

struct NamespaceEntry {
    /// Owner is fixed at creation; a namespace has exactly one owner for its
    /// whole lifetime.
    owner: AppId,
    inner: Mutex<NamespaceInner>,
}

/// Instruction to open a backend stream for a key that gained its first
/// subscriber.
#[derive(Debug, PartialEq, Eq)]
pub struct SubscribeEffect {
    pub open_stream: Option<SubscriptionKey>,
}

/// Instruction to close the backend stream for a key that lost its last
/// subscriber.
#[derive(Debug, PartialEq, Eq)]
pub struct UnsubscribeEffect {
    pub close_stream: Option<SubscriptionKey>,
}

/// Cleanup set produced by unregistering a namespace.
#[derive(Debug, Default)]
pub struct UnregisterEffect {
    /// Connections that held at least one subscription on the namespace.
    pub notify: Vec<ConnectionId>,
    /// Streams to close, one per key that had subscribers.
    pub close_streams: Vec<SubscriptionKey>,
}

#[derive(Default)]
pub struct NamespaceRegistry {
    namespaces: DashMap<String, Arc<NamespaceEntry>>,
}

impl NamespaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the namespace owned by `app_id`, or succeeds idempotently if
    /// it already exists with the same owner.
    pub fn register(&self, app_id: &AppId, namespace: &str) -> Result<(), BrokerError> {
        use dashmap::mapref::entry::Entry;

        match self.namespaces.entry(namespace.to_string()) {
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(NamespaceEntry {
                    owner: app_id.clone(),
                    inner: Mutex::new(NamespaceInner::default()),
                }));
                Ok(())
            }
            Entry::Occupied(entry) => {
                if entry.get().owner == *app_id {
                    Ok(())
                } else {
                    Err(BrokerError::NamespaceConflict {
                        namespace: namespace.to_string(),
                    })
                }
            }
        }
    }

    /// Destroys the namespace, draining its subscriptions. Only the owner may
    /// unregister.
    pub async fn unregister(
        &self,
        app_id: &AppId,
        namespace: &str,
    ) -> Result<UnregisterEffect, BrokerError> {
        let entry = self.get(namespace)?;
        if entry.owner != *app_id {
            return Err(BrokerError::NotAuthorized {
                app_id: app_id.clone(),
                namespace: namespace.to_string(),
            });
        }

        // Unlink first so no new lookup finds the namespace, then drain under
        // the entry lock. Holders that already fetched the Arc observe the
        // removed flag.
        self.namespaces.remove(namespace);

        let mut inner = entry.inner.lock().await;
        inner.removed = true;

        let mut effect = UnregisterEffect::default();
        let mut notified = HashSet::new();
        for (key, connections) in inner.subscribers.drain() {
            effect.close_streams.push(key);
            for connection in connections {
                if notified.insert(connection) {
                    effect.notify.push(connection);
                }
            }
        }
        Ok(effect)
    }

    /// Verifies that `app_id` may publish on the namespace and records the
    /// (lazily created) topic. The caller hands the notification to the
    /// backend afterwards.
    pub async fn authorize_publish(
        &self,
        app_id: &AppId,
        namespace: &str,
        topic: &str,
    ) -> Result<(), BrokerError> {
        let entry = self.get(namespace)?;
        if entry.owner != *app_id {
            return Err(BrokerError::NotAuthorized {
                app_id: app_id.clone(),
                namespace: namespace.to_string(),
            });
        }

        let mut inner = entry.inner.lock().await;
        if inner.removed {
            return Err(BrokerError::NamespaceNotFound {
                namespace: namespace.to_string(),
            });
        }
        inner.topics.insert(topic.to_string());
        Ok(())
    }

    /// Adds a (namespace, topic, connection) subscription. The triple is
    /// unique; resubscribing is idempotent.
    pub async fn subscribe(
        &self,
        connection: ConnectionId,
        namespace: &str,
        topic: Option<&str>,
    ) -> Result<SubscribeEffect, BrokerError> {
        let entry = self.get(namespace)?;
        let mut inner = entry.inner.lock().await;
        if inner.removed {
            return Err(BrokerError::NamespaceNotFound {
                namespace: namespace.to_string(),
            });
        }

        if let Some(topic) = topic {
            inner.topics.insert(topic.to_string());
        }

        let key = SubscriptionKey {
            namespace: namespace.to_string(),
            topic: topic.map(str::to_string),
        };
        let subscribers = inner.subscribers.entry(key.clone()).or_default();
        let first = subscribers.is_empty();
        subscribers.insert(connection);

        Ok(SubscribeEffect {
            open_stream: first.then_some(key),
        })
    }

    pub async fn unsubscribe(
        &self,
        connection: ConnectionId,
        namespace: &str,
        topic: Option<&str>,
    ) -> Result<UnsubscribeEffect, BrokerError> {
        let entry = self.get(namespace)?;
        let mut inner = entry.inner.lock().await;

        let key = SubscriptionKey {
            namespace: namespace.to_string(),
            topic: topic.map(str::to_string),
        };
        let now_empty = match inner.subscribers.get_mut(&key) {
            Some(subscribers) => {
                subscribers.remove(&connection);
                subscribers.is_empty()
            }
            None => false,
        };
        let mut close = None;
        if now_empty {
            inner.subscribers.remove(&key);
            close = Some(key);
        }
        Ok(UnsubscribeEffect { close_stream: close })
    }

    /// Drops every subscription held by `connection`; returns the keys whose
    /// streams lost their last subscriber.
    pub async fn remove_connection(&self, connection: ConnectionId) -> Vec<SubscriptionKey> {
        let entries: Vec<Arc<NamespaceEntry>> = self
            .namespaces
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let mut closed = Vec::new();
        for entry in entries {
            let mut inner = entry.inner.lock().await;
            let emptied: Vec<SubscriptionKey> = inner
                .subscribers
                .iter_mut()
                .filter_map(|(key, subscribers)| {
                    subscribers.remove(&connection);
                    subscribers.is_empty().then(|| key.clone())
                })
                .collect();
            for key in emptied {
                inner.subscribers.remove(&key);
                closed.push(key);
            }
        }
        closed
    }

    /// Connections subscribed under exactly this stream key.
    pub async fn subscribers_for(&self, key: &SubscriptionKey) -> Vec<ConnectionId> {
        let Ok(entry) = self.get(&key.namespace) else {
            return Vec::new();
        };
        let inner = entry.inner.lock().await;
        inner
            .subscribers
            .get(key)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Subscription keys currently held by one connection.
    pub async fn subscriptions_of(&self, connection: ConnectionId) -> Vec<SubscriptionKey> {
        let entries: Vec<Arc<NamespaceEntry>> = self
            .namespaces
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let mut held = Vec::new();
        for entry in entries {
            let inner = entry.inner.lock().await;
            for (key, subscribers) in &inner.subscribers {
                if subscribers.contains(&connection) {
                    held.push(key.clone());
                }
            }
        }
        held.sort_by_key(|key| key.to_string());
        held
    }

    /// Every registered namespace with the topics seen so far.
    pub async fn list(&self) -> Vec<NamespaceDescriptor> {
        let entries: Vec<(String, Arc<NamespaceEntry>)> = self
            .namespaces
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut listing = Vec::with_capacity(entries.len());
        for (name, entry) in entries {
            let inner = entry.inner.lock().await;
            if inner.removed {
                continue;
            }
            listing.push(NamespaceDescriptor {
                name,
                topics: inner.topics.iter().cloned().collect(),
            });
        }
        listing.sort_by(|a, b| a.name.cmp(&b.name));
        listing
    }

    fn get(&self, namespace: &str) -> Result<Arc<NamespaceEntry>, BrokerError> {
        self.namespaces
            .get(namespace)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| BrokerError::NamespaceNotFound {
                namespace: namespace.to_string(),
            })
    }
}
