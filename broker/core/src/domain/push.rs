// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Push-channel wire frames.
//!
//! The open endpoint speaks JSON text frames over a websocket: the client
//! sends subscription management frames and heartbeat acknowledgments, the
//! server pushes notifications, heartbeats, namespace-removal events and
//! per-request acks.

use serde::{Deserialize, Serialize};

use crate::domain::namespace::SubscriptionKey;
use crate::domain::notification::Notification;

/// Server-to-client frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PushFrame {
    /// A delivered notification.
    Notification(Notification),

    /// Liveness probe; the client answers with `heartbeat_ack`.
    Heartbeat,

    /// The namespace was unregistered; all subscriptions on it are gone and
    /// the client may resubscribe elsewhere or fail gracefully.
    NamespaceRemoved { namespace: String },

    /// Answer to a subscribe/unsubscribe frame. `error` is `None` on success,
    /// otherwise exactly one error kind.
    Ack {
        action: String,
        namespace: String,
        topic: Option<String>,
        error: Option<String>,
    },

    /// Answer to `list_subscriptions`: everything this connection holds.
    SubscriptionList { subscriptions: Vec<SubscriptionKey> },
}

/// Client-to-server frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientFrame {
    Subscribe {
        namespace: String,
        topic: Option<String>,
    },
    Unsubscribe {
        namespace: String,
        topic: Option<String>,
    },
    ListSubscriptions,
    HeartbeatAck,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frame_wire_form() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"action":"subscribe","namespace":"sensors","topic":"temp"}"#)
                .unwrap();
        assert!(matches!(
            frame,
            ClientFrame::Subscribe { ref namespace, ref topic }
                if namespace == "sensors" && topic.as_deref() == Some("temp")
        ));

        let wildcard: ClientFrame =
            serde_json::from_str(r#"{"action":"subscribe","namespace":"sensors","topic":null}"#)
                .unwrap();
        assert!(matches!(
            wildcard,
            ClientFrame::Subscribe { topic: None, .. }
        ));
    }

    #[test]
    fn heartbeat_frame_is_tag_only() {
        let encoded = serde_json::to_string(&PushFrame::Heartbeat).unwrap();
        assert_eq!(encoded, r#"{"kind":"heartbeat"}"#);
    }
}
