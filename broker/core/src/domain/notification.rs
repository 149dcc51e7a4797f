// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An immutable published payload routed to subscribers.
///
/// This is also the backend wire form: notifications travel the message
/// broker serialized as JSON, with the payload carried as base64.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub namespace: String,
    pub topic: String,
    #[serde(with = "base64_bytes")]
    pub payload: Bytes,
    pub published_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(namespace: impl Into<String>, topic: impl Into<String>, payload: Bytes) -> Self {
        Self {
            namespace: namespace.into(),
            topic: topic.into(),
            payload,
            published_at: Utc::now(),
        }
    }
}

/// Opaque payload bytes as base64 in the JSON wire form.
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(payload: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(payload))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
