// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! AEGIS Edge Notification Broker core runtime.
//!
//! Lets containerized/VM-hosted edge applications publish and receive event
//! notifications without trusting each other's network identity directly.
//!
//! # Architecture
//!
//! - **domain**: identities, namespaces, notifications, connection lifecycle
//!   and the error taxonomy
//! - **application**: identity resolver, namespace registry, delivery engine
//!   and heartbeat driver
//! - **infrastructure**: message-broker backends, validation-service client,
//!   TLS material
//! - **presentation**: REST API, websocket push channel, TLS accept loops

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
