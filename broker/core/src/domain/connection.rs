// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Connection lifecycle and liveness.
//!
//! Lifecycle is monotonic: `Active → Closing → Closed`, no resurrection.
//! Liveness is an explicit finite-state machine driven by timestamps rather
//! than sleeps, so tests advance a paused clock instead of waiting:
//!
//! - a heartbeat is sent to every `Alive` connection each interval;
//! - one interval without inbound traffic moves the connection to
//!   `Suspected`;
//! - a second missed interval moves it to `Dead` and the connection is torn
//!   down, bounding resource growth from abandoned clients to two intervals;
//! - any inbound traffic returns a `Suspected` connection to `Alive`.

use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Monotonic connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    Active,
    Closing,
    Closed,
}

impl ConnectionState {
    /// Transitions only move forward; an attempt to go backwards is ignored
    /// and reported as `false`.
    pub fn advance_to(&mut self, next: ConnectionState) -> bool {
        if next >= *self {
            *self = next;
            true
        } else {
            false
        }
    }
}

/// Liveness verdict for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    Suspected,
    Dead,
}

/// Timestamp-driven liveness state machine, one per connection.
#[derive(Debug)]
pub struct LivenessTracker {
    state: Liveness,
    last_traffic: Instant,
    interval: Duration,
}

impl LivenessTracker {
    pub fn new(now: Instant, interval: Duration) -> Self {
        Self {
            state: Liveness::Alive,
            last_traffic: now,
            interval,
        }
    }

    pub fn state(&self) -> Liveness {
        self.state
    }

    /// Any inbound frame counts as traffic. `Dead` is terminal.
    pub fn record_traffic(&mut self, now: Instant) {
        if self.state == Liveness::Dead {
            return;
        }
        self.last_traffic = now;
        self.state = Liveness::Alive;
    }

    /// Re-evaluates the state at `now` and returns the verdict.
    pub fn advance(&mut self, now: Instant) -> Liveness {
        if self.state == Liveness::Dead {
            return Liveness::Dead;
        }
        let silent = now.saturating_duration_since(self.last_traffic);
        self.state = if silent >= self.interval * 2 {
            Liveness::Dead
        } else if silent >= self.interval {
            Liveness::Suspected
        } else {
            Liveness::Alive
        };
        self.state
    }
}
