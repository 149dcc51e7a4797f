// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Live connection tracking.
//!
//! Every accepted push-channel connection gets a handle with an independent
//! bounded send queue. The websocket task owns the receiving side; fan-out
//! and the heartbeat driver only ever `try_send`, so a stalled socket never
//! delays delivery to other connections.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::domain::connection::{ConnectionId, ConnectionState, Liveness, LivenessTracker};
use crate::domain::identity::AppId;
use crate::domain::push::PushFrame;

/// Result of a non-blocking enqueue onto a connection's send queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Enqueued,
    /// Queue full: the new frame is dropped for this connection only.
    Dropped,
    /// The connection is gone; the frame is discarded.
    Closed,
}

pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub app_id: AppId,
    sender: mpsc::Sender<PushFrame>,
    liveness: parking_lot::Mutex<LivenessTracker>,
    state: parking_lot::Mutex<ConnectionState>,
    closed: CancellationToken,
}

impl ConnectionHandle {
    /// Wait-free enqueue; backpressure policy is drop-new.
    pub fn try_push(&self, frame: PushFrame) -> PushOutcome {
        match self.sender.try_send(frame) {
            Ok(()) => PushOutcome::Enqueued,
            Err(mpsc::error::TrySendError::Full(_)) => PushOutcome::Dropped,
            Err(mpsc::error::TrySendError::Closed(_)) => PushOutcome::Closed,
        }
    }

    pub fn record_traffic(&self, now: Instant) {
        self.liveness.lock().record_traffic(now);
    }

    pub fn advance_liveness(&self, now: Instant) -> Liveness {
        self.liveness.lock().advance(now)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Token cancelled when the connection is being torn down; the websocket
    /// task selects on it to close the socket.
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    fn begin_close(&self) {
        self.state.lock().advance_to(ConnectionState::Closing);
        self.closed.cancel();
    }

    fn finish_close(&self) {
        self.state.lock().advance_to(ConnectionState::Closed);
    }
}

pub struct ConnectionManager {
    connections: DashMap<ConnectionId, Arc<ConnectionHandle>>,
    queue_capacity: usize,
    heartbeat_interval: Duration,
}

impl ConnectionManager {
    pub fn new(queue_capacity: usize, heartbeat_interval: Duration) -> Self {
        Self {
            connections: DashMap::new(),
            queue_capacity,
            heartbeat_interval,
        }
    }

    /// Registers a new live connection and hands back the queue's receiving
    /// side for the owning websocket task.
    pub fn attach(&self, app_id: AppId) -> (Arc<ConnectionHandle>, mpsc::Receiver<PushFrame>) {
        let (sender, receiver) = mpsc::channel(self.queue_capacity);
        let handle = Arc::new(ConnectionHandle {
            id: ConnectionId::new(),
            app_id,
            sender,
            liveness: parking_lot::Mutex::new(LivenessTracker::new(
                Instant::now(),
                self.heartbeat_interval,
            )),
            state: parking_lot::Mutex::new(ConnectionState::Active),
            closed: CancellationToken::new(),
        });
        self.connections.insert(handle.id, handle.clone());
        (handle, receiver)
    }

    /// Removes the connection and drives its lifecycle to `Closed`. The send
    /// queue dies with the last handle clone.
    pub fn detach(&self, id: ConnectionId) -> Option<Arc<ConnectionHandle>> {
        let (_, handle) = self.connections.remove(&id)?;
        handle.begin_close();
        handle.finish_close();
        Some(handle)
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(&id).map(|entry| entry.value().clone())
    }

    pub fn snapshot(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn full_queue_drops_new_frames_only() {
        let manager = ConnectionManager::new(2, Duration::from_secs(10));
        let (handle, mut receiver) = manager.attach(AppId::from("testapp"));

        assert_eq!(handle.try_push(PushFrame::Heartbeat), PushOutcome::Enqueued);
        assert_eq!(handle.try_push(PushFrame::Heartbeat), PushOutcome::Enqueued);
        assert_eq!(handle.try_push(PushFrame::Heartbeat), PushOutcome::Dropped);

        // Draining one slot makes room again
        assert!(receiver.recv().await.is_some());
        assert_eq!(handle.try_push(PushFrame::Heartbeat), PushOutcome::Enqueued);
    }

    #[tokio::test]
    async fn detach_closes_the_lifecycle() {
        let manager = ConnectionManager::new(4, Duration::from_secs(10));
        let (handle, receiver) = manager.attach(AppId::from("testapp"));
        let id = handle.id;

        drop(receiver);
        let detached = manager.detach(id).unwrap();
        assert_eq!(detached.state(), ConnectionState::Closed);
        assert!(detached.closed_token().is_cancelled());
        assert_eq!(detached.try_push(PushFrame::Heartbeat), PushOutcome::Closed);
        assert!(manager.get(id).is_none());
    }
}
