// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Websocket push channel served on the open endpoint.
//!
//! One task per connection owns both socket directions: it drains the
//! connection's bounded send queue into the socket and handles inbound
//! subscribe/unsubscribe/heartbeat-ack frames. Any inbound frame counts as
//! liveness traffic. A stalled socket only ever stalls its own task; fan-out
//! and heartbeats touch nothing but the queue.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::{Extension, Router};
use std::sync::Arc;
use tokio::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::application::broker::EdgeBroker;
use crate::application::connections::ConnectionHandle;
use crate::domain::identity::ResolvedIdentity;
use crate::domain::namespace::valid_name;
use crate::domain::push::{ClientFrame, PushFrame};

#[derive(Clone)]
pub struct PushState {
    pub broker: Arc<EdgeBroker>,
}

/// Router for one resolved push-channel connection.
pub fn push_router(broker: Arc<EdgeBroker>, identity: ResolvedIdentity) -> Router {
    Router::new()
        .route("/v1/notifications", get(open_push_channel))
        .layer(Extension(identity))
        .layer(TraceLayer::new_for_http())
        .with_state(PushState { broker })
}

async fn open_push_channel(
    ws: WebSocketUpgrade,
    State(state): State<PushState>,
    Extension(identity): Extension<ResolvedIdentity>,
) -> Response {
    ws.on_upgrade(move |socket| run_push_channel(socket, state.broker, identity))
}

async fn run_push_channel(
    mut socket: WebSocket,
    broker: Arc<EdgeBroker>,
    identity: ResolvedIdentity,
) {
    let (handle, mut queue) = broker.attach_connection(identity.app_id().clone());
    let closed = handle.closed_token();
    info!(connection = %handle.id, app_id = %handle.app_id, "push channel open");

    loop {
        tokio::select! {
            _ = closed.cancelled() => {
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
            frame = queue.recv() => match frame {
                Some(frame) => match serde_json::to_string(&frame) {
                    Ok(text) => {
                        if socket.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(connection = %handle.id, error = %e, "unencodable push frame"),
                },
                None => break,
            },
            inbound = socket.recv() => match inbound {
                Some(Ok(message)) => {
                    handle.record_traffic(Instant::now());
                    if let Message::Text(text) = message {
                        handle_client_frame(&broker, &handle, &text).await;
                    }
                }
                Some(Err(e)) => {
                    debug!(connection = %handle.id, error = %e, "push channel read error");
                    break;
                }
                None => break,
            }
        }
    }

    broker.teardown_connection(handle.id).await;
    info!(connection = %handle.id, app_id = %handle.app_id, "push channel closed");
}

async fn handle_client_frame(broker: &EdgeBroker, handle: &ConnectionHandle, text: &str) {
    let frame = match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(connection = %handle.id, error = %e, "undecodable client frame");
            return;
        }
    };

    match frame {
        ClientFrame::Subscribe { namespace, topic } => {
            let error = subscribe(broker, handle, &namespace, topic.as_deref()).await;
            let _ = handle.try_push(PushFrame::Ack {
                action: "subscribe".to_string(),
                namespace,
                topic,
                error,
            });
        }
        ClientFrame::Unsubscribe { namespace, topic } => {
            let error = unsubscribe(broker, handle, &namespace, topic.as_deref()).await;
            let _ = handle.try_push(PushFrame::Ack {
                action: "unsubscribe".to_string(),
                namespace,
                topic,
                error,
            });
        }
        ClientFrame::ListSubscriptions => {
            let subscriptions = broker.list_subscriptions(handle.id).await;
            let _ = handle.try_push(PushFrame::SubscriptionList { subscriptions });
        }
        // Traffic was already recorded; nothing else to do.
        ClientFrame::HeartbeatAck => {}
    }
}

async fn subscribe(
    broker: &EdgeBroker,
    handle: &ConnectionHandle,
    namespace: &str,
    topic: Option<&str>,
) -> Option<String> {
    if let Some(reason) = check_names(namespace, topic) {
        return Some(reason);
    }
    broker
        .subscribe(handle.id, namespace, topic)
        .await
        .err()
        .map(|e| e.to_string())
}

async fn unsubscribe(
    broker: &EdgeBroker,
    handle: &ConnectionHandle,
    namespace: &str,
    topic: Option<&str>,
) -> Option<String> {
    if let Some(reason) = check_names(namespace, topic) {
        return Some(reason);
    }
    broker
        .unsubscribe(handle.id, namespace, topic)
        .await
        .err()
        .map(|e| e.to_string())
}

fn check_names(namespace: &str, topic: Option<&str>) -> Option<String> {
    if !valid_name(namespace) {
        return Some(format!("invalid namespace name: {namespace}"));
    }
    if let Some(topic) = topic {
        if !valid_name(topic) {
            return Some(format!("invalid topic name: {topic}"));
        }
    }
    None
}
