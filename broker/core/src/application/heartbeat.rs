// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Heartbeat driver.
//!
//! A single periodic task probes every live connection: `Alive` connections
//! get a heartbeat frame, connections silent for one interval become
//! `Suspected`, and a second silent interval makes them `Dead`, at which
//! point the connection is torn down and all its subscriptions removed.
//! Probing uses the wait-free queue, so one stalled socket cannot delay
//! heartbeats to the rest.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::application::broker::EdgeBroker;
use crate::domain::connection::Liveness;
use crate::domain::error::BrokerError;
use crate::domain::push::PushFrame;

pub async fn run_heartbeat_driver(
    broker: Arc<EdgeBroker>,
    period: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately; skip it so connections get a full
    // interval before the first probe.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => probe_all(&broker).await,
        }
    }
    debug!("heartbeat driver stopped");
}

async fn probe_all(broker: &Arc<EdgeBroker>) {
    let now = Instant::now();
    for handle in broker.connections().snapshot() {
        match handle.advance_liveness(now) {
            Liveness::Alive => {
                // Queue-full is fine here: the liveness verdict is driven by
                // inbound traffic, not by whether this probe got through.
                let _ = handle.try_push(PushFrame::Heartbeat);
            }
            Liveness::Suspected => {
                debug!(connection = %handle.id, app_id = %handle.app_id, "connection suspected");
            }
            Liveness::Dead => {
                let reason = BrokerError::ConnectionTimeout {
                    connection: handle.id,
                };
                info!(app_id = %handle.app_id, error = %reason, "tearing down dead connection");
                metrics::counter!("edge_connections_expired_total").increment(1);
                broker.teardown_connection(handle.id).await;
            }
        }
    }
}
