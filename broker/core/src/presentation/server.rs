// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! TLS accept loops and per-connection dispatch.
//!
//! Two listeners: the mutual-TLS endpoint serving the REST API and the open
//! endpoint serving the websocket push channel. For every accepted
//! connection the identity is resolved exactly once, from the presented
//! client certificate's Common Name or, failing that, the validation
//! service keyed by source address, and cached in the router for the
//! connection's lifetime. Unresolved connections get a 401-only router and
//! never reach dispatch.

use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::broker::EdgeBroker;
use crate::application::identity::IdentityResolver;
use crate::domain::config::EdgeConfig;
use crate::domain::error::BrokerError;
use crate::infrastructure::tls;
use crate::presentation::{api, ws};

#[derive(Clone, Copy)]
enum EndpointKind {
    Api,
    Push,
}

pub struct EdgeServer {
    config: EdgeConfig,
    broker: Arc<EdgeBroker>,
    resolver: Arc<IdentityResolver>,
}

impl EdgeServer {
    pub fn new(config: EdgeConfig, broker: Arc<EdgeBroker>, resolver: Arc<IdentityResolver>) -> Self {
        Self {
            config,
            broker,
            resolver,
        }
    }

    /// Serves until `shutdown` fires, then tears the broker down. In-flight
    /// publishes finish or fail on their own; nothing new is accepted.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), BrokerError> {
        let api_tls = tls::server_config(&self.config.certs, true)?;
        let open_tls = tls::server_config(&self.config.certs, false)?;

        let api_listener = bind(self.config.tls_endpoint).await?;
        let open_listener = bind(self.config.open_endpoint).await?;
        info!(
            api = %self.config.tls_endpoint,
            push = %self.config.open_endpoint,
            "edge broker listening"
        );

        let heartbeat = self.broker.spawn_heartbeat_driver();

        let api_loop = tokio::spawn(accept_loop(
            api_listener,
            TlsAcceptor::from(api_tls),
            EndpointKind::Api,
            self.broker.clone(),
            self.resolver.clone(),
            shutdown.clone(),
        ));
        let push_loop = tokio::spawn(accept_loop(
            open_listener,
            TlsAcceptor::from(open_tls),
            EndpointKind::Push,
            self.broker.clone(),
            self.resolver.clone(),
            shutdown.clone(),
        ));

        shutdown.cancelled().await;
        self.broker.shutdown().await;

        let _ = api_loop.await;
        let _ = push_loop.await;
        let _ = heartbeat.await;
        Ok(())
    }
}

async fn bind(addr: SocketAddr) -> Result<TcpListener, BrokerError> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| BrokerError::Config(format!("failed to bind {addr}: {e}")))
}

async fn accept_loop(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    kind: EndpointKind,
    broker: Arc<EdgeBroker>,
    resolver: Arc<IdentityResolver>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let acceptor = acceptor.clone();
                    let broker = broker.clone();
                    let resolver = resolver.clone();
                    tokio::spawn(serve_connection(
                        stream, peer, acceptor, kind, broker, resolver,
                    ));
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                }
            }
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    acceptor: TlsAcceptor,
    kind: EndpointKind,
    broker: Arc<EdgeBroker>,
    resolver: Arc<IdentityResolver>,
) {
    let tls_stream = match acceptor.accept(stream).await {
        Ok(stream) => stream,
        Err(e) => {
            debug!(%peer, error = %e, "TLS handshake failed");
            return;
        }
    };

    let common_name = {
        let (_, connection) = tls_stream.get_ref();
        connection
            .peer_certificates()
            .and_then(|certs| certs.first())
            .and_then(tls::leaf_common_name)
    };

    // Resolution happens once here; handlers read the identity extension.
    let router = match resolver.resolve(common_name.as_deref(), peer.ip()).await {
        Ok(identity) => {
            debug!(%peer, app_id = %identity.app_id(), "connection resolved");
            match kind {
                EndpointKind::Api => api::api_router(broker, identity),
                EndpointKind::Push => ws::push_router(broker, identity),
            }
        }
        Err(e) => {
            warn!(%peer, error = %e, "rejecting unresolved connection");
            api::unauthorized_router(e.to_string())
        }
    };

    let service = TowerToHyperService::new(router);
    if let Err(e) = auto::Builder::new(TokioExecutor::new())
        .serve_connection_with_upgrades(TokioIo::new(tls_stream), service)
        .await
    {
        debug!(%peer, error = %e, "connection ended with error");
    }
}
