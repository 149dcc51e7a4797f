// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # AEGIS Edge Broker Daemon
//!
//! The `aegis-edge` binary runs the edge notification broker: it loads the
//! JSON configuration, connects the selected message-broker backend (fatal
//! if unreachable), wires the identity resolver to the validation service
//! and serves the mutual-TLS API endpoint plus the open push endpoint until
//! SIGINT.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use edge_core::application::broker::EdgeBroker;
use edge_core::application::identity::IdentityResolver;
use edge_core::domain::config::EdgeConfig;
use edge_core::infrastructure::broker::create_msg_broker;
use edge_core::infrastructure::validation::GrpcIdentityLookup;
use edge_core::presentation::server::EdgeServer;

/// AEGIS Edge Broker - notification routing for edge applications
#[derive(Parser)]
#[command(name = "aegis-edge")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the broker configuration file
    #[arg(
        short,
        long,
        env = "AEGIS_EDGE_CONFIG",
        value_name = "FILE",
        default_value = "configs/edge.json"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "AEGIS_EDGE_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Serve Prometheus metrics on this address
    #[arg(long, env = "AEGIS_EDGE_METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone())),
        )
        .init();

    if let Some(addr) = cli.metrics_addr {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to install Prometheus exporter")?;
        info!(%addr, "metrics exporter listening");
    }

    let config = EdgeConfig::from_file(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    // Backend connect failure is fatal: the broker cannot start without it.
    let backend = create_msg_broker(&config.msg_broker)
        .await
        .context("connecting message broker backend")?;

    let lookup = Arc::new(
        GrpcIdentityLookup::new(&config.validation_endpoint, config.lookup_timeout)
            .context("configuring validation service client")?,
    );
    let resolver = Arc::new(IdentityResolver::new(lookup, config.certs.common_name.clone()));

    let broker = EdgeBroker::new(
        backend,
        config.heartbeat_interval,
        config.send_queue_capacity,
    );

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            signal_token.cancel();
        }
    });

    let server = EdgeServer::new(config, broker, resolver);
    if let Err(e) = server.run(shutdown).await {
        error!(error = %e, "edge broker exited with error");
        return Err(e.into());
    }

    info!("edge broker stopped gracefully");
    Ok(())
}
