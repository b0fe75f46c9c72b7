//! MeshCache node server binary.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use mcache_server::bootstrap::build_node;
use mcache_server::config::{ServerArgs, ServerConfig};
use mcache_server::http::{self, HttpState};
use mcache_server::server::handle_connection;

/// Connection drain grace on shutdown.
const DRAIN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::resolve(ServerArgs::parse())?;
    let node = build_node(config.clone())?;
    let monitor_driver = node.monitor.start();

    let http_state = HttpState {
        monitor: Arc::clone(&node.monitor),
        discovery: Arc::clone(&node.discovery) as _,
    };
    let http_listener = TcpListener::bind(config.http_addr()).await?;
    info!(addr = %config.http_addr(), "health surface listening");
    tokio::spawn(async move {
        if let Err(err) = axum::serve(http_listener, http::router(http_state)).await {
            error!(error = %err, "health surface failed");
        }
    });

    let listener = TcpListener::bind(config.listen_addr()).await?;
    info!(addr = %config.listen_addr(), node = %config.node_id, "listening");

    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                let context = node.context.clone();
                connections.spawn(async move {
                    if let Err(err) = handle_connection(stream, context).await {
                        warn!(peer = %peer, error = %err, "connection failed");
                    }
                });
                // Reap finished connections opportunistically.
                while connections.try_join_next().is_some() {}
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    info!("shutting down, draining connections");
    monitor_driver.stop();
    let drain = async {
        while connections.join_next().await.is_some() {}
    };
    if timeout(DRAIN_GRACE, drain).await.is_err() {
        warn!("drain grace elapsed, aborting remaining connections");
        connections.abort_all();
    }
    node.shutdown();
    Ok(())
}
