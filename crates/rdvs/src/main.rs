#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use rdvs::config::{Args, ServerConfig};
use rdvs::metrics::start_metrics_server;
use rdvs::{run_with_shutdown, ServerState};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config: ServerConfig = args.into();

    if let Err(e) = config.validate() {
        anyhow::bail!("configuration error: {}", e);
    }

    if let Some(metrics_addr) = config.metrics_addr {
        tokio::spawn(async move {
            if let Err(e) = start_metrics_server(metrics_addr).await {
                warn!("metrics server error: {}", e);
            }
        });
    }

    let listener = TcpListener::bind(config.listen).await?;
    info!("bound to {}", config.listen);

    let state = Arc::new(ServerState::new(config));

    run_with_shutdown(listener, state, async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("received shutdown signal"),
            Err(e) => {
                warn!("cannot listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        }
    })
    .await?;

    Ok(())
}
