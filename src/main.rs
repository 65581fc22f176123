//! EVM Gateway daemon
//!
//! Connects to the configured node, loads the startup account and keeps the
//! connection under a periodic health check until shut down.

use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use evm_gateway::config::{GatewayOptions, Settings};
use evm_gateway::metrics::MetricsServer;
use evm_gateway::Gateway;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting EVM Gateway v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    let gateway = Arc::new(Gateway::new(GatewayOptions::from(&settings)));

    // Connect to the startup node, if any
    match settings.node.url.as_deref().map(str::trim) {
        Some(url) if !url.is_empty() => match gateway.configure_node(url).await {
            Ok(status) => info!(
                "Connected to {} (chain {}, block {})",
                status.url, status.chain_id, status.block_number
            ),
            Err(e) => warn!("Startup node {} is not reachable: {}", url, e),
        },
        _ => info!("No node configured; waiting for runtime configuration"),
    }

    // Load the startup account from the environment
    if let Some(var) = &settings.account.private_key_env {
        if std::env::var_os(var).is_some() {
            match gateway.set_account_from_env(var).await {
                Ok(address) => info!("Startup account {} loaded from {}", address, var),
                Err(e) => warn!("Could not load startup account from {}: {}", var, e),
            }
        } else {
            warn!("Account key variable {} is not set", var);
        }
    }

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Health check loop
    let health_handle = tokio::spawn({
        let gateway = gateway.clone();
        let interval = settings.health_check_interval_secs;
        async move {
            loop {
                tokio::time::sleep(tokio::time::Duration::from_secs(interval)).await;

                if !gateway.health_check().await {
                    warn!(
                        "Node health check failed (phase: {:?})",
                        gateway.connection_phase().await
                    );
                }
            }
        }
    });

    info!("EVM Gateway is running");
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    gateway.clear_account().await;

    // Abort background tasks
    health_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("EVM Gateway stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,evm_gateway=debug,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
