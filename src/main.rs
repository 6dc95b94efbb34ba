// src/main.rs
use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use tcp_fallback::{
    cli::Cli,
    logging,
    metrics::{start_metrics_server, MetricsRegistry},
    proxy::Proxy,
    server::bind_tcp,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Cli::parse().into_config().await?;

    let log_file = logging::init_logging(&config)?;
    let shutdown = CancellationToken::new();
    logging::watch_sighup(log_file, shutdown.clone())?;

    // Initialize metrics
    let metrics_registry = if config.metrics.enabled {
        Some(Arc::new(MetricsRegistry::new()?))
    } else {
        None
    };

    let proxy = Proxy::new(
        config.clone(),
        metrics_registry.as_ref().map(|registry| registry.collector()),
    );

    if let Some(registry) = metrics_registry {
        let addr: SocketAddr = config
            .metrics
            .listen
            .parse()
            .context("Invalid metrics listen address")?;
        start_metrics_server(
            addr,
            registry,
            proxy.pool(),
            config.metrics.path.clone(),
            shutdown.clone(),
        )
        .await?;
    }

    let listener = match bind_tcp(&config.listen).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("{:#}", e);
            return Err(e);
        }
    };
    info!(
        "Forwarding {} to {} backend(s): {}",
        config.listen,
        config.backends.len(),
        config.backends.join(", ")
    );

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    let result = proxy.run(listener, shutdown.clone()).await;
    shutdown.cancel();

    if let Err(e) = &result {
        error!("Fatal: {:#}", e);
    }
    result
}

// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
