// ────────────────────────────────
// src/proxy/proxy.rs
// Top-level wiring: pool, forwarder, background tasks and the accept loop.
// ────────────────────────────────

use super::{BackendPool, Forwarder};
use crate::config::Config;
use crate::metrics::MetricsCollector;
use crate::scheduler::Scheduler;
use crate::server::{ConnectionHandler, ServerBuilder};
use anyhow::Result;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct Proxy {
    config: Config,
    pool: Arc<BackendPool>,
    forwarder: Forwarder,
}

impl Proxy {
    pub fn new(config: Config, metrics: Option<Arc<MetricsCollector>>) -> Self {
        let mut pool = BackendPool::from_config(&config);
        let mut forwarder = Forwarder::new();
        if let Some(metrics) = metrics {
            pool = pool.with_metrics(metrics.clone());
            forwarder = forwarder.with_metrics(metrics);
        }

        Self {
            config,
            pool: Arc::new(pool),
            forwarder,
        }
    }

    pub fn pool(&self) -> Arc<BackendPool> {
        self.pool.clone()
    }

    /// Serve `listener` until `shutdown` is cancelled or accepting fails.
    ///
    /// Background probing and stats reporting live exactly as long as the
    /// accept loop. On a clean shutdown in-flight connections drain first.
    pub async fn run(&self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        if self.config.probe_on_start {
            self.pool.probe_all().await;
        }

        let background = shutdown.child_token();
        let scheduler = Scheduler::spawn(self.pool.clone(), &self.config, background.clone());

        let handler = ConnectionHandler::new(self.pool.clone(), self.forwarder.clone());
        let result = ServerBuilder::new(listener)
            .with_handler(handler)
            .with_shutdown(shutdown)
            .serve()
            .await;

        background.cancel();
        scheduler.join().await;
        info!("Proxy stopped");

        result
    }
}

// Custom error type for proxy operations
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("no backend available")]
    NoBackendAvailable,

    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("connection to {address} timed out after {timeout:?}")]
    ConnectTimeout { address: String, timeout: Duration },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
