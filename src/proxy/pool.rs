// src/proxy/pool.rs
use super::backend::{Backend, BackendSnapshot};
use super::proxy::ProxyError;
use crate::config::Config;
use crate::metrics::MetricsCollector;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Ordered set of backends. The order is the fallback priority and is fixed
/// for the lifetime of the pool.
pub struct BackendPool {
    backends: Vec<Arc<Backend>>,
    connect_timeout: Duration,
    metrics: Option<Arc<MetricsCollector>>,
}

impl BackendPool {
    pub fn new<S: AsRef<str>>(addresses: &[S], connect_timeout: Duration) -> Self {
        let backends = addresses
            .iter()
            .map(|address| Arc::new(Backend::new(address.as_ref())))
            .collect();

        Self {
            backends,
            connect_timeout,
            metrics: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.backends, config.connect_timeout())
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        for backend in &self.backends {
            metrics.update_backend_health(&backend.address, false);
        }
        self.metrics = Some(metrics);
        self
    }

    pub fn backends(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    pub async fn healthy_count(&self) -> usize {
        let mut healthy = 0;
        for backend in &self.backends {
            if !backend.is_failed().await {
                healthy += 1;
            }
        }
        healthy
    }

    /// Connect to the first non-failed backend in priority order.
    ///
    /// Every backend that refuses or times out is marked failed and the next
    /// one is tried. Iteration always restarts from the front, so traffic
    /// returns to the preferred backend as soon as a probe clears it.
    ///
    /// When every backend is already marked failed, the failed set is probed
    /// first so a client arriving after a total outage does not wait for the
    /// next scheduled probe pass.
    pub async fn select_and_connect(&self) -> Result<(TcpStream, Arc<Backend>), ProxyError> {
        if self.healthy_count().await == 0 {
            debug!("All backends marked failed, probing before selection");
            self.probe_failed().await;
        }

        for backend in &self.backends {
            if backend.is_failed().await {
                debug!("Skipping failed backend {}", backend.address);
                continue;
            }

            match self.connect(backend).await {
                Ok(stream) => {
                    backend.record_request().await;
                    if let Some(metrics) = &self.metrics {
                        metrics.record_backend_request(&backend.address);
                    }
                    return Ok((stream, backend.clone()));
                }
                Err(e) => {
                    info!("Failed to connect to backend {}: {}", backend.address, e);
                    self.record_failure(backend).await;
                }
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_no_backend();
        }
        Err(ProxyError::NoBackendAvailable)
    }

    /// Open and immediately close a connection to `backend`, updating its
    /// health. Returns whether the backend answered.
    pub async fn probe(&self, backend: &Backend) -> bool {
        match self.connect(backend).await {
            Ok(stream) => {
                drop(stream);
                if let Some(outage) = backend.record_probe_success().await {
                    info!(
                        downtime_secs = outage.as_secs_f64(),
                        "Backend is back {} after {:?}",
                        backend.address,
                        outage
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics.record_recovery(&backend.address);
                        metrics.update_backend_health(&backend.address, false);
                    }
                } else {
                    debug!("Probe of {} succeeded", backend.address);
                }
                true
            }
            Err(e) => {
                info!("Probe of backend {} failed: {}", backend.address, e);
                self.record_failure(backend).await;
                false
            }
        }
    }

    /// Probe every backend currently marked failed. Returns how many recovered.
    pub async fn probe_failed(&self) -> usize {
        let mut failed = Vec::new();
        for backend in &self.backends {
            if backend.is_failed().await {
                failed.push(backend.clone());
            }
        }

        if failed.is_empty() {
            return 0;
        }

        debug!("Probing {} failed backend(s)", failed.len());
        let results =
            futures::future::join_all(failed.iter().map(|backend| self.probe(backend))).await;
        results.into_iter().filter(|ok| *ok).count()
    }

    /// Probe every backend regardless of its current state.
    pub async fn probe_all(&self) {
        let results =
            futures::future::join_all(self.backends.iter().map(|backend| self.probe(backend)))
                .await;
        let healthy = results.iter().filter(|ok| **ok).count();

        info!(
            "Initial probe complete: {}/{} backends reachable",
            healthy,
            self.backends.len()
        );
    }

    pub async fn snapshot(&self) -> Vec<BackendSnapshot> {
        let mut snapshots = Vec::with_capacity(self.backends.len());
        for backend in &self.backends {
            snapshots.push(backend.snapshot().await);
        }
        snapshots
    }

    async fn connect(&self, backend: &Backend) -> Result<TcpStream, ProxyError> {
        match timeout(self.connect_timeout, TcpStream::connect(backend.address.as_str())).await {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("Failed to set TCP_NODELAY for {}: {}", backend.address, e);
                }
                Ok(stream)
            }
            Ok(Err(source)) => Err(ProxyError::Connect {
                address: backend.address.clone(),
                source,
            }),
            Err(_) => Err(ProxyError::ConnectTimeout {
                address: backend.address.clone(),
                timeout: self.connect_timeout,
            }),
        }
    }

    async fn record_failure(&self, backend: &Backend) {
        let newly_failed = backend.record_failure().await;

        if let Some(metrics) = &self.metrics {
            metrics.record_backend_error(&backend.address);
            metrics.update_backend_health(&backend.address, true);
        }

        if newly_failed {
            warn!(
                "Backend {} marked failed ({} errors so far)",
                backend.address,
                backend.errors()
            );
        }
    }
}
