// src/metrics/collector.rs
use anyhow::Result;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use std::sync::Arc;

pub struct MetricsRegistry {
    registry: Registry,
    collector: Arc<MetricsCollector>,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let collector = Arc::new(MetricsCollector::new(&registry)?);

        Ok(Self {
            registry,
            collector,
        })
    }

    pub fn collector(&self) -> Arc<MetricsCollector> {
        self.collector.clone()
    }

    pub fn gather(&self) -> Result<Vec<u8>> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(buffer)
    }
}

pub struct MetricsCollector {
    // Backend metrics
    pub backend_requests_total: IntCounterVec,
    pub backend_errors_total: IntCounterVec,
    pub backend_transferred_bytes_total: IntCounterVec,
    pub backend_recoveries_total: IntCounterVec,
    pub backend_failed: IntGaugeVec,

    // Proxy metrics
    pub active_connections: IntGauge,
    pub no_backend_total: IntCounter,
}

impl MetricsCollector {
    pub fn new(registry: &Registry) -> Result<Self> {
        let backend_requests_total = IntCounterVec::new(
            Opts::new(
                "tcp_fallback_backend_requests_total",
                "Connections handed off to the backend",
            ),
            &["backend"],
        )?;
        registry.register(Box::new(backend_requests_total.clone()))?;

        let backend_errors_total = IntCounterVec::new(
            Opts::new(
                "tcp_fallback_backend_errors_total",
                "Failed connection and probe attempts",
            ),
            &["backend"],
        )?;
        registry.register(Box::new(backend_errors_total.clone()))?;

        let backend_transferred_bytes_total = IntCounterVec::new(
            Opts::new(
                "tcp_fallback_backend_transferred_bytes_total",
                "Bytes forwarded in either direction",
            ),
            &["backend"],
        )?;
        registry.register(Box::new(backend_transferred_bytes_total.clone()))?;

        let backend_recoveries_total = IntCounterVec::new(
            Opts::new(
                "tcp_fallback_backend_recoveries_total",
                "Failed to healthy transitions confirmed by a probe",
            ),
            &["backend"],
        )?;
        registry.register(Box::new(backend_recoveries_total.clone()))?;

        let backend_failed = IntGaugeVec::new(
            Opts::new(
                "tcp_fallback_backend_failed",
                "Backend health (1=failed, 0=healthy)",
            ),
            &["backend"],
        )?;
        registry.register(Box::new(backend_failed.clone()))?;

        let active_connections = IntGauge::new(
            "tcp_fallback_active_connections",
            "Forwarded connections currently open",
        )?;
        registry.register(Box::new(active_connections.clone()))?;

        let no_backend_total = IntCounter::new(
            "tcp_fallback_no_backend_total",
            "Client connections closed because no backend was reachable",
        )?;
        registry.register(Box::new(no_backend_total.clone()))?;

        Ok(Self {
            backend_requests_total,
            backend_errors_total,
            backend_transferred_bytes_total,
            backend_recoveries_total,
            backend_failed,
            active_connections,
            no_backend_total,
        })
    }

    pub fn record_backend_request(&self, backend: &str) {
        self.backend_requests_total.with_label_values(&[backend]).inc();
    }

    pub fn record_backend_error(&self, backend: &str) {
        self.backend_errors_total.with_label_values(&[backend]).inc();
    }

    pub fn record_transferred(&self, backend: &str, bytes: u64) {
        self.backend_transferred_bytes_total
            .with_label_values(&[backend])
            .inc_by(bytes);
    }

    pub fn record_recovery(&self, backend: &str) {
        self.backend_recoveries_total.with_label_values(&[backend]).inc();
    }

    pub fn update_backend_health(&self, backend: &str, failed: bool) {
        let value = if failed { 1 } else { 0 };
        self.backend_failed.with_label_values(&[backend]).set(value);
    }

    pub fn record_no_backend(&self) {
        self.no_backend_total.inc();
    }

    pub fn increment_active_connections(&self) {
        self.active_connections.inc();
    }

    pub fn decrement_active_connections(&self) {
        self.active_connections.dec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_exposes_backend_series() {
        let registry = MetricsRegistry::new().unwrap();
        let metrics = registry.collector();

        metrics.record_backend_request("db1:3306");
        metrics.record_backend_error("db2:3306");
        metrics.record_transferred("db1:3306", 128);
        metrics.update_backend_health("db2:3306", true);

        let text = String::from_utf8(registry.gather().unwrap()).unwrap();
        assert!(text.contains("tcp_fallback_backend_requests_total{backend=\"db1:3306\"} 1"));
        assert!(text.contains("tcp_fallback_backend_errors_total{backend=\"db2:3306\"} 1"));
        assert!(text.contains(
            "tcp_fallback_backend_transferred_bytes_total{backend=\"db1:3306\"} 128"
        ));
        assert!(text.contains("tcp_fallback_backend_failed{backend=\"db2:3306\"} 1"));
    }

    #[test]
    fn test_active_connections_gauge() {
        let registry = MetricsRegistry::new().unwrap();
        let metrics = registry.collector();
        metrics.increment_active_connections();
        metrics.increment_active_connections();
        metrics.decrement_active_connections();
        assert_eq!(metrics.active_connections.get(), 1);
    }
}
