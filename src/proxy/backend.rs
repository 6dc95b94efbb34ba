// src/proxy/backend.rs
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Failed,
}

#[derive(Debug)]
struct HealthState {
    status: HealthStatus,
    failed_time: Option<DateTime<Utc>>,
    downtime: Duration,
    timestamp: DateTime<Utc>,
}

/// One configured upstream and its health/statistics record.
///
/// The address never changes. Health fields move together under one lock so a
/// reader never sees `failed` without a matching `failed_time`; the counters are
/// plain atomics since they only ever grow.
#[derive(Debug)]
pub struct Backend {
    pub address: String,

    requests: AtomicU64,
    errors: AtomicU64,
    transferred: AtomicU64,
    state: RwLock<HealthState>,
}

impl Backend {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            requests: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            transferred: AtomicU64::new(0),
            state: RwLock::new(HealthState {
                status: HealthStatus::Healthy,
                failed_time: None,
                downtime: Duration::ZERO,
                timestamp: Utc::now(),
            }),
        }
    }

    pub async fn status(&self) -> HealthStatus {
        self.state.read().await.status
    }

    pub async fn is_failed(&self) -> bool {
        self.status().await == HealthStatus::Failed
    }

    /// A connection was handed off to this backend.
    pub async fn record_request(&self) {
        self.record_request_at(Utc::now()).await
    }

    pub(crate) async fn record_request_at(&self, now: DateTime<Utc>) {
        let mut state = self.state.write().await;
        self.requests.fetch_add(1, Ordering::Relaxed);
        state.timestamp = now;
    }

    /// A connect or probe attempt failed.
    ///
    /// Returns `true` when this call moved the backend from healthy to failed.
    pub async fn record_failure(&self) -> bool {
        self.record_failure_at(Utc::now()).await
    }

    pub(crate) async fn record_failure_at(&self, now: DateTime<Utc>) -> bool {
        let mut state = self.state.write().await;
        self.errors.fetch_add(1, Ordering::Relaxed);
        state.timestamp = now;

        if state.status == HealthStatus::Failed {
            return false;
        }
        state.status = HealthStatus::Failed;
        state.failed_time = Some(now);
        true
    }

    /// A probe connected successfully.
    ///
    /// Returns the downtime accumulated by this recovery, or `None` if the
    /// backend was already healthy.
    pub async fn record_probe_success(&self) -> Option<Duration> {
        self.record_probe_success_at(Utc::now()).await
    }

    pub(crate) async fn record_probe_success_at(&self, now: DateTime<Utc>) -> Option<Duration> {
        let mut state = self.state.write().await;
        state.timestamp = now;

        if state.status == HealthStatus::Healthy {
            return None;
        }

        let outage = state
            .failed_time
            .take()
            .and_then(|since| (now - since).to_std().ok())
            .unwrap_or(Duration::ZERO);
        state.downtime += outage;
        state.status = HealthStatus::Healthy;
        Some(outage)
    }

    pub fn add_transferred(&self, bytes: u64) {
        self.transferred.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn transferred(&self) -> u64 {
        self.transferred.load(Ordering::Relaxed)
    }

    pub async fn downtime(&self) -> Duration {
        self.state.read().await.downtime
    }

    pub async fn snapshot(&self) -> BackendSnapshot {
        let state = self.state.read().await;
        BackendSnapshot {
            address: self.address.clone(),
            failed: state.status == HealthStatus::Failed,
            failed_since: state.failed_time,
            downtime: state.downtime,
            requests: self.requests(),
            errors: self.errors(),
            transferred: self.transferred(),
            last_touched: state.timestamp,
        }
    }
}

/// Point-in-time copy of a backend's record, used for stats dumps.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendSnapshot {
    pub address: String,
    pub failed: bool,
    pub failed_since: Option<DateTime<Utc>>,
    #[serde(rename = "downtime_secs", serialize_with = "serialize_secs")]
    pub downtime: Duration,
    pub requests: u64,
    pub errors: u64,
    pub transferred: u64,
    pub last_touched: DateTime<Utc>,
}

fn serialize_secs<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(value.as_secs_f64())
}
