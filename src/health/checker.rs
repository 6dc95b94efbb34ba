// src/health/checker.rs
use crate::proxy::BackendPool;
use std::sync::Arc;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Periodically re-probes failed backends so they can rejoin the rotation.
///
/// Healthy backends are never probed here; their health only changes through
/// real connection attempts.
pub struct HealthChecker {
    pool: Arc<BackendPool>,
    interval: Duration,
    shutdown: CancellationToken,
}

impl HealthChecker {
    pub fn new(pool: Arc<BackendPool>, interval: Duration, shutdown: CancellationToken) -> Self {
        Self {
            pool,
            interval,
            shutdown,
        }
    }

    pub async fn start(self) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Starting failed-backend prober with interval: {:?}", self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let recovered = self.pool.probe_failed().await;
                    if recovered > 0 {
                        info!(
                            "Probe pass complete: {} backend(s) recovered, {}/{} healthy",
                            recovered,
                            self.pool.healthy_count().await,
                            self.pool.backends().len()
                        );
                    } else {
                        debug!("Probe pass complete, nothing recovered");
                    }
                }
                _ = self.shutdown.cancelled() => {
                    info!("Prober shutting down");
                    break;
                }
            }
        }
    }
}
