// src/metrics/reporter.rs
use crate::proxy::{BackendPool, BackendSnapshot};
use std::sync::Arc;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Dumps one `STATS` line per backend on a fixed interval.
pub struct StatsReporter {
    pool: Arc<BackendPool>,
    interval: Duration,
    shutdown: CancellationToken,
}

impl StatsReporter {
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

        loop {
            tokio::select! {
                _ = ticker.tick() => log_stats(&self.pool).await,
                _ = self.shutdown.cancelled() => break,
            }
        }
    }
}

pub async fn log_stats(pool: &BackendPool) {
    for snapshot in pool.snapshot().await {
        info!("{}", format_stats(&snapshot));
    }
}

pub fn format_stats(snapshot: &BackendSnapshot) -> String {
    format!(
        "STATS: <{}> failed={} downtime={:?} requests={} errors={} transferred={} last={}",
        snapshot.address,
        snapshot.failed,
        snapshot.downtime,
        snapshot.requests,
        snapshot.errors,
        snapshot.transferred,
        snapshot.last_touched.to_rfc3339(),
    )
}
