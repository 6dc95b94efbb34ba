// src/scheduler.rs
//
// The two long-lived background tasks: stats dumps and failed-backend probing.

use crate::config::Config;
use crate::health::HealthChecker;
use crate::metrics::StatsReporter;
use crate::proxy::BackendPool;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::error;

pub struct Scheduler {
    stats: JoinHandle<()>,
    prober: JoinHandle<()>,
}

impl Scheduler {
    /// Start both tasks. They run until `shutdown` is cancelled.
    pub fn spawn(pool: Arc<BackendPool>, config: &Config, shutdown: CancellationToken) -> Self {
        let reporter = StatsReporter::new(pool.clone(), config.stats_interval(), shutdown.clone());
        let checker = HealthChecker::new(pool, config.probe_delay(), shutdown);

        Self {
            stats: tokio::spawn(reporter.start()),
            prober: tokio::spawn(checker.start()),
        }
    }

    pub async fn join(self) {
        let (stats, prober) = tokio::join!(self.stats, self.prober);
        if let Err(e) = stats {
            error!("Stats reporter task failed: {}", e);
        }
        if let Err(e) = prober {
            error!("Prober task failed: {}", e);
        }
    }
}
