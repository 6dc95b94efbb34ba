// src/metrics/mod.rs
mod collector;
mod reporter;
mod server;

pub use collector::{MetricsCollector, MetricsRegistry};
pub use reporter::{format_stats, log_stats, StatsReporter};
pub use server::start_metrics_server;
