// src/config/models.rs
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_PROBE_DELAY_MS: u64 = 30_000;
pub const DEFAULT_STATS_INTERVAL_MS: u64 = 15 * 60 * 1_000;

/// Immutable runtime configuration handed to the pool and the accept loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Address the proxy listens on (`host:port`).
    pub listen: String,

    /// Backends in fallback priority order; the first entry is tried first.
    pub backends: Vec<String>,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_probe_delay_ms")]
    pub probe_delay_ms: u64,

    #[serde(default = "default_stats_interval_ms")]
    pub stats_interval_ms: u64,

    /// Probe every backend once before accepting traffic.
    #[serde(default)]
    pub probe_on_start: bool,

    #[serde(default)]
    pub debug: bool,

    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Send log lines to the local syslog daemon.
    #[serde(default)]
    pub syslog: bool,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_metrics_listen")]
    pub listen: String,

    #[serde(default = "default_metrics_path")]
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_metrics_listen(),
            path: default_metrics_path(),
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_probe_delay_ms() -> u64 {
    DEFAULT_PROBE_DELAY_MS
}

fn default_stats_interval_ms() -> u64 {
    DEFAULT_STATS_INTERVAL_MS
}

fn default_metrics_listen() -> String {
    "127.0.0.1:9090".to_string()
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

impl Config {
    /// Build a config with default timings for the given addresses.
    pub fn new(listen: impl Into<String>, backends: Vec<String>) -> Self {
        Self {
            listen: listen.into(),
            backends,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            probe_delay_ms: DEFAULT_PROBE_DELAY_MS,
            stats_interval_ms: DEFAULT_STATS_INTERVAL_MS,
            probe_on_start: false,
            debug: false,
            log_file: None,
            syslog: false,
            metrics: MetricsConfig::default(),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn probe_delay(&self) -> Duration {
        Duration::from_millis(self.probe_delay_ms)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.listen.trim().is_empty() {
            bail!("listen address must not be empty");
        }
        if self.backends.is_empty() {
            bail!("at least one backend address is required");
        }

        let mut seen = HashSet::new();
        for address in &self.backends {
            validate_host_port(address)?;
            if !seen.insert(address.as_str()) {
                bail!("backend {} is listed more than once", address);
            }
        }

        if self.connect_timeout_ms == 0 {
            bail!("connect timeout must be greater than zero");
        }
        if self.probe_delay_ms == 0 {
            bail!("probe delay must be greater than zero");
        }
        if self.stats_interval_ms == 0 {
            bail!("stats interval must be greater than zero");
        }

        if self.syslog && self.log_file.is_some() {
            bail!("syslog and a log file are mutually exclusive");
        }

        if self.metrics.enabled {
            if self.metrics.listen.parse::<SocketAddr>().is_err() {
                bail!("invalid metrics listen address: {}", self.metrics.listen);
            }
            if !self.metrics.path.starts_with('/') {
                bail!("metrics path must start with '/': {}", self.metrics.path);
            }
        }

        Ok(())
    }
}

fn validate_host_port(address: &str) -> Result<()> {
    let Some((host, port)) = address.rsplit_once(':') else {
        bail!("backend {} is not in host:port form", address);
    };
    if host.is_empty() {
        bail!("backend {} has an empty host", address);
    }
    if port.parse::<u16>().is_err() {
        bail!("backend {} has an invalid port", address);
    }
    Ok(())
}
