use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;

use crate::config::{load_config, Config};

#[derive(Parser, Debug)]
#[command(
    name = "tcp-fallback",
    version,
    about = "Forward TCP connections to the first reachable backend",
    after_help = "With --config, listen/backend addresses and timings come from the file; \
                  --debug, --probe-on-start, --syslog, --logfile and --metrics still apply on top."
)]
pub struct Cli {
    /// Timeout for backend connection attempts and probes
    #[arg(long, value_name = "DURATION", default_value = "5s", value_parser = parse_duration)]
    pub timeout: Duration,

    /// Interval between probes of failed backends
    #[arg(long, value_name = "DURATION", default_value = "30s", value_parser = parse_duration)]
    pub probe_delay: Duration,

    /// Interval between stats dumps
    #[arg(long = "stats", value_name = "DURATION", default_value = "15m", value_parser = parse_duration)]
    pub stats_interval: Duration,

    /// Enable verbose logging
    #[arg(long)]
    pub debug: bool,

    /// Probe every backend once before accepting connections
    #[arg(long)]
    pub probe_on_start: bool,

    /// Append logs to this file instead of stderr (re-opened on SIGHUP)
    #[arg(long = "logfile", value_name = "PATH", conflicts_with = "syslog")]
    pub log_file: Option<PathBuf>,

    /// Send logs to the local syslog daemon instead of stderr
    #[arg(long)]
    pub syslog: bool,

    /// Serve Prometheus metrics and JSON stats on this address
    #[arg(long, value_name = "ADDR")]
    pub metrics: Option<SocketAddr>,

    /// Load configuration from a YAML or JSON file
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Address to listen on
    #[arg(value_name = "LISTEN")]
    pub listen: Option<String>,

    /// Backend addresses, in fallback order
    #[arg(value_name = "BACKEND")]
    pub backends: Vec<String>,
}

impl Cli {
    pub async fn into_config(self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => load_config(path).await?,
            None => {
                let Some(listen) = self.listen.clone() else {
                    bail!("missing <LISTEN> address");
                };
                if self.backends.is_empty() {
                    bail!("at least one <BACKEND> address is required");
                }

                let mut config = Config::new(listen, self.backends.clone());
                config.connect_timeout_ms = millis(self.timeout);
                config.probe_delay_ms = millis(self.probe_delay);
                config.stats_interval_ms = millis(self.stats_interval);
                config
            }
        };

        config.debug |= self.debug;
        config.probe_on_start |= self.probe_on_start;
        config.syslog |= self.syslog;
        if let Some(path) = self.log_file {
            config.log_file = Some(path);
        }
        if let Some(addr) = self.metrics {
            config.metrics.enabled = true;
            config.metrics.listen = addr.to_string();
        }

        config.validate()?;
        Ok(config)
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Parse `100ms`, `5s`, `15m`, `1h`; a bare number is seconds.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (number, unit) = input.split_at(split);

    let value: u64 = number
        .parse()
        .map_err(|_| format!("invalid duration '{}'", input))?;

    let duration = match unit {
        "ms" => Duration::from_millis(value),
        "" | "s" => Duration::from_secs(value),
        "m" => Duration::from_secs(value.saturating_mul(60)),
        "h" => Duration::from_secs(value.saturating_mul(3600)),
        other => return Err(format!("unknown duration unit '{}' in '{}'", other, input)),
    };
    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("100ms"), Ok(Duration::from_millis(100)));
        assert_eq!(parse_duration("5s"), Ok(Duration::from_secs(5)));
        assert_eq!(parse_duration("15m"), Ok(Duration::from_secs(900)));
        assert_eq!(parse_duration("1h"), Ok(Duration::from_secs(3600)));
        assert_eq!(parse_duration("7"), Ok(Duration::from_secs(7)));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("ms").is_err());
        assert!(parse_duration("5d").is_err());
        assert!(parse_duration("1.5s").is_err());
    }

    #[tokio::test]
    async fn test_positional_arguments() {
        let cli = Cli::try_parse_from([
            "tcp-fallback",
            "--probe-delay=100ms",
            "--timeout",
            "1s",
            "127.0.0.1:18080",
            "127.0.0.1:18081",
            "127.0.0.1:18082",
        ])
        .unwrap();

        let config = cli.into_config().await.unwrap();
        assert_eq!(config.listen, "127.0.0.1:18080");
        assert_eq!(config.backends, vec!["127.0.0.1:18081", "127.0.0.1:18082"]);
        assert_eq!(config.probe_delay(), Duration::from_millis(100));
        assert_eq!(config.connect_timeout(), Duration::from_secs(1));
        assert_eq!(config.stats_interval(), Duration::from_secs(900));
        assert!(!config.metrics.enabled);
    }

    #[tokio::test]
    async fn test_syslog_flag() {
        let cli = Cli::try_parse_from([
            "tcp-fallback",
            "--syslog",
            "127.0.0.1:18080",
            "127.0.0.1:18081",
        ])
        .unwrap();
        let config = cli.into_config().await.unwrap();
        assert!(config.syslog);
        assert_eq!(config.log_file, None);

        let both = Cli::try_parse_from([
            "tcp-fallback",
            "--syslog",
            "--logfile",
            "/tmp/proxy.log",
            "127.0.0.1:18080",
            "127.0.0.1:18081",
        ]);
        assert!(both.is_err());
    }

    #[tokio::test]
    async fn test_requires_a_backend() {
        let cli = Cli::try_parse_from(["tcp-fallback", "127.0.0.1:18080"]).unwrap();
        assert!(cli.into_config().await.is_err());
    }

    #[tokio::test]
    async fn test_config_file_with_flag_overrides() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "listen: \"127.0.0.1:3306\"\nbackends: [\"10.0.0.1:3306\"]\nprobe_delay_ms: 250"
        )
        .unwrap();

        let cli = Cli::try_parse_from([
            "tcp-fallback".to_string(),
            "--config".to_string(),
            file.path().display().to_string(),
            "--debug".to_string(),
            "--metrics".to_string(),
            "127.0.0.1:9191".to_string(),
        ])
        .unwrap();

        let config = cli.into_config().await.unwrap();
        assert_eq!(config.backends, vec!["10.0.0.1:3306"]);
        assert_eq!(config.probe_delay_ms, 250);
        assert!(config.debug);
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.listen, "127.0.0.1:9191");
    }
}
