// src/config/mod.rs
mod models;

pub use models::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a file (YAML or JSON)
pub async fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config file {}", path.display()))?;

    let config = parse_config(path, &contents)?;
    config.validate()?;
    Ok(config)
}

fn parse_config(path: &Path, contents: &str) -> Result<Config> {
    let extension = path.extension().and_then(|s| s.to_str());
    let config: Config = if matches!(extension, Some("yaml") | Some("yml")) {
        serde_yaml::from_str(contents).context("Failed to parse YAML config")?
    } else {
        serde_json::from_str(contents).context("Failed to parse JSON config")?
    };
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_yaml_applies_defaults() {
        let yaml = r#"
listen: "0.0.0.0:3306"
backends:
  - "10.0.0.1:3306"
  - "10.0.0.2:3306"
probe_delay_ms: 100
"#;
        let config = parse_config(Path::new("proxy.yaml"), yaml).unwrap();
        assert_eq!(config.backends.len(), 2);
        assert_eq!(config.backends[0], "10.0.0.1:3306");
        assert_eq!(config.probe_delay_ms, 100);
        assert_eq!(config.connect_timeout_ms, DEFAULT_CONNECT_TIMEOUT_MS);
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn test_parse_json() {
        let json = r#"{
            "listen": "127.0.0.1:8080",
            "backends": ["127.0.0.1:9001"],
            "metrics": { "enabled": true, "listen": "127.0.0.1:9100" }
        }"#;
        let config = parse_config(Path::new("proxy.json"), json).unwrap();
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.path, "/metrics");
    }

    #[tokio::test]
    async fn test_load_config_validates() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "listen: \"127.0.0.1:8080\"\nbackends: []").unwrap();

        let err = load_config(file.path()).await.unwrap_err();
        assert!(err.to_string().contains("at least one backend"));
    }

    #[tokio::test]
    async fn test_load_config_missing_file() {
        assert!(load_config("/nonexistent/tcp-fallback.yaml").await.is_err());
    }
}
