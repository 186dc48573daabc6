use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Top-level configuration for the exporter.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Logging verbosity (debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    #[allow(dead_code)]
    pub log_level: String,

    /// Web listener configuration.
    #[serde(default)]
    pub web: WebConfig,

    /// ZoneMinder API connection configuration.
    #[serde(default)]
    pub zoneminder: ZoneminderConfig,
}

/// Web listener configuration.
#[derive(Debug, Deserialize)]
pub struct WebConfig {
    /// Address to listen on for the metrics endpoint. A ":port" shorthand
    /// binds all interfaces. Default: ":9180".
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Path under which to expose metrics. Default: "/metrics".
    #[serde(default = "default_telemetry_path")]
    pub telemetry_path: String,
}

/// ZoneMinder API connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ZoneminderConfig {
    /// Base URL of the ZoneMinder API. Default: "http://localhost/zm/api".
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Budget for a single collection cycle. Default: 30s.
    #[serde(default = "default_collect_timeout", with = "humantime_serde")]
    pub collect_timeout: Duration,

    /// How far back to look for events when computing per-monitor
    /// last-event metrics. Default: 3h.
    #[serde(default = "default_event_lookback", with = "humantime_serde")]
    pub event_lookback: Duration,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_listen_address() -> String {
    ":9180".to_string()
}

fn default_telemetry_path() -> String {
    "/metrics".to_string()
}

fn default_api_url() -> String {
    "http://localhost/zm/api".to_string()
}

fn default_collect_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_event_lookback() -> Duration {
    Duration::from_secs(3 * 60 * 60)
}

// --- Default trait impls ---

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            web: WebConfig::default(),
            zoneminder: ZoneminderConfig::default(),
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            telemetry_path: default_telemetry_path(),
        }
    }
}

impl Default for ZoneminderConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            collect_timeout: default_collect_timeout(),
            event_lookback: default_event_lookback(),
        }
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.web.listen_address.is_empty() {
            bail!("web.listen_address is required");
        }

        if !self.web.telemetry_path.starts_with('/') {
            bail!("web.telemetry_path must start with '/'");
        }

        if self.zoneminder.api_url.is_empty() {
            bail!("zoneminder.api_url is required");
        }

        if self.zoneminder.collect_timeout.is_zero() {
            bail!("zoneminder.collect_timeout must be positive");
        }

        if self.zoneminder.event_lookback.is_zero() {
            bail!("zoneminder.event_lookback must be positive");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.web.listen_address, ":9180");
        assert_eq!(cfg.web.telemetry_path, "/metrics");
        assert_eq!(cfg.zoneminder.api_url, "http://localhost/zm/api");
        assert_eq!(cfg.zoneminder.collect_timeout, Duration::from_secs(30));
        assert_eq!(
            cfg.zoneminder.event_lookback,
            Duration::from_secs(3 * 60 * 60)
        );
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
web:
  listen_address: "127.0.0.1:9999"
zoneminder:
  api_url: "http://cameras.local/zm/api"
  collect_timeout: 10s
  event_lookback: 1h
"#;
        let cfg: Config = serde_yaml::from_str(yaml).expect("should parse");
        assert_eq!(cfg.web.listen_address, "127.0.0.1:9999");
        assert_eq!(cfg.web.telemetry_path, "/metrics");
        assert_eq!(cfg.zoneminder.api_url, "http://cameras.local/zm/api");
        assert_eq!(cfg.zoneminder.collect_timeout, Duration::from_secs(10));
        assert_eq!(cfg.zoneminder.event_lookback, Duration::from_secs(3600));
    }

    #[test]
    fn test_empty_api_url_rejected() {
        let mut cfg = Config::default();
        cfg.zoneminder.api_url = String::new();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_zero_collect_timeout_rejected() {
        let mut cfg = Config::default();
        cfg.zoneminder.collect_timeout = Duration::ZERO;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_relative_telemetry_path_rejected() {
        let mut cfg = Config::default();
        cfg.web.telemetry_path = "metrics".to_string();
        assert!(cfg.validate().is_err());
    }
}
