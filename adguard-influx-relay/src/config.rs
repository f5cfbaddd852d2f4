//! Relay configuration
//!
//! Handles:
//! - AdGuard Home connection settings and poll cadence
//! - InfluxDB connection settings and write target
//! - Validation of required fields and numeric ranges
//!
//! The file is TOML with an `[adguard]` and an `[influxdb]` section. It is
//! re-read at the start of every cycle so edits apply without a restart.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable overriding the configuration path
pub const CONFIG_PATH_ENV: &str = "ADGUARD_RELAY_CONFIG";

/// Used when `ADGUARD_RELAY_CONFIG` is not set
pub const DEFAULT_CONFIG_PATH: &str = "./config/configuration.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed configuration: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    pub adguard: AdGuardConfig,
    pub influxdb: InfluxConfig,
}

/// Source side: where the statistics come from and how often
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AdGuardConfig {
    pub host: String,
    #[serde(default = "default_adguard_port")]
    pub port: u16,
    #[serde(default)]
    pub tls: bool,
    #[serde(default = "default_true")]
    pub verify_ssl: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default = "default_base_path")]
    pub base_path: String,
    /// Per-request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: i64,
    /// Seconds between cycles, 0 means no wait
    #[serde(default)]
    pub interval: i64,
    /// Collection attempts per cycle
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// First backoff delay in seconds, doubled after each failed attempt
    #[serde(default = "default_retry_delay")]
    pub retry_delay: i64,
}

/// Destination side: the InfluxDB 1.x server and write target
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InfluxConfig {
    pub host: String,
    #[serde(default = "default_influx_port")]
    pub port: u16,
    #[serde(default)]
    pub ssl: bool,
    #[serde(default)]
    pub verify_ssl: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: String,
    pub measurement_name: String,
    #[serde(default = "default_timeout")]
    pub timeout: i64,
    #[serde(default)]
    pub time_precision: Precision,
}

/// Timestamp precision used for `/write`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum Precision {
    #[serde(rename = "s")]
    Seconds,
    #[default]
    #[serde(rename = "ms")]
    Milliseconds,
}

impl Precision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Precision::Seconds => "s",
            Precision::Milliseconds => "ms",
        }
    }
}

fn default_adguard_port() -> u16 {
    3000
}

fn default_influx_port() -> u16 {
    8086
}

fn default_true() -> bool {
    true
}

fn default_base_path() -> String {
    "/control".to_string()
}

fn default_timeout() -> i64 {
    10
}

fn default_retries() -> u32 {
    3
}

fn default_retry_delay() -> i64 {
    1
}

impl Config {
    /// Resolve the configuration path from the environment
    pub fn path_from_env() -> PathBuf {
        std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Load and validate the configuration file
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a TOML document
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        require_non_empty("adguard.host", &self.adguard.host)?;
        require_non_empty("adguard.base_path", &self.adguard.base_path)?;
        require_non_negative("adguard.interval", self.adguard.interval)?;
        require_non_negative("adguard.retry_delay", self.adguard.retry_delay)?;
        require_positive("adguard.timeout", self.adguard.timeout)?;
        if self.adguard.retries == 0 {
            return Err(ConfigError::Invalid(
                "adguard.retries must be at least 1".to_string(),
            ));
        }

        require_non_empty("influxdb.host", &self.influxdb.host)?;
        require_non_empty("influxdb.database", &self.influxdb.database)?;
        require_non_empty("influxdb.measurement_name", &self.influxdb.measurement_name)?;
        require_positive("influxdb.timeout", self.influxdb.timeout)?;
        Ok(())
    }
}

impl AdGuardConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval.max(0) as u64)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout.max(1) as u64)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay.max(0) as u64)
    }

    pub fn base_url(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        let path = self.base_path.trim_end_matches('/');
        let path = if path.starts_with('/') || path.is_empty() {
            path.to_string()
        } else {
            format!("/{path}")
        };
        format!("{scheme}://{}:{}{}", self.host, self.port, path)
    }
}

impl InfluxConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout.max(1) as u64)
    }

    pub fn base_url(&self) -> String {
        let scheme = if self.ssl { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

fn require_non_empty(key: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Invalid(format!("{key} must not be empty")));
    }
    Ok(())
}

fn require_non_negative(key: &str, value: i64) -> Result<(), ConfigError> {
    if value < 0 {
        return Err(ConfigError::Invalid(format!(
            "{key} must not be negative (got {value})"
        )));
    }
    Ok(())
}

fn require_positive(key: &str, value: i64) -> Result<(), ConfigError> {
    if value <= 0 {
        return Err(ConfigError::Invalid(format!(
            "{key} must be positive (got {value})"
        )));
    }
    Ok(())
}
