//! Configuration management for Tollgate.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, TollgateError};

/// Prefix for environment variable overrides (`TOLLGATE_RATE_LIMITING__ENABLED=false`).
const ENV_PREFIX: &str = "TOLLGATE";

/// Longest accepted expiration window or cleanup interval (one year).
pub const MAX_WINDOW_MINUTES: u64 = 365 * 24 * 60;

/// Main configuration for the Tollgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TollgateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address of the admission check endpoint
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,

    /// Address of the admin (health/stats) endpoint
    #[serde(default = "default_admin_addr")]
    pub admin_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            admin_addr: default_admin_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_admin_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9090))
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Whether admission control is applied at all
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Sustained refill rate of each client's bucket
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: f64,

    /// Bucket capacity, the largest instantaneous burst
    #[serde(default = "default_burst_size")]
    pub burst_size: u32,

    /// Idle time after which a client's bucket is dropped
    #[serde(default = "default_expiration_minutes")]
    pub expiration_minutes: u64,

    /// How often the idle reaper scans the registry
    #[serde(default = "default_cleanup_interval_minutes")]
    pub cleanup_interval_minutes: u64,

    /// Path prefixes subject to limiting
    #[serde(default = "default_limited_prefixes")]
    pub limited_prefixes: Vec<String>,

    /// Path prefixes never limited, even under a limited prefix
    #[serde(default = "default_excluded_prefixes")]
    pub excluded_prefixes: Vec<String>,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            requests_per_second: default_requests_per_second(),
            burst_size: default_burst_size(),
            expiration_minutes: default_expiration_minutes(),
            cleanup_interval_minutes: default_cleanup_interval_minutes(),
            limited_prefixes: default_limited_prefixes(),
            excluded_prefixes: default_excluded_prefixes(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_requests_per_second() -> f64 {
    5.0
}

fn default_burst_size() -> u32 {
    10
}

fn default_expiration_minutes() -> u64 {
    30
}

fn default_cleanup_interval_minutes() -> u64 {
    60
}

fn default_limited_prefixes() -> Vec<String> {
    vec![
        "/api/auth/".to_string(),
        "/api/users/".to_string(),
        "/api/admin/".to_string(),
    ]
}

fn default_excluded_prefixes() -> Vec<String> {
    vec!["/api/auth/verify".to_string()]
}

impl RateLimitingConfig {
    /// Idle window after which an entry is evicted.
    pub fn expiration(&self) -> Duration {
        Duration::from_secs(self.expiration_minutes.saturating_mul(60))
    }

    /// Period of the idle reaper.
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_minutes.saturating_mul(60))
    }

    /// Reject values that cannot describe a working limiter.
    pub fn validate(&self) -> Result<()> {
        if !self.requests_per_second.is_finite() || self.requests_per_second < 0.0 {
            return Err(TollgateError::Config(format!(
                "requests_per_second must be a finite, non-negative number (got {})",
                self.requests_per_second
            )));
        }
        if self.burst_size == 0 {
            return Err(TollgateError::Config(
                "burst_size must be at least 1".to_string(),
            ));
        }
        check_window("expiration_minutes", self.expiration_minutes)?;
        check_window("cleanup_interval_minutes", self.cleanup_interval_minutes)?;
        for prefix in self.limited_prefixes.iter().chain(&self.excluded_prefixes) {
            if !prefix.starts_with('/') {
                return Err(TollgateError::Config(format!(
                    "path prefix {:?} must start with '/'",
                    prefix
                )));
            }
        }
        Ok(())
    }
}

fn check_window(name: &str, minutes: u64) -> Result<()> {
    if !(1..=MAX_WINDOW_MINUTES).contains(&minutes) {
        return Err(TollgateError::Config(format!(
            "{} must be between 1 and {} (got {})",
            name, MAX_WINDOW_MINUTES, minutes
        )));
    }
    Ok(())
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TollgateConfig {
    /// Load configuration from a YAML file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TollgateConfig = serde_yaml::from_str(yaml)
            .map_err(|e| TollgateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from defaults, an optional YAML file, and
    /// `TOLLGATE_*` environment variables, in increasing precedence.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(true),
            );
        }

        let config: TollgateConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<()> {
        self.rate_limiting.validate()
    }
}
