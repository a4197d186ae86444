//! Configuration module for Switchyard.
//!
//! Loads engine tuning from TOML files with environment variable
//! substitution.
//!
//! # Example
//!
//! ```toml
//! [queues]
//! events_capacity = 1000
//! relay_capacity = 500
//!
//! [breaker]
//! failure_threshold = 5
//! reset_timeout_secs = 30
//!
//! [redis]
//! url = "${REDIS_URL}"
//! ```

use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::monitor::MonitorConfig;
use crate::registry::LaneConfig;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub queues: QueueConfig,

    #[serde(default)]
    pub breaker: BreakerConfig,

    #[serde(default)]
    pub fallback: FallbackConfig,

    #[serde(default)]
    pub monitor: MonitorSection,

    #[serde(default)]
    pub status: StatusConfig,

    #[serde(default)]
    pub redis: RedisConfig,
}

/// Queue capacities
#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    #[serde(default = "default_events_capacity")]
    pub events_capacity: usize,

    #[serde(default = "default_relay_capacity")]
    pub relay_capacity: usize,

    #[serde(default = "default_ingress_capacity")]
    pub ingress_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            events_capacity: default_events_capacity(),
            relay_capacity: default_relay_capacity(),
            ingress_capacity: default_ingress_capacity(),
        }
    }
}

fn default_events_capacity() -> usize {
    1000
}

fn default_relay_capacity() -> usize {
    500
}

fn default_ingress_capacity() -> usize {
    4096
}

/// Circuit breaker tuning
#[derive(Debug, Deserialize, Clone)]
pub struct BreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_reset_timeout_secs")]
    pub reset_timeout_secs: u64,

    #[serde(default = "default_half_open_max")]
    pub half_open_max: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_secs: default_reset_timeout_secs(),
            half_open_max: default_half_open_max(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_reset_timeout_secs() -> u64 {
    30
}

fn default_half_open_max() -> u32 {
    3
}

/// Fallback store tuning
#[derive(Debug, Deserialize, Clone)]
pub struct FallbackConfig {
    #[serde(default = "default_fallback_capacity")]
    pub capacity: usize,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            capacity: default_fallback_capacity(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_fallback_capacity() -> usize {
    10000
}

fn default_sweep_interval_secs() -> u64 {
    300
}

/// Backpressure monitor tuning
#[derive(Debug, Deserialize, Clone)]
pub struct MonitorSection {
    #[serde(default = "default_monitor_interval_secs")]
    pub interval_secs: u64,

    #[serde(default = "default_fill_threshold")]
    pub fill_threshold: f64,

    #[serde(default = "default_stuck_after")]
    pub stuck_after: u32,

    #[serde(default = "default_idle_reset_secs")]
    pub idle_reset_secs: u64,
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            interval_secs: default_monitor_interval_secs(),
            fill_threshold: default_fill_threshold(),
            stuck_after: default_stuck_after(),
            idle_reset_secs: default_idle_reset_secs(),
        }
    }
}

fn default_monitor_interval_secs() -> u64 {
    30
}

fn default_fill_threshold() -> f64 {
    0.6
}

fn default_stuck_after() -> u32 {
    3
}

fn default_idle_reset_secs() -> u64 {
    300
}

/// Periodic status report tuning
#[derive(Debug, Deserialize, Clone)]
pub struct StatusConfig {
    #[serde(default = "default_status_interval_secs")]
    pub interval_secs: u64,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_status_interval_secs(),
        }
    }
}

fn default_status_interval_secs() -> u64 {
    600
}

/// Remote cache connection
#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

impl EngineConfig {
    /// Load configuration from the default path or SWITCHYARD_CONFIG env var.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            env::var("SWITCHYARD_CONFIG").unwrap_or_else(|_| "config/switchyard.toml".to_string());

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            info!(
                path = %path.display(),
                "Config file not found, using defaults"
            );
            return Ok(Self::default());
        }

        info!(path = %path.display(), "Loading configuration");

        let content = fs::read_to_string(path)?;
        let content = substitute_env_vars(&content);

        debug!("Parsing TOML configuration");
        let config: EngineConfig = toml::from_str(&content)?;

        config.validate()?;

        info!(
            events_capacity = config.queues.events_capacity,
            breaker_threshold = config.breaker.failure_threshold,
            fallback_capacity = config.fallback.capacity,
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queues.events_capacity == 0 || self.queues.relay_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "queue capacities must be greater than zero".to_string(),
            ));
        }

        if self.breaker.failure_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "breaker failure_threshold must be greater than zero".to_string(),
            ));
        }

        if self.fallback.capacity == 0 {
            return Err(ConfigError::ValidationError(
                "fallback capacity must be greater than zero".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.monitor.fill_threshold) {
            return Err(ConfigError::ValidationError(format!(
                "monitor fill_threshold must be within (0, 1], got {}",
                self.monitor.fill_threshold
            )));
        }

        Ok(())
    }

    pub fn lane_config(&self) -> LaneConfig {
        LaneConfig {
            events_capacity: self.queues.events_capacity,
            relay_capacity: self.queues.relay_capacity,
        }
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            interval: Duration::from_secs(self.monitor.interval_secs),
            fill_threshold: self.monitor.fill_threshold,
            stuck_after: self.monitor.stuck_after,
            idle_reset: Duration::from_secs(self.monitor.idle_reset_secs),
        }
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::from_secs(self.breaker.reset_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.fallback.sweep_interval_secs)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status.interval_secs)
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(content: &str) -> String {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();

    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        match env::var(var_name) {
            Ok(value) => value,
            Err(_) => {
                debug!(var = %var_name, "Environment variable not set, keeping placeholder");
                caps[0].to_string()
            }
        }
    })
    .to_string()
}
