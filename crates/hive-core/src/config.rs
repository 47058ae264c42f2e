//! Engine configuration loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file at all) is a valid
//! configuration. `HIVE_MAX_WORKERS` overrides `[processor] max_workers`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub const MAX_WORKERS_ENV: &str = "HIVE_MAX_WORKERS";

/// Upper bound for both lock ttls: one day.
pub const MAX_LOCK_TTL_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Lease length for `lock_job` and the processor's own locks.
    pub lock_ttl_secs: u64,

    /// Lease length granted by an accepted bid.
    pub bid_lock_ttl_secs: u64,

    pub max_pheromone_intensity: f64,

    /// Per second.
    pub default_decay_rate: f64,

    /// Signal deposited on a job when it completes.
    pub completion_pheromone: String,
    pub completion_pheromone_amount: f64,

    pub retry: RetryConfig,
    pub processor: ProcessorConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Execution attempts per job, first run included.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    pub max_workers: usize,
    pub poll_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_ttl_secs: 300,
            bid_lock_ttl_secs: 300,
            max_pheromone_intensity: 100.0,
            default_decay_rate: 0.01,
            completion_pheromone: "completed".to_string(),
            completion_pheromone_amount: 50.0,
            retry: RetryConfig::default(),
            processor: ProcessorConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            multiplier: 2.0,
        }
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            poll_interval_ms: 250,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Read `path` if given (defaults otherwise), then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                toml::from_str::<Self>(&contents)?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup (the process environment in `load`).
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(raw) = lookup(MAX_WORKERS_ENV)
            && !raw.trim().is_empty()
        {
            self.processor.max_workers = raw.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("{MAX_WORKERS_ENV} must be a number, got `{raw}`"))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.lock_ttl_secs == 0 || self.bid_lock_ttl_secs == 0 {
            return invalid("lock ttls must be positive");
        }
        if self.lock_ttl_secs > MAX_LOCK_TTL_SECS || self.bid_lock_ttl_secs > MAX_LOCK_TTL_SECS {
            return Err(ConfigError::Invalid(format!(
                "lock ttls must not exceed {MAX_LOCK_TTL_SECS}s"
            )));
        }
        if !(self.max_pheromone_intensity.is_finite() && self.max_pheromone_intensity > 0.0) {
            return invalid("max_pheromone_intensity must be positive");
        }
        if !(self.default_decay_rate.is_finite() && self.default_decay_rate >= 0.0) {
            return invalid("default_decay_rate must be >= 0");
        }
        if self.completion_pheromone.trim().is_empty() {
            return invalid("completion_pheromone must not be empty");
        }
        if !(self.completion_pheromone_amount.is_finite() && self.completion_pheromone_amount > 0.0) {
            return invalid("completion_pheromone_amount must be positive");
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1");
        }
        if !(self.retry.multiplier.is_finite() && self.retry.multiplier >= 1.0) {
            return invalid("retry.multiplier must be >= 1");
        }
        if self.processor.max_workers == 0 {
            return invalid("processor.max_workers must be at least 1");
        }
        if self.processor.poll_interval_ms == 0 {
            return invalid("processor.poll_interval_ms must be positive");
        }
        Ok(())
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn bid_lock_ttl(&self) -> Duration {
        Duration::from_secs(self.bid_lock_ttl_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.processor.poll_interval_ms)
    }
}
