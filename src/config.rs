//! Configuration management for the stitching service
//!
//! TOML configuration with per-field defaults, environment variable
//! overrides, and validation before the pipeline starts.

use crate::error::{Error, Result};
use crate::params::StitchParams;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Runtime and fan-out tuning
    pub runtime: RuntimeConfig,

    /// Storage locations
    pub storage: StorageConfig,

    /// Result cache behaviour
    pub cache: CacheSettings,

    /// Monitoring and observability
    pub monitoring: MonitoringConfig,

    /// Stitching thresholds
    pub stitching: StitchParams,
}

/// Runtime configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Fraction of available cores used for partition workers
    #[serde(default = "default_worker_fraction")]
    pub worker_fraction: f64,

    /// Hard cap on partition workers (0 = no cap)
    #[serde(default)]
    pub max_workers: usize,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Data directory path
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Directory for CSV exports
    #[serde(default = "default_export_dir")]
    pub export_dir: PathBuf,
}

/// Result cache configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheSettings {
    /// Whether the result cache participates at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Whether entries are persisted to disk under the data directory
    #[serde(default = "default_true")]
    pub persist: bool,
}

/// Monitoring configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Enable Prometheus metrics
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable structured logging
    #[serde(default = "default_true")]
    pub structured_logging: bool,
}

// Default value functions
fn default_worker_fraction() -> f64 {
    0.5
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./stormstitch-data")
}
fn default_export_dir() -> PathBuf {
    PathBuf::from("./stormstitch-data/exports")
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            runtime: RuntimeConfig::default(),
            storage: StorageConfig::default(),
            cache: CacheSettings::default(),
            monitoring: MonitoringConfig::default(),
            stitching: StitchParams::default(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_fraction: default_worker_fraction(),
            max_workers: 0,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            export_dir: default_export_dir(),
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            persist: true,
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
            log_level: default_log_level(),
            structured_logging: true,
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Configuration(format!("failed to read {}: {}", path, e)))?;

        toml::from_str(&contents)
            .map_err(|e| Error::Configuration(format!("failed to parse {}: {}", path, e)))
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env(path: &str) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(fraction) = std::env::var("STORMSTITCH_WORKER_FRACTION") {
            if let Ok(f) = fraction.parse() {
                self.runtime.worker_fraction = f;
            }
        }
        if let Ok(max) = std::env::var("STORMSTITCH_MAX_WORKERS") {
            if let Ok(m) = max.parse() {
                self.runtime.max_workers = m;
            }
        }

        if let Ok(data_dir) = std::env::var("STORMSTITCH_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(data_dir);
        }
        if let Ok(disabled) = std::env::var("STORMSTITCH_CACHE_DISABLED") {
            if disabled == "1" || disabled.eq_ignore_ascii_case("true") {
                self.cache.enabled = false;
            }
        }

        if let Ok(log_level) = std::env::var("RUST_LOG") {
            self.monitoring.log_level = log_level;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !self.runtime.worker_fraction.is_finite()
            || self.runtime.worker_fraction <= 0.0
            || self.runtime.worker_fraction > 1.0
        {
            return Err(Error::Configuration(
                "worker_fraction must be in (0, 1]".to_string(),
            ));
        }

        if self.storage.data_dir.as_os_str().is_empty() {
            return Err(Error::Configuration(
                "data_dir cannot be empty".to_string(),
            ));
        }

        self.stitching.validate()?;
        Ok(())
    }

    /// Save configuration to TOML file
    pub fn save_to_file(&self, path: &str) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Configuration(format!("failed to serialize config: {}", e)))?;

        std::fs::write(path, contents)
            .map_err(|e| Error::Configuration(format!("failed to write {}: {}", path, e)))
    }
}
