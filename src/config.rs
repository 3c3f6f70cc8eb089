use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::odometer::DistanceUnit;

/// Top-level configuration for the ingestion engine and its batch jobs.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Logging verbosity (debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Storage backend configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Unit-system configuration.
    #[serde(default)]
    pub units: UnitsConfig,

    /// History retention configuration.
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Daily rollup configuration.
    #[serde(default)]
    pub rollup: RollupConfig,
}

/// Storage backend configuration.
#[derive(Debug, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database file path. Default: "livelink.db".
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

/// Unit-system configuration.
#[derive(Debug, Deserialize)]
pub struct UnitsConfig {
    /// Distance unit readings are stored in. Standard-PID odometer readings
    /// arrive in kilometers and are converted to this. Default: miles.
    #[serde(default = "default_distance_unit")]
    pub distance: DistanceUnit,
}

impl Default for UnitsConfig {
    fn default() -> Self {
        Self {
            distance: default_distance_unit(),
        }
    }
}

/// History retention configuration.
#[derive(Debug, Deserialize)]
pub struct RetentionConfig {
    /// How many days of raw history to keep. Default: 90.
    #[serde(default = "default_retention_days")]
    pub days: u32,

    /// How often the scheduler prunes. Default: 6h.
    #[serde(default = "default_prune_interval", with = "humantime_serde")]
    pub prune_interval: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            days: default_retention_days(),
            prune_interval: default_prune_interval(),
        }
    }
}

/// Daily rollup configuration.
#[derive(Debug, Deserialize)]
pub struct RollupConfig {
    /// How often the scheduler re-aggregates the current and previous day.
    /// Default: 15m.
    #[serde(default = "default_aggregation_interval", with = "humantime_serde")]
    pub aggregation_interval: Duration,
}

impl Default for RollupConfig {
    fn default() -> Self {
        Self {
            aggregation_interval: default_aggregation_interval(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_database_path() -> PathBuf {
    PathBuf::from("livelink.db")
}

fn default_distance_unit() -> DistanceUnit {
    DistanceUnit::Miles
}

fn default_retention_days() -> u32 {
    90
}

fn default_prune_interval() -> Duration {
    Duration::from_secs(6 * 3600)
}

fn default_aggregation_interval() -> Duration {
    Duration::from_secs(15 * 60)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            database: DatabaseConfig::default(),
            units: UnitsConfig::default(),
            retention: RetentionConfig::default(),
            rollup: RollupConfig::default(),
        }
    }
}

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
        if self.database.path.as_os_str().is_empty() {
            bail!("database.path is required");
        }

        if self.retention.days == 0 {
            bail!("retention.days must be positive");
        }

        if self.retention.prune_interval.is_zero() {
            bail!("retention.prune_interval must be positive");
        }

        if self.rollup.aggregation_interval.is_zero() {
            bail!("rollup.aggregation_interval must be positive");
        }

        Ok(())
    }
}
