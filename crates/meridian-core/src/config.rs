//! Runtime configuration.
//!
//! Configuration is plain serde data with defaults for every field, so a
//! host may load a partial TOML or RON file and override only what it needs.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config from {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("unsupported config extension: {0:?}")]
    UnsupportedFormat(PathBuf),
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Supported on-disk formats, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Ron,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Some(Self::Toml),
            Some("ron") => Some(Self::Ron),
            _ => None,
        }
    }

    pub fn parse<T: DeserializeOwned>(self, text: &str) -> Result<T, ConfigError> {
        match self {
            Self::Toml => Ok(toml::from_str(text)?),
            Self::Ron => Ok(ron::from_str(text)?),
        }
    }
}

/// Read and parse a config file of any supported format.
pub fn load_file<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let format = ConfigFormat::from_path(path)
        .ok_or_else(|| ConfigError::UnsupportedFormat(path.to_path_buf()))?;
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    format.parse(&text)
}

// ---------------------------------------------------------------------------
// SimConfig
// ---------------------------------------------------------------------------

/// Scheduling and partitioning options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Parallelism cap: number of worker threads per tick.
    pub worker_count: usize,
    /// Merge threshold for undersized components, in machine cost units.
    pub min_work_per_unit: u64,
    /// Ticks a stopped map waits before it may be re-partitioned.
    pub reoptimization_cooldown_ticks: u64,
    /// Maximum number of maps re-partitioned in one tick.
    pub max_reoptimizations_per_tick: usize,
    /// Length of one blocking-claim wait slice, in microseconds.
    pub blocking_wait_micros: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            worker_count: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            min_work_per_unit: 64,
            reoptimization_cooldown_ticks: 60,
            max_reoptimizations_per_tick: 1,
            blocking_wait_micros: 200,
        }
    }
}

impl SimConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = ConfigFormat::Toml.parse(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_ron_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = ConfigFormat::Ron.parse(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let config: Self = load_file(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::Invalid {
                field: "worker_count",
                reason: "must be at least 1".into(),
            });
        }
        if self.max_reoptimizations_per_tick == 0 {
            return Err(ConfigError::Invalid {
                field: "max_reoptimizations_per_tick",
                reason: "must be at least 1".into(),
            });
        }
        if self.blocking_wait_micros == 0 {
            return Err(ConfigError::Invalid {
                field: "blocking_wait_micros",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// Builder-style override for the worker count.
    pub fn with_workers(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }
}
