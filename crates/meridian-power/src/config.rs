use std::path::Path;

use meridian_core::config::{ConfigError, ConfigFormat, load_file};
use meridian_core::fixed::{Energy, Ticks};
use serde::{Deserialize, Serialize};

/// Per-network solver options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Maintenance draw of a network's poles and substations, per tick.
    pub node_overhead: Energy,
    /// Solar incidence is recomputed every this many ticks.
    pub solar_recompute_period: Ticks,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            node_overhead: 0,
            solar_recompute_period: 60,
        }
    }
}

impl SolverConfig {
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
        if self.solar_recompute_period == 0 {
            return Err(ConfigError::Invalid {
                field: "solar_recompute_period",
                reason: "must be at least 1".into(),
            });
        }
        if self.node_overhead < 0 {
            return Err(ConfigError::Invalid {
                field: "node_overhead",
                reason: "must not be negative".into(),
            });
        }
        Ok(())
    }
}
