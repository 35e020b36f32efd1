//! Run configuration.

use crate::fault::FaultMode;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Mixes the external seed into the runtime seed.
const SEED_MIX: u64 = 0x9e37_79b9_7f4a_7c15;

/// An invalid or unreadable configuration. The run refuses to start.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("fault index {0} is out of range")]
    FaultIndex(usize),
    #[error("fault percentage {0} is not within [0, 1]")]
    FaultPercentage(f64),
    #[error("the step ceiling must be positive")]
    ZeroMaxSteps,
    #[error("traffic speed spread must be a non-negative number, got {0}")]
    SpeedSpread(f64),
    #[error("could not read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Checks a configuration before it is used.
pub trait Validate {
    fn validate(&self) -> Result<(), ConfigError>;
}

/// The configuration of a single run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// The seed the network generator used. Shared across a batch of runs.
    #[serde(default)]
    pub external_seed: u64,
    /// The seed varying runtime randomness within a batch.
    #[serde(default)]
    pub internal_seed: u64,
    /// The run times out after this many steps.
    #[serde(default = "default_max_steps")]
    pub max_steps: u64,
    /// How the fault array is populated.
    #[serde(default)]
    pub faults: FaultMode,
    /// Standard deviation of the factor applied to each traffic car's maximum speed.
    #[serde(default)]
    pub traffic_speed_spread: f64,
}

fn default_max_steps() -> u64 {
    5000
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            external_seed: 0,
            internal_seed: 0,
            max_steps: default_max_steps(),
            faults: FaultMode::None,
            traffic_speed_spread: 0.0,
        }
    }
}

impl RunConfig {
    /// Parses and validates a TOML configuration.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: RunConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// The seed of the runtime random number generator.
    pub fn runtime_seed(&self) -> u64 {
        self.internal_seed ^ self.external_seed.wrapping_mul(SEED_MIX)
    }
}

impl Validate for RunConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.faults.validate()?;
        if self.max_steps == 0 {
            return Err(ConfigError::ZeroMaxSteps);
        }
        if !(self.traffic_speed_spread >= 0.0) {
            return Err(ConfigError::SpeedSpread(self.traffic_speed_spread));
        }
        Ok(())
    }
}
