//! Pipeline configuration
//!
//! Every field has a built-in default, so an empty or missing file yields a
//! working pipeline. Durations are given in milliseconds and converted to
//! jiffies by the accessors.

use crate::error::{Error, Result};
use crate::msg::MsgFactoryConfig;
use crate::sender::DEFAULT_MAX_BACKLOG;
use nar_common::config::{load_toml_or_default, resolve_config_path, LoggingConfig};
use nar_common::timing::ms_to_jiffies;
use serde::Deserialize;
use std::path::Path;
use tracing::info;

/// Which mute engine the pipeline uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MuterMode {
    /// Ramp the samples themselves
    #[default]
    Samples,
    /// Ramp an external volume stage
    Volume,
}

/// Ramp durations applied at stream start
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RampConfig {
    /// Modes that pause and resume with long ramps
    pub long_ms: u32,
    /// Every other mode
    pub short_ms: u32,
}

impl Default for RampConfig {
    fn default() -> Self {
        Self {
            long_ms: 3000,
            short_ms: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MuterConfig {
    pub mode: MuterMode,
    pub ramp_ms: u32,
}

impl Default for MuterConfig {
    fn default() -> Self {
        Self {
            mode: MuterMode::Samples,
            ramp_ms: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StarterConfig {
    /// Longest silence inserted before a timed start
    pub max_silence_ms: u32,
}

impl Default for StarterConfig {
    fn default() -> Self {
        Self {
            max_silence_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SenderConfig {
    pub max_backlog: usize,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            max_backlog: DEFAULT_MAX_BACKLOG,
        }
    }
}

/// Top-level configuration file layout
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineConfig {
    pub ramp: RampConfig,
    pub muter: MuterConfig,
    pub starter: StarterConfig,
    pub sender: SenderConfig,
    /// Messages held between the push side and the pull chain
    pub reservoir_msgs: usize,
    pub msg_pool: MsgFactoryConfig,
    pub logging: LoggingConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ramp: RampConfig::default(),
            muter: MuterConfig::default(),
            starter: StarterConfig::default(),
            sender: SenderConfig::default(),
            reservoir_msgs: 128,
            msg_pool: MsgFactoryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Resolve and load configuration
    ///
    /// `cli_path` takes priority over `NAR_CONFIG` and the per-user config
    /// directory. No file at all yields defaults.
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        let config = match resolve_config_path(cli_path) {
            Some(path) => {
                info!("Using configuration file {}", path.display());
                load_toml_or_default::<PipelineConfig>(&path)?
            }
            None => {
                info!("No configuration file, using built-in defaults");
                PipelineConfig::default()
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make an element panic at construction
    pub fn validate(&self) -> Result<()> {
        if self.muter.ramp_ms == 0 {
            return Err(Error::Config("muter.ramp_ms must be non-zero".to_string()));
        }
        if self.reservoir_msgs == 0 {
            return Err(Error::Config("reservoir_msgs must be non-zero".to_string()));
        }
        if self.sender.max_backlog == 0 {
            return Err(Error::Config("sender.max_backlog must be non-zero".to_string()));
        }
        Ok(())
    }

    pub fn ramp_long_jiffies(&self) -> u64 {
        ms_to_jiffies(self.ramp.long_ms as u64)
    }

    pub fn ramp_short_jiffies(&self) -> u64 {
        ms_to_jiffies(self.ramp.short_ms as u64)
    }

    pub fn muter_ramp_jiffies(&self) -> u64 {
        ms_to_jiffies(self.muter.ramp_ms as u64)
    }

    pub fn starter_max_silence_jiffies(&self) -> u64 {
        ms_to_jiffies(self.starter.max_silence_ms as u64)
    }
}
