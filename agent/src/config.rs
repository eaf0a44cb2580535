//! Agent configuration.
//!
//! We use `serde` to parse these options from the TOML config file,
//! and to write the default configuration to the TOML config file.

use std::{
    io,
    path::{Path, PathBuf},
};

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Content of the agent's configuration file.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    /// Settings of the measurement engine.
    #[serde(default)]
    pub meter: fpsmeter::Config,

    #[serde(default)]
    pub display: DisplayConfig,

    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// The display whose refresh rate caps the measured values.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DisplayConfig {
    /// Highest refresh rate supported by the display, in Hz.
    ///
    /// If absent, the display reports no mode and the default ceiling is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_rate: Option<f32>,
}

/// The simulated compositor, used when the fps node is not available.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SimulationConfig {
    /// Vsync rate of the simulated display, in Hz.
    pub refresh_rate: f32,

    /// The simulated application renders a frame every `render_every` vsync.
    pub render_every: u32,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            refresh_rate: Some(60.0),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            refresh_rate: 60.0,
            render_every: 1,
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        self.meter.validate()?;
        let rate = self.simulation.refresh_rate;
        if !rate.is_finite() || rate <= 0.0 {
            return Err(anyhow!("simulation.refresh_rate must be a positive number of Hz, got {rate}"));
        }
        if self.simulation.render_every == 0 {
            return Err(anyhow!("simulation.render_every must be at least 1"));
        }
        Ok(())
    }

    /// Returns the default configuration, serialized to TOML.
    pub fn default_string() -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(&AgentConfig::default())
    }
}

#[derive(Error, Debug)]
#[error("could not load config from '{}'", .config_file.display())]
pub struct LoadError {
    pub config_file: PathBuf,
    #[source]
    kind: LoadErrorCause,
}

#[derive(Error, Debug)]
enum LoadErrorCause {
    #[error("read failed")]
    Read(#[source] io::Error),
    #[error("serialization of the default config failed")]
    DefaultSerialize(#[source] toml::ser::Error),
    #[error("write (of default config) failed")]
    DefaultWrite(#[source] io::Error),
    #[error("invalid TOML config")]
    InvalidToml(#[from] toml::de::Error),
}

/// Loads the configuration file.
///
/// If the file does not exist and `save_default` is `true`, the default configuration
/// is written to `config_file` and returned. Otherwise, a missing file is an error.
pub fn load(config_file: &Path, save_default: bool) -> Result<AgentConfig, LoadError> {
    load_impl(config_file, save_default).map_err(|kind| LoadError {
        config_file: config_file.to_owned(),
        kind,
    })
}

fn load_impl(config_file: &Path, save_default: bool) -> Result<AgentConfig, LoadErrorCause> {
    match std::fs::read_to_string(config_file) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == io::ErrorKind::NotFound && save_default => {
            let default_content = AgentConfig::default_string().map_err(LoadErrorCause::DefaultSerialize)?;
            std::fs::write(config_file, &default_content).map_err(LoadErrorCause::DefaultWrite)?;
            log::info!("Default configuration file written to: {}", config_file.display());
            Ok(AgentConfig::default())
        }
        Err(e) => Err(LoadErrorCause::Read(e)),
    }
}
