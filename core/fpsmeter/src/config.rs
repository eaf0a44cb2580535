use std::{path::PathBuf, time::Duration};

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

/// Path of the fps node exposed by the display driver on most Qualcomm devices.
pub const DEFAULT_NODE_PATH: &str = "/sys/class/drm/sde-crtc-0/measured_fps";

/// Configuration of the measurement engine, read once at construction.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Text node that exposes the current frame rate.
    ///
    /// If it is absent or unreadable, the engine samples the compositor's frame callbacks instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_path: Option<PathBuf>,

    /// Interval between two reads of the node.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Delay after which the first frame callback is registered again,
    /// in case the compositor was not ready when the sampler was activated.
    #[serde(with = "humantime_serde", default, skip_serializing_if = "Option::is_none")]
    pub registration_kick_delay: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_path: Some(PathBuf::from(DEFAULT_NODE_PATH)),
            poll_interval: Duration::from_secs(1), // 1 Hz
            registration_kick_delay: Some(Duration::from_millis(100)),
        }
    }
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval.is_zero() {
            return Err(anyhow!("poll_interval must be greater than zero"));
        }
        Ok(())
    }
}
