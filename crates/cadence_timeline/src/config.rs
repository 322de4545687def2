//! Timeline configuration

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a [`Timeline`](crate::Timeline)
///
/// Every field has a default, so a partial TOML document is accepted:
///
/// ```
/// use cadence_timeline::TimelineConfig;
///
/// let config = TimelineConfig::from_toml_str("target_fps = 60").unwrap();
/// assert_eq!(config.target_fps, 60);
/// assert_eq!(config.label, "timeline");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct TimelineConfig {
    /// Name attached to log events emitted by the timeline
    #[serde(default = "default_label")]
    pub label: String,
    /// Pulse rate used by [`FrameLoop`](crate::FrameLoop)
    #[serde(default = "default_target_fps")]
    pub target_fps: u32,
}

fn default_label() -> String {
    "timeline".to_string()
}

fn default_target_fps() -> u32 {
    120
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            label: default_label(),
            target_fps: default_target_fps(),
        }
    }
}

impl TimelineConfig {
    /// Parse a config from a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self> {
        Ok(toml::from_str(source)?)
    }

    /// Set the log label
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Set the target pulse rate (clamped to at least 1)
    pub fn with_target_fps(mut self, fps: u32) -> Self {
        self.target_fps = fps.max(1);
        self
    }

    /// Time between two frame pulses at the target rate
    pub fn frame_interval(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(self.target_fps.max(1)))
    }
}
