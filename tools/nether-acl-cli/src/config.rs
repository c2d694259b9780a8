//! Tool configuration (settings.toml)
//!
//! ```toml
//! frame_rate = 30.0
//! end_effectors = ["hand", "foot", "ik"]
//!
//! [settings]
//! error_threshold = 0.01
//! level = "High"
//! ```

use anyhow::{Context, Result};
use nether_acl::CompressionSettings;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default sample rate for glTF animations (frames per second)
pub const DEFAULT_FRAME_RATE: f32 = 30.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Codec settings, missing keys take the codec defaults
    #[serde(default)]
    pub settings: CompressionSettings,
    /// Rate used to resample glTF animations
    #[serde(default = "default_frame_rate")]
    pub frame_rate: f32,
    /// Case-insensitive bone name fragments marking keyed end effectors
    #[serde(default = "default_end_effectors")]
    pub end_effectors: Vec<String>,
}

fn default_frame_rate() -> f32 {
    DEFAULT_FRAME_RATE
}

fn default_end_effectors() -> Vec<String> {
    ["ik", "eye", "weapon", "hand", "foot", "attach", "camera"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            settings: CompressionSettings::default(),
            frame_rate: DEFAULT_FRAME_RATE,
            end_effectors: default_end_effectors(),
        }
    }
}

impl ToolConfig {
    /// Whether a bone with this name is a keyed end effector
    pub fn is_end_effector(&self, bone_name: &str) -> bool {
        let name = bone_name.to_lowercase();
        self.end_effectors
            .iter()
            .any(|fragment| !fragment.is_empty() && name.contains(&fragment.to_lowercase()))
    }
}

/// Load a config file, or the defaults when no path is given
pub fn load_config(path: Option<&Path>) -> Result<ToolConfig> {
    let Some(path) = path else {
        return Ok(ToolConfig::default());
    };
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {:?}", path))?;
    let config: ToolConfig =
        toml::from_str(&content).with_context(|| format!("Failed to parse config: {:?}", path))?;
    config
        .settings
        .validate()
        .with_context(|| format!("Invalid settings in {:?}", path))?;
    if !(config.frame_rate.is_finite() && config.frame_rate > 0.0) {
        anyhow::bail!("Invalid frame rate {} in {:?}", config.frame_rate, path);
    }
    Ok(config)
}
