//! Compression settings
//!
//! Plain value object with sensible defaults. Deserializes from partial TOML/JSON
//! documents (missing keys take their default).

use serde::{Deserialize, Serialize};

use crate::error::{AclError, Result};

/// How rotation tracks are stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RotationFormat {
    /// Four raw f32 components (128 bits per sample), never reduced
    QuatFull,
    /// Smallest-three with raw f32 components (99 bits per sample), never reduced
    SmallestThreeFull,
    /// Smallest-three with a searched bit rate per track
    SmallestThreeVariable,
}

/// How translation and scale tracks are stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VectorFormat {
    /// Three raw f32 components, never reduced
    Full,
    /// Range-reduced, quantized with a searched bit rate per track
    Variable,
}

/// Trade-off between compression time and size. Never affects the error bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CompressionLevel {
    Lowest,
    Low,
    Medium,
    High,
    Highest,
}

impl RotationFormat {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            Self::QuatFull => 0,
            Self::SmallestThreeFull => 1,
            Self::SmallestThreeVariable => 2,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::QuatFull),
            1 => Some(Self::SmallestThreeFull),
            2 => Some(Self::SmallestThreeVariable),
            _ => None,
        }
    }

    pub fn is_variable(self) -> bool {
        self == Self::SmallestThreeVariable
    }
}

impl VectorFormat {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            Self::Full => 0,
            Self::Variable => 1,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Full),
            1 => Some(Self::Variable),
            _ => None,
        }
    }

    pub fn is_variable(self) -> bool {
        self == Self::Variable
    }
}

/// Compression settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionSettings {
    /// Maximum object-space virtual vertex deviation (same units as translations)
    pub error_threshold: f32,
    pub rotation_format: RotationFormat,
    pub translation_format: VectorFormat,
    pub scale_format: VectorFormat,
    /// Frames per independently seekable segment
    pub segment_length: u32,
    pub level: CompressionLevel,
    /// Constant detection epsilon for normalized quaternion components
    pub rotation_epsilon: f32,
    /// Constant detection epsilon for translation and scale
    pub linear_epsilon: f32,
    /// Virtual vertex distance for ordinary bones
    pub default_virtual_vertex_distance: f32,
    /// Virtual vertex distance for keyed end effectors (hands, feet, IK targets)
    pub safe_virtual_vertex_distance: f32,
    /// Error is measured on every Nth frame (the last frame is always measured)
    pub error_sample_stride: u32,
    /// Maximum number of bit rate trials; `None` derives one from the track count
    pub max_iterations: Option<u32>,
    /// Recompress with [`CompressionSettings::safest`] when the bound is missed
    pub safety_fallback: bool,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            error_threshold: 0.01,
            rotation_format: RotationFormat::SmallestThreeVariable,
            translation_format: VectorFormat::Variable,
            scale_format: VectorFormat::Variable,
            segment_length: 16,
            level: CompressionLevel::Medium,
            rotation_epsilon: 0.0001,
            linear_epsilon: 0.001,
            default_virtual_vertex_distance: 3.0,
            safe_virtual_vertex_distance: 100.0,
            error_sample_stride: 1,
            max_iterations: None,
            safety_fallback: true,
        }
    }
}

impl CompressionSettings {
    /// Settings used by the safety fallback: full precision everywhere and exact
    /// constant detection. Keeps the error threshold, distances and segment length.
    pub fn safest(&self) -> Self {
        Self {
            rotation_format: RotationFormat::QuatFull,
            translation_format: VectorFormat::Full,
            scale_format: VectorFormat::Full,
            rotation_epsilon: 0.0,
            linear_epsilon: 0.0,
            safety_fallback: false,
            ..self.clone()
        }
    }

    /// Iteration cap for a clip with `num_tracks` searchable tracks
    pub fn iteration_cap(&self, num_tracks: usize) -> u32 {
        self.max_iterations
            .unwrap_or_else(|| (num_tracks as u32).saturating_mul(64).max(64))
    }

    /// Reject settings that cannot produce a meaningful clip
    pub fn validate(&self) -> Result<()> {
        if !self.error_threshold.is_finite() || self.error_threshold <= 0.0 {
            return Err(AclError::config(format!(
                "error threshold must be > 0, got {}",
                self.error_threshold
            )));
        }
        if self.segment_length == 0 {
            return Err(AclError::config("segment length must be at least 1 frame"));
        }
        for (name, value) in [
            ("rotation_epsilon", self.rotation_epsilon),
            ("linear_epsilon", self.linear_epsilon),
            (
                "default_virtual_vertex_distance",
                self.default_virtual_vertex_distance,
            ),
            (
                "safe_virtual_vertex_distance",
                self.safe_virtual_vertex_distance,
            ),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(AclError::config(format!(
                    "{} must be finite and >= 0, got {}",
                    name, value
                )));
            }
        }
        if self.error_sample_stride == 0 {
            return Err(AclError::config("error sample stride must be at least 1"));
        }
        if self.max_iterations == Some(0) {
            return Err(AclError::config("iteration cap must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        assert!(CompressionSettings::default().validate().is_ok());
    }

    #[test]
    fn test_non_positive_threshold_rejected() {
        for threshold in [0.0, -1.0, f32::NAN] {
            let settings = CompressionSettings {
                error_threshold: threshold,
                ..Default::default()
            };
            assert!(matches!(
                settings.validate(),
                Err(AclError::InvalidConfiguration(_))
            ));
        }
    }

    #[test]
    fn test_zero_segment_length_rejected() {
        let settings = CompressionSettings {
            segment_length: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_safest_keeps_threshold() {
        let settings = CompressionSettings {
            error_threshold: 0.5,
            ..Default::default()
        };
        let safest = settings.safest();
        assert_eq!(safest.error_threshold, 0.5);
        assert_eq!(safest.rotation_format, RotationFormat::QuatFull);
        assert!(!safest.safety_fallback);
        assert!(safest.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let settings: CompressionSettings =
            toml::from_str("error_threshold = 0.05\nlevel = \"High\"\n").unwrap();
        assert_eq!(settings.error_threshold, 0.05);
        assert_eq!(settings.level, CompressionLevel::High);
        assert_eq!(settings.segment_length, 16);
    }

    #[test]
    fn test_format_tags_roundtrip() {
        for f in [
            RotationFormat::QuatFull,
            RotationFormat::SmallestThreeFull,
            RotationFormat::SmallestThreeVariable,
        ] {
            assert_eq!(RotationFormat::from_u8(f.to_u8()), Some(f));
        }
        assert_eq!(VectorFormat::from_u8(9), None);
    }
}
