//! nether-acl-cli library
//!
//! glTF import, clip compression to `.nacl` files and stream inspection, used by
//! the `nether-acl` binary and its integration tests.

pub mod config;
pub mod gltf_import;
pub mod stats;

use anyhow::{Context, Result};
use nether_acl::{CompressedClip, CompressionOutput, TrackFormat, compress_clip};
use serde::Serialize;
use std::path::Path;

pub use config::{ToolConfig, load_config};
pub use gltf_import::{AnimationInfo, ImportedClip, import_clip, list_animations};
pub use stats::{StatsReport, collect_stats};

/// Compress one glTF animation in memory
pub fn compress_gltf(
    input: &Path,
    animation: Option<usize>,
    skin: Option<usize>,
    config: &ToolConfig,
) -> Result<CompressionOutput> {
    let imported = import_clip(input, animation, skin, config)?;
    compress_clip(&imported.skeleton, &imported.clip, &config.settings)
        .with_context(|| format!("Failed to compress '{}'", imported.clip.name))
}

/// Compress one glTF animation and write the stream to `output`
pub fn convert_gltf_clip(
    input: &Path,
    output: &Path,
    animation: Option<usize>,
    skin: Option<usize>,
    config: &ToolConfig,
) -> Result<CompressionOutput> {
    let result = compress_gltf(input, animation, skin, config)?;
    std::fs::write(output, result.clip.as_bytes())
        .with_context(|| format!("Failed to write output: {:?}", output))?;
    Ok(result)
}

/// Layout summary of a compressed clip
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClipSummary {
    pub size: usize,
    pub num_bones: usize,
    pub num_curves: usize,
    pub num_samples: u32,
    pub sample_rate: f32,
    pub duration: f32,
    pub segments: usize,
    pub frame_bit_size: u32,
    pub animated_tracks: usize,
    pub constant_tracks: usize,
    pub default_tracks: usize,
    /// Histogram of animated track bit rates, index = rate
    pub bit_rates: Vec<u32>,
}

impl ClipSummary {
    pub fn new(clip: &CompressedClip) -> Self {
        let mut summary = Self {
            size: clip.size(),
            num_bones: clip.num_bones(),
            num_curves: clip.num_curves(),
            num_samples: clip.num_samples(),
            sample_rate: clip.sample_rate(),
            duration: clip.duration(),
            segments: clip.segments().len(),
            frame_bit_size: clip.header().frame_bit_size,
            animated_tracks: 0,
            constant_tracks: 0,
            default_tracks: 0,
            bit_rates: vec![0; 33],
        };
        for track in clip.tracks() {
            match track.format {
                TrackFormat::Default => summary.default_tracks += 1,
                TrackFormat::Constant => summary.constant_tracks += 1,
                TrackFormat::QuantizedLinear | TrackFormat::QuantizedQuaternion => {
                    summary.animated_tracks += 1;
                    summary.bit_rates[track.bit_rate as usize] += 1;
                }
            }
        }
        summary
    }
}

/// Read and validate a `.nacl` file
pub fn inspect_clip(path: &Path) -> Result<ClipSummary> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read clip: {:?}", path))?;
    let clip = CompressedClip::from_bytes(bytes)
        .with_context(|| format!("Invalid compressed clip: {:?}", path))?;
    Ok(ClipSummary::new(&clip))
}
