//! Clip compression entry point

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::analysis::analyze_prepared;
use crate::bitstream::BitWriter;
use crate::driver::{search_bit_rates, warning};
use crate::error::{AclError, ConvergenceReason, ConvergenceWarning, Result};
use crate::error_metric::{BoneError, measure_clip_error};
use crate::format::{ClipHeader, CompressedClip, SegmentHeader};
use crate::quantize::{TrackEncoding, TrackFormat};
use crate::settings::CompressionSettings;
use crate::skeleton::Skeleton;
use crate::track::{PreparedClip, RawClip, TrackKind};

/// How many tracks of one kind ended up in each storage class
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackCounts {
    pub default: u32,
    pub constant: u32,
    pub animated: u32,
}

impl TrackCounts {
    fn add(&mut self, format: TrackFormat) {
        match format {
            TrackFormat::Default => self.default += 1,
            TrackFormat::Constant => self.constant += 1,
            TrackFormat::QuantizedLinear | TrackFormat::QuantizedQuaternion => self.animated += 1,
        }
    }
}

/// Compression statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionStats {
    pub clip_name: String,
    pub num_bones: usize,
    pub num_curves: usize,
    pub num_samples: u32,
    pub sample_rate: f32,
    /// Uncompressed size in bytes
    pub raw_size: usize,
    /// Compressed stream size in bytes
    pub compressed_size: usize,
    /// `raw_size / compressed_size`
    pub compression_ratio: f32,
    /// Worst object-space error over every bone and frame
    pub max_error: BoneError,
    /// Bit rate trials performed by the search
    pub iterations: u32,
    /// The search settled every track before the iteration cap
    pub converged: bool,
    /// The safe fallback encoding was kept
    pub fallback_used: bool,
    pub rotations: TrackCounts,
    pub translations: TrackCounts,
    pub scales: TrackCounts,
    pub curves: TrackCounts,
    /// Bits per frame of all animated tracks
    pub frame_bit_size: u32,
}

/// Result of [`compress_clip`]
#[derive(Debug, Clone)]
pub struct CompressionOutput {
    pub clip: CompressedClip,
    pub stats: CompressionStats,
    /// Non-fatal diagnostics; empty when the bound was met cleanly
    pub warnings: Vec<ConvergenceWarning>,
}

/// One encoding attempt before stats are assembled
struct Attempt {
    clip: CompressedClip,
    error: BoneError,
    iterations: u32,
    converged: bool,
    warnings: Vec<ConvergenceWarning>,
}

/// Pack every animated track, frame by frame, into byte-aligned segments
fn write_segments(
    prepared: &PreparedClip,
    encodings: &[TrackEncoding],
    segment_length: u32,
) -> Result<(Vec<SegmentHeader>, Vec<u8>)> {
    let num_samples = prepared.num_samples as u32;
    let animated: Vec<usize> = (0..encodings.len())
        .filter(|&t| encodings[t].format.is_animated())
        .collect();

    let mut segments = Vec::with_capacity(num_samples.div_ceil(segment_length) as usize);
    let mut data = Vec::new();
    let mut start = 0u32;
    while start < num_samples {
        let num_frames = (num_samples - start).min(segment_length);
        let mut writer = BitWriter::new();
        for frame in start..start + num_frames {
            for &track in &animated {
                encodings[track]
                    .encode_sample(&mut writer, prepared.tracks[track].samples[frame as usize])?;
            }
        }
        writer.align_to_byte();

        segments.push(SegmentHeader {
            offset: u32::try_from(data.len())
                .map_err(|_| AclError::config("packed data exceeds 4 GiB"))?,
            start_frame: start,
            num_frames,
        });
        data.extend_from_slice(writer.as_bytes());
        start += num_frames;
    }
    Ok((segments, data))
}

fn encode(
    skeleton: &Skeleton,
    prepared: &PreparedClip,
    settings: &CompressionSettings,
) -> Result<Attempt> {
    let analysis = analyze_prepared(prepared, skeleton, settings);
    let outcome = search_bit_rates(skeleton, prepared, &analysis, settings)?;

    let frame_bits: u64 = outcome
        .encodings
        .iter()
        .map(|e| e.sample_bits() as u64)
        .sum();
    let frame_bit_size = u32::try_from(frame_bits)
        .map_err(|_| AclError::config(format!("{} bits per frame is too large", frame_bits)))?;

    let (segments, data) = write_segments(prepared, &outcome.encodings, settings.segment_length)?;
    let header = ClipHeader {
        flags: 0,
        bone_count: prepared.num_bones as u16,
        curve_count: prepared.num_curves() as u16,
        frame_count: prepared.num_samples as u32,
        sample_rate: prepared.sample_rate,
        segment_count: segments.len() as u32,
        segment_length: settings.segment_length,
        rotation_format: settings.rotation_format,
        translation_format: settings.translation_format,
        scale_format: settings.scale_format,
        data_size: 0,
        frame_bit_size,
        hash: 0,
    };
    let clip = CompressedClip::assemble(header, &outcome.encodings, &segments, &data)?;
    let error = measure_clip_error(skeleton, prepared, &clip, settings)?;

    Ok(Attempt {
        clip,
        error,
        iterations: outcome.iterations,
        converged: outcome.converged,
        warnings: outcome.warning.into_iter().collect(),
    })
}

/// Compress a clip so that no bone deviates by more than the error threshold.
///
/// Fails before any work on malformed input or invalid settings. Convergence
/// problems are not errors: they are reported in [`CompressionOutput::warnings`].
pub fn compress_clip(
    skeleton: &Skeleton,
    clip: &RawClip,
    settings: &CompressionSettings,
) -> Result<CompressionOutput> {
    settings.validate()?;
    if clip.curves.len() > u16::MAX as usize {
        return Err(AclError::malformed(format!(
            "clip '{}' has {} curves, maximum is {}",
            clip.name,
            clip.curves.len(),
            u16::MAX
        )));
    }
    let prepared = PreparedClip::new(clip, skeleton)?;

    debug!(
        clip = %clip.name,
        bones = prepared.num_bones,
        curves = prepared.num_curves(),
        samples = prepared.num_samples,
        threshold = settings.error_threshold,
        "compressing clip"
    );

    let mut attempt = encode(skeleton, &prepared, settings)?;
    let mut fallback_used = false;

    if attempt.error.error > settings.error_threshold && settings.safety_fallback {
        debug!(
            error = attempt.error.error,
            bone = attempt.error.bone_index,
            "error bound missed, retrying with safe settings"
        );
        let safe = encode(skeleton, &prepared, &settings.safest())?;
        if safe.error.error < attempt.error.error {
            debug!(error = safe.error.error, "keeping safe encoding");
            attempt = safe;
            fallback_used = true;
        }
    }

    let mut warnings = attempt.warnings;
    if attempt.error.error > settings.error_threshold {
        warnings.push(warning(
            ConvergenceReason::ThresholdExceeded,
            attempt.error,
            settings,
        ));
    }
    for w in &warnings {
        warn!(clip = %clip.name, "{}", w);
    }

    let mut stats = CompressionStats {
        clip_name: clip.name.clone(),
        num_bones: prepared.num_bones,
        num_curves: prepared.num_curves(),
        num_samples: prepared.num_samples as u32,
        sample_rate: prepared.sample_rate,
        raw_size: clip.raw_size(),
        compressed_size: attempt.clip.size(),
        compression_ratio: clip.raw_size() as f32 / attempt.clip.size() as f32,
        max_error: attempt.error,
        iterations: attempt.iterations,
        converged: attempt.converged,
        fallback_used,
        rotations: TrackCounts::default(),
        translations: TrackCounts::default(),
        scales: TrackCounts::default(),
        curves: TrackCounts::default(),
        frame_bit_size: attempt.clip.header().frame_bit_size,
    };
    for (index, encoding) in attempt.clip.tracks().iter().enumerate() {
        let counts = if index < prepared.num_bones * 3 {
            match TrackKind::for_bone_slot(index % 3) {
                TrackKind::Rotation => &mut stats.rotations,
                TrackKind::Translation => &mut stats.translations,
                _ => &mut stats.scales,
            }
        } else {
            &mut stats.curves
        };
        counts.add(encoding.format);
    }

    debug!(
        clip = %clip.name,
        raw = stats.raw_size,
        compressed = stats.compressed_size,
        ratio = stats.compression_ratio,
        max_error = stats.max_error.error,
        "clip compressed"
    );

    Ok(CompressionOutput {
        clip: attempt.clip,
        stats,
        warnings,
    })
}
