//! Nether-ACL: error-bounded skeletal animation compression
//!
//! Compresses uniformly sampled skeletal clips (per-bone rotation, translation
//! and scale tracks plus scalar curves) so that no bone's object-space position
//! deviates from the source by more than a caller-chosen threshold, and samples
//! the compressed clip at arbitrary times.
//!
//! **This is a pure codec** - importing clips from glTF and writing `.nacl`
//! files is handled by the `nether-acl` command line tool.
//!
//! # Pipeline
//!
//! | Stage | Module | What it does |
//! |-------|--------|--------------|
//! | Data model | `track`, `skeleton` | Validates tracks against the skeleton |
//! | Analysis | `analysis` | Ranges, constant and default (rest pose) tracks |
//! | Codec | `quantize`, `bitstream` | Range-reduced quantization, smallest-three, bit packing |
//! | Driver | `driver`, `error_metric` | Per-track bit rate search under the error bound |
//! | Container | `format` | Header, metadata and segment tables, xxh3 integrity hash |
//! | Playback | `decompress` | Keyframe decoding and interpolation |
//!
//! # Error Metric
//!
//! A bone's error is the largest distance between raw and compressed positions
//! of virtual vertices attached to it (its origin plus one point along each
//! local axis), measured in object space so ancestor errors accumulate.
//!
//! # Usage
//!
//! ```
//! use glam::{Quat, Vec3};
//! use nether_acl::{
//!     Bone, BoneTrack, CompressionSettings, DecompressionContext, RawClip, Skeleton, Transform,
//!     compress_clip,
//! };
//!
//! let skeleton = Skeleton::new(vec![Bone::new("root", None, Transform::IDENTITY)]).unwrap();
//!
//! let mut clip = RawClip::new("slide", 4, 30.0);
//! clip.bone_tracks.push(BoneTrack {
//!     rotations: vec![Quat::IDENTITY],
//!     translations: (0..4).map(|i| Vec3::new(0.0, 0.0, i as f32)).collect(),
//!     scales: vec![],
//! });
//!
//! let output = compress_clip(&skeleton, &clip, &CompressionSettings::default()).unwrap();
//! assert!(output.warnings.is_empty());
//!
//! let mut context = DecompressionContext::new(&output.clip);
//! let pose = context.sample(1.0 / 30.0).unwrap();
//! assert!((pose[0].translation.z - 1.0).abs() < 0.01);
//! ```

pub mod analysis;
pub mod bitstream;
mod compress;
mod decompress;
mod driver;
mod error;
pub mod error_metric;
pub mod format;
pub mod math;
pub mod quantize;
mod settings;
mod skeleton;
mod track;

pub use analysis::{TrackAnalysis, TrackClass, TrackRange, analyze_clip, analyze_track};
pub use compress::{CompressionOutput, CompressionStats, TrackCounts, compress_clip};
pub use decompress::DecompressionContext;
pub use error::{AclError, ConvergenceReason, ConvergenceWarning, Result};
pub use error_metric::{BoneError, calculate_clip_error};
pub use format::{ClipHeader, CompressedClip, SegmentHeader};
pub use math::Transform;
pub use quantize::{TrackEncoding, TrackFormat};
pub use settings::{CompressionLevel, CompressionSettings, RotationFormat, VectorFormat};
pub use skeleton::{Bone, MAX_BONES, Skeleton};
pub use track::{
    BoneTrack, DEFAULT_CURVE_PRECISION, RawClip, STATIC_POSE_SAMPLE_RATE, ScalarCurve, TrackKind,
};

/// File extension of compressed clips
pub const CLIP_EXTENSION: &str = "nacl";
