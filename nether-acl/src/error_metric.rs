//! Object-space error measurement
//!
//! A bone's error is the largest distance between raw and compressed positions
//! of four virtual vertices rigidly attached to it: the bone origin and one
//! point at distance `d` along each local axis. Measuring in object space
//! accumulates the error of every ancestor.

use glam::{Affine3A, Vec3A};
use serde::{Deserialize, Serialize};

use crate::decompress::DecompressionContext;
use crate::error::{AclError, Result};
use crate::format::CompressedClip;
use crate::math::Transform;
use crate::settings::CompressionSettings;
use crate::skeleton::Skeleton;
use crate::track::{PreparedClip, RawClip};

/// Worst error observed for a bone
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoneError {
    pub bone_index: usize,
    pub error: f32,
    /// Sample time in seconds
    pub sample_time: f32,
}

impl BoneError {
    /// Keep the larger of two errors (ties keep `self`)
    pub fn max(self, other: Self) -> Self {
        if other.error > self.error { other } else { self }
    }
}

/// Error between the raw and lossy object-space transforms of one bone
#[inline]
pub fn transform_error(raw: &Affine3A, lossy: &Affine3A, distance: f32) -> f32 {
    let vertices = [
        Vec3A::ZERO,
        Vec3A::X * distance,
        Vec3A::Y * distance,
        Vec3A::Z * distance,
    ];
    vertices
        .iter()
        .map(|v| (raw.transform_point3a(*v) - lossy.transform_point3a(*v)).length())
        .fold(0.0, f32::max)
}

/// Virtual vertex distance of every bone
pub(crate) fn vertex_distances(skeleton: &Skeleton, settings: &CompressionSettings) -> Vec<f32> {
    (0..skeleton.num_bones())
        .map(|i| skeleton.virtual_vertex_distance(i, settings))
        .collect()
}

/// Worst error over every bone and every frame of a compressed clip
pub(crate) fn measure_clip_error(
    skeleton: &Skeleton,
    prepared: &PreparedClip,
    compressed: &CompressedClip,
    settings: &CompressionSettings,
) -> Result<BoneError> {
    let num_bones = skeleton.num_bones();
    if compressed.num_bones() != num_bones || compressed.num_samples() as usize != prepared.num_samples
    {
        return Err(AclError::malformed(format!(
            "compressed clip has {} bones and {} samples, raw clip has {} and {}",
            compressed.num_bones(),
            compressed.num_samples(),
            num_bones,
            prepared.num_samples
        )));
    }

    let distances = vertex_distances(skeleton, settings);
    let mut context = DecompressionContext::new(compressed);
    let mut raw_local = vec![Transform::IDENTITY; num_bones];
    let mut raw_object = vec![Affine3A::IDENTITY; num_bones];
    let mut lossy_object = vec![Affine3A::IDENTITY; num_bones];
    let mut worst = BoneError::default();

    for frame in 0..prepared.num_samples {
        prepared.local_pose(frame, &mut raw_local);
        skeleton.local_to_object(&raw_local, &mut raw_object);
        let lossy_local = context.sample_frame(frame as u32)?;
        skeleton.local_to_object(lossy_local, &mut lossy_object);

        let sample_time = frame as f32 / prepared.sample_rate;
        for bone in 0..num_bones {
            let error = transform_error(&raw_object[bone], &lossy_object[bone], distances[bone]);
            worst = worst.max(BoneError {
                bone_index: bone,
                error,
                sample_time,
            });
        }
    }
    Ok(worst)
}

/// Worst object-space error of `compressed` against the raw clip it was built from
pub fn calculate_clip_error(
    skeleton: &Skeleton,
    raw: &RawClip,
    compressed: &CompressedClip,
    settings: &CompressionSettings,
) -> Result<BoneError> {
    let prepared = PreparedClip::new(raw, skeleton)?;
    measure_clip_error(skeleton, &prepared, compressed, settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Quat, Vec3};

    #[test]
    fn test_identical_transforms_have_no_error() {
        let t = Transform::from_rotation_translation(Quat::from_rotation_x(0.3), Vec3::ONE).to_affine();
        assert_eq!(transform_error(&t, &t, 3.0), 0.0);
    }

    #[test]
    fn test_translation_error_is_offset() {
        let raw = Affine3A::IDENTITY;
        let lossy = Affine3A::from_translation(Vec3::new(0.0, 0.5, 0.0));
        assert!((transform_error(&raw, &lossy, 3.0) - 0.5).abs() < 1.0e-6);
    }

    #[test]
    fn test_rotation_error_scales_with_distance() {
        let raw = Affine3A::IDENTITY;
        let lossy = Affine3A::from_quat(Quat::from_rotation_z(0.01));
        let near = transform_error(&raw, &lossy, 1.0);
        let far = transform_error(&raw, &lossy, 100.0);
        assert!(
            (far / near - 100.0).abs() < 0.1,
            "error should grow linearly: near {} far {}",
            near,
            far
        );
    }

    #[test]
    fn test_bone_error_max_keeps_first_on_tie() {
        let a = BoneError {
            bone_index: 1,
            error: 0.5,
            sample_time: 0.0,
        };
        let b = BoneError {
            bone_index: 2,
            error: 0.5,
            sample_time: 1.0,
        };
        assert_eq!(a.max(b).bone_index, 1);
    }
}
