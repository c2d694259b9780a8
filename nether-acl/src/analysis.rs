//! Range and constant analysis
//!
//! Computes per-track ranges and classifies each track as default (equal to the
//! rest pose, omitted from the stream), constant (one value in the metadata) or
//! animated (per-sample bits).

use glam::Vec4;

use crate::error::Result;
use crate::math::{channels_to_quat, quat_to_channels, try_normalize_quat};
use crate::settings::CompressionSettings;
use crate::skeleton::Skeleton;
use crate::track::{PreparedClip, RawClip, TrackKind};

/// Per-channel minimum and extent of a track
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TrackRange {
    pub min: Vec4,
    pub extent: Vec4,
}

impl TrackRange {
    /// Range over the first `num_channels` lanes of `samples` (unused lanes stay 0)
    pub fn from_samples(samples: &[Vec4], num_channels: usize) -> Self {
        let Some(first) = samples.first() else {
            return Self::default();
        };
        let mut min = *first;
        let mut max = *first;
        for s in &samples[1..] {
            min = min.min(*s);
            max = max.max(*s);
        }
        let mask = channel_mask(num_channels);
        Self {
            min: min * mask,
            extent: (max - min) * mask,
        }
    }

    pub fn max(&self) -> Vec4 {
        self.min + self.extent
    }

    /// Largest extent over all channels
    pub fn max_extent(&self) -> f32 {
        self.extent.max_element()
    }

    /// Range midpoint, the constant value with the smallest worst-case error
    pub fn center(&self) -> Vec4 {
        self.min + self.extent * 0.5
    }
}

fn channel_mask(num_channels: usize) -> Vec4 {
    match num_channels {
        1 => Vec4::new(1.0, 0.0, 0.0, 0.0),
        2 => Vec4::new(1.0, 1.0, 0.0, 0.0),
        3 => Vec4::new(1.0, 1.0, 1.0, 0.0),
        _ => Vec4::ONE,
    }
}

/// How a track is stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TrackClass {
    /// Equal to the rest pose: no data at all
    Default,
    /// A single value stored in the metadata table
    Constant,
    /// Per-sample quantized data
    Animated,
}

/// Result of analyzing one track
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackAnalysis {
    pub kind: TrackKind,
    pub range: TrackRange,
    pub class: TrackClass,
    /// Value reconstructed for default and constant tracks
    pub constant_value: Vec4,
}

/// Analyze one track.
///
/// `rest` is the rest-pose value used for default detection (`None` for curves).
/// Rotation samples must already be normalized and hemisphere-continuous.
pub fn analyze_track(
    kind: TrackKind,
    samples: &[Vec4],
    rest: Option<Vec4>,
    epsilon: f32,
) -> TrackAnalysis {
    let range = TrackRange::from_samples(samples, kind.num_channels());
    let is_constant = range.max_extent() <= epsilon;

    if let Some(rest) = rest {
        let near_rest = |reference: Vec4| {
            samples
                .iter()
                .all(|s| (*s - reference).abs().max_element() <= epsilon)
        };
        let is_default = if kind == TrackKind::Rotation {
            near_rest(rest) || near_rest(-rest)
        } else {
            near_rest(rest)
        };
        if is_default {
            return TrackAnalysis {
                kind,
                range,
                class: TrackClass::Default,
                constant_value: rest,
            };
        }
    }

    if is_constant {
        let center = range.center();
        let constant_value = if kind == TrackKind::Rotation {
            try_normalize_quat(channels_to_quat(center))
                .map(quat_to_channels)
                .unwrap_or(samples[0])
        } else {
            center
        };
        return TrackAnalysis {
            kind,
            range,
            class: TrackClass::Constant,
            constant_value,
        };
    }

    TrackAnalysis {
        kind,
        range,
        class: TrackClass::Animated,
        constant_value: Vec4::ZERO,
    }
}

/// Epsilon used for constant detection of a track kind
pub(crate) fn epsilon_for(kind: TrackKind, settings: &CompressionSettings, precision: f32) -> f32 {
    match kind {
        TrackKind::Rotation => settings.rotation_epsilon,
        TrackKind::Translation | TrackKind::Scale => settings.linear_epsilon,
        TrackKind::Scalar => precision,
    }
}

pub(crate) fn analyze_prepared(
    prepared: &PreparedClip,
    skeleton: &Skeleton,
    settings: &CompressionSettings,
) -> Vec<TrackAnalysis> {
    prepared
        .tracks
        .iter()
        .enumerate()
        .map(|(index, track)| {
            let rest = if index < prepared.num_bones * 3 {
                let bind = skeleton.bone(index / 3).bind_transform;
                Some(match track.kind {
                    TrackKind::Rotation => quat_to_channels(bind.rotation),
                    TrackKind::Translation => bind.translation.extend(0.0),
                    _ => bind.scale.extend(0.0),
                })
            } else {
                None
            };
            let epsilon = epsilon_for(track.kind, settings, track.precision);
            analyze_track(track.kind, &track.samples, rest, epsilon)
        })
        .collect()
}

/// Analyze every track of a clip.
///
/// Tracks are ordered rotation/translation/scale per bone, then curves.
pub fn analyze_clip(
    skeleton: &Skeleton,
    clip: &RawClip,
    settings: &CompressionSettings,
) -> Result<Vec<TrackAnalysis>> {
    let prepared = PreparedClip::new(clip, skeleton)?;
    Ok(analyze_prepared(&prepared, skeleton, settings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Transform;
    use crate::skeleton::Bone;
    use crate::track::{BoneTrack, ScalarCurve};
    use glam::{Quat, Vec3};

    #[test]
    fn test_range_from_samples() {
        let samples = [
            Vec4::new(1.0, -2.0, 0.5, 9.0),
            Vec4::new(3.0, 2.0, 0.5, -9.0),
        ];
        let range = TrackRange::from_samples(&samples, 3);
        assert_eq!(range.min, Vec4::new(1.0, -2.0, 0.5, 0.0));
        assert_eq!(range.extent, Vec4::new(2.0, 4.0, 0.0, 0.0));
        assert_eq!(range.max_extent(), 4.0);
    }

    #[test]
    fn test_default_translation_detected() {
        let rest = Vec4::new(0.0, 1.0, 0.0, 0.0);
        let samples = [rest, rest + Vec4::new(0.0005, 0.0, 0.0, 0.0)];
        let analysis = analyze_track(TrackKind::Translation, &samples, Some(rest), 0.001);
        assert_eq!(analysis.class, TrackClass::Default);
        assert_eq!(analysis.constant_value, rest);
    }

    #[test]
    fn test_constant_but_not_rest() {
        let rest = Vec4::ZERO;
        let value = Vec4::new(5.0, 0.0, 0.0, 0.0);
        let analysis = analyze_track(TrackKind::Translation, &[value; 8], Some(rest), 0.001);
        assert_eq!(analysis.class, TrackClass::Constant);
        assert_eq!(analysis.constant_value, value);
    }

    #[test]
    fn test_negated_rest_rotation_is_default() {
        let rest = quat_to_channels(Quat::from_rotation_x(0.3));
        let analysis = analyze_track(TrackKind::Rotation, &[-rest; 4], Some(rest), 0.0001);
        assert_eq!(analysis.class, TrackClass::Default);
    }

    #[test]
    fn test_animated_track() {
        let samples: Vec<Vec4> = (0..4).map(|i| Vec4::new(0.0, 0.0, i as f32, 0.0)).collect();
        let analysis = analyze_track(TrackKind::Translation, &samples, Some(Vec4::ZERO), 0.001);
        assert_eq!(analysis.class, TrackClass::Animated);
        assert_eq!(analysis.range.extent.z, 3.0);
    }

    #[test]
    fn test_curves_use_their_precision() {
        let skeleton = Skeleton::new(vec![Bone::new("root", None, Transform::IDENTITY)]).unwrap();
        let mut clip = RawClip::new("curves", 3, 30.0);
        clip.bone_tracks.push(BoneTrack::from_pose(Transform::IDENTITY));
        clip.curves.push(ScalarCurve::new("flat", vec![0.5, 0.5004, 0.5]).with_precision(0.001));
        clip.curves.push(ScalarCurve::new("ramp", vec![0.0, 0.5, 1.0]));

        let analysis = analyze_clip(&skeleton, &clip, &CompressionSettings::default()).unwrap();
        assert_eq!(analysis.len(), 5);
        assert!(analysis[..3].iter().all(|a| a.class == TrackClass::Default));
        assert_eq!(analysis[3].class, TrackClass::Constant);
        assert_eq!(analysis[4].class, TrackClass::Animated);
    }

    #[test]
    fn test_analysis_is_deterministic() {
        let skeleton = Skeleton::new(vec![Bone::new(
            "root",
            None,
            Transform::from_rotation_translation(Quat::IDENTITY, Vec3::ONE),
        )])
        .unwrap();
        let mut clip = RawClip::new("wave", 16, 30.0);
        clip.bone_tracks.push(BoneTrack {
            rotations: (0..16).map(|i| Quat::from_rotation_y(i as f32 * 0.1)).collect(),
            translations: vec![Vec3::ONE],
            scales: vec![],
        });
        let settings = CompressionSettings::default();
        let a = analyze_clip(&skeleton, &clip, &settings).unwrap();
        let b = analyze_clip(&skeleton, &clip, &settings).unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].class, TrackClass::Animated);
        assert_eq!(a[1].class, TrackClass::Default);
    }
}
