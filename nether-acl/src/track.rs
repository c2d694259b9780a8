//! Raw (uncompressed) clip data
//!
//! A [`RawClip`] holds one [`BoneTrack`] per skeleton bone plus any number of
//! scalar curves, all uniformly sampled at the clip's sample rate.

use glam::{Quat, Vec3, Vec4};

use crate::error::{AclError, Result};
use crate::math::{Transform, align_hemisphere, quat_to_channels, try_normalize_quat};
use crate::skeleton::Skeleton;

/// Sample rate used for static poses (clips with a single sample)
pub const STATIC_POSE_SAMPLE_RATE: f32 = 30.0;

/// Default precision of scalar curves
pub const DEFAULT_CURVE_PRECISION: f32 = 0.001;

/// Component stored by a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TrackKind {
    Rotation,
    Translation,
    Scale,
    Scalar,
}

impl TrackKind {
    /// Number of channels of one sample
    pub const fn num_channels(self) -> usize {
        match self {
            Self::Rotation => 4,
            Self::Translation | Self::Scale => 3,
            Self::Scalar => 1,
        }
    }

    /// Kind of the transform track at `track_index % 3`
    pub(crate) const fn for_bone_slot(slot: usize) -> Self {
        match slot {
            0 => Self::Rotation,
            1 => Self::Translation,
            _ => Self::Scale,
        }
    }

    /// Write a decoded sample into the matching component of `transform`
    pub(crate) fn apply(self, transform: &mut Transform, value: Vec4) {
        match self {
            Self::Rotation => {
                transform.rotation = Quat::from_xyzw(value.x, value.y, value.z, value.w)
            }
            Self::Translation => transform.translation = value.truncate(),
            Self::Scale => transform.scale = value.truncate(),
            Self::Scalar => {}
        }
    }
}

/// Transform tracks of one bone.
///
/// A track holding exactly one sample is broadcast to every frame. An empty
/// scale track means unit scale.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoneTrack {
    pub rotations: Vec<Quat>,
    pub translations: Vec<Vec3>,
    pub scales: Vec<Vec3>,
}

impl BoneTrack {
    /// Single-sample tracks holding the given pose (bones without animation data)
    pub fn from_pose(pose: Transform) -> Self {
        Self {
            rotations: vec![pose.rotation],
            translations: vec![pose.translation],
            scales: vec![pose.scale],
        }
    }

    /// Build from a per-frame sequence of transforms
    pub fn from_transforms(transforms: &[Transform]) -> Self {
        Self {
            rotations: transforms.iter().map(|t| t.rotation).collect(),
            translations: transforms.iter().map(|t| t.translation).collect(),
            scales: transforms.iter().map(|t| t.scale).collect(),
        }
    }

    /// Transform at `frame` (broadcast rules applied)
    pub fn sample(&self, frame: usize) -> Transform {
        Transform {
            rotation: pick(&self.rotations, frame).unwrap_or(Quat::IDENTITY),
            translation: pick(&self.translations, frame).unwrap_or(Vec3::ZERO),
            scale: pick(&self.scales, frame).unwrap_or(Vec3::ONE),
        }
    }
}

fn pick<T: Copy>(samples: &[T], frame: usize) -> Option<T> {
    match samples.len() {
        0 => None,
        1 => Some(samples[0]),
        _ => samples.get(frame).copied(),
    }
}

/// Animated scalar value (morph target weight, material parameter, ...)
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarCurve {
    pub name: String,
    pub samples: Vec<f32>,
    /// Maximum reconstruction error allowed for this curve
    pub precision: f32,
}

impl ScalarCurve {
    pub fn new(name: impl Into<String>, samples: Vec<f32>) -> Self {
        Self {
            name: name.into(),
            samples,
            precision: DEFAULT_CURVE_PRECISION,
        }
    }

    pub fn with_precision(mut self, precision: f32) -> Self {
        self.precision = precision;
        self
    }
}

/// Uniformly sampled animation clip, prior to compression
#[derive(Debug, Clone, PartialEq)]
pub struct RawClip {
    pub name: String,
    /// Number of samples per track
    pub num_samples: u32,
    /// Samples per second
    pub sample_rate: f32,
    /// One entry per skeleton bone, in bone order
    pub bone_tracks: Vec<BoneTrack>,
    pub curves: Vec<ScalarCurve>,
}

impl RawClip {
    pub fn new(name: impl Into<String>, num_samples: u32, sample_rate: f32) -> Self {
        Self {
            name: name.into(),
            num_samples,
            sample_rate,
            bone_tracks: Vec::new(),
            curves: Vec::new(),
        }
    }

    /// A clip with one sample (or none) is a static pose
    pub fn is_static_pose(&self) -> bool {
        self.num_samples <= 1
    }

    /// Sample rate actually encoded (static poses use a fixed rate)
    pub fn effective_sample_rate(&self) -> f32 {
        if self.is_static_pose() {
            STATIC_POSE_SAMPLE_RATE
        } else {
            self.sample_rate
        }
    }

    /// Clip duration in seconds: `(num_samples - 1) / sample_rate`
    pub fn duration(&self) -> f32 {
        if self.is_static_pose() {
            0.0
        } else {
            (self.num_samples - 1) as f32 / self.sample_rate
        }
    }

    /// Size of the uncompressed data in bytes (f32 QVV per bone per frame, f32 per curve sample)
    pub fn raw_size(&self) -> usize {
        let frames = self.num_samples as usize;
        self.bone_tracks.len() * frames * 10 * 4 + self.curves.len() * frames * 4
    }

    /// Check the clip against the skeleton it animates
    pub fn validate(&self, skeleton: &Skeleton) -> Result<()> {
        if self.num_samples == 0 {
            return Err(AclError::malformed(format!(
                "clip '{}' has no samples",
                self.name
            )));
        }
        if !self.is_static_pose() && !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(AclError::malformed(format!(
                "clip '{}' has invalid sample rate {}",
                self.name, self.sample_rate
            )));
        }
        if self.bone_tracks.len() != skeleton.num_bones() {
            return Err(AclError::malformed(format!(
                "clip '{}' has {} bone tracks but the skeleton has {} bones",
                self.name,
                self.bone_tracks.len(),
                skeleton.num_bones()
            )));
        }
        if self.bone_tracks.is_empty() && self.curves.is_empty() {
            return Err(AclError::malformed(format!(
                "clip '{}' has neither bone tracks nor curves",
                self.name
            )));
        }

        let frames = self.num_samples as usize;
        for (bone, track) in self.bone_tracks.iter().enumerate() {
            check_len("rotation", bone, track.rotations.len(), frames, false)?;
            check_len("translation", bone, track.translations.len(), frames, false)?;
            check_len("scale", bone, track.scales.len(), frames, true)?;

            if !track.translations.iter().all(|v| v.is_finite())
                || !track.scales.iter().all(|v| v.is_finite())
            {
                return Err(AclError::malformed(format!(
                    "bone {} has non-finite samples",
                    bone
                )));
            }
            if track.rotations.iter().any(|q| try_normalize_quat(*q).is_none()) {
                return Err(AclError::malformed(format!(
                    "bone {} has a degenerate rotation sample",
                    bone
                )));
            }
        }

        for (index, curve) in self.curves.iter().enumerate() {
            if curve.samples.len() != frames {
                return Err(AclError::malformed(format!(
                    "curve {} ('{}') has {} samples, expected {}",
                    index,
                    curve.name,
                    curve.samples.len(),
                    frames
                )));
            }
            if !curve.samples.iter().all(|v| v.is_finite()) {
                return Err(AclError::malformed(format!(
                    "curve {} ('{}') has non-finite samples",
                    index, curve.name
                )));
            }
            if !(curve.precision.is_finite() && curve.precision > 0.0) {
                return Err(AclError::InvalidConfiguration(format!(
                    "curve {} ('{}') has precision {}, must be > 0",
                    index, curve.name, curve.precision
                )));
            }
        }

        Ok(())
    }

    /// Local pose of every bone at `frame`
    pub fn pose(&self, frame: usize, out: &mut [Transform]) {
        for (dst, track) in out.iter_mut().zip(&self.bone_tracks) {
            *dst = track.sample(frame);
        }
    }
}

fn check_len(what: &str, bone: usize, len: usize, frames: usize, may_be_empty: bool) -> Result<()> {
    if len == frames || len == 1 || (len == 0 && may_be_empty) {
        Ok(())
    } else {
        Err(AclError::malformed(format!(
            "bone {} {} track has {} samples, expected {}",
            bone, what, len, frames
        )))
    }
}

/// One track expanded to full length, as 4-lane channel vectors
#[derive(Debug, Clone)]
pub(crate) struct PreparedTrack {
    pub kind: TrackKind,
    pub samples: Vec<Vec4>,
    /// Curves only: allowed reconstruction error
    pub precision: f32,
}

/// Validated clip with broadcasts expanded, rotations normalized and made
/// hemisphere-continuous. Track `3 * bone + slot` holds rotation/translation/scale,
/// curves follow the bone tracks.
#[derive(Debug, Clone)]
pub(crate) struct PreparedClip {
    pub num_samples: usize,
    pub sample_rate: f32,
    pub num_bones: usize,
    pub tracks: Vec<PreparedTrack>,
}

impl PreparedClip {
    pub fn new(clip: &RawClip, skeleton: &Skeleton) -> Result<Self> {
        clip.validate(skeleton)?;

        let frames = clip.num_samples as usize;
        let mut tracks = Vec::with_capacity(clip.bone_tracks.len() * 3 + clip.curves.len());

        for bone_track in &clip.bone_tracks {
            let mut previous = Quat::IDENTITY;
            let mut rotations = Vec::with_capacity(frames);
            for frame in 0..frames {
                let raw = pick(&bone_track.rotations, frame).unwrap_or(Quat::IDENTITY);
                let q = try_normalize_quat(raw).unwrap_or(Quat::IDENTITY);
                // First sample keeps its sign; later ones follow their predecessor
                let q = if frame == 0 { q } else { align_hemisphere(previous, q) };
                previous = q;
                rotations.push(quat_to_channels(q));
            }
            tracks.push(PreparedTrack {
                kind: TrackKind::Rotation,
                samples: rotations,
                precision: 0.0,
            });

            let translations = (0..frames)
                .map(|f| pick(&bone_track.translations, f).unwrap_or(Vec3::ZERO).extend(0.0))
                .collect();
            tracks.push(PreparedTrack {
                kind: TrackKind::Translation,
                samples: translations,
                precision: 0.0,
            });

            let scales = (0..frames)
                .map(|f| pick(&bone_track.scales, f).unwrap_or(Vec3::ONE).extend(0.0))
                .collect();
            tracks.push(PreparedTrack {
                kind: TrackKind::Scale,
                samples: scales,
                precision: 0.0,
            });
        }

        for curve in &clip.curves {
            tracks.push(PreparedTrack {
                kind: TrackKind::Scalar,
                samples: curve.samples.iter().map(|&v| Vec4::new(v, 0.0, 0.0, 0.0)).collect(),
                precision: curve.precision,
            });
        }

        Ok(Self {
            num_samples: frames,
            sample_rate: clip.effective_sample_rate(),
            num_bones: clip.bone_tracks.len(),
            tracks,
        })
    }

    pub fn num_curves(&self) -> usize {
        self.tracks.len() - self.num_bones * 3
    }

    /// Local transform of `bone` at `frame`
    pub fn bone_transform(&self, bone: usize, frame: usize) -> Transform {
        let rotation = self.tracks[bone * 3].samples[frame];
        Transform {
            rotation: Quat::from_xyzw(rotation.x, rotation.y, rotation.z, rotation.w),
            translation: self.tracks[bone * 3 + 1].samples[frame].truncate(),
            scale: self.tracks[bone * 3 + 2].samples[frame].truncate(),
        }
    }

    /// Local pose of every bone at `frame`
    pub fn local_pose(&self, frame: usize, out: &mut [Transform]) {
        for (bone, dst) in out.iter_mut().enumerate().take(self.num_bones) {
            *dst = self.bone_transform(bone, frame);
        }
    }

    /// Duration in seconds
    pub fn duration(&self) -> f32 {
        if self.num_samples <= 1 {
            0.0
        } else {
            (self.num_samples - 1) as f32 / self.sample_rate
        }
    }
}
