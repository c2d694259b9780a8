//! Decompression context
//!
//! Samples a [`CompressedClip`] at arbitrary times. The two keyframes that
//! bracket the requested time are decoded into scratch buffers owned by the
//! context and reused as long as the bracketing pair does not change.
//!
//! ```ignore
//! let mut context = DecompressionContext::new(&clip);
//! let pose = context.sample(0.5)?;
//! ```

use glam::Vec4;

use crate::bitstream::BitReader;
use crate::error::{AclError, Result};
use crate::format::CompressedClip;
use crate::math::{Transform, interpolate_rotation, interpolate_scalar, interpolate_vector};
use crate::track::TrackKind;

/// Keyframe pair and blend factor for a sample time
#[derive(Debug, Clone, Copy, PartialEq)]
struct KeyPosition {
    frame0: u32,
    frame1: u32,
    alpha: f32,
}

/// Per-playback sampling state over a compressed clip
#[derive(Debug, Clone)]
pub struct DecompressionContext<'a> {
    clip: &'a CompressedClip,
    key0: Vec<Transform>,
    key1: Vec<Transform>,
    curves0: Vec<f32>,
    curves1: Vec<f32>,
    pose: Vec<Transform>,
    curves: Vec<f32>,
    /// Frames currently decoded into `key0`/`key1`
    cached: Option<(u32, u32)>,
}

impl<'a> DecompressionContext<'a> {
    /// Allocate every buffer sampling will need
    pub fn new(clip: &'a CompressedClip) -> Self {
        let bones = clip.num_bones();
        let curves = clip.num_curves();
        Self {
            clip,
            key0: vec![Transform::IDENTITY; bones],
            key1: vec![Transform::IDENTITY; bones],
            curves0: vec![0.0; curves],
            curves1: vec![0.0; curves],
            pose: vec![Transform::IDENTITY; bones],
            curves: vec![0.0; curves],
            cached: None,
        }
    }

    pub fn clip(&self) -> &'a CompressedClip {
        self.clip
    }

    /// Forget the cached keyframes
    pub fn reset(&mut self) {
        self.cached = None;
    }

    /// Locate the keyframes around `time`. Time is clamped to the clip, NaN is 0.
    fn key_position(&self, time: f32) -> KeyPosition {
        let last = self.clip.num_samples() - 1;
        let time = if time.is_nan() { 0.0 } else { time };
        let position = time.clamp(0.0, self.clip.duration()) * self.clip.sample_rate();
        let frame0 = (position.floor() as u32).min(last);
        let frame1 = (frame0 + 1).min(last);
        let alpha = if frame0 == frame1 {
            0.0
        } else {
            (position - frame0 as f32).clamp(0.0, 1.0)
        };
        KeyPosition {
            frame0,
            frame1,
            alpha,
        }
    }

    fn ensure_keys(&mut self, frame0: u32, frame1: u32) -> Result<()> {
        if self.cached == Some((frame0, frame1)) {
            return Ok(());
        }
        self.cached = None;
        decode_frame(self.clip, frame0, &mut self.key0, &mut self.curves0)?;
        if frame1 == frame0 {
            self.key1.copy_from_slice(&self.key0);
            self.curves1.copy_from_slice(&self.curves0);
        } else {
            decode_frame(self.clip, frame1, &mut self.key1, &mut self.curves1)?;
        }
        self.cached = Some((frame0, frame1));
        Ok(())
    }

    fn blend_pose(&mut self, alpha: f32) {
        for ((out, a), b) in self.pose.iter_mut().zip(&self.key0).zip(&self.key1) {
            *out = blend(a, b, alpha);
        }
        for ((out, a), b) in self.curves.iter_mut().zip(&self.curves0).zip(&self.curves1) {
            *out = interpolate_scalar(*a, *b, alpha);
        }
    }

    /// Local pose of every bone at `time` (seconds)
    pub fn sample(&mut self, time: f32) -> Result<&[Transform]> {
        let key = self.key_position(time);
        self.ensure_keys(key.frame0, key.frame1)?;
        self.blend_pose(key.alpha);
        Ok(&self.pose)
    }

    /// Sample into a caller-provided buffer of at least `num_bones` transforms
    pub fn sample_into(&mut self, time: f32, out: &mut [Transform]) -> Result<()> {
        if out.len() < self.pose.len() {
            return Err(AclError::malformed(format!(
                "output holds {} transforms, clip has {} bones",
                out.len(),
                self.pose.len()
            )));
        }
        let pose = self.sample(time)?;
        out[..pose.len()].copy_from_slice(pose);
        Ok(())
    }

    /// Pose exactly at keyframe `frame` (clamped to the last frame)
    pub fn sample_frame(&mut self, frame: u32) -> Result<&[Transform]> {
        let frame = frame.min(self.clip.num_samples() - 1);
        self.ensure_keys(frame, frame)?;
        self.blend_pose(0.0);
        Ok(&self.pose)
    }

    /// Curve values at `time`, in curve order
    pub fn sample_curves(&mut self, time: f32) -> Result<&[f32]> {
        let key = self.key_position(time);
        self.ensure_keys(key.frame0, key.frame1)?;
        self.blend_pose(key.alpha);
        Ok(&self.curves)
    }

    /// Local transform of a single bone at `time`.
    ///
    /// Decodes only that bone's tracks and leaves the keyframe cache untouched.
    pub fn sample_bone(&self, time: f32, bone: usize) -> Result<Transform> {
        if bone >= self.clip.num_bones() {
            return Err(AclError::malformed(format!(
                "bone {} out of range ({} bones)",
                bone,
                self.clip.num_bones()
            )));
        }
        let key = self.key_position(time);
        if self.cached == Some((key.frame0, key.frame1)) {
            return Ok(blend(&self.key0[bone], &self.key1[bone], key.alpha));
        }
        let a = decode_bone(self.clip, key.frame0, bone)?;
        let b = if key.frame1 == key.frame0 {
            a
        } else {
            decode_bone(self.clip, key.frame1, bone)?
        };
        Ok(blend(&a, &b, key.alpha))
    }
}

fn blend(a: &Transform, b: &Transform, alpha: f32) -> Transform {
    Transform {
        rotation: interpolate_rotation(a.rotation, b.rotation, alpha),
        translation: interpolate_vector(a.translation, b.translation, alpha),
        scale: interpolate_vector(a.scale, b.scale, alpha),
    }
}

/// Value of track `index` at `frame`
fn decode_track(clip: &CompressedClip, index: usize, frame: u32) -> Result<Vec4> {
    let encoding = clip.track(index);
    if !encoding.format.is_animated() {
        return Ok(encoding.range.min);
    }

    let segment_length = clip.header().segment_length;
    let segment_index = (frame / segment_length) as usize;
    let segment = clip
        .segments()
        .get(segment_index)
        .ok_or_else(|| AclError::corrupt(format!("frame {} has no segment", frame)))?;
    let local_frame = frame - segment.start_frame;

    let mut reader = BitReader::new(clip.segment_data(segment_index));
    let bit = local_frame as usize * clip.header().frame_bit_size as usize
        + clip.track_bit_offset(index) as usize;
    reader.seek(bit)?;
    encoding.decode_sample(&mut reader)
}

fn decode_bone(clip: &CompressedClip, frame: u32, bone: usize) -> Result<Transform> {
    let mut transform = Transform::IDENTITY;
    for slot in 0..3 {
        let value = decode_track(clip, bone * 3 + slot, frame)?;
        TrackKind::for_bone_slot(slot).apply(&mut transform, value);
    }
    Ok(transform)
}

/// Decode every track of one frame
fn decode_frame(
    clip: &CompressedClip,
    frame: u32,
    pose: &mut [Transform],
    curves: &mut [f32],
) -> Result<()> {
    for (bone, transform) in pose.iter_mut().enumerate() {
        *transform = decode_bone(clip, frame, bone)?;
    }
    let first_curve = clip.num_bones() * 3;
    for (curve, value) in curves.iter_mut().enumerate() {
        *value = decode_track(clip, first_curve + curve, frame)?.x;
    }
    Ok(())
}
