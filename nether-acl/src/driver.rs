//! Bit rate search
//!
//! Every variable-format track starts at full precision. Rounds walk the tracks
//! in index order and try one bit less per unsettled track; a trial is kept when
//! the object-space error of the affected subtree stays within the threshold on
//! every sampled frame, otherwise it is reverted and the track settles.
//!
//! Lossy local and object-space poses are cached per sampled frame, so a trial
//! only re-encodes one track and recomposes the subtree under its bone.

use glam::{Affine3A, Vec4};
use tracing::{debug, trace};

use crate::analysis::{TrackAnalysis, TrackClass, TrackRange};
use crate::error::{ConvergenceReason, ConvergenceWarning, Result};
use crate::error_metric::{BoneError, transform_error, vertex_distances};
use crate::math::Transform;
use crate::quantize::{FULL_PRECISION, TrackEncoding, TrackFormat};
use crate::settings::{CompressionLevel, CompressionSettings, RotationFormat, VectorFormat};
use crate::skeleton::Skeleton;
use crate::track::{PreparedClip, PreparedTrack, TrackKind};

/// Rate tried by the coarse first step of the low compression levels
const COARSE_BIT_RATE: u8 = 16;

/// Result of a bit rate search
#[derive(Debug, Clone)]
pub(crate) struct SearchOutcome {
    pub encodings: Vec<TrackEncoding>,
    /// Number of trials performed
    pub iterations: u32,
    /// Every track settled before the iteration cap
    pub converged: bool,
    pub warning: Option<ConvergenceWarning>,
}

/// Smallest bit rate keeping every curve sample within its precision
fn select_curve_rate(track: &PreparedTrack, range: TrackRange) -> Result<u8> {
    for bit_rate in 1..FULL_PRECISION {
        let encoding = TrackEncoding {
            format: TrackFormat::QuantizedLinear,
            bit_rate,
            num_channels: 1,
            range,
        };
        let mut worst = 0.0f32;
        for sample in &track.samples {
            worst = worst.max((encoding.reconstruct(*sample)?.x - sample.x).abs());
        }
        if worst <= track.precision {
            return Ok(bit_rate);
        }
    }
    Ok(FULL_PRECISION)
}

/// Starting encoding of every track, and whether the search may lower its rate
pub(crate) fn initial_encodings(
    prepared: &PreparedClip,
    analysis: &[TrackAnalysis],
    settings: &CompressionSettings,
) -> Result<(Vec<TrackEncoding>, Vec<bool>)> {
    let mut encodings = Vec::with_capacity(analysis.len());
    let mut searchable = Vec::with_capacity(analysis.len());

    for (track, info) in prepared.tracks.iter().zip(analysis) {
        let num_channels = track.kind.num_channels() as u8;
        let (encoding, variable) = match info.class {
            TrackClass::Default => (
                TrackEncoding::constant(TrackFormat::Default, num_channels, info.constant_value),
                false,
            ),
            TrackClass::Constant => (
                TrackEncoding::constant(TrackFormat::Constant, num_channels, info.constant_value),
                false,
            ),
            TrackClass::Animated => {
                let (format, variable) = match track.kind {
                    TrackKind::Rotation => match settings.rotation_format {
                        RotationFormat::QuatFull => (TrackFormat::QuantizedLinear, false),
                        RotationFormat::SmallestThreeFull => {
                            (TrackFormat::QuantizedQuaternion, false)
                        }
                        RotationFormat::SmallestThreeVariable => {
                            (TrackFormat::QuantizedQuaternion, true)
                        }
                    },
                    TrackKind::Translation => (
                        TrackFormat::QuantizedLinear,
                        settings.translation_format == VectorFormat::Variable,
                    ),
                    TrackKind::Scale => (
                        TrackFormat::QuantizedLinear,
                        settings.scale_format == VectorFormat::Variable,
                    ),
                    TrackKind::Scalar => (TrackFormat::QuantizedLinear, false),
                };
                let mut encoding = TrackEncoding {
                    format,
                    bit_rate: FULL_PRECISION,
                    num_channels,
                    range: info.range,
                };
                if track.kind == TrackKind::Scalar {
                    encoding.bit_rate = select_curve_rate(track, info.range)?;
                }
                (encoding, variable)
            }
        };
        encodings.push(encoding);
        searchable.push(variable);
    }
    Ok((encodings, searchable))
}

struct RateSearch<'a> {
    skeleton: &'a Skeleton,
    prepared: &'a PreparedClip,
    threshold: f32,
    num_bones: usize,
    /// Frames the error is measured on
    frames: Vec<usize>,
    distances: Vec<f32>,
    encodings: Vec<TrackEncoding>,
    /// Flat `[frame_slot * num_bones + bone]` buffers
    raw_object: Vec<Affine3A>,
    lossy_local: Vec<Transform>,
    lossy_object: Vec<Affine3A>,
    iterations: u32,
    cap: u32,
}

impl<'a> RateSearch<'a> {
    fn new(
        skeleton: &'a Skeleton,
        prepared: &'a PreparedClip,
        settings: &CompressionSettings,
        encodings: Vec<TrackEncoding>,
        cap: u32,
    ) -> Result<Self> {
        let num_bones = prepared.num_bones;
        let frames = sampled_frames(prepared.num_samples, settings.error_sample_stride as usize);
        let len = frames.len() * num_bones;

        let mut raw_object = vec![Affine3A::IDENTITY; len];
        let mut local = vec![Transform::IDENTITY; num_bones];
        for (slot, &frame) in frames.iter().enumerate() {
            prepared.local_pose(frame, &mut local);
            skeleton.local_to_object(&local, &mut raw_object[slot * num_bones..(slot + 1) * num_bones]);
        }

        let mut search = Self {
            skeleton,
            prepared,
            threshold: settings.error_threshold,
            num_bones,
            frames,
            distances: vertex_distances(skeleton, settings),
            encodings,
            raw_object,
            lossy_local: vec![Transform::IDENTITY; len],
            lossy_object: vec![Affine3A::IDENTITY; len],
            iterations: 0,
            cap,
        };
        for track in 0..num_bones * 3 {
            search.update_local(track)?;
        }
        let all: Vec<usize> = (0..num_bones).collect();
        search.update_object(&all);
        Ok(search)
    }

    fn cap_reached(&self) -> bool {
        self.iterations >= self.cap
    }

    /// Re-encode one bone track on every sampled frame
    fn update_local(&mut self, track: usize) -> Result<()> {
        let bone = track / 3;
        let kind = TrackKind::for_bone_slot(track % 3);
        let encoding = self.encodings[track];
        let prepared = self.prepared;
        let samples = &prepared.tracks[track].samples;
        for (slot, &frame) in self.frames.iter().enumerate() {
            let value: Vec4 = encoding.reconstruct(samples[frame])?;
            kind.apply(&mut self.lossy_local[slot * self.num_bones + bone], value);
        }
        Ok(())
    }

    /// Recompose object-space transforms of `bones` (ascending, parents first)
    fn update_object(&mut self, bones: &[usize]) {
        for slot in 0..self.frames.len() {
            let base = slot * self.num_bones;
            for &bone in bones {
                let local = self.lossy_local[base + bone].to_affine();
                self.lossy_object[base + bone] = match self.skeleton.parent(bone) {
                    Some(parent) => self.lossy_object[base + parent] * local,
                    None => local,
                };
            }
        }
    }

    /// Worst error over `bones` on every sampled frame
    fn measure(&self, bones: &[usize]) -> BoneError {
        let mut worst = BoneError::default();
        for (slot, &frame) in self.frames.iter().enumerate() {
            let base = slot * self.num_bones;
            let sample_time = frame as f32 / self.prepared.sample_rate;
            for &bone in bones {
                let error = transform_error(
                    &self.raw_object[base + bone],
                    &self.lossy_object[base + bone],
                    self.distances[bone],
                );
                worst = worst.max(BoneError {
                    bone_index: bone,
                    error,
                    sample_time,
                });
            }
        }
        worst
    }

    fn measure_all(&self) -> BoneError {
        let bones: Vec<usize> = (0..self.num_bones).collect();
        self.measure(&bones)
    }

    /// Try `bit_rate` on one track; keep it if the subtree error allows
    fn try_rate(&mut self, track: usize, bit_rate: u8) -> Result<bool> {
        self.iterations += 1;
        let previous = self.encodings[track];
        self.encodings[track].bit_rate = bit_rate;
        self.update_local(track)?;

        let subtree = self.skeleton.subtree(track / 3);
        self.update_object(&subtree);
        let error = self.measure(&subtree);
        let accepted = error.error <= self.threshold;
        trace!(
            track,
            from = previous.bit_rate,
            to = bit_rate,
            error = error.error,
            accepted,
            "bit rate trial"
        );

        if !accepted {
            self.encodings[track] = previous;
            self.update_local(track)?;
            self.update_object(&subtree);
        }
        Ok(accepted)
    }

    /// Drop every searchable track to the coarse rate in one trial
    fn coarse_start(&mut self, searchable: &[bool]) -> Result<()> {
        let tracks: Vec<usize> = (0..searchable.len()).filter(|&t| searchable[t]).collect();
        if tracks.is_empty() {
            return Ok(());
        }
        self.iterations += 1;
        let previous = self.encodings.clone();
        for &track in &tracks {
            self.encodings[track].bit_rate = COARSE_BIT_RATE;
            self.update_local(track)?;
        }
        let all: Vec<usize> = (0..self.num_bones).collect();
        self.update_object(&all);
        let error = self.measure(&all);
        debug!(error = error.error, accepted = error.error <= self.threshold, "coarse start");

        if error.error > self.threshold {
            self.encodings = previous;
            for &track in &tracks {
                self.update_local(track)?;
            }
            self.update_object(&all);
        }
        Ok(())
    }

    /// Lower one track until a trial fails or the cap is hit; true if it moved
    fn refine(&mut self, track: usize) -> Result<bool> {
        let mut moved = false;
        while self.encodings[track].bit_rate > 1 && !self.cap_reached() {
            let rate = self.encodings[track].bit_rate - 1;
            if !self.try_rate(track, rate)? {
                break;
            }
            moved = true;
        }
        Ok(moved)
    }
}

/// Every `stride`th frame plus the last one
pub(crate) fn sampled_frames(num_samples: usize, stride: usize) -> Vec<usize> {
    let mut frames: Vec<usize> = (0..num_samples).step_by(stride.max(1)).collect();
    if let Some(&last) = frames.last() {
        if last + 1 != num_samples {
            frames.push(num_samples - 1);
        }
    }
    frames
}

/// Search per-track bit rates for a prepared clip
pub(crate) fn search_bit_rates(
    skeleton: &Skeleton,
    prepared: &PreparedClip,
    analysis: &[TrackAnalysis],
    settings: &CompressionSettings,
) -> Result<SearchOutcome> {
    let (encodings, searchable) = initial_encodings(prepared, analysis, settings)?;
    let mut settled: Vec<bool> = searchable.iter().map(|s| !s).collect();
    let num_searchable = searchable.iter().filter(|s| **s).count();
    let cap = settings.iteration_cap(num_searchable);

    let mut search = RateSearch::new(skeleton, prepared, settings, encodings, cap)?;

    let initial = search.measure_all();
    if initial.error > settings.error_threshold {
        debug!(
            error = initial.error,
            bone = initial.bone_index,
            "threshold unreachable at full precision"
        );
        return Ok(SearchOutcome {
            encodings: search.encodings,
            iterations: 0,
            converged: false,
            warning: Some(warning(ConvergenceReason::ThresholdUnreachable, initial, settings)),
        });
    }

    if num_searchable > 0 && settings.level <= CompressionLevel::Low {
        search.coarse_start(&searchable)?;
    }

    'rounds: while settled.iter().any(|s| !s) {
        for track in 0..settled.len() {
            if settled[track] {
                continue;
            }
            if search.cap_reached() {
                break 'rounds;
            }
            let rate = search.encodings[track].bit_rate;
            if rate <= 1 {
                settled[track] = true;
                continue;
            }
            let accepted = search.try_rate(track, rate - 1)?;
            if !accepted || rate - 1 == 1 {
                settled[track] = true;
            }
        }
    }

    if settings.level >= CompressionLevel::High {
        loop {
            let mut moved = false;
            for track in (0..searchable.len()).rev() {
                if searchable[track] && !search.cap_reached() {
                    moved |= search.refine(track)?;
                }
            }
            if !moved || settings.level < CompressionLevel::Highest || search.cap_reached() {
                break;
            }
        }
    }

    let converged = settled.iter().all(|s| *s);
    let warning = if converged {
        None
    } else {
        let worst = search.measure_all();
        debug!(
            iterations = search.iterations,
            error = worst.error,
            "iteration cap reached, bit rates frozen"
        );
        Some(warning(ConvergenceReason::IterationCap, worst, settings))
    };

    debug!(
        iterations = search.iterations,
        searchable = num_searchable,
        converged,
        "bit rate search finished"
    );

    Ok(SearchOutcome {
        encodings: search.encodings,
        iterations: search.iterations,
        converged,
        warning,
    })
}

pub(crate) fn warning(
    reason: ConvergenceReason,
    worst: BoneError,
    settings: &CompressionSettings,
) -> ConvergenceWarning {
    ConvergenceWarning {
        reason,
        error: worst.error,
        bone_index: worst.bone_index,
        sample_time: worst.sample_time,
        threshold: settings.error_threshold,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::analyze_prepared;
    use crate::skeleton::Bone;
    use crate::track::{BoneTrack, RawClip};
    use glam::{Quat, Vec3};

    fn arm() -> (Skeleton, RawClip) {
        let bones = vec![
            Bone::new("shoulder", None, Transform::IDENTITY),
            Bone::new(
                "elbow",
                Some(0),
                Transform::from_rotation_translation(Quat::IDENTITY, Vec3::new(0.0, 5.0, 0.0)),
            ),
        ];
        let skeleton = Skeleton::new(bones).unwrap();
        let mut clip = RawClip::new("wave", 20, 30.0);
        clip.bone_tracks.push(BoneTrack {
            rotations: (0..20).map(|i| Quat::from_rotation_z((i as f32 * 0.3).sin())).collect(),
            translations: vec![Vec3::ZERO],
            scales: vec![],
        });
        clip.bone_tracks.push(BoneTrack {
            rotations: (0..20).map(|i| Quat::from_rotation_x(i as f32 * 0.05)).collect(),
            translations: vec![Vec3::new(0.0, 5.0, 0.0)],
            scales: vec![],
        });
        (skeleton, clip)
    }

    fn run(settings: &CompressionSettings) -> SearchOutcome {
        let (skeleton, clip) = arm();
        let prepared = PreparedClip::new(&clip, &skeleton).unwrap();
        let analysis = analyze_prepared(&prepared, &skeleton, settings);
        search_bit_rates(&skeleton, &prepared, &analysis, settings).unwrap()
    }

    #[test]
    fn test_sampled_frames_include_last() {
        assert_eq!(sampled_frames(10, 4), vec![0, 4, 8, 9]);
        assert_eq!(sampled_frames(9, 4), vec![0, 4, 8]);
        assert_eq!(sampled_frames(1, 3), vec![0]);
    }

    #[test]
    fn test_search_lowers_animated_rotations() {
        let outcome = run(&CompressionSettings::default());
        assert!(outcome.converged);
        assert!(outcome.warning.is_none());
        assert!(outcome.encodings[0].bit_rate < FULL_PRECISION);
        assert!(outcome.encodings[3].bit_rate < FULL_PRECISION);
        // Static translations are default tracks
        assert_eq!(outcome.encodings[1].format, TrackFormat::Default);
        assert_eq!(outcome.encodings[4].format, TrackFormat::Default);
    }

    #[test]
    fn test_full_formats_are_not_searched() {
        let settings = CompressionSettings {
            rotation_format: RotationFormat::SmallestThreeFull,
            ..Default::default()
        };
        let outcome = run(&settings);
        assert_eq!(outcome.iterations, 0);
        assert_eq!(outcome.encodings[0].bit_rate, FULL_PRECISION);
    }

    #[test]
    fn test_iteration_cap_freezes_rates() {
        let settings = CompressionSettings {
            max_iterations: Some(3),
            ..Default::default()
        };
        let outcome = run(&settings);
        assert!(!outcome.converged);
        assert_eq!(outcome.iterations, 3);
        let warning = outcome.warning.unwrap();
        assert_eq!(warning.reason, ConvergenceReason::IterationCap);
        assert!(warning.error <= settings.error_threshold);
    }

    #[test]
    fn test_looser_threshold_uses_fewer_bits() {
        let tight = run(&CompressionSettings {
            error_threshold: 0.001,
            ..Default::default()
        });
        let loose = run(&CompressionSettings {
            error_threshold: 0.1,
            ..Default::default()
        });
        let bits = |o: &SearchOutcome| o.encodings.iter().map(|e| e.sample_bits()).sum::<u32>();
        assert!(bits(&loose) < bits(&tight));
    }

    #[test]
    fn test_curve_rate_respects_precision() {
        let track = PreparedTrack {
            kind: TrackKind::Scalar,
            samples: (0..11).map(|i| Vec4::new(i as f32 * 0.1, 0.0, 0.0, 0.0)).collect(),
            precision: 0.01,
        };
        let range = TrackRange::from_samples(&track.samples, 1);
        let rate = select_curve_rate(&track, range).unwrap();
        // Extent 1.0 at precision 0.01 needs a step of at most 0.02
        assert!((5..=7).contains(&rate), "rate {}", rate);
    }
}
