//! End-to-end tests: raw clip -> compress -> stream bytes -> sample.

use glam::{Quat, Vec3};
use nether_acl::{
    AclError, Bone, BoneTrack, CompressedClip, CompressionLevel, CompressionSettings,
    DecompressionContext, RawClip, ScalarCurve, Skeleton, TrackFormat, Transform,
    calculate_clip_error, compress_clip,
};

fn single_bone() -> Skeleton {
    Skeleton::new(vec![Bone::new("root", None, Transform::IDENTITY)]).unwrap()
}

/// Four-bone chain, each bone one unit along its parent's Y axis
fn chain() -> Skeleton {
    let offset = Transform::from_rotation_translation(Quat::IDENTITY, Vec3::Y);
    Skeleton::new(vec![
        Bone::new("hips", None, Transform::IDENTITY),
        Bone::new("spine", Some(0), offset),
        Bone::new("neck", Some(1), offset),
        Bone::new("head", Some(2), offset).with_end_effector(true),
    ])
    .unwrap()
}

fn wave_clip(frames: u32) -> RawClip {
    let mut clip = RawClip::new("wave", frames, 30.0);
    for bone in 0..4 {
        let amplitude = 0.2 + bone as f32 * 0.15;
        let transforms: Vec<Transform> = (0..frames)
            .map(|f| {
                let t = f as f32 / 30.0;
                let rotation = Quat::from_rotation_z((t * 4.0 + bone as f32).sin() * amplitude);
                let translation = if bone == 0 {
                    Vec3::new((t * 2.0).sin() * 0.5, 0.0, t)
                } else {
                    Vec3::Y
                };
                Transform::from_rotation_translation(rotation, translation)
            })
            .collect();
        clip.bone_tracks.push(BoneTrack::from_transforms(&transforms));
    }
    clip
}

fn z_at(context: &mut DecompressionContext, t: f32) -> f32 {
    context.sample(t).unwrap()[0].translation.z
}

#[test]
fn test_single_bone_translation_scenario() {
    let mut clip = RawClip::new("slide", 4, 30.0);
    clip.bone_tracks.push(BoneTrack {
        rotations: vec![Quat::IDENTITY],
        translations: (0..4).map(|i| Vec3::new(0.0, 0.0, i as f32)).collect(),
        scales: vec![],
    });
    let settings = CompressionSettings::default();
    let output = compress_clip(&single_bone(), &clip, &settings).unwrap();
    assert!(output.warnings.is_empty());
    assert_eq!(output.clip.track(0).format, TrackFormat::Default);

    let mut context = DecompressionContext::new(&output.clip);
    assert_eq!(context.sample_frame(1).unwrap()[0].rotation, Quat::IDENTITY);
    assert!((z_at(&mut context, 1.0 / 30.0) - 1.0).abs() <= settings.error_threshold);
    assert!((z_at(&mut context, 2.0 / 30.0) - 2.0).abs() <= settings.error_threshold);
    assert!((z_at(&mut context, 1.5 / 30.0) - 1.5).abs() <= settings.error_threshold);

    // Out-of-range and NaN times clamp
    assert!(z_at(&mut context, -5.0).abs() <= settings.error_threshold);
    assert!((z_at(&mut context, 100.0) - 3.0).abs() <= settings.error_threshold);
    assert!(z_at(&mut context, f32::NAN).abs() <= settings.error_threshold);
}

#[test]
fn test_compression_is_deterministic() {
    let skeleton = chain();
    let clip = wave_clip(45);
    let settings = CompressionSettings::default();
    let a = compress_clip(&skeleton, &clip, &settings).unwrap();
    let b = compress_clip(&skeleton, &clip, &settings).unwrap();
    assert_eq!(a.clip.as_bytes(), b.clip.as_bytes());
    assert_eq!(a.stats, b.stats);
}

#[test]
fn test_error_bound_holds_for_every_level() {
    let skeleton = chain();
    let clip = wave_clip(60);

    for level in [
        CompressionLevel::Lowest,
        CompressionLevel::Low,
        CompressionLevel::Medium,
        CompressionLevel::High,
        CompressionLevel::Highest,
    ] {
        let settings = CompressionSettings {
            level,
            ..Default::default()
        };
        let output = compress_clip(&skeleton, &clip, &settings).unwrap();
        assert!(output.warnings.is_empty(), "{:?}: {:?}", level, output.warnings);
        assert!(
            output.stats.max_error.error <= settings.error_threshold,
            "{:?}: error {}",
            level,
            output.stats.max_error.error
        );

        // Independent measurement on the parsed stream agrees
        let parsed = CompressedClip::from_bytes(output.clip.as_bytes().to_vec()).unwrap();
        let measured = calculate_clip_error(&skeleton, &clip, &parsed, &settings).unwrap();
        assert!((measured.error - output.stats.max_error.error).abs() < 1e-6);
    }
}

#[test]
fn test_bind_pose_bones_become_default_tracks() {
    let skeleton = chain();
    let mut clip = RawClip::new("still", 20, 30.0);
    for bone in skeleton.bones() {
        clip.bone_tracks.push(BoneTrack::from_pose(bone.bind_transform));
    }
    let output = compress_clip(&skeleton, &clip, &CompressionSettings::default()).unwrap();

    assert!(output
        .clip
        .tracks()
        .iter()
        .all(|t| t.format == TrackFormat::Default));
    assert_eq!(output.clip.header().data_size, 0);

    let mut context = DecompressionContext::new(&output.clip);
    let pose = context.sample(0.3).unwrap();
    for (sampled, bone) in pose.iter().zip(skeleton.bones()) {
        assert!((sampled.translation - bone.bind_transform.translation).length() < 1e-6);
    }
}

#[test]
fn test_constant_track_is_not_animated() {
    let mut clip = RawClip::new("offset", 12, 30.0);
    clip.bone_tracks.push(BoneTrack {
        rotations: vec![Quat::IDENTITY],
        translations: vec![Vec3::new(2.0, -1.0, 0.5); 12],
        scales: vec![],
    });
    let output = compress_clip(&single_bone(), &clip, &CompressionSettings::default()).unwrap();
    assert_eq!(output.clip.track(1).format, TrackFormat::Constant);
    assert_eq!(output.stats.translations.constant, 1);

    let mut context = DecompressionContext::new(&output.clip);
    let pose = context.sample(0.2).unwrap();
    assert!((pose[0].translation - Vec3::new(2.0, -1.0, 0.5)).length() < 1e-6);
}

#[test]
fn test_hemisphere_flips_interpolate_smoothly() {
    let frames = 20;
    let mut clip = RawClip::new("flip", frames, 30.0);
    clip.bone_tracks.push(BoneTrack {
        rotations: (0..frames)
            .map(|f| {
                let q = Quat::from_rotation_y(f as f32 * 0.05);
                if f % 2 == 1 { -q } else { q }
            })
            .collect(),
        translations: vec![Vec3::ZERO],
        scales: vec![],
    });
    let output = compress_clip(&single_bone(), &clip, &CompressionSettings::default()).unwrap();
    assert!(output.warnings.is_empty());

    let mut context = DecompressionContext::new(&output.clip);
    for f in 0..frames - 1 {
        let t = (f as f32 + 0.5) / 30.0;
        let expected = Quat::from_rotation_y((f as f32 + 0.5) * 0.05);
        let q = context.sample(t).unwrap()[0].rotation;
        assert!(q.dot(expected).abs() > 0.999, "frame {}: {:?}", f, q);
    }
}

#[test]
fn test_sample_bone_matches_full_pose() {
    let skeleton = chain();
    let clip = wave_clip(30);
    let output = compress_clip(&skeleton, &clip, &CompressionSettings::default()).unwrap();

    let single = DecompressionContext::new(&output.clip);
    let mut full = DecompressionContext::new(&output.clip);
    for t in [0.0, 0.13, 0.5, 0.97] {
        let pose = full.sample(t).unwrap().to_vec();
        for (bone, expected) in pose.iter().enumerate() {
            let sampled = single.sample_bone(t, bone).unwrap();
            assert!((sampled.translation - expected.translation).length() < 1e-5);
            assert!(sampled.rotation.dot(expected.rotation).abs() > 0.99999);
        }
    }
    assert!(matches!(
        single.sample_bone(0.0, 4),
        Err(AclError::MalformedInput(_))
    ));
}

#[test]
fn test_curves_meet_their_precision() {
    let frames = 40;
    let mut clip = RawClip::new("blink", frames, 30.0);
    clip.bone_tracks.push(BoneTrack::from_pose(Transform::IDENTITY));
    let samples: Vec<f32> = (0..frames).map(|f| (f as f32 * 0.3).sin() * 0.5 + 0.5).collect();
    clip.curves.push(ScalarCurve::new("eyelid", samples.clone()));
    clip.curves.push(ScalarCurve::new("flat", vec![0.25; frames as usize]));

    let output = compress_clip(&single_bone(), &clip, &CompressionSettings::default()).unwrap();
    assert_eq!(output.clip.num_curves(), 2);
    assert_eq!(output.stats.curves.constant, 1);

    let mut context = DecompressionContext::new(&output.clip);
    for (f, expected) in samples.iter().enumerate() {
        let curves = context.sample_curves(f as f32 / 30.0).unwrap();
        assert!((curves[0] - expected).abs() < 0.0015, "frame {}", f);
        assert!((curves[1] - 0.25).abs() < 1e-6);
    }
}

#[test]
fn test_static_pose_clip() {
    let mut clip = RawClip::new("pose", 1, 0.0);
    clip.bone_tracks.push(BoneTrack::from_pose(Transform::from_rotation_translation(
        Quat::from_rotation_x(0.4),
        Vec3::new(1.0, 2.0, 3.0),
    )));
    let output = compress_clip(&single_bone(), &clip, &CompressionSettings::default()).unwrap();
    assert_eq!(output.clip.num_samples(), 1);
    assert_eq!(output.clip.duration(), 0.0);

    let mut context = DecompressionContext::new(&output.clip);
    for t in [0.0, 1.0, -1.0] {
        let pose = context.sample(t).unwrap();
        assert!((pose[0].translation - Vec3::new(1.0, 2.0, 3.0)).length() < 1e-6);
    }
}

#[test]
fn test_mismatched_input_is_rejected() {
    let mut clip = RawClip::new("bad", 10, 30.0);
    clip.bone_tracks.push(BoneTrack {
        rotations: vec![Quat::IDENTITY; 7],
        translations: vec![],
        scales: vec![],
    });
    assert!(matches!(
        compress_clip(&single_bone(), &clip, &CompressionSettings::default()),
        Err(AclError::MalformedInput(_))
    ));

    // Track count disagrees with the skeleton
    let clip = wave_clip(10);
    assert!(matches!(
        compress_clip(&single_bone(), &clip, &CompressionSettings::default()),
        Err(AclError::MalformedInput(_))
    ));
}

#[test]
fn test_corrupt_streams_never_panic() {
    let output = compress_clip(&chain(), &wave_clip(20), &CompressionSettings::default()).unwrap();
    let bytes = output.clip.as_bytes().to_vec();

    for len in 0..bytes.len() {
        assert!(CompressedClip::from_bytes(bytes[..len].to_vec()).is_err());
    }
    for index in 0..bytes.len() {
        let mut corrupt = bytes.clone();
        corrupt[index] ^= 0x5A;
        if let Ok(clip) = CompressedClip::from_bytes(corrupt) {
            let mut context = DecompressionContext::new(&clip);
            let _ = context.sample(0.25);
        }
    }
}

#[test]
fn test_full_precision_formats() {
    let settings = CompressionSettings {
        rotation_format: nether_acl::RotationFormat::QuatFull,
        translation_format: nether_acl::VectorFormat::Full,
        scale_format: nether_acl::VectorFormat::Full,
        ..Default::default()
    };
    let output = compress_clip(&chain(), &wave_clip(30), &settings).unwrap();
    assert!(output.warnings.is_empty());
    assert_eq!(output.stats.iterations, 0);
    for track in output.clip.tracks() {
        if track.format.is_animated() {
            assert_eq!(track.bit_rate, 32);
        }
    }
    assert!(output.stats.max_error.error < 1e-4);
}
