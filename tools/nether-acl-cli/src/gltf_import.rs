//! glTF clip import
//!
//! Builds a [`Skeleton`] from a skin's joints and resamples one animation at a
//! fixed frame rate into a [`RawClip`]. Bones without channels keep their node
//! rest pose. Morph target weights become scalar curves.

use anyhow::{Context, Result, bail};
use glam::{Quat, Vec3};
use hashbrown::HashMap;
use nether_acl::{Bone, BoneTrack, RawClip, ScalarCurve, Skeleton, Transform};
use std::path::Path;

use crate::config::ToolConfig;

/// Skeleton and clip read from a glTF file
#[derive(Debug, Clone)]
pub struct ImportedClip {
    pub skeleton: Skeleton,
    pub clip: RawClip,
}

/// Summary of one animation in a glTF file
#[derive(Debug, Clone, PartialEq)]
pub struct AnimationInfo {
    pub index: usize,
    pub name: String,
    pub channel_count: usize,
    pub duration: f32,
}

fn node_transform(node: &gltf::Node) -> Transform {
    let (t, r, s) = node.transform().decomposed();
    Transform::new(Quat::from_array(r), Vec3::from_array(t), Vec3::from_array(s))
}

/// Skin joints ordered parents-first, with parent indices into that order
fn build_skeleton(
    document: &gltf::Document,
    skin: &gltf::Skin,
    config: &ToolConfig,
) -> Result<(Skeleton, HashMap<usize, usize>)> {
    let joints: Vec<gltf::Node> = skin.joints().collect();
    if joints.is_empty() {
        bail!("Skin has no joints");
    }
    let in_skin: HashMap<usize, usize> = joints
        .iter()
        .enumerate()
        .map(|(i, j)| (j.index(), i))
        .collect();

    // Node index -> parent node index, for every node in the document
    let mut node_parent: HashMap<usize, usize> = HashMap::new();
    for node in document.nodes() {
        for child in node.children() {
            node_parent.insert(child.index(), node.index());
        }
    }

    // Nearest ancestor that is also a joint
    let joint_parent = |node: usize| -> Option<usize> {
        let mut current = node;
        while let Some(&parent) = node_parent.get(&current) {
            if in_skin.contains_key(&parent) {
                return Some(parent);
            }
            current = parent;
        }
        None
    };

    // Depth-first from the roots, children in skin order
    let mut children: HashMap<usize, Vec<usize>> = HashMap::new();
    let mut roots = Vec::new();
    for joint in &joints {
        match joint_parent(joint.index()) {
            Some(parent) => children.entry(parent).or_default().push(joint.index()),
            None => roots.push(joint.index()),
        }
    }

    let mut order: Vec<usize> = Vec::with_capacity(joints.len());
    let mut stack: Vec<usize> = roots.into_iter().rev().collect();
    while let Some(node) = stack.pop() {
        order.push(node);
        if let Some(kids) = children.get(&node) {
            stack.extend(kids.iter().rev());
        }
    }

    let bone_of_node: HashMap<usize, usize> =
        order.iter().enumerate().map(|(bone, &node)| (node, bone)).collect();

    let bones = order
        .iter()
        .map(|&node_index| {
            let node = &joints[in_skin[&node_index]];
            let name = node
                .name()
                .map(String::from)
                .unwrap_or_else(|| format!("joint_{}", node_index));
            let parent = joint_parent(node_index).map(|p| bone_of_node[&p]);
            let keyed = config.is_end_effector(&name);
            Bone::new(name, parent, node_transform(node)).with_end_effector(keyed)
        })
        .collect();

    let skeleton = Skeleton::new(bones).context("Invalid skin hierarchy")?;
    Ok((skeleton, bone_of_node))
}

/// Keyframe data of one sampler
struct Channel {
    times: Vec<f32>,
    values: Vec<[f32; 4]>,
    /// Values per keyframe (morph targets) or 1
    width: usize,
    interpolation: gltf::animation::Interpolation,
}

impl Channel {
    /// Value of element `item` at time `t`
    fn sample(&self, t: f32, item: usize, spherical: bool) -> [f32; 4] {
        // Cubic spline keys store [in-tangent, value, out-tangent]
        let cubic = self.interpolation == gltf::animation::Interpolation::CubicSpline;
        let key = |i: usize| {
            if cubic {
                self.values[(i * 3 + 1) * self.width + item]
            } else {
                self.values[i * self.width + item]
            }
        };

        let last = self.times.len() - 1;
        let mut i = 0;
        while i < last && self.times[i + 1] < t {
            i += 1;
        }
        if i >= last || t <= self.times[0] {
            return key(if t <= self.times[0] { 0 } else { last });
        }

        let t0 = self.times[i];
        let t1 = self.times[i + 1];
        let factor = if t1 > t0 { ((t - t0) / (t1 - t0)).clamp(0.0, 1.0) } else { 0.0 };
        if self.interpolation == gltf::animation::Interpolation::Step {
            return key(i);
        }

        let (a, b) = (key(i), key(i + 1));
        if spherical {
            let qa = Quat::from_array(a);
            let mut qb = Quat::from_array(b);
            if qa.dot(qb) < 0.0 {
                qb = -qb;
            }
            qa.slerp(qb, factor).to_array()
        } else {
            let mut out = [0.0; 4];
            for (c, v) in out.iter_mut().enumerate() {
                *v = a[c] + (b[c] - a[c]) * factor;
            }
            out
        }
    }
}

fn read_channel(
    channel: &gltf::animation::Channel,
    buffers: &[gltf::buffer::Data],
) -> Result<Option<(gltf::animation::Property, Channel)>> {
    use gltf::animation::util::ReadOutputs;

    let reader = channel.reader(|buffer| Some(&buffers[buffer.index()]));
    let times: Vec<f32> = reader
        .read_inputs()
        .context("Animation channel has no keyframe times")?
        .collect();
    if times.is_empty() {
        return Ok(None);
    }
    let outputs = reader
        .read_outputs()
        .context("Animation channel has no keyframe values")?;

    let interpolation = channel.sampler().interpolation();
    let stride = if interpolation == gltf::animation::Interpolation::CubicSpline { 3 } else { 1 };

    let extend3 = |v: [f32; 3]| [v[0], v[1], v[2], 0.0];
    let (values, width): (Vec<[f32; 4]>, usize) = match outputs {
        ReadOutputs::Translations(iter) => (iter.map(extend3).collect(), 1),
        ReadOutputs::Scales(iter) => (iter.map(extend3).collect(), 1),
        ReadOutputs::Rotations(rotations) => (rotations.into_f32().collect(), 1),
        ReadOutputs::MorphTargetWeights(weights) => {
            let values: Vec<[f32; 4]> = weights.into_f32().map(|w| [w, 0.0, 0.0, 0.0]).collect();
            let width = values.len() / (times.len() * stride);
            (values, width.max(1))
        }
    };

    if values.len() < times.len() * width * stride {
        bail!(
            "Animation channel has {} values for {} keyframes",
            values.len(),
            times.len()
        );
    }

    Ok(Some((
        channel.target().property(),
        Channel {
            times,
            values,
            width,
            interpolation,
        },
    )))
}

fn select_skin<'a>(document: &'a gltf::Document, skin: Option<usize>) -> Result<gltf::Skin<'a>> {
    match skin {
        Some(idx) => document
            .skins()
            .nth(idx)
            .with_context(|| format!("Skin index {} not found in glTF", idx)),
        None => document.skins().next().context("No skins found in glTF file"),
    }
}

fn select_animation<'a>(
    document: &'a gltf::Document,
    animation: Option<usize>,
) -> Result<gltf::Animation<'a>> {
    match animation {
        Some(idx) => document
            .animations()
            .nth(idx)
            .with_context(|| format!("Animation index {} not found in glTF", idx)),
        None => document
            .animations()
            .next()
            .context("No animations found in glTF file"),
    }
}

/// Import one animation of a glTF file as a raw clip
pub fn import_clip(
    input: &Path,
    animation_index: Option<usize>,
    skin_index: Option<usize>,
    config: &ToolConfig,
) -> Result<ImportedClip> {
    let (document, buffers, _images) =
        gltf::import(input).with_context(|| format!("Failed to load glTF: {:?}", input))?;

    let skin = select_skin(&document, skin_index)?;
    let animation = select_animation(&document, animation_index)?;
    let (skeleton, bone_of_node) = build_skeleton(&document, &skin, config)?;

    let mut channels = Vec::new();
    let mut max_time = 0.0f32;
    for channel in animation.channels() {
        if let Some((property, data)) = read_channel(&channel, &buffers)? {
            if let Some(&t) = data.times.last() {
                max_time = max_time.max(t);
            }
            channels.push((channel.target().node(), property, data));
        }
    }

    let frame_rate = config.frame_rate;
    let frame_count = (max_time * frame_rate).round() as usize + 1;
    let frame_time = |frame: usize| (frame as f32 / frame_rate).min(max_time);

    // Start from the rest pose so bones without channels keep it
    let mut bone_tracks: Vec<BoneTrack> = skeleton
        .bones()
        .iter()
        .map(|bone| {
            BoneTrack::from_transforms(&vec![bone.bind_transform; frame_count])
        })
        .collect();
    let mut curves = Vec::new();

    for (node, property, data) in &channels {
        use gltf::animation::Property;

        if let Property::MorphTargetWeights = property {
            let node_name = node
                .name()
                .map(String::from)
                .unwrap_or_else(|| format!("node_{}", node.index()));
            for target in 0..data.width {
                let samples = (0..frame_count)
                    .map(|f| data.sample(frame_time(f), target, false)[0])
                    .collect();
                curves.push(ScalarCurve::new(
                    format!("{}.weights[{}]", node_name, target),
                    samples,
                ));
            }
            continue;
        }

        // Skip if not a joint in our skin
        let Some(&bone) = bone_of_node.get(&node.index()) else {
            continue;
        };
        let track = &mut bone_tracks[bone];
        for frame in 0..frame_count {
            let t = frame_time(frame);
            match property {
                Property::Translation => {
                    let v = data.sample(t, 0, false);
                    track.translations[frame] = Vec3::new(v[0], v[1], v[2]);
                }
                Property::Rotation => {
                    track.rotations[frame] = Quat::from_array(data.sample(t, 0, true));
                }
                Property::Scale => {
                    let v = data.sample(t, 0, false);
                    track.scales[frame] = Vec3::new(v[0], v[1], v[2]);
                }
                Property::MorphTargetWeights => {}
            }
        }
    }

    let name = animation
        .name()
        .map(String::from)
        .unwrap_or_else(|| format!("animation_{}", animation.index()));
    let mut clip = RawClip::new(name, frame_count as u32, frame_rate);
    clip.bone_tracks = bone_tracks;
    clip.curves = curves;

    tracing::debug!(
        "Imported '{}': {} bones, {} curves, {} frames at {} fps",
        clip.name,
        skeleton.num_bones(),
        clip.curves.len(),
        frame_count,
        frame_rate
    );

    Ok(ImportedClip { skeleton, clip })
}

/// List the animations of a glTF file
pub fn list_animations(input: &Path) -> Result<Vec<AnimationInfo>> {
    let (document, buffers, _images) =
        gltf::import(input).with_context(|| format!("Failed to load glTF: {:?}", input))?;

    let mut result = Vec::new();
    for animation in document.animations() {
        let mut duration = 0.0f32;
        for channel in animation.channels() {
            if let Some((_, data)) = read_channel(&channel, &buffers)? {
                if let Some(&t) = data.times.last() {
                    duration = duration.max(t);
                }
            }
        }
        result.push(AnimationInfo {
            index: animation.index(),
            name: animation.name().unwrap_or("unnamed").to_string(),
            channel_count: animation.channels().count(),
            duration,
        });
    }
    Ok(result)
}
