//! Skeleton hierarchy
//!
//! Bones live in a flat arena indexed by `usize`. Every parent index is smaller
//! than its child's index, so forward kinematics is one pass in index order.

use glam::Affine3A;
use smallvec::SmallVec;

use crate::error::{AclError, Result};
use crate::math::{Transform, try_normalize_quat};
use crate::settings::CompressionSettings;

/// Maximum number of bones addressable by the stream header
pub const MAX_BONES: usize = u16::MAX as usize;

/// One bone of a skeleton
#[derive(Debug, Clone, PartialEq)]
pub struct Bone {
    pub name: String,
    /// Parent bone index, `None` for roots
    pub parent: Option<usize>,
    /// Rest pose in parent space. Default tracks reconstruct to this value.
    pub bind_transform: Transform,
    /// Sockets, hands, feet, cameras: measured with the safe virtual vertex distance
    pub keyed_end_effector: bool,
    /// Explicit virtual vertex distance, overrides every other rule
    pub vertex_distance: Option<f32>,
}

impl Bone {
    pub fn new(name: impl Into<String>, parent: Option<usize>, bind_transform: Transform) -> Self {
        Self {
            name: name.into(),
            parent,
            bind_transform,
            keyed_end_effector: false,
            vertex_distance: None,
        }
    }

    pub fn with_end_effector(mut self, keyed: bool) -> Self {
        self.keyed_end_effector = keyed;
        self
    }

    pub fn with_vertex_distance(mut self, distance: f32) -> Self {
        self.vertex_distance = Some(distance);
        self
    }
}

/// Topologically sorted bone hierarchy
#[derive(Debug, Clone, PartialEq)]
pub struct Skeleton {
    bones: Vec<Bone>,
    children: Vec<SmallVec<[usize; 4]>>,
}

impl Skeleton {
    /// Build a skeleton, rejecting hierarchies that are not topologically sorted.
    ///
    /// Bind rotations are normalized.
    pub fn new(mut bones: Vec<Bone>) -> Result<Self> {
        if bones.len() > MAX_BONES {
            return Err(AclError::malformed(format!(
                "skeleton has {} bones, maximum is {}",
                bones.len(),
                MAX_BONES
            )));
        }

        let mut children: Vec<SmallVec<[usize; 4]>> = vec![SmallVec::new(); bones.len()];
        for (index, bone) in bones.iter_mut().enumerate() {
            if let Some(parent) = bone.parent {
                if parent >= index {
                    return Err(AclError::malformed(format!(
                        "bone {} ('{}') has parent {} which does not precede it",
                        index, bone.name, parent
                    )));
                }
                children[parent].push(index);
            }

            let bind = &mut bone.bind_transform;
            bind.rotation = try_normalize_quat(bind.rotation).ok_or_else(|| {
                AclError::malformed(format!("bone {} has a degenerate bind rotation", index))
            })?;
            if !bind.translation.is_finite() || !bind.scale.is_finite() {
                return Err(AclError::malformed(format!(
                    "bone {} has a non-finite bind transform",
                    index
                )));
            }
            if let Some(d) = bone.vertex_distance {
                if !d.is_finite() || d < 0.0 {
                    return Err(AclError::malformed(format!(
                        "bone {} has an invalid vertex distance {}",
                        index, d
                    )));
                }
            }
        }

        Ok(Self { bones, children })
    }

    pub fn num_bones(&self) -> usize {
        self.bones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }

    pub fn bones(&self) -> &[Bone] {
        &self.bones
    }

    pub fn bone(&self, index: usize) -> &Bone {
        &self.bones[index]
    }

    pub fn parent(&self, index: usize) -> Option<usize> {
        self.bones[index].parent
    }

    pub fn children(&self, index: usize) -> &[usize] {
        &self.children[index]
    }

    /// Find a bone by name
    pub fn find_bone(&self, name: &str) -> Option<usize> {
        self.bones.iter().position(|b| b.name == name)
    }

    /// The bone and all of its descendants, in ascending index order
    pub fn subtree(&self, root: usize) -> Vec<usize> {
        let mut in_subtree = vec![false; self.bones.len()];
        in_subtree[root] = true;
        let mut result = vec![root];
        for index in root + 1..self.bones.len() {
            if let Some(parent) = self.bones[index].parent {
                if in_subtree[parent] {
                    in_subtree[index] = true;
                    result.push(index);
                }
            }
        }
        result
    }

    /// Rest pose of every bone, in bone order
    pub fn bind_pose(&self) -> Vec<Transform> {
        self.bones.iter().map(|b| b.bind_transform).collect()
    }

    /// Length of the bone: longest rest translation to one of its children
    pub fn bone_length(&self, index: usize) -> f32 {
        self.children[index]
            .iter()
            .map(|&c| self.bones[c].bind_transform.translation.length())
            .fold(0.0, f32::max)
    }

    /// Distance of the virtual vertices used to measure this bone's error
    pub fn virtual_vertex_distance(&self, index: usize, settings: &CompressionSettings) -> f32 {
        let bone = &self.bones[index];
        if let Some(distance) = bone.vertex_distance {
            distance
        } else if bone.keyed_end_effector {
            settings.safe_virtual_vertex_distance
        } else {
            settings
                .default_virtual_vertex_distance
                .max(self.bone_length(index))
        }
    }

    /// Single-pass forward kinematics: local pose -> object space
    pub fn local_to_object(&self, local: &[Transform], object: &mut [Affine3A]) {
        debug_assert!(local.len() >= self.bones.len() && object.len() >= self.bones.len());
        for (index, bone) in self.bones.iter().enumerate() {
            let local = local[index].to_affine();
            object[index] = match bone.parent {
                Some(parent) => object[parent] * local,
                None => local,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Quat, Vec3};

    fn chain(len: usize) -> Skeleton {
        let bones = (0..len)
            .map(|i| {
                Bone::new(
                    format!("bone{}", i),
                    i.checked_sub(1),
                    Transform::from_rotation_translation(Quat::IDENTITY, Vec3::new(0.0, 10.0, 0.0)),
                )
            })
            .collect();
        Skeleton::new(bones).unwrap()
    }

    #[test]
    fn test_rejects_unsorted_parent() {
        let bones = vec![
            Bone::new("root", Some(1), Transform::IDENTITY),
            Bone::new("child", None, Transform::IDENTITY),
        ];
        assert!(matches!(
            Skeleton::new(bones),
            Err(AclError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_rejects_self_parent() {
        let bones = vec![Bone::new("root", Some(0), Transform::IDENTITY)];
        assert!(Skeleton::new(bones).is_err());
    }

    #[test]
    fn test_forward_kinematics_chain() {
        let skeleton = chain(3);
        let mut local = skeleton.bind_pose();
        local[0].rotation = Quat::from_rotation_z(std::f32::consts::FRAC_PI_2);

        let mut object = vec![Affine3A::IDENTITY; 3];
        skeleton.local_to_object(&local, &mut object);

        // Root rotated 90 degrees about Z: +Y children now point along -X
        let tip = object[2].translation;
        assert!(
            (Vec3::from(tip) - Vec3::new(-20.0, 10.0, 0.0)).length() < 1.0e-4,
            "tip at {:?}",
            tip
        );
    }

    #[test]
    fn test_subtree_and_children() {
        let bones = vec![
            Bone::new("root", None, Transform::IDENTITY),
            Bone::new("a", Some(0), Transform::IDENTITY),
            Bone::new("b", Some(0), Transform::IDENTITY),
            Bone::new("a1", Some(1), Transform::IDENTITY),
        ];
        let skeleton = Skeleton::new(bones).unwrap();
        assert_eq!(skeleton.subtree(1), vec![1, 3]);
        assert_eq!(skeleton.subtree(0), vec![0, 1, 2, 3]);
        assert_eq!(skeleton.children(0), &[1, 2]);
        assert_eq!(skeleton.find_bone("a1"), Some(3));
    }

    #[test]
    fn test_virtual_vertex_distance_rules() {
        let bones = vec![
            Bone::new("root", None, Transform::IDENTITY),
            Bone::new(
                "arm",
                Some(0),
                Transform::from_rotation_translation(Quat::IDENTITY, Vec3::new(25.0, 0.0, 0.0)),
            ),
            Bone::new("hand", Some(1), Transform::IDENTITY).with_end_effector(true),
            Bone::new("prop", Some(1), Transform::IDENTITY).with_vertex_distance(7.0),
        ];
        let skeleton = Skeleton::new(bones).unwrap();
        let settings = CompressionSettings::default();

        // Root's child sits 25 units away: bone length wins over the 3 unit default
        assert_eq!(skeleton.virtual_vertex_distance(0, &settings), 25.0);
        assert_eq!(skeleton.virtual_vertex_distance(1, &settings), 3.0);
        assert_eq!(skeleton.virtual_vertex_distance(2, &settings), 100.0);
        assert_eq!(skeleton.virtual_vertex_distance(3, &settings), 7.0);
    }

    #[test]
    fn test_bind_rotation_normalized() {
        let bind = Transform::new(Quat::from_xyzw(0.0, 0.0, 0.0, 3.0), Vec3::ZERO, Vec3::ONE);
        let skeleton = Skeleton::new(vec![Bone::new("root", None, bind)]).unwrap();
        assert_eq!(skeleton.bone(0).bind_transform.rotation, Quat::IDENTITY);
    }
}
