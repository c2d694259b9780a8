//! Transform math on top of glam
//!
//! Bone transforms are stored as rotation/translation/scale (QVV) and only turned
//! into affine matrices when composing object-space poses.

use glam::{Affine3A, Quat, Vec3, Vec4};

/// Local or object-space bone transform
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    /// Unit quaternion rotation
    pub rotation: Quat,
    /// Translation
    pub translation: Vec3,
    /// Non-uniform scale
    pub scale: Vec3,
}

impl Transform {
    /// Identity transform (no rotation, no translation, unit scale)
    pub const IDENTITY: Self = Self {
        rotation: Quat::IDENTITY,
        translation: Vec3::ZERO,
        scale: Vec3::ONE,
    };

    pub const fn new(rotation: Quat, translation: Vec3, scale: Vec3) -> Self {
        Self {
            rotation,
            translation,
            scale,
        }
    }

    /// Transform with unit scale
    pub const fn from_rotation_translation(rotation: Quat, translation: Vec3) -> Self {
        Self::new(rotation, translation, Vec3::ONE)
    }

    /// Affine matrix equivalent (scale, then rotate, then translate)
    #[inline]
    pub fn to_affine(&self) -> Affine3A {
        Affine3A::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Flip `q` onto the same hemisphere as `reference` (q and -q are the same rotation)
#[inline]
pub fn align_hemisphere(reference: Quat, q: Quat) -> Quat {
    if reference.dot(q) < 0.0 { -q } else { q }
}

/// Normalize a quaternion, returning `None` for zero-length or non-finite input
pub fn try_normalize_quat(q: Quat) -> Option<Quat> {
    let len = q.length();
    if len.is_finite() && len > 1.0e-8 {
        Some(q / len)
    } else {
        None
    }
}

/// Shortest-path spherical interpolation.
///
/// `alpha == 0` returns `a` unchanged so that sampling exactly on a keyframe
/// reproduces the stored key bit for bit.
#[inline]
pub fn interpolate_rotation(a: Quat, b: Quat, alpha: f32) -> Quat {
    if alpha <= 0.0 {
        return a;
    }
    a.slerp(align_hemisphere(a, b), alpha.min(1.0))
}

/// Linear interpolation with the same keyframe-exact guarantee as [`interpolate_rotation`]
#[inline]
pub fn interpolate_vector(a: Vec3, b: Vec3, alpha: f32) -> Vec3 {
    if alpha <= 0.0 {
        return a;
    }
    a.lerp(b, alpha.min(1.0))
}

#[inline]
pub fn interpolate_scalar(a: f32, b: f32, alpha: f32) -> f32 {
    if alpha <= 0.0 {
        return a;
    }
    a + (b - a) * alpha.min(1.0)
}

/// Quaternion as a 4-channel vector [x, y, z, w]
#[inline]
pub fn quat_to_channels(q: Quat) -> Vec4 {
    Vec4::new(q.x, q.y, q.z, q.w)
}

#[inline]
pub fn channels_to_quat(v: Vec4) -> Quat {
    Quat::from_xyzw(v.x, v.y, v.z, v.w)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_hemisphere_flips_negative_dot() {
        let a = Quat::IDENTITY;
        let b = -Quat::from_rotation_y(0.3);
        let aligned = align_hemisphere(a, b);
        assert!(a.dot(aligned) > 0.0);
        assert!(aligned.angle_between(b) < 1.0e-5, "same rotation after flip");
    }

    #[test]
    fn test_interpolate_rotation_keyframe_exact() {
        let a = Quat::from_rotation_x(0.5);
        let b = Quat::from_rotation_x(1.0);
        assert_eq!(interpolate_rotation(a, b, 0.0), a);
    }

    #[test]
    fn test_interpolate_rotation_shortest_path() {
        let a = Quat::from_rotation_z(0.2);
        let b = -Quat::from_rotation_z(0.4);
        let mid = interpolate_rotation(a, b, 0.5);
        let expected = Quat::from_rotation_z(0.3);
        assert!(
            mid.angle_between(expected) < 1.0e-4,
            "midpoint should stay between the keys: {:?}",
            mid
        );
    }

    #[test]
    fn test_try_normalize_rejects_zero() {
        assert!(try_normalize_quat(Quat::from_xyzw(0.0, 0.0, 0.0, 0.0)).is_none());
        let q = try_normalize_quat(Quat::from_xyzw(0.0, 0.0, 0.0, 2.0)).unwrap();
        assert_eq!(q, Quat::IDENTITY);
    }

    #[test]
    fn test_transform_affine_applies_scale_first() {
        let t = Transform::new(
            Quat::from_rotation_z(std::f32::consts::FRAC_PI_2),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::splat(2.0),
        );
        let p = t.to_affine().transform_point3(Vec3::X);
        assert!((p - Vec3::new(1.0, 2.0, 0.0)).length() < 1.0e-5, "{:?}", p);
    }
}
