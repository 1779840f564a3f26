//! Local TRS transforms for scene nodes.
//!
//! Hierarchy lives in [`SceneGraph`](crate::graph::SceneGraph); a
//! [`Transform`] only describes a node relative to its parent.
//!
//! # Example
//!
//! ```
//! use blackhole_scene::Transform;
//! use glam::Vec3;
//!
//! let t = Transform::new()
//!     .with_translation(Vec3::new(1.0, 0.0, 0.0))
//!     .with_scale(Vec3::splat(2.0));
//! let p = t.local_matrix().transform_point3(Vec3::X);
//! assert!((p - Vec3::new(3.0, 0.0, 0.0)).length() < 1e-5);
//! ```

use glam::{Mat4, Quat, Vec3};

/// Translation, rotation and scale, applied as `T * R * S`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_translation(mut self, translation: Vec3) -> Self {
        self.translation = translation;
        self
    }

    pub fn with_rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    pub fn local_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn test_transform_default() {
        let t = Transform::default();
        assert_eq!(t.translation, Vec3::ZERO);
        assert_eq!(t.rotation, Quat::IDENTITY);
        assert_eq!(t.scale, Vec3::ONE);
        assert_eq!(t.local_matrix(), Mat4::IDENTITY);
    }

    #[test]
    fn test_trs_order() {
        // Scale first, then rotate, then translate.
        let t = Transform::new()
            .with_translation(Vec3::new(0.0, 0.0, 5.0))
            .with_rotation(Quat::from_rotation_y(std::f32::consts::FRAC_PI_2))
            .with_scale(Vec3::splat(2.0));
        let p = t.local_matrix().transform_point3(Vec3::X);
        assert_relative_eq!(p.x, 0.0, epsilon = 1e-5);
        assert_relative_eq!(p.y, 0.0, epsilon = 1e-5);
        assert_relative_eq!(p.z, 3.0, epsilon = 1e-5);
    }
}
