//! First-person pitch/yaw camera.
//!
//! The camera looks down −Z when pitch and yaw are zero. Positive yaw turns
//! right (rotation about −Y), positive pitch looks up (rotation about +X).
//! Projection is reverse-Z: the near plane maps to depth 1 and the far
//! plane to depth 0.

use glam::{Mat4, Quat, Vec2, Vec3};

/// Vertical field of view, in degrees.
pub const FOV_Y_DEGREES: f32 = 70.0;
pub const NEAR_PLANE: f32 = 0.1;
pub const FAR_PLANE: f32 = 10_000.0;

/// Camera controls sampled for one frame.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CameraInput {
    pub forward: bool,
    pub back: bool,
    pub left: bool,
    pub right: bool,
    pub up: bool,
    pub down: bool,
    pub fast: bool,
    /// Look and motion only apply while this is held.
    pub look_active: bool,
    /// Mouse movement in pixels.
    pub mouse_delta: Vec2,
}

/// Speeds for [`Camera::update`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraSettings {
    /// Units per second.
    pub move_speed: f32,
    pub fast_multiplier: f32,
    /// Radians per pixel of mouse movement.
    pub look_sensitivity: f32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            move_speed: 2.0,
            fast_multiplier: 5.0,
            look_sensitivity: 1.0 / 200.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub pitch: f32,
    pub yaw: f32,
    /// Local-space direction of travel from the last update.
    pub velocity: Vec3,
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(Vec3::new(0.0, 0.0, 5.0))
    }
}

impl Camera {
    pub fn new(position: Vec3) -> Self {
        Self {
            position,
            pitch: 0.0,
            yaw: 0.0,
            velocity: Vec3::ZERO,
        }
    }

    pub fn rotation(&self) -> Quat {
        let yaw = Quat::from_axis_angle(Vec3::NEG_Y, self.yaw);
        let pitch = Quat::from_axis_angle(Vec3::X, self.pitch);
        yaw * pitch
    }

    pub fn rotation_matrix(&self) -> Mat4 {
        Mat4::from_quat(self.rotation())
    }

    /// World-to-view matrix: inverse of the camera's world transform.
    pub fn view_matrix(&self) -> Mat4 {
        (Mat4::from_translation(self.position) * self.rotation_matrix()).inverse()
    }

    /// Reverse-Z perspective with Y flipped for Vulkan clip space.
    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        let mut proj = Mat4::perspective_rh(FOV_Y_DEGREES.to_radians(), aspect, FAR_PLANE, NEAR_PLANE);
        proj.y_axis.y *= -1.0;
        proj
    }

    pub fn forward(&self) -> Vec3 {
        self.rotation() * Vec3::NEG_Z
    }

    /// Applies one frame of input.
    ///
    /// Mouse motion turns the camera; keys move it along its local axes.
    /// Both only take effect while `input.look_active` is set.
    pub fn update(&mut self, input: &CameraInput, settings: &CameraSettings, dt: f32) {
        if !input.look_active {
            self.velocity = Vec3::ZERO;
            return;
        }

        self.yaw += input.mouse_delta.x * settings.look_sensitivity;
        self.pitch -= input.mouse_delta.y * settings.look_sensitivity;
        let limit = std::f32::consts::FRAC_PI_2 - 0.01;
        self.pitch = self.pitch.clamp(-limit, limit);

        let axis = |positive: bool, negative: bool| (positive as i32 - negative as i32) as f32;
        self.velocity = Vec3::new(
            axis(input.right, input.left),
            axis(input.up, input.down),
            axis(input.back, input.forward),
        );

        let speed = if input.fast {
            settings.move_speed * settings.fast_multiplier
        } else {
            settings.move_speed
        };
        self.position += self.rotation() * (self.velocity * speed * dt);
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use glam::Vec4;

    use super::*;

    fn held() -> CameraInput {
        CameraInput {
            look_active: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_default_looks_down_negative_z() {
        let camera = Camera::default();
        let f = camera.forward();
        assert_relative_eq!(f.z, -1.0, epsilon = 1e-6);
        let p = camera.view_matrix().transform_point3(Vec3::ZERO);
        assert_relative_eq!(p.z, -5.0, epsilon = 1e-5);
    }

    #[test]
    fn test_positive_yaw_turns_right_and_pitch_up() {
        let mut camera = Camera::default();
        camera.yaw = std::f32::consts::FRAC_PI_2;
        let f = camera.forward();
        assert_relative_eq!(f.x, 1.0, epsilon = 1e-5);

        camera.yaw = 0.0;
        camera.pitch = 0.5;
        assert!(camera.forward().y > 0.0);
    }

    #[test]
    fn test_reverse_z_projection() {
        let camera = Camera::new(Vec3::ZERO);
        let proj = camera.projection_matrix(16.0 / 9.0);
        let depth = |z: f32| {
            let clip = proj * Vec4::new(0.0, 0.0, z, 1.0);
            clip.z / clip.w
        };
        assert_relative_eq!(depth(-NEAR_PLANE), 1.0, epsilon = 1e-4);
        assert!(depth(-FAR_PLANE).abs() < 1e-4);
        assert!(depth(-1.0) > depth(-100.0));

        // Vulkan clip space: +Y up in view maps to −Y in clip.
        let clip = proj * Vec4::new(0.0, 1.0, -2.0, 1.0);
        assert!(clip.y < 0.0);
    }

    #[test]
    fn test_update_ignored_without_look() {
        let mut camera = Camera::default();
        let input = CameraInput {
            forward: true,
            mouse_delta: Vec2::new(100.0, 0.0),
            ..Default::default()
        };
        camera.update(&input, &CameraSettings::default(), 1.0);
        assert_eq!(camera, Camera::default());
    }

    #[test]
    fn test_update_moves_forward() {
        let mut camera = Camera::new(Vec3::ZERO);
        let input = CameraInput {
            forward: true,
            ..held()
        };
        camera.update(&input, &CameraSettings::default(), 0.5);
        assert_relative_eq!(camera.position.z, -1.0, epsilon = 1e-5);

        let fast = CameraInput {
            fast: true,
            ..input
        };
        camera.update(&fast, &CameraSettings::default(), 0.5);
        assert_relative_eq!(camera.position.z, -6.0, epsilon = 1e-5);
    }

    #[test]
    fn test_mouse_look() {
        let mut camera = Camera::default();
        let input = CameraInput {
            mouse_delta: Vec2::new(200.0, -100.0),
            ..held()
        };
        camera.update(&input, &CameraSettings::default(), 0.016);
        assert_relative_eq!(camera.yaw, 1.0, epsilon = 1e-6);
        assert_relative_eq!(camera.pitch, 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_pitch_is_clamped() {
        let mut camera = Camera::default();
        let input = CameraInput {
            mouse_delta: Vec2::new(0.0, -10_000.0),
            ..held()
        };
        camera.update(&input, &CameraSettings::default(), 0.016);
        assert!(camera.pitch < std::f32::consts::FRAC_PI_2);
    }
}
