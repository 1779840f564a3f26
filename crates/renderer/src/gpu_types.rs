//! Structures shared with shaders.
//!
//! All structures use `#[repr(C)]` and std140/std430-compatible field order,
//! and implement `Pod` so they can be copied into buffers byte for byte.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};

/// Per-frame scene uniform (set 0, binding 0 of the mesh pipelines).
///
/// # Memory Layout
///
/// - Offset 0: view matrix (64 bytes)
/// - Offset 64: projection matrix (64 bytes)
/// - Offset 128: view-projection matrix (64 bytes)
/// - Offset 192: ambient color (16 bytes)
/// - Offset 208: sunlight direction, `w` is intensity (16 bytes)
/// - Offset 224: sunlight color (16 bytes)
/// - Total size: 240 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GpuSceneData {
    pub view: Mat4,
    pub proj: Mat4,
    pub view_proj: Mat4,
    pub ambient_color: Vec4,
    pub sunlight_direction: Vec4,
    pub sunlight_color: Vec4,
}

impl GpuSceneData {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Scene data with the default white light and dim ambient term.
    pub fn new(view: Mat4, proj: Mat4) -> Self {
        Self {
            view,
            proj,
            view_proj: proj * view,
            ambient_color: Vec4::splat(0.1),
            sunlight_direction: Vec4::new(0.0, 1.0, 0.5, 1.0),
            sunlight_color: Vec4::ONE,
        }
    }
}

/// Push constants of the background compute effects: four free-form
/// vectors each effect interprets its own way.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ComputePushConstants {
    pub data1: Vec4,
    pub data2: Vec4,
    pub data3: Vec4,
    pub data4: Vec4,
}

/// Material uniform (set 1, binding 0), padded to 256 bytes so each
/// material's slice of a shared buffer meets uniform offset alignment.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct MaterialConstants {
    pub color_factors: Vec4,
    /// `x` metallic, `y` roughness.
    pub metal_rough_factors: Vec4,
    _padding: [Vec4; 14],
}

impl MaterialConstants {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn new(color_factors: Vec4, metallic: f32, roughness: f32) -> Self {
        Self {
            color_factors,
            metal_rough_factors: Vec4::new(metallic, roughness, 0.0, 0.0),
            _padding: [Vec4::ZERO; 14],
        }
    }
}

impl Default for MaterialConstants {
    fn default() -> Self {
        Self::new(Vec4::ONE, 1.0, 0.5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scene_data_layout() {
        assert_eq!(GpuSceneData::SIZE, 240);
        assert_eq!(std::mem::align_of::<GpuSceneData>(), 16);
    }

    #[test]
    fn test_scene_data_view_proj() {
        let view = Mat4::from_translation(glam::Vec3::new(0.0, 0.0, -5.0));
        let proj = Mat4::perspective_rh(1.2, 1.5, 10_000.0, 0.1);
        let data = GpuSceneData::new(view, proj);
        assert_eq!(data.view_proj, proj * view);
    }

    #[test]
    fn test_compute_push_constants_size() {
        // Vulkan guarantees at least 128 bytes of push constants.
        assert_eq!(std::mem::size_of::<ComputePushConstants>(), 64);
    }

    #[test]
    fn test_material_constants_layout() {
        assert_eq!(MaterialConstants::SIZE, 256);
        let constants = MaterialConstants::new(Vec4::ONE, 0.25, 0.75);
        let bytes = bytemuck::bytes_of(&constants);
        assert_eq!(&bytes[16..20], &0.25f32.to_le_bytes());
        assert_eq!(&bytes[20..24], &0.75f32.to_le_bytes());
    }
}
