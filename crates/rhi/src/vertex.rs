//! Vertex layout shared with the mesh shaders.
//!
//! Vertices are read from a storage buffer through its device address
//! ("vertex pulling"), so there are no input binding or attribute
//! descriptions. The UV coordinates are split across the padding slots of
//! the two `vec3`s to match std430 layout in the shader.

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3, Vec4};

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub uv_x: f32,
    pub normal: Vec3,
    pub uv_y: f32,
    pub color: Vec4,
}

impl Vertex {
    /// Vertex with white color.
    pub fn new(position: Vec3, normal: Vec3, uv: Vec2) -> Self {
        Self {
            position,
            uv_x: uv.x,
            normal,
            uv_y: uv.y,
            color: Vec4::ONE,
        }
    }

    #[inline]
    pub fn uv(&self) -> Vec2 {
        Vec2::new(self.uv_x, self.uv_y)
    }
}

impl Default for Vertex {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            uv_x: 0.0,
            normal: Vec3::X,
            uv_y: 0.0,
            color: Vec4::ONE,
        }
    }
}
