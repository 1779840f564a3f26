//! Per-frame draw records.
//!
//! A [`DrawContext`] is rebuilt every frame from the scene graph. It holds
//! [`RenderObject`]s split by material pass; nothing in it outlives the
//! frame.

use std::sync::Arc;

use ash::vk;
use glam::{Mat4, Vec3};

/// Axis-aligned bounding box plus bounding sphere radius, in mesh space.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Bounds {
    pub origin: Vec3,
    pub extents: Vec3,
    pub sphere_radius: f32,
}

impl Bounds {
    pub fn from_min_max(min: Vec3, max: Vec3) -> Self {
        let extents = (max - min) / 2.0;
        Self {
            origin: (max + min) / 2.0,
            extents,
            sphere_radius: extents.length(),
        }
    }

    /// Bounds of a point set. Empty input gives zero-sized bounds at the
    /// origin.
    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Self {
        let mut iter = points.into_iter();
        let Some(first) = iter.next() else {
            return Self::default();
        };
        let (min, max) = iter.fold((first, first), |(min, max), p| (min.min(p), max.max(p)));
        Self::from_min_max(min, max)
    }

    /// The eight corners of the box.
    pub fn corners(&self) -> [Vec3; 8] {
        let mut corners = [Vec3::ZERO; 8];
        for (i, corner) in corners.iter_mut().enumerate() {
            let sign = Vec3::new(
                if i & 1 == 0 { -1.0 } else { 1.0 },
                if i & 2 == 0 { -1.0 } else { 1.0 },
                if i & 4 == 0 { -1.0 } else { 1.0 },
            );
            *corner = self.origin + sign * self.extents;
        }
        corners
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum MaterialPass {
    #[default]
    MainColor,
    Transparent,
}

/// Pipeline, layout and material descriptor set used to draw a surface.
#[derive(Clone, Debug, PartialEq)]
pub struct MaterialInstance {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub material_set: vk::DescriptorSet,
    pub pass: MaterialPass,
}

/// One indexed draw.
#[derive(Clone, Debug)]
pub struct RenderObject {
    pub index_count: u32,
    pub first_index: u32,
    pub index_buffer: vk::Buffer,
    pub material: Arc<MaterialInstance>,
    pub bounds: Bounds,
    pub transform: Mat4,
    pub vertex_buffer_address: vk::DeviceAddress,
}

impl RenderObject {
    /// Identity of the material, used as a sort key.
    #[inline]
    pub fn material_key(&self) -> usize {
        Arc::as_ptr(&self.material) as usize
    }
}

#[derive(Debug, Default)]
pub struct DrawContext {
    pub opaque_surfaces: Vec<RenderObject>,
    pub transparent_surfaces: Vec<RenderObject>,
}

impl DrawContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes `object` by its material pass.
    pub fn push(&mut self, object: RenderObject) {
        match object.material.pass {
            MaterialPass::MainColor => self.opaque_surfaces.push(object),
            MaterialPass::Transparent => self.transparent_surfaces.push(object),
        }
    }

    pub fn clear(&mut self) {
        self.opaque_surfaces.clear();
        self.transparent_surfaces.clear();
    }

    pub fn len(&self) -> usize {
        self.opaque_surfaces.len() + self.transparent_surfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
