//! Draw-call assembly.
//!
//! Opaque surfaces are frustum-culled and sorted so draws sharing a
//! material (and then an index buffer) are recorded back to back.
//! Transparent surfaces follow in the order the scene graph emitted them.
//! State is only rebound when it changes between consecutive draws.

use ash::vk;
use ash::vk::Handle;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

use blackhole_rhi::command::CommandBuffer;
use blackhole_scene::{DrawContext, MaterialInstance, RenderObject};

/// Push constants of the mesh pipelines: world matrix plus the address of
/// the vertex buffer the vertex shader pulls from.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct GpuDrawPushConstants {
    pub world_matrix: Mat4,
    pub vertex_buffer: vk::DeviceAddress,
    _padding: u64,
}

impl GpuDrawPushConstants {
    pub fn new(world_matrix: Mat4, vertex_buffer: vk::DeviceAddress) -> Self {
        Self {
            world_matrix,
            vertex_buffer,
            _padding: 0,
        }
    }
}

/// Conservative frustum test.
///
/// Projects the eight corners of the object's box into clip space and
/// rejects it only if their bounding box misses the view volume
/// (`x, y ∈ [-1, 1]`, `z ∈ [0, 1]`). Some invisible objects pass; no visible
/// object is rejected.
pub fn is_visible(object: &RenderObject, view_proj: &Mat4) -> bool {
    let matrix = *view_proj * object.transform;

    let mut min = Vec3::splat(1.5);
    let mut max = Vec3::splat(-1.5);
    for corner in object.bounds.corners() {
        let clip = matrix * corner.extend(1.0);
        let ndc = clip.truncate() / clip.w;
        min = min.min(ndc);
        max = max.max(ndc);
    }

    !(min.z > 1.0 || max.z < 0.0 || min.x > 1.0 || max.x < -1.0 || min.y > 1.0 || max.y < -1.0)
}

/// Indices of visible opaque surfaces, grouped by material and then by
/// index buffer.
pub fn sort_opaque(objects: &[RenderObject], view_proj: &Mat4) -> Vec<usize> {
    let mut order: Vec<usize> = objects
        .iter()
        .enumerate()
        .filter(|(_, object)| is_visible(object, view_proj))
        .map(|(i, _)| i)
        .collect();

    order.sort_by_key(|&i| {
        let object = &objects[i];
        (object.material_key(), object.index_buffer.as_raw())
    });
    order
}

/// Counters for one recorded frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrawStats {
    pub drawcall_count: u32,
    pub triangle_count: u32,
    pub pipeline_binds: u32,
    pub material_binds: u32,
    pub index_buffer_binds: u32,
    pub culled: u32,
}

/// Sink for the state changes and draws produced by [`record_draws`].
pub trait DrawRecorder {
    /// Binds the material's pipeline and the global scene set (set 0).
    fn bind_pipeline(&mut self, material: &MaterialInstance, global_set: vk::DescriptorSet);

    /// Binds the material's descriptor set (set 1).
    fn bind_material(&mut self, material: &MaterialInstance);

    fn bind_index_buffer(&mut self, buffer: vk::Buffer);

    /// Pushes the object's constants and issues its indexed draw.
    fn draw(&mut self, object: &RenderObject);
}

/// Records every surface of `ctx`: sorted visible opaque surfaces first,
/// then transparent ones in insertion order.
pub fn record_draws<R: DrawRecorder>(
    recorder: &mut R,
    ctx: &DrawContext,
    view_proj: &Mat4,
    global_set: vk::DescriptorSet,
) -> DrawStats {
    let opaque_order = sort_opaque(&ctx.opaque_surfaces, view_proj);
    let mut stats = DrawStats {
        culled: (ctx.opaque_surfaces.len() - opaque_order.len()) as u32,
        ..DrawStats::default()
    };

    let mut last_pipeline = vk::Pipeline::null();
    let mut last_material: Option<usize> = None;
    let mut last_index_buffer = vk::Buffer::null();

    let opaque = opaque_order.iter().map(|&i| &ctx.opaque_surfaces[i]);
    for object in opaque.chain(ctx.transparent_surfaces.iter()) {
        if last_material != Some(object.material_key()) {
            last_material = Some(object.material_key());

            if object.material.pipeline != last_pipeline {
                last_pipeline = object.material.pipeline;
                recorder.bind_pipeline(&object.material, global_set);
                stats.pipeline_binds += 1;
            }

            recorder.bind_material(&object.material);
            stats.material_binds += 1;
        }

        if object.index_buffer != last_index_buffer {
            last_index_buffer = object.index_buffer;
            recorder.bind_index_buffer(object.index_buffer);
            stats.index_buffer_binds += 1;
        }

        recorder.draw(object);
        stats.drawcall_count += 1;
        stats.triangle_count += object.index_count / 3;
    }

    stats
}

/// [`DrawRecorder`] that writes into a command buffer inside a dynamic
/// rendering pass.
pub struct CommandRecorder<'a> {
    cmd: &'a CommandBuffer,
    extent: vk::Extent2D,
}

impl<'a> CommandRecorder<'a> {
    pub fn new(cmd: &'a CommandBuffer, extent: vk::Extent2D) -> Self {
        Self { cmd, extent }
    }
}

impl DrawRecorder for CommandRecorder<'_> {
    fn bind_pipeline(&mut self, material: &MaterialInstance, global_set: vk::DescriptorSet) {
        let bind_point = vk::PipelineBindPoint::GRAPHICS;
        self.cmd.bind_pipeline(bind_point, material.pipeline);
        self.cmd
            .bind_descriptor_sets(bind_point, material.layout, 0, &[global_set]);

        // Viewport and scissor are dynamic state, reset with every pipeline.
        self.cmd.set_viewport(vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: self.extent.width as f32,
            height: self.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        });
        self.cmd.set_scissor(vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent: self.extent,
        });
    }

    fn bind_material(&mut self, material: &MaterialInstance) {
        self.cmd.bind_descriptor_sets(
            vk::PipelineBindPoint::GRAPHICS,
            material.layout,
            1,
            &[material.material_set],
        );
    }

    fn bind_index_buffer(&mut self, buffer: vk::Buffer) {
        self.cmd.bind_index_buffer(buffer, 0);
    }

    fn draw(&mut self, object: &RenderObject) {
        let constants = GpuDrawPushConstants::new(object.transform, object.vertex_buffer_address);
        self.cmd.push_constants(
            object.material.layout,
            vk::ShaderStageFlags::VERTEX,
            &constants,
        );
        self.cmd.draw_indexed(object.index_count, object.first_index);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use blackhole_scene::{Bounds, Camera, MaterialPass};

    use super::*;

    fn material(pipeline: u64, set: u64, pass: MaterialPass) -> Arc<MaterialInstance> {
        Arc::new(MaterialInstance {
            pipeline: vk::Pipeline::from_raw(pipeline),
            layout: vk::PipelineLayout::from_raw(1),
            material_set: vk::DescriptorSet::from_raw(set),
            pass,
        })
    }

    fn object(material: &Arc<MaterialInstance>, index_buffer: u64, transform: Mat4) -> RenderObject {
        RenderObject {
            index_count: 36,
            first_index: 0,
            index_buffer: vk::Buffer::from_raw(index_buffer),
            material: material.clone(),
            bounds: Bounds::from_min_max(Vec3::splat(-0.5), Vec3::splat(0.5)),
            transform,
            vertex_buffer_address: 0x1000,
        }
    }

    /// Camera at +5 Z looking down -Z.
    fn view_proj() -> Mat4 {
        let camera = Camera::new(Vec3::new(0.0, 0.0, 5.0));
        camera.projection_matrix(16.0 / 9.0) * camera.view_matrix()
    }

    #[derive(Default)]
    struct Recorded {
        calls: Vec<String>,
    }

    impl DrawRecorder for Recorded {
        fn bind_pipeline(&mut self, material: &MaterialInstance, _: vk::DescriptorSet) {
            self.calls.push(format!("pipeline {}", material.pipeline.as_raw()));
        }

        fn bind_material(&mut self, material: &MaterialInstance) {
            self.calls.push(format!("material {}", material.material_set.as_raw()));
        }

        fn bind_index_buffer(&mut self, buffer: vk::Buffer) {
            self.calls.push(format!("index {}", buffer.as_raw()));
        }

        fn draw(&mut self, object: &RenderObject) {
            self.calls.push(format!("draw {}", object.index_buffer.as_raw()));
        }
    }

    #[test]
    fn test_push_constants_layout() {
        assert_eq!(std::mem::size_of::<GpuDrawPushConstants>(), 80);
    }

    #[test]
    fn test_object_in_front_is_visible() {
        let mat = material(10, 100, MaterialPass::MainColor);
        assert!(is_visible(&object(&mat, 1, Mat4::IDENTITY), &view_proj()));
    }

    #[test]
    fn test_object_behind_camera_is_culled() {
        let mat = material(10, 100, MaterialPass::MainColor);
        let behind = object(&mat, 1, Mat4::from_translation(Vec3::new(0.0, 0.0, 20.0)));
        assert!(!is_visible(&behind, &view_proj()));
    }

    #[test]
    fn test_object_off_to_the_side_is_culled() {
        let mat = material(10, 100, MaterialPass::MainColor);
        let aside = object(&mat, 1, Mat4::from_translation(Vec3::new(50.0, 0.0, 0.0)));
        assert!(!is_visible(&aside, &view_proj()));
    }

    #[test]
    fn test_sort_groups_by_material_then_index_buffer() {
        let a = material(10, 100, MaterialPass::MainColor);
        let b = material(10, 200, MaterialPass::MainColor);
        let objects = vec![
            object(&a, 7, Mat4::IDENTITY),
            object(&b, 3, Mat4::IDENTITY),
            object(&a, 5, Mat4::IDENTITY),
        ];

        let order = sort_opaque(&objects, &view_proj());
        assert_eq!(order.len(), 3);
        // Both draws of one material are adjacent, lower buffer first.
        let pos = |i: usize| order.iter().position(|&o| o == i).unwrap();
        assert_eq!(pos(2) + 1, pos(0));
        assert!(pos(1) == 0 || pos(1) == 2);
    }

    #[test]
    fn test_shared_material_binds_pipeline_once() {
        let mat = material(10, 100, MaterialPass::MainColor);
        let mut ctx = DrawContext::new();
        ctx.push(object(&mat, 9, Mat4::IDENTITY));
        ctx.push(object(&mat, 4, Mat4::IDENTITY));

        let mut recorded = Recorded::default();
        let stats = record_draws(
            &mut recorded,
            &ctx,
            &view_proj(),
            vk::DescriptorSet::from_raw(1),
        );

        assert_eq!(stats.pipeline_binds, 1);
        assert_eq!(stats.material_binds, 1);
        assert_eq!(stats.index_buffer_binds, 2);
        assert_eq!(stats.drawcall_count, 2);
        assert_eq!(stats.triangle_count, 24);
        assert_eq!(
            recorded.calls,
            vec![
                "pipeline 10",
                "material 100",
                "index 4",
                "draw 4",
                "index 9",
                "draw 9"
            ]
        );
    }

    #[test]
    fn test_transparent_after_opaque_in_insertion_order() {
        let opaque = material(10, 100, MaterialPass::MainColor);
        let glass = material(20, 200, MaterialPass::Transparent);
        let smoke = material(20, 300, MaterialPass::Transparent);

        let mut ctx = DrawContext::new();
        ctx.push(object(&smoke, 2, Mat4::IDENTITY));
        ctx.push(object(&opaque, 1, Mat4::IDENTITY));
        ctx.push(object(&glass, 3, Mat4::IDENTITY));

        let mut recorded = Recorded::default();
        let stats = record_draws(
            &mut recorded,
            &ctx,
            &view_proj(),
            vk::DescriptorSet::from_raw(1),
        );

        let draws: Vec<&str> = recorded
            .calls
            .iter()
            .filter(|c| c.starts_with("draw"))
            .map(String::as_str)
            .collect();
        assert_eq!(draws, vec!["draw 1", "draw 2", "draw 3"]);
        // Both transparent materials share one pipeline.
        assert_eq!(stats.pipeline_binds, 2);
        assert_eq!(stats.material_binds, 3);
    }

    #[test]
    fn test_culled_objects_are_counted() {
        let mat = material(10, 100, MaterialPass::MainColor);
        let mut ctx = DrawContext::new();
        ctx.push(object(&mat, 1, Mat4::IDENTITY));
        ctx.push(object(&mat, 2, Mat4::from_translation(Vec3::new(0.0, 0.0, 20.0))));

        let mut recorded = Recorded::default();
        let stats = record_draws(&mut recorded, &ctx, &view_proj(), vk::DescriptorSet::null());
        assert_eq!(stats.drawcall_count, 1);
        assert_eq!(stats.culled, 1);
    }
}
