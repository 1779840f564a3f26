//! Metallic-roughness material pipelines.
//!
//! Mesh pipelines use two descriptor sets:
//!
//! - set 0: per-frame [`GpuSceneData`](crate::gpu_types::GpuSceneData)
//! - set 1: material, binding 0 [`MaterialConstants`] uniform, binding 1
//!   color texture, binding 2 metal-rough texture
//!
//! plus a vertex-stage push constant block with the world matrix and the
//! vertex buffer address.

use std::path::Path;
use std::sync::Arc;

use ash::vk;
use tracing::info;

use blackhole_rhi::RhiResult;
use blackhole_rhi::descriptor::{DescriptorBackend, DescriptorLayoutBuilder, DescriptorSetLayout};
use blackhole_rhi::descriptor_allocator::GrowableDescriptorAllocator;
use blackhole_rhi::descriptor_writer::DescriptorWriter;
use blackhole_rhi::device::Device;
use blackhole_rhi::pipeline::{
    BlendMode, CompareOp, CullMode, FrontFace, GraphicsPipelineBuilder, Pipeline, PipelineLayout,
};
use blackhole_rhi::shader::{Shader, ShaderStage};
use blackhole_scene::{MaterialInstance, MaterialPass};

use crate::draw::GpuDrawPushConstants;
use crate::gpu_types::MaterialConstants;

pub const MESH_VERTEX_SHADER: &str = "mesh.vert.spv";
pub const MESH_FRAGMENT_SHADER: &str = "mesh.frag.spv";

/// Handles a material set is written from.
#[derive(Debug, Clone, Copy)]
pub struct MaterialResources {
    pub color_image: vk::ImageView,
    pub color_sampler: vk::Sampler,
    pub metal_rough_image: vk::ImageView,
    pub metal_rough_sampler: vk::Sampler,
    pub data_buffer: vk::Buffer,
    pub data_buffer_offset: vk::DeviceSize,
}

/// Layout of set 1.
pub fn material_layout_builder() -> DescriptorLayoutBuilder {
    let mut builder = DescriptorLayoutBuilder::new();
    builder
        .add_binding(0, vk::DescriptorType::UNIFORM_BUFFER)
        .add_binding(1, vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
        .add_binding(2, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
    builder
}

/// Allocates a material set from `allocator` and fills it from `resources`.
///
/// # Errors
///
/// Returns the allocation error; writes themselves cannot fail.
pub fn write_material_set<B: DescriptorBackend>(
    writer: &mut DescriptorWriter,
    allocator: &mut GrowableDescriptorAllocator<B>,
    layout: vk::DescriptorSetLayout,
    resources: &MaterialResources,
) -> RhiResult<vk::DescriptorSet> {
    let set = allocator.allocate(layout)?;

    writer.clear();
    writer
        .write_buffer(
            0,
            resources.data_buffer,
            MaterialConstants::SIZE as vk::DeviceSize,
            resources.data_buffer_offset,
            vk::DescriptorType::UNIFORM_BUFFER,
        )
        .write_image(
            1,
            resources.color_image,
            resources.color_sampler,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        )
        .write_image(
            2,
            resources.metal_rough_image,
            resources.metal_rough_sampler,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        );
    writer.update_set(allocator.backend(), set);

    Ok(set)
}

/// Opaque and transparent mesh pipelines sharing one layout.
pub struct MetallicRoughness {
    opaque_pipeline: Pipeline,
    transparent_pipeline: Pipeline,
    layout: PipelineLayout,
    material_layout: DescriptorSetLayout,
    writer: DescriptorWriter,
}

impl MetallicRoughness {
    /// Builds both pipelines from the mesh shaders in `shader_dir`.
    ///
    /// # Errors
    ///
    /// Returns a shader error if either shader cannot be loaded, or the
    /// Vulkan error if layout or pipeline creation fails.
    pub fn new(
        device: Arc<Device>,
        shader_dir: &Path,
        scene_layout: vk::DescriptorSetLayout,
        color_format: vk::Format,
        depth_format: vk::Format,
    ) -> RhiResult<Self> {
        let vertex = Shader::from_spirv_file(
            device.clone(),
            &shader_dir.join(MESH_VERTEX_SHADER),
            ShaderStage::Vertex,
            "main",
        )?;
        let fragment = Shader::from_spirv_file(
            device.clone(),
            &shader_dir.join(MESH_FRAGMENT_SHADER),
            ShaderStage::Fragment,
            "main",
        )?;

        let material_layout = material_layout_builder().build(
            device.clone(),
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            vk::DescriptorSetLayoutCreateFlags::empty(),
        )?;

        let push_range = vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::VERTEX)
            .offset(0)
            .size(std::mem::size_of::<GpuDrawPushConstants>() as u32);
        let layout = PipelineLayout::new(
            device.clone(),
            &[scene_layout, material_layout.handle()],
            &[push_range],
        )?;

        let builder = || {
            GraphicsPipelineBuilder::new()
                .shaders(&vertex, &fragment)
                .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
                .polygon_mode(vk::PolygonMode::FILL)
                .cull_mode(CullMode::None, FrontFace::Clockwise)
                .color_attachment_format(color_format)
                .depth_attachment_format(depth_format)
        };

        let opaque_pipeline = builder()
            .blending(BlendMode::None)
            .depth_test(true, CompareOp::GreaterOrEqual)
            .build(device.clone(), &layout)?;
        let transparent_pipeline = builder()
            .blending(BlendMode::Additive)
            .depth_test(false, CompareOp::GreaterOrEqual)
            .build(device, &layout)?;

        info!("Metallic-roughness pipelines created");

        Ok(Self {
            opaque_pipeline,
            transparent_pipeline,
            layout,
            material_layout,
            writer: DescriptorWriter::new(),
        })
    }

    pub fn material_layout(&self) -> vk::DescriptorSetLayout {
        self.material_layout.handle()
    }

    /// Writes a material set and pairs it with the pipeline for `pass`.
    ///
    /// # Errors
    ///
    /// Returns the descriptor allocation error.
    pub fn write_material<B: DescriptorBackend>(
        &mut self,
        pass: MaterialPass,
        resources: &MaterialResources,
        allocator: &mut GrowableDescriptorAllocator<B>,
    ) -> RhiResult<MaterialInstance> {
        let material_set = write_material_set(
            &mut self.writer,
            allocator,
            self.material_layout.handle(),
            resources,
        )?;

        let pipeline = match pass {
            MaterialPass::MainColor => &self.opaque_pipeline,
            MaterialPass::Transparent => &self.transparent_pipeline,
        };

        Ok(MaterialInstance {
            pipeline: pipeline.handle(),
            layout: self.layout.handle(),
            material_set,
            pass,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use ash::vk::Handle;
    use blackhole_rhi::descriptor::PoolSizeRatio;

    use super::*;

    /// Records writes; pools never run out.
    #[derive(Default)]
    struct RecordingBackend {
        writes: RefCell<Vec<(u64, u32, vk::DescriptorType, u64)>>,
        allocated: RefCell<u64>,
    }

    impl DescriptorBackend for RecordingBackend {
        fn create_pool(&self, _: u32, _: &[PoolSizeRatio]) -> RhiResult<vk::DescriptorPool> {
            Ok(vk::DescriptorPool::from_raw(1))
        }

        fn reset_pool(&self, _: vk::DescriptorPool) -> RhiResult<()> {
            Ok(())
        }

        fn destroy_pool(&self, _: vk::DescriptorPool) {}

        fn allocate_set(
            &self,
            _: vk::DescriptorPool,
            _: vk::DescriptorSetLayout,
            _: Option<u32>,
        ) -> Result<vk::DescriptorSet, vk::Result> {
            let mut next = self.allocated.borrow_mut();
            *next += 1;
            Ok(vk::DescriptorSet::from_raw(*next))
        }

        fn update_sets(&self, writes: &[vk::WriteDescriptorSet<'_>]) {
            for write in writes {
                // The handle each write points at, read back through its info.
                let handle = unsafe {
                    if write.p_buffer_info.is_null() {
                        (*write.p_image_info).image_view.as_raw()
                    } else {
                        (*write.p_buffer_info).buffer.as_raw()
                    }
                };
                self.writes.borrow_mut().push((
                    write.dst_set.as_raw(),
                    write.dst_binding,
                    write.descriptor_type,
                    handle,
                ));
            }
        }
    }

    fn resources() -> MaterialResources {
        MaterialResources {
            color_image: vk::ImageView::from_raw(11),
            color_sampler: vk::Sampler::from_raw(12),
            metal_rough_image: vk::ImageView::from_raw(21),
            metal_rough_sampler: vk::Sampler::from_raw(22),
            data_buffer: vk::Buffer::from_raw(31),
            data_buffer_offset: 256,
        }
    }

    #[test]
    fn test_material_layout_bindings() {
        let bindings = material_layout_builder().bindings_for(vk::ShaderStageFlags::FRAGMENT);
        let types: Vec<_> = bindings.iter().map(|b| b.descriptor_type).collect();
        assert_eq!(
            types,
            vec![
                vk::DescriptorType::UNIFORM_BUFFER,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            ]
        );
    }

    #[test]
    fn test_write_material_set() {
        let mut allocator =
            GrowableDescriptorAllocator::init(RecordingBackend::default(), 4, &[]).unwrap();
        let mut writer = DescriptorWriter::new();

        let set = write_material_set(
            &mut writer,
            &mut allocator,
            vk::DescriptorSetLayout::from_raw(5),
            &resources(),
        )
        .unwrap();

        let writes = allocator.backend().writes.borrow().clone();
        assert_eq!(
            writes,
            vec![
                (set.as_raw(), 0, vk::DescriptorType::UNIFORM_BUFFER, 31),
                (set.as_raw(), 1, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 11),
                (set.as_raw(), 2, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 21),
            ]
        );
    }

    #[test]
    fn test_writer_is_reused_between_materials() {
        let mut allocator =
            GrowableDescriptorAllocator::init(RecordingBackend::default(), 4, &[]).unwrap();
        let mut writer = DescriptorWriter::new();
        let layout = vk::DescriptorSetLayout::from_raw(5);

        let first = write_material_set(&mut writer, &mut allocator, layout, &resources()).unwrap();
        let second = write_material_set(&mut writer, &mut allocator, layout, &resources()).unwrap();

        assert_ne!(first, second);
        assert_eq!(writer.pending_writes(), 3);
        assert_eq!(allocator.backend().writes.borrow().len(), 6);
    }
}
