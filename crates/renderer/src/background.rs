//! Compute effects that fill the draw image before geometry.

use std::path::Path;
use std::sync::Arc;

use ash::vk;
use glam::Vec4;
use tracing::{debug, info, warn};

use blackhole_core::BackgroundEffectKind;
use blackhole_rhi::RhiResult;
use blackhole_rhi::command::CommandBuffer;
use blackhole_rhi::descriptor::{DescriptorLayoutBuilder, DescriptorSetLayout, PoolSizeRatio};
use blackhole_rhi::descriptor_allocator::DescriptorAllocator;
use blackhole_rhi::descriptor_writer::DescriptorWriter;
use blackhole_rhi::device::Device;
use blackhole_rhi::pipeline::{Pipeline, PipelineLayout};
use blackhole_rhi::shader::{Shader, ShaderStage};

use crate::gpu_types::ComputePushConstants;

pub const GRADIENT_SHADER: &str = "gradient.comp.spv";
pub const SKY_SHADER: &str = "sky.comp.spv";

/// Local workgroup size of the effect shaders on both axes.
pub const WORKGROUP_SIZE: u32 = 16;

/// Workgroups needed to cover `extent`, rounding up.
pub fn dispatch_groups(extent: vk::Extent2D) -> (u32, u32) {
    (
        extent.width.div_ceil(WORKGROUP_SIZE),
        extent.height.div_ceil(WORKGROUP_SIZE),
    )
}

/// Initial push constants of an effect.
///
/// The gradient blends `data1` (top) into `data2` (bottom); the sky uses
/// `data1.rgb` as its color and `data1.w` as the star threshold.
pub fn default_push_constants(kind: BackgroundEffectKind) -> ComputePushConstants {
    match kind {
        BackgroundEffectKind::Gradient => ComputePushConstants {
            data1: Vec4::new(1.0, 0.0, 0.0, 1.0),
            data2: Vec4::new(0.0, 0.0, 1.0, 1.0),
            ..Default::default()
        },
        BackgroundEffectKind::Sky => ComputePushConstants {
            data1: Vec4::new(0.1, 0.2, 0.4, 0.97),
            ..Default::default()
        },
    }
}

fn shader_file(kind: BackgroundEffectKind) -> &'static str {
    match kind {
        BackgroundEffectKind::Gradient => GRADIENT_SHADER,
        BackgroundEffectKind::Sky => SKY_SHADER,
    }
}

pub struct ComputeEffect {
    pub kind: BackgroundEffectKind,
    pub pipeline: Pipeline,
    pub data: ComputePushConstants,
}

/// Loaded background effects and the storage-image set they write through.
///
/// Effects whose shader is missing or invalid are left out; with none
/// loaded, [`record`](Self::record) does nothing and the draw image keeps
/// whatever the previous frame left in it.
pub struct BackgroundEffects {
    effects: Vec<ComputeEffect>,
    current: usize,
    draw_image_set: vk::DescriptorSet,
    layout: PipelineLayout,
    _image_layout: DescriptorSetLayout,
    _allocator: DescriptorAllocator<Arc<Device>>,
}

impl BackgroundEffects {
    /// Loads every effect found in `shader_dir` and points them at
    /// `draw_image_view`, which must be in `GENERAL` layout when recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if the descriptor or pipeline layout cannot be
    /// created. Shader problems only drop the affected effect.
    pub fn new(
        device: Arc<Device>,
        shader_dir: &Path,
        draw_image_view: vk::ImageView,
        preferred: BackgroundEffectKind,
    ) -> RhiResult<Self> {
        let allocator = DescriptorAllocator::init_pool(
            device.clone(),
            10,
            &[PoolSizeRatio::new(vk::DescriptorType::STORAGE_IMAGE, 1.0)],
        )?;

        let mut builder = DescriptorLayoutBuilder::new();
        builder.add_binding(0, vk::DescriptorType::STORAGE_IMAGE);
        let image_layout = builder.build(
            device.clone(),
            vk::ShaderStageFlags::COMPUTE,
            vk::DescriptorSetLayoutCreateFlags::empty(),
        )?;

        let draw_image_set = allocator.allocate(image_layout.handle())?;
        let mut writer = DescriptorWriter::new();
        writer.write_image(
            0,
            draw_image_view,
            vk::Sampler::null(),
            vk::ImageLayout::GENERAL,
            vk::DescriptorType::STORAGE_IMAGE,
        );
        writer.update_set(device.as_ref(), draw_image_set);

        let push_range = vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::COMPUTE)
            .offset(0)
            .size(std::mem::size_of::<ComputePushConstants>() as u32);
        let layout = PipelineLayout::new(
            device.clone(),
            &[image_layout.handle()],
            &[push_range],
        )?;

        let mut effects = Vec::new();
        for kind in [BackgroundEffectKind::Gradient, BackgroundEffectKind::Sky] {
            let path = shader_dir.join(shader_file(kind));
            let shader = match Shader::from_spirv_file(
                device.clone(),
                &path,
                ShaderStage::Compute,
                "main",
            ) {
                Ok(shader) => shader,
                Err(e) => {
                    warn!("Skipping {:?} background: {}", kind, e);
                    continue;
                }
            };

            match Pipeline::compute(device.clone(), &shader, &layout) {
                Ok(pipeline) => effects.push(ComputeEffect {
                    kind,
                    pipeline,
                    data: default_push_constants(kind),
                }),
                Err(e) => warn!("Skipping {:?} background: {}", kind, e),
            }
        }

        let current = effects
            .iter()
            .position(|effect| effect.kind == preferred)
            .unwrap_or(0);

        info!(
            "Background effects loaded: {:?}",
            effects.iter().map(|e| e.kind).collect::<Vec<_>>()
        );

        Ok(Self {
            effects,
            current,
            draw_image_set,
            layout,
            _image_layout: image_layout,
            _allocator: allocator,
        })
    }

    pub fn current(&self) -> Option<&ComputeEffect> {
        self.effects.get(self.current)
    }

    pub fn current_mut(&mut self) -> Option<&mut ComputeEffect> {
        self.effects.get_mut(self.current)
    }

    /// Switches to `kind`. Returns `false` if that effect is not loaded.
    pub fn select(&mut self, kind: BackgroundEffectKind) -> bool {
        match self.effects.iter().position(|effect| effect.kind == kind) {
            Some(index) => {
                self.current = index;
                debug!("Background effect: {:?}", kind);
                true
            }
            None => false,
        }
    }

    /// Records the current effect over `extent` of the draw image.
    pub fn record(&self, cmd: &CommandBuffer, extent: vk::Extent2D) {
        let Some(effect) = self.current() else {
            return;
        };

        cmd.bind_pipeline(vk::PipelineBindPoint::COMPUTE, effect.pipeline.handle());
        cmd.bind_descriptor_sets(
            vk::PipelineBindPoint::COMPUTE,
            self.layout.handle(),
            0,
            &[self.draw_image_set],
        );
        cmd.push_constants(
            self.layout.handle(),
            vk::ShaderStageFlags::COMPUTE,
            &effect.data,
        );

        let (x, y) = dispatch_groups(extent);
        cmd.dispatch(x, y, 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_groups_round_up() {
        let extent = |width, height| vk::Extent2D { width, height };
        assert_eq!(dispatch_groups(extent(1700, 900)), (107, 57));
        assert_eq!(dispatch_groups(extent(16, 32)), (1, 2));
        assert_eq!(dispatch_groups(extent(1, 1)), (1, 1));
    }

    #[test]
    fn test_default_push_constants() {
        let gradient = default_push_constants(BackgroundEffectKind::Gradient);
        assert_eq!(gradient.data1, Vec4::new(1.0, 0.0, 0.0, 1.0));
        assert_eq!(gradient.data2, Vec4::new(0.0, 0.0, 1.0, 1.0));

        let sky = default_push_constants(BackgroundEffectKind::Sky);
        assert_eq!(sky.data1.w, 0.97);
        assert_eq!(sky.data2, Vec4::ZERO);
    }

    #[test]
    fn test_shader_files() {
        assert_eq!(shader_file(BackgroundEffectKind::Gradient), "gradient.comp.spv");
        assert_eq!(shader_file(BackgroundEffectKind::Sky), "sky.comp.spv");
    }
}
