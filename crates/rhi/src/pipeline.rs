//! Graphics and compute pipelines.
//!
//! - [`PipelineLayout`] wraps the descriptor set layouts and push constant
//!   ranges a pipeline uses.
//! - [`Pipeline`] owns a graphics or compute `VkPipeline`.
//! - [`GraphicsPipelineBuilder`] configures a dynamic-rendering graphics
//!   pipeline. Meshes are fetched through buffer device addresses, so the
//!   vertex input state is always empty.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::path::Path;
//! use ash::vk;
//! use blackhole_rhi::device::Device;
//! use blackhole_rhi::shader::{Shader, ShaderStage};
//! use blackhole_rhi::pipeline::{BlendMode, CompareOp, GraphicsPipelineBuilder, PipelineLayout};
//!
//! # fn example(device: Arc<Device>) -> Result<(), blackhole_rhi::RhiError> {
//! let vert = Shader::from_spirv_file(device.clone(), Path::new("shaders/mesh.vert.spv"), ShaderStage::Vertex, "main")?;
//! let frag = Shader::from_spirv_file(device.clone(), Path::new("shaders/mesh.frag.spv"), ShaderStage::Fragment, "main")?;
//! let layout = PipelineLayout::new(device.clone(), &[], &[])?;
//!
//! let pipeline = GraphicsPipelineBuilder::new()
//!     .shaders(&vert, &frag)
//!     .blending(BlendMode::Additive)
//!     .depth_test(false, CompareOp::GreaterOrEqual)
//!     .color_attachment_format(vk::Format::R16G16B16A16_SFLOAT)
//!     .depth_attachment_format(vk::Format::D32_SFLOAT)
//!     .build(device, &layout)?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::shader::Shader;

/// Owned `VkPipelineLayout`.
pub struct PipelineLayout {
    device: Arc<Device>,
    layout: vk::PipelineLayout,
}

impl PipelineLayout {
    /// Creates a layout from set layouts (in set order) and push constant
    /// ranges.
    ///
    /// # Errors
    ///
    /// Returns an error if layout creation fails.
    pub fn new(
        device: Arc<Device>,
        descriptor_set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> RhiResult<Self> {
        let create_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(descriptor_set_layouts)
            .push_constant_ranges(push_constant_ranges);

        let layout = unsafe { device.handle().create_pipeline_layout(&create_info, None)? };

        debug!(
            "Created pipeline layout with {} descriptor set layout(s) and {} push constant range(s)",
            descriptor_set_layouts.len(),
            push_constant_ranges.len()
        );

        Ok(Self { device, layout })
    }

    #[inline]
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_pipeline_layout(self.layout, None);
        }
        debug!("Pipeline layout destroyed");
    }
}

/// Owned `VkPipeline` together with its bind point.
pub struct Pipeline {
    device: Arc<Device>,
    pipeline: vk::Pipeline,
    bind_point: vk::PipelineBindPoint,
}

impl Pipeline {
    /// Creates a compute pipeline from a single compute shader.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::PipelineError`] if `shader` is not a compute
    /// shader, or the Vulkan error if creation fails.
    pub fn compute(device: Arc<Device>, shader: &Shader, layout: &PipelineLayout) -> RhiResult<Self> {
        if shader.stage().to_vk_stage() != vk::ShaderStageFlags::COMPUTE {
            return Err(RhiError::PipelineError(format!(
                "Compute pipeline needs a compute shader, got {}",
                shader.stage()
            )));
        }

        let create_info = vk::ComputePipelineCreateInfo::default()
            .layout(layout.handle())
            .stage(shader.stage_create_info());

        let pipeline = unsafe {
            device
                .handle()
                .create_compute_pipelines(vk::PipelineCache::null(), &[create_info], None)
                .map_err(|(_, result)| result)?[0]
        };

        debug!("Compute pipeline created");

        Ok(Self {
            device,
            pipeline,
            bind_point: vk::PipelineBindPoint::COMPUTE,
        })
    }

    fn create_graphics_internal(
        device: Arc<Device>,
        create_info: &vk::GraphicsPipelineCreateInfo,
    ) -> RhiResult<Self> {
        let pipeline = unsafe {
            device
                .handle()
                .create_graphics_pipelines(vk::PipelineCache::null(), &[*create_info], None)
                .map_err(|(_, result)| result)?[0]
        };

        info!("Graphics pipeline created");

        Ok(Self {
            device,
            pipeline,
            bind_point: vk::PipelineBindPoint::GRAPHICS,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    #[inline]
    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        self.bind_point
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_pipeline(self.pipeline, None);
        }
        debug!(
            "{} pipeline destroyed",
            if self.bind_point == vk::PipelineBindPoint::GRAPHICS {
                "Graphics"
            } else {
                "Compute"
            }
        );
    }
}

/// Face culling mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CullMode {
    #[default]
    None,
    Front,
    Back,
}

impl CullMode {
    pub fn to_vk(self) -> vk::CullModeFlags {
        match self {
            CullMode::None => vk::CullModeFlags::NONE,
            CullMode::Front => vk::CullModeFlags::FRONT,
            CullMode::Back => vk::CullModeFlags::BACK,
        }
    }
}

/// Front face winding order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FrontFace {
    CounterClockwise,
    #[default]
    Clockwise,
}

impl FrontFace {
    pub fn to_vk(self) -> vk::FrontFace {
        match self {
            FrontFace::CounterClockwise => vk::FrontFace::COUNTER_CLOCKWISE,
            FrontFace::Clockwise => vk::FrontFace::CLOCKWISE,
        }
    }
}

/// Depth comparison operation.
///
/// With a reverse-Z projection nearer fragments have larger depth, so
/// geometry passes use [`CompareOp::GreaterOrEqual`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CompareOp {
    Never,
    Less,
    LessOrEqual,
    Greater,
    #[default]
    GreaterOrEqual,
    Always,
}

impl CompareOp {
    pub fn to_vk(self) -> vk::CompareOp {
        match self {
            CompareOp::Never => vk::CompareOp::NEVER,
            CompareOp::Less => vk::CompareOp::LESS,
            CompareOp::LessOrEqual => vk::CompareOp::LESS_OR_EQUAL,
            CompareOp::Greater => vk::CompareOp::GREATER,
            CompareOp::GreaterOrEqual => vk::CompareOp::GREATER_OR_EQUAL,
            CompareOp::Always => vk::CompareOp::ALWAYS,
        }
    }
}

/// Color blending for the single color attachment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BlendMode {
    /// Blending disabled.
    #[default]
    None,
    /// `src * src_alpha + dst`
    Additive,
    /// `src * src_alpha + dst * (1 - src_alpha)`
    AlphaBlend,
}

impl BlendMode {
    pub fn attachment_state(self) -> vk::PipelineColorBlendAttachmentState {
        let base = vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA);

        let dst_color = match self {
            BlendMode::None => return base.blend_enable(false),
            BlendMode::Additive => vk::BlendFactor::ONE,
            BlendMode::AlphaBlend => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        };

        base.blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(dst_color)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD)
    }
}

/// Builder for dynamic-rendering graphics pipelines.
///
/// Defaults: triangle list, fill, no culling, clockwise front face, no
/// blending, depth test disabled, one sample, dynamic viewport and scissor.
pub struct GraphicsPipelineBuilder<'a> {
    vertex_shader: Option<&'a Shader>,
    fragment_shader: Option<&'a Shader>,
    topology: vk::PrimitiveTopology,
    polygon_mode: vk::PolygonMode,
    cull_mode: CullMode,
    front_face: FrontFace,
    blend_mode: BlendMode,
    depth_test_enable: bool,
    depth_write_enable: bool,
    depth_compare_op: CompareOp,
    color_attachment_format: Option<vk::Format>,
    depth_attachment_format: Option<vk::Format>,
}

impl Default for GraphicsPipelineBuilder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> GraphicsPipelineBuilder<'a> {
    pub fn new() -> Self {
        Self {
            vertex_shader: None,
            fragment_shader: None,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: CullMode::None,
            front_face: FrontFace::Clockwise,
            blend_mode: BlendMode::None,
            depth_test_enable: false,
            depth_write_enable: false,
            depth_compare_op: CompareOp::Never,
            color_attachment_format: None,
            depth_attachment_format: None,
        }
    }

    pub fn shaders(mut self, vertex: &'a Shader, fragment: &'a Shader) -> Self {
        self.vertex_shader = Some(vertex);
        self.fragment_shader = Some(fragment);
        self
    }

    pub fn topology(mut self, topology: vk::PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    pub fn polygon_mode(mut self, mode: vk::PolygonMode) -> Self {
        self.polygon_mode = mode;
        self
    }

    pub fn cull_mode(mut self, mode: CullMode, front_face: FrontFace) -> Self {
        self.cull_mode = mode;
        self.front_face = front_face;
        self
    }

    pub fn blending(mut self, mode: BlendMode) -> Self {
        self.blend_mode = mode;
        self
    }

    /// Enables the depth test, optionally writing depth.
    pub fn depth_test(mut self, write: bool, op: CompareOp) -> Self {
        self.depth_test_enable = true;
        self.depth_write_enable = write;
        self.depth_compare_op = op;
        self
    }

    pub fn disable_depth_test(mut self) -> Self {
        self.depth_test_enable = false;
        self.depth_write_enable = false;
        self.depth_compare_op = CompareOp::Never;
        self
    }

    pub fn color_attachment_format(mut self, format: vk::Format) -> Self {
        self.color_attachment_format = Some(format);
        self
    }

    pub fn depth_attachment_format(mut self, format: vk::Format) -> Self {
        self.depth_attachment_format = Some(format);
        self
    }

    /// Builds the pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::PipelineError`] if a shader or the color format is
    /// missing, or the Vulkan error if creation fails.
    pub fn build(self, device: Arc<Device>, layout: &PipelineLayout) -> RhiResult<Pipeline> {
        let vertex_shader = self
            .vertex_shader
            .ok_or_else(|| RhiError::PipelineError("Vertex shader is required".to_string()))?;
        let fragment_shader = self
            .fragment_shader
            .ok_or_else(|| RhiError::PipelineError("Fragment shader is required".to_string()))?;
        let color_format = self.color_attachment_format.ok_or_else(|| {
            RhiError::PipelineError("A color attachment format is required".to_string())
        })?;

        let shader_stages = [
            vertex_shader.stage_create_info(),
            fragment_shader.stage_create_info(),
        ];

        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default();

        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(self.topology)
            .primitive_restart_enable(false);

        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(self.polygon_mode)
            .line_width(1.0)
            .cull_mode(self.cull_mode.to_vk())
            .front_face(self.front_face.to_vk());

        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .min_sample_shading(1.0);

        let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(self.depth_test_enable)
            .depth_write_enable(self.depth_write_enable)
            .depth_compare_op(self.depth_compare_op.to_vk())
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false)
            .min_depth_bounds(0.0)
            .max_depth_bounds(1.0);

        let color_blend_attachments = [self.blend_mode.attachment_state()];
        let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .logic_op(vk::LogicOp::COPY)
            .attachments(&color_blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let color_formats = [color_format];
        let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(&color_formats)
            .depth_attachment_format(
                self.depth_attachment_format
                    .unwrap_or(vk::Format::UNDEFINED),
            );

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .depth_stencil_state(&depth_stencil_state)
            .color_blend_state(&color_blend_state)
            .dynamic_state(&dynamic_state)
            .layout(layout.handle())
            .push_next(&mut rendering_info);

        Pipeline::create_graphics_internal(device, &pipeline_info)
    }
}
