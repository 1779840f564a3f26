//! Engine context.
//!
//! [`Engine`] owns every GPU object of the renderer and is passed by
//! reference to whatever drives it. Its lifecycle is explicit:
//! [`Engine::new`], then [`update_scene`](Engine::update_scene) and
//! [`draw`](Engine::draw) once per frame, then drop.
//!
//! # Frame
//!
//! ```text
//! draw image  UNDEFINED -> GENERAL            background compute
//!             GENERAL -> COLOR_ATTACHMENT     geometry (with depth)
//!             COLOR_ATTACHMENT -> TRANSFER_SRC
//! swapchain   UNDEFINED -> TRANSFER_DST       blit draw image
//!             TRANSFER_DST -> PRESENT_SRC
//! ```
//!
//! # Destruction order
//!
//! `Drop` waits for the device to go idle, flushes every frame's deletion
//! queue, then the engine-wide queue. The remaining fields are then dropped
//! in declaration order: scene and pipelines first, instance last.

use std::path::Path;
use std::sync::Arc;

use ash::vk;
use glam::{Mat4, Vec3};
use tracing::{debug, error, info, warn};

use blackhole_core::{BackgroundEffectKind, EngineConfig, Result, Timer};
use blackhole_platform::{InputState, KeyCode, MouseButton, Surface, Window};
use blackhole_rhi::RhiResult;
use blackhole_rhi::buffer::MemoryUsage;
use blackhole_rhi::deletion::{DeletionQueue, GpuResource};
use blackhole_rhi::descriptor::{DescriptorLayoutBuilder, DescriptorSetLayout};
use blackhole_rhi::descriptor_writer::DescriptorWriter;
use blackhole_rhi::device::Device;
use blackhole_rhi::image::{copy_image_to_image, transition_image};
use blackhole_rhi::instance::Instance;
use blackhole_rhi::physical_device::select_physical_device;
use blackhole_rhi::rendering::{RenderingInfoBundle, color_attachment, depth_attachment};
use blackhole_rhi::swapchain::{AcquireOutcome, Swapchain};
use blackhole_rhi::sync::FRAME_FENCE_TIMEOUT_NS;
use blackhole_scene::{Camera, CameraInput, CameraSettings, DrawContext};

use crate::background::BackgroundEffects;
use crate::defaults::DefaultResources;
use crate::draw::{CommandRecorder, DrawStats, record_draws};
use crate::frame::{FrameData, FrameRing, create_frame_ring};
use crate::gpu_types::GpuSceneData;
use crate::material::MetallicRoughness;
use crate::scene::LoadedScene;
use crate::upload::UploadContext;

pub const DRAW_IMAGE_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;
pub const DEPTH_IMAGE_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

/// Seconds between two stats log lines.
const STATS_LOG_INTERVAL_SECS: f32 = 1.0;

/// Timings and counters of the last frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EngineStats {
    pub frame_time_ms: f32,
    pub triangle_count: u32,
    pub drawcall_count: u32,
    pub pipeline_binds: u32,
    pub material_binds: u32,
    pub index_buffer_binds: u32,
    pub scene_update_ms: f32,
    pub mesh_draw_ms: f32,
}

impl EngineStats {
    fn record_draws(&mut self, draws: DrawStats, elapsed_ms: f32) {
        self.triangle_count = draws.triangle_count;
        self.drawcall_count = draws.drawcall_count;
        self.pipeline_binds = draws.pipeline_binds;
        self.material_binds = draws.material_binds;
        self.index_buffer_binds = draws.index_buffer_binds;
        self.mesh_draw_ms = elapsed_ms;
    }
}

/// Region of the draw image rendered this frame:
/// `min(swapchain, draw image) × scale` on each axis, at least one pixel.
pub fn draw_extent(swapchain: vk::Extent2D, draw_image: vk::Extent2D, scale: f32) -> vk::Extent2D {
    let axis = |a: u32, b: u32| ((a.min(b) as f32 * scale) as u32).max(1);
    vk::Extent2D {
        width: axis(swapchain.width, draw_image.width),
        height: axis(swapchain.height, draw_image.height),
    }
}

/// Samples camera controls: WASD to move, Q/E for up/down, shift for the
/// fast speed, all gated on the right mouse button.
pub fn camera_input(input: &InputState) -> CameraInput {
    CameraInput {
        forward: input.is_key_pressed(KeyCode::KeyW),
        back: input.is_key_pressed(KeyCode::KeyS),
        left: input.is_key_pressed(KeyCode::KeyA),
        right: input.is_key_pressed(KeyCode::KeyD),
        up: input.is_key_pressed(KeyCode::KeyQ),
        down: input.is_key_pressed(KeyCode::KeyE),
        fast: input.is_key_pressed(KeyCode::ShiftLeft) || input.is_key_pressed(KeyCode::ShiftRight),
        look_active: input.is_mouse_pressed(MouseButton::Right),
        mouse_delta: input.mouse_delta(),
    }
}

/// Background effect requested this frame: 1 for the gradient, 2 for the sky.
pub fn background_shortcut(input: &InputState) -> Option<BackgroundEffectKind> {
    if input.is_key_just_pressed(KeyCode::Digit1) {
        Some(BackgroundEffectKind::Gradient)
    } else if input.is_key_just_pressed(KeyCode::Digit2) {
        Some(BackgroundEffectKind::Sky)
    } else {
        None
    }
}

/// Raw handles of an image owned by the engine-wide deletion queue.
#[derive(Debug, Clone, Copy)]
struct RenderTarget {
    image: vk::Image,
    view: vk::ImageView,
    extent: vk::Extent2D,
}

pub struct Engine {
    scene: Option<LoadedScene>,
    pipelines: Option<MetallicRoughness>,
    _defaults: DefaultResources,
    background: BackgroundEffects,
    scene_layout: DescriptorSetLayout,
    frames: FrameRing<FrameData>,
    upload: UploadContext,
    main_deletion: DeletionQueue<GpuResource>,
    swapchain: Swapchain,
    surface: Surface,
    device: Arc<Device>,
    _instance: Instance,

    draw_image: RenderTarget,
    depth_image: RenderTarget,
    draw_ctx: DrawContext,
    scene_data: GpuSceneData,
    camera: Camera,
    camera_settings: CameraSettings,

    window_extent: vk::Extent2D,
    vsync: bool,
    render_scale: f32,
    resize_requested: bool,

    stats: EngineStats,
    frame_timer: Timer,
    stats_timer: Timer,
}

impl Engine {
    /// Creates the Vulkan context for `window` and loads the configured
    /// scene.
    ///
    /// Missing mesh shaders disable geometry (and scene loading) with a
    /// warning; missing background shaders disable that effect.
    ///
    /// # Errors
    ///
    /// Any failure to create the instance, surface, device, swapchain or
    /// core resources, and any failure to import the configured scene.
    pub fn new(config: &EngineConfig, window: &Window) -> Result<Self> {
        let renderer = &config.renderer;
        info!(
            "Initializing engine ({}x{}, validation: {}, vsync: {})",
            window.width(),
            window.height(),
            renderer.validation,
            renderer.vsync
        );

        let extensions = window.required_extensions()?;
        let instance = Instance::new(&config.window.title, renderer.validation, &extensions)?;
        let surface = window.create_surface(instance.entry(), instance.handle())?;
        let physical_device =
            select_physical_device(instance.handle(), surface.handle(), surface.loader())?;
        let device = Device::new(&instance, &physical_device)?;

        let swapchain = Swapchain::new(
            instance.handle(),
            device.clone(),
            surface.loader(),
            surface.handle(),
            window.extent(),
            renderer.vsync,
        )?;

        let frames = create_frame_ring(&device, renderer.initial_descriptor_sets)?;
        let upload = UploadContext::new(device.clone())?;

        // The draw image keeps the configured size across resizes; the
        // swapchain blit scales it to the window.
        let target_extent = vk::Extent3D {
            width: config.window.width.max(1),
            height: config.window.height.max(1),
            depth: 1,
        };
        let mut main_deletion = DeletionQueue::new();
        let draw_image = upload.create_image(
            target_extent,
            DRAW_IMAGE_FORMAT,
            vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::TRANSFER_DST
                | vk::ImageUsageFlags::STORAGE
                | vk::ImageUsageFlags::COLOR_ATTACHMENT,
            false,
            "draw image",
        )?;
        let depth_image = upload.create_image(
            target_extent,
            DEPTH_IMAGE_FORMAT,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            false,
            "depth image",
        )?;
        let target = |image: &blackhole_rhi::image::AllocatedImage| RenderTarget {
            image: image.image(),
            view: image.view(),
            extent: image.extent_2d(),
        };
        let (draw_target, depth_target) = (target(&draw_image), target(&depth_image));
        main_deletion.push(GpuResource::Image(draw_image));
        main_deletion.push(GpuResource::Image(depth_image));

        let scene_layout = {
            let mut builder = DescriptorLayoutBuilder::new();
            builder.add_binding(0, vk::DescriptorType::UNIFORM_BUFFER);
            builder.build(
                device.clone(),
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                vk::DescriptorSetLayoutCreateFlags::empty(),
            )?
        };

        let shader_dir = config.assets.shader_dir.as_path();
        let background = BackgroundEffects::new(
            device.clone(),
            shader_dir,
            draw_target.view,
            renderer.background,
        )?;
        let defaults = DefaultResources::new(&upload)?;

        let mut pipelines = match MetallicRoughness::new(
            device.clone(),
            shader_dir,
            scene_layout.handle(),
            DRAW_IMAGE_FORMAT,
            DEPTH_IMAGE_FORMAT,
        ) {
            Ok(pipelines) => Some(pipelines),
            Err(e) => {
                warn!("Mesh pipelines unavailable, geometry disabled: {}", e);
                None
            }
        };

        let scene = match (&config.assets.scene, pipelines.as_mut()) {
            (Some(path), Some(pipelines)) => Some(Self::load_scene(
                &upload, pipelines, &defaults, path,
            )?),
            (Some(path), None) => {
                warn!("Not loading {}: no mesh pipelines", path.display());
                None
            }
            (None, _) => None,
        };

        let camera_config = &config.camera;
        let camera = Camera::new(Vec3::from_array(camera_config.position));
        let camera_settings = CameraSettings {
            move_speed: camera_config.move_speed,
            fast_multiplier: camera_config.fast_multiplier,
            look_sensitivity: camera_config.look_sensitivity,
        };

        info!(
            "Engine initialized: {} swapchain images, draw image {}x{}",
            swapchain.image_count(),
            draw_target.extent.width,
            draw_target.extent.height
        );

        Ok(Self {
            scene,
            pipelines,
            _defaults: defaults,
            background,
            scene_layout,
            frames,
            upload,
            main_deletion,
            swapchain,
            surface,
            device,
            _instance: instance,
            draw_image: draw_target,
            depth_image: depth_target,
            draw_ctx: DrawContext::new(),
            scene_data: GpuSceneData::new(Mat4::IDENTITY, Mat4::IDENTITY),
            camera,
            camera_settings,
            window_extent: window.extent(),
            vsync: renderer.vsync,
            render_scale: renderer.clamped_render_scale(),
            resize_requested: false,
            stats: EngineStats::default(),
            frame_timer: Timer::new(),
            stats_timer: Timer::new(),
        })
    }

    fn load_scene(
        upload: &UploadContext,
        pipelines: &mut MetallicRoughness,
        defaults: &DefaultResources,
        path: &Path,
    ) -> Result<LoadedScene> {
        info!("Loading scene {}", path.display());
        let scene = LoadedScene::load(upload, pipelines, defaults, path)
            .inspect_err(|e| error!("Failed to load {}: {}", path.display(), e))?;
        debug!(
            "Scene '{}' uses {} material descriptor pool(s)",
            scene.name,
            scene.material_pools()
        );
        Ok(scene)
    }

    #[inline]
    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    #[inline]
    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    #[inline]
    pub fn frame_number(&self) -> u64 {
        self.frames.frame_number()
    }

    /// Records the new window size; the swapchain is rebuilt at the start
    /// of the next drawn frame.
    pub fn request_resize(&mut self, extent: vk::Extent2D) {
        self.window_extent = extent;
        self.resize_requested = true;
    }

    fn current_draw_extent(&self) -> vk::Extent2D {
        draw_extent(
            self.swapchain.extent(),
            self.draw_image.extent,
            self.render_scale,
        )
    }

    /// Moves the camera, refreshes scene data and rebuilds the draw list.
    pub fn update_scene(&mut self, input: &InputState, dt: f32) {
        let timer = Timer::new();

        if let Some(kind) = background_shortcut(input) {
            if !self.background.select(kind) {
                warn!("{:?} background is not loaded", kind);
            }
        }

        self.camera
            .update(&camera_input(input), &self.camera_settings, dt);

        let extent = self.current_draw_extent();
        let aspect = extent.width as f32 / extent.height as f32;
        self.scene_data = GpuSceneData::new(
            self.camera.view_matrix(),
            self.camera.projection_matrix(aspect),
        );

        self.draw_ctx.clear();
        if let Some(scene) = &self.scene {
            scene.draw(&Mat4::IDENTITY, &mut self.draw_ctx);
        }

        self.stats.scene_update_ms = timer.elapsed_ms();
    }

    fn recreate_swapchain(&mut self) -> RhiResult<()> {
        self.device.wait_idle()?;
        self.swapchain.recreate(
            self.surface.loader(),
            self.surface.handle(),
            self.window_extent,
            self.vsync,
        )?;
        self.resize_requested = false;
        info!(
            "Swapchain recreated at {}x{}",
            self.swapchain.extent().width,
            self.swapchain.extent().height
        );
        Ok(())
    }

    /// Allocates this frame's scene-data buffer and set. The buffer is
    /// freed when the slot is next reused.
    fn write_scene_data(&mut self) -> RhiResult<vk::DescriptorSet> {
        let buffer = self.upload.create_buffer(
            GpuSceneData::SIZE as vk::DeviceSize,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            MemoryUsage::CpuToGpu,
            "scene data",
        )?;
        buffer.write_pod(&self.scene_data)?;

        let set = self
            .frames
            .current_mut()
            .descriptors()
            .allocate(self.scene_layout.handle())?;

        let mut writer = DescriptorWriter::new();
        writer.write_buffer(
            0,
            buffer.handle(),
            GpuSceneData::SIZE as vk::DeviceSize,
            0,
            vk::DescriptorType::UNIFORM_BUFFER,
        );
        writer.update_set(self.device.as_ref(), set);

        self.frames.defer(GpuResource::Buffer(buffer));
        Ok(set)
    }

    /// Renders and presents one frame.
    ///
    /// Does nothing while the window is minimized. An out-of-date swapchain
    /// abandons the frame and schedules a rebuild.
    ///
    /// # Errors
    ///
    /// Fence timeouts and any other Vulkan failure are fatal.
    pub fn draw(&mut self) -> Result<()> {
        if self.window_extent.width == 0 || self.window_extent.height == 0 {
            return Ok(());
        }
        if self.resize_requested {
            self.recreate_swapchain()?;
        }

        self.frames.begin_frame()?;

        let acquire_semaphore = self.frames.current().swapchain_semaphore().handle();
        let image_index = match self
            .swapchain
            .acquire_next_image(acquire_semaphore, FRAME_FENCE_TIMEOUT_NS)?
        {
            AcquireOutcome::Ready { index, suboptimal } => {
                if suboptimal {
                    self.resize_requested = true;
                }
                index
            }
            AcquireOutcome::OutOfDate => {
                warn!("Swapchain out of date on acquire, skipping frame");
                self.resize_requested = true;
                return Ok(());
            }
        };

        self.frames.start_recording()?;
        let scene_set = self.write_scene_data()?;
        let extent = self.current_draw_extent();

        let frame = self.frames.current();
        let cmd = frame.command_buffer();
        cmd.reset()?;
        cmd.begin()?;

        transition_image(
            cmd,
            self.draw_image.image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::GENERAL,
        );
        self.background.record(cmd, extent);

        transition_image(
            cmd,
            self.draw_image.image,
            vk::ImageLayout::GENERAL,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        );
        transition_image(
            cmd,
            self.depth_image.image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
        );

        let draw_timer = Timer::new();
        let rendering = RenderingInfoBundle::new(
            extent,
            color_attachment(
                self.draw_image.view,
                None,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            ),
            Some(depth_attachment(
                self.depth_image.view,
                vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
            )),
        );
        cmd.begin_rendering(&rendering.info());
        let draws = if self.pipelines.is_some() {
            let mut recorder = CommandRecorder::new(cmd, extent);
            record_draws(
                &mut recorder,
                &self.draw_ctx,
                &self.scene_data.view_proj,
                scene_set,
            )
        } else {
            DrawStats::default()
        };
        cmd.end_rendering();
        let mesh_draw_ms = draw_timer.elapsed_ms();

        let swapchain_image = self.swapchain.image(image_index);
        transition_image(
            cmd,
            self.draw_image.image,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        );
        transition_image(
            cmd,
            swapchain_image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        copy_image_to_image(
            cmd,
            self.draw_image.image,
            swapchain_image,
            extent,
            self.swapchain.extent(),
        );
        transition_image(
            cmd,
            swapchain_image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        );
        cmd.end()?;

        let command_infos = [cmd.submit_info()];
        let wait_infos = [frame
            .swapchain_semaphore()
            .submit_info(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)];
        let signal_infos = [frame
            .render_semaphore()
            .submit_info(vk::PipelineStageFlags2::ALL_GRAPHICS)];
        let submit = vk::SubmitInfo2::default()
            .wait_semaphore_infos(&wait_infos)
            .signal_semaphore_infos(&signal_infos)
            .command_buffer_infos(&command_infos);
        self.device
            .submit_graphics(&[submit], frame.render_fence().handle())?;

        let render_semaphore = frame.render_semaphore().handle();
        self.frames.submitted();

        if self
            .swapchain
            .present(self.device.present_queue(), image_index, render_semaphore)?
        {
            warn!("Swapchain out of date on present");
            self.resize_requested = true;
        }

        self.stats.record_draws(draws, mesh_draw_ms);
        self.stats.frame_time_ms = self.frame_timer.tick().as_secs_f32() * 1000.0;
        if self.stats_timer.elapsed().as_secs_f32() >= STATS_LOG_INTERVAL_SECS {
            self.stats_timer.reset();
            debug!("{:?}", self.stats);
        }

        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            error!("Failed to wait for device idle during engine drop: {}", e);
        }

        self.frames.flush_all();
        self.main_deletion.flush_resources();

        info!("Engine destroyed after {} frames", self.frames.frame_number());
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec2;

    use super::*;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn test_draw_extent_uses_smaller_image() {
        assert_eq!(
            draw_extent(extent(1920, 1080), extent(1700, 900), 1.0),
            extent(1700, 900)
        );
        assert_eq!(
            draw_extent(extent(800, 600), extent(1700, 900), 1.0),
            extent(800, 600)
        );
    }

    #[test]
    fn test_draw_extent_scales() {
        assert_eq!(
            draw_extent(extent(1700, 900), extent(1700, 900), 0.5),
            extent(850, 450)
        );
        assert_eq!(draw_extent(extent(1, 1), extent(1700, 900), 0.3), extent(1, 1));
    }

    #[test]
    fn test_camera_input_mapping() {
        let mut input = InputState::new();
        input.on_key_pressed(KeyCode::KeyW);
        input.on_key_pressed(KeyCode::KeyE);
        input.on_key_pressed(KeyCode::ShiftLeft);
        input.on_mouse_pressed(MouseButton::Right);
        input.on_cursor_moved(10.0, 10.0);
        input.on_cursor_moved(14.0, 7.0);

        let camera = camera_input(&input);
        assert!(camera.forward && camera.down && camera.fast && camera.look_active);
        assert!(!camera.back && !camera.left && !camera.right && !camera.up);
        assert_eq!(camera.mouse_delta, Vec2::new(4.0, -3.0));
    }

    #[test]
    fn test_camera_input_idle_without_right_button() {
        let mut input = InputState::new();
        input.on_key_pressed(KeyCode::KeyD);
        input.on_mouse_pressed(MouseButton::Left);

        let camera = camera_input(&input);
        assert!(camera.right);
        assert!(!camera.look_active);
    }

    #[test]
    fn test_background_shortcuts() {
        let mut input = InputState::new();
        assert_eq!(background_shortcut(&input), None);

        input.on_key_pressed(KeyCode::Digit1);
        assert_eq!(background_shortcut(&input), Some(BackgroundEffectKind::Gradient));

        input.begin_frame();
        assert_eq!(background_shortcut(&input), None, "held keys do not repeat");

        input.on_key_pressed(KeyCode::Digit2);
        assert_eq!(background_shortcut(&input), Some(BackgroundEffectKind::Sky));
    }

    #[test]
    fn test_stats_record_draws() {
        let mut stats = EngineStats::default();
        stats.record_draws(
            DrawStats {
                drawcall_count: 4,
                triangle_count: 100,
                pipeline_binds: 1,
                material_binds: 2,
                index_buffer_binds: 3,
                culled: 5,
            },
            0.25,
        );
        assert_eq!(stats.drawcall_count, 4);
        assert_eq!(stats.triangle_count, 100);
        assert_eq!(stats.index_buffer_binds, 3);
        assert_eq!(stats.mesh_draw_ms, 0.25);
    }
}
