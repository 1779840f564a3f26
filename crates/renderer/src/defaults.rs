//! Fallback textures and samplers created once at startup.

use std::sync::Arc;

use ash::vk;
use glam::Vec4;
use tracing::info;

use blackhole_resources::image_utils::{error_checkerboard, solid};
use blackhole_rhi::RhiResult;
use blackhole_rhi::image::AllocatedImage;
use blackhole_rhi::sampler::{Sampler, SamplerDesc};

use crate::upload::UploadContext;

/// Side length of the error checkerboard.
pub const ERROR_IMAGE_SIZE: u32 = 16;

/// Images and samplers shared by every loaded scene.
///
/// Scenes hold clones of these `Arc`s; the engine owns the last reference.
#[derive(Clone)]
pub struct DefaultResources {
    pub white: Arc<AllocatedImage>,
    pub grey: Arc<AllocatedImage>,
    pub black: Arc<AllocatedImage>,
    pub error_checkerboard: Arc<AllocatedImage>,
    pub nearest: Arc<Sampler>,
    pub linear: Arc<Sampler>,
}

impl DefaultResources {
    /// # Errors
    ///
    /// Returns an error if any image upload or sampler creation fails.
    pub fn new(upload: &UploadContext) -> RhiResult<Self> {
        let pixel = vk::Extent2D {
            width: 1,
            height: 1,
        };
        let solid_image = |color: Vec4, name: &str| -> RhiResult<Arc<AllocatedImage>> {
            upload
                .create_image_with_data(
                    &solid(color),
                    pixel,
                    vk::Format::R8G8B8A8_UNORM,
                    vk::ImageUsageFlags::SAMPLED,
                    false,
                    name,
                )
                .map(Arc::new)
        };

        let white = solid_image(Vec4::ONE, "default white")?;
        let grey = solid_image(Vec4::new(0.66, 0.66, 0.66, 1.0), "default grey")?;
        let black = solid_image(Vec4::new(0.0, 0.0, 0.0, 1.0), "default black")?;

        let error_checkerboard = Arc::new(upload.create_image_with_data(
            &error_checkerboard(),
            vk::Extent2D {
                width: ERROR_IMAGE_SIZE,
                height: ERROR_IMAGE_SIZE,
            },
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageUsageFlags::SAMPLED,
            false,
            "error checkerboard",
        )?);

        let device = upload.device();
        let nearest = Arc::new(Sampler::new(device.clone(), SamplerDesc::NEAREST)?);
        let linear = Arc::new(Sampler::new(device.clone(), SamplerDesc::LINEAR)?);

        info!("Default textures and samplers created");

        Ok(Self {
            white,
            grey,
            black,
            error_checkerboard,
            nearest,
            linear,
        })
    }
}
