//! Swapchain management.
//!
//! The renderer never draws straight into swapchain images: it blits the
//! draw image into them, so images are created with `TRANSFER_DST` usage
//! and a linear (`UNORM`) format.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Surface capabilities, formats and present modes for one GPU.
#[derive(Debug, Clone)]
pub struct SwapchainSupportDetails {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    /// Queries surface support.
    ///
    /// # Errors
    ///
    /// Returns an error if any surface query fails.
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> RhiResult<Self> {
        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?
        };
        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)?
        };
        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface)?
        };

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Outcome of acquiring a swapchain image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// Image ready; `suboptimal` means the swapchain should be recreated soon.
    Ready { index: u32, suboptimal: bool },
    /// The swapchain no longer matches the surface and must be recreated.
    OutOfDate,
}

/// Wrapper around `VkSwapchainKHR`, its images and views.
pub struct Swapchain {
    device: Arc<Device>,
    swapchain_loader: ash::khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::Format,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
}

impl Swapchain {
    /// Creates a swapchain for `surface`.
    ///
    /// # Arguments
    ///
    /// * `instance` - Instance the device was created from
    /// * `device` - Logical device
    /// * `surface_loader` - Surface extension loader
    /// * `surface` - Target surface
    /// * `extent` - Requested size, used when the surface does not dictate one
    /// * `vsync` - FIFO when true; mailbox or immediate when available otherwise
    ///
    /// # Errors
    ///
    /// Returns an error if the surface cannot support a swapchain or creation
    /// fails.
    pub fn new(
        instance: &ash::Instance,
        device: Arc<Device>,
        surface_loader: &ash::khr::surface::Instance,
        surface: vk::SurfaceKHR,
        extent: vk::Extent2D,
        vsync: bool,
    ) -> RhiResult<Self> {
        let swapchain_loader = ash::khr::swapchain::Device::new(instance, device.handle());
        let (swapchain, images, image_views, format, extent, present_mode) = Self::create_raw(
            &device,
            &swapchain_loader,
            surface_loader,
            surface,
            extent,
            vsync,
            vk::SwapchainKHR::null(),
        )?;

        Ok(Self {
            device,
            swapchain_loader,
            swapchain,
            images,
            image_views,
            format,
            extent,
            present_mode,
        })
    }

    #[allow(clippy::type_complexity)]
    fn create_raw(
        device: &Device,
        swapchain_loader: &ash::khr::swapchain::Device,
        surface_loader: &ash::khr::surface::Instance,
        surface: vk::SurfaceKHR,
        requested: vk::Extent2D,
        vsync: bool,
        old_swapchain: vk::SwapchainKHR,
    ) -> RhiResult<(
        vk::SwapchainKHR,
        Vec<vk::Image>,
        Vec<vk::ImageView>,
        vk::Format,
        vk::Extent2D,
        vk::PresentModeKHR,
    )> {
        let support =
            SwapchainSupportDetails::query(device.physical_device(), surface, surface_loader)?;
        if !support.is_adequate() {
            return Err(RhiError::SwapchainError(
                "Inadequate swapchain support (no formats or present modes)".to_string(),
            ));
        }

        let surface_format = choose_surface_format(&support.formats);
        let present_mode = choose_present_mode(&support.present_modes, vsync);
        let extent = choose_extent(&support.capabilities, requested);
        let image_count = determine_image_count(&support.capabilities);

        let graphics_family = device.queue_families().graphics()?;
        let present_family = device.queue_families().present()?;
        let queue_family_indices = [graphics_family, present_family];
        let (sharing_mode, indices): (vk::SharingMode, &[u32]) = if graphics_family != present_family
        {
            (vk::SharingMode::CONCURRENT, &queue_family_indices)
        } else {
            (vk::SharingMode::EXCLUSIVE, &[])
        };

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(indices)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None)? };
        let images = unsafe { swapchain_loader.get_swapchain_images(swapchain)? };
        let image_views = match create_image_views(device, &images, surface_format.format) {
            Ok(views) => views,
            Err(err) => {
                unsafe { swapchain_loader.destroy_swapchain(swapchain, None) };
                return Err(err);
            }
        };

        info!(
            "Swapchain created: {}x{}, {:?}, {:?}, {} images",
            extent.width,
            extent.height,
            surface_format.format,
            present_mode,
            images.len()
        );

        Ok((
            swapchain,
            images,
            image_views,
            surface_format.format,
            extent,
            present_mode,
        ))
    }

    /// Rebuilds the swapchain for a new surface size.
    ///
    /// The caller must make sure no submitted work still references the old
    /// images (the engine waits for device idle first).
    ///
    /// # Errors
    ///
    /// Returns an error if the new swapchain cannot be created.
    pub fn recreate(
        &mut self,
        surface_loader: &ash::khr::surface::Instance,
        surface: vk::SurfaceKHR,
        extent: vk::Extent2D,
        vsync: bool,
    ) -> RhiResult<()> {
        self.destroy_image_views();

        let old_swapchain = self.swapchain;
        let result = Self::create_raw(
            &self.device,
            &self.swapchain_loader,
            surface_loader,
            surface,
            extent,
            vsync,
            old_swapchain,
        );

        unsafe { self.swapchain_loader.destroy_swapchain(old_swapchain, None) };
        self.swapchain = vk::SwapchainKHR::null();
        self.images.clear();

        let (swapchain, images, image_views, format, extent, present_mode) = result?;
        self.swapchain = swapchain;
        self.images = images;
        self.image_views = image_views;
        self.format = format;
        self.extent = extent;
        self.present_mode = present_mode;
        Ok(())
    }

    /// Acquires the next image, signaling `semaphore` when it is ready.
    ///
    /// # Errors
    ///
    /// Out-of-date is reported as [`AcquireOutcome::OutOfDate`]; any other
    /// failure is returned as an error.
    pub fn acquire_next_image(
        &self,
        semaphore: vk::Semaphore,
        timeout_ns: u64,
    ) -> RhiResult<AcquireOutcome> {
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                timeout_ns,
                semaphore,
                vk::Fence::null(),
            )
        };
        match result {
            Ok((index, suboptimal)) => Ok(AcquireOutcome::Ready { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(err) => Err(err.into()),
        }
    }

    /// Presents `image_index` after `wait_semaphore` signals.
    ///
    /// Returns `true` when the swapchain needs recreating (out of date or
    /// suboptimal).
    ///
    /// # Errors
    ///
    /// Returns an error for any present failure other than out-of-date.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> RhiResult<bool> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [wait_semaphore];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { self.swapchain_loader.queue_present(queue, &present_info) } {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(err) => Err(err.into()),
        }
    }

    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    #[inline]
    pub fn image(&self, index: u32) -> vk::Image {
        self.images[index as usize]
    }

    #[inline]
    pub fn image_view(&self, index: u32) -> vk::ImageView {
        self.image_views[index as usize]
    }

    #[inline]
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    fn destroy_image_views(&mut self) {
        for &image_view in &self.image_views {
            unsafe {
                self.device.handle().destroy_image_view(image_view, None);
            }
        }
        self.image_views.clear();
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.destroy_image_views();
        if self.swapchain != vk::SwapchainKHR::null() {
            unsafe {
                self.swapchain_loader
                    .destroy_swapchain(self.swapchain, None);
            }
            info!(
                "Swapchain destroyed (was {}x{})",
                self.extent.width, self.extent.height
            );
        }
    }
}

fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    // The draw image is blitted in linear space, so prefer UNORM.
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_UNORM
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .unwrap_or_else(|| {
            warn!("Using first available surface format: {:?}", formats[0].format);
            formats[0]
        })
}

fn choose_present_mode(present_modes: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if !vsync {
        for mode in [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE] {
            if present_modes.contains(&mode) {
                debug!("Selected {:?} present mode", mode);
                return mode;
            }
        }
    }
    // Always available.
    vk::PresentModeKHR::FIFO
}

fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, requested: vk::Extent2D) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: requested.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: requested.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        preferred.min(capabilities.max_image_count)
    } else {
        preferred
    }
}

fn create_image_views(
    device: &Device,
    images: &[vk::Image],
    format: vk::Format,
) -> RhiResult<Vec<vk::ImageView>> {
    let mut image_views = Vec::with_capacity(images.len());

    for &image in images {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .level_count(1)
                    .layer_count(1),
            );

        match unsafe { device.handle().create_image_view(&create_info, None) } {
            Ok(view) => image_views.push(view),
            Err(err) => {
                for view in image_views {
                    unsafe { device.handle().destroy_image_view(view, None) };
                }
                return Err(err.into());
            }
        }
    }

    Ok(image_views)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface_format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    #[test]
    fn test_choose_surface_format_prefers_unorm() {
        let formats = vec![
            surface_format(vk::Format::B8G8R8A8_SRGB),
            surface_format(vk::Format::B8G8R8A8_UNORM),
        ];
        assert_eq!(
            choose_surface_format(&formats).format,
            vk::Format::B8G8R8A8_UNORM
        );
    }

    #[test]
    fn test_choose_surface_format_fallback() {
        let formats = vec![surface_format(vk::Format::R8G8B8A8_UNORM)];
        assert_eq!(
            choose_surface_format(&formats).format,
            vk::Format::R8G8B8A8_UNORM
        );
    }

    #[test]
    fn test_vsync_forces_fifo() {
        let modes = [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO];
        assert_eq!(choose_present_mode(&modes, true), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_no_vsync_prefers_mailbox_then_immediate() {
        let modes = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
        ];
        assert_eq!(choose_present_mode(&modes, false), vk::PresentModeKHR::MAILBOX);

        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(
            choose_present_mode(&modes, false),
            vk::PresentModeKHR::IMMEDIATE
        );

        let modes = [vk::PresentModeKHR::FIFO];
        assert_eq!(choose_present_mode(&modes, false), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_choose_extent_uses_current() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            ..Default::default()
        };
        let extent = choose_extent(
            &capabilities,
            vk::Extent2D {
                width: 800,
                height: 600,
            },
        );
        assert_eq!((extent.width, extent.height), (1920, 1080));
    }

    #[test]
    fn test_choose_extent_clamps_to_limits() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 100,
                height: 100,
            },
            max_image_extent: vk::Extent2D {
                width: 2000,
                height: 2000,
            },
            ..Default::default()
        };

        let big = choose_extent(
            &capabilities,
            vk::Extent2D {
                width: 3000,
                height: 50,
            },
        );
        assert_eq!((big.width, big.height), (2000, 100));
    }

    #[test]
    fn test_determine_image_count() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 2,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&capabilities), 2);

        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&capabilities), 3);
    }
}
