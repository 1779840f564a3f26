//! GPU images, layout transitions and mip generation.
//!
//! Every transition goes through [`transition_image`], a deliberately
//! coarse synchronization2 barrier (all commands to all commands). It is
//! correct for every layout pair the renderer uses and keeps call sites
//! free of stage/access bookkeeping.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::debug;

use crate::buffer::{MemoryUsage, report_free};
use crate::command::CommandBuffer;
use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Number of mip levels for a full chain down to 1×1:
/// `floor(log2(max(width, height))) + 1`.
pub fn mip_level_count(extent: vk::Extent2D) -> u32 {
    let largest = extent.width.max(extent.height).max(1);
    u32::BITS - largest.leading_zeros()
}

/// Extent of every level in the chain, level 0 first.
///
/// Each level floor-halves the previous one; an axis that reaches 1 stays
/// at 1 so non-square images keep valid extents.
pub fn mip_chain(extent: vk::Extent2D) -> Vec<vk::Extent2D> {
    let levels = mip_level_count(extent);
    let mut current = extent;
    let mut chain = Vec::with_capacity(levels as usize);
    for _ in 0..levels {
        chain.push(current);
        current = vk::Extent2D {
            width: (current.width / 2).max(1),
            height: (current.height / 2).max(1),
        };
    }
    chain
}

/// Subresource range covering every mip level and layer for `aspect`.
pub fn image_subresource_range(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(aspect)
        .base_mip_level(0)
        .level_count(vk::REMAINING_MIP_LEVELS)
        .base_array_layer(0)
        .layer_count(vk::REMAINING_ARRAY_LAYERS)
}

fn aspect_for_layout(layout: vk::ImageLayout) -> vk::ImageAspectFlags {
    if layout == vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

fn aspect_for_format(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D32_SFLOAT | vk::Format::D16_UNORM => vk::ImageAspectFlags::DEPTH,
        _ => vk::ImageAspectFlags::COLOR,
    }
}

fn layout_barrier(
    image: vk::Image,
    current: vk::ImageLayout,
    new: vk::ImageLayout,
    range: vk::ImageSubresourceRange,
) -> vk::ImageMemoryBarrier2<'static> {
    vk::ImageMemoryBarrier2::default()
        .src_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
        .src_access_mask(vk::AccessFlags2::MEMORY_WRITE)
        .dst_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
        .dst_access_mask(vk::AccessFlags2::MEMORY_WRITE | vk::AccessFlags2::MEMORY_READ)
        .old_layout(current)
        .new_layout(new)
        .subresource_range(range)
        .image(image)
}

/// Records a layout transition of the whole image.
pub fn transition_image(
    cmd: &CommandBuffer,
    image: vk::Image,
    current: vk::ImageLayout,
    new: vk::ImageLayout,
) {
    let barrier = layout_barrier(
        image,
        current,
        new,
        image_subresource_range(aspect_for_layout(new)),
    );
    let barriers = [barrier];
    let dependency = vk::DependencyInfo::default().image_memory_barriers(&barriers);
    cmd.pipeline_barrier2(&dependency);
}

fn blit_region(
    src_level: u32,
    src_extent: vk::Extent2D,
    dst_level: u32,
    dst_extent: vk::Extent2D,
) -> vk::ImageBlit2<'static> {
    let corner = |extent: vk::Extent2D| vk::Offset3D {
        x: extent.width as i32,
        y: extent.height as i32,
        z: 1,
    };
    let layers = |level: u32| {
        vk::ImageSubresourceLayers::default()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .mip_level(level)
            .base_array_layer(0)
            .layer_count(1)
    };

    vk::ImageBlit2::default()
        .src_offsets([vk::Offset3D::default(), corner(src_extent)])
        .dst_offsets([vk::Offset3D::default(), corner(dst_extent)])
        .src_subresource(layers(src_level))
        .dst_subresource(layers(dst_level))
}

/// Blits `src` (in `TRANSFER_SRC_OPTIMAL`) onto `dst` (in
/// `TRANSFER_DST_OPTIMAL`) with linear filtering, scaling as needed.
pub fn copy_image_to_image(
    cmd: &CommandBuffer,
    src: vk::Image,
    dst: vk::Image,
    src_size: vk::Extent2D,
    dst_size: vk::Extent2D,
) {
    let regions = [blit_region(0, src_size, 0, dst_size)];
    let blit_info = vk::BlitImageInfo2::default()
        .src_image(src)
        .src_image_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
        .dst_image(dst)
        .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
        .filter(vk::Filter::LINEAR)
        .regions(&regions);
    cmd.blit_image2(&blit_info);
}

/// Fills mip levels 1.. of `image` from level 0.
///
/// Expects every level in `TRANSFER_DST_OPTIMAL`. Each level is moved to
/// `TRANSFER_SRC_OPTIMAL` and, unless it is the last, blitted at half size
/// into the next level. The whole chain ends in `SHADER_READ_ONLY_OPTIMAL`.
pub fn generate_mipmaps(cmd: &CommandBuffer, image: vk::Image, extent: vk::Extent2D) {
    let chain = mip_chain(extent);
    let level_count = chain.len() as u32;

    for (level, &level_extent) in chain.iter().enumerate() {
        let level = level as u32;
        let range = vk::ImageSubresourceRange::default()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .base_mip_level(level)
            .level_count(1)
            .base_array_layer(0)
            .layer_count(vk::REMAINING_ARRAY_LAYERS);
        let barriers = [layout_barrier(
            image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            range,
        )];
        cmd.pipeline_barrier2(&vk::DependencyInfo::default().image_memory_barriers(&barriers));

        if level + 1 < level_count {
            let regions = [blit_region(
                level,
                level_extent,
                level + 1,
                chain[level as usize + 1],
            )];
            let blit_info = vk::BlitImageInfo2::default()
                .src_image(image)
                .src_image_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
                .dst_image(image)
                .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .filter(vk::Filter::LINEAR)
                .regions(&regions);
            cmd.blit_image2(&blit_info);
        }
    }

    transition_image(
        cmd,
        image,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    );
}

/// A `VkImage`, its default view and memory, plus format metadata.
pub struct AllocatedImage {
    device: Arc<Device>,
    image: vk::Image,
    view: vk::ImageView,
    allocation: Option<Allocation>,
    extent: vk::Extent3D,
    format: vk::Format,
    mip_levels: u32,
}

impl AllocatedImage {
    /// Creates a 2D image in device-local memory with a view over all mips.
    ///
    /// # Arguments
    ///
    /// * `device` - Logical device
    /// * `extent` - Size of mip 0 (width and height must be non-zero)
    /// * `format` - Image format; depth formats get a depth-aspect view
    /// * `usage` - Vulkan image usage bits
    /// * `mipmapped` - Allocate the full chain of [`mip_level_count`] levels
    /// * `name` - Debug name recorded by the allocator
    ///
    /// # Note
    ///
    /// The image is left in `UNDEFINED` layout. Callers transition it before
    /// first use.
    ///
    /// # Errors
    ///
    /// Returns an error if image, allocation or view creation fails.
    pub fn new(
        device: Arc<Device>,
        extent: vk::Extent3D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        mipmapped: bool,
        name: &str,
    ) -> RhiResult<Self> {
        if extent.width == 0 || extent.height == 0 {
            return Err(RhiError::PipelineError(format!(
                "Image '{name}' must have non-zero extent"
            )));
        }

        let mip_levels = if mipmapped {
            mip_level_count(vk::Extent2D {
                width: extent.width,
                height: extent.height,
            })
        } else {
            1
        };

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(extent)
            .mip_levels(mip_levels)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { device.handle().create_image(&image_info, None)? };
        let requirements = unsafe { device.handle().get_image_memory_requirements(image) };

        let allocation = match device.lock_allocator().allocate(&AllocationCreateDesc {
            name,
            requirements,
            location: MemoryUsage::GpuOnly.memory_location(),
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        }) {
            Ok(allocation) => allocation,
            Err(err) => {
                unsafe { device.handle().destroy_image(image, None) };
                return Err(err.into());
            }
        };

        let mut this = Self {
            device,
            image,
            view: vk::ImageView::null(),
            allocation: Some(allocation),
            extent,
            format,
            mip_levels,
        };

        // From here on Drop cleans up whatever was created.
        if let Some(allocation) = this.allocation.as_ref() {
            unsafe {
                this.device.handle().bind_image_memory(
                    image,
                    allocation.memory(),
                    allocation.offset(),
                )?;
            }
        }

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(aspect_for_format(format))
                    .base_mip_level(0)
                    .level_count(mip_levels)
                    .base_array_layer(0)
                    .layer_count(1),
            );
        this.view = unsafe { this.device.handle().create_image_view(&view_info, None)? };

        debug!(
            "Created image '{}': {}x{} {:?}, {} mip level(s)",
            name, extent.width, extent.height, format, mip_levels
        );

        Ok(this)
    }

    #[inline]
    pub fn image(&self) -> vk::Image {
        self.image
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent3D {
        self.extent
    }

    #[inline]
    pub fn extent_2d(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.extent.width,
            height: self.extent.height,
        }
    }

    #[inline]
    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }
}

impl Drop for AllocatedImage {
    fn drop(&mut self) {
        unsafe {
            if self.view != vk::ImageView::null() {
                self.device.handle().destroy_image_view(self.view, None);
            }
            self.device.handle().destroy_image(self.image, None);
        }

        if let Some(allocation) = self.allocation.take() {
            report_free(self.device.lock_allocator().free(allocation), "image");
        }

        debug!(
            "Destroyed image: {}x{} {:?}",
            self.extent.width, self.extent.height, self.format
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn test_mip_level_count() {
        assert_eq!(mip_level_count(extent(1, 1)), 1);
        assert_eq!(mip_level_count(extent(2, 2)), 2);
        assert_eq!(mip_level_count(extent(512, 512)), 10);
        assert_eq!(mip_level_count(extent(513, 513)), 10);
        assert_eq!(mip_level_count(extent(1024, 16)), 11);
    }

    #[test]
    fn test_mip_chain_513_halves_to_one() {
        let chain = mip_chain(extent(513, 513));
        assert_eq!(chain.len(), 10);
        assert_eq!(chain[0], extent(513, 513));
        for pair in chain.windows(2) {
            assert_eq!(pair[1].width, pair[0].width / 2);
            assert_eq!(pair[1].height, pair[0].height / 2);
        }
        assert_eq!(*chain.last().unwrap(), extent(1, 1));
    }

    #[test]
    fn test_mip_chain_non_square_clamps_at_one() {
        let chain = mip_chain(extent(8, 2));
        assert_eq!(
            chain,
            vec![extent(8, 2), extent(4, 1), extent(2, 1), extent(1, 1)]
        );
    }

    #[test]
    fn test_aspect_selection() {
        assert_eq!(
            aspect_for_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            aspect_for_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
            vk::ImageAspectFlags::COLOR
        );
        assert_eq!(
            aspect_for_format(vk::Format::D32_SFLOAT),
            vk::ImageAspectFlags::DEPTH
        );
    }

    #[test]
    fn test_blit_region_corners() {
        let region = blit_region(2, extent(64, 32), 3, extent(32, 16));
        assert_eq!(region.src_offsets[1].x, 64);
        assert_eq!(region.dst_offsets[1].y, 16);
        assert_eq!(region.src_subresource.mip_level, 2);
        assert_eq!(region.dst_subresource.mip_level, 3);
    }

    #[test]
    fn test_full_subresource_range() {
        let range = image_subresource_range(vk::ImageAspectFlags::COLOR);
        assert_eq!(range.level_count, vk::REMAINING_MIP_LEVELS);
        assert_eq!(range.layer_count, vk::REMAINING_ARRAY_LAYERS);
    }
}
