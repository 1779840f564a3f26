//! Load-time uploads of meshes and textures.
//!
//! Every upload goes through a host-visible staging buffer and a blocking
//! [`ImmediateSubmitter`] submission, then the staging buffer is freed. Only
//! one upload is in flight at a time; this path is for asset loading, never
//! for per-frame data.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use blackhole_rhi::buffer::{AllocatedBuffer, MemoryUsage};
use blackhole_rhi::device::Device;
use blackhole_rhi::image::{AllocatedImage, generate_mipmaps, transition_image};
use blackhole_rhi::immediate::ImmediateSubmitter;
use blackhole_rhi::vertex::Vertex;
use blackhole_rhi::{RhiError, RhiResult};

/// Device-local index and vertex buffers of one mesh.
pub struct GpuMeshBuffers {
    pub index_buffer: AllocatedBuffer,
    pub vertex_buffer: AllocatedBuffer,
    pub vertex_buffer_address: vk::DeviceAddress,
}

/// Byte ranges of a mesh inside its staging buffer: vertices first, then
/// indices.
fn mesh_copy_regions(vertex_bytes: u64, index_bytes: u64) -> (vk::BufferCopy, vk::BufferCopy) {
    let vertices = vk::BufferCopy {
        src_offset: 0,
        dst_offset: 0,
        size: vertex_bytes,
    };
    let indices = vk::BufferCopy {
        src_offset: vertex_bytes,
        dst_offset: 0,
        size: index_bytes,
    };
    (vertices, indices)
}

/// Rejects meshes with no vertices or no indices.
fn validate_mesh(index_count: usize, vertex_count: usize, name: &str) -> RhiResult<()> {
    if index_count == 0 || vertex_count == 0 {
        return Err(RhiError::InvalidUpload(format!(
            "Mesh '{}' has {} vertices and {} indices",
            name, vertex_count, index_count
        )));
    }
    Ok(())
}

/// Size in bytes of tightly packed RGBA8 pixels covering `extent`.
pub fn rgba8_size(extent: vk::Extent2D) -> usize {
    extent.width as usize * extent.height as usize * 4
}

fn image_copy_region(extent: vk::Extent3D) -> vk::BufferImageCopy {
    vk::BufferImageCopy::default()
        .buffer_offset(0)
        .buffer_row_length(0)
        .buffer_image_height(0)
        .image_subresource(
            vk::ImageSubresourceLayers::default()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .mip_level(0)
                .base_array_layer(0)
                .layer_count(1),
        )
        .image_extent(extent)
}

/// Creates GPU resources and fills them through the immediate queue.
pub struct UploadContext {
    device: Arc<Device>,
    immediate: ImmediateSubmitter,
}

impl UploadContext {
    /// # Errors
    ///
    /// Returns an error if the immediate submitter cannot be created.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let immediate = ImmediateSubmitter::new(device.clone())?;
        Ok(Self { device, immediate })
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    #[inline]
    pub fn immediate(&self) -> &ImmediateSubmitter {
        &self.immediate
    }

    /// Allocates a buffer with the given usage class.
    ///
    /// # Errors
    ///
    /// Returns an error if creation or allocation fails.
    pub fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        memory: MemoryUsage,
        name: &str,
    ) -> RhiResult<AllocatedBuffer> {
        AllocatedBuffer::new(self.device.clone(), size, usage, memory, name)
    }

    /// Uploads a mesh into device-local buffers.
    ///
    /// # Arguments
    ///
    /// * `indices` - Triangle list indices into `vertices`
    /// * `vertices` - Vertex data, read by shaders through its device address
    /// * `name` - Debug name prefix for the created buffers
    ///
    /// # Note
    ///
    /// Blocks until the copy has finished on the GPU. The staging buffer is
    /// freed before returning.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidUpload`] if either slice is empty, or an
    /// error if allocation or the immediate submission fails.
    pub fn upload_mesh(
        &self,
        indices: &[u32],
        vertices: &[Vertex],
        name: &str,
    ) -> RhiResult<GpuMeshBuffers> {
        validate_mesh(indices.len(), vertices.len(), name)?;

        let vertex_bytes: &[u8] = bytemuck::cast_slice(vertices);
        let index_bytes: &[u8] = bytemuck::cast_slice(indices);

        let vertex_buffer = self.create_buffer(
            vertex_bytes.len() as vk::DeviceSize,
            vk::BufferUsageFlags::STORAGE_BUFFER
                | vk::BufferUsageFlags::TRANSFER_DST
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryUsage::GpuOnly,
            &format!("{name} vertices"),
        )?;
        let vertex_buffer_address = vertex_buffer.device_address();

        let index_buffer = self.create_buffer(
            index_bytes.len() as vk::DeviceSize,
            vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryUsage::GpuOnly,
            &format!("{name} indices"),
        )?;

        let staging = self.create_buffer(
            (vertex_bytes.len() + index_bytes.len()) as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryUsage::CpuOnly,
            &format!("{name} staging"),
        )?;
        staging.write(0, vertex_bytes)?;
        staging.write(vertex_bytes.len() as vk::DeviceSize, index_bytes)?;

        let (vertex_region, index_region) =
            mesh_copy_regions(vertex_bytes.len() as u64, index_bytes.len() as u64);
        self.immediate.submit(|cmd| {
            cmd.copy_buffer(staging.handle(), vertex_buffer.handle(), &[vertex_region]);
            cmd.copy_buffer(staging.handle(), index_buffer.handle(), &[index_region]);
        })?;

        debug!(
            "Uploaded mesh '{}': {} vertices, {} indices",
            name,
            vertices.len(),
            indices.len()
        );

        Ok(GpuMeshBuffers {
            index_buffer,
            vertex_buffer,
            vertex_buffer_address,
        })
    }

    /// Creates an empty device-local image.
    ///
    /// # Errors
    ///
    /// Returns an error if image, memory or view creation fails.
    pub fn create_image(
        &self,
        extent: vk::Extent3D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        mipmapped: bool,
        name: &str,
    ) -> RhiResult<AllocatedImage> {
        AllocatedImage::new(self.device.clone(), extent, format, usage, mipmapped, name)
    }

    /// Creates a sampled image from tightly packed RGBA8 pixels.
    ///
    /// # Arguments
    ///
    /// * `pixels` - RGBA8 rows, `extent.width * 4` bytes each, no padding
    /// * `extent` - Size of mip 0
    /// * `format` - Image format, e.g. `R8G8B8A8_UNORM` or `R8G8B8A8_SRGB`
    /// * `usage` - Extra usage bits; transfer source and destination are added
    /// * `mipmapped` - Whether to allocate and generate the full mip chain
    /// * `name` - Debug name
    ///
    /// # Note
    ///
    /// The image goes `UNDEFINED -> TRANSFER_DST`, receives the pixels in
    /// mip 0, then either has its mip chain generated or is moved straight
    /// to `SHADER_READ_ONLY_OPTIMAL`. The call blocks until that is done.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidUpload`] if `pixels` does not match the
    /// extent, or any creation or submission error.
    pub fn create_image_with_data(
        &self,
        pixels: &[u8],
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        mipmapped: bool,
        name: &str,
    ) -> RhiResult<AllocatedImage> {
        let expected = rgba8_size(extent);
        if pixels.len() != expected {
            return Err(RhiError::InvalidUpload(format!(
                "Image '{}' has {} bytes of pixels, expected {} for {}x{}",
                name,
                pixels.len(),
                expected,
                extent.width,
                extent.height
            )));
        }

        let staging = self.create_buffer(
            pixels.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryUsage::CpuOnly,
            &format!("{name} staging"),
        )?;
        staging.write(0, pixels)?;

        let extent_3d = vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        };
        let image = self.create_image(
            extent_3d,
            format,
            usage | vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::TRANSFER_SRC,
            mipmapped,
            name,
        )?;

        self.immediate.submit(|cmd| {
            transition_image(
                cmd,
                image.image(),
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            );
            cmd.copy_buffer_to_image(
                staging.handle(),
                image.image(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[image_copy_region(extent_3d)],
            );

            if mipmapped {
                generate_mipmaps(cmd, image.image(), extent);
            } else {
                transition_image(
                    cmd,
                    image.image(),
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                );
            }
        })?;

        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mesh_copy_regions() {
        let vertex_bytes = (3 * std::mem::size_of::<Vertex>()) as u64;
        let (vertices, indices) = mesh_copy_regions(vertex_bytes, 12);

        assert_eq!((vertices.src_offset, vertices.size), (0, 144));
        assert_eq!((indices.src_offset, indices.size), (144, 12));
        assert_eq!(indices.dst_offset, 0);
    }

    #[test]
    fn test_empty_mesh_is_rejected() {
        assert!(matches!(
            validate_mesh(0, 3, "no indices"),
            Err(RhiError::InvalidUpload(_))
        ));
        assert!(matches!(
            validate_mesh(3, 0, "no vertices"),
            Err(RhiError::InvalidUpload(_))
        ));
        assert!(validate_mesh(3, 3, "triangle").is_ok());
    }

    #[test]
    fn test_rgba8_size() {
        let extent = vk::Extent2D {
            width: 513,
            height: 2,
        };
        assert_eq!(rgba8_size(extent), 513 * 2 * 4);
    }

    #[test]
    fn test_image_copy_targets_mip_zero() {
        let region = image_copy_region(vk::Extent3D {
            width: 16,
            height: 8,
            depth: 1,
        });
        assert_eq!(region.image_subresource.mip_level, 0);
        assert_eq!(region.image_extent.width, 16);
        assert_eq!(region.buffer_row_length, 0);
    }
}
