//! GPU buffers backed by `gpu-allocator`.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Where a resource's memory should live.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryUsage {
    /// Device-local, not host visible. Mesh and texture storage.
    GpuOnly,
    /// Host-visible, preferably device-local. Per-frame uniforms.
    CpuToGpu,
    /// Host-visible staging memory for uploads.
    CpuOnly,
}

impl MemoryUsage {
    pub fn memory_location(self) -> MemoryLocation {
        match self {
            MemoryUsage::GpuOnly => MemoryLocation::GpuOnly,
            MemoryUsage::CpuToGpu | MemoryUsage::CpuOnly => MemoryLocation::CpuToGpu,
        }
    }

    #[inline]
    pub fn is_host_visible(self) -> bool {
        !matches!(self, MemoryUsage::GpuOnly)
    }
}

/// Logs a failed allocation free. Returns whether the free succeeded.
pub(crate) fn report_free(result: gpu_allocator::Result<()>, what: &str) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            error!("Failed to free {} allocation: {:?}", what, e);
            false
        }
    }
}

/// A `VkBuffer` plus its memory allocation.
///
/// Freed on drop. Callers must make sure the GPU is done with the buffer
/// first, either by deferring the drop through a deletion queue or by
/// waiting for device idle.
pub struct AllocatedBuffer {
    device: Arc<Device>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
    usage: MemoryUsage,
}

impl AllocatedBuffer {
    /// Creates a buffer and binds freshly allocated memory to it.
    ///
    /// # Arguments
    ///
    /// * `device` - Logical device
    /// * `size` - Size in bytes (must be non-zero)
    /// * `usage_flags` - Vulkan buffer usage bits
    /// * `memory` - Memory usage class
    /// * `name` - Debug name recorded by the allocator
    ///
    /// # Errors
    ///
    /// Returns an error if creation, allocation or binding fails.
    pub fn new(
        device: Arc<Device>,
        size: vk::DeviceSize,
        usage_flags: vk::BufferUsageFlags,
        memory: MemoryUsage,
        name: &str,
    ) -> RhiResult<Self> {
        if size == 0 {
            return Err(RhiError::PipelineError(format!(
                "Buffer '{name}' must have a non-zero size"
            )));
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage_flags)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.handle().create_buffer(&buffer_info, None)? };
        let requirements = unsafe { device.handle().get_buffer_memory_requirements(buffer) };

        let allocation = device.lock_allocator().allocate(&AllocationCreateDesc {
            name,
            requirements,
            location: memory.memory_location(),
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(err) => {
                unsafe { device.handle().destroy_buffer(buffer, None) };
                return Err(err.into());
            }
        };

        if let Err(err) = unsafe {
            device
                .handle()
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        } {
            report_free(device.lock_allocator().free(allocation), name);
            unsafe { device.handle().destroy_buffer(buffer, None) };
            return Err(err.into());
        }

        debug!("Created buffer '{}': {} bytes ({:?})", name, size, memory);

        Ok(Self {
            device,
            buffer,
            allocation: Some(allocation),
            size,
            usage: memory,
        })
    }

    /// Copies `data` into host-visible memory at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::NotHostVisible`] for GPU-only memory and
    /// [`RhiError::PipelineError`] if the write would run past the end.
    pub fn write(&self, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        if data.is_empty() {
            return Ok(());
        }

        let end = offset + data.len() as vk::DeviceSize;
        if end > self.size {
            return Err(RhiError::PipelineError(format!(
                "Write exceeds buffer size: offset {} + {} > {}",
                offset,
                data.len(),
                self.size
            )));
        }

        let mapped = self
            .allocation
            .as_ref()
            .and_then(|allocation| allocation.mapped_ptr())
            .ok_or_else(|| RhiError::NotHostVisible(format!("{:?} buffer", self.usage)))?;

        unsafe {
            let dst = mapped.as_ptr().cast::<u8>().add(offset as usize);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        }

        Ok(())
    }

    /// Writes a POD value at offset 0.
    ///
    /// # Errors
    ///
    /// See [`AllocatedBuffer::write`].
    pub fn write_pod<T: bytemuck::Pod>(&self, value: &T) -> RhiResult<()> {
        self.write(0, bytemuck::bytes_of(value))
    }

    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Shader-visible address; the buffer must have been created with
    /// `SHADER_DEVICE_ADDRESS` usage.
    pub fn device_address(&self) -> vk::DeviceAddress {
        self.device.buffer_device_address(self.buffer)
    }
}

impl Drop for AllocatedBuffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            report_free(self.device.lock_allocator().free(allocation), "buffer");
        }

        unsafe {
            self.device.handle().destroy_buffer(self.buffer, None);
        }

        debug!("Destroyed buffer ({} bytes)", self.size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_free() {
        assert!(report_free(Ok(()), "buffer"));
        assert!(!report_free(
            Err(gpu_allocator::AllocationError::OutOfMemory),
            "staging"
        ));
    }

    #[test]
    fn test_memory_usage_location() {
        assert_eq!(MemoryUsage::GpuOnly.memory_location(), MemoryLocation::GpuOnly);
        assert_eq!(MemoryUsage::CpuToGpu.memory_location(), MemoryLocation::CpuToGpu);
        assert_eq!(MemoryUsage::CpuOnly.memory_location(), MemoryLocation::CpuToGpu);
    }

    #[test]
    fn test_host_visibility() {
        assert!(!MemoryUsage::GpuOnly.is_host_visible());
        assert!(MemoryUsage::CpuToGpu.is_host_visible());
        assert!(MemoryUsage::CpuOnly.is_host_visible());
    }

    #[test]
    fn test_allocated_buffer_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<AllocatedBuffer>();
    }
}
