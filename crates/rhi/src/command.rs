//! Command pool and command buffer management.
//!
//! - [`CommandPool`] owns a `VkCommandPool` whose buffers can be reset
//!   individually.
//! - [`CommandBuffer`] wraps a `VkCommandBuffer` with the recording calls
//!   the renderer uses. It does not own the handle; the pool frees it.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use blackhole_rhi::device::Device;
//! use blackhole_rhi::command::{CommandBuffer, CommandPool};
//!
//! # fn example(device: Arc<Device>) -> Result<(), blackhole_rhi::RhiError> {
//! let pool = CommandPool::new(device.clone(), device.graphics_family())?;
//! let cmd = CommandBuffer::new(device.clone(), &pool)?;
//!
//! cmd.begin()?;
//! // ... record commands ...
//! cmd.end()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;

/// Vulkan command pool wrapper.
///
/// Command pools are externally synchronized: each frame slot and the
/// immediate submitter own their own pool.
pub struct CommandPool {
    device: Arc<Device>,
    pool: vk::CommandPool,
}

impl CommandPool {
    /// Creates a pool whose command buffers can be reset individually.
    ///
    /// # Errors
    ///
    /// Returns an error if pool creation fails.
    pub fn new(device: Arc<Device>, queue_family_index: u32) -> RhiResult<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family_index);

        let pool = unsafe { device.handle().create_command_pool(&create_info, None)? };

        debug!("Command pool created for queue family {}", queue_family_index);

        Ok(Self { device, pool })
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Allocates one primary command buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if allocation fails.
    pub fn allocate_command_buffer(&self) -> RhiResult<vk::CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffers = unsafe { self.device.handle().allocate_command_buffers(&alloc_info)? };
        Ok(buffers[0])
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_command_pool(self.pool, None);
        }
        debug!("Command pool destroyed");
    }
}

/// Recording wrapper around a `VkCommandBuffer`.
#[derive(Clone)]
pub struct CommandBuffer {
    device: Arc<Device>,
    buffer: vk::CommandBuffer,
}

impl CommandBuffer {
    /// Allocates a command buffer from `pool`.
    ///
    /// # Errors
    ///
    /// Returns an error if allocation fails.
    pub fn new(device: Arc<Device>, pool: &CommandPool) -> RhiResult<Self> {
        let buffer = pool.allocate_command_buffer()?;
        Ok(Self { device, buffer })
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Begins one-time-submit recording.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer cannot enter the recording state.
    pub fn begin(&self) -> RhiResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device
                .handle()
                .begin_command_buffer(self.buffer, &begin_info)?;
        }
        Ok(())
    }

    /// Ends recording.
    ///
    /// # Errors
    ///
    /// Returns an error if recording fails to finish.
    pub fn end(&self) -> RhiResult<()> {
        unsafe {
            self.device.handle().end_command_buffer(self.buffer)?;
        }
        Ok(())
    }

    /// Resets the buffer to the initial state.
    ///
    /// # Errors
    ///
    /// Returns an error if the reset fails.
    pub fn reset(&self) -> RhiResult<()> {
        unsafe {
            self.device
                .handle()
                .reset_command_buffer(self.buffer, vk::CommandBufferResetFlags::empty())?;
        }
        Ok(())
    }

    /// Submit info for `vkQueueSubmit2`.
    pub fn submit_info(&self) -> vk::CommandBufferSubmitInfo<'static> {
        vk::CommandBufferSubmitInfo::default()
            .command_buffer(self.buffer)
            .device_mask(0)
    }

    // Dynamic rendering

    pub fn begin_rendering(&self, rendering_info: &vk::RenderingInfo) {
        unsafe {
            self.device
                .handle()
                .cmd_begin_rendering(self.buffer, rendering_info);
        }
    }

    pub fn end_rendering(&self) {
        unsafe {
            self.device.handle().cmd_end_rendering(self.buffer);
        }
    }

    // State binding

    pub fn bind_pipeline(&self, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        unsafe {
            self.device
                .handle()
                .cmd_bind_pipeline(self.buffer, bind_point, pipeline);
        }
    }

    pub fn bind_descriptor_sets(
        &self,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        unsafe {
            self.device.handle().cmd_bind_descriptor_sets(
                self.buffer,
                bind_point,
                layout,
                first_set,
                sets,
                &[],
            );
        }
    }

    pub fn bind_index_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize) {
        unsafe {
            self.device.handle().cmd_bind_index_buffer(
                self.buffer,
                buffer,
                offset,
                vk::IndexType::UINT32,
            );
        }
    }

    pub fn set_viewport(&self, viewport: vk::Viewport) {
        unsafe {
            self.device
                .handle()
                .cmd_set_viewport(self.buffer, 0, &[viewport]);
        }
    }

    pub fn set_scissor(&self, scissor: vk::Rect2D) {
        unsafe {
            self.device
                .handle()
                .cmd_set_scissor(self.buffer, 0, &[scissor]);
        }
    }

    /// Uploads a POD value as push constants.
    pub fn push_constants<T: bytemuck::Pod>(
        &self,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        data: &T,
    ) {
        unsafe {
            self.device.handle().cmd_push_constants(
                self.buffer,
                layout,
                stages,
                0,
                bytemuck::bytes_of(data),
            );
        }
    }

    // Draw / dispatch

    pub fn draw_indexed(&self, index_count: u32, first_index: u32) {
        unsafe {
            self.device
                .handle()
                .cmd_draw_indexed(self.buffer, index_count, 1, first_index, 0, 0);
        }
    }

    pub fn dispatch(&self, group_count_x: u32, group_count_y: u32, group_count_z: u32) {
        unsafe {
            self.device.handle().cmd_dispatch(
                self.buffer,
                group_count_x,
                group_count_y,
                group_count_z,
            );
        }
    }

    // Synchronization and transfer

    /// Records a synchronization2 barrier.
    pub fn pipeline_barrier2(&self, dependency_info: &vk::DependencyInfo) {
        unsafe {
            self.device
                .handle()
                .cmd_pipeline_barrier2(self.buffer, dependency_info);
        }
    }

    pub fn copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        unsafe {
            self.device
                .handle()
                .cmd_copy_buffer(self.buffer, src, dst, regions);
        }
    }

    pub fn copy_buffer_to_image(
        &self,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        unsafe {
            self.device
                .handle()
                .cmd_copy_buffer_to_image(self.buffer, src, dst, dst_layout, regions);
        }
    }

    pub fn blit_image2(&self, blit_info: &vk::BlitImageInfo2) {
        unsafe {
            self.device.handle().cmd_blit_image2(self.buffer, blit_info);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_buffer_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<CommandBuffer>();
    }

    #[test]
    fn test_command_pool_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<CommandPool>();
    }
}
