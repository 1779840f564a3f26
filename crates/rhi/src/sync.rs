//! Synchronization primitives.
//!
//! - [`Semaphore`] orders work between queue operations on the GPU
//!   (acquire before color writes, rendering before present).
//! - [`Fence`] lets the CPU observe GPU completion (frame-slot reuse,
//!   immediate submit).
//!
//! Frame waits never time out. Immediate submits use a finite timeout;
//! running past it is reported as [`RhiError::FenceTimeout`] and treated as
//! fatal by callers.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Timeout for the per-frame fence wait and image acquire. `u64::MAX`
/// disables the timeout, so a slow frame stalls instead of failing.
pub const FRAME_FENCE_TIMEOUT_NS: u64 = u64::MAX;

/// Timeout for immediate-submit fence waits, in nanoseconds (~10 s).
pub const IMMEDIATE_FENCE_TIMEOUT_NS: u64 = 9_999_999_999;

/// Wrapper around a binary `VkSemaphore`.
pub struct Semaphore {
    device: Arc<Device>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Creates an unsignaled binary semaphore.
    ///
    /// # Errors
    ///
    /// Returns an error if semaphore creation fails.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe { device.handle().create_semaphore(&create_info, None)? };

        debug!("Created semaphore");

        Ok(Self { device, semaphore })
    }

    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }

    /// Submit info waiting on (or signaling) this semaphore at `stage`.
    pub fn submit_info(&self, stage: vk::PipelineStageFlags2) -> vk::SemaphoreSubmitInfo<'static> {
        vk::SemaphoreSubmitInfo::default()
            .semaphore(self.semaphore)
            .stage_mask(stage)
            .device_index(0)
            .value(1)
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_semaphore(self.semaphore, None);
        }
        debug!("Destroyed semaphore");
    }
}

/// Wrapper around a `VkFence`.
pub struct Fence {
    device: Arc<Device>,
    fence: vk::Fence,
}

impl Fence {
    /// Creates a fence, optionally already signaled.
    ///
    /// Frame fences start signaled so the first wait on a slot returns
    /// immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if fence creation fails.
    pub fn new(device: Arc<Device>, signaled: bool) -> RhiResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::default().flags(flags);
        let fence = unsafe { device.handle().create_fence(&create_info, None)? };

        debug!(
            "Created fence ({})",
            if signaled { "signaled" } else { "unsignaled" }
        );

        Ok(Self { device, fence })
    }

    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Blocks until the fence is signaled.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::FenceTimeout`] if `timeout_ns` elapses first, or
    /// the underlying Vulkan error (e.g. device lost).
    pub fn wait(&self, timeout_ns: u64, what: &'static str) -> RhiResult<()> {
        let fences = [self.fence];
        match unsafe { self.device.handle().wait_for_fences(&fences, true, timeout_ns) } {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(RhiError::FenceTimeout(what)),
            Err(err) => Err(err.into()),
        }
    }

    /// Returns the fence to the unsignaled state.
    ///
    /// # Errors
    ///
    /// Returns an error if the reset fails.
    pub fn reset(&self) -> RhiResult<()> {
        let fences = [self.fence];
        unsafe { self.device.handle().reset_fences(&fences)? };
        Ok(())
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_fence(self.fence, None);
        }
        debug!("Destroyed fence");
    }
}
