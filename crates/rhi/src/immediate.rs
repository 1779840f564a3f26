//! Blocking one-shot command submission for load-time transfers.

use std::sync::{Arc, Mutex};

use ash::vk;
use tracing::{debug, error};

use crate::command::{CommandBuffer, CommandPool};
use crate::device::Device;
use crate::error::RhiResult;
use crate::sync::{Fence, IMMEDIATE_FENCE_TIMEOUT_NS};

struct ImmediateContext {
    fence: Fence,
    cmd: CommandBuffer,
    // Declared after `cmd`: the pool frees the buffer when dropped.
    _pool: CommandPool,
}

/// Records and submits a command buffer, then blocks until the GPU has
/// executed it.
///
/// The fence and command buffer are reused for every submission, so they
/// sit behind a mutex and at most one submission is outstanding.
pub struct ImmediateSubmitter {
    device: Arc<Device>,
    context: Mutex<ImmediateContext>,
}

impl ImmediateSubmitter {
    /// Creates the submitter's own command pool, command buffer and fence on
    /// the graphics queue family.
    ///
    /// # Arguments
    ///
    /// * `device` - Logical device whose graphics queue receives submissions
    ///
    /// # Errors
    ///
    /// Returns an error if pool, command buffer or fence creation fails.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let pool = CommandPool::new(device.clone(), device.graphics_family())?;
        let cmd = CommandBuffer::new(device.clone(), &pool)?;
        let fence = Fence::new(device.clone(), false)?;

        debug!("Immediate submitter created");

        Ok(Self {
            device,
            context: Mutex::new(ImmediateContext {
                fence,
                cmd,
                _pool: pool,
            }),
        })
    }

    /// Runs `record` on a fresh command buffer, submits it to the graphics
    /// queue and waits for completion.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::FenceTimeout`](crate::RhiError::FenceTimeout) if the GPU does not finish within
    /// [`IMMEDIATE_FENCE_TIMEOUT_NS`], or any recording/submission error.
    pub fn submit<R>(&self, record: impl FnOnce(&CommandBuffer) -> R) -> RhiResult<R> {
        let context = self
            .context
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        context.fence.reset()?;
        context.cmd.reset()?;

        context.cmd.begin()?;
        let result = record(&context.cmd);
        context.cmd.end()?;

        let cmd_infos = [context.cmd.submit_info()];
        let submit = vk::SubmitInfo2::default().command_buffer_infos(&cmd_infos);
        self.device
            .submit_graphics(std::slice::from_ref(&submit), context.fence.handle())?;

        if let Err(e) = context
            .fence
            .wait(IMMEDIATE_FENCE_TIMEOUT_NS, "immediate submit")
        {
            error!("Immediate submit did not complete: {}", e);
            return Err(e);
        }

        Ok(result)
    }
}
