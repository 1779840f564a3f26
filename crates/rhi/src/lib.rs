//! Vulkan abstraction layer (Render Hardware Interface).
//!
//! This crate wraps `ash` for the renderer. It handles:
//! - Instance, device and swapchain creation
//! - Command recording, synchronization and immediate submits
//! - Buffers, images, samplers and GPU memory via `gpu-allocator`
//! - Shaders and pipelines
//! - Descriptor layouts, pool allocators and batched writes
//! - Deferred destruction through deletion queues

mod error;

pub mod buffer;
pub mod command;
pub mod deletion;
pub mod descriptor;
pub mod descriptor_allocator;
pub mod descriptor_writer;
pub mod device;
pub mod image;
pub mod immediate;
pub mod instance;
pub mod physical_device;
pub mod pipeline;
pub mod rendering;
pub mod sampler;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod vertex;

pub use error::{RhiError, RhiResult};

// Re-export ash types that users might need
pub use ash::vk;
