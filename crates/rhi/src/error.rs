//! RHI-specific error types.

use thiserror::Error;

/// RHI-specific error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] ash::vk::Result),

    /// Failed to load Vulkan library
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// GPU allocator error
    #[error("Allocator error: {0}")]
    AllocatorError(#[from] gpu_allocator::AllocationError),

    /// No suitable GPU found
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// Shader module error
    #[error("Shader error: {0}")]
    ShaderError(String),

    /// Surface creation error
    #[error("Surface error: {0}")]
    SurfaceError(String),

    /// Swapchain error
    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    /// Pipeline creation error
    #[error("Pipeline error: {0}")]
    PipelineError(String),

    /// A freshly created descriptor pool could not serve an allocation
    #[error("Descriptor allocation failed after retry with a fresh pool: {0}")]
    DescriptorExhausted(ash::vk::Result),

    /// A fence wait ran past its timeout (device lost or deadlock)
    #[error("Timed out waiting for {0}")]
    FenceTimeout(&'static str),

    /// Upload data that cannot describe the requested resource
    #[error("Invalid upload: {0}")]
    InvalidUpload(String),

    /// Host access to memory that is not mapped
    #[error("Memory is not host visible: {0}")]
    NotHostVisible(String),
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;

impl From<RhiError> for blackhole_core::Error {
    fn from(err: RhiError) -> Self {
        match err {
            RhiError::ShaderError(msg) => blackhole_core::Error::Shader(msg),
            RhiError::SurfaceError(msg) => blackhole_core::Error::Window(msg),
            other => blackhole_core::Error::Vulkan(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_converts_into_core_error() {
        let err: blackhole_core::Error = RhiError::ShaderError("bad magic".into()).into();
        assert!(matches!(err, blackhole_core::Error::Shader(msg) if msg == "bad magic"));

        let err: blackhole_core::Error =
            RhiError::DescriptorExhausted(ash::vk::Result::ERROR_OUT_OF_POOL_MEMORY).into();
        assert!(matches!(err, blackhole_core::Error::Vulkan(_)));
    }
}
