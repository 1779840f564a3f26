//! SPIR-V shader modules.
//!
//! - [`ShaderStage`] names the pipeline stage a module is used in.
//! - [`Shader`] owns a `VkShaderModule` plus its stage and entry point.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::path::Path;
//! use blackhole_rhi::device::Device;
//! use blackhole_rhi::shader::{Shader, ShaderStage};
//!
//! # fn example(device: Arc<Device>) -> Result<(), blackhole_rhi::RhiError> {
//! let gradient = Shader::from_spirv_file(
//!     device,
//!     Path::new("shaders/gradient.comp.spv"),
//!     ShaderStage::Compute,
//!     "main",
//! )?;
//! let _stage_info = gradient.stage_create_info();
//! # Ok(())
//! # }
//! ```

use std::ffi::CString;
use std::path::Path;
use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// First word of every SPIR-V module.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

impl ShaderStage {
    pub fn to_vk_stage(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
            ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
            ShaderStage::Compute => "compute",
        }
    }
}

impl std::fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Converts little-endian SPIR-V bytes into code words.
///
/// # Errors
///
/// Returns [`RhiError::ShaderError`] if the length is not a multiple of four
/// or the magic number is missing.
pub fn spirv_words(bytes: &[u8]) -> RhiResult<Vec<u32>> {
    if bytes.is_empty() || !bytes.len().is_multiple_of(4) {
        return Err(RhiError::ShaderError(format!(
            "SPIR-V code must be a non-empty multiple of 4 bytes, got {} bytes",
            bytes.len()
        )));
    }

    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();

    if words[0] != SPIRV_MAGIC {
        return Err(RhiError::ShaderError(format!(
            "Bad SPIR-V magic number {:#010x}",
            words[0]
        )));
    }

    Ok(words)
}

/// Owned shader module.
pub struct Shader {
    device: Arc<Device>,
    module: vk::ShaderModule,
    stage: ShaderStage,
    entry_point: CString,
}

impl Shader {
    /// Reads a SPIR-V file and creates a module from it.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::ShaderError`] if the file cannot be read or is not
    /// SPIR-V, or the Vulkan error if module creation fails.
    pub fn from_spirv_file(
        device: Arc<Device>,
        path: &Path,
        stage: ShaderStage,
        entry_point: &str,
    ) -> RhiResult<Self> {
        debug!("Loading {} shader from {:?}", stage, path);

        let bytes = std::fs::read(path).map_err(|e| {
            RhiError::ShaderError(format!("Failed to read shader file {:?}: {}", path, e))
        })?;

        Self::from_spirv_bytes(device, &bytes, stage, entry_point)
    }

    /// Creates a module from SPIR-V bytes.
    pub fn from_spirv_bytes(
        device: Arc<Device>,
        bytes: &[u8],
        stage: ShaderStage,
        entry_point: &str,
    ) -> RhiResult<Self> {
        let code = spirv_words(bytes)?;
        let entry_point = CString::new(entry_point)
            .map_err(|e| RhiError::ShaderError(format!("Invalid entry point name: {}", e)))?;

        let create_info = vk::ShaderModuleCreateInfo::default().code(&code);
        let module = unsafe { device.handle().create_shader_module(&create_info, None)? };

        debug!("Created {} shader module ({} words)", stage, code.len());

        Ok(Self {
            device,
            module,
            stage,
            entry_point,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    #[inline]
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    #[inline]
    pub fn entry_point(&self) -> &std::ffi::CStr {
        &self.entry_point
    }

    /// Stage info for pipeline creation. Borrows the shader.
    pub fn stage_create_info(&self) -> vk::PipelineShaderStageCreateInfo<'_> {
        vk::PipelineShaderStageCreateInfo::default()
            .stage(self.stage.to_vk_stage())
            .module(self.module)
            .name(&self.entry_point)
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_shader_module(self.module, None);
        }
        debug!("Destroyed {} shader module", self.stage);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shader_stage_to_vk_stage() {
        assert_eq!(
            ShaderStage::Vertex.to_vk_stage(),
            vk::ShaderStageFlags::VERTEX
        );
        assert_eq!(
            ShaderStage::Fragment.to_vk_stage(),
            vk::ShaderStageFlags::FRAGMENT
        );
        assert_eq!(
            ShaderStage::Compute.to_vk_stage(),
            vk::ShaderStageFlags::COMPUTE
        );
    }

    #[test]
    fn test_shader_stage_display() {
        assert_eq!(format!("{}", ShaderStage::Compute), "compute");
    }

    #[test]
    fn test_spirv_words_little_endian() {
        let mut bytes = SPIRV_MAGIC.to_le_bytes().to_vec();
        bytes.extend_from_slice(&0x0001_0600u32.to_le_bytes());
        let words = spirv_words(&bytes).unwrap();
        assert_eq!(words, vec![SPIRV_MAGIC, 0x0001_0600]);
    }

    #[test]
    fn test_spirv_words_rejects_misaligned() {
        let bytes = vec![0u8; 5];
        assert!(matches!(
            spirv_words(&bytes),
            Err(RhiError::ShaderError(_))
        ));
        assert!(spirv_words(&[]).is_err());
    }

    #[test]
    fn test_spirv_words_rejects_bad_magic() {
        let bytes = 0xdead_beefu32.to_le_bytes();
        assert!(spirv_words(&bytes).is_err());
    }
}
