//! Texture samplers.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;

/// Filtering used by a [`Sampler`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SamplerDesc {
    pub mag_filter: vk::Filter,
    pub min_filter: vk::Filter,
    pub mipmap_mode: vk::SamplerMipmapMode,
}

impl SamplerDesc {
    pub const NEAREST: Self = Self {
        mag_filter: vk::Filter::NEAREST,
        min_filter: vk::Filter::NEAREST,
        mipmap_mode: vk::SamplerMipmapMode::NEAREST,
    };

    pub const LINEAR: Self = Self {
        mag_filter: vk::Filter::LINEAR,
        min_filter: vk::Filter::LINEAR,
        mipmap_mode: vk::SamplerMipmapMode::LINEAR,
    };
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self::LINEAR
    }
}

/// Owned `VkSampler`.
pub struct Sampler {
    device: Arc<Device>,
    sampler: vk::Sampler,
}

impl Sampler {
    /// Creates a sampler that can read every mip level.
    ///
    /// # Errors
    ///
    /// Returns an error if sampler creation fails.
    pub fn new(device: Arc<Device>, desc: SamplerDesc) -> RhiResult<Self> {
        let create_info = vk::SamplerCreateInfo::default()
            .mag_filter(desc.mag_filter)
            .min_filter(desc.min_filter)
            .mipmap_mode(desc.mipmap_mode)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE);

        let sampler = unsafe { device.handle().create_sampler(&create_info, None)? };
        debug!("Created sampler {:?}", desc);

        Ok(Self { device, sampler })
    }

    #[inline]
    pub fn handle(&self) -> vk::Sampler {
        self.sampler
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_sampler(self.sampler, None);
        }
        debug!("Destroyed sampler");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_linear() {
        assert_eq!(SamplerDesc::default(), SamplerDesc::LINEAR);
        assert_ne!(SamplerDesc::NEAREST, SamplerDesc::LINEAR);
    }
}
