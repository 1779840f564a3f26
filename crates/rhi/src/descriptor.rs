//! Descriptor set layouts and the backend seam used by the allocators.
//!
//! - [`DescriptorLayoutBuilder`] collects bindings and builds a
//!   [`DescriptorSetLayout`], applying one set of shader stages to every
//!   binding.
//! - [`DescriptorBackend`] is the narrow set of pool and update calls that
//!   [`DescriptorAllocator`](crate::descriptor_allocator::DescriptorAllocator),
//!   [`GrowableDescriptorAllocator`](crate::descriptor_allocator::GrowableDescriptorAllocator)
//!   and [`DescriptorWriter`](crate::descriptor_writer::DescriptorWriter)
//!   need. [`Device`] implements it; tests substitute an in-memory mock.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ash::vk;
//! use blackhole_rhi::device::Device;
//! use blackhole_rhi::descriptor::DescriptorLayoutBuilder;
//!
//! # fn example(device: Arc<Device>) -> Result<(), blackhole_rhi::RhiError> {
//! let mut builder = DescriptorLayoutBuilder::new();
//! builder.add_binding(0, vk::DescriptorType::UNIFORM_BUFFER);
//! let layout = builder.build(
//!     device,
//!     vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
//!     vk::DescriptorSetLayoutCreateFlags::empty(),
//! )?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;

/// Owned `VkDescriptorSetLayout`.
pub struct DescriptorSetLayout {
    device: Arc<Device>,
    layout: vk::DescriptorSetLayout,
}

impl DescriptorSetLayout {
    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_set_layout(self.layout, None);
        }
        debug!("Destroyed descriptor set layout");
    }
}

/// Accumulates single-descriptor bindings for a set layout.
#[derive(Default, Clone)]
pub struct DescriptorLayoutBuilder {
    bindings: Vec<vk::DescriptorSetLayoutBinding<'static>>,
}

impl DescriptorLayoutBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one descriptor of `descriptor_type` at `binding`.
    pub fn add_binding(&mut self, binding: u32, descriptor_type: vk::DescriptorType) -> &mut Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding)
                .descriptor_count(1)
                .descriptor_type(descriptor_type),
        );
        self
    }

    pub fn clear(&mut self) {
        self.bindings.clear();
    }

    /// Bindings as they will be created, with `stages` applied to each.
    pub fn bindings_for(
        &self,
        stages: vk::ShaderStageFlags,
    ) -> Vec<vk::DescriptorSetLayoutBinding<'static>> {
        self.bindings
            .iter()
            .map(|binding| {
                let mut binding = *binding;
                binding.stage_flags |= stages;
                binding
            })
            .collect()
    }

    /// Creates the layout.
    ///
    /// # Errors
    ///
    /// Returns an error if layout creation fails.
    pub fn build(
        &self,
        device: Arc<Device>,
        stages: vk::ShaderStageFlags,
        flags: vk::DescriptorSetLayoutCreateFlags,
    ) -> RhiResult<DescriptorSetLayout> {
        let bindings = self.bindings_for(stages);
        let create_info = vk::DescriptorSetLayoutCreateInfo::default()
            .bindings(&bindings)
            .flags(flags);

        let layout = unsafe {
            device
                .handle()
                .create_descriptor_set_layout(&create_info, None)?
        };

        debug!(
            "Created descriptor set layout with {} binding(s)",
            bindings.len()
        );

        Ok(DescriptorSetLayout { device, layout })
    }
}

/// Descriptors of one type per set in a pool.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PoolSizeRatio {
    pub descriptor_type: vk::DescriptorType,
    pub ratio: f32,
}

impl PoolSizeRatio {
    pub const fn new(descriptor_type: vk::DescriptorType, ratio: f32) -> Self {
        Self {
            descriptor_type,
            ratio,
        }
    }
}

/// Pool sizes for a pool of `set_count` sets: `ratio × set_count`
/// descriptors per type, truncated.
pub fn pool_sizes(ratios: &[PoolSizeRatio], set_count: u32) -> Vec<vk::DescriptorPoolSize> {
    ratios
        .iter()
        .map(|ratio| vk::DescriptorPoolSize {
            ty: ratio.descriptor_type,
            descriptor_count: (ratio.ratio * set_count as f32) as u32,
        })
        .collect()
}

/// Pool and update operations needed by the descriptor allocators and the
/// writer.
pub trait DescriptorBackend {
    /// Creates a pool able to hold `max_sets` sets, sized from `ratios`.
    fn create_pool(&self, max_sets: u32, ratios: &[PoolSizeRatio]) -> RhiResult<vk::DescriptorPool>;

    /// Returns every set of `pool` to it.
    fn reset_pool(&self, pool: vk::DescriptorPool) -> RhiResult<()>;

    fn destroy_pool(&self, pool: vk::DescriptorPool);

    /// Allocates one set. Pool exhaustion is reported as
    /// `ERROR_OUT_OF_POOL_MEMORY` or `ERROR_FRAGMENTED_POOL`.
    fn allocate_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
        variable_descriptor_count: Option<u32>,
    ) -> Result<vk::DescriptorSet, vk::Result>;

    /// Applies descriptor writes in one call.
    fn update_sets(&self, writes: &[vk::WriteDescriptorSet<'_>]);
}

impl DescriptorBackend for Device {
    fn create_pool(&self, max_sets: u32, ratios: &[PoolSizeRatio]) -> RhiResult<vk::DescriptorPool> {
        let sizes = pool_sizes(ratios, max_sets);
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(&sizes);

        let pool = unsafe { self.handle().create_descriptor_pool(&create_info, None)? };
        debug!("Created descriptor pool for {} set(s)", max_sets);
        Ok(pool)
    }

    fn reset_pool(&self, pool: vk::DescriptorPool) -> RhiResult<()> {
        unsafe {
            self.handle()
                .reset_descriptor_pool(pool, vk::DescriptorPoolResetFlags::empty())?;
        }
        Ok(())
    }

    fn destroy_pool(&self, pool: vk::DescriptorPool) {
        unsafe {
            self.handle().destroy_descriptor_pool(pool, None);
        }
        debug!("Destroyed descriptor pool");
    }

    fn allocate_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
        variable_descriptor_count: Option<u32>,
    ) -> Result<vk::DescriptorSet, vk::Result> {
        let layouts = [layout];
        let counts = [variable_descriptor_count.unwrap_or(0)];
        let mut variable_info =
            vk::DescriptorSetVariableDescriptorCountAllocateInfo::default().descriptor_counts(&counts);

        let mut alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        if variable_descriptor_count.is_some() {
            alloc_info = alloc_info.push_next(&mut variable_info);
        }

        let sets = unsafe { self.handle().allocate_descriptor_sets(&alloc_info)? };
        Ok(sets[0])
    }

    fn update_sets(&self, writes: &[vk::WriteDescriptorSet<'_>]) {
        if writes.is_empty() {
            return;
        }
        unsafe {
            self.handle().update_descriptor_sets(writes, &[]);
        }
    }
}

impl<B: DescriptorBackend + ?Sized> DescriptorBackend for Arc<B> {
    fn create_pool(&self, max_sets: u32, ratios: &[PoolSizeRatio]) -> RhiResult<vk::DescriptorPool> {
        (**self).create_pool(max_sets, ratios)
    }

    fn reset_pool(&self, pool: vk::DescriptorPool) -> RhiResult<()> {
        (**self).reset_pool(pool)
    }

    fn destroy_pool(&self, pool: vk::DescriptorPool) {
        (**self).destroy_pool(pool)
    }

    fn allocate_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
        variable_descriptor_count: Option<u32>,
    ) -> Result<vk::DescriptorSet, vk::Result> {
        (**self).allocate_set(pool, layout, variable_descriptor_count)
    }

    fn update_sets(&self, writes: &[vk::WriteDescriptorSet<'_>]) {
        (**self).update_sets(writes)
    }
}

/// In-memory descriptor backend for allocator and writer tests.
#[cfg(test)]
pub(crate) mod mock {
    use std::cell::RefCell;
    use std::collections::BTreeMap;

    use ash::vk::{self, Handle};

    use super::{DescriptorBackend, PoolSizeRatio};
    use crate::error::RhiResult;

    #[derive(Debug, Clone, Copy)]
    pub struct MockPool {
        pub capacity: u32,
        pub used: u32,
    }

    /// A recorded descriptor write.
    #[derive(Debug, Clone, PartialEq)]
    pub struct RecordedWrite {
        pub dst_set: vk::DescriptorSet,
        pub binding: u32,
        pub descriptor_type: vk::DescriptorType,
        pub buffer: Option<(vk::Buffer, vk::DeviceSize, vk::DeviceSize)>,
        pub image: Option<(vk::ImageView, vk::Sampler, vk::ImageLayout)>,
    }

    #[derive(Default)]
    pub struct MockState {
        pub pools: BTreeMap<u64, MockPool>,
        pub created: Vec<u32>,
        pub destroyed: Vec<u64>,
        pub resets: usize,
        pub next_handle: u64,
        pub fail_every_allocation: bool,
        pub variable_counts: Vec<Option<u32>>,
        pub update_calls: usize,
        pub writes: Vec<RecordedWrite>,
    }

    #[derive(Default)]
    pub struct MockBackend {
        pub state: RefCell<MockState>,
    }

    impl MockBackend {
        pub fn failing() -> Self {
            let backend = Self::default();
            backend.state.borrow_mut().fail_every_allocation = true;
            backend
        }

        /// Handles of pools that exist (created and not destroyed).
        pub fn live_pools(&self) -> Vec<vk::DescriptorPool> {
            self.state
                .borrow()
                .pools
                .keys()
                .map(|&raw| vk::DescriptorPool::from_raw(raw))
                .collect()
        }
    }

    impl DescriptorBackend for MockBackend {
        fn create_pool(
            &self,
            max_sets: u32,
            _ratios: &[PoolSizeRatio],
        ) -> RhiResult<vk::DescriptorPool> {
            let mut state = self.state.borrow_mut();
            state.next_handle += 1;
            let raw = state.next_handle;
            state.pools.insert(
                raw,
                MockPool {
                    capacity: max_sets,
                    used: 0,
                },
            );
            state.created.push(max_sets);
            Ok(vk::DescriptorPool::from_raw(raw))
        }

        fn reset_pool(&self, pool: vk::DescriptorPool) -> RhiResult<()> {
            let mut state = self.state.borrow_mut();
            state.resets += 1;
            if let Some(entry) = state.pools.get_mut(&pool.as_raw()) {
                entry.used = 0;
            }
            Ok(())
        }

        fn destroy_pool(&self, pool: vk::DescriptorPool) {
            let mut state = self.state.borrow_mut();
            state.pools.remove(&pool.as_raw());
            state.destroyed.push(pool.as_raw());
        }

        fn allocate_set(
            &self,
            pool: vk::DescriptorPool,
            _layout: vk::DescriptorSetLayout,
            variable_descriptor_count: Option<u32>,
        ) -> Result<vk::DescriptorSet, vk::Result> {
            let mut state = self.state.borrow_mut();
            state.variable_counts.push(variable_descriptor_count);
            if state.fail_every_allocation {
                return Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY);
            }
            let entry = state
                .pools
                .get_mut(&pool.as_raw())
                .ok_or(vk::Result::ERROR_UNKNOWN)?;
            if entry.used >= entry.capacity {
                return Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY);
            }
            entry.used += 1;
            let set = (pool.as_raw() << 32) | entry.used as u64;
            Ok(vk::DescriptorSet::from_raw(set))
        }

        fn update_sets(&self, writes: &[vk::WriteDescriptorSet<'_>]) {
            let mut state = self.state.borrow_mut();
            state.update_calls += 1;
            for write in writes {
                // The pointers must still be valid here, exactly as the
                // driver would dereference them.
                let buffer = (!write.p_buffer_info.is_null()).then(|| {
                    let info = unsafe { &*write.p_buffer_info };
                    (info.buffer, info.offset, info.range)
                });
                let image = (!write.p_image_info.is_null()).then(|| {
                    let info = unsafe { &*write.p_image_info };
                    (info.image_view, info.sampler, info.image_layout)
                });
                state.writes.push(RecordedWrite {
                    dst_set: write.dst_set,
                    binding: write.dst_binding,
                    descriptor_type: write.descriptor_type,
                    buffer,
                    image,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_applies_stages_to_every_binding() {
        let mut builder = DescriptorLayoutBuilder::new();
        builder
            .add_binding(0, vk::DescriptorType::UNIFORM_BUFFER)
            .add_binding(1, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);

        let bindings =
            builder.bindings_for(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT);
        assert_eq!(bindings.len(), 2);
        for (i, binding) in bindings.iter().enumerate() {
            assert_eq!(binding.binding, i as u32);
            assert_eq!(binding.descriptor_count, 1);
            assert!(binding.stage_flags.contains(vk::ShaderStageFlags::FRAGMENT));
        }
        assert_eq!(
            bindings[1].descriptor_type,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER
        );
    }

    #[test]
    fn test_builder_clear() {
        let mut builder = DescriptorLayoutBuilder::new();
        builder.add_binding(0, vk::DescriptorType::STORAGE_IMAGE);
        builder.clear();
        assert!(builder.bindings_for(vk::ShaderStageFlags::COMPUTE).is_empty());
    }

    #[test]
    fn test_pool_sizes_scale_with_ratio() {
        let ratios = [
            PoolSizeRatio::new(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 3.0),
            PoolSizeRatio::new(vk::DescriptorType::UNIFORM_BUFFER, 3.0),
            PoolSizeRatio::new(vk::DescriptorType::STORAGE_BUFFER, 1.0),
            PoolSizeRatio::new(vk::DescriptorType::STORAGE_IMAGE, 0.5),
        ];
        let sizes = pool_sizes(&ratios, 10);
        let counts: Vec<u32> = sizes.iter().map(|s| s.descriptor_count).collect();
        assert_eq!(counts, vec![30, 30, 10, 5]);
        assert_eq!(sizes[3].ty, vk::DescriptorType::STORAGE_IMAGE);
    }

    #[test]
    fn test_pool_sizes_truncate() {
        let ratios = [PoolSizeRatio::new(vk::DescriptorType::UNIFORM_BUFFER, 0.5)];
        assert_eq!(pool_sizes(&ratios, 3)[0].descriptor_count, 1);
    }
}
