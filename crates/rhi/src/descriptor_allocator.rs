//! Descriptor set allocation.
//!
//! [`DescriptorAllocator`] wraps a single pool that must be sized upfront.
//! [`GrowableDescriptorAllocator`] keeps a collection of pools split into
//! `ready` and `full`, creates new pools on demand with geometrically growing
//! capacity, and resets everything in place with
//! [`clear_pools`](GrowableDescriptorAllocator::clear_pools).

use ash::vk;
use tracing::{debug, error, warn};

use crate::descriptor::{DescriptorBackend, PoolSizeRatio};
use crate::error::{RhiError, RhiResult};

/// Upper bound on sets per pool for newly created pools.
pub const MAX_SETS_PER_POOL: u32 = 4092;

/// One descriptor pool of fixed capacity.
pub struct DescriptorAllocator<B: DescriptorBackend> {
    backend: B,
    pool: vk::DescriptorPool,
}

impl<B: DescriptorBackend> DescriptorAllocator<B> {
    /// Creates a pool holding `capacity` sets, with `ratio × capacity`
    /// descriptors of each listed type.
    pub fn init_pool(backend: B, capacity: u32, ratios: &[PoolSizeRatio]) -> RhiResult<Self> {
        let pool = backend.create_pool(capacity, ratios)?;
        Ok(Self { backend, pool })
    }

    /// Allocates one set. Fails once the pool is exhausted.
    pub fn allocate(&self, layout: vk::DescriptorSetLayout) -> RhiResult<vk::DescriptorSet> {
        self.backend
            .allocate_set(self.pool, layout, None)
            .map_err(RhiError::from)
    }

    /// Returns every set to the pool. Sets allocated before are invalid
    /// afterwards.
    pub fn clear(&self) -> RhiResult<()> {
        self.backend.reset_pool(self.pool)
    }

    /// Frees the pool. Called again, or on drop, this does nothing.
    pub fn destroy(&mut self) {
        if self.pool != vk::DescriptorPool::null() {
            self.backend.destroy_pool(self.pool);
            self.pool = vk::DescriptorPool::null();
        }
    }

    #[inline]
    pub fn pool(&self) -> vk::DescriptorPool {
        self.pool
    }
}

impl<B: DescriptorBackend> Drop for DescriptorAllocator<B> {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Pool-of-pools descriptor allocator.
///
/// Every live pool is in exactly one of `ready` or `full`. Allocation pulls
/// from `ready`, moves a pool to `full` when it runs out, and creates a new
/// pool only when no ready pool is left.
pub struct GrowableDescriptorAllocator<B: DescriptorBackend> {
    backend: B,
    ratios: Vec<PoolSizeRatio>,
    ready_pools: Vec<vk::DescriptorPool>,
    full_pools: Vec<vk::DescriptorPool>,
    sets_per_pool: u32,
}

impl<B: DescriptorBackend> GrowableDescriptorAllocator<B> {
    /// Creates the first pool.
    ///
    /// # Arguments
    ///
    /// * `backend` - Creates, resets and destroys the pools
    /// * `initial_capacity` - Sets held by the first pool
    /// * `ratios` - Descriptors of each type per set
    ///
    /// # Note
    ///
    /// Each pool created later holds 1.5× as many sets as the previous one,
    /// capped at [`MAX_SETS_PER_POOL`].
    ///
    /// # Errors
    ///
    /// Returns the backend's error if the first pool cannot be created.
    pub fn init(backend: B, initial_capacity: u32, ratios: &[PoolSizeRatio]) -> RhiResult<Self> {
        let pool = backend.create_pool(initial_capacity, ratios)?;

        debug!(
            "Growable descriptor allocator initialized with {} set(s)",
            initial_capacity
        );

        Ok(Self {
            backend,
            ratios: ratios.to_vec(),
            ready_pools: vec![pool],
            full_pools: Vec::new(),
            sets_per_pool: grow(initial_capacity),
        })
    }

    /// Allocates one set of `layout`.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::DescriptorExhausted`] when a freshly obtained pool
    /// also fails to allocate, and the underlying error for any other
    /// failure.
    pub fn allocate(&mut self, layout: vk::DescriptorSetLayout) -> RhiResult<vk::DescriptorSet> {
        self.allocate_inner(layout, None)
    }

    /// Allocates one set whose last binding has a variable descriptor count.
    pub fn allocate_variable(
        &mut self,
        layout: vk::DescriptorSetLayout,
        descriptor_count: u32,
    ) -> RhiResult<vk::DescriptorSet> {
        self.allocate_inner(layout, Some(descriptor_count))
    }

    fn allocate_inner(
        &mut self,
        layout: vk::DescriptorSetLayout,
        variable_count: Option<u32>,
    ) -> RhiResult<vk::DescriptorSet> {
        let pool = self.get_pool()?;

        match self.backend.allocate_set(pool, layout, variable_count) {
            Ok(set) => {
                self.ready_pools.push(pool);
                Ok(set)
            }
            Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL) => {
                self.full_pools.push(pool);

                let pool = self.get_pool()?;
                match self.backend.allocate_set(pool, layout, variable_count) {
                    Ok(set) => {
                        self.ready_pools.push(pool);
                        Ok(set)
                    }
                    Err(result) => {
                        self.ready_pools.push(pool);
                        error!("Descriptor allocation failed on a fresh pool: {:?}", result);
                        Err(RhiError::DescriptorExhausted(result))
                    }
                }
            }
            Err(result) => {
                self.ready_pools.push(pool);
                Err(RhiError::from(result))
            }
        }
    }

    /// Pops a ready pool or creates a new one at the current capacity.
    fn get_pool(&mut self) -> RhiResult<vk::DescriptorPool> {
        if let Some(pool) = self.ready_pools.pop() {
            return Ok(pool);
        }

        let pool = self.backend.create_pool(self.sets_per_pool, &self.ratios)?;
        debug!(
            "Descriptor allocator grew: new pool with {} set(s), {} pool(s) total",
            self.sets_per_pool,
            self.full_pools.len() + 1
        );
        self.sets_per_pool = grow(self.sets_per_pool);
        Ok(pool)
    }

    /// Resets every pool and moves all of them to `ready`. No pool is
    /// destroyed.
    pub fn clear_pools(&mut self) -> RhiResult<()> {
        for &pool in &self.ready_pools {
            self.backend.reset_pool(pool)?;
        }
        for pool in self.full_pools.drain(..) {
            if let Err(e) = self.backend.reset_pool(pool) {
                // Keep the pool tracked so it is still destroyed later.
                self.ready_pools.push(pool);
                return Err(e);
            }
            self.ready_pools.push(pool);
        }
        Ok(())
    }

    /// Destroys every pool. The allocator stays usable and will create a
    /// new pool on the next allocation.
    pub fn destroy_pools(&mut self) {
        let count = self.ready_pools.len() + self.full_pools.len();
        for pool in self.ready_pools.drain(..).chain(self.full_pools.drain(..)) {
            self.backend.destroy_pool(pool);
        }
        if count > 0 {
            debug!("Destroyed {} descriptor pool(s)", count);
        }
    }

    #[inline]
    pub fn ready_pools(&self) -> &[vk::DescriptorPool] {
        &self.ready_pools
    }

    #[inline]
    pub fn full_pools(&self) -> &[vk::DescriptorPool] {
        &self.full_pools
    }

    /// Capacity of the next pool to be created.
    #[inline]
    pub fn sets_per_pool(&self) -> u32 {
        self.sets_per_pool
    }

    #[inline]
    pub fn backend(&self) -> &B {
        &self.backend
    }
}

impl<B: DescriptorBackend> Drop for GrowableDescriptorAllocator<B> {
    fn drop(&mut self) {
        if !self.full_pools.is_empty() {
            warn!(
                "Dropping descriptor allocator with {} full pool(s)",
                self.full_pools.len()
            );
        }
        self.destroy_pools();
    }
}

fn grow(sets: u32) -> u32 {
    (sets.saturating_mul(3) / 2).min(MAX_SETS_PER_POOL)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use ash::vk::Handle;

    use super::*;
    use crate::descriptor::mock::MockBackend;

    const RATIOS: [PoolSizeRatio; 2] = [
        PoolSizeRatio::new(vk::DescriptorType::UNIFORM_BUFFER, 3.0),
        PoolSizeRatio::new(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 3.0),
    ];

    fn layout() -> vk::DescriptorSetLayout {
        vk::DescriptorSetLayout::from_raw(7)
    }

    fn assert_partitioned(allocator: &GrowableDescriptorAllocator<MockBackend>) {
        let ready: BTreeSet<u64> = allocator.ready_pools().iter().map(|p| p.as_raw()).collect();
        let full: BTreeSet<u64> = allocator.full_pools().iter().map(|p| p.as_raw()).collect();
        let live: BTreeSet<u64> = allocator
            .backend()
            .live_pools()
            .iter()
            .map(|p| p.as_raw())
            .collect();

        assert_eq!(ready.len(), allocator.ready_pools().len(), "duplicate ready pool");
        assert_eq!(full.len(), allocator.full_pools().len(), "duplicate full pool");
        assert!(ready.is_disjoint(&full));
        let all: BTreeSet<u64> = ready.union(&full).copied().collect();
        assert_eq!(all, live);
    }

    #[test]
    fn test_fixed_allocator_exhausts() {
        let allocator = DescriptorAllocator::init_pool(MockBackend::default(), 2, &RATIOS).unwrap();
        assert!(allocator.allocate(layout()).is_ok());
        assert!(allocator.allocate(layout()).is_ok());
        assert!(allocator.allocate(layout()).is_err());

        allocator.clear().unwrap();
        assert!(allocator.allocate(layout()).is_ok());
    }

    #[test]
    fn test_fixed_allocator_destroy_is_idempotent() {
        let mut allocator =
            DescriptorAllocator::init_pool(MockBackend::default(), 1, &RATIOS).unwrap();
        allocator.destroy();
        allocator.destroy();
        assert_eq!(allocator.pool(), vk::DescriptorPool::null());
        assert_eq!(allocator.backend.state.borrow().destroyed.len(), 1);
    }

    #[test]
    fn test_init_sets_next_capacity() {
        let allocator =
            GrowableDescriptorAllocator::init(MockBackend::default(), 10, &RATIOS).unwrap();
        assert_eq!(allocator.ready_pools().len(), 1);
        assert_eq!(allocator.sets_per_pool(), 15);
        assert_eq!(allocator.backend().state.borrow().created, vec![10]);
    }

    #[test]
    fn test_allocation_never_fails_and_grows() {
        let mut allocator =
            GrowableDescriptorAllocator::init(MockBackend::default(), 4, &RATIOS).unwrap();

        let mut sets = BTreeSet::new();
        for _ in 0..200 {
            let set = allocator.allocate(layout()).unwrap();
            assert!(sets.insert(set.as_raw()), "set handed out twice");
            assert_partitioned(&allocator);
        }

        let created = allocator.backend().state.borrow().created.clone();
        assert_eq!(&created[..4], &[4, 6, 9, 13]);
        assert!(created.iter().sum::<u32>() >= 200);
        assert!(!allocator.full_pools().is_empty());
    }

    #[test]
    fn test_growth_is_capped() {
        let mut allocator =
            GrowableDescriptorAllocator::init(MockBackend::default(), 4000, &RATIOS).unwrap();
        assert_eq!(allocator.sets_per_pool(), MAX_SETS_PER_POOL);

        for _ in 0..4001 {
            allocator.allocate(layout()).unwrap();
        }
        assert_eq!(allocator.sets_per_pool(), MAX_SETS_PER_POOL);
        assert_eq!(
            allocator.backend().state.borrow().created,
            vec![4000, MAX_SETS_PER_POOL]
        );
    }

    #[test]
    fn test_clear_pools_preserves_capacity() {
        let mut allocator =
            GrowableDescriptorAllocator::init(MockBackend::default(), 4, &RATIOS).unwrap();
        for _ in 0..50 {
            allocator.allocate(layout()).unwrap();
        }
        let pools_before = allocator.backend().state.borrow().created.len();

        allocator.clear_pools().unwrap();
        assert!(allocator.full_pools().is_empty());
        assert_eq!(allocator.ready_pools().len(), pools_before);
        assert_partitioned(&allocator);

        for _ in 0..50 {
            allocator.allocate(layout()).unwrap();
            assert_partitioned(&allocator);
        }
        let state = allocator.backend().state.borrow();
        assert_eq!(state.created.len(), pools_before);
        assert!(state.destroyed.is_empty());
    }

    #[test]
    fn test_second_failure_is_fatal() {
        let mut allocator =
            GrowableDescriptorAllocator::init(MockBackend::failing(), 4, &RATIOS).unwrap();

        let result = allocator.allocate(layout());
        assert!(matches!(
            result,
            Err(RhiError::DescriptorExhausted(vk::Result::ERROR_OUT_OF_POOL_MEMORY))
        ));
        // One retry only: the initial pool plus one fresh pool.
        assert_eq!(allocator.backend().state.borrow().created.len(), 2);
        assert_eq!(allocator.full_pools().len(), 1);
        assert_eq!(allocator.ready_pools().len(), 1);
        assert_partitioned(&allocator);
    }

    #[test]
    fn test_variable_count_reaches_backend_on_retry() {
        let mut allocator =
            GrowableDescriptorAllocator::init(MockBackend::default(), 1, &RATIOS).unwrap();
        allocator.allocate(layout()).unwrap();
        allocator.allocate_variable(layout(), 64).unwrap();

        // The second request overflows the first pool and is retried on a
        // fresh one with the same count.
        assert_eq!(
            allocator.backend().state.borrow().variable_counts,
            vec![None, Some(64), Some(64)]
        );
        assert_eq!(allocator.full_pools().len(), 1);
        assert_partitioned(&allocator);
    }

    #[test]
    fn test_destroy_pools_frees_everything() {
        let mut allocator =
            GrowableDescriptorAllocator::init(MockBackend::default(), 2, &RATIOS).unwrap();
        for _ in 0..10 {
            allocator.allocate(layout()).unwrap();
        }
        allocator.destroy_pools();
        assert!(allocator.ready_pools().is_empty());
        assert!(allocator.full_pools().is_empty());
        assert!(allocator.backend().live_pools().is_empty());

        // Still usable afterwards.
        allocator.allocate(layout()).unwrap();
        assert_eq!(allocator.backend().live_pools().len(), 1);
    }

    #[test]
    fn test_grow() {
        assert_eq!(grow(1000), 1500);
        assert_eq!(grow(3000), MAX_SETS_PER_POOL);
        assert_eq!(grow(1), 1);
    }
}
