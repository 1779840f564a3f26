//! Frames in flight.
//!
//! The engine keeps [`MAX_FRAMES_IN_FLIGHT`] sets of per-frame resources
//! and cycles through them by frame number. While the GPU renders frame N
//! the CPU records frame N+1; a slot is only reused once its fence shows
//! that the GPU finished the frame that last used it.
//!
//! # Slot lifecycle
//!
//! ```text
//! Idle -> Complete -> Recording -> Submitted -> Complete -> Recording ...
//! ```
//!
//! A slot starts `Idle` and returns to it after [`FrameRing::flush_all`].
//!
//! 1. [`FrameRing::begin_frame`] waits on the slot's fence, flushes the
//!    slot's deletion queue and resets its descriptor pools, leaving the
//!    slot `Complete`.
//! 2. Once a swapchain image is acquired, [`FrameRing::start_recording`]
//!    resets the fence. A frame abandoned before this point leaves the fence
//!    signaled, so the next wait cannot hang.
//! 3. [`FrameRing::submitted`] marks the slot in flight and advances the
//!    frame number.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, error, info};

use blackhole_rhi::RhiResult;
use blackhole_rhi::command::{CommandBuffer, CommandPool};
use blackhole_rhi::deletion::{DeletionQueue, GpuResource};
use blackhole_rhi::descriptor::PoolSizeRatio;
use blackhole_rhi::descriptor_allocator::GrowableDescriptorAllocator;
use blackhole_rhi::device::Device;
use blackhole_rhi::sync::{FRAME_FENCE_TIMEOUT_NS, Fence, Semaphore};

use crate::MAX_FRAMES_IN_FLIGHT;

/// Where a frame slot is in its reuse cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Recording,
    Submitted,
    Complete,
}

/// Per-slot resources driven by a [`FrameRing`].
pub trait FrameResources {
    /// Record type held by the slot's deletion queue.
    type Deferred;

    /// Blocks until the GPU has finished the last submission using this slot.
    fn wait_for_completion(&self) -> RhiResult<()>;

    /// Unsignals the slot's fence ahead of a new submission.
    fn reset_fence(&self) -> RhiResult<()>;

    /// Returns every descriptor set allocated for the previous use of the slot.
    fn reset_descriptors(&mut self) -> RhiResult<()>;

    /// Destroys one deferred resource.
    fn destroy(&self, deferred: Self::Deferred);
}

struct Slot<F: FrameResources> {
    resources: F,
    deletions: DeletionQueue<F::Deferred>,
    state: SlotState,
}

/// Fixed ring of frame slots selected by `frame_number % MAX_FRAMES_IN_FLIGHT`.
pub struct FrameRing<F: FrameResources> {
    slots: Vec<Slot<F>>,
    frame_number: u64,
}

impl<F: FrameResources> FrameRing<F> {
    pub fn new(frames: [F; MAX_FRAMES_IN_FLIGHT]) -> Self {
        let slots = frames
            .into_iter()
            .map(|resources| Slot {
                resources,
                deletions: DeletionQueue::new(),
                state: SlotState::Idle,
            })
            .collect();

        Self {
            slots,
            frame_number: 0,
        }
    }

    /// Number of frames submitted so far.
    #[inline]
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    #[inline]
    pub fn current_index(&self) -> usize {
        (self.frame_number % self.slots.len() as u64) as usize
    }

    #[inline]
    pub fn current(&self) -> &F {
        &self.slots[self.current_index()].resources
    }

    #[inline]
    pub fn current_mut(&mut self) -> &mut F {
        let index = self.current_index();
        &mut self.slots[index].resources
    }

    pub fn state(&self, slot: usize) -> Option<SlotState> {
        self.slots.get(slot).map(|s| s.state)
    }

    pub fn pending_deletions(&self, slot: usize) -> usize {
        self.slots.get(slot).map_or(0, |s| s.deletions.len())
    }

    /// Prepares the current slot for reuse.
    ///
    /// Waits for the GPU to finish the frame that last used this slot, then
    /// destroys what that frame deferred and resets its descriptor pools.
    ///
    /// # Errors
    ///
    /// A fence timeout or pool reset failure is fatal and returned as is.
    pub fn begin_frame(&mut self) -> RhiResult<&mut F> {
        let index = self.current_index();
        let slot = &mut self.slots[index];

        slot.resources.wait_for_completion()?;
        slot.state = SlotState::Complete;

        let resources = &slot.resources;
        slot.deletions.flush(|deferred| resources.destroy(deferred));
        slot.resources.reset_descriptors()?;

        Ok(&mut slot.resources)
    }

    /// Resets the current slot's fence; call once the frame will be submitted.
    ///
    /// # Errors
    ///
    /// Returns the fence reset error.
    pub fn start_recording(&mut self) -> RhiResult<&mut F> {
        let index = self.current_index();
        let slot = &mut self.slots[index];
        slot.resources.reset_fence()?;
        slot.state = SlotState::Recording;
        Ok(&mut slot.resources)
    }

    /// Marks the current slot in flight and moves to the next frame.
    pub fn submitted(&mut self) {
        let index = self.current_index();
        self.slots[index].state = SlotState::Submitted;
        self.frame_number += 1;
    }

    /// Defers destruction of `resource` until this slot is next reused.
    pub fn defer(&mut self, resource: F::Deferred) {
        let index = self.current_index();
        self.slots[index].deletions.push(resource);
    }

    /// Destroys everything deferred by every slot.
    ///
    /// The caller must have waited for the device to go idle.
    pub fn flush_all(&mut self) {
        for slot in &mut self.slots {
            let resources = &slot.resources;
            slot.deletions.flush(|deferred| resources.destroy(deferred));
            slot.state = SlotState::Idle;
        }
    }

    pub fn frames(&self) -> impl Iterator<Item = &F> {
        self.slots.iter().map(|s| &s.resources)
    }
}

/// Vulkan resources of one frame slot.
///
/// # Synchronization Flow
///
/// ```text
/// 1. Wait on render_fence (CPU waits for previous use of this slot)
/// 2. Acquire swapchain image (signals swapchain_semaphore)
/// 3. Record commands to command_buffer
/// 4. Submit command_buffer:
///    - Wait on swapchain_semaphore
///    - Signal render_semaphore
///    - Signal render_fence
/// 5. Present (waits on render_semaphore)
/// ```
pub struct FrameData {
    // Dropped before the pool it was allocated from.
    command_buffer: CommandBuffer,
    _command_pool: CommandPool,
    swapchain_semaphore: Semaphore,
    render_semaphore: Semaphore,
    render_fence: Fence,
    descriptors: GrowableDescriptorAllocator<Arc<Device>>,
}

/// Pool ratios for per-frame descriptor sets.
pub const FRAME_POOL_RATIOS: [PoolSizeRatio; 4] = [
    PoolSizeRatio::new(vk::DescriptorType::STORAGE_IMAGE, 3.0),
    PoolSizeRatio::new(vk::DescriptorType::STORAGE_BUFFER, 3.0),
    PoolSizeRatio::new(vk::DescriptorType::UNIFORM_BUFFER, 3.0),
    PoolSizeRatio::new(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 4.0),
];

impl FrameData {
    /// Creates the command buffer, sync objects and descriptor allocator of
    /// one slot.
    ///
    /// # Arguments
    ///
    /// * `device` - Logical device
    /// * `initial_descriptor_sets` - Capacity of the slot's first descriptor pool
    ///
    /// # Note
    ///
    /// The fence starts signaled so the first wait returns at once.
    ///
    /// # Errors
    ///
    /// Returns an error if any resource creation fails.
    pub fn new(device: Arc<Device>, initial_descriptor_sets: u32) -> RhiResult<Self> {
        let command_pool = CommandPool::new(device.clone(), device.graphics_family())?;
        let command_buffer = CommandBuffer::new(device.clone(), &command_pool)?;
        let swapchain_semaphore = Semaphore::new(device.clone())?;
        let render_semaphore = Semaphore::new(device.clone())?;
        let render_fence = Fence::new(device.clone(), true)?;
        let descriptors = GrowableDescriptorAllocator::init(
            device.clone(),
            initial_descriptor_sets,
            &FRAME_POOL_RATIOS,
        )?;

        Ok(Self {
            command_buffer,
            _command_pool: command_pool,
            swapchain_semaphore,
            render_semaphore,
            render_fence,
            descriptors,
        })
    }

    #[inline]
    pub fn command_buffer(&self) -> &CommandBuffer {
        &self.command_buffer
    }

    #[inline]
    pub fn swapchain_semaphore(&self) -> &Semaphore {
        &self.swapchain_semaphore
    }

    #[inline]
    pub fn render_semaphore(&self) -> &Semaphore {
        &self.render_semaphore
    }

    #[inline]
    pub fn render_fence(&self) -> &Fence {
        &self.render_fence
    }

    #[inline]
    pub fn descriptors(&mut self) -> &mut GrowableDescriptorAllocator<Arc<Device>> {
        &mut self.descriptors
    }
}

impl FrameResources for FrameData {
    type Deferred = GpuResource;

    fn wait_for_completion(&self) -> RhiResult<()> {
        self.render_fence
            .wait(FRAME_FENCE_TIMEOUT_NS, "frame fence")
            .inspect_err(|e| error!("Frame did not complete: {}", e))
    }

    fn reset_fence(&self) -> RhiResult<()> {
        self.render_fence.reset()
    }

    fn reset_descriptors(&mut self) -> RhiResult<()> {
        self.descriptors.clear_pools()
    }

    fn destroy(&self, deferred: GpuResource) {
        deferred.destroy();
    }
}

/// Creates the Vulkan frame ring.
///
/// # Errors
///
/// Returns an error if any slot fails to initialize.
pub fn create_frame_ring(
    device: &Arc<Device>,
    initial_descriptor_sets: u32,
) -> RhiResult<FrameRing<FrameData>> {
    let frames = [
        FrameData::new(device.clone(), initial_descriptor_sets)?,
        FrameData::new(device.clone(), initial_descriptor_sets)?,
    ];
    debug!("Created {} frame slots", frames.len());
    info!(
        "Frame ring created with {} frames in flight",
        MAX_FRAMES_IN_FLIGHT
    );
    Ok(FrameRing::new(frames))
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Wait(usize),
        ResetFence(usize),
        ResetDescriptors(usize),
        Destroy(usize, &'static str),
    }

    struct MockFrame {
        id: usize,
        log: Rc<RefCell<Vec<Event>>>,
    }

    impl FrameResources for MockFrame {
        type Deferred = &'static str;

        fn wait_for_completion(&self) -> RhiResult<()> {
            self.log.borrow_mut().push(Event::Wait(self.id));
            Ok(())
        }

        fn reset_fence(&self) -> RhiResult<()> {
            self.log.borrow_mut().push(Event::ResetFence(self.id));
            Ok(())
        }

        fn reset_descriptors(&mut self) -> RhiResult<()> {
            self.log.borrow_mut().push(Event::ResetDescriptors(self.id));
            Ok(())
        }

        fn destroy(&self, deferred: &'static str) {
            self.log.borrow_mut().push(Event::Destroy(self.id, deferred));
        }
    }

    fn ring() -> (FrameRing<MockFrame>, Rc<RefCell<Vec<Event>>>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let frame = |id| MockFrame {
            id,
            log: log.clone(),
        };
        (FrameRing::new([frame(0), frame(1)]), log)
    }

    fn run_frame(ring: &mut FrameRing<MockFrame>, deferred: &[&'static str]) {
        ring.begin_frame().unwrap();
        ring.start_recording().unwrap();
        for &d in deferred {
            ring.defer(d);
        }
        ring.submitted();
    }

    #[test]
    fn test_slot_selection() {
        let (mut ring, _) = ring();
        assert_eq!(ring.current_index(), 0);
        run_frame(&mut ring, &[]);
        assert_eq!(ring.current_index(), 1);
        run_frame(&mut ring, &[]);
        assert_eq!(ring.current_index(), 0);
        assert_eq!(ring.frame_number(), 2);
    }

    #[test]
    fn test_reuse_waits_on_oldest_frame() {
        let (mut ring, log) = ring();
        run_frame(&mut ring, &["f0-uniforms", "f0-staging"]);
        run_frame(&mut ring, &["f1-uniforms"]);
        log.borrow_mut().clear();

        ring.begin_frame().unwrap();

        assert_eq!(
            *log.borrow(),
            vec![
                Event::Wait(0),
                Event::Destroy(0, "f0-staging"),
                Event::Destroy(0, "f0-uniforms"),
                Event::ResetDescriptors(0),
            ]
        );
        assert_eq!(ring.pending_deletions(1), 1);
    }

    #[test]
    fn test_slot_states() {
        let (mut ring, _) = ring();
        assert_eq!(ring.state(0), Some(SlotState::Idle));

        ring.begin_frame().unwrap();
        assert_eq!(ring.state(0), Some(SlotState::Complete));

        ring.start_recording().unwrap();
        assert_eq!(ring.state(0), Some(SlotState::Recording));

        ring.submitted();
        assert_eq!(ring.state(0), Some(SlotState::Submitted));
        assert_eq!(ring.state(1), Some(SlotState::Idle));
        assert_eq!(ring.state(2), None);

        run_frame(&mut ring, &[]);
        ring.begin_frame().unwrap();
        assert_eq!(ring.current_index(), 0);
        assert_eq!(ring.state(0), Some(SlotState::Complete));
        assert_eq!(ring.state(1), Some(SlotState::Submitted));

        ring.flush_all();
        assert_eq!(ring.state(0), Some(SlotState::Idle));
        assert_eq!(ring.state(1), Some(SlotState::Idle));
    }

    #[test]
    fn test_abandoned_frame_keeps_fence() {
        let (mut ring, log) = ring();

        // Acquire failed: no fence reset, no frame advance.
        ring.begin_frame().unwrap();
        assert_eq!(ring.current_index(), 0);
        assert!(!log.borrow().contains(&Event::ResetFence(0)));

        run_frame(&mut ring, &[]);
        assert_eq!(ring.frame_number(), 1);
        assert!(log.borrow().contains(&Event::ResetFence(0)));
    }

    #[test]
    fn test_flush_all() {
        let (mut ring, log) = ring();
        run_frame(&mut ring, &["a"]);
        run_frame(&mut ring, &["b", "c"]);
        log.borrow_mut().clear();

        ring.flush_all();
        assert_eq!(
            *log.borrow(),
            vec![
                Event::Destroy(0, "a"),
                Event::Destroy(1, "c"),
                Event::Destroy(1, "b"),
            ]
        );
        assert_eq!(ring.pending_deletions(0), 0);
        assert_eq!(ring.pending_deletions(1), 0);
    }
}
