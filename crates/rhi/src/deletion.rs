//! Deferred resource destruction.
//!
//! A [`DeletionQueue`] records resources whose destruction must wait until
//! the GPU is done with them. Entries are handed to a destroyer on
//! [`DeletionQueue::flush`] in reverse order of registration: the most
//! recently created resource goes first, so dependents are destroyed before
//! what they depend on.
//!
//! The engine keeps one queue for its whole lifetime (flushed at shutdown)
//! and one per frame slot (flushed when the slot is reused, after its fence
//! has been waited on).

use tracing::{trace, warn};

use crate::buffer::AllocatedBuffer;
use crate::image::AllocatedImage;

/// LIFO list of resources awaiting destruction.
#[derive(Debug)]
pub struct DeletionQueue<R> {
    entries: Vec<R>,
}

impl<R> DeletionQueue<R> {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Registers a resource for later destruction.
    pub fn push(&mut self, resource: R) {
        self.entries.push(resource);
    }

    /// Hands every entry to `destroy`, newest first, leaving the queue empty.
    ///
    /// Flushing an empty queue does nothing.
    pub fn flush<F: FnMut(R)>(&mut self, mut destroy: F) {
        while let Some(resource) = self.entries.pop() {
            destroy(resource);
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<R> Drop for DeletionQueue<R> {
    fn drop(&mut self) {
        if !self.entries.is_empty() {
            warn!(
                "Deletion queue dropped with {} unflushed resource(s)",
                self.entries.len()
            );
        }
    }
}

impl<R> Default for DeletionQueue<R> {
    fn default() -> Self {
        Self::new()
    }
}

/// A GPU object whose destruction has been deferred.
///
/// Both wrappers release their memory through the allocator when dropped;
/// queueing them only postpones that drop until the GPU is done.
pub enum GpuResource {
    Buffer(AllocatedBuffer),
    Image(AllocatedImage),
}

impl GpuResource {
    /// Destroys the resource.
    ///
    /// The GPU must no longer be using it.
    pub fn destroy(self) {
        trace!("Destroying deferred {:?}", self);
        match self {
            GpuResource::Buffer(buffer) => drop(buffer),
            GpuResource::Image(image) => drop(image),
        }
    }
}

impl std::fmt::Debug for GpuResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GpuResource::Buffer(buffer) => write!(f, "buffer ({} bytes)", buffer.size()),
            GpuResource::Image(image) => write!(
                f,
                "image ({}x{})",
                image.extent().width,
                image.extent().height
            ),
        }
    }
}

impl DeletionQueue<GpuResource> {
    /// Destroys every queued GPU resource, newest first.
    pub fn flush_resources(&mut self) {
        if !self.is_empty() {
            trace!("Flushing {} deferred GPU resource(s)", self.len());
        }
        self.flush(GpuResource::destroy);
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;

    #[test]
    fn test_flush_runs_in_reverse_order() {
        let mut queue = DeletionQueue::new();
        for id in 0..5 {
            queue.push(id);
        }

        let mut destroyed = Vec::new();
        queue.flush(|id| destroyed.push(id));

        assert_eq!(destroyed, vec![4, 3, 2, 1, 0]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_second_flush_is_a_no_op() {
        let mut queue = DeletionQueue::new();
        queue.push("pipeline");
        queue.flush(|_| {});

        let mut calls = 0;
        queue.flush(|_| calls += 1);
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_interleaved_push_and_flush() {
        let mut queue = DeletionQueue::new();
        let mut destroyed = Vec::new();

        queue.push("layout");
        queue.push("pipeline");
        queue.flush(|r| destroyed.push(r));

        queue.push("buffer");
        queue.push("image");
        queue.push("view");
        queue.flush(|r| destroyed.push(r));

        assert_eq!(
            destroyed,
            vec!["pipeline", "layout", "view", "image", "buffer"]
        );
    }

    #[test]
    fn test_unflushed_queue_still_drops_entries() {
        let tracker = Rc::new(());
        let mut queue = DeletionQueue::new();
        queue.push(tracker.clone());
        queue.push(tracker.clone());
        assert_eq!(Rc::strong_count(&tracker), 3);

        drop(queue);
        assert_eq!(Rc::strong_count(&tracker), 1);
    }
}
