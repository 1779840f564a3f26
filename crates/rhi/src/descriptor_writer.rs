//! Batched descriptor writes.
//!
//! Writes are recorded without a destination set and committed to one set
//! by [`DescriptorWriter::update_set`]. The `VkWriteDescriptorSet` entries
//! pointing at the recorded infos are only built inside `update_set`, from a
//! shared borrow of the writer, so the infos cannot move while the driver
//! reads them.

use ash::vk;

use crate::descriptor::DescriptorBackend;

#[derive(Debug, Clone, Copy)]
enum PendingInfo {
    Buffer(usize),
    Image(usize),
}

#[derive(Debug, Clone, Copy)]
struct PendingWrite {
    binding: u32,
    descriptor_type: vk::DescriptorType,
    info: PendingInfo,
}

#[derive(Default)]
pub struct DescriptorWriter {
    buffer_infos: Vec<vk::DescriptorBufferInfo>,
    image_infos: Vec<vk::DescriptorImageInfo>,
    writes: Vec<PendingWrite>,
}

impl DescriptorWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a buffer descriptor for `binding`.
    ///
    /// `descriptor_type` is one of the uniform or storage buffer types,
    /// optionally dynamic.
    pub fn write_buffer(
        &mut self,
        binding: u32,
        buffer: vk::Buffer,
        size: vk::DeviceSize,
        offset: vk::DeviceSize,
        descriptor_type: vk::DescriptorType,
    ) -> &mut Self {
        self.buffer_infos.push(vk::DescriptorBufferInfo {
            buffer,
            offset,
            range: size,
        });
        self.writes.push(PendingWrite {
            binding,
            descriptor_type,
            info: PendingInfo::Buffer(self.buffer_infos.len() - 1),
        });
        self
    }

    /// Records an image descriptor for `binding`.
    ///
    /// Pass a null sampler for sampled/storage images and a null view for a
    /// plain `SAMPLER` binding.
    pub fn write_image(
        &mut self,
        binding: u32,
        image_view: vk::ImageView,
        sampler: vk::Sampler,
        image_layout: vk::ImageLayout,
        descriptor_type: vk::DescriptorType,
    ) -> &mut Self {
        self.image_infos.push(vk::DescriptorImageInfo {
            sampler,
            image_view,
            image_layout,
        });
        self.writes.push(PendingWrite {
            binding,
            descriptor_type,
            info: PendingInfo::Image(self.image_infos.len() - 1),
        });
        self
    }

    /// Commits every recorded write to `set` in one update call.
    /// Does nothing when no writes are pending.
    pub fn update_set<B: DescriptorBackend + ?Sized>(&self, backend: &B, set: vk::DescriptorSet) {
        if self.writes.is_empty() {
            return;
        }

        let writes: Vec<vk::WriteDescriptorSet<'_>> = self
            .writes
            .iter()
            .map(|pending| {
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(pending.binding)
                    .descriptor_type(pending.descriptor_type);
                match pending.info {
                    PendingInfo::Buffer(i) => {
                        write.buffer_info(std::slice::from_ref(&self.buffer_infos[i]))
                    }
                    PendingInfo::Image(i) => {
                        write.image_info(std::slice::from_ref(&self.image_infos[i]))
                    }
                }
            })
            .collect();

        backend.update_sets(&writes);
    }

    /// Drops all recorded writes.
    pub fn clear(&mut self) {
        self.buffer_infos.clear();
        self.image_infos.clear();
        self.writes.clear();
    }

    #[inline]
    pub fn pending_writes(&self) -> usize {
        self.writes.len()
    }
}
