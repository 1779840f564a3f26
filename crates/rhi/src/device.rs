//! Logical device, queues and the GPU memory allocator.
//!
//! [`Device`] is created once and shared as `Arc<Device>` by every RHI
//! object. After initialisation it is only read: the allocator is the one
//! piece of interior mutability and sits behind a `Mutex`.

use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex, MutexGuard};

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use tracing::{debug, error, info};

use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;
use crate::physical_device::{PhysicalDeviceInfo, QueueFamilyIndices};

/// Device extensions the renderer requires.
const DEVICE_EXTENSIONS: &[&std::ffi::CStr] = &[ash::khr::swapchain::NAME];

/// Logical device wrapper.
pub struct Device {
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    allocator: ManuallyDrop<Mutex<Allocator>>,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    queue_families: QueueFamilyIndices,
}

impl Device {
    /// Creates the logical device, its queues and the memory allocator.
    ///
    /// Enables Vulkan 1.3 dynamic rendering and synchronization2, and 1.2
    /// buffer device address and descriptor indexing.
    ///
    /// # Errors
    ///
    /// Returns an error if device creation or allocator initialisation fails.
    pub fn new(instance: &Instance, physical_device_info: &PhysicalDeviceInfo) -> RhiResult<Arc<Self>> {
        let queue_families = physical_device_info.queue_families;
        let graphics_family = queue_families.graphics()?;
        let present_family = queue_families.present()?;

        let unique_families = queue_families.unique_families();
        let queue_priorities = [1.0f32];
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        let mut features_1_2 = vk::PhysicalDeviceVulkan12Features::default()
            .buffer_device_address(true)
            .descriptor_indexing(true)
            .descriptor_binding_partially_bound(true)
            .descriptor_binding_variable_descriptor_count(true)
            .runtime_descriptor_array(true);

        let mut features_1_3 = vk::PhysicalDeviceVulkan13Features::default()
            .dynamic_rendering(true)
            .synchronization2(true);

        let extension_names: Vec<*const std::ffi::c_char> =
            DEVICE_EXTENSIONS.iter().map(|ext| ext.as_ptr()).collect();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .push_next(&mut features_1_2)
            .push_next(&mut features_1_3);

        let device = unsafe {
            instance
                .handle()
                .create_device(physical_device_info.device, &create_info, None)?
        };

        info!(
            "Logical device created on '{}'",
            physical_device_info.device_name()
        );

        let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(present_family, 0) };
        debug!(
            "Queues retrieved: graphics family {}, present family {}",
            graphics_family, present_family
        );

        let allocator = match Allocator::new(&AllocatorCreateDesc {
            instance: instance.handle().clone(),
            device: device.clone(),
            physical_device: physical_device_info.device,
            debug_settings: Default::default(),
            buffer_device_address: true,
            allocation_sizes: Default::default(),
        }) {
            Ok(allocator) => allocator,
            Err(err) => {
                unsafe { device.destroy_device(None) };
                return Err(err.into());
            }
        };

        info!("GPU memory allocator initialized");

        Ok(Arc::new(Self {
            device,
            physical_device: physical_device_info.device,
            properties: physical_device_info.properties,
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            graphics_queue,
            present_queue,
            queue_families,
        }))
    }

    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    #[inline]
    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    #[inline]
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    #[inline]
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    #[inline]
    pub fn queue_families(&self) -> &QueueFamilyIndices {
        &self.queue_families
    }

    /// Graphics queue family index.
    #[inline]
    pub fn graphics_family(&self) -> u32 {
        // Validated in `Device::new`.
        self.queue_families.graphics_family.unwrap_or_default()
    }

    #[inline]
    pub fn allocator(&self) -> &Mutex<Allocator> {
        &self.allocator
    }

    /// Locks the allocator.
    ///
    /// A poisoned lock is recovered: the allocator's state stays consistent
    /// even if a panic happened while another thread held it.
    pub fn lock_allocator(&self) -> MutexGuard<'_, Allocator> {
        self.allocator
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Blocks until the device has finished all submitted work.
    ///
    /// # Errors
    ///
    /// Returns an error if the wait fails (e.g. device lost).
    pub fn wait_idle(&self) -> RhiResult<()> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }

    /// Submits command buffers to the graphics queue with synchronization2.
    ///
    /// # Errors
    ///
    /// Returns an error if submission fails.
    pub fn submit_graphics(&self, submits: &[vk::SubmitInfo2], fence: vk::Fence) -> RhiResult<()> {
        unsafe {
            self.device
                .queue_submit2(self.graphics_queue, submits, fence)?;
        }
        Ok(())
    }

    /// Device address of a buffer created with `SHADER_DEVICE_ADDRESS`.
    pub fn buffer_device_address(&self, buffer: vk::Buffer) -> vk::DeviceAddress {
        let info = vk::BufferDeviceAddressInfo::default().buffer(buffer);
        unsafe { self.device.get_buffer_device_address(&info) }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                error!("Failed to wait for device idle during drop: {:?}", e);
            }

            // The allocator frees its memory blocks through the device, so it
            // must go first.
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
        }
        info!("Logical device destroyed");
    }
}

// Safety: ash::Device is Send+Sync, queue and physical-device handles are
// plain handles, and the allocator is behind a Mutex.
unsafe impl Send for Device {}
unsafe impl Sync for Device {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_extensions_defined() {
        assert!(DEVICE_EXTENSIONS.contains(&ash::khr::swapchain::NAME));
    }

    #[test]
    fn test_device_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Device>();
    }
}
