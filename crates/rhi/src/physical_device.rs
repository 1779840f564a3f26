//! Physical device (GPU) selection.
//!
//! The renderer needs Vulkan 1.3 with dynamic rendering and
//! synchronization2, plus the 1.2 buffer-device-address and descriptor
//! indexing features. Among the GPUs that qualify, discrete GPUs win, then
//! the one with the most device-local memory.

use std::ffi::CStr;

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::{RhiError, RhiResult};

/// Queue family indices for the queues the renderer uses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics_family: Option<u32>,
    pub present_family: Option<u32>,
}

impl QueueFamilyIndices {
    /// Returns true when both graphics and present families were found.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.graphics_family.is_some() && self.present_family.is_some()
    }

    /// Graphics family index.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::NoSuitableGpu`] if no graphics family was found.
    pub fn graphics(&self) -> RhiResult<u32> {
        self.graphics_family.ok_or(RhiError::NoSuitableGpu)
    }

    /// Present family index.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::NoSuitableGpu`] if no present family was found.
    pub fn present(&self) -> RhiResult<u32> {
        self.present_family.ok_or(RhiError::NoSuitableGpu)
    }

    /// Unique family indices, graphics first.
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families = Vec::with_capacity(2);
        if let Some(graphics) = self.graphics_family {
            families.push(graphics);
        }
        if let Some(present) = self.present_family
            && !families.contains(&present)
        {
            families.push(present);
        }
        families
    }
}

/// A selected GPU with the properties the renderer cares about.
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    pub device: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub queue_families: QueueFamilyIndices,
}

impl PhysicalDeviceInfo {
    pub fn device_name(&self) -> &str {
        self.properties
            .device_name_as_c_str()
            .ok()
            .and_then(|name| name.to_str().ok())
            .unwrap_or("Unknown Device")
    }

    pub fn device_type_name(&self) -> &'static str {
        match self.properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
            vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
            vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
            vk::PhysicalDeviceType::CPU => "CPU",
            _ => "Other",
        }
    }

    /// Total size of device-local heaps, in bytes.
    pub fn device_local_memory(&self) -> u64 {
        self.memory_properties
            .memory_heaps
            .iter()
            .take(self.memory_properties.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size)
            .sum()
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let version = self.properties.api_version;
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.device_type_name())
            .field(
                "api_version",
                &format!(
                    "{}.{}.{}",
                    vk::api_version_major(version),
                    vk::api_version_minor(version),
                    vk::api_version_patch(version)
                ),
            )
            .field("queue_families", &self.queue_families)
            .finish()
    }
}

/// Picks the best GPU that can render to `surface`.
///
/// # Errors
///
/// Returns [`RhiError::NoSuitableGpu`] if no GPU meets the requirements.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> RhiResult<PhysicalDeviceInfo> {
    let devices = unsafe { instance.enumerate_physical_devices()? };
    if devices.is_empty() {
        warn!("No Vulkan-capable GPUs found");
        return Err(RhiError::NoSuitableGpu);
    }

    info!("Found {} GPU(s)", devices.len());

    let selected = devices
        .into_iter()
        .filter_map(|device| check_device_suitability(instance, device, surface, surface_loader))
        .max_by_key(|info| score_device(info.properties.device_type, info.device_local_memory()))
        .ok_or_else(|| {
            warn!("No suitable GPU found with required capabilities");
            RhiError::NoSuitableGpu
        })?;

    info!(
        "Selected GPU: '{}' ({})",
        selected.device_name(),
        selected.device_type_name()
    );

    Ok(selected)
}

fn check_device_suitability(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> Option<PhysicalDeviceInfo> {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };
    let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
        .to_string_lossy()
        .into_owned();

    if !supports_api_version(properties.api_version, 1, 3) {
        debug!("GPU '{}' skipped: Vulkan 1.3 not supported", name);
        return None;
    }

    let mut features_1_2 = vk::PhysicalDeviceVulkan12Features::default();
    let mut features_1_3 = vk::PhysicalDeviceVulkan13Features::default();
    let mut features = vk::PhysicalDeviceFeatures2::default()
        .push_next(&mut features_1_2)
        .push_next(&mut features_1_3);
    unsafe { instance.get_physical_device_features2(device, &mut features) };

    let required = [
        features_1_3.dynamic_rendering,
        features_1_3.synchronization2,
        features_1_2.buffer_device_address,
        features_1_2.descriptor_indexing,
    ];
    if required.contains(&vk::FALSE) {
        debug!("GPU '{}' skipped: missing required 1.2/1.3 features", name);
        return None;
    }

    let queue_families = find_queue_families(instance, device, surface, surface_loader);
    if !queue_families.is_complete() {
        debug!("GPU '{}' skipped: missing graphics or present queue", name);
        return None;
    }

    Some(PhysicalDeviceInfo {
        device,
        properties,
        memory_properties,
        queue_families,
    })
}

fn find_queue_families(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> QueueFamilyIndices {
    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
    let mut indices = QueueFamilyIndices::default();

    for (i, family) in families.iter().enumerate() {
        let i = i as u32;
        if family.queue_count == 0 {
            continue;
        }

        let present_support = unsafe {
            surface_loader
                .get_physical_device_surface_support(device, i, surface)
                .unwrap_or(false)
        };
        let graphics_support = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);

        // Prefer one family doing both.
        if graphics_support && present_support {
            indices.graphics_family = Some(i);
            indices.present_family = Some(i);
            break;
        }
        if graphics_support && indices.graphics_family.is_none() {
            indices.graphics_family = Some(i);
        }
        if present_support && indices.present_family.is_none() {
            indices.present_family = Some(i);
        }
    }

    indices
}

fn supports_api_version(api_version: u32, major: u32, minor: u32) -> bool {
    let device_major = vk::api_version_major(api_version);
    let device_minor = vk::api_version_minor(api_version);
    device_major > major || (device_major == major && device_minor >= minor)
}

fn score_device(device_type: vk::PhysicalDeviceType, device_local_bytes: u64) -> u64 {
    let type_score: u64 = match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1_000_000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100_000,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 10_000,
        _ => 0,
    };
    // VRAM in MiB breaks ties between GPUs of the same type.
    type_score + (device_local_bytes >> 20).min(99_999)
}
