//! Window management using winit.
//!
//! This module provides window creation and Vulkan surface creation functionality.

use std::ffi::c_char;
use std::sync::Arc;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window as WinitWindow, WindowAttributes};

use blackhole_core::{Error, Result, WindowConfig};

/// RAII wrapper for a Vulkan surface.
///
/// The Vulkan instance must outlive this surface.
pub struct Surface {
    handle: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,
}

impl Surface {
    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    /// Loader for capability, format and present mode queries.
    #[inline]
    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.surface_loader
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        // SAFETY: The surface was created by ash_window::create_surface from
        // the same instance the loader was created from.
        unsafe {
            self.surface_loader.destroy_surface(self.handle, None);
        }
        tracing::debug!("Vulkan surface destroyed");
    }
}

/// winit window plus the last known inner size.
pub struct Window {
    window: Arc<WinitWindow>,
    width: u32,
    height: u32,
}

impl Window {
    /// Creates a window from the `[window]` configuration section.
    pub fn new(event_loop: &ActiveEventLoop, config: &WindowConfig) -> Result<Self> {
        let attrs = WindowAttributes::default()
            .with_title(config.title.as_str())
            .with_inner_size(PhysicalSize::new(config.width, config.height))
            .with_resizable(config.resizable);

        let window = event_loop
            .create_window(attrs)
            .map_err(|e| Error::Window(e.to_string()))?;

        let size = window.inner_size();
        tracing::info!("Window created: {}x{}", size.width, size.height);

        Ok(Self {
            window: Arc::new(window),
            width: size.width,
            height: size.height,
        })
    }

    pub fn inner(&self) -> &WinitWindow {
        &self.window
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.width,
            height: self.height,
        }
    }

    /// A zero-sized window cannot back a swapchain.
    pub fn is_minimized(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Records the new inner size (call on `WindowEvent::Resized`).
    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        tracing::debug!("Window resized: {}x{}", width, height);
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }

    /// Instance extensions needed to create a surface for this window.
    ///
    /// The returned pointers refer to static strings owned by `ash-window`.
    pub fn required_extensions(&self) -> Result<Vec<*const c_char>> {
        let display_handle = self
            .window
            .display_handle()
            .map_err(|e| Error::Window(format!("Failed to get display handle: {}", e)))?;

        let extensions = ash_window::enumerate_required_extensions(display_handle.as_raw())
            .map_err(|e| Error::Vulkan(format!("Failed to enumerate required extensions: {}", e)))?;

        tracing::debug!(
            "Required Vulkan extensions for surface: {:?}",
            extensions
                .iter()
                // SAFETY: ash_window returns valid, null-terminated static strings.
                .map(|&ext| unsafe { std::ffi::CStr::from_ptr(ext) })
                .collect::<Vec<_>>()
        );

        Ok(extensions.to_vec())
    }

    /// Creates a Vulkan surface for this window.
    ///
    /// # Errors
    ///
    /// Returns an error if the raw handles are unavailable or surface
    /// creation fails.
    pub fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> Result<Surface> {
        let display_handle = self
            .window
            .display_handle()
            .map_err(|e| Error::Window(format!("Failed to get display handle: {}", e)))?;

        let window_handle = self
            .window
            .window_handle()
            .map_err(|e| Error::Window(format!("Failed to get window handle: {}", e)))?;

        // SAFETY: The handles come from a live winit window; the surface is
        // destroyed in Surface::drop before the instance.
        let handle = unsafe {
            ash_window::create_surface(
                entry,
                instance,
                display_handle.as_raw(),
                window_handle.as_raw(),
                None,
            )
            .map_err(|e| Error::Vulkan(format!("Failed to create Vulkan surface: {}", e)))?
        };

        let surface_loader = ash::khr::surface::Instance::new(entry, instance);

        tracing::info!("Vulkan surface created successfully");

        Ok(Surface {
            handle,
            surface_loader,
        })
    }
}
