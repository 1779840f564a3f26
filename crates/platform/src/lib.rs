//! Platform layer for the renderer.
//!
//! This crate provides platform-specific functionality:
//! - Window creation from [`WindowConfig`](blackhole_core::WindowConfig) via winit
//! - Vulkan surface creation and required instance extensions
//! - Keyboard and mouse input state consumed by the camera

mod input;
mod window;

pub use input::{InputState, KeyCode, MouseButton};
pub use window::{Surface, Window};

// Re-export winit types that users might need
pub use winit::event::{DeviceEvent, ElementState, WindowEvent};
pub use winit::event_loop::{ActiveEventLoop, EventLoop};
