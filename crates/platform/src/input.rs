//! Input handling for keyboard and mouse.

use std::collections::HashSet;

use glam::Vec2;
use winit::event::{ElementState, WindowEvent};
use winit::keyboard::PhysicalKey;

pub use winit::keyboard::KeyCode;

/// Mouse button identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

impl MouseButton {
    fn from_winit(button: winit::event::MouseButton) -> Option<Self> {
        match button {
            winit::event::MouseButton::Left => Some(MouseButton::Left),
            winit::event::MouseButton::Right => Some(MouseButton::Right),
            winit::event::MouseButton::Middle => Some(MouseButton::Middle),
            _ => None,
        }
    }
}

/// Tracks the current state of keyboard and mouse input.
///
/// Mouse motion accumulates across every event received between two calls
/// to [`begin_frame`](Self::begin_frame).
#[derive(Debug, Default)]
pub struct InputState {
    pressed_keys: HashSet<KeyCode>,
    just_pressed_keys: HashSet<KeyCode>,

    pressed_buttons: HashSet<MouseButton>,

    mouse_position: Option<Vec2>,
    mouse_delta: Vec2,
}

impl InputState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears per-frame state. Call once per frame after the input has been
    /// consumed.
    pub fn begin_frame(&mut self) {
        self.just_pressed_keys.clear();
        self.mouse_delta = Vec2::ZERO;
    }

    /// Feeds a window event. Returns `true` if it was an input event.
    pub fn handle_window_event(&mut self, event: &WindowEvent) -> bool {
        match event {
            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(code) = event.physical_key {
                    match event.state {
                        ElementState::Pressed => self.on_key_pressed(code),
                        ElementState::Released => self.on_key_released(code),
                    }
                }
                true
            }
            WindowEvent::MouseInput { state, button, .. } => {
                if let Some(button) = MouseButton::from_winit(*button) {
                    match state {
                        ElementState::Pressed => self.on_mouse_pressed(button),
                        ElementState::Released => self.on_mouse_released(button),
                    }
                }
                true
            }
            WindowEvent::CursorMoved { position, .. } => {
                self.on_cursor_moved(position.x as f32, position.y as f32);
                true
            }
            WindowEvent::Focused(false) => {
                self.release_all();
                true
            }
            _ => false,
        }
    }

    pub fn on_key_pressed(&mut self, key: KeyCode) {
        if self.pressed_keys.insert(key) {
            self.just_pressed_keys.insert(key);
        }
    }

    pub fn on_key_released(&mut self, key: KeyCode) {
        self.pressed_keys.remove(&key);
    }

    pub fn on_mouse_pressed(&mut self, button: MouseButton) {
        self.pressed_buttons.insert(button);
    }

    pub fn on_mouse_released(&mut self, button: MouseButton) {
        self.pressed_buttons.remove(&button);
    }

    /// Absolute cursor position in window pixels. The first event only
    /// records the position.
    pub fn on_cursor_moved(&mut self, x: f32, y: f32) {
        let position = Vec2::new(x, y);
        if let Some(previous) = self.mouse_position {
            self.mouse_delta += position - previous;
        }
        self.mouse_position = Some(position);
    }

    /// Releases every key and button, e.g. when focus is lost.
    pub fn release_all(&mut self) {
        self.pressed_keys.clear();
        self.pressed_buttons.clear();
    }

    pub fn is_key_pressed(&self, key: KeyCode) -> bool {
        self.pressed_keys.contains(&key)
    }

    pub fn is_key_just_pressed(&self, key: KeyCode) -> bool {
        self.just_pressed_keys.contains(&key)
    }

    pub fn is_mouse_pressed(&self, button: MouseButton) -> bool {
        self.pressed_buttons.contains(&button)
    }

    /// Mouse movement since the last `begin_frame`, in pixels.
    pub fn mouse_delta(&self) -> Vec2 {
        self.mouse_delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_press_release() {
        let mut input = InputState::new();
        input.on_key_pressed(KeyCode::KeyW);
        assert!(input.is_key_pressed(KeyCode::KeyW));
        assert!(input.is_key_just_pressed(KeyCode::KeyW));

        input.begin_frame();
        assert!(input.is_key_pressed(KeyCode::KeyW));
        assert!(!input.is_key_just_pressed(KeyCode::KeyW));

        // Key repeat does not count as a new press.
        input.on_key_pressed(KeyCode::KeyW);
        assert!(!input.is_key_just_pressed(KeyCode::KeyW));

        input.on_key_released(KeyCode::KeyW);
        assert!(!input.is_key_pressed(KeyCode::KeyW));
    }

    #[test]
    fn test_mouse_delta_accumulates() {
        let mut input = InputState::new();
        input.on_cursor_moved(100.0, 100.0);
        assert_eq!(input.mouse_delta(), Vec2::ZERO);

        input.on_cursor_moved(110.0, 95.0);
        input.on_cursor_moved(115.0, 90.0);
        assert_eq!(input.mouse_delta(), Vec2::new(15.0, -10.0));

        input.begin_frame();
        assert_eq!(input.mouse_delta(), Vec2::ZERO);
    }

    #[test]
    fn test_release_all() {
        let mut input = InputState::new();
        input.on_key_pressed(KeyCode::ShiftLeft);
        input.on_mouse_pressed(MouseButton::Right);
        input.release_all();
        assert!(!input.is_key_pressed(KeyCode::ShiftLeft));
        assert!(!input.is_mouse_pressed(MouseButton::Right));
    }
}
