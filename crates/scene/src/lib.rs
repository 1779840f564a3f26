//! Scene description for the renderer.
//!
//! This crate provides:
//! - A first-person camera with reverse-Z projection
//! - Local transforms and an arena scene graph
//! - Bounds, material instances and per-frame render objects

pub mod camera;
pub mod graph;
pub mod render_object;
pub mod transform;

pub use camera::{Camera, CameraInput, CameraSettings};
pub use graph::{NodeId, NodeKind, Renderable, SceneGraph, SceneNode};
pub use render_object::{Bounds, DrawContext, MaterialInstance, MaterialPass, RenderObject};
pub use transform::Transform;
