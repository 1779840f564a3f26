//! Engine context of the Black Hole renderer.
//!
//! This crate drives the GPU each frame:
//! - A ring of frames in flight with per-frame deletion queues and
//!   descriptor pools
//! - Blocking uploads of meshes and textures
//! - Background compute effects and metallic-roughness mesh pipelines
//! - Culling, sorting and state-change batching of draws
//! - glTF scenes uploaded to the GPU

pub mod background;
pub mod defaults;
pub mod draw;
pub mod engine;
pub mod frame;
pub mod gpu_types;
pub mod material;
pub mod scene;
pub mod upload;

pub use engine::{Engine, EngineStats};
pub use frame::{FrameData, FrameRing, FrameResources, SlotState};
pub use scene::LoadedScene;

/// Maximum number of frames that can be in flight simultaneously.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;
