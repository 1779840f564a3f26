//! Asset import for the renderer.
//!
//! This crate turns files on disk into CPU-side data:
//! - glTF/GLB scenes (meshes, surfaces, materials, samplers, nodes)
//! - Decoded RGBA8 textures with premultiplied alpha
//! - Placeholder pixel helpers (solid colors, checkerboards)

pub mod error;
pub mod image_utils;
pub mod import;

pub use error::{ResourceError, ResourceResult};
pub use import::{
    ImageData, MaterialData, MeshData, NodeData, SceneAsset, SurfaceData, TextureRef,
};
