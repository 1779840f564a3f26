//! Core utilities for the Black Hole renderer.
//!
//! This crate provides foundational types shared by every other crate:
//! - Error types and result aliases
//! - Logging initialization
//! - Frame timing
//! - Engine configuration loaded from TOML

mod config;
mod error;
mod logging;
mod timer;

pub use config::{
    AssetConfig, BackgroundEffectKind, CameraConfig, EngineConfig, RendererConfig, WindowConfig,
};
pub use error::{Error, Result};
pub use logging::init_logging;
pub use timer::Timer;
