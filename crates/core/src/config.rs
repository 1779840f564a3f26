//! Engine configuration.
//!
//! Configuration is read from a TOML file. Every section and every field is
//! optional; anything missing takes its default value.
//!
//! ```toml
//! [window]
//! title = "Black Hole-in-One"
//! width = 1700
//! height = 900
//!
//! [renderer]
//! vsync = true
//! render_scale = 0.8
//! background = "sky"
//!
//! [assets]
//! scene = "assets/structure.glb"
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub window: WindowConfig,
    pub renderer: RendererConfig,
    pub assets: AssetConfig,
    pub camera: CameraConfig,
}

/// Main window settings.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Black Hole-in-One".to_string(),
            width: 1700,
            height: 900,
            resizable: true,
        }
    }
}

/// Compute effect used to fill the draw image before geometry is drawn.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackgroundEffectKind {
    Gradient,
    #[default]
    Sky,
}

/// Renderer settings.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RendererConfig {
    /// Enable the Khronos validation layer.
    pub validation: bool,
    /// FIFO presentation when true, mailbox (if supported) otherwise.
    pub vsync: bool,
    /// Fraction of the draw image actually rendered to.
    pub render_scale: f32,
    pub background: BackgroundEffectKind,
    /// Set capacity of the first pool in each frame's descriptor allocator.
    pub initial_descriptor_sets: u32,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            validation: cfg!(debug_assertions),
            vsync: true,
            render_scale: 1.0,
            background: BackgroundEffectKind::default(),
            initial_descriptor_sets: 1000,
        }
    }
}

/// Asset locations.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct AssetConfig {
    /// glTF scene loaded at startup, if any.
    pub scene: Option<PathBuf>,
    /// Directory holding compiled `.spv` shaders.
    pub shader_dir: PathBuf,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            scene: None,
            shader_dir: PathBuf::from("shaders"),
        }
    }
}

/// Fly camera settings.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CameraConfig {
    pub position: [f32; 3],
    /// Units per second at normal speed.
    pub move_speed: f32,
    /// Speed multiplier while shift is held.
    pub fast_multiplier: f32,
    /// Radians per pixel of mouse motion.
    pub look_sensitivity: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            position: [0.0, 0.0, 5.0],
            move_speed: 2.0,
            fast_multiplier: 5.0,
            look_sensitivity: 1.0 / 200.0,
        }
    }
}

impl RendererConfig {
    /// Render scale clamped to the supported range.
    pub fn clamped_render_scale(&self) -> f32 {
        self.render_scale.clamp(0.3, 1.0)
    }
}

impl EngineConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read and
    /// [`Error::Config`] if it does not parse or fails validation.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on syntax errors, unknown keys, or invalid
    /// values.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(Error::Config(format!(
                "window size must be non-zero, got {}x{}",
                self.window.width, self.window.height
            )));
        }
        if !self.renderer.render_scale.is_finite() || self.renderer.render_scale <= 0.0 {
            return Err(Error::Config(format!(
                "render_scale must be positive, got {}",
                self.renderer.render_scale
            )));
        }
        if self.renderer.initial_descriptor_sets == 0 {
            return Err(Error::Config(
                "initial_descriptor_sets must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_document_is_default() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.window.title, "Black Hole-in-One");
        assert_eq!(config.renderer.background, BackgroundEffectKind::Sky);
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [window]
            width = 800

            [renderer]
            background = "gradient"
            render_scale = 0.5
            "#,
        )
        .unwrap();

        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.height, 900);
        assert_eq!(config.renderer.background, BackgroundEffectKind::Gradient);
        assert_eq!(config.renderer.render_scale, 0.5);
        assert!(config.renderer.vsync);
        assert_eq!(config.assets.shader_dir, PathBuf::from("shaders"));
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let err = EngineConfig::from_toml_str("[window]\nfullscreen = true\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_zero_window_size_is_rejected() {
        let err = EngineConfig::from_toml_str("[window]\nheight = 0\n").unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("non-zero")));
    }

    #[test]
    fn test_render_scale_is_clamped() {
        let mut renderer = RendererConfig::default();
        renderer.render_scale = 0.1;
        assert_eq!(renderer.clamped_render_scale(), 0.3);
        renderer.render_scale = 4.0;
        assert_eq!(renderer.clamped_render_scale(), 1.0);
    }

    #[test]
    fn test_load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[assets]\nscene = \"assets/basicmesh.glb\"").unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(
            config.assets.scene.as_deref(),
            Some(Path::new("assets/basicmesh.glb"))
        );
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = EngineConfig::load(dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
