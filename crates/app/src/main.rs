//! Black Hole-in-One - Main Entry Point
//!
//! Opens a window, builds the engine and runs the winit event loop. Hold
//! the right mouse button to look around; WASD moves, Q/E go up and down,
//! shift moves faster. 1 and 2 switch between the gradient and sky
//! backgrounds.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use winit::application::ApplicationHandler;
use winit::event::{DeviceEvent, DeviceId, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::WindowId;

use blackhole_core::{EngineConfig, Timer};
use blackhole_platform::{InputState, Window};
use blackhole_renderer::Engine;

#[derive(Debug, Parser)]
#[command(name = "blackhole", version, about = "Vulkan glTF scene renderer")]
struct Args {
    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// glTF or GLB scene to load, overriding the configuration.
    #[arg(long)]
    scene: Option<PathBuf>,

    /// Disable the Vulkan validation layer.
    #[arg(long)]
    no_validation: bool,
}

impl Args {
    fn into_config(self) -> Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => EngineConfig::default(),
        };
        if let Some(scene) = self.scene {
            config.assets.scene = Some(scene);
        }
        if self.no_validation {
            config.renderer.validation = false;
        }
        Ok(config)
    }
}

struct App {
    config: EngineConfig,
    // Dropped before the window it renders to.
    engine: Option<Engine>,
    window: Option<Window>,
    input: InputState,
    timer: Timer,
    fatal_error: Option<anyhow::Error>,
}

impl App {
    fn new(config: EngineConfig) -> Self {
        Self {
            config,
            engine: None,
            window: None,
            input: InputState::new(),
            timer: Timer::new(),
            fatal_error: None,
        }
    }

    fn start(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window = Window::new(event_loop, &self.config.window).context("failed to create window")?;
        let engine = Engine::new(&self.config, &window).context("failed to initialize engine")?;
        self.engine = Some(engine);
        self.window = Some(window);
        Ok(())
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        match self.start(event_loop) {
            Ok(()) => info!("Initialization complete, entering main loop"),
            Err(e) => {
                error!("{:#}", e);
                self.fatal_error = Some(e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        if self.input.handle_window_event(&event) {
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                let Some(window) = self.window.as_mut() else {
                    return;
                };
                window.resize(size.width, size.height);
                if window.is_minimized() {
                    warn!("Window minimized, rendering paused");
                }
                if let Some(engine) = self.engine.as_mut() {
                    engine.request_resize(window.extent());
                }
            }
            WindowEvent::RedrawRequested => {
                let dt = self.timer.delta_secs();
                let Some(engine) = self.engine.as_mut() else {
                    return;
                };

                engine.update_scene(&self.input, dt);
                self.input.begin_frame();

                if let Err(e) = engine.draw() {
                    error!("Fatal render error: {}", e);
                    self.fatal_error = Some(anyhow::Error::new(e).context("frame rendering failed"));
                    event_loop.exit();
                }
            }
            _ => {}
        }
    }

    fn device_event(&mut self, _event_loop: &ActiveEventLoop, _id: DeviceId, _event: DeviceEvent) {}

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = self.window.as_ref() {
            window.request_redraw();
        }
    }
}

fn main() -> Result<()> {
    blackhole_core::init_logging();

    let config = Args::parse().into_config()?;
    info!("Starting {}", config.window.title);

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    // Tear the engine down before reporting, so its logs come first.
    app.engine = None;
    match app.fatal_error.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_override_config() {
        let args = Args::try_parse_from(["blackhole", "--scene", "city.glb", "--no-validation"])
            .unwrap();
        let config = args.into_config().unwrap();
        assert_eq!(config.assets.scene, Some(PathBuf::from("city.glb")));
        assert!(!config.renderer.validation);
    }

    #[test]
    fn test_args_defaults() {
        let config = Args::try_parse_from(["blackhole"]).unwrap().into_config().unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_missing_config_file_fails() {
        let args = Args::try_parse_from(["blackhole", "--config", "does/not/exist.toml"]).unwrap();
        assert!(args.into_config().is_err());
    }
}
