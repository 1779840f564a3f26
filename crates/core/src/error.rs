//! Workspace-wide error type.

use thiserror::Error;

/// Error surfaced to the application.
///
/// `blackhole-rhi` and `blackhole-resources` keep finer-grained enums and
/// convert into this one where they cross into the engine.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Window error: {0}")]
    Window(String),

    /// Any Vulkan failure, already formatted by the RHI layer.
    #[error("Vulkan error: {0}")]
    Vulkan(String),

    /// A glTF scene or image that could not be imported.
    #[error("Resource error: {0}")]
    Resource(String),

    /// A SPIR-V file that is missing or malformed.
    #[error("Shader error: {0}")]
    Shader(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Unparseable or out-of-range configuration.
    #[error("Config error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
