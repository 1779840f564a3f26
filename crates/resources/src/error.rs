//! Error types for resource loading.

use std::path::PathBuf;

use thiserror::Error;

/// Error type for resource loading operations.
#[derive(Error, Debug)]
pub enum ResourceError {
    /// The glTF document or its buffers could not be loaded.
    #[error("Failed to load glTF file '{path}': {source}")]
    Gltf {
        path: PathBuf,
        #[source]
        source: gltf::Error,
    },

    /// A primitive is missing data the renderer needs.
    #[error("Mesh '{mesh}' primitive {primitive}: {message}")]
    MissingData {
        mesh: String,
        primitive: usize,
        message: &'static str,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Decoded pixels in a layout the renderer does not upload.
    #[error("Unsupported image '{name}': {reason}")]
    UnsupportedImage { name: String, reason: String },
}

/// Result type alias for resource operations.
pub type ResourceResult<T> = Result<T, ResourceError>;

impl From<ResourceError> for blackhole_core::Error {
    fn from(err: ResourceError) -> Self {
        match err {
            ResourceError::Io(e) => blackhole_core::Error::Io(e),
            other => blackhole_core::Error::Resource(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_converts_to_core_error() {
        let err = ResourceError::MissingData {
            mesh: "Cube".to_string(),
            primitive: 2,
            message: "no POSITION attribute",
        };
        let core: blackhole_core::Error = err.into();
        assert!(matches!(core, blackhole_core::Error::Resource(ref m) if m.contains("Cube")));

        let io = ResourceError::Io(std::io::Error::other("disk"));
        assert!(matches!(
            blackhole_core::Error::from(io),
            blackhole_core::Error::Io(_)
        ));
    }
}
