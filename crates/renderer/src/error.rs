//! Renderer error types.

use thiserror::Error;

/// Errors reported by a [`GraphicsDevice`](crate::gpu::GraphicsDevice).
///
/// Devices keep the first error raised since the last
/// [`take_error`](crate::gpu::GraphicsDevice::take_error) call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GpuError {
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("out of GPU memory")]
    OutOfMemory,

    #[error("validation error: {0}")]
    Validation(String),

    #[error("graphics device unavailable: {0}")]
    Unavailable(String),
}

/// Errors produced while loading pixel data into a texture.
#[derive(Debug, Error)]
pub enum TextureError {
    #[error("texture has no source path")]
    NoSource,

    #[error(transparent)]
    Decode(#[from] asset::DecodeError),

    #[error("invalid texture size {width}x{height}")]
    InvalidSize { width: u32, height: u32 },

    #[error("unsupported bits per pixel: {0}")]
    UnsupportedBitsPerPixel(u32),

    #[error("pixel data is {actual} bytes, expected {expected}")]
    DataSize { expected: usize, actual: usize },
}

/// Scene geometry that cannot be flattened.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeometryError {
    #[error("mesh {mesh} face {face} has {index_count} indices, expected 3")]
    NonTriangularFace {
        mesh: usize,
        face: usize,
        index_count: usize,
    },

    #[error("scene has more {0} than fit in 32-bit indices")]
    TooLarge(&'static str),
}

/// Reasons a model load did not complete.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error(transparent)]
    Import(#[from] asset::ImportError),

    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error("scene has no geometry to upload")]
    EmptyGeometry,

    #[error(transparent)]
    Gpu(#[from] GpuError),
}
