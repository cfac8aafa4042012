//! Error types for raster operations.

use std::path::PathBuf;

use dem_common::BboxParseError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RasterError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("sidecar serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported raster layout: {0}")]
    Unsupported(String),

    #[error("raster has no georeference: {}", .0.display())]
    MissingGeoreference(PathBuf),

    #[error("degenerate transform: {0}")]
    DegenerateTransform(String),

    #[error("invalid bounds: {0}")]
    InvalidBounds(#[from] BboxParseError),

    #[error("sample buffer holds {actual} values, expected {expected}")]
    BufferSize { expected: usize, actual: usize },

    #[error("no usable inputs to merge")]
    EmptyMosaic,

    #[error("output verification failed: {0}")]
    Verification(String),
}

impl RasterError {
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    pub fn verification(msg: impl Into<String>) -> Self {
        Self::Verification(msg.into())
    }
}

/// Result type for raster operations.
pub type Result<T> = std::result::Result<T, RasterError>;
