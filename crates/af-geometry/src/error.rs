//! Geometry error types.

use std::path::PathBuf;

pub type GeometryResult<T> = Result<T, GeometryError>;

#[derive(thiserror::Error, Debug)]
pub enum GeometryError {
    #[error("Insufficient points: need at least 3 distinct points, found {found}")]
    InsufficientPoints { found: usize },

    #[error("Invalid geometry: {reason}")]
    InvalidGeometry { reason: String },

    #[error("Failed to export mesh to {path}: {source}")]
    ExportFailure {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed STL: {0}")]
    InvalidStl(String),

    #[error("Parse error on line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GeometryError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        GeometryError::InvalidGeometry {
            reason: reason.into(),
        }
    }
}
