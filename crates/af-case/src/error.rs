use std::path::PathBuf;

use crate::validate::ValidationError;

pub type CaseResult<T> = Result<T, CaseError>;

#[derive(thiserror::Error, Debug)]
pub enum CaseError {
    #[error("Invalid parameters: {0}")]
    InvalidParameters(#[from] ValidationError),

    #[error("Case directory already exists: {}", path.display())]
    CaseExists { path: PathBuf },

    #[error("Geometry error: {0}")]
    Geometry(#[from] af_geometry::GeometryError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
