//! Error types for the af-app service layer.

use std::path::PathBuf;

use af_runner::RunStatus;

/// Unified error for every front end. Geometry and parameter problems are
/// reported here before any process starts; stage failures live in the
/// run record instead.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Insufficient points: need at least 3 distinct points, found {found}")]
    InsufficientPoints { found: usize },

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Failed to export geometry to {}: {message}", path.display())]
    ExportFailure { path: PathBuf, message: String },

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Case directory already exists: {}", .0.display())]
    CaseExists(PathBuf),

    #[error("Case error: {0}")]
    Case(String),

    #[error("Runner error: {0}")]
    Runner(String),

    #[error("Results not ready: run is {status}")]
    NotReady { status: RunStatus },

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Results evicted for run {0}; rerun to recompute")]
    Evicted(String),

    #[error("Cache corruption: {0}")]
    CacheCorruption(String),

    #[error("Results error: {0}")]
    Results(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for af-app operations.
pub type AppResult<T> = Result<T, AppError>;

impl From<af_geometry::GeometryError> for AppError {
    fn from(err: af_geometry::GeometryError) -> Self {
        use af_geometry::GeometryError as G;
        match err {
            G::InsufficientPoints { found } => AppError::InsufficientPoints { found },
            G::InvalidGeometry { reason } => AppError::InvalidGeometry(reason),
            G::ExportFailure { path, source } => AppError::ExportFailure {
                path,
                message: source.to_string(),
            },
            G::Io(e) => AppError::Io(e),
            other => AppError::InvalidInput(other.to_string()),
        }
    }
}

impl From<af_case::CaseError> for AppError {
    fn from(err: af_case::CaseError) -> Self {
        use af_case::CaseError as C;
        match err {
            C::InvalidParameters(e) => AppError::InvalidParameters(e.to_string()),
            C::CaseExists { path } => AppError::CaseExists(path),
            C::Geometry(e) => e.into(),
            other => AppError::Case(other.to_string()),
        }
    }
}

impl From<af_case::ValidationError> for AppError {
    fn from(err: af_case::ValidationError) -> Self {
        AppError::InvalidParameters(err.to_string())
    }
}

impl From<af_runner::RunnerError> for AppError {
    fn from(err: af_runner::RunnerError) -> Self {
        use af_runner::RunnerError as R;
        match err {
            R::NotReady { status } => AppError::NotReady { status },
            R::RunNotFound { run_id } => AppError::RunNotFound(run_id),
            other => AppError::Runner(other.to_string()),
        }
    }
}

impl From<af_results::ResultsError> for AppError {
    fn from(err: af_results::ResultsError) -> Self {
        use af_results::ResultsError as E;
        match err {
            E::RunNotFound { fingerprint } => AppError::RunNotFound(fingerprint),
            E::CacheCorruption { .. } => AppError::CacheCorruption(err.to_string()),
            E::Evicted { fingerprint } => AppError::Evicted(fingerprint),
            E::InvalidFingerprint(s) => AppError::InvalidInput(format!("invalid fingerprint '{s}'")),
            other => AppError::Results(other.to_string()),
        }
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::Config(err.to_string())
    }
}
