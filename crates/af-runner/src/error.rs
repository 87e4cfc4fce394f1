use std::path::PathBuf;

use crate::status::RunStatus;

pub type RunnerResult<T> = Result<T, RunnerError>;

#[derive(thiserror::Error, Debug)]
pub enum RunnerError {
    #[error("Run {run_id} not found")]
    RunNotFound { run_id: String },

    #[error("Results not ready: run is {status}")]
    NotReady { status: RunStatus },

    #[error("Failed to parse {}: {message}", path.display())]
    ResultParse { path: PathBuf, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
