//! Shared application service layer for the airfoil pipeline.
//!
//! Front ends (the CLI today) go through this crate for sketch editing,
//! submitting runs, the run history and result queries.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod query;
pub mod session;

pub use config::PipelineConfig;
pub use error::{AppError, AppResult};
pub use pipeline::{PipelineService, RunOptions, RunResponse, SubmitOutcome, Submission};
pub use progress::{PipelineStage, ProgressEvent};
pub use query::{RunView, field_table, run_view};
pub use session::DesignSession;
