//! af-runner: drives the external mesher and solver for a case directory.

pub mod config;
pub mod controller;
pub mod error;
pub mod fields;
pub mod gate;
pub mod launcher;
pub mod listener;
pub mod monitor;
pub mod status;

pub use config::{CommandSpec, RunnerConfig};
pub use controller::{RunController, RunHandle, RunSnapshot};
pub use error::{RunnerError, RunnerResult};
pub use fields::{FieldSummary, ResultFields};
pub use launcher::{Launcher, SystemLauncher};
pub use listener::{NoopListener, RunEvent, RunListener};
pub use monitor::{LogMonitor, MonitorSignal, SolveMetrics};
pub use status::{FailureKind, RunFailure, RunStatus, Stage};
