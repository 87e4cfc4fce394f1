//! Run lifecycle states and failure classification.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunStatus {
    Pending,
    Meshing,
    Solving,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    /// Allowed moves along `Pending -> Meshing -> Solving -> Succeeded`,
    /// with `Failed` reachable from any active stage and `Cancelled` from
    /// any non-terminal state.
    pub fn can_transition_to(self, next: RunStatus) -> bool {
        use RunStatus::*;
        match (self, next) {
            (Pending, Meshing) | (Meshing, Solving) | (Solving, Succeeded) => true,
            (Pending | Meshing | Solving, Failed) => true,
            (Pending | Meshing | Solving, Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Pending => "pending",
            RunStatus::Meshing => "meshing",
            RunStatus::Solving => "solving",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// The two external stages of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Mesh,
    Solve,
}

impl Stage {
    pub fn log_name(self) -> &'static str {
        match self {
            Stage::Mesh => "mesh.log",
            Stage::Solve => "solve.log",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    MeshingFailed,
    SolverDivergence,
    SolverTimeout,
    ProcessLaunchError,
    ResultParse,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::MeshingFailed => "meshing failed",
            FailureKind::SolverDivergence => "solver diverged",
            FailureKind::SolverTimeout => "solver timed out",
            FailureKind::ProcessLaunchError => "process launch error",
            FailureKind::ResultParse => "result parse error",
        };
        f.write_str(s)
    }
}

/// Why a run ended in `Failed`, with the tail of the stage log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFailure {
    pub kind: FailureKind,
    pub detail: String,
    #[serde(default)]
    pub log_excerpt: Vec<String>,
}

impl RunFailure {
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            log_excerpt: Vec::new(),
        }
    }

    pub fn with_excerpt(mut self, lines: Vec<String>) -> Self {
        self.log_excerpt = lines;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_path_and_terminal_states() {
        use RunStatus::*;
        assert!(Pending.can_transition_to(Meshing));
        assert!(Meshing.can_transition_to(Solving));
        assert!(Solving.can_transition_to(Succeeded));
        assert!(!Pending.can_transition_to(Solving));
        assert!(!Meshing.can_transition_to(Succeeded));
        assert!(Pending.can_transition_to(Cancelled));
        for terminal in [Succeeded, Failed, Cancelled] {
            assert!(terminal.is_terminal());
            for next in [Pending, Meshing, Solving, Succeeded, Failed, Cancelled] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }
}
