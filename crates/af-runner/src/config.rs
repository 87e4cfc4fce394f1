use std::time::Duration;

use serde::{Deserialize, Serialize};

/// External program plus arguments, run with the stage directory as cwd.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// `sh Allrun`, the driver script every generated stage carries.
    pub fn allrun() -> Self {
        Self::new("sh", &["Allrun"])
    }
}

impl std::fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunnerConfig {
    pub mesher: CommandSpec,
    pub solver: CommandSpec,
    pub mesher_timeout: Duration,
    pub solver_timeout: Duration,
    /// Initial residuals above this count as divergence.
    pub divergence_residual: f64,
    pub launch_retries: u32,
    pub launch_backoff: Duration,
    pub max_concurrent_runs: usize,
    pub log_excerpt_lines: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            mesher: CommandSpec::allrun(),
            solver: CommandSpec::allrun(),
            mesher_timeout: Duration::from_secs(3600),
            solver_timeout: Duration::from_secs(3600),
            divergence_residual: 1e3,
            launch_retries: 3,
            launch_backoff: Duration::from_millis(200),
            max_concurrent_runs: 2,
            log_excerpt_lines: 40,
        }
    }
}
