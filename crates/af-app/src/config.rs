//! Pipeline configuration loaded from YAML.

use std::path::{Path, PathBuf};
use std::time::Duration;

use af_geometry::{CurveOptions, StlFormat};
use af_runner::{CommandSpec, RunnerConfig};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StlEncoding {
    Ascii,
    #[default]
    Binary,
}

impl From<StlEncoding> for StlFormat {
    fn from(e: StlEncoding) -> Self {
        match e {
            StlEncoding::Ascii => StlFormat::Ascii,
            StlEncoding::Binary => StlFormat::Binary,
        }
    }
}

/// Every field has a default, so an empty file is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub runs_dir: PathBuf,
    pub mesher: CommandSpec,
    pub solver: CommandSpec,
    pub mesher_timeout_s: u64,
    pub solver_timeout_s: u64,
    pub divergence_residual: f64,
    pub launch_retries: u32,
    pub launch_backoff_ms: u64,
    pub max_concurrent_runs: usize,
    pub max_history: usize,
    pub curve_samples: usize,
    pub stl_format: StlEncoding,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let runner = RunnerConfig::default();
        Self {
            runs_dir: PathBuf::from("runs"),
            mesher: runner.mesher,
            solver: runner.solver,
            mesher_timeout_s: runner.mesher_timeout.as_secs(),
            solver_timeout_s: runner.solver_timeout.as_secs(),
            divergence_residual: runner.divergence_residual,
            launch_retries: runner.launch_retries,
            launch_backoff_ms: runner.launch_backoff.as_millis() as u64,
            max_concurrent_runs: runner.max_concurrent_runs,
            max_history: 20,
            curve_samples: af_geometry::curve::DEFAULT_SAMPLES,
            stl_format: StlEncoding::Binary,
        }
    }
}

impl PipelineConfig {
    pub fn load(path: &Path) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> AppResult<()> {
        self.validate()?;
        std::fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> AppResult<()> {
        let bad = |what: &str| Err(AppError::Config(what.to_string()));
        if self.mesher.program.trim().is_empty() || self.solver.program.trim().is_empty() {
            return bad("mesher and solver programs must be set");
        }
        if self.max_concurrent_runs == 0 {
            return bad("max_concurrent_runs must be at least 1");
        }
        if self.mesher_timeout_s == 0 || self.solver_timeout_s == 0 {
            return bad("stage timeouts must be positive");
        }
        if !(self.divergence_residual.is_finite() && self.divergence_residual > 0.0) {
            return bad("divergence_residual must be positive and finite");
        }
        let samples = af_geometry::curve::MIN_SAMPLES..=af_geometry::curve::MAX_SAMPLES;
        if !samples.contains(&self.curve_samples) {
            return bad("curve_samples out of range");
        }
        Ok(())
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            mesher: self.mesher.clone(),
            solver: self.solver.clone(),
            mesher_timeout: Duration::from_secs(self.mesher_timeout_s),
            solver_timeout: Duration::from_secs(self.solver_timeout_s),
            divergence_residual: self.divergence_residual,
            launch_retries: self.launch_retries,
            launch_backoff: Duration::from_millis(self.launch_backoff_ms),
            max_concurrent_runs: self.max_concurrent_runs,
            ..RunnerConfig::default()
        }
    }

    pub fn curve_options(&self) -> CurveOptions {
        CurveOptions {
            samples: self.curve_samples,
            ..CurveOptions::default()
        }
    }
}
