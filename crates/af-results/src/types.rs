//! History record types.

use std::path::PathBuf;

use af_case::SimulationParameters;
use af_geometry::PointSet;
use af_runner::{FieldSummary, RunFailure, RunStatus, SolveMetrics};
use serde::{Deserialize, Serialize};

use crate::ResultsResult;
use crate::hash::{Fingerprint, compute_fingerprint};

pub const MANIFEST_SCHEMA_VERSION: u32 = 1;

/// Everything needed to replay a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    pub points: PointSet,
    pub parameters: SimulationParameters,
}

impl RunRequest {
    pub fn fingerprint(&self) -> ResultsResult<Fingerprint> {
        compute_fingerprint(&self.points, &self.parameters)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub max_pressure: f64,
    pub min_pressure: f64,
    pub max_velocity: f64,
    pub cell_count: usize,
    pub iterations: u32,
    pub converged: bool,
    pub final_residual: Option<f64>,
}

impl RunSummary {
    pub fn new(fields: &FieldSummary, metrics: &SolveMetrics) -> Self {
        Self {
            max_pressure: fields.max_pressure,
            min_pressure: fields.min_pressure,
            max_velocity: fields.max_velocity,
            cell_count: fields.cell_count,
            iterations: metrics.iterations,
            converged: metrics.converged,
            final_residual: metrics.final_residual,
        }
    }
}

/// One entry of the run history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub fingerprint: Fingerprint,
    pub status: RunStatus,
    pub request: RunRequest,
    pub created_at: String,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub finished_at: Option<String>,
    /// Incremented each time the request is executed again.
    #[serde(default)]
    pub attempt: u32,
    #[serde(default)]
    pub case_dir: Option<PathBuf>,
    #[serde(default)]
    pub reynolds_number: Option<f64>,
    #[serde(default)]
    pub summary: Option<RunSummary>,
    #[serde(default)]
    pub failure: Option<RunFailure>,
    #[serde(default)]
    pub evicted: bool,
}

impl RunRecord {
    pub fn new(request: RunRequest) -> ResultsResult<Self> {
        Ok(Self {
            fingerprint: request.fingerprint()?,
            status: RunStatus::Pending,
            request,
            created_at: chrono::Utc::now().to_rfc3339(),
            started_at: None,
            finished_at: None,
            attempt: 1,
            case_dir: None,
            reynolds_number: None,
            summary: None,
            failure: None,
            evicted: false,
        })
    }

    /// A succeeded record whose fields are still on disk.
    pub fn is_reusable(&self) -> bool {
        self.status == RunStatus::Succeeded && !self.evicted
    }

    /// Moment used for ordering: the latest known timestamp.
    pub fn last_activity(&self) -> &str {
        self.finished_at
            .as_deref()
            .or(self.started_at.as_deref())
            .unwrap_or(&self.created_at)
    }
}

/// `manifest.json` contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub schema_version: u32,
    pub record: RunRecord,
}
