use af_results::Fingerprint;
use af_runner::RunStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    BuildingCurve,
    CheckingCache,
    LoadingCachedResult,
    AttachingToRun,
    ExportingGeometry,
    ConfiguringCase,
    Queued,
    Meshing,
    Solving,
    Completed,
    Failed,
    Cancelled,
}

impl From<RunStatus> for PipelineStage {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Pending => PipelineStage::Queued,
            RunStatus::Meshing => PipelineStage::Meshing,
            RunStatus::Solving => PipelineStage::Solving,
            RunStatus::Succeeded => PipelineStage::Completed,
            RunStatus::Failed => PipelineStage::Failed,
            RunStatus::Cancelled => PipelineStage::Cancelled,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub stage: PipelineStage,
    pub fingerprint: Option<Fingerprint>,
    pub elapsed_wall_s: f64,
    pub message: Option<String>,
    /// Solver iteration reached so far, while solving.
    pub iteration: Option<u32>,
    pub residual: Option<f64>,
}

impl ProgressEvent {
    pub fn stage(
        stage: PipelineStage,
        fingerprint: Option<Fingerprint>,
        elapsed_wall_s: f64,
        message: Option<String>,
    ) -> Self {
        Self {
            stage,
            fingerprint,
            elapsed_wall_s,
            message,
            iteration: None,
            residual: None,
        }
    }
}
