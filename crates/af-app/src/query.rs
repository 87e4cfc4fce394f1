//! Read-side helpers that turn stored runs into something a front end can print.

use af_results::{RunRecord, RunSummary};
use af_runner::{FailureKind, ResultFields, RunStatus};

use crate::error::{AppError, AppResult};

/// Flattened run record for listings and detail views.
#[derive(Debug, Clone, PartialEq)]
pub struct RunView {
    pub fingerprint: String,
    pub short_id: String,
    pub status: RunStatus,
    pub created_at: String,
    pub finished_at: Option<String>,
    pub attempt: u32,
    pub point_count: usize,
    pub velocity_mps: f64,
    pub reynolds_number: Option<f64>,
    pub summary: Option<RunSummary>,
    pub failure_kind: Option<FailureKind>,
    pub failure_detail: Option<String>,
    pub log_excerpt: Vec<String>,
    pub evicted: bool,
}

pub fn run_view(record: &RunRecord) -> RunView {
    RunView {
        fingerprint: record.fingerprint.to_string(),
        short_id: record.fingerprint.short().to_string(),
        status: record.status,
        created_at: record.created_at.clone(),
        finished_at: record.finished_at.clone(),
        attempt: record.attempt,
        point_count: record.request.points.len(),
        velocity_mps: record.request.parameters.velocity_mps,
        reynolds_number: record.reynolds_number,
        summary: record.summary.clone(),
        failure_kind: record.failure.as_ref().map(|f| f.kind),
        failure_detail: record.failure.as_ref().map(|f| f.detail.clone()),
        log_excerpt: record
            .failure
            .as_ref()
            .map(|f| f.log_excerpt.clone())
            .unwrap_or_default(),
        evicted: record.evicted,
    }
}

impl RunView {
    /// One line for run listings.
    pub fn row(&self) -> String {
        let status = if self.evicted {
            format!("{} (evicted)", self.status)
        } else {
            self.status.to_string()
        };
        let re = self
            .reynolds_number
            .map_or_else(|| "-".to_string(), |re| format!("{re:.3e}"));
        format!(
            "{}  {:<20}  U={:<8.3} Re={:<10}  {}",
            self.short_id, status, self.velocity_mps, re, self.created_at
        )
    }

    /// Multi-line detail block.
    pub fn detail(&self) -> Vec<String> {
        let mut out = vec![
            format!("run:         {}", self.fingerprint),
            format!("status:      {}", self.status),
            format!("attempt:     {}", self.attempt),
            format!("created:     {}", self.created_at),
            format!("points:      {}", self.point_count),
            format!("velocity:    {} m/s", self.velocity_mps),
        ];
        if let Some(finished) = &self.finished_at {
            out.push(format!("finished:    {finished}"));
        }
        if let Some(re) = self.reynolds_number {
            out.push(format!("reynolds:    {re:.4e}"));
        }
        if let Some(s) = &self.summary {
            out.push(format!("cells:       {}", s.cell_count));
            out.push(format!("pressure:    {:.6} .. {:.6}", s.min_pressure, s.max_pressure));
            out.push(format!("max |U|:     {:.6}", s.max_velocity));
            let residual = s
                .final_residual
                .map_or_else(|| "-".to_string(), |r| format!("{r:.3e}"));
            out.push(format!(
                "iterations:  {} (residual {residual}, converged: {})",
                s.iterations, s.converged
            ));
        }
        if let (Some(kind), Some(detail)) = (self.failure_kind, &self.failure_detail) {
            out.push(format!("failure:     {kind}: {detail}"));
            out.extend(self.log_excerpt.iter().map(|l| format!("  | {l}")));
        }
        if self.evicted {
            out.push("results evicted; rerun to recompute".to_string());
        }
        out
    }
}

/// Whitespace-separated table of `p` or `U`, one row per cell.
pub fn field_table(fields: &ResultFields, name: &str) -> AppResult<String> {
    fields
        .to_table(name)
        .ok_or_else(|| AppError::InvalidInput(format!("unknown field '{name}' (expected p or U)")))
}
