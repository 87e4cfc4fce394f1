//! Line-by-line watcher for mesher and solver output.

use serde::{Deserialize, Serialize};

/// Iteration and residual figures gathered from a solver log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SolveMetrics {
    pub iterations: u32,
    pub final_residual: Option<f64>,
    pub converged: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MonitorSignal {
    Continue,
    /// A fatal error or divergence was seen; the process should be stopped.
    Abort(String),
}

#[derive(Debug, Clone)]
pub struct LogMonitor {
    divergence_residual: f64,
    metrics: SolveMetrics,
    step_max_residual: Option<f64>,
    abort: Option<String>,
}

impl LogMonitor {
    pub fn new(divergence_residual: f64) -> Self {
        Self {
            divergence_residual,
            metrics: SolveMetrics::default(),
            step_max_residual: None,
            abort: None,
        }
    }

    pub fn metrics(&self) -> &SolveMetrics {
        &self.metrics
    }

    pub fn observe(&mut self, line: &str) -> MonitorSignal {
        if let Some(reason) = &self.abort {
            return MonitorSignal::Abort(reason.clone());
        }
        let trimmed = line.trim();

        if trimmed.contains("FOAM FATAL") {
            return self.abort_with(format!("fatal error: {trimmed}"));
        }
        if trimmed.contains("Floating point exception") || trimmed.contains("sigFpe") {
            return self.abort_with(format!("floating point exception: {trimmed}"));
        }

        if let Some(rest) = trimmed.strip_prefix("Time = ") {
            if let Ok(t) = rest.trim().parse::<f64>() {
                if t.is_finite() && t >= 0.0 {
                    self.metrics.iterations = t.round() as u32;
                }
            }
            self.step_max_residual = None;
            return MonitorSignal::Continue;
        }

        if trimmed.contains("solution converged in") || trimmed.contains("reached convergence criteria") {
            self.metrics.converged = true;
            return MonitorSignal::Continue;
        }

        if let Some(residual) = initial_residual(trimmed) {
            if !residual.is_finite() || residual > self.divergence_residual {
                return self.abort_with(format!("residual {residual} exceeds divergence limit"));
            }
            let step_max = self.step_max_residual.map_or(residual, |m| m.max(residual));
            self.step_max_residual = Some(step_max);
            self.metrics.final_residual = Some(step_max);
        }
        MonitorSignal::Continue
    }

    fn abort_with(&mut self, reason: String) -> MonitorSignal {
        self.abort = Some(reason.clone());
        MonitorSignal::Abort(reason)
    }
}

/// Value of `Initial residual = R` on a linear solver line.
fn initial_residual(line: &str) -> Option<f64> {
    const KEY: &str = "Initial residual =";
    let start = line.find(KEY)? + KEY.len();
    let value = line[start..].split(',').next()?.trim();
    let lower = value.to_ascii_lowercase();
    if lower == "nan" || lower == "-nan" {
        return Some(f64::NAN);
    }
    if lower == "inf" || lower == "-inf" {
        return Some(f64::INFINITY);
    }
    value.parse().ok()
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn aborts_exactly_above_limit(r in 0.0f64..1e6) {
            let mut m = LogMonitor::new(1e3);
            let line = format!("Solving for Ux, Initial residual = {r:e}, Final residual = 0");
            let aborted = matches!(m.observe(&line), MonitorSignal::Abort(_));
            prop_assert_eq!(aborted, r > 1e3);
        }
    }
}
