use std::sync::Arc;

use crate::controller::{RunHandle, RunSnapshot};
use crate::fields::ResultFields;
use crate::status::RunStatus;

/// One state change of a run, delivered in order per run.
#[derive(Debug, Clone)]
pub struct RunEvent {
    pub handle: RunHandle,
    pub from: RunStatus,
    pub snapshot: RunSnapshot,
    /// Present once the run has succeeded.
    pub fields: Option<Arc<ResultFields>>,
}

impl RunEvent {
    pub fn to(&self) -> RunStatus {
        self.snapshot.status
    }
}

pub trait RunListener: Send + Sync {
    fn on_transition(&self, event: &RunEvent);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListener;

impl RunListener for NoopListener {
    fn on_transition(&self, _event: &RunEvent) {}
}

impl<F> RunListener for F
where
    F: Fn(&RunEvent) + Send + Sync,
{
    fn on_transition(&self, event: &RunEvent) {
        self(event)
    }
}
