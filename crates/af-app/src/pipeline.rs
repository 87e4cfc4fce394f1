//! Run execution and caching service.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use af_case::{CASE_MANIFEST, CaseDirectory, SimulationParameters, configure_with, prepare_rerun};
use af_geometry::PointSet;
use af_results::{
    Fingerprint, ResultsError, RunHistory, RunRecord, RunRequest, RunStore, RunSummary,
    compute_fingerprint,
};
use af_runner::{
    FailureKind, ResultFields, RunController, RunEvent, RunFailure, RunHandle, RunListener,
    RunSnapshot, RunStatus, RunnerError, RunnerResult,
};
use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::error::{AppError, AppResult};
use crate::progress::{PipelineStage, ProgressEvent};

/// Options for submitting runs.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Reuse a stored successful run with the same fingerprint.
    pub use_cache: bool,
    /// Give up waiting after this long. The run keeps going until
    /// [`PipelineService::shutdown`] or [`PipelineService::cancel`].
    pub timeout: Option<Duration>,
    pub poll_interval: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            timeout: None,
            poll_interval: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// A new run was queued.
    Started,
    /// The same request was already running; its handle is returned.
    Attached,
    /// A stored successful run was found; nothing was executed.
    Cached,
}

#[derive(Debug, Clone)]
pub struct Submission {
    pub fingerprint: Fingerprint,
    pub outcome: SubmitOutcome,
    pub handle: Option<RunHandle>,
}

/// Response from a run execution.
#[derive(Debug, Clone)]
pub struct RunResponse {
    pub fingerprint: Fingerprint,
    pub record: RunRecord,
    pub loaded_from_cache: bool,
    pub attached: bool,
}

enum Slot {
    /// A submitter is writing the case directory.
    Preparing,
    Running(RunHandle),
}

/// Runs owned by this service, keyed by fingerprint.
///
/// The map lock is only held for lookups and swaps. Case preparation runs
/// under a [`Reservation`], and other submitters of the same fingerprint
/// wait on `changed` until it either starts or is abandoned.
#[derive(Default)]
struct InFlight {
    slots: Mutex<HashMap<Fingerprint, Slot>>,
    changed: Condvar,
    /// Terminal handles the controller can forget.
    retired: Mutex<Vec<RunHandle>>,
}

enum Claim<'a> {
    Attach(RunHandle),
    Reserved(Reservation<'a>),
}

impl InFlight {
    fn slots(&self) -> MutexGuard<'_, HashMap<Fingerprint, Slot>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn claim(&self, fingerprint: &Fingerprint) -> Claim<'_> {
        let mut slots = self.slots();
        loop {
            let preparing = match slots.get(fingerprint) {
                Some(Slot::Running(handle)) => return Claim::Attach(handle.clone()),
                Some(Slot::Preparing) => true,
                None => false,
            };
            if !preparing {
                slots.insert(fingerprint.clone(), Slot::Preparing);
                return Claim::Reserved(Reservation {
                    inflight: self,
                    fingerprint: fingerprint.clone(),
                    started: false,
                });
            }
            slots = self.changed.wait(slots).unwrap_or_else(|e| e.into_inner());
        }
    }

    fn running(&self, fingerprint: &Fingerprint) -> Option<RunHandle> {
        match self.slots().get(fingerprint) {
            Some(Slot::Running(handle)) => Some(handle.clone()),
            _ => None,
        }
    }

    fn running_all(&self) -> Vec<(Fingerprint, RunHandle)> {
        self.slots()
            .iter()
            .filter_map(|(fp, slot)| match slot {
                Slot::Running(handle) => Some((fp.clone(), handle.clone())),
                Slot::Preparing => None,
            })
            .collect()
    }

    fn finish(&self, fingerprint: &Fingerprint, handle: &RunHandle) {
        let mut slots = self.slots();
        if matches!(slots.get(fingerprint), Some(Slot::Running(h)) if h == handle) {
            slots.remove(fingerprint);
        }
        drop(slots);
        self.changed.notify_all();
        self.retired
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handle.clone());
    }

    fn take_retired(&self) -> Vec<RunHandle> {
        std::mem::take(&mut *self.retired.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

/// Exclusive right to start a run for one fingerprint. Dropping it without
/// calling [`start`](Self::start) hands the fingerprint back.
struct Reservation<'a> {
    inflight: &'a InFlight,
    fingerprint: Fingerprint,
    started: bool,
}

impl Reservation<'_> {
    fn start(mut self, controller: &RunController, case: CaseDirectory) -> RunHandle {
        // The controller is called under the lock so the terminal transition
        // always finds the handle in place.
        let mut slots = self.inflight.slots();
        let handle = controller.submit(case);
        slots.insert(self.fingerprint.clone(), Slot::Running(handle.clone()));
        drop(slots);
        self.started = true;
        self.inflight.changed.notify_all();
        handle
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.started {
            return;
        }
        self.inflight.slots().remove(&self.fingerprint);
        self.inflight.changed.notify_all();
    }
}

/// Released runs are gone from the controller; their history is final.
fn settled_or_released(result: RunnerResult<RunStatus>) -> AppResult<()> {
    match result {
        Ok(_) | Err(RunnerError::RunNotFound { .. }) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn emit_progress(
    progress_cb: &mut Option<&mut dyn FnMut(ProgressEvent)>,
    stage: PipelineStage,
    fingerprint: Option<&Fingerprint>,
    started: Instant,
    message: Option<String>,
) {
    if let Some(cb) = progress_cb.as_deref_mut() {
        cb(ProgressEvent::stage(
            stage,
            fingerprint.cloned(),
            started.elapsed().as_secs_f64(),
            message,
        ));
    }
}

/// Case directories live at `<runs>/<fingerprint>/case-N`.
fn fingerprint_of(handle: &RunHandle) -> Option<Fingerprint> {
    handle
        .case_root()
        .parent()?
        .file_name()?
        .to_str()?
        .parse()
        .ok()
}

/// Mirrors run transitions into the history and retires finished runs.
struct HistoryListener {
    history: Arc<RunHistory>,
    inflight: Arc<InFlight>,
}

impl HistoryListener {
    fn apply(&self, fingerprint: &Fingerprint, event: &RunEvent) -> AppResult<()> {
        let snap = &event.snapshot;
        let mut status = snap.status;
        let mut failure = snap.failure.clone();

        if status == RunStatus::Succeeded {
            let stored = match &event.fields {
                Some(fields) => self
                    .history
                    .store_fields(fingerprint, fields)
                    .map_err(|e| e.to_string()),
                None => Err("run reported no fields".to_string()),
            };
            if let Err(reason) = stored {
                status = RunStatus::Failed;
                failure = Some(RunFailure::new(
                    FailureKind::ResultParse,
                    format!("could not store result fields: {reason}"),
                ));
            }
        }
        let summary = match (status, snap.summary) {
            (RunStatus::Succeeded, Some(fields)) => Some(RunSummary::new(&fields, &snap.metrics)),
            _ => None,
        };

        self.history.update(fingerprint, |record| {
            record.status = status;
            if snap.started_at.is_some() {
                record.started_at = snap.started_at.clone();
            }
            record.finished_at = snap.finished_at.clone();
            record.failure = failure;
            record.summary = summary;
        })?;
        Ok(())
    }
}

impl RunListener for HistoryListener {
    fn on_transition(&self, event: &RunEvent) {
        let Some(fingerprint) = fingerprint_of(&event.handle) else {
            warn!(case = %event.handle.case_root().display(), "run outside the run store");
            return;
        };
        if let Err(err) = self.apply(&fingerprint, event) {
            error!(fingerprint = %fingerprint, error = %err, "failed to record run transition");
        }
        if event.to().is_terminal() {
            self.inflight.finish(&fingerprint, &event.handle);
            match self.history.evict_excess() {
                Ok(evicted) if !evicted.is_empty() => {
                    info!(count = evicted.len(), "evicted old runs");
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "eviction failed"),
            }
        }
    }
}

/// Entry point for front ends: validation, caching, dispatch and history.
pub struct PipelineService {
    config: PipelineConfig,
    history: Arc<RunHistory>,
    controller: RunController,
    inflight: Arc<InFlight>,
}

impl PipelineService {
    pub fn new(config: PipelineConfig) -> AppResult<Self> {
        config.validate()?;
        let store = RunStore::new(config.runs_dir.clone())?;
        let history = Arc::new(RunHistory::open(store, config.max_history)?);
        for (fp, reason) in history.corrupt() {
            warn!(fingerprint = %fp, reason = %reason, "corrupt run in history");
        }
        let inflight: Arc<InFlight> = Arc::default();
        let listener = HistoryListener {
            history: Arc::clone(&history),
            inflight: Arc::clone(&inflight),
        };
        let controller =
            RunController::new(config.runner_config()).with_listener(Arc::new(listener));
        Ok(Self {
            config,
            history,
            controller,
            inflight,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn history(&self) -> &RunHistory {
        &self.history
    }

    /// Validate, fingerprint and dispatch a request. Returns at once.
    pub fn submit(
        &self,
        points: &PointSet,
        params: &SimulationParameters,
        options: &RunOptions,
    ) -> AppResult<Submission> {
        self.submit_inner(points, params, options, &mut None, Instant::now())
    }

    fn submit_inner(
        &self,
        points: &PointSet,
        params: &SimulationParameters,
        options: &RunOptions,
        progress_cb: &mut Option<&mut dyn FnMut(ProgressEvent)>,
        started: Instant,
    ) -> AppResult<Submission> {
        emit_progress(progress_cb, PipelineStage::BuildingCurve, None, started, None);
        params.validate()?;
        let curve = af_geometry::build_with(points, &self.config.curve_options())?;
        let fingerprint = compute_fingerprint(points, params)?;
        let fp = Some(&fingerprint);
        emit_progress(progress_cb, PipelineStage::CheckingCache, fp, started, None);
        self.reap();

        let reservation = match self.inflight.claim(&fingerprint) {
            Claim::Attach(handle) => {
                info!(fingerprint = %fingerprint, "attaching to in-flight run");
                emit_progress(progress_cb, PipelineStage::AttachingToRun, fp, started, None);
                return Ok(Submission {
                    fingerprint: fingerprint.clone(),
                    outcome: SubmitOutcome::Attached,
                    handle: Some(handle),
                });
            }
            Claim::Reserved(reservation) => reservation,
        };

        let previous = match self.history.lookup(&fingerprint) {
            Ok(previous) => previous,
            Err(ResultsError::CacheCorruption { reason, .. }) if !options.use_cache => {
                warn!(fingerprint = %fingerprint, reason = %reason, "overwriting corrupt run");
                None
            }
            Err(err) => return Err(err.into()),
        };
        if let Some(record) = &previous {
            if options.use_cache && record.is_reusable() {
                info!(fingerprint = %fingerprint, "cache hit");
                emit_progress(progress_cb, PipelineStage::LoadingCachedResult, fp, started, None);
                return Ok(Submission {
                    fingerprint: fingerprint.clone(),
                    outcome: SubmitOutcome::Cached,
                    handle: None,
                });
            }
        }

        let store = self.history.store();
        let mut attempt = previous.as_ref().map_or(1, |r| r.attempt + 1);
        while store.case_dir(&fingerprint, attempt).exists() {
            attempt += 1;
        }
        let case_root = store.case_dir(&fingerprint, attempt);
        let earlier_case = previous
            .as_ref()
            .filter(|r| !r.evicted)
            .and_then(|r| r.case_dir.clone())
            .filter(|dir| dir.join(CASE_MANIFEST).is_file());

        // Earlier attempts stay on disk until the run is evicted.
        let case = match earlier_case {
            Some(dir) => {
                emit_progress(
                    progress_cb,
                    PipelineStage::ConfiguringCase,
                    fp,
                    started,
                    Some(format!("copying {}", dir.display())),
                );
                prepare_rerun(&CaseDirectory::open(&dir)?, &case_root)?
            }
            None => {
                emit_progress(progress_cb, PipelineStage::ExportingGeometry, fp, started, None);
                let mesh = af_geometry::export(&curve, params.extrusion_depth, params.domain)?;
                emit_progress(progress_cb, PipelineStage::ConfiguringCase, fp, started, None);
                configure_with(&mesh, params, &case_root, self.config.stl_format.into())?
            }
        };
        store.delete_fields(&fingerprint)?;

        let mut record = RunRecord::new(RunRequest {
            points: points.clone(),
            parameters: params.clone(),
        })?;
        record.attempt = attempt;
        record.case_dir = Some(case.root().to_path_buf());
        record.reynolds_number = Some(params.reynolds_number(curve.chord()));
        self.history.record(record)?;

        let handle = reservation.start(&self.controller, case);
        info!(fingerprint = %fingerprint, attempt, "run started");
        emit_progress(progress_cb, PipelineStage::Queued, fp, started, None);
        Ok(Submission {
            fingerprint,
            outcome: SubmitOutcome::Started,
            handle: Some(handle),
        })
    }

    /// Submit and block until the run is terminal (or the timeout passes).
    pub fn ensure_run(
        &self,
        points: &PointSet,
        params: &SimulationParameters,
        options: &RunOptions,
    ) -> AppResult<RunResponse> {
        self.ensure_run_with_progress(points, params, options, None)
    }

    /// Like [`ensure_run`](Self::ensure_run), streaming progress events.
    pub fn ensure_run_with_progress(
        &self,
        points: &PointSet,
        params: &SimulationParameters,
        options: &RunOptions,
        mut progress_cb: Option<&mut dyn FnMut(ProgressEvent)>,
    ) -> AppResult<RunResponse> {
        let started = Instant::now();
        let submission = self.submit_inner(points, params, options, &mut progress_cb, started)?;
        let fp = submission.fingerprint.clone();

        if let Some(handle) = &submission.handle {
            self.follow(handle, &fp, options, &mut progress_cb, started)?;
        }
        let record = self
            .history
            .lookup(&fp)?
            .ok_or_else(|| AppError::RunNotFound(fp.to_string()))?;
        if record.status.is_terminal() {
            emit_progress(&mut progress_cb, record.status.into(), Some(&fp), started, None);
        }
        Ok(RunResponse {
            fingerprint: fp,
            record,
            loaded_from_cache: submission.outcome == SubmitOutcome::Cached,
            attached: submission.outcome == SubmitOutcome::Attached,
        })
    }

    fn follow(
        &self,
        handle: &RunHandle,
        fingerprint: &Fingerprint,
        options: &RunOptions,
        progress_cb: &mut Option<&mut dyn FnMut(ProgressEvent)>,
        started: Instant,
    ) -> AppResult<()> {
        let mut last: Option<(RunStatus, u32)> = None;
        loop {
            let snap = match self.controller.snapshot(handle) {
                Ok(snap) => snap,
                Err(RunnerError::RunNotFound { .. }) => return Ok(()),
                Err(err) => return Err(err.into()),
            };
            let key = (snap.status, snap.metrics.iterations);
            if last != Some(key) && !snap.status.is_terminal() {
                if let Some(cb) = progress_cb.as_deref_mut() {
                    let mut event = ProgressEvent::stage(
                        snap.status.into(),
                        Some(fingerprint.clone()),
                        started.elapsed().as_secs_f64(),
                        None,
                    );
                    if snap.status == RunStatus::Solving {
                        event.iteration = Some(snap.metrics.iterations);
                        event.residual = snap.metrics.final_residual;
                    }
                    cb(event);
                }
                last = Some(key);
            }
            if snap.status.is_terminal() {
                // Returns once the history reflects the final state.
                return settled_or_released(self.controller.wait(handle, None));
            }
            if options.timeout.is_some_and(|t| started.elapsed() >= t) {
                return Ok(());
            }
            thread::sleep(options.poll_interval);
        }
    }

    /// Block until the run for `fingerprint` is terminal and return its record.
    pub fn wait(&self, fingerprint: &Fingerprint, timeout: Option<Duration>) -> AppResult<RunRecord> {
        if let Some(handle) = self.inflight.running(fingerprint) {
            settled_or_released(self.controller.wait(&handle, timeout))?;
        }
        self.reap();
        self.history
            .lookup(fingerprint)?
            .ok_or_else(|| AppError::RunNotFound(fingerprint.to_string()))
    }

    /// Replay the stored request of an earlier run.
    pub fn rerun(&self, fingerprint: &Fingerprint, options: &RunOptions) -> AppResult<Submission> {
        let request = self.load_request(fingerprint)?;
        self.submit(&request.points, &request.parameters, options)
    }

    pub fn rerun_and_wait(
        &self,
        fingerprint: &Fingerprint,
        options: &RunOptions,
        progress_cb: Option<&mut dyn FnMut(ProgressEvent)>,
    ) -> AppResult<RunResponse> {
        let request = self.load_request(fingerprint)?;
        self.ensure_run_with_progress(&request.points, &request.parameters, options, progress_cb)
    }

    pub fn load_request(&self, fingerprint: &Fingerprint) -> AppResult<RunRequest> {
        self.history
            .lookup(fingerprint)?
            .map(|r| r.request)
            .ok_or_else(|| AppError::RunNotFound(fingerprint.to_string()))
    }

    pub fn cancel(&self, fingerprint: &Fingerprint) -> AppResult<RunStatus> {
        let handle = self
            .inflight
            .running(fingerprint)
            .ok_or_else(|| AppError::RunNotFound(format!("no active run {fingerprint}")))?;
        Ok(self.controller.cancel(&handle)?)
    }

    /// Live state of an in-flight run.
    pub fn live_snapshot(&self, fingerprint: &Fingerprint) -> Option<RunSnapshot> {
        let handle = self.inflight.running(fingerprint)?;
        self.controller.snapshot(&handle).ok()
    }

    /// Every known run, most recent first.
    pub fn list_history(&self) -> Vec<RunRecord> {
        self.reap();
        self.history.list()
    }

    pub fn fields(&self, fingerprint: &Fingerprint) -> AppResult<ResultFields> {
        if let Some(snap) = self.live_snapshot(fingerprint) {
            if !snap.status.is_terminal() {
                return Err(AppError::NotReady {
                    status: snap.status,
                });
            }
        }
        self.reap();
        Ok(self.history.fields(fingerprint)?)
    }

    /// Cancel every run this service started and wait for each to settle.
    /// Returns the fingerprints that were still running.
    pub fn shutdown(&self, timeout: Option<Duration>) -> Vec<Fingerprint> {
        let running = self.inflight.running_all();
        for (fingerprint, handle) in &running {
            match self.controller.cancel(handle) {
                Ok(status) => info!(fingerprint = %fingerprint, status = %status, "run stopped"),
                Err(err) => warn!(fingerprint = %fingerprint, error = %err, "cancel failed"),
            }
        }
        for (fingerprint, handle) in &running {
            if let Err(err) = settled_or_released(self.controller.wait(handle, timeout)) {
                warn!(fingerprint = %fingerprint, error = %err, "run did not settle");
            }
        }
        self.reap();
        running.into_iter().map(|(fp, _)| fp).collect()
    }

    /// Runs the controller still holds in memory.
    pub fn tracked_runs(&self) -> usize {
        self.reap();
        self.controller.tracked()
    }

    /// Let the controller drop finished runs; their history is already saved.
    fn reap(&self) {
        for handle in self.inflight.take_retired() {
            if !self.controller.release(&handle) {
                debug!(case = %handle.case_root().display(), "run already released");
            }
        }
    }

    /// Full fingerprint from a unique prefix.
    pub fn resolve(&self, prefix: &str) -> AppResult<Fingerprint> {
        Ok(self.history.resolve(prefix)?)
    }
}
