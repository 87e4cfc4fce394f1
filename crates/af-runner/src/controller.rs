//! Run supervision: one thread per run walking the mesher and solver stages.

use std::collections::{HashMap, VecDeque};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::Child;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use af_case::CaseDirectory;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{CommandSpec, RunnerConfig};
use crate::error::{RunnerError, RunnerResult};
use crate::fields::{self, FieldSummary, ResultFields};
use crate::gate::{ConcurrencyGate, Ticket};
use crate::launcher::{self, Launcher, SystemLauncher};
use crate::listener::{NoopListener, RunEvent, RunListener};
use crate::monitor::{LogMonitor, MonitorSignal, SolveMetrics};
use crate::status::{FailureKind, RunFailure, RunStatus, Stage};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Files the mesher must leave in `constant/polyMesh`.
pub const POLY_MESH_FILES: [&str; 5] = ["points", "faces", "owner", "neighbour", "boundary"];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunHandle {
    id: Uuid,
    case_root: PathBuf,
}

impl RunHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn case_root(&self) -> &Path {
        &self.case_root
    }
}

/// Point-in-time view of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSnapshot {
    pub status: RunStatus,
    pub failure: Option<RunFailure>,
    pub metrics: SolveMetrics,
    pub summary: Option<FieldSummary>,
    pub submitted_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

#[derive(Debug)]
struct RunState {
    snapshot: RunSnapshot,
    fields: Option<Arc<ResultFields>>,
    pid: Option<u32>,
    /// Terminal and already reported to the listener.
    settled: bool,
}

struct RunShared {
    handle: RunHandle,
    state: Mutex<RunState>,
    settled: Condvar,
    cancelled: AtomicBool,
    emit: Mutex<()>,
    listener: Arc<dyn RunListener>,
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

impl RunShared {
    fn lock(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Apply `update` and move to `to` if the move is legal. Listener calls
    /// for one run never interleave.
    fn transition(&self, to: RunStatus, update: impl FnOnce(&mut RunState)) -> bool {
        let _emit = self.emit.lock().unwrap_or_else(|e| e.into_inner());
        let event = {
            let mut state = self.lock();
            let from = state.snapshot.status;
            if !from.can_transition_to(to) {
                return false;
            }
            update(&mut state);
            state.snapshot.status = to;
            if to == RunStatus::Meshing {
                state.snapshot.started_at = Some(now());
            }
            if to.is_terminal() {
                state.snapshot.finished_at = Some(now());
            }
            RunEvent {
                handle: self.handle.clone(),
                from,
                snapshot: state.snapshot.clone(),
                fields: state.fields.clone(),
            }
        };
        info!(run = %self.handle.id, from = %event.from, to = %to, "run transition");
        self.listener.on_transition(&event);

        if to.is_terminal() {
            self.lock().settled = true;
            self.settled.notify_all();
        }
        true
    }

    fn fail(&self, failure: RunFailure) {
        warn!(run = %self.handle.id, kind = %failure.kind, detail = %failure.detail, "run failed");
        self.transition(RunStatus::Failed, |state| {
            state.snapshot.failure = Some(failure);
        });
    }
}

/// Schedules runs and exposes their state. Cheap to share behind an `Arc`.
pub struct RunController {
    config: RunnerConfig,
    launcher: Arc<dyn Launcher>,
    listener: Arc<dyn RunListener>,
    gate: Arc<ConcurrencyGate>,
    runs: Mutex<HashMap<Uuid, Arc<RunShared>>>,
}

impl RunController {
    pub fn new(config: RunnerConfig) -> Self {
        let gate = ConcurrencyGate::new(config.max_concurrent_runs);
        Self {
            config,
            launcher: Arc::new(SystemLauncher),
            listener: Arc::new(NoopListener),
            gate,
            runs: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn Launcher>) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn RunListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    fn runs(&self) -> MutexGuard<'_, HashMap<Uuid, Arc<RunShared>>> {
        self.runs.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn shared(&self, handle: &RunHandle) -> RunnerResult<Arc<RunShared>> {
        self.runs()
            .get(&handle.id)
            .cloned()
            .ok_or_else(|| RunnerError::RunNotFound {
                run_id: handle.id.to_string(),
            })
    }

    /// Queue a run for `case`. Returns immediately; the run starts `Pending`.
    pub fn submit(&self, case: CaseDirectory) -> RunHandle {
        let handle = RunHandle {
            id: Uuid::new_v4(),
            case_root: case.root().to_path_buf(),
        };
        let shared = Arc::new(RunShared {
            handle: handle.clone(),
            state: Mutex::new(RunState {
                snapshot: RunSnapshot {
                    status: RunStatus::Pending,
                    failure: None,
                    metrics: SolveMetrics::default(),
                    summary: None,
                    submitted_at: now(),
                    started_at: None,
                    finished_at: None,
                },
                fields: None,
                pid: None,
                settled: false,
            }),
            settled: Condvar::new(),
            cancelled: AtomicBool::new(false),
            emit: Mutex::new(()),
            listener: Arc::clone(&self.listener),
        });
        self.runs().insert(handle.id, Arc::clone(&shared));

        let ticket = self.gate.enqueue();
        let ctx = Supervisor {
            shared,
            case,
            config: self.config.clone(),
            launcher: Arc::clone(&self.launcher),
            gate: Arc::clone(&self.gate),
        };
        info!(run = %handle.id, case = %handle.case_root.display(), "run submitted");
        thread::spawn(move || ctx.run(ticket));
        handle
    }

    pub fn poll(&self, handle: &RunHandle) -> RunnerResult<RunStatus> {
        Ok(self.shared(handle)?.lock().snapshot.status)
    }

    pub fn snapshot(&self, handle: &RunHandle) -> RunnerResult<RunSnapshot> {
        Ok(self.shared(handle)?.lock().snapshot.clone())
    }

    /// Stop the run and its process tree. Files stay where they are.
    pub fn cancel(&self, handle: &RunHandle) -> RunnerResult<RunStatus> {
        let shared = self.shared(handle)?;
        shared.cancelled.store(true, Ordering::SeqCst);
        shared.transition(RunStatus::Cancelled, |_| {});
        let pid = shared.lock().pid;
        if let Some(pid) = pid {
            debug!(run = %handle.id, pid, "killing process group");
            launcher::kill_tree(pid);
        }
        let status = shared.lock().snapshot.status;
        Ok(status)
    }

    /// Result fields of a succeeded run.
    pub fn collect(&self, handle: &RunHandle) -> RunnerResult<ResultFields> {
        let shared = self.shared(handle)?;
        let state = shared.lock();
        match (&state.fields, state.snapshot.status) {
            (Some(fields), RunStatus::Succeeded) => Ok(ResultFields::clone(fields)),
            (_, status) => Err(RunnerError::NotReady { status }),
        }
    }

    /// Block until the run is terminal or `timeout` elapses, returning the
    /// status at that point.
    pub fn wait(&self, handle: &RunHandle, timeout: Option<Duration>) -> RunnerResult<RunStatus> {
        let shared = self.shared(handle)?;
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = shared.lock();
        while !state.settled {
            let slice = match deadline {
                Some(d) => {
                    let left = d.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        break;
                    }
                    left.min(POLL_INTERVAL)
                }
                None => POLL_INTERVAL,
            };
            state = match shared.settled.wait_timeout(state, slice) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        Ok(state.snapshot.status)
    }

    /// Runs still held in memory, finished or not.
    pub fn tracked(&self) -> usize {
        self.runs().len()
    }

    /// Drop bookkeeping for a terminal run.
    pub fn release(&self, handle: &RunHandle) -> bool {
        let mut runs = self.runs();
        let terminal = runs
            .get(&handle.id)
            .is_some_and(|s| s.lock().snapshot.status.is_terminal());
        if terminal {
            runs.remove(&handle.id);
        }
        terminal
    }
}

struct Supervisor {
    shared: Arc<RunShared>,
    case: CaseDirectory,
    config: RunnerConfig,
    launcher: Arc<dyn Launcher>,
    gate: Arc<ConcurrencyGate>,
}

/// Outcome of a stage that did not exit cleanly.
enum StageEnd {
    Cancelled,
    Failed(RunFailure),
}

enum Stop {
    Abort(String),
    Timeout,
}

fn failure_kind(stage: Stage, stop: Option<&Stop>) -> FailureKind {
    match (stage, stop) {
        (Stage::Mesh, _) => FailureKind::MeshingFailed,
        (Stage::Solve, Some(Stop::Timeout)) => FailureKind::SolverTimeout,
        (Stage::Solve, _) => FailureKind::SolverDivergence,
    }
}

fn copy_dir(src: &Path, dst: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let to = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &to)?;
        } else {
            fs::copy(entry.path(), to)?;
        }
    }
    Ok(())
}

fn spawn_reader<R: Read + Send + 'static>(
    source: R,
    tx: mpsc::Sender<String>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        for line in BufReader::new(source).lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    })
}

impl Supervisor {
    fn run(self, ticket: Ticket) {
        let Some(_permit) = self.gate.acquire(ticket, &self.shared.cancelled) else {
            return;
        };
        if !self.shared.transition(RunStatus::Meshing, |_| {}) {
            return;
        }

        match self.run_stage(Stage::Mesh) {
            Ok(_) => {}
            Err(StageEnd::Cancelled) => return,
            Err(StageEnd::Failed(failure)) => return self.shared.fail(failure),
        }
        if let Err(failure) = self.adopt_mesh() {
            return self.shared.fail(failure);
        }

        if !self.shared.transition(RunStatus::Solving, |_| {}) {
            return;
        }
        let monitor = match self.run_stage(Stage::Solve) {
            Ok(monitor) => monitor,
            Err(StageEnd::Cancelled) => return,
            Err(StageEnd::Failed(failure)) => return self.shared.fail(failure),
        };
        if self.shared.is_cancelled() {
            return;
        }

        let run_dir = self.case.run_dir();
        let fields = match fields::read_latest(&run_dir) {
            Ok(fields) => fields,
            Err(err) => {
                return self
                    .shared
                    .fail(RunFailure::new(FailureKind::ResultParse, err.to_string()));
            }
        };
        let mut metrics = monitor.metrics().clone();
        if metrics.iterations == 0 {
            metrics.iterations = fields.time.parse::<f64>().map_or(0, |t| t.round() as u32);
        }
        if !metrics.converged {
            let tolerance = self
                .case
                .load_manifest()
                .map(|m| m.parameters.tolerance)
                .ok();
            metrics.converged = matches!(
                (metrics.final_residual, tolerance),
                (Some(r), Some(tol)) if r <= tol
            );
        }
        let summary = fields.summary();
        self.shared.transition(RunStatus::Succeeded, |state| {
            state.snapshot.metrics = metrics;
            state.snapshot.summary = Some(summary);
            state.fields = Some(Arc::new(fields));
        });
    }

    /// Check the mesher's output and hand the mesh to the solver stage.
    fn adopt_mesh(&self) -> Result<(), RunFailure> {
        let poly = self.case.mesh_dir().join("constant").join("polyMesh");
        let missing: Vec<&str> = POLY_MESH_FILES
            .iter()
            .copied()
            .filter(|f| !poly.join(f).is_file())
            .collect();
        if !missing.is_empty() {
            return Err(RunFailure::new(
                FailureKind::MeshingFailed,
                format!("mesher produced no polyMesh {}", missing.join(", ")),
            ));
        }
        let dest = self.case.run_dir().join("constant").join("polyMesh");
        copy_dir(&poly, &dest).map_err(|e| {
            RunFailure::new(
                FailureKind::MeshingFailed,
                format!("failed to copy mesh into {}: {e}", dest.display()),
            )
        })
    }

    fn spawn_with_retry(&self, stage: Stage, command: &CommandSpec, cwd: &Path) -> Result<Child, StageEnd> {
        let mut delay = self.config.launch_backoff;
        let mut attempt = 0;
        loop {
            match self.launcher.spawn(command, cwd) {
                Ok(child) => return Ok(child),
                Err(err) if launcher::is_transient(&err) && attempt < self.config.launch_retries => {
                    attempt += 1;
                    warn!(
                        run = %self.shared.handle.id,
                        ?stage,
                        attempt,
                        error = %err,
                        "launch failed, retrying"
                    );
                    thread::sleep(delay);
                    delay = delay.saturating_mul(2);
                    if self.shared.is_cancelled() {
                        return Err(StageEnd::Cancelled);
                    }
                }
                Err(err) => {
                    return Err(StageEnd::Failed(RunFailure::new(
                        FailureKind::ProcessLaunchError,
                        format!(
                            "failed to launch `{command}` in {} after {attempt} retries: {err}",
                            cwd.display()
                        ),
                    )));
                }
            }
        }
    }

    /// Run one external stage to completion, streaming its output into the
    /// stage log and the monitor.
    fn run_stage(&self, stage: Stage) -> Result<LogMonitor, StageEnd> {
        let (command, cwd, timeout) = match stage {
            Stage::Mesh => (&self.config.mesher, self.case.mesh_dir(), self.config.mesher_timeout),
            Stage::Solve => (&self.config.solver, self.case.run_dir(), self.config.solver_timeout),
        };
        let log_path = self.case.root().join(stage.log_name());
        let io_failure = |what: &str, err: std::io::Error| {
            StageEnd::Failed(RunFailure::new(failure_kind(stage, None), format!("{what}: {err}")))
        };
        let mut log = File::create(&log_path)
            .map(BufWriter::new)
            .map_err(|e| io_failure("cannot create stage log", e))?;

        let mut child = self.spawn_with_retry(stage, command, &cwd)?;
        let pid = child.id();
        self.shared.lock().pid = Some(pid);
        if self.shared.is_cancelled() {
            launcher::kill_tree(pid);
        }
        info!(run = %self.shared.handle.id, ?stage, pid, command = %command, "stage started");

        let (tx, rx) = mpsc::channel();
        let mut readers = Vec::new();
        if let Some(out) = child.stdout.take() {
            readers.push(spawn_reader(out, tx.clone()));
        }
        if let Some(err) = child.stderr.take() {
            readers.push(spawn_reader(err, tx.clone()));
        }
        drop(tx);

        let started = Instant::now();
        let mut monitor = LogMonitor::new(self.config.divergence_residual);
        let mut tail: VecDeque<String> = VecDeque::with_capacity(self.config.log_excerpt_lines);
        let mut stop: Option<Stop> = None;
        let mut killed = false;
        let mut log_ok = true;
        loop {
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(line) => {
                    if log_ok {
                        if let Err(err) = writeln!(log, "{line}") {
                            warn!(
                                run = %self.shared.handle.id,
                                ?stage,
                                log = %log_path.display(),
                                error = %err,
                                "stage log write failed, monitoring continues without it"
                            );
                            log_ok = false;
                        }
                    }
                    if stop.is_none() {
                        let before = monitor.metrics().iterations;
                        if let MonitorSignal::Abort(reason) = monitor.observe(&line) {
                            launcher::kill_tree(pid);
                            let _ = child.kill();
                            stop = Some(Stop::Abort(reason));
                        } else if stage == Stage::Solve && monitor.metrics().iterations != before {
                            self.shared.lock().snapshot.metrics = monitor.metrics().clone();
                        }
                    }
                    if tail.len() == self.config.log_excerpt_lines {
                        tail.pop_front();
                    }
                    if self.config.log_excerpt_lines > 0 {
                        tail.push_back(line);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            if !killed && self.shared.is_cancelled() {
                let _ = child.kill();
                killed = true;
            }
            if stop.is_none() && started.elapsed() > timeout {
                launcher::kill_tree(pid);
                let _ = child.kill();
                stop = Some(Stop::Timeout);
            }
        }
        for reader in readers {
            let _ = reader.join();
        }
        let exit = child.wait();
        if log_ok {
            if let Err(err) = log.flush() {
                warn!(run = %self.shared.handle.id, ?stage, error = %err, "stage log flush failed");
            }
        }
        self.shared.lock().pid = None;

        if self.shared.is_cancelled() {
            return Err(StageEnd::Cancelled);
        }
        let excerpt: Vec<String> = tail.into_iter().collect();
        let kind = failure_kind(stage, stop.as_ref());
        let detail = match (&stop, exit) {
            (Some(Stop::Abort(reason)), _) => reason.clone(),
            (Some(Stop::Timeout), _) => format!("{stage:?} stage timed out after {}s", timeout.as_secs_f64()),
            (None, Ok(status)) if status.success() => {
                debug!(run = %self.shared.handle.id, ?stage, "stage finished");
                return Ok(monitor);
            }
            (None, Ok(status)) => format!("`{command}` exited with {status}"),
            (None, Err(err)) => format!("failed to wait for `{command}`: {err}"),
        };
        Err(StageEnd::Failed(RunFailure::new(kind, detail).with_excerpt(excerpt)))
    }
}
