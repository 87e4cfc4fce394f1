#![cfg(unix)]

use std::io;
use std::path::Path;
use std::process::Child;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use af_case::{CaseDirectory, SimulationParameters, configure};
use af_geometry::{DomainBounds, PointSet};
use af_runner::{
    CommandSpec, FailureKind, Launcher, RunController, RunEvent, RunHandle, RunStatus,
    RunnerConfig, RunnerError, SystemLauncher,
};

const MESH_OK: &str = r#"mkdir -p constant/polyMesh
for f in points faces owner neighbour boundary; do echo "(0 0 0)" > constant/polyMesh/$f; done
echo "Mesh OK""#;

const SOLVE_OK: &str = r#"echo "Time = 1"
echo "smoothSolver:  Solving for Ux, Initial residual = 0.5, Final residual = 0.01, No Iterations 2"
echo "Time = 2"
echo "GAMG:  Solving for p, Initial residual = 1e-06, Final residual = 1e-08, No Iterations 4"
mkdir -p 2
printf 'internalField nonuniform List<scalar> 2(1.5 -0.5);\n' > 2/p
printf 'internalField nonuniform List<vector> 2((1 0 0) (0 2 0));\n' > 2/U
echo "End""#;

fn sh(script: &str) -> CommandSpec {
    CommandSpec::new("sh", &["-c", script])
}

fn config(mesher: &str, solver: &str) -> RunnerConfig {
    RunnerConfig {
        mesher: sh(mesher),
        solver: sh(solver),
        launch_backoff: Duration::from_millis(10),
        ..Default::default()
    }
}

fn make_case(root: &Path, name: &str) -> CaseDirectory {
    let points = PointSet::from_xy(&[(0.0, 0.0), (0.3, 0.08), (1.0, 0.0), (0.3, -0.04)]);
    let curve = af_geometry::build(&points).unwrap();
    let mesh = af_geometry::export(&curve, 0.1, DomainBounds::default()).unwrap();
    configure(&mesh, &SimulationParameters::default(), &root.join(name)).unwrap()
}

fn wait_for(controller: &RunController, handle: &RunHandle, status: RunStatus) {
    let start = Instant::now();
    while controller.poll(handle).unwrap() != status {
        assert!(start.elapsed() < Duration::from_secs(20), "never reached {status}");
        std::thread::sleep(Duration::from_millis(10));
    }
}

fn finish(controller: &RunController, handle: &RunHandle) -> RunStatus {
    controller
        .wait(handle, Some(Duration::from_secs(30)))
        .unwrap()
}

fn failure_kind(controller: &RunController, handle: &RunHandle) -> FailureKind {
    controller.snapshot(handle).unwrap().failure.unwrap().kind
}

#[test]
fn successful_run_walks_every_stage() {
    let dir = tempfile::tempdir().unwrap();
    let case = make_case(dir.path(), "ok");
    let events: Arc<Mutex<Vec<(RunStatus, RunStatus)>>> = Arc::default();
    let sink = Arc::clone(&events);
    let controller = RunController::new(config(MESH_OK, SOLVE_OK)).with_listener(Arc::new(
        move |e: &RunEvent| sink.lock().unwrap().push((e.from, e.to())),
    ));

    let handle = controller.submit(case.clone());
    assert_eq!(finish(&controller, &handle), RunStatus::Succeeded);
    assert_eq!(
        *events.lock().unwrap(),
        vec![
            (RunStatus::Pending, RunStatus::Meshing),
            (RunStatus::Meshing, RunStatus::Solving),
            (RunStatus::Solving, RunStatus::Succeeded),
        ]
    );

    let fields = controller.collect(&handle).unwrap();
    assert_eq!(fields.time, "2");
    assert_eq!(fields.pressure, vec![1.5, -0.5]);

    let snap = controller.snapshot(&handle).unwrap();
    assert_eq!(snap.metrics.iterations, 2);
    assert!(snap.metrics.converged);
    assert_eq!(snap.summary.unwrap().max_velocity, 2.0);
    assert!(snap.finished_at.is_some());

    assert!(case.run_dir().join("constant/polyMesh/owner").is_file());
    let log = std::fs::read_to_string(case.root().join("solve.log")).unwrap();
    assert!(log.contains("Time = 2"));
}

#[test]
fn missing_mesh_output_fails_meshing() {
    let dir = tempfile::tempdir().unwrap();
    let controller = RunController::new(config("echo meshing", SOLVE_OK));
    let handle = controller.submit(make_case(dir.path(), "nomesh"));
    assert_eq!(finish(&controller, &handle), RunStatus::Failed);
    assert_eq!(failure_kind(&controller, &handle), FailureKind::MeshingFailed);
    assert!(matches!(
        controller.collect(&handle),
        Err(RunnerError::NotReady {
            status: RunStatus::Failed
        })
    ));
}

#[test]
fn fatal_mesher_line_fails_with_excerpt() {
    let dir = tempfile::tempdir().unwrap();
    let mesher = "echo 'Reading STL'; echo '--> FOAM FATAL ERROR: bad surface' >&2; sleep 30";
    let controller = RunController::new(config(mesher, SOLVE_OK));
    let handle = controller.submit(make_case(dir.path(), "fatal"));
    let start = Instant::now();
    assert_eq!(finish(&controller, &handle), RunStatus::Failed);
    assert!(start.elapsed() < Duration::from_secs(20));
    let failure = controller.snapshot(&handle).unwrap().failure.unwrap();
    assert_eq!(failure.kind, FailureKind::MeshingFailed);
    assert!(failure.log_excerpt.iter().any(|l| l.contains("FOAM FATAL")));
}

#[test]
fn diverging_residual_stops_solver() {
    let dir = tempfile::tempdir().unwrap();
    let solver = "echo 'Time = 1'; echo 'Solving for p, Initial residual = nan, Final residual = nan'; sleep 30";
    let controller = RunController::new(config(MESH_OK, solver));
    let handle = controller.submit(make_case(dir.path(), "diverge"));
    assert_eq!(finish(&controller, &handle), RunStatus::Failed);
    assert_eq!(failure_kind(&controller, &handle), FailureKind::SolverDivergence);
}

#[test]
fn non_zero_exit_is_divergence_with_code() {
    let dir = tempfile::tempdir().unwrap();
    let controller = RunController::new(config(MESH_OK, "echo 'Time = 1'; exit 3"));
    let handle = controller.submit(make_case(dir.path(), "exit3"));
    assert_eq!(finish(&controller, &handle), RunStatus::Failed);
    let failure = controller.snapshot(&handle).unwrap().failure.unwrap();
    assert_eq!(failure.kind, FailureKind::SolverDivergence);
    assert!(failure.detail.contains('3'), "{}", failure.detail);
}

#[test]
fn solver_timeout_kills_process() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = RunnerConfig {
        solver_timeout: Duration::from_millis(300),
        ..config(MESH_OK, "sleep 30")
    };
    let controller = RunController::new(cfg);
    let handle = controller.submit(make_case(dir.path(), "slow"));
    let start = Instant::now();
    assert_eq!(finish(&controller, &handle), RunStatus::Failed);
    assert!(start.elapsed() < Duration::from_secs(20));
    assert_eq!(failure_kind(&controller, &handle), FailureKind::SolverTimeout);
}

#[test]
fn unparseable_results_fail_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let solver = "mkdir -p 5; echo 'internalField bogus;' > 5/p; echo 'internalField bogus;' > 5/U";
    let controller = RunController::new(config(MESH_OK, solver));
    let handle = controller.submit(make_case(dir.path(), "garbage"));
    assert_eq!(finish(&controller, &handle), RunStatus::Failed);
    assert_eq!(failure_kind(&controller, &handle), FailureKind::ResultParse);
}

#[test]
fn cancel_during_solve_stops_everything() {
    let dir = tempfile::tempdir().unwrap();
    let controller = RunController::new(config(MESH_OK, "echo started; sleep 30"));
    let case = make_case(dir.path(), "cancel");
    let handle = controller.submit(case.clone());
    wait_for(&controller, &handle, RunStatus::Solving);

    let start = Instant::now();
    assert_eq!(controller.cancel(&handle).unwrap(), RunStatus::Cancelled);
    assert_eq!(finish(&controller, &handle), RunStatus::Cancelled);
    assert!(start.elapsed() < Duration::from_secs(10));
    assert!(controller.collect(&handle).is_err());
    // Files are left for inspection.
    assert!(case.run_dir().join("constant/polyMesh/points").is_file());
    // Cancelling twice is harmless.
    assert_eq!(controller.cancel(&handle).unwrap(), RunStatus::Cancelled);
}

#[test]
fn queued_runs_respect_limit_and_can_be_cancelled() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = RunnerConfig {
        max_concurrent_runs: 1,
        ..config(MESH_OK, "sleep 30")
    };
    let controller = RunController::new(cfg);
    let first = controller.submit(make_case(dir.path(), "first"));
    wait_for(&controller, &first, RunStatus::Solving);
    let second = controller.submit(make_case(dir.path(), "second"));
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(controller.poll(&second).unwrap(), RunStatus::Pending);

    controller.cancel(&second).unwrap();
    assert_eq!(finish(&controller, &second), RunStatus::Cancelled);
    assert!(controller.snapshot(&second).unwrap().started_at.is_none());
    controller.cancel(&first).unwrap();
    assert_eq!(finish(&controller, &first), RunStatus::Cancelled);
}

#[test]
fn never_more_active_runs_than_the_limit() {
    let dir = tempfile::tempdir().unwrap();
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (a, p) = (Arc::clone(&active), Arc::clone(&peak));
    let cfg = RunnerConfig {
        max_concurrent_runs: 2,
        ..config(MESH_OK, &format!("sleep 0.2; {SOLVE_OK}"))
    };
    let controller = RunController::new(cfg).with_listener(Arc::new(move |e: &RunEvent| {
        if e.to() == RunStatus::Meshing {
            let now = a.fetch_add(1, Ordering::SeqCst) + 1;
            p.fetch_max(now, Ordering::SeqCst);
        } else if e.to().is_terminal() && e.from != RunStatus::Pending {
            a.fetch_sub(1, Ordering::SeqCst);
        }
    }));
    let handles: Vec<RunHandle> = (0..4)
        .map(|i| controller.submit(make_case(dir.path(), &format!("run{i}"))))
        .collect();
    for h in &handles {
        assert_eq!(finish(&controller, h), RunStatus::Succeeded);
    }
    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert!(peak.load(Ordering::SeqCst) >= 1);
}

struct FlakyLauncher {
    failures: usize,
    kind: io::ErrorKind,
    attempts: AtomicUsize,
}

impl Launcher for FlakyLauncher {
    fn spawn(&self, command: &CommandSpec, cwd: &Path) -> io::Result<Child> {
        let n = self.attempts.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            return Err(io::Error::from(self.kind));
        }
        SystemLauncher.spawn(command, cwd)
    }
}

fn flaky(failures: usize, kind: io::ErrorKind) -> Arc<FlakyLauncher> {
    Arc::new(FlakyLauncher {
        failures,
        kind,
        attempts: AtomicUsize::new(0),
    })
}

#[test]
fn transient_launch_errors_are_retried() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = flaky(2, io::ErrorKind::WouldBlock);
    let controller =
        RunController::new(config(MESH_OK, SOLVE_OK)).with_launcher(launcher.clone());
    let handle = controller.submit(make_case(dir.path(), "retry"));
    assert_eq!(finish(&controller, &handle), RunStatus::Succeeded);
    // Two failures, then the mesher and the solver.
    assert_eq!(launcher.attempts.load(Ordering::SeqCst), 4);
}

#[test]
fn exhausted_or_permanent_launch_errors_fail() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = flaky(usize::MAX, io::ErrorKind::WouldBlock);
    let controller =
        RunController::new(config(MESH_OK, SOLVE_OK)).with_launcher(launcher.clone());
    let handle = controller.submit(make_case(dir.path(), "exhausted"));
    assert_eq!(finish(&controller, &handle), RunStatus::Failed);
    assert_eq!(failure_kind(&controller, &handle), FailureKind::ProcessLaunchError);
    assert_eq!(launcher.attempts.load(Ordering::SeqCst), 4);

    let launcher = flaky(usize::MAX, io::ErrorKind::NotFound);
    let controller =
        RunController::new(config(MESH_OK, SOLVE_OK)).with_launcher(launcher.clone());
    let handle = controller.submit(make_case(dir.path(), "missing"));
    assert_eq!(finish(&controller, &handle), RunStatus::Failed);
    assert_eq!(failure_kind(&controller, &handle), FailureKind::ProcessLaunchError);
    assert_eq!(launcher.attempts.load(Ordering::SeqCst), 1);
}

#[test]
fn unknown_handles_are_reported() {
    let dir = tempfile::tempdir().unwrap();
    let a = RunController::new(config(MESH_OK, SOLVE_OK));
    let b = RunController::new(config(MESH_OK, SOLVE_OK));
    let handle = a.submit(make_case(dir.path(), "a"));
    assert!(matches!(b.poll(&handle), Err(RunnerError::RunNotFound { .. })));
    finish(&a, &handle);
    assert!(a.release(&handle));
    assert!(matches!(a.poll(&handle), Err(RunnerError::RunNotFound { .. })));
}

#[test]
fn released_runs_leave_the_controller_empty() {
    let dir = tempfile::tempdir().unwrap();
    let controller = RunController::new(config(MESH_OK, SOLVE_OK));
    let handle = controller.submit(make_case(dir.path(), "freed"));
    assert_eq!(finish(&controller, &handle), RunStatus::Succeeded);
    assert_eq!(controller.collect(&handle).unwrap().pressure.len(), 2);
    assert_eq!(controller.tracked(), 1);

    assert!(controller.release(&handle));
    assert_eq!(controller.tracked(), 0);
    assert!(matches!(
        controller.collect(&handle),
        Err(RunnerError::RunNotFound { .. })
    ));
    assert!(!controller.release(&handle));
}

#[test]
fn active_runs_cannot_be_released() {
    let dir = tempfile::tempdir().unwrap();
    let controller = RunController::new(config(MESH_OK, "sleep 30"));
    let handle = controller.submit(make_case(dir.path(), "busy"));
    wait_for(&controller, &handle, RunStatus::Solving);
    assert!(!controller.release(&handle));
    assert_eq!(controller.tracked(), 1);

    controller.cancel(&handle).unwrap();
    assert_eq!(finish(&controller, &handle), RunStatus::Cancelled);
    assert!(controller.release(&handle));
    assert_eq!(controller.tracked(), 0);
}
