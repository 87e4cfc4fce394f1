#![cfg(unix)]

use std::path::Path;
use std::time::{Duration, Instant};

use af_app::config::StlEncoding;
use af_app::{
    AppError, PipelineConfig, PipelineService, PipelineStage, RunOptions, SubmitOutcome,
};
use af_case::{CaseDirectory, SimulationParameters};
use af_geometry::PointSet;
use af_runner::{CommandSpec, FailureKind, RunStatus};

const MESH_OK: &str = r#"mkdir -p constant/polyMesh
for f in points faces owner neighbour boundary; do echo "(0 0 0)" > constant/polyMesh/$f; done"#;

fn solver_script(counter: &Path, delay_s: u32) -> String {
    format!(
        r#"echo run >> "{}"
sleep {delay_s}
echo "Time = 1"
echo "GAMG:  Solving for p, Initial residual = 1e-06, Final residual = 1e-08, No Iterations 4"
mkdir -p 1
printf 'internalField nonuniform List<scalar> 3(0.5 -1.25 0.75);\n' > 1/p
printf 'internalField nonuniform List<vector> 3((1 0 0) (0 2 0) (3 4 0));\n' > 1/U"#,
        counter.display()
    )
}

fn sh(script: &str) -> CommandSpec {
    CommandSpec::new("sh", &["-c", script])
}

struct Fixture {
    _dir: tempfile::TempDir,
    counter: std::path::PathBuf,
    config: PipelineConfig,
}

impl Fixture {
    fn new(mesher: &str, solver_delay_s: u32) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let counter = dir.path().join("solver-invocations");
        let config = PipelineConfig {
            runs_dir: dir.path().join("runs"),
            mesher: sh(mesher),
            solver: sh(&solver_script(&counter, solver_delay_s)),
            launch_backoff_ms: 10,
            ..PipelineConfig::default()
        };
        Self {
            _dir: dir,
            counter,
            config,
        }
    }

    fn service(&self) -> PipelineService {
        PipelineService::new(self.config.clone()).unwrap()
    }

    fn solver_runs(&self) -> usize {
        std::fs::read_to_string(&self.counter)
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }
}

fn airfoil() -> PointSet {
    PointSet::from_xy(&[(0.0, 0.0), (0.3, 0.08), (1.0, 0.0), (0.3, -0.04)])
}

fn unit_circle() -> PointSet {
    let xy: Vec<(f64, f64)> = (0..12)
        .map(|k| {
            let t = std::f64::consts::TAU * k as f64 / 12.0;
            (t.cos(), t.sin())
        })
        .collect();
    PointSet::from_xy(&xy)
}

fn options() -> RunOptions {
    RunOptions {
        timeout: Some(Duration::from_secs(60)),
        poll_interval: Duration::from_millis(20),
        ..RunOptions::default()
    }
}

#[test]
fn identical_request_is_served_from_cache() {
    let fx = Fixture::new(MESH_OK, 0);
    let service = fx.service();
    let params = SimulationParameters::default();

    let mut stages = Vec::new();
    let mut record_stage = |e: af_app::ProgressEvent| stages.push(e.stage);
    let first = service
        .ensure_run_with_progress(&airfoil(), &params, &options(), Some(&mut record_stage))
        .unwrap();
    assert!(!first.loaded_from_cache);
    assert_eq!(first.record.status, RunStatus::Succeeded);
    let summary = first.record.summary.clone().unwrap();
    assert_eq!(summary.cell_count, 3);
    assert_eq!(summary.max_velocity, 5.0);
    assert_eq!(summary.min_pressure, -1.25);
    assert!(summary.converged);
    assert!(first.record.reynolds_number.unwrap() > 0.0);
    assert_eq!(stages.first(), Some(&PipelineStage::BuildingCurve));
    assert_eq!(stages.last(), Some(&PipelineStage::Completed));
    assert!(stages.contains(&PipelineStage::ConfiguringCase));

    let second = service.ensure_run(&airfoil(), &params, &options()).unwrap();
    assert!(second.loaded_from_cache);
    assert_eq!(second.fingerprint, first.fingerprint);
    assert_eq!(fx.solver_runs(), 1);

    let fields = service.fields(&first.fingerprint).unwrap();
    assert_eq!(fields.pressure, vec![0.5, -1.25, 0.75]);
}

#[test]
fn history_survives_a_restart() {
    let fx = Fixture::new(MESH_OK, 0);
    let fp = {
        let service = fx.service();
        service
            .ensure_run(&airfoil(), &SimulationParameters::default(), &options())
            .unwrap()
            .fingerprint
    };

    let service = fx.service();
    let listed = service.list_history();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].fingerprint, fp);
    assert_eq!(service.resolve(&fp.as_str()[..8]).unwrap(), fp);

    let again = service
        .ensure_run(&airfoil(), &SimulationParameters::default(), &options())
        .unwrap();
    assert!(again.loaded_from_cache);
    assert_eq!(fx.solver_runs(), 1);
}

#[test]
fn invalid_input_is_rejected_before_any_work() {
    let fx = Fixture::new(MESH_OK, 0);
    let service = fx.service();

    let params = SimulationParameters {
        velocity_mps: -5.0,
        ..SimulationParameters::default()
    };
    assert!(matches!(
        service.submit(&airfoil(), &params, &options()),
        Err(AppError::InvalidParameters(_))
    ));

    let two = PointSet::from_xy(&[(0.0, 0.0), (1.0, 0.0)]);
    assert!(matches!(
        service.submit(&two, &SimulationParameters::default(), &options()),
        Err(AppError::InsufficientPoints { found: 2 })
    ));

    assert!(service.list_history().is_empty());
    let entries = std::fs::read_dir(&fx.config.runs_dir)
        .map(|d| d.count())
        .unwrap_or(0);
    assert_eq!(entries, 0);
    assert_eq!(fx.solver_runs(), 0);
}

#[test]
fn failed_stage_is_recorded_with_log_excerpt() {
    let fx = Fixture::new("echo 'FOAM FATAL ERROR: cannot find patch'; exit 1", 0);
    let service = fx.service();

    let response = service
        .ensure_run(&airfoil(), &SimulationParameters::default(), &options())
        .unwrap();
    assert_eq!(response.record.status, RunStatus::Failed);
    let failure = response.record.failure.clone().unwrap();
    assert_eq!(failure.kind, FailureKind::MeshingFailed);
    assert!(failure.log_excerpt.iter().any(|l| l.contains("FOAM FATAL")));
    assert_eq!(fx.solver_runs(), 0);

    assert!(matches!(
        service.fields(&response.fingerprint),
        Err(AppError::RunNotFound(_))
    ));

    // A failed run is never reused.
    let retry = service.submit(&airfoil(), &SimulationParameters::default(), &options()).unwrap();
    assert_eq!(retry.outcome, SubmitOutcome::Started);
    let record = service
        .wait(&retry.fingerprint, Some(Duration::from_secs(30)))
        .unwrap();
    assert_eq!(record.attempt, 2);
    assert_eq!(record.status, RunStatus::Failed);
}

#[test]
fn concurrent_identical_requests_share_one_run() {
    let fx = Fixture::new(MESH_OK, 1);
    let service = fx.service();
    let params = SimulationParameters::default();

    let first = service.submit(&airfoil(), &params, &options()).unwrap();
    let second = service.submit(&airfoil(), &params, &options()).unwrap();
    assert_eq!(first.outcome, SubmitOutcome::Started);
    assert_eq!(second.outcome, SubmitOutcome::Attached);
    assert_eq!(first.handle, second.handle);

    let record = service
        .wait(&first.fingerprint, Some(Duration::from_secs(30)))
        .unwrap();
    assert_eq!(record.status, RunStatus::Succeeded);
    assert_eq!(fx.solver_runs(), 1);
}

#[test]
fn simultaneous_submitters_start_one_run_per_fingerprint() {
    let fx = Fixture::new(MESH_OK, 1);
    let service = fx.service();
    let slow = SimulationParameters::default();
    let fast = SimulationParameters {
        velocity_mps: 5.0,
        ..SimulationParameters::default()
    };

    let outcomes: Vec<_> = std::thread::scope(|scope| {
        let workers: Vec<_> = (0..6)
            .map(|i| {
                let (service, params) = (&service, if i % 2 == 0 { &slow } else { &fast });
                scope.spawn(move || service.submit(&airfoil(), params, &options()).unwrap())
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });
    let started = outcomes
        .iter()
        .filter(|s| s.outcome == SubmitOutcome::Started)
        .count();
    assert_eq!(started, 2);

    for submission in &outcomes {
        let record = service
            .wait(&submission.fingerprint, Some(Duration::from_secs(30)))
            .unwrap();
        assert_eq!(record.status, RunStatus::Succeeded);
    }
    assert_eq!(fx.solver_runs(), 2);
}

#[test]
fn finished_runs_are_released_from_the_controller() {
    let fx = Fixture::new(MESH_OK, 0);
    let service = fx.service();
    let first = service
        .ensure_run(&airfoil(), &SimulationParameters::default(), &options())
        .unwrap();
    let fast = SimulationParameters {
        velocity_mps: 5.0,
        ..SimulationParameters::default()
    };
    service.ensure_run(&airfoil(), &fast, &options()).unwrap();
    assert_eq!(service.tracked_runs(), 0);

    // Released runs still answer from the history.
    let record = service.wait(&first.fingerprint, None).unwrap();
    assert_eq!(record.status, RunStatus::Succeeded);
    assert!(service.fields(&first.fingerprint).is_ok());
}

#[test]
fn timed_out_wait_then_shutdown_leaves_nothing_running() {
    let fx = Fixture::new(MESH_OK, 30);
    let service = fx.service();
    let impatient = RunOptions {
        timeout: Some(Duration::from_millis(300)),
        ..options()
    };
    let response = service
        .ensure_run(&airfoil(), &SimulationParameters::default(), &impatient)
        .unwrap();
    assert!(!response.record.status.is_terminal());

    let start = Instant::now();
    let stopped = service.shutdown(Some(Duration::from_secs(20)));
    assert_eq!(stopped, vec![response.fingerprint.clone()]);
    assert!(start.elapsed() < Duration::from_secs(20));

    let record = service.wait(&response.fingerprint, Some(Duration::ZERO)).unwrap();
    assert_eq!(record.status, RunStatus::Cancelled);
    assert!(service.live_snapshot(&response.fingerprint).is_none());
    assert_eq!(service.tracked_runs(), 0);
    assert!(service.shutdown(None).is_empty());
}

#[test]
fn unit_circle_runs_end_to_end_with_default_parameters() {
    let fx = Fixture::new(MESH_OK, 0);
    let service = fx.service();
    let response = service
        .ensure_run(&unit_circle(), &SimulationParameters::default(), &options())
        .unwrap();
    assert_eq!(response.record.status, RunStatus::Succeeded);
    assert_eq!(response.record.summary.clone().unwrap().cell_count, 3);

    let case = CaseDirectory::open(response.record.case_dir.as_ref().unwrap()).unwrap();
    assert!(case.stl_path().is_file());
    let fields = service.fields(&response.fingerprint).unwrap();
    assert_eq!(fields.pressure.len(), 3);
    assert_eq!(fields.velocity.len(), 3);
}

#[test]
fn configured_stl_encoding_reaches_the_case() {
    let mut fx = Fixture::new(MESH_OK, 0);
    fx.config.stl_format = StlEncoding::Ascii;
    let service = fx.service();
    let response = service
        .ensure_run(&airfoil(), &SimulationParameters::default(), &options())
        .unwrap();
    let case = CaseDirectory::open(response.record.case_dir.as_ref().unwrap()).unwrap();
    let stl = std::fs::read_to_string(case.stl_path()).unwrap();
    assert!(stl.starts_with("solid"));
    assert!(stl.contains("facet normal"));
}

#[test]
fn forced_rerun_keeps_the_previous_attempt() {
    let fx = Fixture::new(MESH_OK, 0);
    let service = fx.service();
    let first = service
        .ensure_run(&airfoil(), &SimulationParameters::default(), &options())
        .unwrap();
    let old_case = first.record.case_dir.clone().unwrap();

    let forced = RunOptions {
        use_cache: false,
        ..options()
    };
    let rerun = service.rerun_and_wait(&first.fingerprint, &forced, None).unwrap();
    assert!(!rerun.loaded_from_cache);
    assert_eq!(rerun.fingerprint, first.fingerprint);
    assert_eq!(rerun.record.status, RunStatus::Succeeded);
    assert_eq!(rerun.record.attempt, 2);
    assert!(old_case.join(af_case::CASE_MANIFEST).is_file());
    let new_case = rerun.record.case_dir.unwrap();
    assert!(new_case.ends_with("case-2"));
    assert_ne!(new_case, old_case);
    assert_eq!(fx.solver_runs(), 2);
    assert_eq!(service.list_history().len(), 1);
}

#[test]
fn cancelling_a_running_solve() {
    let fx = Fixture::new(MESH_OK, 30);
    let service = fx.service();
    let submission = service
        .submit(&airfoil(), &SimulationParameters::default(), &options())
        .unwrap();
    let fp = submission.fingerprint;

    let start = Instant::now();
    while service.live_snapshot(&fp).map(|s| s.status) != Some(RunStatus::Solving) {
        assert!(start.elapsed() < Duration::from_secs(20), "solver never started");
        std::thread::sleep(Duration::from_millis(10));
    }
    service.cancel(&fp).unwrap();
    let record = service.wait(&fp, Some(Duration::from_secs(20))).unwrap();
    assert_eq!(record.status, RunStatus::Cancelled);
    assert!(start.elapsed() < Duration::from_secs(20));
    assert!(matches!(service.cancel(&fp), Err(AppError::RunNotFound(_))));
}

#[test]
fn old_runs_are_evicted_beyond_the_history_limit() {
    let mut fx = Fixture::new(MESH_OK, 0);
    fx.config.max_history = 1;
    let service = fx.service();

    let slow = service
        .ensure_run(&airfoil(), &SimulationParameters::default(), &options())
        .unwrap();
    // Timestamps only need to differ in ordering.
    std::thread::sleep(Duration::from_millis(20));
    let fast_params = SimulationParameters {
        velocity_mps: 5.0,
        ..SimulationParameters::default()
    };
    let fast = service.ensure_run(&airfoil(), &fast_params, &options()).unwrap();
    assert_ne!(slow.fingerprint, fast.fingerprint);

    assert!(matches!(
        service.fields(&slow.fingerprint),
        Err(AppError::Evicted(_))
    ));
    assert!(service.fields(&fast.fingerprint).is_ok());
    assert_eq!(service.list_history().len(), 2);

    // An evicted run is recomputed instead of served from cache.
    let again = service
        .ensure_run(&airfoil(), &SimulationParameters::default(), &options())
        .unwrap();
    assert!(!again.loaded_from_cache);
    assert_eq!(again.record.status, RunStatus::Succeeded);
    assert_eq!(fx.solver_runs(), 3);
}
