use clap::{Parser, Subcommand};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use af_app::{
    AppError, AppResult, DesignSession, PipelineConfig, PipelineService, PipelineStage,
    ProgressEvent, RunOptions, RunResponse, field_table, run_view,
};
use af_case::{SimulationParameters, load_params_yaml};
use af_geometry::StlFormat;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// How long a cancelled run gets to stop its process tree.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "af-cli")]
#[command(about = "Airfoil CFD pipeline - sketch to mesh to solved flow field", long_about = None)]
struct Cli {
    /// Pipeline configuration YAML (runs directory, tools, limits)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit a closed curve through sketch points and report its shape
    Curve {
        /// Sketch points, one "x y" or "x,y" pair per line
        points: PathBuf,
        /// Write the sampled curve coordinates here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Extrude the curve and write it as STL
    ExportStl {
        points: PathBuf,
        output: PathBuf,
        /// Simulation parameters YAML (extrusion depth and domain)
        #[arg(long)]
        params: Option<PathBuf>,
        /// Write ASCII instead of the configured encoding
        #[arg(long)]
        ascii: bool,
    },
    /// Mesh and solve, reusing a stored result when one matches
    Run {
        points: PathBuf,
        #[arg(long)]
        params: Option<PathBuf>,
        /// Override the free-stream velocity in m/s
        #[arg(long)]
        velocity: Option<f64>,
        /// Skip cache and force re-run
        #[arg(long)]
        no_cache: bool,
        /// Stop waiting after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// List stored runs, most recent first
    Runs,
    /// Show details of a stored run
    ShowRun {
        /// Run fingerprint or unique prefix
        run_id: String,
    },
    /// Run a stored request again
    Rerun {
        run_id: String,
        /// Recompute even if the stored result is usable
        #[arg(long)]
        force: bool,
    },
    /// Export a result field as a table
    ExportField {
        run_id: String,
        /// Field name: p or U
        field: String,
        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print the default pipeline configuration
    DefaultConfig,
}

fn main() -> AppResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => {
            debug!(path = %path.display(), "loading pipeline config");
            PipelineConfig::load(path)?
        }
        None => PipelineConfig::default(),
    };

    match cli.command {
        Commands::Curve { points, output } => cmd_curve(&config, &points, output.as_deref()),
        Commands::ExportStl {
            points,
            output,
            params,
            ascii,
        } => cmd_export_stl(&config, &points, &output, params.as_deref(), ascii),
        Commands::Run {
            points,
            params,
            velocity,
            no_cache,
            timeout,
        } => {
            let mut params = load_params(params.as_deref())?;
            if let Some(v) = velocity {
                params.velocity_mps = v;
            }
            let options = RunOptions {
                use_cache: !no_cache,
                timeout: timeout.map(Duration::from_secs),
                ..RunOptions::default()
            };
            cmd_run(config, &points, &params, &options)
        }
        Commands::Runs => cmd_runs(config),
        Commands::ShowRun { run_id } => cmd_show_run(config, &run_id),
        Commands::Rerun { run_id, force } => cmd_rerun(config, &run_id, force),
        Commands::ExportField {
            run_id,
            field,
            output,
        } => cmd_export_field(config, &run_id, &field, output.as_deref()),
        Commands::DefaultConfig => {
            print!("{}", serde_yaml::to_string(&PipelineConfig::default())?);
            Ok(())
        }
    }
}

fn load_params(path: Option<&Path>) -> AppResult<SimulationParameters> {
    match path {
        Some(p) => Ok(load_params_yaml(p)?),
        None => Ok(SimulationParameters::default()),
    }
}

fn load_sketch(path: &Path) -> AppResult<DesignSession> {
    let session = DesignSession::load(path)?;
    if session.points().is_empty() {
        return Err(AppError::InvalidInput(format!(
            "no points in {}",
            path.display()
        )));
    }
    Ok(session)
}

fn cmd_curve(config: &PipelineConfig, points: &Path, output: Option<&Path>) -> AppResult<()> {
    let session = load_sketch(points)?;
    let curve = session.curve(&config.curve_options())?;
    let validity = curve.validity();
    let (lo, hi) = curve.bounds();

    println!("Curve through {} points:", session.points().len());
    println!("  Samples: {}", curve.polyline().len());
    println!("  Chord:   {:.6}", curve.chord());
    println!("  Area:    {:.6e}", validity.area);
    println!("  Bounds:  ({:.4}, {:.4}) - ({:.4}, {:.4})", lo.x, lo.y, hi.x, hi.y);
    println!("  Valid:   {}", validity.is_valid());

    if let Some(path) = output {
        std::fs::write(path, curve.to_coordinate_text())?;
        println!("✓ Wrote curve to {}", path.display());
    }
    Ok(())
}

fn cmd_export_stl(
    config: &PipelineConfig,
    points: &Path,
    output: &Path,
    params: Option<&Path>,
    ascii: bool,
) -> AppResult<()> {
    let params = load_params(params)?;
    let session = load_sketch(points)?;
    let curve = session.curve(&config.curve_options())?;
    let asset = af_geometry::export(&curve, params.extrusion_depth, params.domain)?;
    let format = if ascii {
        StlFormat::Ascii
    } else {
        config.stl_format.into()
    };
    let path = af_geometry::serialize(&asset, output, format)?;
    println!(
        "✓ Exported {} triangles to {}",
        asset.triangles().len(),
        path.display()
    );
    Ok(())
}

fn cmd_run(
    config: PipelineConfig,
    points: &Path,
    params: &SimulationParameters,
    options: &RunOptions,
) -> AppResult<()> {
    let session = load_sketch(points)?;
    let service = PipelineService::new(config)?;
    println!(
        "Running {} points at {} m/s (Re per unit chord {:.3e})",
        session.points().len(),
        params.velocity_mps,
        params.reynolds_number(1.0)
    );

    let response = with_progress(|cb| {
        service.ensure_run_with_progress(session.points(), params, options, Some(cb))
    })?;
    let response = stop_unfinished(&service, response)?;
    report(&response)
}

fn cmd_rerun(config: PipelineConfig, run_id: &str, force: bool) -> AppResult<()> {
    let service = PipelineService::new(config)?;
    let fp = service.resolve(run_id)?;
    let options = RunOptions {
        use_cache: !force,
        ..RunOptions::default()
    };
    let response = with_progress(|cb| service.rerun_and_wait(&fp, &options, Some(cb)))?;
    let response = stop_unfinished(&service, response)?;
    report(&response)
}

/// A run still going after `--timeout` is cancelled so no solver outlives
/// the command.
fn stop_unfinished(service: &PipelineService, mut response: RunResponse) -> AppResult<RunResponse> {
    if response.record.status.is_terminal() {
        return Ok(response);
    }
    println!(
        "Timed out waiting on {}; cancelling",
        response.fingerprint.short()
    );
    let stopped = service.shutdown(Some(SHUTDOWN_GRACE));
    debug!(count = stopped.len(), "cancelled unfinished runs");
    response.record = service.wait(&response.fingerprint, Some(Duration::ZERO))?;
    Ok(response)
}

fn with_progress<T>(
    run: impl FnOnce(&mut dyn FnMut(ProgressEvent)) -> AppResult<T>,
) -> AppResult<T> {
    let mut last_emit = Instant::now();
    let mut last_stage = None;
    let result = run(&mut |event: ProgressEvent| {
        let emit_now = last_stage != Some(event.stage) || last_emit.elapsed().as_millis() >= 100;
        if emit_now {
            render_cli_progress(&event);
            last_stage = Some(event.stage);
            last_emit = Instant::now();
        }
    });
    clear_progress_line();
    result
}

fn report(response: &RunResponse) -> AppResult<()> {
    let view = run_view(&response.record);
    if response.loaded_from_cache {
        println!("✓ Loaded from cache: {}", view.short_id);
    } else if response.record.status.is_terminal() {
        println!("✓ Run finished: {} ({})", view.short_id, view.status);
    } else {
        println!("✗ Run {} left in state {}", view.short_id, view.status);
    }
    for line in view.detail() {
        println!("  {line}");
    }
    Ok(())
}

fn clear_progress_line() {
    print!("\r{}\r", " ".repeat(120));
    let _ = io::stdout().flush();
}

fn render_cli_progress(event: &ProgressEvent) {
    let spinner = ['|', '/', '-', '\\'];
    let spin_idx = ((event.elapsed_wall_s * 10.0) as usize) % spinner.len();
    let mut line = format!(
        "\r{} {}  elapsed={:.2}s",
        spinner[spin_idx],
        stage_label(event.stage),
        event.elapsed_wall_s
    );
    if let Some(fp) = &event.fingerprint {
        line.push_str(&format!("  run={}", fp.short()));
    }
    if let Some(iter) = event.iteration {
        line.push_str(&format!("  iter={iter}"));
    }
    if let Some(residual) = event.residual {
        line.push_str(&format!("  residual={residual:.3e}"));
    }
    if let Some(msg) = &event.message {
        line.push_str(&format!("  {msg}"));
    }
    print!("{line}");
    let _ = io::stdout().flush();
}

fn stage_label(stage: PipelineStage) -> &'static str {
    match stage {
        PipelineStage::BuildingCurve => "Building curve",
        PipelineStage::CheckingCache => "Checking cache",
        PipelineStage::LoadingCachedResult => "Loading cached result",
        PipelineStage::AttachingToRun => "Attaching to running job",
        PipelineStage::ExportingGeometry => "Exporting geometry",
        PipelineStage::ConfiguringCase => "Configuring case",
        PipelineStage::Queued => "Queued",
        PipelineStage::Meshing => "Meshing",
        PipelineStage::Solving => "Solving",
        PipelineStage::Completed => "Completed",
        PipelineStage::Failed => "Failed",
        PipelineStage::Cancelled => "Cancelled",
    }
}

fn cmd_runs(config: PipelineConfig) -> AppResult<()> {
    let service = PipelineService::new(config)?;
    let runs = service.list_history();
    if runs.is_empty() {
        println!("No stored runs");
        return Ok(());
    }
    println!("Stored runs:");
    for record in &runs {
        println!("  {}", run_view(record).row());
    }
    for (fp, reason) in service.history().corrupt() {
        println!("  {}  corrupt: {reason}", fp.short());
    }
    Ok(())
}

fn cmd_show_run(config: PipelineConfig, run_id: &str) -> AppResult<()> {
    let service = PipelineService::new(config)?;
    let fp = service.resolve(run_id)?;
    let record = service
        .history()
        .lookup(&fp)?
        .ok_or_else(|| AppError::RunNotFound(run_id.to_string()))?;
    for line in run_view(&record).detail() {
        println!("{line}");
    }
    Ok(())
}

fn cmd_export_field(
    config: PipelineConfig,
    run_id: &str,
    field: &str,
    output: Option<&Path>,
) -> AppResult<()> {
    let service = PipelineService::new(config)?;
    let fp = service.resolve(run_id)?;
    let fields = service.fields(&fp)?;
    let table = field_table(&fields, field)?;

    if let Some(path) = output {
        std::fs::write(path, &table)?;
        println!(
            "✓ Exported {} cells of {} to {}",
            fields.cell_count(),
            field,
            path.display()
        );
    } else {
        print!("{table}");
    }
    Ok(())
}
