//! stackmask: focus stacking and background masking for photogrammetry
//! scan projects.
//!
//! A project directory holds captured frames in `RAW/`, named
//! `<prefix>_x_#####_y_#####_step_#####_.<ext>`. Composites, masks and
//! cutouts are written to `stacked/`.
//!
//! # Usage
//!
//! ```text
//! stackmask focus <PROJECT>            # sharpness of every frame
//! stackmask stack <PROJECT>            # RAW/ -> stacked/<stack>.tif
//! stackmask mask  <PROJECT | IMAGE>    # composites -> masks and cutouts
//! stackmask run   <PROJECT>            # stack, then mask
//! ```
//!
//! Settings come from `--config`, else `<PROJECT>/stackmask.json` if it
//! exists, else defaults; individual flags override either.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::{Args, Parser, Subcommand, ValueEnum};
use stackmask_io::masking::mask_composite_with_diagnostics;
use stackmask_io::{
    Phases, ProcessError, Project, ProjectConfig, SchedulerReport, StackingMethod,
    load_edge_detector, run_project, select_usable,
};
use stackmask_pipeline::CutoutMode;

/// Config file picked up from the project root.
const PROJECT_CONFIG: &str = "stackmask.json";

/// Focus stacking and background masking for photogrammetry scans.
#[derive(Parser)]
#[command(name = "stackmask", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log at debug level.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Log warnings and errors only.
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Print results as JSON on stdout.
    #[arg(long, global = true)]
    json: bool,

    /// JSON settings file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,
}

#[derive(Subcommand)]
enum Command {
    /// Score the sharpness of every frame in a project.
    Focus {
        /// Project directory.
        project: PathBuf,
    },
    /// Assemble one composite per scan position.
    Stack {
        /// Project directory.
        project: PathBuf,
    },
    /// Mask existing composites.
    Mask {
        /// Project directory, or a single composite image.
        target: PathBuf,

        /// Print per-stage diagnostics (single image only).
        #[arg(long)]
        diagnostics: bool,
    },
    /// Stack, then mask every composite produced.
    Run {
        /// Project directory.
        project: PathBuf,
    },
}

/// Flags overriding individual settings.
#[derive(Args)]
struct Overrides {
    /// Variance-of-Laplacian below which a frame is blurry.
    #[arg(long, global = true)]
    focus_threshold: Option<f64>,

    /// Skip focus checking; every readable frame is stacked.
    #[arg(long, global = true)]
    no_focus_check: bool,

    /// External stacking method.
    #[arg(long, global = true, value_enum)]
    method: Option<Method>,

    /// Unsharp-mask composites after fusion.
    #[arg(long, global = true)]
    sharpen: bool,

    /// Lower bound of the backdrop gray band (0-255).
    #[arg(long, global = true)]
    background_min: Option<f32>,

    /// Upper bound of the backdrop gray band (0-255).
    #[arg(long, global = true)]
    background_max: Option<f32>,

    /// Foreground regions of at most this many pixels are removed.
    #[arg(long, global = true)]
    min_artifact_black: Option<u32>,

    /// Background holes of at most this many pixels are filled.
    #[arg(long, global = true)]
    min_artifact_white: Option<u32>,

    /// CLAHE clip limit.
    #[arg(long, global = true)]
    clahe_clip_limit: Option<f32>,

    /// Segment at full resolution instead of downscaling.
    #[arg(long, global = true)]
    full_resolution: bool,

    /// Cutout written next to each mask.
    #[arg(long, global = true, value_enum)]
    cutout: Option<Cutout>,

    /// JSON edge detector model.
    #[arg(long, global = true)]
    edge_model: Option<PathBuf>,

    /// Concurrent stacking jobs.
    #[arg(long, global = true, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    stack_workers: Option<usize>,

    /// Concurrent masking jobs.
    #[arg(long, global = true, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    mask_workers: Option<usize>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Method {
    /// Align, then exposure-fuse with contrast weighting.
    AlignFuse,
    /// Single-pass `focus-stack`.
    FocusStack,
}

#[derive(Clone, Copy, ValueEnum)]
enum Cutout {
    /// Mask only.
    None,
    /// RGBA TIFF with the mask as alpha.
    Alpha,
    /// JPEG with a black background.
    Flattened,
}

impl Overrides {
    fn apply(&self, config: &mut ProjectConfig) {
        if let Some(threshold) = self.focus_threshold {
            config.focus.config.threshold = threshold;
        }
        if self.no_focus_check {
            config.focus.enabled = false;
        }
        if let Some(method) = self.method {
            config.stack.method = match method {
                Method::AlignFuse => StackingMethod::AlignFuse,
                Method::FocusStack => StackingMethod::FocusStack,
            };
        }
        if self.sharpen {
            config.stack.sharpen = true;
        }
        if let Some(v) = self.background_min {
            config.matte.background_min = v;
        }
        if let Some(v) = self.background_max {
            config.matte.background_max = v;
        }
        if let Some(v) = self.min_artifact_black {
            config.matte.min_artifact_black = v;
        }
        if let Some(v) = self.min_artifact_white {
            config.matte.min_artifact_white = v;
        }
        if let Some(v) = self.clahe_clip_limit {
            config.matte.clahe_clip_limit = v;
        }
        if self.full_resolution {
            config.matte.full_resolution = true;
        }
        if let Some(cutout) = self.cutout {
            config.cutout = match cutout {
                Cutout::None => CutoutMode::None,
                Cutout::Alpha => CutoutMode::Alpha,
                Cutout::Flattened => CutoutMode::Flattened,
            };
        }
        if let Some(ref model) = self.edge_model {
            config.edge_model = Some(model.clone());
        }
        if let Some(n) = self.stack_workers {
            config.scheduler.stack_workers = n;
        }
        if let Some(n) = self.mask_workers {
            config.scheduler.mask_workers = n;
        }
    }
}

fn init_logging(cli: &Cli) {
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else if cli.quiet {
        tracing::Level::WARN
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Resolve settings: explicit file, else the project's own file, else
/// defaults; then flags.
fn load_config(cli: &Cli, root: &Path) -> Result<ProjectConfig, ProcessError> {
    let project_file = root.join(PROJECT_CONFIG);
    let mut config = match &cli.config {
        Some(path) => ProjectConfig::load(path)?,
        None if project_file.is_file() => ProjectConfig::load(&project_file)?,
        None => ProjectConfig::default(),
    };
    cli.overrides.apply(&mut config);
    config.validate()?;
    Ok(config)
}

/// Set `flag` on the first Ctrl-C so the scheduler aborts and drains
/// instead of dying mid-write; a second Ctrl-C exits at once.
fn cancel_on_interrupt(flag: Arc<AtomicBool>) {
    let spawned = std::thread::Builder::new()
        .name("stackmask-signal".to_owned())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    tracing::warn!(error = %e, "Ctrl-C will not abort gracefully");
                    return;
                }
            };
            runtime.block_on(async {
                if tokio::signal::ctrl_c().await.is_err() {
                    return;
                }
                tracing::warn!("interrupted, draining queued jobs (Ctrl-C again to quit now)");
                flag.store(true, Ordering::Relaxed);
                if tokio::signal::ctrl_c().await.is_ok() {
                    std::process::exit(130);
                }
            });
        });
    if let Err(e) = spawned {
        tracing::warn!(error = %e, "Ctrl-C will not abort gracefully");
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> ExitCode {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error serializing output: {e}");
            ExitCode::FAILURE
        }
    }
}

fn focus(cli: &Cli, root: &Path) -> Result<ExitCode, ProcessError> {
    let project = Project::open(root)?;
    let config = load_config(cli, root)?;
    let frames = project.discover_frames()?;
    let mut settings = config.focus;
    settings.enabled = true;
    let selection = select_usable(&frames, &settings);

    if cli.json {
        return Ok(print_json(&selection.reports));
    }
    println!("{:<48} {:>12}  Class", "Frame", "Score");
    println!("{}", "-".repeat(70));
    for report in &selection.reports {
        println!(
            "{:<48} {:>12.3}  {:?}",
            report.frame.file_name(),
            report.score,
            report.class
        );
    }
    for frame in &selection.unreadable {
        println!("{:<48} {:>12}  Unreadable", frame.file_name(), "-");
    }
    println!(
        "\n{} of {} frames usable (threshold {})",
        selection.usable.len(),
        frames.len(),
        settings.config.threshold
    );
    Ok(ExitCode::SUCCESS)
}

fn mask_single(cli: &Cli, image: &Path, diagnostics: bool) -> Result<ExitCode, ProcessError> {
    let root = image.parent().unwrap_or_else(|| Path::new("."));
    let config = load_config(cli, root)?;
    let detector = load_edge_detector(config.edge_model.as_deref())?;
    let (outputs, diag) = match mask_composite_with_diagnostics(
        image,
        &config.matte,
        config.cutout,
        detector.as_ref(),
    ) {
        Ok(done) => done,
        Err(e @ ProcessError::Segmentation { .. }) => {
            tracing::warn!(error = %e, "masking skipped, composite kept");
            println!("No foreground found in {}; nothing written", image.display());
            return Ok(ExitCode::SUCCESS);
        }
        Err(e) => return Err(e),
    };

    if cli.json {
        let value = serde_json::json!({
            "outputs": outputs,
            "diagnostics": diagnostics.then_some(&diag),
        });
        return Ok(print_json(&value));
    }
    if diagnostics {
        println!("{}", diag.report());
    }
    println!("Mask: {}", outputs.mask.display());
    if let Some(cutout) = &outputs.cutout {
        println!("Cutout: {}", cutout.display());
    }
    Ok(ExitCode::SUCCESS)
}

fn batch(cli: &Cli, root: &Path, phases: Phases) -> Result<ExitCode, ProcessError> {
    let project = Project::open(root)?;
    let config = load_config(cli, root)?;
    let cancel = Arc::new(AtomicBool::new(false));
    cancel_on_interrupt(Arc::clone(&cancel));
    let report = run_project(&project, &config, phases, cancel)?;

    if cli.json {
        let printed = print_json(&report);
        if report.has_catastrophic_failure() {
            return Ok(ExitCode::FAILURE);
        }
        return Ok(printed);
    }
    print_summary(&report);
    Ok(if report.has_catastrophic_failure() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn print_summary(report: &SchedulerReport) {
    println!(
        "Composites: {}  Masks: {}  Failures: {}",
        report.composites.len(),
        report.masks.len(),
        report.failures.len()
    );
    if report.aborted {
        println!("Aborted: queued work was drained before exit");
    }
    if report.abandoned > 0 {
        println!("Abandoned bursts: {}", report.abandoned);
    }
    for failure in &report.failures {
        println!("  [{}] {}: {}", failure.kind, failure.item, failure.error);
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    let result = match &cli.command {
        Command::Focus { project } => focus(&cli, project),
        Command::Stack { project } => batch(&cli, project, Phases::Stack),
        Command::Run { project } => batch(&cli, project, Phases::Both),
        Command::Mask {
            target,
            diagnostics,
        } => {
            if target.is_dir() {
                batch(&cli, target, Phases::Mask)
            } else {
                mask_single(&cli, target, *diagnostics)
            }
        }
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "stackmask failed");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
