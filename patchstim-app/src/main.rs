mod app;
mod parport;

use anyhow::{Context, Result, bail};
use app::App;
use clap::Parser;
use patchstim_core::{GlobalConfig, Headless, RecordingTrigger, StimDescriptor, load_descriptors};
use patchstim_experiment::{RunConfig, RunController, RunOutcome};
use patchstim_render::SkiaDisplay;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "patchstim",
    version,
    about = "Frame-locked visual stimulation with hardware triggers"
)]
struct Args {
    /// Stim list (JSON array of descriptors)
    #[arg(short, long)]
    stims: PathBuf,

    /// Global display and timing configuration (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run options (JSON): repetitions, pacing, motion log
    #[arg(long)]
    run: Option<PathBuf>,

    /// Overrides the number of repetitions
    #[arg(short = 'n', long)]
    reps: Option<u32>,

    /// Patch one configuration field, e.g. `--set frame_rate=75`
    #[arg(long = "set", value_name = "FIELD=VALUE")]
    overrides: Vec<String>,

    /// Parallel port used for trigger pulses
    #[arg(long, value_name = "DEVICE")]
    parport: Option<PathBuf>,

    /// Draw offscreen without opening a window
    #[arg(long)]
    headless: bool,

    /// Validate the stims and count frames and triggers without drawing
    #[arg(long, conflicts_with = "headless")]
    dry_run: bool,

    /// Hold the frame rate with a software pacer instead of vsync
    #[arg(long)]
    pace: bool,

    /// Open a window instead of going fullscreen
    #[arg(long)]
    windowed: bool,

    #[arg(long, default_value = "info")]
    log_level: log::LevelFilter,
}

fn load_config(args: &Args) -> Result<GlobalConfig> {
    let mut config = match &args.config {
        Some(path) => GlobalConfig::load(path)
            .with_context(|| format!("loading configuration {}", path.display()))?,
        None => GlobalConfig::default(),
    };
    for patch in &args.overrides {
        let (field, raw) = patch
            .split_once('=')
            .with_context(|| format!("`{patch}` is not FIELD=VALUE"))?;
        let value = serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::from(raw));
        config.patch(field.trim(), value)?;
    }
    Ok(config)
}

fn load_run(args: &Args) -> Result<RunConfig> {
    let mut run = match &args.run {
        Some(path) => RunConfig::load(path)?,
        None => RunConfig::default(),
    };
    if let Some(reps) = args.reps {
        run = run.with_repetitions(reps);
    }
    run.pace |= args.pace;
    Ok(run)
}

fn dry_run(
    stims: &[StimDescriptor],
    mut config: GlobalConfig,
    run: RunConfig,
) -> Result<RunOutcome> {
    config.log.enabled = false;
    config.capture.enabled = false;
    let mut display = Headless::new();
    display.keep_frames = false;
    let run = RunConfig { pace: false, ..run };
    let mut controller =
        RunController::prepare(stims, &config, run, display, RecordingTrigger::default())?;
    for (i, stim) in controller.plan().stims.iter().enumerate() {
        let hole = if stim.annulus_hole { " (annulus hole)" } else { "" };
        println!("  stim {i}: {}{hole}", stim.params.kind);
    }
    Ok(controller.run())
}

fn headless(
    stims: &[StimDescriptor],
    config: GlobalConfig,
    run: RunConfig,
    args: &Args,
) -> Result<RunOutcome> {
    let display = SkiaDisplay::new(&config)?;
    let trigger = parport::open_trigger(args.parport.as_deref());
    let mut controller = RunController::prepare(stims, &config, run, display, trigger)?;
    Ok(controller.run())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Trace)
        .try_init();
    log::set_max_level(args.log_level);

    let config = load_config(&args)?;
    let run = load_run(&args)?;
    let stims = load_descriptors(&args.stims)
        .with_context(|| format!("loading stims {}", args.stims.display()))?;

    println!("=== PATCHSTIM ===");
    println!("Stims: {} from {}", stims.len(), args.stims.display());
    println!(
        "Display: {}x{} at {} Hz, {} px/um",
        config.display_size[0], config.display_size[1], config.frame_rate, config.pix_per_micron
    );
    println!("Repetitions: {}\n", run.repetitions);

    let outcome = if args.dry_run {
        dry_run(&stims, config, run)?
    } else if args.headless {
        headless(&stims, config, run, &args)?
    } else {
        let trigger = parport::open_trigger(args.parport.as_deref());
        App::new(&stims, &config, run, trigger, !args.windowed)?.run()?
    };

    match &outcome {
        RunOutcome::Completed(report) | RunOutcome::Cancelled(report) => {
            println!("Run {}.", outcome.label());
            println!("  Frames: {}", report.frames);
            println!("  Triggers: {}", report.triggers);
            println!("  Mean fps: {:.2}", report.fps);
            if let Some(id) = &report.log_id {
                println!("  Log: {id}");
            }
            Ok(())
        }
        RunOutcome::Failed { error, frames } => bail!("run failed after {frames} frames: {error}"),
    }
}
