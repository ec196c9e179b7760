use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use deskpulse::config::DeskPulseConfig;
use deskpulse::history;
use deskpulse::output::{JsonlEventStore, LogHealthReporter, LogNotifier};
use deskpulse::pipeline::{Pipeline, PipelineBuilder};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file. Built-in defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Input webcam device index
    #[arg(short, long)]
    input_device: Option<u32>,

    /// Target frames per second
    #[arg(long)]
    fps: Option<u32>,

    /// Path to pose landmark model (ONNX file)
    #[arg(long)]
    model: Option<PathBuf>,

    /// Where posture state changes are appended
    #[arg(long)]
    event_log: Option<PathBuf>,

    /// Keep this JPEG file updated with the annotated live view
    #[arg(long)]
    live_view: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Monitor posture from the webcam (default)
    Run,
    /// Summarize the recorded posture history
    Summary {
        /// Break totals down per day
        #[arg(long)]
        daily: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    let config = load_config(&args)?;

    match args.command {
        Some(Command::Summary { daily }) => print_summary(&config.storage.event_log, daily),
        Some(Command::Run) | None => run(config),
    }
}

fn load_config(args: &Args) -> Result<DeskPulseConfig> {
    let mut config = match &args.config {
        Some(path) => DeskPulseConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => DeskPulseConfig::default(),
    };

    if let Some(device) = args.input_device {
        config.camera.device = device;
    }
    if let Some(fps) = args.fps {
        config.pipeline.target_fps = fps;
    }
    if let Some(model) = &args.model {
        config.model.path = Some(model.clone());
    }
    if let Some(event_log) = &args.event_log {
        config.storage.event_log = event_log.clone();
    }
    if let Some(live_view) = &args.live_view {
        config.live_view.jpeg_path = Some(live_view.clone());
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn run(config: DeskPulseConfig) -> Result<()> {
    tracing::info!("DeskPulse starting");
    tracing::info!(
        "Camera: device {} at {}x{}",
        config.camera.device,
        config.camera.width,
        config.camera.height
    );
    tracing::info!("Target FPS: {}", config.pipeline.target_fps);

    let store = JsonlEventStore::open(&config.storage.event_log).with_context(|| {
        format!(
            "Failed to open event log {}",
            config.storage.event_log.display()
        )
    })?;

    let builder = PipelineBuilder::new(config.clone())
        .persistence(Arc::new(store))
        .alerts(Arc::new(LogNotifier))
        .health(Arc::new(LogHealthReporter));

    let mut pipeline = start_pipeline(builder, &config)?;

    let forwarder = match &config.live_view.jpeg_path {
        Some(path) => {
            tracing::info!("Writing live view to {}", path.display());
            let sink = Arc::new(deskpulse::output::JpegFileSink::new(path));
            Some(
                deskpulse::output::spawn_live_view_forwarder(
                    pipeline.subscribe(),
                    sink,
                    config.live_view.jpeg_quality,
                )
                .context("Failed to start live view forwarder")?,
            )
        }
        None => None,
    };

    tracing::info!("Commands: pause, resume, status, quit. Press Ctrl+C to stop");
    command_loop(&pipeline);

    pipeline.stop();
    if let Some(forwarder) = forwarder {
        let pushed = forwarder.stop();
        tracing::debug!("Live view forwarded {} frames", pushed);
    }

    let stats = pipeline.stats();
    tracing::info!(
        "Captured {} frames, dispatched {} observations, {} classification failures",
        stats.frames_captured,
        stats.observations_dispatched,
        stats.classification_failures
    );
    Ok(())
}

#[cfg(all(feature = "camera", feature = "onnx"))]
fn start_pipeline(builder: PipelineBuilder, config: &DeskPulseConfig) -> Result<Pipeline> {
    use deskpulse::capture::WebcamCapture;

    let model_path = config
        .model
        .path
        .as_ref()
        .context("No pose model configured; pass --model or set [model] path")?;

    let classifier = deskpulse::classifier::create_default_model(&model_path.to_string_lossy())
        .context("Failed to load pose model")?;

    let camera = config.camera.clone();
    builder
        .start(
            move || WebcamCapture::new(camera.device, camera.width, camera.height),
            classifier,
        )
        .context("Failed to start pipeline")
}

#[cfg(not(all(feature = "camera", feature = "onnx")))]
fn start_pipeline(_builder: PipelineBuilder, _config: &DeskPulseConfig) -> Result<Pipeline> {
    anyhow::bail!("deskpulse was built without the `camera` and `onnx` features")
}

/// Read operator commands from stdin until `quit` or end of input.
fn command_loop(pipeline: &Pipeline) {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("Failed to read command: {}", e);
                break;
            }
        };

        match line.trim() {
            "" => {}
            "pause" => pipeline.pause(),
            "resume" => pipeline.resume(),
            "status" => {
                let stats = pipeline.stats();
                let verdict = pipeline
                    .latest()
                    .map(|s| s.observation.verdict.to_string())
                    .unwrap_or_else(|| "none".to_string());
                tracing::info!(
                    "Camera {}, posture {}, paused={}, frames={}",
                    pipeline.camera_state(),
                    verdict,
                    pipeline.is_paused(),
                    stats.frames_captured
                );
            }
            "quit" | "exit" => return,
            other => tracing::warn!("Unknown command: {}", other),
        }
    }

    // stdin closed; keep monitoring until the process is killed.
    while pipeline.is_running() {
        std::thread::sleep(Duration::from_secs(1));
    }
}

fn print_summary(event_log: &Path, daily: bool) -> Result<()> {
    let records = JsonlEventStore::read_records(event_log)
        .with_context(|| format!("Failed to read event log {}", event_log.display()))?;
    let now = Utc::now();

    if records.is_empty() {
        println!("No posture history in {}", event_log.display());
        return Ok(());
    }

    if daily {
        for (day, summary) in history::daily_summaries(&records, now) {
            println!("{}  {}", day, format_summary(&summary));
        }
    } else {
        println!("{}", format_summary(&history::summarize(&records, now)));
    }
    Ok(())
}

fn format_summary(summary: &history::PostureSummary) -> String {
    let score = summary
        .posture_score()
        .map(|s| format!("{:.0}%", s))
        .unwrap_or_else(|| "n/a".to_string());
    format!(
        "good {}m, bad {}m ({} sessions), away {}m, score {}",
        summary.good_seconds / 60,
        summary.bad_seconds / 60,
        summary.bad_sessions,
        summary.absent_seconds / 60,
        score
    )
}
