//! Scopecast command line

use clap::{Args, Parser, Subcommand, ValueEnum};
use scopecast::export::{
    Aspect, EncodedArtifact, ExportError, ExportJob, ExportPipeline, ExportProgress, ExportRequest,
    ExportStage, FfmpegTools, Theme, Visualization,
};
use scopecast::recorder::{load_config, RecorderConfig};
use scopecast::utils::{AppResult, ErrorResponse};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "scopecast", version, about = "Record audio and export it as a scope video")]
struct Cli {
    /// Settings file (camelCase JSON)
    #[arg(long, global = true, default_value = "scopecast.json")]
    config: PathBuf,

    /// Print failures as a JSON error object
    #[arg(long, global = true)]
    json_errors: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Record from the default input device
    Record(RecordArgs),
    /// Render an existing WAV recording into a video
    Export(ExportArgs),
    /// List input devices
    Devices,
}

#[derive(Args)]
#[cfg_attr(not(feature = "device"), allow(dead_code))]
struct RecordArgs {
    /// Stop after this many seconds; otherwise stop on Ctrl-C
    #[arg(long)]
    seconds: Option<u64>,

    /// Deliver a video instead of the bare recording
    #[arg(long)]
    video: bool,

    #[command(flatten)]
    style: StyleArgs,
}

#[derive(Args)]
struct ExportArgs {
    /// WAV file to render
    audio: PathBuf,

    #[command(flatten)]
    style: StyleArgs,
}

#[derive(Args)]
struct StyleArgs {
    #[arg(long, value_enum, default_value_t = ThemeArg::Dark)]
    theme: ThemeArg,

    #[arg(long, value_enum, default_value_t = VisualizationArg::Waveform)]
    visualization: VisualizationArg,

    #[arg(long, value_enum, default_value_t = AspectArg::Square)]
    aspect: AspectArg,
}

#[derive(Clone, Copy, ValueEnum)]
enum ThemeArg {
    Dark,
    Light,
}

#[derive(Clone, Copy, ValueEnum)]
enum VisualizationArg {
    Waveform,
    Lissajous,
}

#[derive(Clone, Copy, ValueEnum)]
enum AspectArg {
    Square,
    Portrait,
}

impl StyleArgs {
    fn request(&self) -> ExportRequest {
        let theme = match self.theme {
            ThemeArg::Dark => Theme::Dark,
            ThemeArg::Light => Theme::Light,
        };
        let visualization = match self.visualization {
            VisualizationArg::Waveform => Visualization::Waveform,
            VisualizationArg::Lissajous => Visualization::Lissajous,
        };
        let aspect = match self.aspect {
            AspectArg::Square => Aspect::Square,
            AspectArg::Portrait => Aspect::Portrait,
        };
        ExportRequest::video(theme, visualization, aspect)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    scopecast::init_tracing();
    let cli = Cli::parse();
    tracing::info!("Starting Scopecast v{}", env!("CARGO_PKG_VERSION"));

    let result = run(&cli).await;
    if let Err(e) = result {
        if cli.json_errors {
            println!("{}", serde_json::to_string(&ErrorResponse::from(e))?);
            std::process::exit(1);
        }
        return Err(e.into());
    }
    Ok(())
}

async fn run(cli: &Cli) -> AppResult<()> {
    let config = load_config(&cli.config)?;
    match &cli.command {
        Command::Record(args) => record(args, config).await,
        Command::Export(args) => export(args, config).await,
        Command::Devices => {
            list_devices();
            Ok(())
        }
    }
}

fn print_progress(progress: &ExportProgress) {
    match &progress.stage {
        ExportStage::Encoding => eprint!(
            "\rEncoding {:>5.1}% ({}/{})",
            progress.percent, progress.current_frame, progress.total_frames
        ),
        ExportStage::Error { message } => eprintln!("\nExport failed: {}", message),
        stage => eprintln!("\n{:?} {:.0}%", stage, progress.percent),
    }
}

async fn export(args: &ExportArgs, config: RecorderConfig) -> AppResult<()> {
    let settings = &config.export;
    let job = ExportJob::new(&args.audio, &args.style.request(), settings.frame_rate_hz);
    let tools = FfmpegTools::new(
        settings.ffmpeg_path.clone(),
        settings.ffprobe_path.clone(),
        settings.max_frames_in_flight,
    );
    report_duration(&tools, &args.audio).await;

    let cancel_flag = Arc::new(AtomicBool::new(false));
    let pipeline = ExportPipeline::new(job, Arc::new(tools), cancel_flag.clone())
        .with_window(settings.window_frames, settings.window_step)
        .with_badge(settings.badge_path.clone());

    let handle = pipeline.spawn(|progress| print_progress(&progress))?;
    let join = handle.join();
    tokio::pin!(join);

    let result = tokio::select! {
        result = &mut join => result,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\nCancelling export...");
            cancel_flag.store(true, Ordering::Relaxed);
            join.await
        }
    };

    let (path, degraded) = deliverable(result, &args.audio)?;
    if let Some(reason) = degraded {
        tracing::warn!("Video could not be merged: {}", reason);
        eprintln!("\nNo video produced ({}); the recording is unchanged:", reason);
    }
    println!("{}", path.display());
    Ok(())
}

/// The file to hand to the user, plus the reason when it is only the audio
fn deliverable(
    result: Result<EncodedArtifact, ExportError>,
    audio: &Path,
) -> AppResult<(PathBuf, Option<String>)> {
    match result {
        Ok(EncodedArtifact {
            merged_path: Some(merged),
            ..
        }) => Ok((merged, None)),
        Ok(artifact) => Ok((artifact.audio_path, Some("merge was skipped".to_string()))),
        Err(ExportError::Merge(reason)) => Ok((audio.to_path_buf(), Some(reason))),
        Err(e) => Err(e.into()),
    }
}

async fn report_duration(tools: &FfmpegTools, audio: &Path) {
    match tools.probe_duration(audio).await {
        Ok(seconds) => tracing::info!("Rendering {:.2}s of audio from {:?}", seconds, audio),
        Err(e) => tracing::debug!("Could not probe {:?}: {}", audio, e),
    }
}

#[cfg(feature = "device")]
async fn record(args: &RecordArgs, config: RecorderConfig) -> AppResult<()> {
    use scopecast::capture::{AudioEngine, CpalEngine};
    use scopecast::recorder::{MediaRecorder, RecordingEvent};
    use scopecast::waveform::attach_display;
    use std::time::Duration;
    use tokio::sync::broadcast::error::RecvError;

    let engine = Arc::new(CpalEngine::open_default()?);
    let mut recorder = MediaRecorder::with_ffmpeg(engine.clone(), config.clone())?;

    let (display_tap, renderer) =
        attach_display(engine.as_ref(), &config.display, config.tap_buffer_size)?;
    let mid_y = (config.display.height / 2.0).max(1.0);
    let display = renderer.spawn(config.display.refresh_hz, move |path| {
        let level = path
            .points()
            .iter()
            .map(|p| ((p.y - mid_y) / mid_y).abs())
            .fold(0.0f32, f32::max)
            .min(1.0);
        let filled = (level * 40.0).round() as usize;
        eprint!("\r[{:<40}]", "#".repeat(filled));
    });

    let mut events = recorder.subscribe();
    let reporter = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(RecordingEvent::Export(progress)) => print_progress(&progress),
                Ok(RecordingEvent::Failed(reason)) => eprintln!("\nRecording failed: {}", reason),
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    });

    let request = if args.video {
        args.style.request()
    } else {
        ExportRequest::audio_only()
    };
    let path = recorder.start(request)?;
    eprintln!("Recording to {} (Ctrl-C to stop)", path.display());

    match args.seconds {
        Some(seconds) => {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(seconds)) => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        }
        None => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }

    let _ = display.stop().await;
    engine.remove_tap(display_tap);
    eprintln!();

    let canceller = recorder.canceller();
    let stop = recorder.stop();
    tokio::pin!(stop);
    let delivery = tokio::select! {
        result = &mut stop => result,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\nCancelling export...");
            canceller.cancel();
            stop.await
        }
    };
    reporter.abort();

    let delivery = delivery?;
    if let scopecast::recorder::Delivery::Degraded { reason, .. } = &delivery {
        eprintln!("\nNo video produced ({}); the recording is unchanged:", reason);
    }
    println!("{}", delivery.path().display());
    Ok(())
}

#[cfg(not(feature = "device"))]
async fn record(_args: &RecordArgs, _config: RecorderConfig) -> AppResult<()> {
    Err(scopecast::capture::CaptureError::DeviceNotFound(
        "built without the `device` feature".to_string(),
    )
    .into())
}

#[cfg(feature = "device")]
fn list_devices() {
    for device in scopecast::capture::get_audio_input_devices() {
        let marker = if device.is_default { "*" } else { " " };
        println!("{} {}", marker, device.name);
    }
}

#[cfg(not(feature = "device"))]
fn list_devices() {
    eprintln!("Device listing needs the `device` feature");
}
