//! Audiotools CLI
//!
//! Batch tools for audiobook chapters: silence padding and bitrate
//! enforcement, run in parallel across the available cores.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::OnceLock;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};

use audiotools_lib::core::audio::expand_chapter_inputs;
use audiotools_lib::core::batch::{
    ensure_quality, pad_silence, BatchReport, EnsureQualityOptions, PadSilenceOptions,
};
use audiotools_lib::core::ffmpeg::{detect_ffmpeg, validate_ffmpeg, FFmpegRunner};
use audiotools_lib::core::jobs::Scheduler;
use audiotools_lib::core::settings::{AudioToolsSettings, SettingsManager};
use audiotools_lib::core::BitsPerSec;

static LOG_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

#[derive(Debug, Parser)]
#[command(name = "audiotools", version)]
#[command(about = "Prepares audiobook chapters for distribution", long_about = None)]
struct Cli {
    /// Settings file (defaults to the user config directory)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Maximum concurrent transcodes (defaults to cores - 1)
    #[arg(long, global = true, value_name = "N")]
    max_workers: Option<usize>,

    /// Also write daily-rolling log files into this directory
    #[arg(long, global = true, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// Path to the ffmpeg binary
    #[arg(long, global = true, value_name = "PATH")]
    ffmpeg: Option<PathBuf>,

    /// Path to the ffprobe binary
    #[arg(long, global = true, value_name = "PATH")]
    ffprobe: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Add silence to chapters that don't start or end with enough of it
    PadSilence {
        #[command(flatten)]
        batch: BatchArgs,

        /// Minimum silence at the beginning of a chapter, in seconds
        #[arg(long, value_name = "SEC")]
        min_silence_begin_sec: Option<f64>,

        /// Minimum silence at the end of a chapter, in seconds
        #[arg(long, value_name = "SEC")]
        min_silence_end_sec: Option<f64>,
    },
    /// Re-encode chapters below a minimum bitrate
    EnsureQuality {
        #[command(flatten)]
        batch: BatchArgs,

        /// Minimum bitrate in bits per second
        #[arg(long, value_name = "BPS")]
        min_bitrate: Option<BitsPerSec>,
    },
    /// Print media information as JSON
    Probe {
        /// Media file to inspect
        file: PathBuf,
    },
    /// Inspect or persist the settings file
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum SettingsAction {
    /// Print the effective settings as JSON
    Show,
    /// Write the effective settings, including global flags, to the settings file
    Save,
    /// Delete the settings file
    Reset,
}

#[derive(Debug, Args)]
struct BatchArgs {
    /// Directory the processed chapters are written to
    #[arg(long, value_name = "DIR")]
    out_dir: PathBuf,

    /// Re-process chapters whose output already exists
    #[arg(long)]
    overwrite: bool,

    /// Chapter files, or book directories holding numbered chapters
    #[arg(required = true, value_name = "FILES|DIRS")]
    inputs: Vec<PathBuf>,
}

fn init_logging(log_dir: Option<&Path>) {
    use tracing_subscriber::prelude::*;

    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(tracing::Level::INFO.into())
        .from_env_lossy();

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_thread_names(true);

    let file_layer = log_dir.and_then(|dir| {
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!("Cannot create log directory {}: {}", dir.display(), e);
            return None;
        }
        let file_appender = tracing_appender::rolling::daily(dir, "audiotools.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        let _ = LOG_GUARD.set(guard);

        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_thread_names(true),
        )
    });

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer);

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn settings_manager(cli: &Cli) -> Option<SettingsManager> {
    match &cli.config {
        Some(path) => Some(SettingsManager::for_file(path.clone())),
        None => SettingsManager::default_dir().map(SettingsManager::new),
    }
}

fn load_settings(cli: &Cli, manager: Option<&SettingsManager>) -> AudioToolsSettings {
    let mut settings = manager.map(|m| m.load()).unwrap_or_default();
    apply_overrides(cli, &mut settings);
    settings
}

fn run_settings(
    action: SettingsAction,
    manager: Option<&SettingsManager>,
    settings: &AudioToolsSettings,
) -> Result<()> {
    let settings = match (action, manager) {
        (SettingsAction::Show, _) => settings.clone(),
        (SettingsAction::Save, Some(manager)) => manager
            .save(settings)
            .with_context(|| format!("Failed to save {}", manager.settings_path().display()))?,
        (SettingsAction::Reset, Some(manager)) => manager
            .reset()
            .with_context(|| format!("Failed to reset {}", manager.settings_path().display()))?,
        (_, None) => bail!("No config directory on this platform; pass --config"),
    };
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}

/// Command-line flags take precedence over the settings file
fn apply_overrides(cli: &Cli, settings: &mut AudioToolsSettings) {
    if let Some(n) = cli.max_workers {
        settings.scheduler.max_workers = Some(n);
    }
    if let Some(path) = &cli.ffmpeg {
        settings.ffmpeg.ffmpeg_path = Some(path.to_string_lossy().into_owned());
    }
    if let Some(path) = &cli.ffprobe {
        settings.ffmpeg.ffprobe_path = Some(path.to_string_lossy().into_owned());
    }

    match &cli.command {
        Command::PadSilence {
            min_silence_begin_sec,
            min_silence_end_sec,
            ..
        } => {
            if let Some(sec) = min_silence_begin_sec {
                settings.processing.min_silence_begin_sec = *sec;
            }
            if let Some(sec) = min_silence_end_sec {
                settings.processing.min_silence_end_sec = *sec;
            }
        }
        Command::EnsureQuality { min_bitrate, .. } => {
            if let Some(bitrate) = min_bitrate {
                settings.processing.min_bitrate = *bitrate;
            }
        }
        Command::Probe { .. } | Command::Settings { .. } => {}
    }
    settings.normalize();
}

fn ffmpeg_runner(settings: &AudioToolsSettings) -> Result<FFmpegRunner> {
    let ffmpeg = settings.ffmpeg.ffmpeg_path.as_deref().map(Path::new);
    let ffprobe = settings.ffmpeg.ffprobe_path.as_deref().map(Path::new);

    let info = detect_ffmpeg(ffmpeg, ffprobe).context("FFmpeg is required")?;
    validate_ffmpeg(&info).context("FFmpeg installation is not usable")?;
    tracing::info!("Using FFmpeg {}", info.version);
    Ok(FFmpegRunner::new(info))
}

fn print_report(report: &BatchReport) {
    let failed: Vec<_> = report.jobs.failures().collect();
    for outcome in &failed {
        tracing::error!(
            "Failed: {} -> {} ({:?})",
            outcome.source.display(),
            outcome.output.display(),
            outcome.status
        );
    }
    println!(
        "Transcoded {}, copied {}, skipped {}, failed {}",
        report.jobs.succeeded(),
        report.copied.len(),
        report.skipped.len(),
        failed.len()
    );
}

/// Runs the selected command. `Ok(false)` means some jobs failed.
fn run(cli: Cli) -> Result<bool> {
    let manager = settings_manager(&cli);
    let settings = load_settings(&cli, manager.as_ref());

    let report = match cli.command {
        Command::Settings { action } => {
            run_settings(action, manager.as_ref(), &settings)?;
            return Ok(true);
        }
        Command::Probe { file } => {
            let runner = ffmpeg_runner(&settings)?;
            let info = runner
                .probe(&file)
                .with_context(|| format!("Failed to probe {}", file.display()))?;
            println!("{}", serde_json::to_string_pretty(&info)?);
            return Ok(true);
        }
        Command::PadSilence { batch, .. } => {
            let runner = ffmpeg_runner(&settings)?;
            let files = expand_chapter_inputs(&batch.inputs)?;
            let scheduler = Scheduler::with_runner(settings.scheduler_config(), runner.clone());
            let options = PadSilenceOptions::from_settings(batch.out_dir, batch.overwrite, &settings);
            pad_silence(&runner, &scheduler, &files, &options).context("Silence padding failed")?
        }
        Command::EnsureQuality { batch, .. } => {
            let runner = ffmpeg_runner(&settings)?;
            let files = expand_chapter_inputs(&batch.inputs)?;
            let scheduler = Scheduler::with_runner(settings.scheduler_config(), runner.clone());
            let options =
                EnsureQualityOptions::from_settings(batch.out_dir, batch.overwrite, &settings);
            ensure_quality(&runner, &scheduler, &files, &options)
                .context("Quality enforcement failed")?
        }
    };

    print_report(&report);
    Ok(report.is_success())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_dir.as_deref());

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::from(2)
        }
    }
}
