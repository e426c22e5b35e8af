//! Silence padding at chapter boundaries.

use std::fs;
use std::path::{Path, PathBuf};

use super::{copy_unchanged, run_batch, should_skip, BatchReport, MediaTools};
use crate::core::audio::padding_needed;
use crate::core::ffmpeg::SilenceDetectSettings;
use crate::core::jobs::Scheduler;
use crate::core::settings::AudioToolsSettings;
use crate::core::{display_name, CoreResult, TimeSec, DEFAULT_BITRATE};

/// Options for [`pad_silence`]
#[derive(Debug, Clone)]
pub struct PadSilenceOptions {
    pub out_dir: PathBuf,
    pub overwrite: bool,
    pub min_silence_begin_sec: TimeSec,
    pub min_silence_end_sec: TimeSec,
    pub detect: SilenceDetectSettings,
    pub sample_rate: u32,
}

impl PadSilenceOptions {
    pub fn from_settings(out_dir: PathBuf, overwrite: bool, settings: &AudioToolsSettings) -> Self {
        Self {
            out_dir,
            overwrite,
            min_silence_begin_sec: settings.processing.min_silence_begin_sec,
            min_silence_end_sec: settings.processing.min_silence_end_sec,
            detect: settings.silence_detect(),
            sample_rate: settings.processing.sample_rate,
        }
    }
}

/// Pads every chapter in `files` so it starts and ends with at least the
/// configured amount of silence, writing results into `out_dir`.
///
/// Silence clips are rendered up front and live until the batch finishes.
pub fn pad_silence(
    tools: &dyn MediaTools,
    scheduler: &Scheduler,
    files: &[PathBuf],
    options: &PadSilenceOptions,
) -> CoreResult<BatchReport> {
    fs::create_dir_all(&options.out_dir)?;

    run_batch(
        scheduler,
        files,
        &options.out_dir,
        |file, out, report, clips: &mut Vec<tempfile::TempPath>| {
            plan_padding(tools, scheduler, file, out, options, report, clips)
        },
        Vec::new(),
    )
}

fn plan_padding(
    tools: &dyn MediaTools,
    scheduler: &Scheduler,
    file: &Path,
    out: &Path,
    options: &PadSilenceOptions,
    report: &mut BatchReport,
    clips: &mut Vec<tempfile::TempPath>,
) -> CoreResult<()> {
    if should_skip(out, options.overwrite, report, file) {
        return Ok(());
    }

    let duration_sec = scheduler.durations().get_duration(file)?;
    let silences = tools.detect_silences(file, options.detect)?;
    let padding = padding_needed(
        &silences,
        duration_sec,
        options.min_silence_begin_sec,
        options.min_silence_end_sec,
    );

    let name = display_name(file);
    if padding.is_empty() {
        tracing::info!("No need to add silence to {}", name);
        return copy_unchanged(file, out, report);
    }
    tracing::info!(
        "Adding {:.2}s to begin and {:.2}s to end silence to file {}",
        padding.begin_sec,
        padding.end_sec,
        name
    );

    let bitrate = tools.bitrate(file)?;
    let mut command = tools.transcode(out);

    if padding.begin_sec > 0.0 {
        let clip = tools.render_silence(padding.begin_sec, DEFAULT_BITRATE, options.sample_rate)?;
        command = command.input(clip.to_path_buf());
        clips.push(clip);
    }
    command = command.input(file);
    if padding.end_sec > 0.0 {
        let clip = tools.render_silence(padding.end_sec, DEFAULT_BITRATE, options.sample_rate)?;
        command = command.input(clip.to_path_buf());
        clips.push(clip);
    }

    let command = command
        .audio_bitrate(bitrate)
        .sample_rate(options.sample_rate);
    scheduler.enqueue(command, file);
    Ok(())
}
