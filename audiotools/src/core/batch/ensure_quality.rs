//! Minimum bitrate enforcement.

use std::fs;
use std::path::{Path, PathBuf};

use super::{copy_unchanged, run_batch, should_skip, BatchReport, MediaTools};
use crate::core::jobs::Scheduler;
use crate::core::settings::AudioToolsSettings;
use crate::core::{display_name, BitsPerSec, CoreResult};

/// Options for [`ensure_quality`]
#[derive(Debug, Clone)]
pub struct EnsureQualityOptions {
    pub out_dir: PathBuf,
    pub overwrite: bool,
    pub min_bitrate: BitsPerSec,
    pub sample_rate: u32,
}

impl EnsureQualityOptions {
    pub fn from_settings(out_dir: PathBuf, overwrite: bool, settings: &AudioToolsSettings) -> Self {
        Self {
            out_dir,
            overwrite,
            min_bitrate: settings.processing.min_bitrate,
            sample_rate: settings.processing.sample_rate,
        }
    }
}

/// Re-encodes chapters whose bitrate is below `min_bitrate`; the rest are
/// copied into `out_dir` as they are.
pub fn ensure_quality(
    tools: &dyn MediaTools,
    scheduler: &Scheduler,
    files: &[PathBuf],
    options: &EnsureQualityOptions,
) -> CoreResult<BatchReport> {
    fs::create_dir_all(&options.out_dir)?;

    run_batch(
        scheduler,
        files,
        &options.out_dir,
        |file, out, report, _: &mut ()| plan_quality(tools, scheduler, file, out, options, report),
        (),
    )
}

fn plan_quality(
    tools: &dyn MediaTools,
    scheduler: &Scheduler,
    file: &Path,
    out: &Path,
    options: &EnsureQualityOptions,
    report: &mut BatchReport,
) -> CoreResult<()> {
    if should_skip(out, options.overwrite, report, file) {
        return Ok(());
    }

    let name = display_name(file);
    let bitrate = tools.bitrate(file)?;
    if bitrate >= options.min_bitrate {
        tracing::info!("Skipping {} as it has bitrate {}", name, bitrate);
        return copy_unchanged(file, out, report);
    }

    tracing::info!("Converting {} because it has bitrate {}", name, bitrate);
    let command = tools
        .transcode(out)
        .input(file)
        .audio_bitrate(options.min_bitrate)
        .sample_rate(options.sample_rate);
    scheduler.enqueue(command, file);
    Ok(())
}
