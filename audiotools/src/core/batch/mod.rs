//! Batch Operations Module
//!
//! Chapter-level operations that plan one transcode per file and hand the
//! transcodes to the [`Scheduler`]:
//! - `pad_silence`: make sure every chapter starts and ends with enough silence
//! - `ensure_quality`: re-encode chapters below a minimum bitrate
//!
//! Files are planned largest first so the longest transcodes start early.
//! Files that need no work are copied to the output directory unchanged.

mod ensure_quality;
mod pad_silence;

pub use ensure_quality::{ensure_quality, EnsureQualityOptions};
pub use pad_silence::{pad_silence, PadSilenceOptions};

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::core::audio::Silence;
use crate::core::ffmpeg::{FFmpegResult, FFmpegRunner, SilenceDetectSettings, TranscodeCommand};
use crate::core::jobs::{BatchSummary, Scheduler};
use crate::core::{display_name, BitsPerSec, CoreError, CoreResult, TimeSec};

/// Media inspection and rendering needed to plan a batch
pub trait MediaTools: Send + Sync {
    /// Container bitrate of `file`
    fn bitrate(&self, file: &Path) -> FFmpegResult<BitsPerSec>;

    /// Silent intervals of `file`, in stream order
    fn detect_silences(
        &self,
        file: &Path,
        settings: SilenceDetectSettings,
    ) -> FFmpegResult<Vec<Silence>>;

    /// Renders a silence clip, removed when the returned path is dropped
    fn render_silence(
        &self,
        duration_sec: TimeSec,
        bitrate: BitsPerSec,
        sample_rate: u32,
    ) -> FFmpegResult<tempfile::TempPath>;

    /// Starts building a transcode that writes `output`
    fn transcode(&self, output: &Path) -> TranscodeCommand;
}

impl MediaTools for FFmpegRunner {
    fn bitrate(&self, file: &Path) -> FFmpegResult<BitsPerSec> {
        FFmpegRunner::bitrate(self, file)
    }

    fn detect_silences(
        &self,
        file: &Path,
        settings: SilenceDetectSettings,
    ) -> FFmpegResult<Vec<Silence>> {
        FFmpegRunner::detect_silences(self, file, settings)
    }

    fn render_silence(
        &self,
        duration_sec: TimeSec,
        bitrate: BitsPerSec,
        sample_rate: u32,
    ) -> FFmpegResult<tempfile::TempPath> {
        FFmpegRunner::render_silence(self, duration_sec, bitrate, sample_rate)
    }

    fn transcode(&self, output: &Path) -> TranscodeCommand {
        FFmpegRunner::transcode(self, output)
    }
}

/// What happened to each file of a batch
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    /// Outputs that already existed
    pub skipped: Vec<PathBuf>,
    /// Files copied without re-encoding
    pub copied: Vec<PathBuf>,
    /// Scheduled transcodes
    pub jobs: BatchSummary,
}

impl BatchReport {
    /// True when no scheduled transcode failed
    pub fn is_success(&self) -> bool {
        self.jobs.is_success()
    }
}

/// Output location of `file` inside `out_dir`. Refuses to overwrite the input.
pub(crate) fn output_path(out_dir: &Path, file: &Path) -> CoreResult<PathBuf> {
    let name = file.file_name().ok_or_else(|| {
        CoreError::ValidationError(format!("Not a file path: {}", file.display()))
    })?;
    let out = out_dir.join(name);

    if out.exists() && fs::canonicalize(&out)? == fs::canonicalize(file)? {
        return Err(CoreError::ValidationError(format!(
            "Output directory contains the input {}",
            file.display()
        )));
    }
    Ok(out)
}

/// Orders `files` by size, largest first
pub(crate) fn largest_first(files: &[PathBuf]) -> CoreResult<Vec<PathBuf>> {
    let mut sized = Vec::with_capacity(files.len());
    for file in files {
        let size = fs::metadata(file)
            .map_err(|_| CoreError::FileNotFound(file.display().to_string()))?
            .len();
        sized.push((size, file.clone()));
    }
    sized.sort_by(|a, b| b.0.cmp(&a.0));
    Ok(sized.into_iter().map(|(_, file)| file).collect())
}

/// Existing outputs are kept unless overwriting
pub(crate) fn should_skip(out: &Path, overwrite: bool, report: &mut BatchReport, file: &Path) -> bool {
    if !overwrite && out.exists() {
        tracing::info!("Skipping {} as it already exists.", display_name(file));
        report.skipped.push(file.to_path_buf());
        return true;
    }
    false
}

pub(crate) fn copy_unchanged(file: &Path, out: &Path, report: &mut BatchReport) -> CoreResult<()> {
    fs::copy(file, out)?;
    report.copied.push(file.to_path_buf());
    Ok(())
}

/// Pairs each file with its output, largest file first. Two inputs that
/// would write the same output are rejected before anything is scheduled.
pub(crate) fn claim_outputs(
    out_dir: &Path,
    files: &[PathBuf],
) -> CoreResult<Vec<(PathBuf, PathBuf)>> {
    let mut claimed: HashMap<PathBuf, PathBuf> = HashMap::new();
    let mut planned = Vec::with_capacity(files.len());

    for file in largest_first(files)? {
        let out = output_path(out_dir, &file)?;
        if let Some(other) = claimed.get(&out) {
            return Err(CoreError::ValidationError(format!(
                "{} and {} would both be written to {}",
                other.display(),
                file.display(),
                out.display()
            )));
        }
        claimed.insert(out.clone(), file.clone());
        planned.push((file, out));
    }
    Ok(planned)
}

/// Plans every file, then waits for the scheduled jobs.
///
/// A planning error stops planning further files, but jobs already scheduled
/// still run to completion before the error is returned.
pub(crate) fn run_batch<S>(
    scheduler: &Scheduler,
    files: &[PathBuf],
    out_dir: &Path,
    mut plan: impl FnMut(&Path, &Path, &mut BatchReport, &mut S) -> CoreResult<()>,
    mut keep_alive: S,
) -> CoreResult<BatchReport> {
    let mut report = BatchReport::default();
    let planned = claim_outputs(out_dir, files)?
        .iter()
        .try_for_each(|(file, out)| plan(file, out, &mut report, &mut keep_alive));

    report.jobs = scheduler.wait_till_all_finished();
    drop(keep_alive);

    planned?;
    Ok(report)
}
