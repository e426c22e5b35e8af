//! Job System Module
//!
//! Runs batches of FFmpeg transcodes on bounded OS threads with live
//! progress: a FIFO queue of jobs, one watcher thread per running process,
//! a shared progress table, and a memoized duration lookup.

mod duration_cache;
mod progress;
mod scheduler;
mod watcher;

#[cfg(test)]
pub(crate) mod testing;

pub use duration_cache::DurationCache;
pub use progress::{parse_elapsed, progress_percent, ProgressTable};
pub use scheduler::{BatchSummary, Scheduler, SchedulerConfig};

use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::core::ffmpeg::{FFmpegResult, TranscodeCommand};
use crate::core::process::RunningProcess;
use crate::core::{display_name, new_job_id, JobId, TimeSec};

// =============================================================================
// Collaborators
// =============================================================================

/// Starts transcode processes for the scheduler
pub trait JobLauncher: Send + Sync {
    /// Starts `command` without waiting for it to finish
    fn launch(&self, command: &TranscodeCommand) -> io::Result<Box<dyn RunningProcess>>;
}

/// Looks up the playing time of a media file
pub trait DurationProbe: Send + Sync {
    /// Duration of `file` in seconds, or `FFmpegError::ProbeError`
    fn probe_duration(&self, file: &Path) -> FFmpegResult<TimeSec>;
}

// =============================================================================
// Job Types
// =============================================================================

/// A queued transcode plus the source file it was built from
#[derive(Clone, Debug)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,
    /// The transcode to run
    pub command: TranscodeCommand,
    /// Source file, used for the expected duration and the display name
    pub source: PathBuf,
    /// Progress table key (source base name)
    pub display_name: String,
    /// Creation timestamp
    pub created_at: String,
}

impl Job {
    /// Creates a new job
    pub fn new(command: TranscodeCommand, source: impl Into<PathBuf>) -> Self {
        let source = source.into();
        Self {
            id: new_job_id(),
            display_name: display_name(&source),
            command,
            source,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// How a job ended
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum JobStatus {
    /// Process exited with code 0
    Succeeded,
    /// Process exited non-zero, or its exit could not be observed
    Failed { exit_code: Option<i32> },
    /// Expected duration could not be probed; the process was killed
    ProbeFailed { error: String },
    /// Process could not be started
    LaunchFailed { error: String },
}

impl JobStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, JobStatus::Succeeded)
    }
}

/// Final record of one job
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOutcome {
    pub job_id: JobId,
    pub display_name: String,
    pub source: PathBuf,
    pub output: PathBuf,
    pub status: JobStatus,
    pub completed_at: String,
}

impl JobOutcome {
    pub fn new(job: &Job, status: JobStatus) -> Self {
        Self {
            job_id: job.id.clone(),
            display_name: job.display_name.clone(),
            source: job.source.clone(),
            output: job.command.output().to_path_buf(),
            status,
            completed_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}
