//! Per-job progress watcher.
//!
//! Runs on the job's own thread: reads the process's stderr in small chunks,
//! turns `time=HH:MM:SS` markers into percentages, and once the process exits
//! records the outcome and hands the slot to the next waiting job.

use std::io::{ErrorKind, Read};
use std::sync::Arc;

use super::scheduler::Shared;
use super::{parse_elapsed, progress_percent, Job, JobStatus};
use crate::core::process::RunningProcess;
use crate::core::TimeSec;

/// Text kept from a buffer that grew past [`MAX_TAIL_BYTES`] without a marker
const KEEP_TAIL_BYTES: usize = 64;

const MAX_TAIL_BYTES: usize = 4096;

/// Accumulates diagnostic output until it holds a complete time marker.
#[derive(Debug, Default)]
pub(super) struct ProgressTail {
    buffer: String,
}

impl ProgressTail {
    /// Appends a chunk and returns the elapsed seconds of the first marker,
    /// clearing the buffer when one is found.
    pub(super) fn push(&mut self, chunk: &[u8]) -> Option<u64> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        if let Some(elapsed) = parse_elapsed(&self.buffer) {
            self.buffer.clear();
            return Some(elapsed);
        }

        if self.buffer.len() > MAX_TAIL_BYTES {
            let mut cut = self.buffer.len() - KEEP_TAIL_BYTES;
            while !self.buffer.is_char_boundary(cut) {
                cut += 1;
            }
            self.buffer.drain(..cut);
        }
        None
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.buffer.len()
    }
}

/// Watches one job to completion, then refills the scheduler.
pub(super) fn watch(shared: Arc<Shared>, job: Job, mut process: Box<dyn RunningProcess>) {
    let status = match shared.durations.get_duration(&job.source) {
        Ok(expected_sec) => tail_progress(&shared, &job, process.as_mut(), expected_sec),
        Err(e) => {
            tracing::error!("Cannot probe {}: {}", job.source.display(), e);
            if let Err(kill_err) = process.kill() {
                tracing::warn!("Failed to stop job for {}: {}", job.display_name, kill_err);
            }
            JobStatus::ProbeFailed {
                error: e.to_string(),
            }
        }
    };

    match &status {
        JobStatus::Succeeded => tracing::info!("Finished {}", job.display_name),
        JobStatus::Failed {
            exit_code: Some(code),
        } => tracing::error!("Job for {} exited with code {}", job.display_name, code),
        JobStatus::Failed { exit_code: None } => {
            tracing::error!("Job for {} ended with an unknown exit status", job.display_name)
        }
        JobStatus::ProbeFailed { .. } | JobStatus::LaunchFailed { .. } => {}
    }

    shared.finish(&job, status);
    shared.fill_capacity();
}

/// Tails the diagnostic stream until the process exits, then reports how it ended.
fn tail_progress(
    shared: &Shared,
    job: &Job,
    process: &mut dyn RunningProcess,
    expected_sec: TimeSec,
) -> JobStatus {
    if expected_sec.is_nan() || expected_sec <= 0.0 {
        shared.lock().progress.complete(&job.display_name);
    }

    if let Some(mut stream) = process.take_diagnostics() {
        let mut tail = ProgressTail::default();
        let mut chunk = vec![0u8; shared.read_chunk_bytes];

        loop {
            match stream.read(&mut chunk) {
                // Stream closed; the exit status follows.
                Ok(0) => break,
                Ok(n) => {
                    if let Some(elapsed) = tail.push(&chunk[..n]) {
                        let percent = progress_percent(elapsed as TimeSec, expected_sec);
                        tracing::trace!("{}: {}%", job.display_name, percent);
                        shared.lock().progress.update(&job.display_name, percent);
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!("Lost output of job for {}: {}", job.display_name, e);
                    break;
                }
            }

            match process.try_exit_code() {
                Ok(Some(code)) => return status_for(code),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("Cannot poll job for {}: {}", job.display_name, e);
                    break;
                }
            }
        }
    }

    match process.wait_exit_code() {
        Ok(code) => status_for(code),
        Err(e) => {
            tracing::warn!("Cannot wait for job for {}: {}", job.display_name, e);
            JobStatus::Failed { exit_code: None }
        }
    }
}

fn status_for(exit_code: i32) -> JobStatus {
    if exit_code == 0 {
        JobStatus::Succeeded
    } else {
        JobStatus::Failed {
            exit_code: Some(exit_code),
        }
    }
}
