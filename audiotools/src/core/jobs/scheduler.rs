//! Bounded parallel job scheduler.
//!
//! Jobs wait in a FIFO queue and are started as soon as a slot is free. Each
//! running job gets a dedicated watcher thread (see `watcher.rs`) that tails
//! the process output for progress and, when the process exits, refills the
//! freed slot with the oldest waiting job.
//!
//! The waiting queue, the active set, the progress table and the outcomes all
//! live behind one mutex. It is never held across a blocking read or a probe.

use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::Serialize;

use super::{
    watcher, DurationCache, DurationProbe, Job, JobLauncher, JobOutcome, JobStatus, ProgressTable,
};
use crate::core::ffmpeg::{FFmpegRunner, TranscodeCommand};
use crate::core::{JobId, Percent};

// =============================================================================
// Configuration
// =============================================================================

/// Scheduler configuration
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Number of CPU cores to plan for
    pub core_count_hint: usize,
    /// Explicit worker limit, overriding the core-based capacity
    pub max_workers: Option<usize>,
    /// How often `wait_till_all_finished` reaps workers and reports progress
    pub poll_interval: Duration,
    /// Size of each read from a process's diagnostic stream
    pub read_chunk_bytes: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            core_count_hint: num_cpus::get(),
            max_workers: None,
            poll_interval: Duration::from_secs(2),
            read_chunk_bytes: 10,
        }
    }
}

impl SchedulerConfig {
    /// Maximum number of concurrently running jobs.
    ///
    /// One core is left for the coordinating thread, but at least one job always runs.
    pub fn capacity(&self) -> usize {
        match self.max_workers {
            Some(n) => n.max(1),
            None => self.core_count_hint.saturating_sub(1).max(1),
        }
    }
}

// =============================================================================
// Shared State
// =============================================================================

/// A started job, owned by its watcher thread
struct ActiveWorker {
    job_id: JobId,
    display_name: String,
    /// Set once the watcher has seen the process exit
    exited: bool,
    handle: JoinHandle<()>,
}

#[derive(Default)]
pub(super) struct SchedulerState {
    pub(super) waiting: VecDeque<Job>,
    active: Vec<ActiveWorker>,
    pub(super) progress: ProgressTable,
    outcomes: Vec<JobOutcome>,
    /// Threads of reaped workers, joined when the batch finishes
    retired: Vec<JoinHandle<()>>,
}

impl SchedulerState {
    /// Removes workers whose process has exited from the active set
    fn reap(&mut self) {
        let mut live = Vec::with_capacity(self.active.len());
        for worker in self.active.drain(..) {
            if worker.exited {
                self.retired.push(worker.handle);
            } else if worker.handle.is_finished() {
                // Watcher died without reporting the exit.
                tracing::error!("Watcher for {} stopped unexpectedly", worker.display_name);
                self.retired.push(worker.handle);
            } else {
                live.push(worker);
            }
        }
        self.active = live;
    }
}

pub(super) struct Shared {
    capacity: usize,
    pub(super) read_chunk_bytes: usize,
    launcher: Arc<dyn JobLauncher>,
    pub(super) durations: DurationCache,
    state: Mutex<SchedulerState>,
}

impl Shared {
    pub(super) fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts waiting jobs, oldest first, until every slot is taken.
    pub(super) fn fill_capacity(self: &Arc<Self>) {
        let mut state = self.lock();
        state.reap();

        while state.active.len() < self.capacity {
            let Some(job) = state.waiting.pop_front() else {
                break;
            };

            let process = match self.launcher.launch(&job.command) {
                Ok(process) => process,
                Err(e) => {
                    tracing::error!("Failed to start job for {}: {}", job.display_name, e);
                    let status = JobStatus::LaunchFailed {
                        error: e.to_string(),
                    };
                    state.outcomes.push(JobOutcome::new(&job, status));
                    continue;
                }
            };

            let job_id = job.id.clone();
            let display_name = job.display_name.clone();
            let record = job.clone();
            let shared = Arc::clone(self);

            // Spawned under the lock: the watcher cannot finish before it is tracked.
            let spawned = thread::Builder::new()
                .name(format!("audiotools-{display_name}"))
                .spawn(move || watcher::watch(shared, job, process));

            match spawned {
                Ok(handle) => {
                    tracing::info!("Started job for {}", display_name);
                    state.active.push(ActiveWorker {
                        job_id,
                        display_name,
                        exited: false,
                        handle,
                    });
                }
                Err(e) => {
                    tracing::error!("Failed to start watcher for {}: {}", display_name, e);
                    let status = JobStatus::LaunchFailed {
                        error: e.to_string(),
                    };
                    state.outcomes.push(JobOutcome::new(&record, status));
                }
            }
        }
    }

    /// Records how a job ended and marks its worker as exited.
    pub(super) fn finish(&self, job: &Job, status: JobStatus) {
        let mut state = self.lock();

        if status.is_success() {
            state.progress.complete(&job.display_name);
        } else {
            state.progress.remove(&job.display_name);
        }

        if let Some(worker) = state.active.iter_mut().find(|w| w.job_id == job.id) {
            worker.exited = true;
        }
        state.outcomes.push(JobOutcome::new(job, status));
    }
}

// =============================================================================
// Batch Summary
// =============================================================================

/// Outcomes of every job of a batch, in completion order
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub outcomes: Vec<JobOutcome>,
}

impl BatchSummary {
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Number of jobs whose process exited with code 0
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.status.is_success()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &JobOutcome> {
        self.outcomes.iter().filter(|o| !o.status.is_success())
    }

    /// True when no job failed
    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }
}

// =============================================================================
// Scheduler
// =============================================================================

/// Runs transcode jobs in parallel, bounded by core count, with live progress.
///
/// Create one per batch: enqueue every job, then call
/// [`Scheduler::wait_till_all_finished`].
///
/// There is no cancellation. A process that never exits keeps its slot forever.
pub struct Scheduler {
    shared: Arc<Shared>,
    poll_interval: Duration,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        launcher: Arc<dyn JobLauncher>,
        probe: Arc<dyn DurationProbe>,
    ) -> Self {
        let capacity = config.capacity();
        tracing::debug!("Scheduler capacity: {} concurrent jobs", capacity);

        Self {
            shared: Arc::new(Shared {
                capacity,
                read_chunk_bytes: config.read_chunk_bytes.max(1),
                launcher,
                durations: DurationCache::new(probe),
                state: Mutex::new(SchedulerState::default()),
            }),
            poll_interval: config.poll_interval,
        }
    }

    /// Scheduler that starts and probes through FFmpeg
    pub fn with_runner(config: SchedulerConfig, runner: FFmpegRunner) -> Self {
        let runner = Arc::new(runner);
        Self::new(config, runner.clone(), runner)
    }

    /// Maximum number of concurrently running jobs
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Duration cache shared with the watchers
    pub fn durations(&self) -> &DurationCache {
        &self.shared.durations
    }

    /// Queues a transcode of `source` and starts it if a slot is free. Never blocks.
    pub fn enqueue(&self, command: TranscodeCommand, source: impl Into<PathBuf>) -> JobId {
        self.enqueue_job(Job::new(command, source))
    }

    /// Queues an already built job
    pub fn enqueue_job(&self, job: Job) -> JobId {
        let id = job.id.clone();
        tracing::debug!("Enqueued job {} for {}", id, job.display_name);
        self.shared.lock().waiting.push_back(job);
        self.shared.fill_capacity();
        id
    }

    /// Number of jobs not started yet
    pub fn waiting_len(&self) -> usize {
        self.shared.lock().waiting.len()
    }

    /// Number of tracked running jobs
    pub fn active_len(&self) -> usize {
        let mut state = self.shared.lock();
        state.reap();
        state.active.len()
    }

    /// Current progress table
    pub fn progress_snapshot(&self) -> BTreeMap<String, Percent> {
        self.shared.lock().progress.snapshot()
    }

    /// Logs one progress line, then evicts completed entries.
    pub fn report_progress(&self) -> String {
        let line = {
            let mut state = self.shared.lock();
            let waiting = state.waiting.len();
            state.progress.render_and_evict(waiting)
        };
        tracing::info!("{}", line);
        line
    }

    /// Blocks until no job is waiting or running, reporting progress every
    /// poll interval. Individual job failures are returned, not raised.
    pub fn wait_till_all_finished(&self) -> BatchSummary {
        loop {
            let done = {
                let mut state = self.shared.lock();
                state.reap();
                state.waiting.is_empty() && state.active.is_empty()
            };
            if done {
                break;
            }
            self.report_progress();
            thread::sleep(self.poll_interval);
        }

        let retired = std::mem::take(&mut self.shared.lock().retired);
        for handle in retired {
            if handle.join().is_err() {
                tracing::error!("A job watcher panicked");
            }
        }

        let outcomes = std::mem::take(&mut self.shared.lock().outcomes);
        tracing::info!("All jobs are done");
        BatchSummary { outcomes }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("capacity", &self.shared.capacity)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::jobs::testing::{wait_until, MockLauncher, MockProbe};
    use std::path::Path;

    fn config(core_count_hint: usize) -> SchedulerConfig {
        SchedulerConfig {
            core_count_hint,
            max_workers: None,
            poll_interval: Duration::from_millis(5),
            read_chunk_bytes: 10,
        }
    }

    fn chapter(n: u32) -> (TranscodeCommand, PathBuf) {
        let source = PathBuf::from(format!("/book/{n:03}.mp3"));
        let command = TranscodeCommand::new("ffmpeg", output(n)).input(&source);
        (command, source)
    }

    fn output(n: u32) -> PathBuf {
        PathBuf::from(format!("/out/{n:03}.mp3"))
    }

    fn setup(
        core_count_hint: usize,
        probe: MockProbe,
    ) -> (Scheduler, Arc<MockLauncher>, Arc<MockProbe>) {
        let launcher = Arc::new(MockLauncher::new());
        let probe = Arc::new(probe);
        let scheduler = Scheduler::new(config(core_count_hint), launcher.clone(), probe.clone());
        (scheduler, launcher, probe)
    }

    #[test]
    fn test_capacity_leaves_one_core() {
        assert_eq!(config(8).capacity(), 7);
        assert_eq!(config(2).capacity(), 1);
        assert_eq!(config(1).capacity(), 1);
        assert_eq!(config(0).capacity(), 1);

        let explicit = SchedulerConfig {
            max_workers: Some(3),
            ..config(16)
        };
        assert_eq!(explicit.capacity(), 3);

        let zero = SchedulerConfig {
            max_workers: Some(0),
            ..config(16)
        };
        assert_eq!(zero.capacity(), 1);
    }

    #[test]
    fn test_single_slot_runs_jobs_one_at_a_time_in_order() {
        let (scheduler, launcher, _) = setup(2, MockProbe::new(60.0));
        assert_eq!(scheduler.capacity(), 1);

        for n in 1..=3 {
            let (command, source) = chapter(n);
            scheduler.enqueue(command, source);
        }

        assert_eq!(launcher.launched(), vec![output(1)]);
        assert_eq!(scheduler.waiting_len(), 2);

        launcher.control(output(1)).exit(0);
        assert_eq!(launcher.wait_launched(2), vec![output(1), output(2)]);

        // The third job must not start while the second is running.
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(launcher.launched().len(), 2);

        launcher.control(output(2)).exit(0);
        assert_eq!(launcher.wait_launched(3), vec![output(1), output(2), output(3)]);
        launcher.control(output(3)).exit(0);

        let summary = scheduler.wait_till_all_finished();
        assert_eq!(summary.len(), 3);
        assert_eq!(summary.succeeded(), 3);
        assert!(summary.is_success());
        assert_eq!(launcher.max_running(), 1);
    }

    #[test]
    fn test_never_exceeds_capacity_and_launches_each_job_once() {
        let (scheduler, launcher, _) = setup(4, MockProbe::new(60.0));
        assert_eq!(scheduler.capacity(), 3);

        for n in 1..=8 {
            let (command, source) = chapter(n);
            scheduler.enqueue(command, source);
        }
        assert_eq!(launcher.launched(), vec![output(1), output(2), output(3)]);

        // Finish out of order; every freed slot takes the oldest waiting job.
        launcher.control(output(2)).exit(0);
        assert_eq!(launcher.wait_launched(4)[3], output(4));
        launcher.control(output(1)).exit(0);
        assert_eq!(launcher.wait_launched(5)[4], output(5));

        for n in [3, 4, 5] {
            launcher.control(output(n)).exit(0);
        }
        launcher.wait_launched(8);
        for n in [6, 7, 8] {
            launcher.control(output(n)).exit(0);
        }

        let summary = scheduler.wait_till_all_finished();
        assert_eq!(summary.succeeded(), 8);

        let launched = launcher.launched();
        assert_eq!(launched, (1..=8).map(output).collect::<Vec<_>>());
        assert!(launcher.max_running() <= 3);
    }

    #[test]
    fn test_progress_from_time_marker() {
        let probe = MockProbe::new(60.0);
        let (scheduler, launcher, _) = setup(2, probe);

        let (command, source) = chapter(1);
        scheduler.enqueue(command, source);

        let process = launcher.control(output(1));
        process.emit("size=     480kB time=00:00:30.00 bitrate= 131.1kbits/s speed=60x\n");
        assert!(wait_until(|| scheduler.progress_snapshot().get("001.mp3") == Some(&50)));

        process.exit(0);
        let summary = scheduler.wait_till_all_finished();
        assert_eq!(summary.succeeded(), 1);
    }

    #[test]
    fn test_progress_never_decreases() {
        let (scheduler, launcher, _) = setup(2, MockProbe::new(100.0));
        let (command, source) = chapter(1);
        scheduler.enqueue(command, source);

        let process = launcher.control(output(1));
        process.emit("time=00:00:40.00 ");
        assert!(wait_until(|| scheduler.progress_snapshot().get("001.mp3") == Some(&40)));

        process.emit("time=00:00:20.00 ");
        process.emit("time=00:00:45.00 ");
        assert!(wait_until(|| scheduler.progress_snapshot().get("001.mp3") == Some(&45)));

        process.exit(0);
        scheduler.wait_till_all_finished();
    }

    #[test]
    fn test_zero_duration_is_complete_immediately() {
        let probe = MockProbe::new(60.0).with_duration("/book/001.mp3", 0.0);
        let (scheduler, launcher, _) = setup(2, probe);
        let (command, source) = chapter(1);
        scheduler.enqueue(command, source);

        // No time marker needed.
        let process = launcher.control(output(1));
        assert!(wait_until(|| scheduler.progress_snapshot().get("001.mp3") == Some(&100)));

        process.exit(0);
        assert!(scheduler.wait_till_all_finished().is_success());
    }

    #[test]
    fn test_completed_job_reported_once() {
        let (scheduler, launcher, _) = setup(2, MockProbe::new(60.0));
        let (command, source) = chapter(1);
        scheduler.enqueue(command, source);

        let process = launcher.control(output(1));
        process.emit("time=00:00:30.00 ");
        assert!(wait_until(|| scheduler.progress_snapshot().get("001.mp3") == Some(&50)));
        assert!(scheduler.report_progress().contains("001.mp3: 50%"));

        process.exit(0);
        assert!(wait_until(|| scheduler.progress_snapshot().get("001.mp3") == Some(&100)));

        assert!(scheduler.report_progress().contains("001.mp3: 100%"));
        assert!(!scheduler.report_progress().contains("001.mp3"));
        scheduler.wait_till_all_finished();
    }

    #[test]
    fn test_jobs_sharing_a_display_name_are_each_reported() {
        let (scheduler, launcher, _) = setup(2, MockProbe::new(60.0));
        let first_out = PathBuf::from("/out/a/01.mp3");
        let second_out = PathBuf::from("/out/b/01.mp3");
        scheduler.enqueue(
            TranscodeCommand::new("ffmpeg", &first_out).input("/a/01.mp3"),
            "/a/01.mp3",
        );
        scheduler.enqueue(
            TranscodeCommand::new("ffmpeg", &second_out).input("/b/01.mp3"),
            "/b/01.mp3",
        );

        launcher.control(&first_out).exit(0);
        let second = launcher.control(&second_out);
        assert!(wait_until(|| scheduler.progress_snapshot().get("01.mp3") == Some(&100)));
        assert!(scheduler.report_progress().contains("01.mp3: 100%"));

        second.emit("time=00:00:30.00 ");
        assert!(wait_until(|| scheduler.progress_snapshot().get("01.mp3") == Some(&50)));
        assert!(scheduler.report_progress().contains("01.mp3: 50%"));

        second.exit(0);
        assert!(wait_until(|| scheduler.progress_snapshot().get("01.mp3") == Some(&100)));
        assert!(scheduler.report_progress().contains("01.mp3: 100%"));
        assert_eq!(scheduler.wait_till_all_finished().succeeded(), 2);
    }

    #[test]
    fn test_report_counts_waiting_jobs() {
        let (scheduler, launcher, _) = setup(2, MockProbe::new(60.0));
        for n in 1..=3 {
            let (command, source) = chapter(n);
            scheduler.enqueue(command, source);
        }
        assert!(scheduler.report_progress().starts_with("Progress. Enqueued 2 jobs."));

        for n in 1..=3 {
            launcher.control(output(n)).exit(0);
        }
        scheduler.wait_till_all_finished();
    }

    // The watch loop ends on any exit, not only on exit code 0, and a failed
    // job is never reported as 100%.
    #[test]
    fn test_nonzero_exit_is_recorded_as_failure_without_hanging() {
        let (scheduler, launcher, _) = setup(2, MockProbe::new(60.0));
        for n in 1..=2 {
            let (command, source) = chapter(n);
            scheduler.enqueue(command, source);
        }

        let failing = launcher.control(output(1));
        failing.emit("time=00:00:06.00 ");
        assert!(wait_until(|| scheduler.progress_snapshot().get("001.mp3") == Some(&10)));
        failing.exit(1);

        // The freed slot still goes to the next job.
        launcher.control(output(2)).exit(0);

        let summary = scheduler.wait_till_all_finished();
        assert_eq!(summary.len(), 2);
        assert_eq!(summary.succeeded(), 1);
        assert!(!summary.is_success());

        let failed: Vec<&JobOutcome> = summary.failures().collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].display_name, "001.mp3");
        assert_eq!(failed[0].status, JobStatus::Failed { exit_code: Some(1) });
        assert!(!scheduler.progress_snapshot().contains_key("001.mp3"));
    }

    #[test]
    fn test_probe_failure_kills_process_and_frees_slot() {
        let probe = MockProbe::new(60.0).failing("/book/001.mp3");
        let (scheduler, launcher, _) = setup(2, probe);
        for n in 1..=2 {
            let (command, source) = chapter(n);
            scheduler.enqueue(command, source);
        }

        let second = launcher.control(output(2));
        assert_eq!(launcher.control(output(1)).exit_code(), Some(-1));
        second.exit(0);

        let summary = scheduler.wait_till_all_finished();
        assert_eq!(summary.len(), 2);
        let failed: Vec<&JobOutcome> = summary.failures().collect();
        assert!(matches!(failed[0].status, JobStatus::ProbeFailed { .. }));
        assert_eq!(launcher.running(), 0);
    }

    #[test]
    fn test_launch_failure_moves_on_to_next_job() {
        let launcher = Arc::new(MockLauncher::new().refusing(output(1)));
        let scheduler = Scheduler::new(config(2), launcher.clone(), Arc::new(MockProbe::new(60.0)));

        for n in 1..=2 {
            let (command, source) = chapter(n);
            scheduler.enqueue(command, source);
        }
        assert_eq!(launcher.launched(), vec![output(2)]);
        launcher.control(output(2)).exit(0);

        let summary = scheduler.wait_till_all_finished();
        assert_eq!(summary.len(), 2);
        assert_eq!(summary.succeeded(), 1);
        assert!(summary
            .failures()
            .any(|o| matches!(o.status, JobStatus::LaunchFailed { .. })));
    }

    #[test]
    fn test_wait_returns_only_after_processes_exit() {
        let (scheduler, launcher, _) = setup(3, MockProbe::new(60.0));
        let scheduler = Arc::new(scheduler);
        for n in 1..=2 {
            let (command, source) = chapter(n);
            scheduler.enqueue(command, source);
        }

        let waiter = {
            let scheduler = Arc::clone(&scheduler);
            std::thread::spawn(move || scheduler.wait_till_all_finished())
        };

        launcher.control(output(1)).exit(0);
        std::thread::sleep(Duration::from_millis(30));
        assert!(!waiter.is_finished());
        assert_eq!(scheduler.active_len(), 1);

        launcher.control(output(2)).exit(0);
        let summary = waiter.join().unwrap();
        assert_eq!(summary.succeeded(), 2);
        assert_eq!(scheduler.active_len(), 0);
        assert_eq!(scheduler.waiting_len(), 0);
    }

    #[test]
    fn test_duration_probed_once_per_source() {
        let (scheduler, launcher, probe) = setup(2, MockProbe::new(60.0));
        let source = Path::new("/book/001.mp3");

        scheduler.enqueue(TranscodeCommand::new("ffmpeg", output(1)).input(source), source);
        scheduler.enqueue(TranscodeCommand::new("ffmpeg", output(2)).input(source), source);
        launcher.control(output(1)).exit(0);
        launcher.control(output(2)).exit(0);

        scheduler.wait_till_all_finished();
        assert_eq!(probe.calls(), 1);
        assert_eq!(scheduler.durations().len(), 1);
    }

    #[test]
    fn test_empty_batch_finishes_immediately() {
        let (scheduler, _, _) = setup(4, MockProbe::new(60.0));
        let summary = scheduler.wait_till_all_finished();
        assert!(summary.is_empty());
        assert!(summary.is_success());
    }
}
