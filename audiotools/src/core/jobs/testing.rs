//! Scripted launcher and probe for driving the scheduler in tests.
//!
//! A [`MockProcess`] exposes a diagnostic stream fed over an `mpsc` channel
//! and an exit code set by the test through its [`ProcessControl`].

use std::collections::{HashMap, HashSet};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use super::{DurationProbe, JobLauncher};
use crate::core::ffmpeg::{FFmpegError, FFmpegResult, TranscodeCommand};
use crate::core::process::{RunningProcess, SIGNALLED_EXIT_CODE};
use crate::core::TimeSec;

const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Polls `condition` until it holds or a few seconds pass.
pub(crate) fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT_TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}

// =============================================================================
// Probe
// =============================================================================

/// Duration probe answering from a table and counting calls
pub(crate) struct MockProbe {
    default_sec: TimeSec,
    durations: HashMap<PathBuf, TimeSec>,
    failing: HashSet<PathBuf>,
    calls: AtomicUsize,
}

impl MockProbe {
    pub(crate) fn new(default_sec: TimeSec) -> Self {
        Self {
            default_sec,
            durations: HashMap::new(),
            failing: HashSet::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_duration(mut self, file: impl Into<PathBuf>, duration_sec: TimeSec) -> Self {
        self.durations.insert(file.into(), duration_sec);
        self
    }

    pub(crate) fn failing(mut self, file: impl Into<PathBuf>) -> Self {
        self.failing.insert(file.into());
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DurationProbe for MockProbe {
    fn probe_duration(&self, file: &Path) -> FFmpegResult<TimeSec> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(file) {
            return Err(FFmpegError::ProbeError(format!(
                "corrupt media: {}",
                file.display()
            )));
        }
        Ok(self
            .durations
            .get(file)
            .copied()
            .unwrap_or(self.default_sec))
    }
}

// =============================================================================
// Process
// =============================================================================

#[derive(Default)]
struct ExitState {
    code: Mutex<Option<i32>>,
    changed: Condvar,
}

/// Test-side handle of one scripted process
#[derive(Clone)]
pub(crate) struct ProcessControl {
    stream: Arc<Mutex<Option<Sender<Vec<u8>>>>>,
    exit: Arc<ExitState>,
    running: Arc<AtomicUsize>,
}

impl ProcessControl {
    /// Writes `text` to the diagnostic stream
    pub(crate) fn emit(&self, text: &str) {
        let stream = self.stream.lock().unwrap();
        if let Some(tx) = stream.as_ref() {
            let _ = tx.send(text.as_bytes().to_vec());
        }
    }

    /// Ends the process with `code` and closes its stream
    pub(crate) fn exit(&self, code: i32) {
        let mut current = self.exit.code.lock().unwrap();
        if current.is_none() {
            *current = Some(code);
            self.running.fetch_sub(1, Ordering::SeqCst);
        }
        self.stream.lock().unwrap().take();
        self.exit.changed.notify_all();
    }

    pub(crate) fn exit_code(&self) -> Option<i32> {
        *self.exit.code.lock().unwrap()
    }
}

/// Blocking reader over the chunks sent through a [`ProcessControl`]
struct ChannelReader {
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            match self.rx.recv() {
                Ok(chunk) => self.pending = chunk,
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

pub(crate) struct MockProcess {
    control: ProcessControl,
    diagnostics: Option<ChannelReader>,
}

impl RunningProcess for MockProcess {
    fn take_diagnostics(&mut self) -> Option<Box<dyn Read + Send>> {
        self.diagnostics
            .take()
            .map(|reader| Box::new(reader) as Box<dyn Read + Send>)
    }

    fn try_exit_code(&mut self) -> io::Result<Option<i32>> {
        Ok(self.control.exit_code())
    }

    fn wait_exit_code(&mut self) -> io::Result<i32> {
        let mut code = self.control.exit.code.lock().unwrap();
        loop {
            if let Some(code) = *code {
                return Ok(code);
            }
            code = self.control.exit.changed.wait(code).unwrap();
        }
    }

    fn kill(&mut self) -> io::Result<()> {
        self.control.exit(SIGNALLED_EXIT_CODE);
        Ok(())
    }
}

// =============================================================================
// Launcher
// =============================================================================

#[derive(Default)]
struct LaunchLog {
    order: Vec<PathBuf>,
    commands: Vec<TranscodeCommand>,
    controls: HashMap<PathBuf, ProcessControl>,
}

/// Launcher that records launch order (by output path) and concurrency
#[derive(Default)]
pub(crate) struct MockLauncher {
    log: Mutex<LaunchLog>,
    launched: Condvar,
    running: Arc<AtomicUsize>,
    max_running: AtomicUsize,
    refuse: HashSet<PathBuf>,
    auto_exit: Option<i32>,
}

impl MockLauncher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Launching a command that writes `output` fails
    pub(crate) fn refusing(mut self, output: impl Into<PathBuf>) -> Self {
        self.refuse.insert(output.into());
        self
    }

    /// Every launched process exits with `code` right away
    pub(crate) fn exiting_with(mut self, code: i32) -> Self {
        self.auto_exit = Some(code);
        self
    }

    /// Launched commands, in launch order
    pub(crate) fn launched_commands(&self) -> Vec<TranscodeCommand> {
        self.log.lock().unwrap().commands.clone()
    }

    /// Outputs of launched commands, in launch order
    pub(crate) fn launched(&self) -> Vec<PathBuf> {
        self.log.lock().unwrap().order.clone()
    }

    /// Blocks until at least `count` commands were launched
    pub(crate) fn wait_launched(&self, count: usize) -> Vec<PathBuf> {
        let log = self.log.lock().unwrap();
        let (log, _) = self
            .launched
            .wait_timeout_while(log, WAIT_TIMEOUT, |log| log.order.len() < count)
            .unwrap();
        log.order.clone()
    }

    /// Control of the process writing `output`, waiting for its launch
    pub(crate) fn control(&self, output: impl AsRef<Path>) -> ProcessControl {
        let output = output.as_ref();
        let log = self.log.lock().unwrap();
        let (log, _) = self
            .launched
            .wait_timeout_while(log, WAIT_TIMEOUT, |log| !log.controls.contains_key(output))
            .unwrap();
        log.controls
            .get(output)
            .cloned()
            .unwrap_or_else(|| panic!("{} was never launched", output.display()))
    }

    pub(crate) fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

impl JobLauncher for MockLauncher {
    fn launch(&self, command: &TranscodeCommand) -> io::Result<Box<dyn RunningProcess>> {
        let output = command.output().to_path_buf();
        if self.refuse.contains(&output) {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such program"));
        }

        let (tx, rx) = mpsc::channel();
        let control = ProcessControl {
            stream: Arc::new(Mutex::new(Some(tx))),
            exit: Arc::new(ExitState::default()),
            running: Arc::clone(&self.running),
        };

        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now_running, Ordering::SeqCst);

        {
            let mut log = self.log.lock().unwrap();
            log.order.push(output.clone());
            log.commands.push(command.clone());
            log.controls.insert(output, control.clone());
        }
        self.launched.notify_all();

        if let Some(code) = self.auto_exit {
            control.exit(code);
        }

        Ok(Box::new(MockProcess {
            control,
            diagnostics: Some(ChannelReader {
                rx,
                pending: Vec::new(),
            }),
        }))
    }
}
