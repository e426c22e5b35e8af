//! Process spawning helpers.
//!
//! Wraps `std::process::Child` behind [`RunningProcess`] so the job scheduler
//! can watch a transcode without knowing whether it is a real FFmpeg process
//! or a scripted test double.
//!
//! On Windows, spawning console binaries (ffmpeg, ffprobe) would pop up a
//! console window per invocation; [`configure_std_command`] suppresses that.

use std::io::{self, Read};
use std::process::{Child, Command, ExitStatus, Stdio};

#[cfg(target_os = "windows")]
const CREATE_NO_WINDOW: u32 = 0x08000000;

/// Exit code reported when a process was terminated by a signal.
pub const SIGNALLED_EXIT_CODE: i32 = -1;

/// Apply platform-specific flags to a std process command.
pub fn configure_std_command(cmd: &mut Command) {
    #[cfg(target_os = "windows")]
    {
        use std::os::windows::process::CommandExt;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }
    #[cfg(not(target_os = "windows"))]
    let _ = cmd;
}

/// A started external process whose diagnostic stream can be tailed.
pub trait RunningProcess: Send {
    /// Takes the diagnostic (stderr) stream. Returns `None` once taken.
    fn take_diagnostics(&mut self) -> Option<Box<dyn Read + Send>>;

    /// Non-blocking exit check.
    fn try_exit_code(&mut self) -> io::Result<Option<i32>>;

    /// Blocks until the process exits.
    fn wait_exit_code(&mut self) -> io::Result<i32>;

    /// Kills the process. Killing an already exited process is not an error.
    fn kill(&mut self) -> io::Result<()>;
}

/// OS process started from a [`Command`] with stderr piped.
#[derive(Debug)]
pub struct ChildProcess {
    child: Child,
}

impl ChildProcess {
    /// Spawns `cmd` with stdin and stdout detached and stderr piped.
    pub fn spawn(mut cmd: Command) -> io::Result<Self> {
        configure_std_command(&mut cmd);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        let child = cmd.spawn()?;
        Ok(Self { child })
    }
}

impl RunningProcess for ChildProcess {
    fn take_diagnostics(&mut self) -> Option<Box<dyn Read + Send>> {
        self.child
            .stderr
            .take()
            .map(|stderr| Box::new(stderr) as Box<dyn Read + Send>)
    }

    fn try_exit_code(&mut self) -> io::Result<Option<i32>> {
        Ok(self.child.try_wait()?.map(exit_code))
    }

    fn wait_exit_code(&mut self) -> io::Result<i32> {
        self.child.wait().map(exit_code)
    }

    fn kill(&mut self) -> io::Result<()> {
        match self.child.kill() {
            Ok(()) => {
                let _ = self.child.wait();
                Ok(())
            }
            // Already reaped.
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(e),
        }
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(SIGNALLED_EXIT_CODE)
}
