//! Transcode command construction.
//!
//! A [`TranscodeCommand`] is the runnable part of a scheduled job: a complete
//! FFmpeg invocation that concatenates one or more audio inputs into a single
//! output at a given bitrate and sample rate. FFmpeg writes its periodic
//! `time=HH:MM:SS` statistics to stderr, which the job watcher tails.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::core::BitsPerSec;

/// A fully specified FFmpeg transcode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeCommand {
    program: PathBuf,
    inputs: Vec<PathBuf>,
    output: PathBuf,
    audio_bitrate: Option<BitsPerSec>,
    sample_rate: Option<u32>,
}

impl TranscodeCommand {
    /// Creates a command writing to `output` with no inputs yet
    pub fn new(program: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            inputs: Vec::new(),
            output: output.into(),
            audio_bitrate: None,
            sample_rate: None,
        }
    }

    /// Appends an input. Multiple inputs are concatenated in order.
    pub fn input(mut self, path: impl Into<PathBuf>) -> Self {
        self.inputs.push(path.into());
        self
    }

    /// Sets the output audio bitrate (bits/s)
    pub fn audio_bitrate(mut self, bitrate: BitsPerSec) -> Self {
        self.audio_bitrate = Some(bitrate);
        self
    }

    /// Sets the output sample rate (Hz)
    pub fn sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = Some(sample_rate);
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn inputs(&self) -> &[PathBuf] {
        &self.inputs
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Builds the FFmpeg argument list
    pub fn args(&self) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-hide_banner".to_string(),
            "-nostdin".to_string(),
            "-y".to_string(), // Overwrite output
        ];

        for input in &self.inputs {
            args.push("-i".to_string());
            args.push(input.to_string_lossy().to_string());
        }

        if self.inputs.len() > 1 {
            let labels: String = (0..self.inputs.len()).map(|i| format!("[{i}:a]")).collect();
            args.push("-filter_complex".to_string());
            args.push(format!(
                "{labels}concat=n={}:v=0:a=1[out]",
                self.inputs.len()
            ));
            args.push("-map".to_string());
            args.push("[out]".to_string());
        }

        if let Some(bitrate) = self.audio_bitrate {
            args.push("-b:a".to_string());
            args.push(bitrate.to_string());
        }
        if let Some(sample_rate) = self.sample_rate {
            args.push("-ar".to_string());
            args.push(sample_rate.to_string());
        }

        args.push(self.output.to_string_lossy().to_string());
        args
    }

    /// Builds a `std::process::Command` ready to spawn
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.args());
        cmd
    }
}

impl fmt::Display for TranscodeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in self.args() {
            if arg.contains(char::is_whitespace) {
                write!(f, " \"{arg}\"")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_input_args() {
        let cmd = TranscodeCommand::new("ffmpeg", "/out/001.mp3")
            .input("/in/001.mp3")
            .audio_bitrate(224_000)
            .sample_rate(44_100);

        assert_eq!(
            cmd.args(),
            vec![
                "-hide_banner", "-nostdin", "-y", "-i", "/in/001.mp3", "-b:a", "224000", "-ar",
                "44100", "/out/001.mp3",
            ]
        );
    }

    #[test]
    fn test_concat_args() {
        let cmd = TranscodeCommand::new("ffmpeg", "/out/002.mp3")
            .input("/tmp/begin.mp3")
            .input("/in/002.mp3")
            .input("/tmp/end.mp3");

        let args = cmd.args();
        let filter_pos = args.iter().position(|a| a == "-filter_complex").unwrap();
        assert_eq!(args[filter_pos + 1], "[0:a][1:a][2:a]concat=n=3:v=0:a=1[out]");
        assert_eq!(args[filter_pos + 2], "-map");
        assert_eq!(args[filter_pos + 3], "[out]");
        assert_eq!(args.last().unwrap(), "/out/002.mp3");
        assert_eq!(cmd.inputs().len(), 3);
    }

    #[test]
    fn test_display_quotes_whitespace() {
        let cmd = TranscodeCommand::new("ffmpeg", "/out/01 Intro.mp3").input("/in/01 Intro.mp3");
        let line = cmd.to_string();
        assert!(line.starts_with("ffmpeg -hide_banner"));
        assert!(line.contains("\"/in/01 Intro.mp3\""));
    }
}
