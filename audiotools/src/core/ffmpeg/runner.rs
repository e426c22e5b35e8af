//! FFmpeg Runner Module
//!
//! Executes FFmpeg/FFprobe for chapter processing: probing, silence
//! detection, silence rendering and starting scheduled transcodes.

use std::io;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{FFmpegError, FFmpegInfo, FFmpegResult, TranscodeCommand};
use crate::core::audio::{parse_silencedetect_output, Silence};
use crate::core::jobs::{DurationProbe, JobLauncher};
use crate::core::process::{configure_std_command, ChildProcess, RunningProcess};
use crate::core::{BitsPerSec, TimeSec};

/// Media information extracted by FFprobe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaInfo {
    /// Duration in seconds (0 when FFprobe does not report one)
    pub duration_sec: TimeSec,
    /// Container bitrate in bits/s (if available)
    pub bit_rate: Option<BitsPerSec>,
    /// First audio stream (if present)
    pub audio: Option<AudioStreamInfo>,
    /// Whether the file carries a video stream (e.g. embedded cover art)
    pub has_video: bool,
    /// Container format
    pub format: String,
    /// File size in bytes
    pub size_bytes: u64,
}

/// Audio stream information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioStreamInfo {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u8,
    /// Codec name (e.g., "mp3", "aac")
    pub codec: String,
    /// Bitrate in bits/s (if available)
    pub bitrate: Option<BitsPerSec>,
}

/// `silencedetect` filter parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SilenceDetectSettings {
    /// Noise floor in dB; quieter audio counts as silence
    pub threshold_db: f64,
    /// Minimum silence length in seconds
    pub min_duration_sec: TimeSec,
}

impl Default for SilenceDetectSettings {
    fn default() -> Self {
        Self {
            threshold_db: -50.0,
            min_duration_sec: 0.5,
        }
    }
}

impl SilenceDetectSettings {
    fn filter(&self) -> String {
        format!(
            "silencedetect=n={}dB:d={}",
            self.threshold_db, self.min_duration_sec
        )
    }
}

/// FFmpeg Runner for executing audio processing commands
#[derive(Debug, Clone)]
pub struct FFmpegRunner {
    info: Arc<FFmpegInfo>,
}

impl FFmpegRunner {
    /// Create a new FFmpegRunner from detected FFmpeg installation
    pub fn new(info: FFmpegInfo) -> Self {
        Self {
            info: Arc::new(info),
        }
    }

    /// Starts building a transcode that writes `output`
    pub fn transcode(&self, output: &Path) -> TranscodeCommand {
        TranscodeCommand::new(&self.info.ffmpeg_path, output)
    }

    /// Probe media file to get information
    pub fn probe(&self, input: &Path) -> FFmpegResult<MediaInfo> {
        if !input.exists() {
            return Err(FFmpegError::ProbeError(format!(
                "Input file does not exist: {}",
                input.display()
            )));
        }

        let mut cmd = Command::new(&self.info.ffprobe_path);
        cmd.args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(input);
        configure_std_command(&mut cmd);

        let output = cmd
            .output()
            .map_err(|e| FFmpegError::ProbeError(format!("Failed to run ffprobe: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FFmpegError::ProbeError(format!(
                "FFprobe failed for {}: {}",
                input.display(),
                stderr.trim()
            )));
        }

        let json_str = String::from_utf8_lossy(&output.stdout);
        parse_probe_output(&json_str).map_err(|e| FFmpegError::ProbeError(e.to_string()))
    }

    /// Container bitrate of `input`
    pub fn bitrate(&self, input: &Path) -> FFmpegResult<BitsPerSec> {
        self.probe(input)?.bit_rate.ok_or_else(|| {
            FFmpegError::ProbeError(format!("No bitrate reported for {}", input.display()))
        })
    }

    /// Runs `silencedetect` over `input` and returns the silences found
    pub fn detect_silences(
        &self,
        input: &Path,
        settings: SilenceDetectSettings,
    ) -> FFmpegResult<Vec<Silence>> {
        if !input.exists() {
            return Err(FFmpegError::InvalidInput(format!(
                "Input file does not exist: {}",
                input.display()
            )));
        }

        let mut cmd = Command::new(&self.info.ffmpeg_path);
        cmd.args(["-hide_banner", "-nostdin", "-i"])
            .arg(input)
            .args(["-af", &settings.filter(), "-f", "null", "-"]);
        configure_std_command(&mut cmd);

        let output = cmd.output().map_err(FFmpegError::ProcessError)?;
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            return Err(FFmpegError::ExecutionFailed(format!(
                "Silence detection failed for {}: {}",
                input.display(),
                last_lines(&stderr, 5)
            )));
        }

        Ok(parse_silencedetect_output(&stderr))
    }

    /// Renders `duration_sec` of silence into a temporary MP3.
    ///
    /// The file is removed when the returned path is dropped.
    pub fn render_silence(
        &self,
        duration_sec: TimeSec,
        bitrate: BitsPerSec,
        sample_rate: u32,
    ) -> FFmpegResult<tempfile::TempPath> {
        let path = tempfile::Builder::new()
            .prefix("audiotools")
            .suffix(".mp3")
            .tempfile()
            .map_err(|e| FFmpegError::OutputError(format!("Failed to create temp file: {}", e)))?
            .into_temp_path();

        let mut cmd = Command::new(&self.info.ffmpeg_path);
        cmd.args(["-hide_banner", "-nostdin", "-y", "-f", "lavfi", "-i"])
            .arg(format!("anullsrc=duration={duration_sec}"))
            .args(["-b:a", &bitrate.to_string(), "-ar", &sample_rate.to_string()])
            .arg(&path);
        configure_std_command(&mut cmd);

        let output = cmd.output().map_err(FFmpegError::ProcessError)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FFmpegError::ExecutionFailed(format!(
                "Silence generation failed: {}",
                last_lines(&stderr, 5)
            )));
        }

        Ok(path)
    }
}

impl DurationProbe for FFmpegRunner {
    fn probe_duration(&self, file: &Path) -> FFmpegResult<TimeSec> {
        Ok(self.probe(file)?.duration_sec)
    }
}

impl JobLauncher for FFmpegRunner {
    fn launch(&self, command: &TranscodeCommand) -> io::Result<Box<dyn RunningProcess>> {
        tracing::debug!("Starting: {}", command);
        let process = ChildProcess::spawn(command.to_command())?;
        Ok(Box::new(process))
    }
}

fn last_lines(text: &str, count: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    lines[lines.len().saturating_sub(count)..].join("\n")
}

/// Parse FFprobe JSON output
fn parse_probe_output(json_str: &str) -> FFmpegResult<MediaInfo> {
    let json: serde_json::Value = serde_json::from_str(json_str)
        .map_err(|e| FFmpegError::ParseError(format!("Failed to parse FFprobe output: {}", e)))?;

    let format = json
        .get("format")
        .ok_or_else(|| FFmpegError::ParseError("Missing format info".to_string()))?;

    let duration_sec = format
        .get("duration")
        .and_then(|d| d.as_str())
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0);

    let bit_rate = format
        .get("bit_rate")
        .and_then(|b| b.as_str())
        .and_then(|s| s.parse::<u64>().ok());

    let size_bytes = format
        .get("size")
        .and_then(|s| s.as_str())
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);

    let format_name = format
        .get("format_name")
        .and_then(|f| f.as_str())
        .unwrap_or("unknown")
        .to_string();

    let streams = json
        .get("streams")
        .and_then(|s| s.as_array())
        .cloned()
        .unwrap_or_default();

    let mut audio_info: Option<AudioStreamInfo> = None;
    let mut has_video = false;

    for stream in &streams {
        match stream.get("codec_type").and_then(|c| c.as_str()) {
            Some("audio") if audio_info.is_none() => {
                audio_info = Some(parse_audio_stream(stream));
            }
            Some("video") => has_video = true,
            _ => {}
        }
    }

    Ok(MediaInfo {
        duration_sec,
        bit_rate,
        audio: audio_info,
        has_video,
        format: format_name,
        size_bytes,
    })
}

fn parse_audio_stream(stream: &serde_json::Value) -> AudioStreamInfo {
    let sample_rate = stream
        .get("sample_rate")
        .and_then(|s| s.as_str())
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(44100);

    let channels = stream
        .get("channels")
        .and_then(|c| c.as_u64())
        .unwrap_or(2) as u8;

    let codec = stream
        .get("codec_name")
        .and_then(|c| c.as_str())
        .unwrap_or("unknown")
        .to_string();

    let bitrate = stream
        .get("bit_rate")
        .and_then(|b| b.as_str())
        .and_then(|s| s.parse::<u64>().ok());

    AudioStreamInfo {
        sample_rate,
        channels,
        codec,
        bitrate,
    }
}
