//! FFmpeg Integration Module
//!
//! Provides the FFmpeg functionality the chapter tools need:
//! - Binary detection (configured paths, common install locations, `PATH`)
//! - Media probing through `ffprobe` JSON output
//! - Silence detection and silence clip rendering
//! - Transcode command construction and asynchronous process start

mod command;
mod detection;
mod runner;

pub use command::TranscodeCommand;
pub use detection::*;
pub use runner::{AudioStreamInfo, FFmpegRunner, MediaInfo, SilenceDetectSettings};

/// FFmpeg-related error types
#[derive(Debug, thiserror::Error)]
pub enum FFmpegError {
    #[error("FFmpeg not found. Please install FFmpeg or configure ffmpegPath/ffprobePath.")]
    NotFound,

    #[error("FFmpeg execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Invalid input file: {0}")]
    InvalidInput(String),

    #[error("Output path error: {0}")]
    OutputError(String),

    #[error("FFprobe error: {0}")]
    ProbeError(String),

    #[error("Process error: {0}")]
    ProcessError(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    ParseError(String),
}

pub type FFmpegResult<T> = Result<T, FFmpegError>;
