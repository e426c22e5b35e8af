//! Audiotools Core Engine
//!
//! Chapter analysis, FFmpeg integration, batch operations and the parallel
//! job scheduler.

pub mod audio;
pub mod batch;
pub mod ffmpeg;
pub mod jobs;
pub mod process;
pub mod settings;

// Re-export common types
mod types;
pub use types::*;

mod error;
pub use error::*;
