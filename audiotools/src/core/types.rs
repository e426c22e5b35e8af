//! Audiotools Core Type Definitions
//!
//! Defines fundamental types used throughout the project.

use std::path::Path;

// =============================================================================
// ID Types
// =============================================================================

/// Job unique identifier (ULID)
pub type JobId = String;

/// Creates a fresh job identifier.
pub fn new_job_id() -> JobId {
    ulid::Ulid::new().to_string()
}

// =============================================================================
// Time Types
// =============================================================================

/// Time in seconds (floating point)
pub type TimeSec = f64;

/// Audio bitrate in bits per second
pub type BitsPerSec = u64;

/// Integer completion percentage in `0..=100`
pub type Percent = u8;

/// Sample rate used for every rendered chapter.
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Bitrate used for generated silence and as the default quality floor.
pub const DEFAULT_BITRATE: BitsPerSec = 224_000;

/// Display name for a media file: its base name, or the whole path when it has none.
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}
