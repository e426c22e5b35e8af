//! Memoized media duration lookup.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use super::DurationProbe;
use crate::core::ffmpeg::FFmpegResult;
use crate::core::TimeSec;

/// Caches probed durations by absolute path for the lifetime of the cache.
///
/// The probe runs outside the lock, so two threads asking for the same
/// uncached file at once may both probe it. Both get the same answer.
pub struct DurationCache {
    probe: Arc<dyn DurationProbe>,
    entries: Mutex<HashMap<PathBuf, TimeSec>>,
}

impl DurationCache {
    pub fn new(probe: Arc<dyn DurationProbe>) -> Self {
        Self {
            probe,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Duration of `file` in seconds. Probe errors are returned as-is and not cached.
    pub fn get_duration(&self, file: &Path) -> FFmpegResult<TimeSec> {
        let key = std::path::absolute(file).unwrap_or_else(|_| file.to_path_buf());

        if let Some(duration) = self.entries().get(&key) {
            return Ok(*duration);
        }

        let duration = self.probe.probe_duration(file)?;
        self.entries().insert(key, duration);
        Ok(duration)
    }

    /// Number of cached files
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, TimeSec>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for DurationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurationCache")
            .field("entries", &self.len())
            .finish()
    }
}
