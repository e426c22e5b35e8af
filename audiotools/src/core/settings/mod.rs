//! Settings Persistence System
//!
//! Provides persistent tool settings with:
//! - Atomic file writes (temp file + rename)
//! - Defaults for missing fields and clamping of bad values
//! - An advisory lock shared by readers and writers
//!
//! Storage location: {config_dir}/audiotools/settings.json

use serde::{Deserialize, Serialize};
use std::fs;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::core::ffmpeg::SilenceDetectSettings;
use crate::core::jobs::SchedulerConfig;
use crate::core::{BitsPerSec, CoreError, CoreResult, DEFAULT_BITRATE, DEFAULT_SAMPLE_RATE};

/// Settings schema version for migration support
pub const SETTINGS_VERSION: u32 = 1;

/// Settings file name
pub const SETTINGS_FILE: &str = "settings.json";

/// Lock file name (advisory lock to prevent concurrent writers)
pub const SETTINGS_LOCK_FILE: &str = "settings.json.lock";

/// Tool settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AudioToolsSettings {
    /// Schema version for migrations
    #[serde(default = "default_version")]
    pub version: u32,

    /// Silence padding and quality settings
    #[serde(default)]
    pub processing: ProcessingSettings,

    /// Job scheduling settings
    #[serde(default)]
    pub scheduler: SchedulerSettings,

    /// FFmpeg binary locations
    #[serde(default)]
    pub ffmpeg: FFmpegSettings,
}

fn default_version() -> u32 {
    SETTINGS_VERSION
}

impl Default for AudioToolsSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            processing: ProcessingSettings::default(),
            scheduler: SchedulerSettings::default(),
            ffmpeg: FFmpegSettings::default(),
        }
    }
}

impl AudioToolsSettings {
    /// Normalizes and clamps settings so persisted state is always valid.
    ///
    /// Bad values are corrected instead of rejected, so a hand-edited file
    /// never stops a batch from running.
    pub fn normalize(&mut self) {
        self.version = SETTINGS_VERSION;

        let p = &mut self.processing;
        p.min_silence_begin_sec = clamp_f64(p.min_silence_begin_sec, 0.0, 60.0);
        p.min_silence_end_sec = clamp_f64(p.min_silence_end_sec, 0.0, 60.0);
        p.min_bitrate = p.min_bitrate.clamp(8_000, 640_000);
        p.sample_rate = p.sample_rate.clamp(8_000, 192_000);
        p.silence_threshold_db = clamp_f64(p.silence_threshold_db, -120.0, 0.0);
        p.silence_min_duration_sec = clamp_f64(p.silence_min_duration_sec, 0.01, 60.0);

        // 0 means "auto".
        if self.scheduler.max_workers == Some(0) {
            self.scheduler.max_workers = None;
        }
        self.scheduler.max_workers = self.scheduler.max_workers.map(|n| n.min(256));
        self.scheduler.poll_interval_ms = self.scheduler.poll_interval_ms.clamp(100, 60_000);

        self.ffmpeg.ffmpeg_path = non_empty(self.ffmpeg.ffmpeg_path.take());
        self.ffmpeg.ffprobe_path = non_empty(self.ffmpeg.ffprobe_path.take());
    }

    /// `silencedetect` parameters
    pub fn silence_detect(&self) -> SilenceDetectSettings {
        SilenceDetectSettings {
            threshold_db: self.processing.silence_threshold_db,
            min_duration_sec: self.processing.silence_min_duration_sec,
        }
    }

    /// Scheduler configuration for the current machine
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_workers: self.scheduler.max_workers,
            poll_interval: Duration::from_millis(self.scheduler.poll_interval_ms),
            ..SchedulerConfig::default()
        }
    }
}

fn clamp_f64(value: f64, min: f64, max: f64) -> f64 {
    if !value.is_finite() {
        return min;
    }
    value.clamp(min, max)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Silence padding and quality settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingSettings {
    /// Minimum silence at the start of a chapter
    #[serde(default = "default_min_silence_begin")]
    pub min_silence_begin_sec: f64,

    /// Minimum silence at the end of a chapter
    #[serde(default = "default_min_silence_end")]
    pub min_silence_end_sec: f64,

    /// Chapters below this bitrate are re-encoded
    #[serde(default = "default_min_bitrate")]
    pub min_bitrate: BitsPerSec,

    /// Output sample rate in Hz
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Noise floor for silence detection
    #[serde(default = "default_silence_threshold")]
    pub silence_threshold_db: f64,

    /// Shortest gap that counts as silence
    #[serde(default = "default_silence_min_duration")]
    pub silence_min_duration_sec: f64,
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            min_silence_begin_sec: default_min_silence_begin(),
            min_silence_end_sec: default_min_silence_end(),
            min_bitrate: default_min_bitrate(),
            sample_rate: default_sample_rate(),
            silence_threshold_db: default_silence_threshold(),
            silence_min_duration_sec: default_silence_min_duration(),
        }
    }
}

fn default_min_silence_begin() -> f64 {
    0.5
}

fn default_min_silence_end() -> f64 {
    2.0
}

fn default_min_bitrate() -> BitsPerSec {
    DEFAULT_BITRATE
}

fn default_sample_rate() -> u32 {
    DEFAULT_SAMPLE_RATE
}

fn default_silence_threshold() -> f64 {
    -50.0
}

fn default_silence_min_duration() -> f64 {
    0.5
}

/// Job scheduling settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerSettings {
    /// Maximum concurrent jobs (None = cores - 1)
    #[serde(default)]
    pub max_workers: Option<usize>,

    /// Progress report interval in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_workers: None,
            poll_interval_ms: default_poll_interval(),
        }
    }
}

fn default_poll_interval() -> u64 {
    2000
}

/// FFmpeg binary locations; unset paths are detected
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct FFmpegSettings {
    #[serde(default)]
    pub ffmpeg_path: Option<String>,

    #[serde(default)]
    pub ffprobe_path: Option<String>,
}

/// Settings manager for loading, saving, and resetting settings
pub struct SettingsManager {
    settings_path: PathBuf,
}

impl SettingsManager {
    /// Create a new settings manager storing its file in `dir`
    pub fn new(dir: PathBuf) -> Self {
        Self {
            settings_path: dir.join(SETTINGS_FILE),
        }
    }

    /// Manager for an explicit settings file
    pub fn for_file(path: PathBuf) -> Self {
        Self {
            settings_path: path,
        }
    }

    /// `{config_dir}/audiotools`, if the platform has a config directory
    pub fn default_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("audiotools"))
    }

    fn settings_dir(&self) -> &Path {
        match self.settings_path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        }
    }

    fn lock_path(&self) -> PathBuf {
        self.settings_dir().join(SETTINGS_LOCK_FILE)
    }

    fn with_lock<T>(&self, exclusive: bool, op: impl FnOnce() -> CoreResult<T>) -> CoreResult<T> {
        fs::create_dir_all(self.settings_dir()).map_err(|e| {
            CoreError::Settings(format!("Failed to create settings directory: {}", e))
        })?;

        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(self.lock_path())
            .map_err(|e| CoreError::Settings(format!("Failed to open settings lock file: {}", e)))?;

        let locked = if exclusive {
            fs2::FileExt::lock_exclusive(&lock_file)
        } else {
            fs2::FileExt::lock_shared(&lock_file)
        };
        locked.map_err(|e| CoreError::Settings(format!("Failed to lock settings file: {}", e)))?;

        let result = op();

        if let Err(e) = fs2::FileExt::unlock(&lock_file) {
            warn!("Failed to unlock settings lock file: {}", e);
        }

        result
    }

    /// Get the settings file path
    pub fn settings_path(&self) -> &Path {
        &self.settings_path
    }

    /// Load settings from disk, returning defaults if the file is missing or unreadable
    pub fn load(&self) -> AudioToolsSettings {
        let result = self.with_lock(false, || {
            if !self.settings_path.exists() {
                info!("Settings file not found, using defaults");
                return Ok(AudioToolsSettings::default());
            }

            let content = fs::read_to_string(&self.settings_path)?;
            let mut settings = serde_json::from_str::<AudioToolsSettings>(&content)?;
            if settings.version < SETTINGS_VERSION {
                debug!("Upgrading settings from version {}", settings.version);
            }

            // Also stamps the current version.
            settings.normalize();
            Ok(settings)
        });

        match result {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Failed to load settings, using defaults: {}", e);
                AudioToolsSettings::default()
            }
        }
    }

    /// Normalizes `settings` and replaces the settings file with them.
    ///
    /// The JSON is written to a temporary file in the same directory and
    /// renamed over the old file, so readers never see a partial write.
    pub fn save(&self, settings: &AudioToolsSettings) -> CoreResult<AudioToolsSettings> {
        self.with_lock(true, || {
            let mut normalized = settings.clone();
            normalized.normalize();

            let mut file = tempfile::NamedTempFile::new_in(self.settings_dir())?;
            serde_json::to_writer_pretty(file.as_file_mut(), &normalized)?;
            file.as_file().sync_all()?;
            file.persist(&self.settings_path).map_err(|e| {
                CoreError::Settings(format!("Failed to replace settings file: {}", e.error))
            })?;

            info!("Settings saved to {}", self.settings_path.display());
            Ok(normalized)
        })
    }

    /// Deletes the settings file; defaults apply from then on
    pub fn reset(&self) -> CoreResult<AudioToolsSettings> {
        self.with_lock(true, || {
            if self.settings_path.exists() {
                fs::remove_file(&self.settings_path)?;
                info!("Removed {}", self.settings_path.display());
            }
            Ok(AudioToolsSettings::default())
        })
    }
}
