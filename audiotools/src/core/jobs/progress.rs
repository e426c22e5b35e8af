//! Progress extraction and the shared progress table.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::core::{Percent, TimeSec};

fn elapsed_regex() -> &'static Regex {
    // The trailing non-digit makes sure a timestamp split across two reads
    // is not taken before its seconds are complete.
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"time=(\d+):(\d+):(\d+)\D").expect("time pattern is valid"))
}

/// First `time=HH:MM:SS` marker in `text`, as whole elapsed seconds
pub fn parse_elapsed(text: &str) -> Option<u64> {
    let caps = elapsed_regex().captures(text)?;
    let hours: u64 = caps[1].parse().ok()?;
    let minutes: u64 = caps[2].parse().ok()?;
    let seconds: u64 = caps[3].parse().ok()?;
    Some(hours * 3600 + minutes * 60 + seconds)
}

/// Truncated completion percentage. A zero or unknown expected duration is complete.
pub fn progress_percent(elapsed_sec: TimeSec, expected_sec: TimeSec) -> Percent {
    if expected_sec.is_nan() || expected_sec <= 0.0 {
        return 100;
    }
    let percent = 100.0 * elapsed_sec / expected_sec;
    percent.clamp(0.0, 100.0) as Percent
}

/// Completion percentage per running job, keyed by display name.
///
/// Entries at 100% are evicted by [`ProgressTable::render_and_evict`], so
/// each completion is reported exactly once.
#[derive(Debug, Default)]
pub struct ProgressTable {
    entries: BTreeMap<String, Percent>,
}

impl ProgressTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records progress. Values never decrease.
    pub fn update(&mut self, name: &str, percent: Percent) {
        let percent = percent.min(100);
        let entry = self.entries.entry(name.to_string()).or_insert(percent);
        *entry = (*entry).max(percent);
    }

    /// Marks a job as done
    pub fn complete(&mut self, name: &str) {
        self.update(name, 100);
    }

    /// Drops a job's entry without reporting it as complete
    pub fn remove(&mut self, name: &str) {
        self.entries.remove(name);
    }

    pub fn get(&self, name: &str) -> Option<Percent> {
        self.entries.get(name).copied()
    }

    pub fn snapshot(&self) -> BTreeMap<String, Percent> {
        self.entries.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Formats the report line, then evicts every completed entry.
    pub fn render_and_evict(&mut self, waiting: usize) -> String {
        let running: Vec<String> = self
            .entries
            .iter()
            .map(|(name, percent)| format!("{name}: {percent}%"))
            .collect();
        let line = format!(
            "Progress. Enqueued {} jobs. Running: {}",
            waiting,
            running.join("\t")
        );

        self.entries.retain(|_, percent| *percent < 100);

        line
    }
}
