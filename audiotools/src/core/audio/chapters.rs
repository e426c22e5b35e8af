//! Chapter file discovery.
//!
//! A book directory holds its chapters as MP3 files whose names start with
//! the chapter number (`001.mp3`, `12 The Storm.mp3`). Other files (intro and
//! outro clips, artwork, descriptions) are ignored.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use walkdir::WalkDir;

use crate::core::{CoreError, CoreResult};

fn chapter_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(\d+).*\.mp3$").expect("chapter pattern is valid"))
}

/// Chapter number for a chapter file name, `None` for non-chapter files
pub fn chapter_number(file_name: &str) -> Option<u64> {
    chapter_name_regex()
        .captures(file_name)
        .and_then(|caps| caps[1].parse().ok())
}

/// Lists the chapter files directly inside `dir`, ordered by chapter number
pub fn discover_chapters(dir: &Path) -> CoreResult<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(CoreError::FileNotFound(dir.display().to_string()));
    }

    let mut chapters: Vec<(u64, String, PathBuf)> = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).follow_links(true) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping unreadable entry during chapter scan");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(number) = chapter_number(&name) {
            chapters.push((number, name, entry.into_path()));
        }
    }

    chapters.sort();
    Ok(chapters.into_iter().map(|(_, _, path)| path).collect())
}

/// Expands command-line inputs: files are kept in order, directories are
/// replaced by their chapters.
pub fn expand_chapter_inputs(inputs: &[PathBuf]) -> CoreResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let chapters = discover_chapters(input)?;
            tracing::info!(
                "Found {} chapter files in {}",
                chapters.len(),
                input.display()
            );
            files.extend(chapters);
        } else if input.is_file() {
            files.push(input.clone());
        } else {
            return Err(CoreError::FileNotFound(input.display().to_string()));
        }
    }
    Ok(files)
}
