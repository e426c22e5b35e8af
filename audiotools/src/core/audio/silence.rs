//! Silence detection parsing and padding computation.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::TimeSec;

/// A first silence starting later than this is treated as "no leading silence".
pub const LEADING_SILENCE_TOLERANCE_SEC: TimeSec = 0.1;

/// A last silence ending earlier than this before the end is treated as "no trailing silence".
pub const TRAILING_SILENCE_TOLERANCE_SEC: TimeSec = 0.2;

/// A silent interval reported by FFmpeg's `silencedetect`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Silence {
    pub start_sec: TimeSec,
    pub end_sec: TimeSec,
    pub duration_sec: TimeSec,
}

/// Seconds of silence to add at each end of a chapter
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Padding {
    pub begin_sec: TimeSec,
    pub end_sec: TimeSec,
}

impl Padding {
    /// True when nothing needs to be added
    pub fn is_empty(&self) -> bool {
        self.begin_sec <= 0.0 && self.end_sec <= 0.0
    }
}

fn silence_end_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"silence_end: ([\.\d]+) \| silence_duration: ([\.\d]+)")
            .expect("silence_end pattern is valid")
    })
}

/// Parses `silencedetect` stderr output into silences, in stream order.
///
/// Only completed silences (`silence_end` lines) are returned; the start is
/// derived from end and duration.
pub fn parse_silencedetect_output(stderr: &str) -> Vec<Silence> {
    silence_end_regex()
        .captures_iter(stderr)
        .filter_map(|caps| {
            let end_sec: f64 = caps[1].parse().ok()?;
            let duration_sec: f64 = caps[2].parse().ok()?;
            Some(Silence {
                start_sec: end_sec - duration_sec,
                end_sec,
                duration_sec,
            })
        })
        .collect()
}

/// Computes how much silence to add so a chapter starts with at least
/// `min_begin_sec` and ends with at least `min_end_sec` of silence.
pub fn padding_needed(
    silences: &[Silence],
    duration_sec: TimeSec,
    min_begin_sec: TimeSec,
    min_end_sec: TimeSec,
) -> Padding {
    let (Some(first), Some(last)) = (silences.first(), silences.last()) else {
        return Padding {
            begin_sec: min_begin_sec,
            end_sec: min_end_sec,
        };
    };

    let begin_sec = if first.start_sec > LEADING_SILENCE_TOLERANCE_SEC {
        min_begin_sec
    } else {
        (min_begin_sec - first.duration_sec).max(0.0)
    };

    let end_sec = if duration_sec - last.end_sec > TRAILING_SILENCE_TOLERANCE_SEC {
        min_end_sec
    } else {
        (min_end_sec - last.duration_sec).max(0.0)
    };

    Padding { begin_sec, end_sec }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_OUTPUT: &str = "\
[silencedetect @ 0x5581] silence_start: 0
[silencedetect @ 0x5581] silence_end: 0.32 | silence_duration: 0.32
size=N/A time=00:10:00.00 bitrate=N/A speed= 512x
[silencedetect @ 0x5581] silence_start: 118.4
[silencedetect @ 0x5581] silence_end: 119.1 | silence_duration: 0.7
[silencedetect @ 0x5581] silence_start: 598.9
[silencedetect @ 0x5581] silence_end: 600 | silence_duration: 1.1
";

    fn silence(start: f64, end: f64) -> Silence {
        Silence {
            start_sec: start,
            end_sec: end,
            duration_sec: end - start,
        }
    }

    #[test]
    fn test_parse_silencedetect_output() {
        let silences = parse_silencedetect_output(SAMPLE_OUTPUT);
        assert_eq!(silences.len(), 3);
        assert!((silences[0].start_sec - 0.0).abs() < 1e-9);
        assert!((silences[1].start_sec - 118.4).abs() < 1e-9);
        assert_eq!(silences[2].end_sec, 600.0);
        assert_eq!(silences[2].duration_sec, 1.1);
    }

    #[test]
    fn test_parse_ignores_unterminated_silence() {
        let out = "[silencedetect @ 0x1] silence_start: 12.5\n";
        assert!(parse_silencedetect_output(out).is_empty());
    }

    #[test]
    fn test_no_silences_pads_both_ends_fully() {
        let padding = padding_needed(&[], 60.0, 0.5, 2.0);
        assert_eq!(padding, Padding { begin_sec: 0.5, end_sec: 2.0 });
    }

    #[test]
    fn test_existing_silences_reduce_padding() {
        let silences = [silence(0.0, 0.3), silence(59.0, 60.0)];
        let padding = padding_needed(&silences, 60.0, 0.5, 2.0);
        assert!((padding.begin_sec - 0.2).abs() < 1e-9);
        assert!((padding.end_sec - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_long_enough_silences_need_nothing() {
        let silences = [silence(0.0, 0.8), silence(57.0, 60.0)];
        let padding = padding_needed(&silences, 60.0, 0.5, 2.0);
        assert!(padding.is_empty());
    }

    #[test]
    fn test_silences_away_from_edges_are_ignored() {
        // First silence starts after the tolerance, last ends well before the end.
        let silences = [silence(5.0, 7.0), silence(30.0, 33.0)];
        let padding = padding_needed(&silences, 60.0, 0.5, 2.0);
        assert_eq!(padding, Padding { begin_sec: 0.5, end_sec: 2.0 });
    }

    #[test]
    fn test_edge_tolerances() {
        let silences = [silence(0.1, 0.3), silence(58.0, 59.9)];
        let padding = padding_needed(&silences, 60.0, 0.5, 2.0);
        assert!((padding.begin_sec - 0.3).abs() < 1e-9);
        assert!((padding.end_sec - 0.1).abs() < 1e-9);
    }
}
