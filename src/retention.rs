// Audience retention analysis
//
// Turns an ordered (position, watch ratio) series into drop insights and
// timeline-aware coaching tips.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Minimum fall in watch-ratio percentage points between adjacent entries
pub const DROP_THRESHOLD: f64 = -5.0;

/// One entry of a retention series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionPoint {
    /// Fraction of the video elapsed, 0.0 to 1.0
    pub position: f64,
    /// Audience watch ratio as a percentage
    pub watch_ratio: f64,
}

impl RetentionPoint {
    pub fn new(position: f64, watch_ratio: f64) -> Self {
        Self {
            position,
            watch_ratio,
        }
    }
}

/// A retention drop between two adjacent entries
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DropInsight {
    pub at_percent: u8,
    pub change_percent: f64,
}

impl AsRef<DropInsight> for DropInsight {
    fn as_ref(&self) -> &DropInsight {
        self
    }
}

/// A drop together with the unrounded position it was detected at
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocatedDrop {
    /// Fraction of the video elapsed, as reported
    pub position: f64,
    pub insight: DropInsight,
}

impl AsRef<DropInsight> for LocatedDrop {
    fn as_ref(&self) -> &DropInsight {
        &self.insight
    }
}

/// A drop placed on the video timeline with a suggestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotatedDrop {
    pub at_percent: u8,
    pub change_percent: f64,
    pub at_seconds: u64,
    pub tip: String,
}

/// Detect drops of at least five percentage points between adjacent entries.
///
/// Entries are taken in the order given. A pair where either watch ratio is
/// not finite yields nothing.
pub fn detect_drops(series: &[RetentionPoint]) -> Vec<DropInsight> {
    locate_drops(series).into_iter().map(|d| d.insight).collect()
}

/// Same as [`detect_drops`], keeping each drop's raw position
pub fn locate_drops(series: &[RetentionPoint]) -> Vec<LocatedDrop> {
    series
        .windows(2)
        .filter_map(|pair| {
            let (previous, current) = (pair[0], pair[1]);
            // Snapped so that exact five-point falls are not lost to float error
            let delta = snap(current.watch_ratio - previous.watch_ratio);

            (delta.is_finite() && delta <= DROP_THRESHOLD).then(|| LocatedDrop {
                position: current.position,
                insight: DropInsight {
                    at_percent: position_percent(current.position),
                    change_percent: round_one_decimal(delta),
                },
            })
        })
        .collect()
}

/// The `k` steepest drops, steepest first; equal drops keep timeline order
pub fn top_drops<D: AsRef<DropInsight> + Clone>(drops: &[D], k: usize) -> Vec<D> {
    let mut sorted = drops.to_vec();
    // Stable sort keeps ties in input order
    sorted.sort_by(|a, b| {
        a.as_ref()
            .change_percent
            .total_cmp(&b.as_ref().change_percent)
    });
    sorted.truncate(k);
    sorted
}

/// Place drops on the timeline of a video `video_secs` long.
///
/// Seconds come from the raw position, not the rounded percentage.
pub fn annotate(drops: &[LocatedDrop], video_secs: u64) -> Vec<AnnotatedDrop> {
    if video_secs == 0 {
        return Vec::new();
    }

    drops
        .iter()
        .map(|drop| {
            let fraction = if drop.position.is_finite() {
                drop.position.clamp(0.0, 1.0)
            } else {
                0.0
            };
            let at_seconds = (fraction * video_secs as f64).round() as u64;
            AnnotatedDrop {
                at_percent: drop.insight.at_percent,
                change_percent: drop.insight.change_percent,
                at_seconds,
                tip: tip_for_second(at_seconds).to_string(),
            }
        })
        .collect()
}

/// Coaching tip for a drop at `second` into the video
pub fn tip_for_second(second: u64) -> &'static str {
    match second {
        0..=10 => "open with a stronger hook, quick payoff in 0-10s",
        11..=30 => "tighten intro, cut filler, show the outcome earlier",
        31..=60 => "restate value, add motion/B-roll, remove a dead sentence",
        _ => "refresh pacing or add pattern-break (graphic, jump-cut, reveal)",
    }
}

/// Coerce raw analytics rows into a series.
///
/// Rows are `[elapsedVideoTimeRatio, audienceWatchRatio, ...]`; see
/// [`series_from_columns`].
pub fn series_from_rows(rows: &[Vec<Value>]) -> Vec<RetentionPoint> {
    series_from_columns(rows, 0, 1)
}

/// Coerce raw analytics rows into a series, reading the position and watch
/// ratio from the given columns.
///
/// The watch ratio is a fraction and is scaled to a percentage. Cells may be
/// numbers or numeric strings; anything else becomes NaN. Rows missing either
/// column are skipped.
pub fn series_from_columns(
    rows: &[Vec<Value>],
    position_col: usize,
    ratio_col: usize,
) -> Vec<RetentionPoint> {
    rows.iter()
        .filter_map(|row| {
            let position = row.get(position_col)?;
            let ratio = row.get(ratio_col)?;
            Some(RetentionPoint::new(
                coerce_number(position),
                snap(coerce_number(ratio) * 100.0),
            ))
        })
        .collect()
}

/// Parse an ISO 8601 duration such as `PT1H2M3S` into seconds.
///
/// Input not starting with `PT` yields 0; unknown designators are ignored.
/// Values too large for `u64` saturate.
pub fn parse_iso8601_duration(duration: &str) -> u64 {
    let Some(rest) = duration.strip_prefix("PT") else {
        return 0;
    };

    let mut total = 0u64;
    let mut number = String::new();

    for ch in rest.chars() {
        if ch.is_ascii_digit() {
            number.push(ch);
            continue;
        }
        if number.is_empty() {
            continue;
        }

        // Only digits were collected, so a parse failure means overflow
        let value: u64 = number.parse().unwrap_or(u64::MAX);
        let seconds = match ch {
            'H' => value.saturating_mul(3600),
            'M' => value.saturating_mul(60),
            'S' => value,
            _ => 0,
        };
        total = total.saturating_add(seconds);
        number.clear();
    }

    total
}

/// Extract a video id from a bare id or a watch/short/embed URL
pub fn extract_video_id(input: &str) -> Option<String> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    if !input.contains("youtube.com") && !input.contains("youtu.be") {
        return Some(input.to_string());
    }

    let with_scheme = if input.contains("://") {
        input.to_string()
    } else {
        format!("https://{input}")
    };
    let url = reqwest::Url::parse(&with_scheme).ok()?;
    let host = url.host_str().unwrap_or_default();

    let id = if host.ends_with("youtu.be") {
        url.path_segments()
            .and_then(|mut segments| segments.next())
            .map(str::to_string)
    } else if url.path().starts_with("/watch") {
        url.query_pairs()
            .find(|(key, _)| key == "v")
            .map(|(_, value)| value.trim().to_string())
    } else {
        url.path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .map(str::to_string)
    };

    id.filter(|id| !id.is_empty())
}

fn position_percent(position: f64) -> u8 {
    if !position.is_finite() {
        return 0;
    }
    (position * 100.0).round().clamp(0.0, 100.0) as u8
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Round away float noise below 1e-9
fn snap(value: f64) -> f64 {
    if value.abs() < 1e15 {
        (value * 1e9).round() / 1e9
    } else {
        value
    }
}

fn coerce_number(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(s) => s.trim().parse().unwrap_or(f64::NAN),
        _ => f64::NAN,
    }
}
