//! Time series storage shared by every simulation in a run.
//!
//! All channels in one analysis share a single [`Timeline`]: a start
//! timestamp, a uniform timestep, and a sample count. Channel values are plain
//! `Vec<f64>` aligned index-for-index with the timeline, so the hot loops in
//! the tank simulator and spill detector never touch timestamps.
//!
//! The module also provides the two trailing-window reductions the engine
//! needs: a rolling sum (spill volume over 12/24-hour windows) and a rolling
//! maximum (the draindown time-delay window).

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::ops::Range;

/// Seconds in one hour.
pub const SECONDS_PER_HOUR: f64 = 3600.0;

/// Longest timestep the 12-hour spill window can resolve.
pub const MAX_TIMESTEP_SECONDS: u32 = 12 * 3600;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors raised while building or validating time series.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SeriesError {
    #[error("cannot infer a timestep from fewer than two timestamps")]
    TooFewTimestamps,
    #[error("timestep must be between 1 and {MAX_TIMESTEP_SECONDS} seconds, got {0}")]
    InvalidTimestep(i64),
    #[error("timestamps not strictly increasing at index {index}")]
    NotIncreasing { index: usize },
    #[error("non-uniform timestep at index {index}: expected {expected}s, found {found}s")]
    NonUniform {
        index: usize,
        expected: i64,
        found: i64,
    },
    #[error("channel '{channel}' has {found} samples, timeline has {expected}")]
    LengthMismatch {
        channel: String,
        expected: usize,
        found: usize,
    },
    #[error("channel '{channel}' contains a non-finite value at index {index}")]
    NonFinite { channel: String, index: usize },
}

// ---------------------------------------------------------------------------
// Timeline
// ---------------------------------------------------------------------------

/// The shared time axis of a run: `len` samples starting at `start`, spaced
/// `timestep_seconds` apart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeline {
    start: NaiveDateTime,
    timestep_seconds: u32,
    len: usize,
}

impl Timeline {
    /// Create a timeline from its start, timestep and length.
    pub fn new(
        start: NaiveDateTime,
        timestep_seconds: u32,
        len: usize,
    ) -> Result<Self, SeriesError> {
        if timestep_seconds == 0 || timestep_seconds > MAX_TIMESTEP_SECONDS {
            return Err(SeriesError::InvalidTimestep(timestep_seconds as i64));
        }
        Ok(Self {
            start,
            timestep_seconds,
            len,
        })
    }

    /// Build a timeline from explicit timestamps, checking that they are
    /// strictly increasing and evenly spaced.
    pub fn from_timestamps(timestamps: &[NaiveDateTime]) -> Result<Self, SeriesError> {
        if timestamps.len() < 2 {
            return Err(SeriesError::TooFewTimestamps);
        }
        let expected = (timestamps[1] - timestamps[0]).num_seconds();
        if expected <= 0 {
            return Err(SeriesError::NotIncreasing { index: 1 });
        }
        if expected > MAX_TIMESTEP_SECONDS as i64 {
            return Err(SeriesError::InvalidTimestep(expected));
        }
        for (index, pair) in timestamps.windows(2).enumerate().skip(1) {
            let found = (pair[1] - pair[0]).num_seconds();
            if found <= 0 {
                return Err(SeriesError::NotIncreasing { index: index + 1 });
            }
            if found != expected {
                return Err(SeriesError::NonUniform {
                    index: index + 1,
                    expected,
                    found,
                });
            }
        }
        Self::new(timestamps[0], expected as u32, timestamps.len())
    }

    pub fn start(&self) -> NaiveDateTime {
        self.start
    }

    /// Timestamp of the last sample, or the start when empty.
    pub fn end(&self) -> NaiveDateTime {
        self.timestamp(self.len.saturating_sub(1))
    }

    pub fn timestep_seconds(&self) -> u32 {
        self.timestep_seconds
    }

    /// Timestep as `f64` seconds, for rate × time conversions.
    #[inline]
    pub fn dt(&self) -> f64 {
        self.timestep_seconds as f64
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Timestamp of sample `index`. Indices past the end extrapolate.
    pub fn timestamp(&self, index: usize) -> NaiveDateTime {
        self.start + Duration::seconds(index as i64 * self.timestep_seconds as i64)
    }

    /// Iterate over every sample timestamp.
    pub fn timestamps(&self) -> impl Iterator<Item = NaiveDateTime> + '_ {
        (0..self.len).map(|i| self.timestamp(i))
    }

    /// Number of samples spanning `hours`, rounded to the nearest sample.
    pub fn steps_for_hours(&self, hours: f64) -> usize {
        self.steps_for_seconds(hours * SECONDS_PER_HOUR)
    }

    /// Number of samples spanning `seconds`, rounded to the nearest sample.
    pub fn steps_for_seconds(&self, seconds: f64) -> usize {
        if seconds <= 0.0 || !seconds.is_finite() {
            return 0;
        }
        (seconds / self.dt()).round() as usize
    }

    /// Index range of the samples falling in `[from, to)`.
    pub fn range_between(&self, from: NaiveDateTime, to: NaiveDateTime) -> Range<usize> {
        let step = self.timestep_seconds as i64;
        let first = ((from - self.start).num_seconds() as f64 / step as f64).ceil();
        let last = ((to - self.start).num_seconds() as f64 / step as f64).ceil();
        let clamp = |v: f64| v.clamp(0.0, self.len as f64) as usize;
        let (first, last) = (clamp(first), clamp(last));
        first..last.max(first)
    }

    /// A new timeline covering the sub-range `range` of this one.
    pub fn slice(&self, range: Range<usize>) -> Self {
        let end = range.end.min(self.len);
        let start = range.start.min(end);
        Self {
            start: self.timestamp(start),
            timestep_seconds: self.timestep_seconds,
            len: end - start,
        }
    }

    /// Check that a channel is aligned with this timeline and finite.
    pub fn check_channel(&self, channel: &str, values: &[f64]) -> Result<(), SeriesError> {
        if values.len() != self.len {
            return Err(SeriesError::LengthMismatch {
                channel: channel.to_string(),
                expected: self.len,
                found: values.len(),
            });
        }
        if let Some(index) = values.iter().position(|v| !v.is_finite()) {
            return Err(SeriesError::NonFinite {
                channel: channel.to_string(),
                index,
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Link series
// ---------------------------------------------------------------------------

/// Observed data for one monitored link: flow in m³/s and, optionally,
/// depth in metres.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkSeries {
    pub flow: Vec<f64>,
    #[serde(default)]
    pub depth: Option<Vec<f64>>,
}

impl LinkSeries {
    /// A flow-only link.
    pub fn from_flow(flow: Vec<f64>) -> Self {
        Self { flow, depth: None }
    }

    /// A link with both flow and depth channels.
    pub fn with_depth(flow: Vec<f64>, depth: Vec<f64>) -> Self {
        Self {
            flow,
            depth: Some(depth),
        }
    }

    pub fn len(&self) -> usize {
        self.flow.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flow.is_empty()
    }

    /// Validate both channels against `timeline`.
    pub fn check(&self, name: &str, timeline: &Timeline) -> Result<(), SeriesError> {
        timeline.check_channel(&format!("{name}.flow"), &self.flow)?;
        if let Some(depth) = &self.depth {
            timeline.check_channel(&format!("{name}.depth"), depth)?;
        }
        Ok(())
    }

    /// Copy of the samples in `range`.
    pub fn slice(&self, range: Range<usize>) -> Self {
        Self {
            flow: self.flow[range.clone()].to_vec(),
            depth: self.depth.as_ref().map(|d| d[range].to_vec()),
        }
    }
}

// ---------------------------------------------------------------------------
// Series store
// ---------------------------------------------------------------------------

/// Every link observed in a run, aligned on one timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesStore {
    timeline: Timeline,
    links: HashMap<String, LinkSeries>,
}

impl SeriesStore {
    pub fn new(timeline: Timeline) -> Self {
        Self {
            timeline,
            links: HashMap::new(),
        }
    }

    /// Add a link after checking it against the timeline. Replaces any
    /// previous link of the same name.
    pub fn insert(&mut self, name: impl Into<String>, link: LinkSeries) -> Result<(), SeriesError> {
        let name = name.into();
        link.check(&name, &self.timeline)?;
        self.links.insert(name, link);
        Ok(())
    }

    /// Builder form of [`SeriesStore::insert`].
    pub fn with_link(mut self, name: impl Into<String>, link: LinkSeries) -> Result<Self, SeriesError> {
        self.insert(name, link)?;
        Ok(self)
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn get(&self, name: &str) -> Option<&LinkSeries> {
        self.links.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.links.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Link names, sorted.
    pub fn link_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.links.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

// ---------------------------------------------------------------------------
// Trailing windows
// ---------------------------------------------------------------------------

/// Sum of the `window` samples strictly preceding each index.
///
/// `out[i] = values[i - window..i].sum()`, truncated at the series start.
pub fn rolling_sum_preceding(values: &[f64], window: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(values.len());
    let mut sum: f64 = 0.0;
    for i in 0..values.len() {
        out.push(sum.max(0.0));
        sum += values[i];
        if window == 0 {
            sum = 0.0;
        } else if i >= window {
            sum -= values[i - window];
        }
    }
    out
}

/// Maximum of the `window` samples strictly preceding each index, or `None`
/// when that window is empty (first sample, or zero-width window).
pub fn rolling_max_preceding(values: &[f64], window: usize) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(values.len());
    // Indices of candidate maxima, values decreasing front to back.
    let mut candidates: VecDeque<usize> = VecDeque::new();
    for i in 0..values.len() {
        while let Some(&front) = candidates.front() {
            if front + window < i {
                candidates.pop_front();
            } else {
                break;
            }
        }
        out.push(if window == 0 {
            None
        } else {
            candidates.front().map(|&j| values[j])
        });
        while let Some(&back) = candidates.back() {
            if values[back] <= values[i] {
                candidates.pop_back();
            } else {
                break;
            }
        }
        candidates.push_back(i);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2020, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[test]
    fn timeline_from_uniform_timestamps() {
        let stamps: Vec<_> = (0..5).map(|i| t0() + Duration::minutes(2 * i)).collect();
        let timeline = Timeline::from_timestamps(&stamps).unwrap();
        assert_eq!(timeline.timestep_seconds(), 120);
        assert_eq!(timeline.len(), 5);
        assert_eq!(timeline.end(), stamps[4]);
    }

    #[test]
    fn timeline_rejects_duplicate_timestamp() {
        let stamps = vec![t0(), t0() + Duration::minutes(1), t0() + Duration::minutes(1)];
        assert_eq!(
            Timeline::from_timestamps(&stamps),
            Err(SeriesError::NotIncreasing { index: 2 })
        );
    }

    #[test]
    fn timeline_rejects_gap() {
        let stamps = vec![
            t0(),
            t0() + Duration::minutes(1),
            t0() + Duration::minutes(3),
        ];
        assert!(matches!(
            Timeline::from_timestamps(&stamps),
            Err(SeriesError::NonUniform { index: 2, expected: 60, found: 120 })
        ));
    }

    #[test]
    fn timeline_rejects_zero_and_oversized_step() {
        assert!(Timeline::new(t0(), 0, 10).is_err());
        assert!(Timeline::new(t0(), MAX_TIMESTEP_SECONDS + 1, 10).is_err());
        assert!(Timeline::new(t0(), MAX_TIMESTEP_SECONDS, 10).is_ok());
    }

    #[test]
    fn steps_for_hours_rounds() {
        let timeline = Timeline::new(t0(), 900, 100).unwrap();
        assert_eq!(timeline.steps_for_hours(12.0), 48);
        assert_eq!(timeline.steps_for_hours(0.0), 0);
        assert_eq!(timeline.steps_for_seconds(100.0), 0);
        assert_eq!(timeline.steps_for_seconds(500.0), 1);
    }

    #[test]
    fn range_between_clips_to_timeline() {
        let timeline = Timeline::new(t0(), 3600, 48).unwrap();
        let range = timeline.range_between(t0() + Duration::hours(10), t0() + Duration::hours(20));
        assert_eq!(range, 10..20);
        let range = timeline.range_between(t0() - Duration::hours(5), t0() + Duration::days(5));
        assert_eq!(range, 0..48);
        let sliced = timeline.slice(10..20);
        assert_eq!(sliced.start(), t0() + Duration::hours(10));
        assert_eq!(sliced.len(), 10);
    }

    #[test]
    fn check_channel_reports_length_and_nan() {
        let timeline = Timeline::new(t0(), 60, 3).unwrap();
        assert!(timeline.check_channel("q", &[0.0, 1.0, 2.0]).is_ok());
        assert!(matches!(
            timeline.check_channel("q", &[0.0]),
            Err(SeriesError::LengthMismatch { expected: 3, found: 1, .. })
        ));
        assert!(matches!(
            timeline.check_channel("q", &[0.0, f64::NAN, 1.0]),
            Err(SeriesError::NonFinite { index: 1, .. })
        ));
    }

    #[test]
    fn rolling_sum_excludes_current_sample() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(rolling_sum_preceding(&values, 2), vec![0.0, 1.0, 3.0, 5.0, 7.0]);
        assert_eq!(rolling_sum_preceding(&values, 0), vec![0.0; 5]);
        assert_eq!(rolling_sum_preceding(&values, 10), vec![0.0, 1.0, 3.0, 6.0, 10.0]);
    }

    #[test]
    fn rolling_max_excludes_current_sample() {
        let values = [3.0, 1.0, 2.0, 0.5, 0.0];
        let out = rolling_max_preceding(&values, 2);
        assert_eq!(out, vec![None, Some(3.0), Some(3.0), Some(2.0), Some(2.0)]);
        assert!(rolling_max_preceding(&values, 0).iter().all(Option::is_none));
    }

    #[test]
    fn store_rejects_misaligned_link() {
        let timeline = Timeline::new(t0(), 60, 3).unwrap();
        let mut store = SeriesStore::new(timeline);
        store
            .insert("cso_1", LinkSeries::from_flow(vec![0.0, 0.1, 0.2]))
            .unwrap();
        assert!(store.contains("cso_1"));
        assert!(matches!(
            store.insert("cso_2", LinkSeries::with_depth(vec![0.0; 3], vec![0.0; 2])),
            Err(SeriesError::LengthMismatch { .. })
        ));
        assert!(!store.contains("cso_2"));
        assert_eq!(store.link_names(), vec!["cso_1"]);
    }

    #[test]
    fn link_series_slice_keeps_depth() {
        let link = LinkSeries::with_depth(vec![1.0, 2.0, 3.0], vec![0.1, 0.2, 0.3]);
        let sliced = link.slice(1..3);
        assert_eq!(sliced.flow, vec![2.0, 3.0]);
        assert_eq!(sliced.depth, Some(vec![0.2, 0.3]));
    }
}
