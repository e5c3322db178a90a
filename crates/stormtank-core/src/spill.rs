//! Spill event detection using the 12/24-hour counting rule.
//!
//! A spill event opens when flow first exceeds the flow threshold. After
//! twelve hours the volume spilled over the preceding twelve hours decides
//! whether it counts; once counted, every further 24-hour block that still
//! contains spill counts as one more event, until a whole block passes dry.
//!
//! The detector is a small counting automaton and must see samples strictly
//! in order. It holds no state between calls.

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::config::{BathingSeason, SpillTargets, SpillThresholds};
use crate::series::{SECONDS_PER_HOUR, Timeline, rolling_sum_preceding};

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Length of the counting window an event was measured over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventWindow {
    /// The opening window of a new event.
    TwelveHour,
    /// A continuation block of an event already counted.
    TwentyFourHour,
}

impl EventWindow {
    pub fn hours(self) -> u32 {
        match self {
            EventWindow::TwelveHour => 12,
            EventWindow::TwentyFourHour => 24,
        }
    }
}

/// One counted spill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpillEvent {
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub window: EventWindow,
    /// Time the flow actually exceeded the threshold inside the window.
    pub spill_duration_hours: f64,
    /// Spill volume over the window, m³.
    pub volume_m3: f64,
    pub peak_flow_m3s: f64,
    pub in_bathing_season: bool,
}

impl SpillEvent {
    pub fn window_duration_hours(&self) -> u32 {
        self.window.hours()
    }
}

// ---------------------------------------------------------------------------
// Counts
// ---------------------------------------------------------------------------

/// Number of events over the entire period and inside the bathing season.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpillCounts {
    pub entire: u32,
    pub bathing: u32,
}

impl SpillCounts {
    pub fn of(events: &[SpillEvent]) -> Self {
        Self {
            entire: events.len() as u32,
            bathing: events.iter().filter(|e| e.in_bathing_season).count() as u32,
        }
    }

    /// How far these counts sit above the targets. Zero or negative means
    /// every target is met.
    pub fn excess(&self, targets: &SpillTargets) -> i64 {
        let entire = self.entire as i64 - targets.entire_period as i64;
        match &targets.bathing {
            Some(bathing) => entire.max(self.bathing as i64 - bathing.spill_target as i64),
            None => entire,
        }
    }

    pub fn meets(&self, targets: &SpillTargets) -> bool {
        self.excess(targets) <= 0
    }

    /// Whether any active target is hit exactly.
    pub fn hits_exactly(&self, targets: &SpillTargets) -> bool {
        self.entire == targets.entire_period
            || targets
                .bathing
                .as_ref()
                .is_some_and(|b| self.bathing == b.spill_target)
    }
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

/// A window that reached its decision point, before volume filtering.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    /// Sample at which the window closed; the window is the samples before it.
    end_index: usize,
    window: EventWindow,
    volume_m3: f64,
}

/// Spill detector for one link.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpillDetector {
    thresholds: SpillThresholds,
    season: Option<BathingSeason>,
}

impl SpillDetector {
    pub fn new(thresholds: SpillThresholds) -> Self {
        Self {
            thresholds,
            season: None,
        }
    }

    /// Classify events against `season` by their start date.
    pub fn with_season(mut self, season: Option<BathingSeason>) -> Self {
        self.season = season;
        self
    }

    pub fn thresholds(&self) -> &SpillThresholds {
        &self.thresholds
    }

    /// Detect the spill events in `flow`, sampled on `timeline`.
    pub fn detect(&self, flow: &[f64], timeline: &Timeline) -> Vec<SpillEvent> {
        let n = flow.len().min(timeline.len());
        if n == 0 {
            return Vec::new();
        }
        let flow = &flow[..n];
        let dt = timeline.dt();
        let half_day = timeline.steps_for_hours(12.0).max(1);
        let full_day = 2 * half_day;

        let spill: Vec<f64> = flow
            .iter()
            .map(|&q| if q > self.thresholds.flow_m3s { q } else { 0.0 })
            .collect();
        let spill_volume: Vec<f64> = spill.iter().map(|q| q * dt).collect();
        let rolling_12 = rolling_sum_preceding(&spill_volume, half_day);
        let rolling_24 = rolling_sum_preceding(&spill_volume, full_day);

        let candidates = self.count_windows(&spill, &spill_volume, &rolling_12, &rolling_24, half_day);

        candidates
            .into_iter()
            .filter(|c| c.volume_m3 >= self.thresholds.volume_m3)
            .map(|c| {
                let window_samples = match c.window {
                    EventWindow::TwelveHour => half_day,
                    EventWindow::TwentyFourHour => full_day,
                };
                let range = c.end_index.saturating_sub(window_samples)..c.end_index;
                let above = spill[range.clone()].iter().filter(|&&q| q > 0.0).count();
                let peak = flow[range].iter().copied().fold(0.0_f64, f64::max);
                let end_time = timeline.timestamp(c.end_index);
                let start_time = end_time - Duration::hours(c.window.hours() as i64);
                SpillEvent {
                    start_time,
                    end_time,
                    window: c.window,
                    spill_duration_hours: above as f64 * dt / SECONDS_PER_HOUR,
                    volume_m3: c.volume_m3,
                    peak_flow_m3s: peak,
                    in_bathing_season: self.season.is_some_and(|s| s.contains(&start_time)),
                }
            })
            .collect()
    }

    /// Walk the series with the event counter and emit every window that
    /// reaches a decision point.
    fn count_windows(
        &self,
        spill: &[f64],
        spill_volume: &[f64],
        rolling_12: &[f64],
        rolling_24: &[f64],
        half_day: usize,
    ) -> Vec<Candidate> {
        let full_day = 2 * half_day;
        let mut candidates = Vec::new();
        let mut count = 0usize;
        let mut cooldown = 0u32;
        let mut tracker = 0.0;

        for i in 0..spill.len() {
            if count == 0 {
                if spill[i] > 0.0 {
                    count = 1;
                }
            } else if count < half_day {
                count += 1;
                if cooldown > 0 {
                    tracker += spill_volume[i];
                }
            } else if count == half_day && cooldown == 0 {
                let volume = rolling_12[i];
                if volume >= self.thresholds.volume_m3 {
                    candidates.push(Candidate {
                        end_index: i,
                        window: EventWindow::TwelveHour,
                        volume_m3: volume,
                    });
                    cooldown = 1;
                    count = 1;
                    tracker = spill_volume[i];
                } else {
                    count = 0;
                }
            } else if count < full_day {
                count += 1;
                tracker += spill_volume[i];
            } else if tracker > 0.0 {
                // The tracker covers the same 24 samples as `rolling_24[i]`.
                candidates.push(Candidate {
                    end_index: i,
                    window: EventWindow::TwentyFourHour,
                    volume_m3: rolling_24[i],
                });
                cooldown += 1;
                count = 1;
                tracker = spill_volume[i];
            } else {
                // A wet sample on the boundary opens a fresh event.
                count = usize::from(spill[i] > 0.0);
                cooldown = 0;
                tracker = 0.0;
            }
        }
        candidates
    }
}

/// Detect spill events with plain thresholds and no season.
pub fn detect(
    flow: &[f64],
    flow_threshold: f64,
    volume_threshold: f64,
    timeline: &Timeline,
) -> Vec<SpillEvent> {
    SpillDetector::new(SpillThresholds {
        flow_m3s: flow_threshold,
        volume_m3: volume_threshold,
    })
    .detect(flow, timeline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SeasonDate;
    use crate::test_utils::*;

    fn hourly(len: usize) -> Timeline {
        Timeline::new(date(2021, 3, 1), 3600, len).unwrap()
    }

    fn storm(len: usize, wet: std::ops::Range<usize>, q: f64) -> Vec<f64> {
        (0..len).map(|i| if wet.contains(&i) { q } else { 0.0 }).collect()
    }

    #[test]
    fn empty_series_has_no_events() {
        assert!(detect(&[], 0.0, 0.0, &hourly(0)).is_empty());
    }

    #[test]
    fn flow_at_threshold_is_not_a_spill() {
        let flow = vec![0.5; 100];
        assert!(detect(&flow, 0.5, 0.0, &hourly(100)).is_empty());
    }

    #[test]
    fn short_spike_gives_one_twelve_hour_event() {
        let timeline = minute_timeline(1000);
        let flow = spike_series(1000, 100, 30, 1.0);
        let events = detect(&flow, 0.001, 0.0, &timeline);
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.window, EventWindow::TwelveHour);
        assert_eq!(event.window_duration_hours(), 12);
        assert!((event.volume_m3 - 1800.0).abs() < 1e-9);
        assert!((event.spill_duration_hours - 0.5).abs() < 1e-9);
        assert_eq!(event.peak_flow_m3s, 1.0);
        assert_eq!(event.end_time - event.start_time, Duration::hours(12));
    }

    #[test]
    fn long_spill_adds_continuation_event() {
        let flow = storm(100, 0..30, 1.0);
        let events = detect(&flow, 0.0, 0.0, &hourly(100));
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].window, EventWindow::TwelveHour);
        assert!((events[0].volume_m3 - 12.0 * 3600.0).abs() < 1e-6);
        assert!((events[0].spill_duration_hours - 12.0).abs() < 1e-9);
        assert_eq!(events[1].window, EventWindow::TwentyFourHour);
        assert!((events[1].volume_m3 - 18.0 * 3600.0).abs() < 1e-6);
        assert!((events[1].spill_duration_hours - 18.0).abs() < 1e-9);
        assert_eq!(events[1].start_time, events[0].end_time);
    }

    #[test]
    fn wet_sample_on_the_day_boundary_opens_a_new_event() {
        // The opening window closes at hour 12, so the 24-hour decision falls
        // on hour 36.
        let mut flow = storm(72, 0..1, 1.0);
        flow[36] = 1.0;
        let timeline = hourly(72);
        let events = detect(&flow, 0.0, 0.0, &timeline);
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.window == EventWindow::TwelveHour));
        assert_eq!(events[1].start_time, timeline.timestamp(36));
        assert!((events[1].volume_m3 - 3600.0).abs() < 1e-9);
    }

    #[test]
    fn volume_threshold_rejects_small_opening_window() {
        let flow = storm(100, 0..30, 1.0);
        assert!(detect(&flow, 0.0, 50_000.0, &hourly(100)).is_empty());
    }

    #[test]
    fn volume_threshold_drops_small_continuation() {
        let flow = storm(100, 0..15, 1.0);
        assert_eq!(detect(&flow, 0.0, 0.0, &hourly(100)).len(), 2);
        let events = detect(&flow, 0.0, 20_000.0, &hourly(100));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].window, EventWindow::TwelveHour);
    }

    #[test]
    fn separated_storms_count_separately() {
        let mut flow = storm(200, 10..14, 0.2);
        for (i, q) in flow.iter_mut().enumerate() {
            if (100..104).contains(&i) {
                *q = 0.3;
            }
        }
        let events = detect(&flow, 0.01, 0.0, &hourly(200));
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].peak_flow_m3s, 0.2);
        assert_eq!(events[1].peak_flow_m3s, 0.3);
    }

    #[test]
    fn events_are_classified_by_season() {
        let season = BathingSeason::new(
            SeasonDate::new(3, 2).unwrap(),
            SeasonDate::new(9, 30).unwrap(),
        );
        // Storm at hour 10 of 1 March: window starts 1 March, outside.
        // Storm at hour 100 (5 March): inside.
        let mut flow = storm(200, 10..14, 0.2);
        flow[100] = 0.2;
        let detector = SpillDetector::new(SpillThresholds {
            flow_m3s: 0.0,
            volume_m3: 0.0,
        })
        .with_season(Some(season));
        let events = detector.detect(&flow, &hourly(200));
        assert_eq!(events.len(), 2);
        assert!(!events[0].in_bathing_season);
        assert!(events[1].in_bathing_season);
        let counts = SpillCounts::of(&events);
        assert_eq!(counts, SpillCounts { entire: 2, bathing: 1 });
    }

    #[test]
    fn counts_excess_uses_binding_target() {
        let season = BathingSeason::new(
            SeasonDate::new(5, 1).unwrap(),
            SeasonDate::new(9, 30).unwrap(),
        );
        let targets = SpillTargets::from_parts("cso", 10, Some(2), Some(season)).unwrap();
        let counts = SpillCounts { entire: 8, bathing: 5 };
        assert_eq!(counts.excess(&targets), 3);
        assert!(!counts.meets(&targets));
        let counts = SpillCounts { entire: 10, bathing: 1 };
        assert_eq!(counts.excess(&targets), 0);
        assert!(counts.meets(&targets));
        assert!(counts.hits_exactly(&targets));
        assert!(!SpillCounts { entire: 9, bathing: 1 }.hits_exactly(&targets));
    }
}
