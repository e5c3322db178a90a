//! Results handed back to callers once a node is solved.

use chrono::Datelike;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::series::Timeline;
use crate::spill::{SpillCounts, SpillEvent};

/// The simulated series of a solved node next to the observed ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedSeries {
    pub timeline: Timeline,
    pub original_spill: Vec<f64>,
    pub original_continuation: Vec<f64>,
    pub spill: Vec<f64>,
    pub continuation: Vec<f64>,
    pub tank_volume: Vec<f64>,
    /// WWTW only: pumped volume returned to storage each step, m³.
    #[serde(default)]
    pub recirculated: Option<Vec<f64>>,
    /// WWTW only: pump state after the hysteresis tests.
    #[serde(default)]
    pub pump_on: Option<Vec<bool>>,
    /// Catchment only: delta flow received from upstream nodes, m³/s.
    #[serde(default)]
    pub incoming_delta: Option<Vec<f64>>,
    /// Catchment only: continuation flow added by this node, m³/s.
    #[serde(default)]
    pub outgoing_delta: Option<Vec<f64>>,
}

impl AnnotatedSeries {
    pub(crate) fn new(
        timeline: Timeline,
        original_spill: &[f64],
        original_continuation: &[f64],
        spill: Vec<f64>,
        continuation: Vec<f64>,
        tank_volume: Vec<f64>,
    ) -> Self {
        Self {
            timeline,
            original_spill: original_spill.to_vec(),
            original_continuation: original_continuation.to_vec(),
            spill,
            continuation,
            tank_volume,
            recirculated: None,
            pump_on: None,
            incoming_delta: None,
            outgoing_delta: None,
        }
    }

    pub fn len(&self) -> usize {
        self.spill.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spill.is_empty()
    }
}

/// Outcome for one solved CSO or WWTW inlet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub name: String,
    pub converged: bool,
    pub iterations: u32,
    pub final_storage_m3: f64,
    pub spill_count: u32,
    pub bathing_spill_count: u32,
    pub spill_events: Vec<SpillEvent>,
    pub annotated_time_series: AnnotatedSeries,
    /// `(volume, spill count)` for every volume tried, in order.
    pub iteration_history: Vec<(f64, u32)>,
}

impl AnalysisResult {
    pub(crate) fn new(
        name: &str,
        converged: bool,
        iterations: u32,
        final_storage_m3: f64,
        spill_events: Vec<SpillEvent>,
        annotated_time_series: AnnotatedSeries,
        iteration_history: Vec<(f64, u32)>,
    ) -> Self {
        let counts = SpillCounts::of(&spill_events);
        Self {
            name: name.to_string(),
            converged,
            iterations,
            final_storage_m3,
            spill_count: counts.entire,
            bathing_spill_count: counts.bathing,
            spill_events,
            annotated_time_series,
            iteration_history,
        }
    }

    pub fn summary(&self) -> ResultSummary {
        ResultSummary::of(&self.spill_events)
    }
}

/// Totals over a result's spill events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSummary {
    pub total_spill_volume_m3: f64,
    pub total_spill_hours: f64,
    pub largest_event_m3: Option<f64>,
    /// Events per calendar year of their start time.
    pub spills_per_year: BTreeMap<i32, u32>,
}

impl ResultSummary {
    pub fn of(events: &[SpillEvent]) -> Self {
        let mut summary = Self::default();
        for event in events {
            summary.total_spill_volume_m3 += event.volume_m3;
            summary.total_spill_hours += event.spill_duration_hours;
            summary.largest_event_m3 = Some(
                summary
                    .largest_event_m3
                    .map_or(event.volume_m3, |v| v.max(event.volume_m3)),
            );
            *summary
                .spills_per_year
                .entry(event.start_time.year())
                .or_insert(0) += 1;
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;

    #[test]
    fn summary_totals_and_groups_by_year() {
        let mut events = events_with_volumes(&[120.0, 40.0, 300.0]);
        events[0].start_time = date(2019, 12, 31);
        events[1].start_time = date(2020, 1, 2);
        events[2].start_time = date(2020, 8, 9);
        for e in &mut events {
            e.spill_duration_hours = 1.5;
        }
        let s = ResultSummary::of(&events);
        assert_eq!(s.total_spill_volume_m3, 460.0);
        assert_eq!(s.total_spill_hours, 4.5);
        assert_eq!(s.largest_event_m3, Some(300.0));
        assert_eq!(s.spills_per_year.get(&2019), Some(&1));
        assert_eq!(s.spills_per_year.get(&2020), Some(&2));
    }

    #[test]
    fn empty_summary() {
        let s = ResultSummary::of(&[]);
        assert_eq!(s.total_spill_volume_m3, 0.0);
        assert_eq!(s.largest_event_m3, None);
        assert!(s.spills_per_year.is_empty());
    }
}
