//! Shared test helpers for unit tests, integration tests and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so these helpers
//! are available everywhere tests run (via the `test-utils` feature outside
//! this crate).

use chrono::{Duration, NaiveDate, NaiveDateTime};

use crate::config::*;
use crate::series::{LinkSeries, SeriesStore, Timeline};
use crate::spill::{EventWindow, SpillEvent};

// ===========================================================================
// Time
// ===========================================================================

pub fn date(year: i32, month: u32, day: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, month, day)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

/// `len` one-minute samples from midnight, 1 January 2021.
pub fn minute_timeline(len: usize) -> Timeline {
    timeline_with_step(len, 60)
}

pub fn timeline_with_step(len: usize, step_seconds: u32) -> Timeline {
    Timeline::new(date(2021, 1, 1), step_seconds, len).unwrap()
}

// ===========================================================================
// Series
// ===========================================================================

/// `q` for `duration` samples from `start`, zero elsewhere.
pub fn spike_series(len: usize, start: usize, duration: usize, q: f64) -> Vec<f64> {
    (0..len)
        .map(|i| if (start..start + duration).contains(&i) { q } else { 0.0 })
        .collect()
}

/// A one-minute store holding `{name}_overflow` with a single spike and a
/// dry, depth-less `{name}_cont`.
pub fn spike_store(name: &str, len: usize, start: usize, duration: usize, q: f64) -> SeriesStore {
    SeriesStore::new(minute_timeline(len))
        .with_link(
            format!("{name}_overflow"),
            LinkSeries::from_flow(spike_series(len, start, duration, q)),
        )
        .unwrap()
        .with_link(format!("{name}_cont"), LinkSeries::from_flow(vec![0.0; len]))
        .unwrap()
}

// ===========================================================================
// Events
// ===========================================================================

pub fn event_with_volume(volume_m3: f64) -> SpillEvent {
    SpillEvent {
        start_time: date(2021, 1, 1),
        end_time: date(2021, 1, 1) + Duration::hours(12),
        window: EventWindow::TwelveHour,
        spill_duration_hours: 1.0,
        volume_m3,
        peak_flow_m3s: 1.0,
        in_bathing_season: false,
    }
}

pub fn events_with_volumes(volumes: &[f64]) -> Vec<SpillEvent> {
    volumes.iter().map(|&v| event_with_volume(v)).collect()
}

// ===========================================================================
// Configuration
// ===========================================================================

/// 15 May to 30 September.
pub fn summer_season() -> BathingSeason {
    BathingSeason::new(
        SeasonDate::new(5, 15).unwrap(),
        SeasonDate::new(9, 30).unwrap(),
    )
}

/// Any flow counts as a spill; no spills allowed; fixed 0.1 m³/s draindown
/// with no time delay.
pub fn cso_config(name: &str) -> CsoConfig {
    CsoConfig {
        name: name.to_string(),
        overflow_link: format!("{name}_overflow"),
        continuation_link: format!("{name}_cont"),
        thresholds: SpillThresholds {
            flow_m3s: 0.001,
            volume_m3: 0.0,
        },
        targets: SpillTargets::entire(0),
        drain: DrainConfig {
            pump_mode: PumpMode::Fixed,
            pump_rate_m3s: 0.1,
            flow_return_threshold_m3s: 0.5,
            depth_return_threshold_m: 1.0,
            time_delay_hours: 0.0,
        },
        fixed_tank_volume_m3: None,
        period: None,
    }
}

/// Same links and thresholds as [`cso_config`], pumping 0.1 m³/s between
/// 0.5 and 0.8 m³/s continuation flow with unlimited FFT.
pub fn wwtw_config(name: &str) -> WwtwConfig {
    WwtwConfig {
        name: name.to_string(),
        overflow_link: format!("{name}_overflow"),
        continuation_link: format!("{name}_cont"),
        thresholds: SpillThresholds {
            flow_m3s: 0.001,
            volume_m3: 0.0,
        },
        targets: SpillTargets::entire(0),
        pump: WwtwPumpConfig {
            pump_rate_m3s: 0.1,
            pump_on_threshold_m3s: 0.5,
            pump_off_threshold_m3s: 0.8,
            fft_capacity_m3s: None,
            time_delay_hours: 0.0,
        },
        fixed_tank_volume_m3: None,
        period: None,
    }
}

pub fn catchment_config(name: &str, nodes: Vec<CatchmentNodeConfig>) -> CatchmentConfig {
    CatchmentConfig {
        name: name.to_string(),
        nodes,
        draindown_model: DraindownModel::Independent,
    }
}
