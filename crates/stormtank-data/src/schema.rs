//! Serde structs for stormtank project and series files.
//!
//! These define the on-disk format. They are deserialized from RON, JSON or
//! TOML and then resolved into engine types by [`crate::loader`]. Anything a
//! user types as free text (pump modes, season dates) stays a plain value
//! here so a bad entry becomes a validation error naming the analysis rather
//! than an opaque parse failure.

use chrono::NaiveDateTime;
use serde::Deserialize;

// ===========================================================================
// Project
// ===========================================================================

/// Top-level project file: every analysis to run plus any effective links
/// they refer to.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectData {
    #[serde(default)]
    pub effective_links: Vec<EffectiveLinkData>,
    pub analyses: Vec<AnalysisData>,
}

/// A synthetic link made of several monitored ones.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EffectiveLinkData {
    pub name: String,
    pub components: Vec<String>,
}

/// One analysis, tagged by `mode`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AnalysisData {
    Default(CsoData),
    Catchment(CatchmentData),
    Wwtw(WwtwData),
}

// ===========================================================================
// Shared parts
// ===========================================================================

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ThresholdsData {
    pub flow_m3s: f64,
    #[serde(default)]
    pub volume_m3: f64,
}

/// A calendar day, year-agnostic.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct DayData {
    pub month: u32,
    pub day: u32,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SeasonData {
    pub start: DayData,
    pub end: DayData,
}

/// Spill targets. The bathing target and season must come together.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TargetsData {
    pub entire_period: u32,
    #[serde(default)]
    pub bathing_season: Option<u32>,
    #[serde(default)]
    pub season: Option<SeasonData>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PeriodData {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

// ===========================================================================
// Modes
// ===========================================================================

/// CSO draindown settings. `pump_mode` is `"fixed"` or `"variable"`.
#[derive(Debug, Clone, Deserialize)]
pub struct DrainData {
    pub pump_mode: String,
    #[serde(default)]
    pub pump_rate_m3s: f64,
    pub flow_return_threshold_m3s: f64,
    pub depth_return_threshold_m: f64,
    #[serde(default)]
    pub time_delay_hours: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CsoData {
    pub name: String,
    pub overflow_link: String,
    pub continuation_link: String,
    pub thresholds: ThresholdsData,
    pub targets: TargetsData,
    pub drain: DrainData,
    #[serde(default)]
    pub fixed_tank_volume_m3: Option<f64>,
    #[serde(default)]
    pub period: Option<PeriodData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatchmentNodeData {
    pub cso: CsoData,
    #[serde(default)]
    pub downstream: Option<String>,
    #[serde(default)]
    pub upstream: Vec<String>,
    #[serde(default)]
    pub max_pass_forward_flow_m3s: Option<f64>,
    #[serde(default)]
    pub distance_m: Option<f64>,
    #[serde(default)]
    pub velocity_ms: Option<f64>,
}

/// `draindown_model` is `"independent"` (the default) or `"coordinated"`.
#[derive(Debug, Clone, Deserialize)]
pub struct CatchmentData {
    pub name: String,
    pub nodes: Vec<CatchmentNodeData>,
    #[serde(default)]
    pub draindown_model: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PumpData {
    pub pump_rate_m3s: f64,
    pub pump_on_threshold_m3s: f64,
    pub pump_off_threshold_m3s: f64,
    #[serde(default)]
    pub fft_capacity_m3s: Option<f64>,
    #[serde(default)]
    pub time_delay_hours: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WwtwData {
    pub name: String,
    pub overflow_link: String,
    pub continuation_link: String,
    pub thresholds: ThresholdsData,
    pub targets: TargetsData,
    pub pump: PumpData,
    #[serde(default)]
    pub fixed_tank_volume_m3: Option<f64>,
    #[serde(default)]
    pub period: Option<PeriodData>,
}

// ===========================================================================
// Series
// ===========================================================================

/// Monitored link data. The time axis is either explicit `timestamps` or a
/// `start` with `timestep_seconds`.
#[derive(Debug, Clone, Deserialize)]
pub struct SeriesData {
    #[serde(default)]
    pub start: Option<NaiveDateTime>,
    #[serde(default)]
    pub timestep_seconds: Option<u32>,
    #[serde(default)]
    pub timestamps: Vec<NaiveDateTime>,
    pub links: Vec<LinkData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkData {
    pub name: String,
    pub flow: Vec<f64>,
    #[serde(default)]
    pub depth: Option<Vec<f64>>,
}
