//! Static analysis configuration.
//!
//! One explicit struct per analysis mode, validated once before any
//! simulation runs. Nothing here is inspected by string key at runtime: link
//! names are resolved against the series store when an analysis is built,
//! and catchment peer names are resolved into a [`crate::topology`] arena.

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Configuration rejected before simulation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must be a finite non-negative number, got {value}")]
    Negative { field: &'static str, value: f64 },
    #[error("{field} must be strictly positive, got {value}")]
    NonPositive { field: &'static str, value: f64 },
    #[error("analysis period start {start} is not before end {end}")]
    InvalidPeriod {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
    #[error("invalid season date {month}/{day}")]
    InvalidSeasonDate { month: u32, day: u32 },
    #[error("'{0}' sets a bathing spill target without a bathing season")]
    MissingBathingSeason(String),
    #[error("'{0}' sets a bathing season without a bathing spill target")]
    MissingBathingTarget(String),
    #[error("unknown pumping mode '{0}' (expected 'fixed' or 'variable')")]
    UnknownPumpMode(String),
    #[error("unknown draindown model '{0}' (expected 'independent' or 'coordinated')")]
    UnknownDraindownModel(String),
    #[error("pump on threshold {on} exceeds pump off threshold {off}")]
    InvalidHysteresis { on: f64, off: f64 },
    #[error("configuration entry has an empty name")]
    EmptyName,
}

fn non_negative(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Negative { field, value })
    }
}

fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NonPositive { field, value })
    }
}

// ---------------------------------------------------------------------------
// Spill thresholds and targets
// ---------------------------------------------------------------------------

/// What counts as a spill: flow above `flow_m3s` totalling at least
/// `volume_m3` over an event window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpillThresholds {
    pub flow_m3s: f64,
    pub volume_m3: f64,
}

impl SpillThresholds {
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_negative("spill flow threshold", self.flow_m3s)?;
        non_negative("spill volume threshold", self.volume_m3)
    }
}

/// A calendar day without a year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SeasonDate {
    pub month: u32,
    pub day: u32,
}

impl SeasonDate {
    pub fn new(month: u32, day: u32) -> Result<Self, ConfigError> {
        // A leap year so that 29 February is accepted.
        NaiveDate::from_ymd_opt(2000, month, day)
            .map(|_| Self { month, day })
            .ok_or(ConfigError::InvalidSeasonDate { month, day })
    }

    pub fn of<D: Datelike>(date: &D) -> Self {
        Self {
            month: date.month(),
            day: date.day(),
        }
    }
}

impl fmt::Display for SeasonDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}-{:02}", self.month, self.day)
    }
}

/// An inclusive month/day range, possibly wrapping the year boundary
/// (e.g. 1 November to 28 February).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BathingSeason {
    pub start: SeasonDate,
    pub end: SeasonDate,
}

impl BathingSeason {
    pub fn new(start: SeasonDate, end: SeasonDate) -> Self {
        Self { start, end }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        SeasonDate::new(self.start.month, self.start.day)?;
        SeasonDate::new(self.end.month, self.end.day)?;
        Ok(())
    }

    /// Whether the calendar day of `date` falls inside the season.
    pub fn contains<D: Datelike>(&self, date: &D) -> bool {
        let day = SeasonDate::of(date);
        if self.start <= self.end {
            self.start <= day && day <= self.end
        } else {
            day >= self.start || day <= self.end
        }
    }
}

/// A stricter spill target applied to events starting inside a season.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BathingTarget {
    pub season: BathingSeason,
    pub spill_target: u32,
}

/// Permitted spill counts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpillTargets {
    pub entire_period: u32,
    #[serde(default)]
    pub bathing: Option<BathingTarget>,
}

impl SpillTargets {
    /// Targets for the whole period only.
    pub fn entire(entire_period: u32) -> Self {
        Self {
            entire_period,
            bathing: None,
        }
    }

    /// Assemble targets from optional bathing parts, rejecting a target
    /// without a season and a season without a target.
    pub fn from_parts(
        owner: &str,
        entire_period: u32,
        bathing_target: Option<u32>,
        season: Option<BathingSeason>,
    ) -> Result<Self, ConfigError> {
        let bathing = match (bathing_target, season) {
            (Some(spill_target), Some(season)) => {
                season.validate()?;
                Some(BathingTarget {
                    season,
                    spill_target,
                })
            }
            (Some(_), None) => return Err(ConfigError::MissingBathingSeason(owner.to_string())),
            (None, Some(_)) => return Err(ConfigError::MissingBathingTarget(owner.to_string())),
            (None, None) => None,
        };
        Ok(Self {
            entire_period,
            bathing,
        })
    }

    pub fn season(&self) -> Option<&BathingSeason> {
        self.bathing.as_ref().map(|b| &b.season)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(bathing) = &self.bathing {
            bathing.season.validate()?;
        }
        Ok(())
    }
}

/// Optional clipping window `[start, end)` applied to the input series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisPeriod {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl AnalysisPeriod {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Result<Self, ConfigError> {
        let period = Self { start, end };
        period.validate()?;
        Ok(period)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.start >= self.end {
            return Err(ConfigError::InvalidPeriod {
                start: self.start,
                end: self.end,
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Draindown
// ---------------------------------------------------------------------------

/// How a CSO tank pump returns stored water to the continuation link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PumpMode {
    /// Constant pump rate.
    Fixed,
    /// Top the continuation flow up to the return threshold.
    Variable,
}

impl FromStr for PumpMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(PumpMode::Fixed),
            "variable" => Ok(PumpMode::Variable),
            _ => Err(ConfigError::UnknownPumpMode(s.to_string())),
        }
    }
}

/// Conditions and rate for draining a CSO tank.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DrainConfig {
    pub pump_mode: PumpMode,
    /// Drain rate in Fixed mode, m³/s.
    pub pump_rate_m3s: f64,
    /// Continuation flow must be below this to drain, m³/s.
    pub flow_return_threshold_m3s: f64,
    /// Continuation depth must be below this to drain, m.
    pub depth_return_threshold_m: f64,
    /// Continuation flow must have stayed below the flow threshold for
    /// this long before draining.
    pub time_delay_hours: f64,
}

impl DrainConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_negative("pump rate", self.pump_rate_m3s)?;
        non_negative("flow return threshold", self.flow_return_threshold_m3s)?;
        non_negative("depth return threshold", self.depth_return_threshold_m)?;
        non_negative("time delay", self.time_delay_hours)
    }
}

// ---------------------------------------------------------------------------
// Single CSO
// ---------------------------------------------------------------------------

/// A single CSO analysed on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsoConfig {
    pub name: String,
    /// Link carrying the spill that the tank intercepts.
    pub overflow_link: String,
    /// Link carrying the pass-forward flow the tank drains into.
    pub continuation_link: String,
    pub thresholds: SpillThresholds,
    pub targets: SpillTargets,
    pub drain: DrainConfig,
    /// Skip the search and report this volume.
    #[serde(default)]
    pub fixed_tank_volume_m3: Option<f64>,
    #[serde(default)]
    pub period: Option<AnalysisPeriod>,
}

impl CsoConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }
        self.thresholds.validate()?;
        self.targets.validate()?;
        self.drain.validate()?;
        if let Some(volume) = self.fixed_tank_volume_m3 {
            non_negative("fixed tank volume", volume)?;
        }
        if let Some(period) = &self.period {
            period.validate()?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Catchment
// ---------------------------------------------------------------------------

/// How draindown is coordinated between nodes of a catchment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraindownModel {
    /// Model 1: each tank drains on its own local conditions.
    #[default]
    Independent,
    /// Model 2: a tank may not drain while anything downstream holds water.
    Coordinated,
}

impl FromStr for DraindownModel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "independent" | "1" => Ok(DraindownModel::Independent),
            "coordinated" | "2" => Ok(DraindownModel::Coordinated),
            _ => Err(ConfigError::UnknownDraindownModel(s.to_string())),
        }
    }
}

/// One CSO inside a catchment, with its links to peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatchmentNodeConfig {
    pub cso: CsoConfig,
    #[serde(default)]
    pub downstream: Option<String>,
    #[serde(default)]
    pub upstream: Vec<String>,
    /// Extra continuation capacity available to upstream delta, m³/s.
    #[serde(default)]
    pub max_pass_forward_flow_m3s: Option<f64>,
    /// Pipe length to the downstream node, m.
    #[serde(default)]
    pub distance_m: Option<f64>,
    /// Flow velocity to the downstream node, m/s.
    #[serde(default)]
    pub velocity_ms: Option<f64>,
}

impl CatchmentNodeConfig {
    /// A node with no declared peers.
    pub fn new(cso: CsoConfig) -> Self {
        Self {
            cso,
            downstream: None,
            upstream: Vec::new(),
            max_pass_forward_flow_m3s: None,
            distance_m: None,
            velocity_ms: None,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cso.validate()?;
        if let Some(pff) = self.max_pass_forward_flow_m3s {
            non_negative("max pass forward flow", pff)?;
        }
        if let Some(distance) = self.distance_m {
            non_negative("distance", distance)?;
        }
        if let Some(velocity) = self.velocity_ms {
            positive("velocity", velocity)?;
        }
        Ok(())
    }

    /// Travel time to the downstream node in seconds, zero when unknown.
    pub fn travel_seconds(&self) -> f64 {
        match (self.distance_m, self.velocity_ms) {
            (Some(distance), Some(velocity)) if velocity > 0.0 => distance / velocity,
            _ => 0.0,
        }
    }
}

/// A set of interconnected CSOs sized together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatchmentConfig {
    pub name: String,
    pub nodes: Vec<CatchmentNodeConfig>,
    #[serde(default)]
    pub draindown_model: DraindownModel,
}

impl CatchmentConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }
        self.nodes.iter().try_for_each(CatchmentNodeConfig::validate)
    }
}

// ---------------------------------------------------------------------------
// WWTW
// ---------------------------------------------------------------------------

/// Pump hysteresis and final effluent capacity at a treatment works inlet.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WwtwPumpConfig {
    pub pump_rate_m3s: f64,
    /// Pump may start when the continuation flow is below this, m³/s.
    pub pump_on_threshold_m3s: f64,
    /// Pump stops when the continuation flow rises above this, m³/s.
    pub pump_off_threshold_m3s: f64,
    /// Flow to full treatment cannot exceed this, m³/s. `None` is unlimited.
    #[serde(default)]
    pub fft_capacity_m3s: Option<f64>,
    pub time_delay_hours: f64,
}

impl WwtwPumpConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_negative("pump rate", self.pump_rate_m3s)?;
        non_negative("pump on threshold", self.pump_on_threshold_m3s)?;
        non_negative("pump off threshold", self.pump_off_threshold_m3s)?;
        non_negative("time delay", self.time_delay_hours)?;
        if let Some(fft) = self.fft_capacity_m3s {
            non_negative("FFT capacity", fft)?;
        }
        if self.pump_on_threshold_m3s > self.pump_off_threshold_m3s {
            return Err(ConfigError::InvalidHysteresis {
                on: self.pump_on_threshold_m3s,
                off: self.pump_off_threshold_m3s,
            });
        }
        Ok(())
    }
}

/// A storm tank at a wastewater treatment works inlet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WwtwConfig {
    pub name: String,
    pub overflow_link: String,
    pub continuation_link: String,
    pub thresholds: SpillThresholds,
    pub targets: SpillTargets,
    pub pump: WwtwPumpConfig,
    #[serde(default)]
    pub fixed_tank_volume_m3: Option<f64>,
    #[serde(default)]
    pub period: Option<AnalysisPeriod>,
}

impl WwtwConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }
        self.thresholds.validate()?;
        self.targets.validate()?;
        self.pump.validate()?;
        if let Some(volume) = self.fixed_tank_volume_m3 {
            non_negative("fixed tank volume", volume)?;
        }
        if let Some(period) = &self.period {
            period.validate()?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Analysis mode
// ---------------------------------------------------------------------------

/// One analysis, tagged by mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AnalysisConfig {
    /// A single CSO.
    Default(CsoConfig),
    /// Several CSOs connected upstream to downstream.
    Catchment(CatchmentConfig),
    /// A treatment works inlet.
    Wwtw(WwtwConfig),
}

impl AnalysisConfig {
    pub fn name(&self) -> &str {
        match self {
            AnalysisConfig::Default(c) => &c.name,
            AnalysisConfig::Catchment(c) => &c.name,
            AnalysisConfig::Wwtw(c) => &c.name,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            AnalysisConfig::Default(c) => c.validate(),
            AnalysisConfig::Catchment(c) => c.validate(),
            AnalysisConfig::Wwtw(c) => c.validate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;

    #[test]
    fn season_without_wrap() {
        let season = BathingSeason::new(
            SeasonDate::new(5, 15).unwrap(),
            SeasonDate::new(9, 30).unwrap(),
        );
        assert!(season.contains(&date(2021, 5, 15)));
        assert!(season.contains(&date(2021, 7, 1)));
        assert!(season.contains(&date(2021, 9, 30)));
        assert!(!season.contains(&date(2021, 10, 1)));
        assert!(!season.contains(&date(2021, 1, 1)));
    }

    #[test]
    fn season_wrapping_year_end() {
        let season = BathingSeason::new(
            SeasonDate::new(11, 1).unwrap(),
            SeasonDate::new(2, 28).unwrap(),
        );
        assert!(season.contains(&date(2021, 1, 15)));
        assert!(season.contains(&date(2021, 12, 25)));
        assert!(!season.contains(&date(2021, 6, 1)));
        assert!(!season.contains(&date(2021, 3, 1)));
    }

    #[test]
    fn season_date_rejects_impossible_day() {
        assert!(SeasonDate::new(2, 29).is_ok());
        assert_eq!(
            SeasonDate::new(2, 30),
            Err(ConfigError::InvalidSeasonDate { month: 2, day: 30 })
        );
        assert!(SeasonDate::new(13, 1).is_err());
    }

    #[test]
    fn bathing_target_requires_season() {
        let season = BathingSeason::new(
            SeasonDate::new(5, 15).unwrap(),
            SeasonDate::new(9, 30).unwrap(),
        );
        assert!(SpillTargets::from_parts("cso", 10, Some(2), Some(season)).is_ok());
        assert_eq!(
            SpillTargets::from_parts("cso", 10, Some(2), None),
            Err(ConfigError::MissingBathingSeason("cso".into()))
        );
        assert_eq!(
            SpillTargets::from_parts("cso", 10, None, Some(season)),
            Err(ConfigError::MissingBathingTarget("cso".into()))
        );
        assert_eq!(
            SpillTargets::from_parts("cso", 10, None, None),
            Ok(SpillTargets::entire(10))
        );
    }

    #[test]
    fn pump_mode_parsing() {
        assert_eq!("Fixed".parse::<PumpMode>(), Ok(PumpMode::Fixed));
        assert_eq!(" variable ".parse::<PumpMode>(), Ok(PumpMode::Variable));
        assert_eq!(
            "siphon".parse::<PumpMode>(),
            Err(ConfigError::UnknownPumpMode("siphon".into()))
        );
    }

    #[test]
    fn draindown_model_parsing() {
        assert_eq!(
            "Coordinated".parse::<DraindownModel>(),
            Ok(DraindownModel::Coordinated)
        );
        assert_eq!("1".parse::<DraindownModel>(), Ok(DraindownModel::Independent));
        assert!(matches!(
            "staggered".parse::<DraindownModel>(),
            Err(ConfigError::UnknownDraindownModel(_))
        ));
    }

    #[test]
    fn period_must_be_ordered() {
        let a = date(2020, 1, 1);
        let b = date(2021, 1, 1);
        assert!(AnalysisPeriod::new(a, b).is_ok());
        assert!(matches!(
            AnalysisPeriod::new(b, a),
            Err(ConfigError::InvalidPeriod { .. })
        ));
        assert!(AnalysisPeriod::new(a, a).is_err());
    }

    #[test]
    fn negative_threshold_rejected() {
        let mut config = cso_config("cso_1");
        config.thresholds.flow_m3s = -0.1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Negative { field: "spill flow threshold", .. })
        ));

        let mut config = cso_config("cso_1");
        config.drain.pump_rate_m3s = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn wwtw_hysteresis_must_be_ordered() {
        let mut config = wwtw_config("works");
        config.pump.pump_on_threshold_m3s = 2.0;
        config.pump.pump_off_threshold_m3s = 1.0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidHysteresis { on: 2.0, off: 1.0 })
        );
    }

    #[test]
    fn catchment_node_rejects_zero_velocity() {
        let mut node = CatchmentNodeConfig::new(cso_config("a"));
        node.distance_m = Some(100.0);
        node.velocity_ms = Some(0.0);
        assert!(matches!(
            node.validate(),
            Err(ConfigError::NonPositive { field: "velocity", .. })
        ));
        node.velocity_ms = Some(2.0);
        assert!(node.validate().is_ok());
        assert_eq!(node.travel_seconds(), 50.0);
    }

    #[test]
    fn analysis_config_round_trips_through_json() {
        let config = AnalysisConfig::Default(cso_config("cso_1"));
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"mode\":\"default\""));
        let back: AnalysisConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
        assert_eq!(back.name(), "cso_1");
    }
}
