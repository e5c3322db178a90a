//! Resolved project types.
//!
//! Turns the on-disk structs of [`crate::schema`] into engine configuration,
//! checking every link reference against the loaded series.

use std::path::Path;

use stormtank_core::analysis::AnalysisOutcome;
use stormtank_core::batch::{Analysis, solve_all};
use stormtank_core::config::*;
use stormtank_core::error::AnalysisError;
use stormtank_core::series::{LinkSeries, SeriesStore, Timeline};
use stormtank_core::topology::CatchmentTopology;

use crate::loader::DataLoadError;
use crate::schema::*;

// ===========================================================================
// Project
// ===========================================================================

/// Validated analyses together with the series they read.
#[derive(Debug, Clone)]
pub struct Project {
    pub analyses: Vec<AnalysisConfig>,
    /// Monitored links plus any effective links.
    pub store: SeriesStore,
}

impl Project {
    pub fn analysis(&self, name: &str) -> Option<&AnalysisConfig> {
        self.analyses.iter().find(|a| a.name() == name)
    }

    /// Every analysis queued against the project's store.
    pub fn batch(&self) -> Vec<Analysis<'_>> {
        self.analyses
            .iter()
            .map(|config| Analysis::new(config.clone(), &self.store))
            .collect()
    }

    /// Solve every analysis, in declaration order.
    pub fn run_all(&self) -> Vec<Result<AnalysisOutcome, AnalysisError>> {
        solve_all(&self.batch())
    }
}

// ===========================================================================
// Series
// ===========================================================================

/// Build a [`SeriesStore`] from series data read from `file`.
pub fn resolve_series(data: SeriesData, file: &Path) -> Result<SeriesStore, DataLoadError> {
    let len = data.links.first().map_or(0, |l| l.flow.len());
    let timeline = if !data.timestamps.is_empty() {
        Timeline::from_timestamps(&data.timestamps)?
    } else {
        match (data.start, data.timestep_seconds) {
            (Some(start), Some(step)) => Timeline::new(start, step, len)?,
            _ => {
                return Err(DataLoadError::Parse {
                    file: file.to_path_buf(),
                    detail: "series needs either timestamps or start and timestep_seconds"
                        .to_string(),
                });
            }
        }
    };

    let mut store = SeriesStore::new(timeline);
    for link in data.links {
        if store.contains(&link.name) {
            return Err(DataLoadError::DuplicateName {
                file: file.to_path_buf(),
                name: link.name,
            });
        }
        store.insert(
            link.name,
            LinkSeries {
                flow: link.flow,
                depth: link.depth,
            },
        )?;
    }
    Ok(store)
}

// ===========================================================================
// Analyses
// ===========================================================================

fn require_link(store: &SeriesStore, name: &str, file: &Path) -> Result<(), DataLoadError> {
    if store.contains(name) {
        Ok(())
    } else {
        Err(DataLoadError::UnresolvedRef {
            file: file.to_path_buf(),
            name: name.to_string(),
            expected_kind: "link",
        })
    }
}

fn thresholds(data: ThresholdsData) -> SpillThresholds {
    SpillThresholds {
        flow_m3s: data.flow_m3s,
        volume_m3: data.volume_m3,
    }
}

fn targets(owner: &str, data: TargetsData) -> Result<SpillTargets, ConfigError> {
    let season = data
        .season
        .map(|s| {
            Ok::<_, ConfigError>(BathingSeason::new(
                SeasonDate::new(s.start.month, s.start.day)?,
                SeasonDate::new(s.end.month, s.end.day)?,
            ))
        })
        .transpose()?;
    SpillTargets::from_parts(owner, data.entire_period, data.bathing_season, season)
}

fn period(data: Option<PeriodData>) -> Result<Option<AnalysisPeriod>, ConfigError> {
    data.map(|p| AnalysisPeriod::new(p.start, p.end)).transpose()
}

fn resolve_cso(data: CsoData, store: &SeriesStore, file: &Path) -> Result<CsoConfig, DataLoadError> {
    require_link(store, &data.overflow_link, file)?;
    require_link(store, &data.continuation_link, file)?;
    let config = CsoConfig {
        targets: targets(&data.name, data.targets)?,
        thresholds: thresholds(data.thresholds),
        drain: DrainConfig {
            pump_mode: data.drain.pump_mode.parse()?,
            pump_rate_m3s: data.drain.pump_rate_m3s,
            flow_return_threshold_m3s: data.drain.flow_return_threshold_m3s,
            depth_return_threshold_m: data.drain.depth_return_threshold_m,
            time_delay_hours: data.drain.time_delay_hours,
        },
        fixed_tank_volume_m3: data.fixed_tank_volume_m3,
        period: period(data.period)?,
        name: data.name,
        overflow_link: data.overflow_link,
        continuation_link: data.continuation_link,
    };
    config.validate()?;
    Ok(config)
}

fn resolve_wwtw(
    data: WwtwData,
    store: &SeriesStore,
    file: &Path,
) -> Result<WwtwConfig, DataLoadError> {
    require_link(store, &data.overflow_link, file)?;
    require_link(store, &data.continuation_link, file)?;
    let config = WwtwConfig {
        targets: targets(&data.name, data.targets)?,
        thresholds: thresholds(data.thresholds),
        pump: WwtwPumpConfig {
            pump_rate_m3s: data.pump.pump_rate_m3s,
            pump_on_threshold_m3s: data.pump.pump_on_threshold_m3s,
            pump_off_threshold_m3s: data.pump.pump_off_threshold_m3s,
            fft_capacity_m3s: data.pump.fft_capacity_m3s,
            time_delay_hours: data.pump.time_delay_hours,
        },
        fixed_tank_volume_m3: data.fixed_tank_volume_m3,
        period: period(data.period)?,
        name: data.name,
        overflow_link: data.overflow_link,
        continuation_link: data.continuation_link,
    };
    config.validate()?;
    Ok(config)
}

fn resolve_catchment(
    data: CatchmentData,
    store: &SeriesStore,
    file: &Path,
) -> Result<CatchmentConfig, DataLoadError> {
    let draindown_model = match &data.draindown_model {
        Some(model) => model.parse()?,
        None => DraindownModel::default(),
    };
    let nodes = data
        .nodes
        .into_iter()
        .map(|node| {
            Ok(CatchmentNodeConfig {
                cso: resolve_cso(node.cso, store, file)?,
                downstream: node.downstream,
                upstream: node.upstream,
                max_pass_forward_flow_m3s: node.max_pass_forward_flow_m3s,
                distance_m: node.distance_m,
                velocity_ms: node.velocity_ms,
            })
        })
        .collect::<Result<Vec<_>, DataLoadError>>()?;
    let config = CatchmentConfig {
        name: data.name,
        nodes,
        draindown_model,
    };
    config.validate()?;
    CatchmentTopology::from_config(&config)?;
    Ok(config)
}

/// Resolve one analysis read from `file` against `store`.
pub fn resolve_analysis(
    data: AnalysisData,
    store: &SeriesStore,
    file: &Path,
) -> Result<AnalysisConfig, DataLoadError> {
    Ok(match data {
        AnalysisData::Default(cso) => AnalysisConfig::Default(resolve_cso(cso, store, file)?),
        AnalysisData::Catchment(c) => AnalysisConfig::Catchment(resolve_catchment(c, store, file)?),
        AnalysisData::Wwtw(w) => AnalysisConfig::Wwtw(resolve_wwtw(w, store, file)?),
    })
}
