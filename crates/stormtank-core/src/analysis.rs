//! Entry points that turn a configuration and observed series into results.
//!
//! Each analysis resolves its link names against a [`SeriesStore`], clips
//! the series to the configured period, builds the matching storage model
//! and hands it to the solver.

use std::ops::Range;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::catchment::{CatchmentModel, CatchmentResult, NodeInputs, solve_catchment};
use crate::config::{AnalysisConfig, AnalysisPeriod, CatchmentConfig, CsoConfig, WwtwConfig};
use crate::error::AnalysisError;
use crate::result::{AnalysisResult, AnnotatedSeries};
use crate::series::{LinkSeries, SeriesStore, Timeline};
use crate::solver::{SolverSettings, solve};
use crate::spill::SpillDetector;
use crate::tank::{CsoModel, TankSimulator};
use crate::wwtw::{WwtwModel, WwtwSimulator};

/// Result of any analysis mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AnalysisOutcome {
    Single(AnalysisResult),
    Catchment(CatchmentResult),
}

impl AnalysisOutcome {
    pub fn converged(&self) -> bool {
        match self {
            AnalysisOutcome::Single(r) => r.converged,
            AnalysisOutcome::Catchment(r) => r.converged,
        }
    }

    /// Every per-node result, one for a single CSO or WWTW.
    pub fn results(&self) -> Vec<&AnalysisResult> {
        match self {
            AnalysisOutcome::Single(r) => vec![r],
            AnalysisOutcome::Catchment(c) => c.nodes.iter().map(|n| &n.result).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Series resolution
// ---------------------------------------------------------------------------

/// The timeline and sample range left after applying `period`.
fn clip(
    timeline: &Timeline,
    period: Option<&AnalysisPeriod>,
    name: &str,
) -> Result<(Timeline, Range<usize>), AnalysisError> {
    let range = match period {
        Some(p) => timeline.range_between(p.start, p.end),
        None => 0..timeline.len(),
    };
    if range.is_empty() {
        return Err(AnalysisError::EmptyPeriod(name.to_string()));
    }
    Ok((timeline.slice(range.clone()), range))
}

fn link(
    store: &SeriesStore,
    analysis: &str,
    name: &str,
    range: &Range<usize>,
) -> Result<LinkSeries, AnalysisError> {
    store
        .get(name)
        .map(|l| l.slice(range.clone()))
        .ok_or_else(|| AnalysisError::MissingLink {
            analysis: analysis.to_string(),
            link: name.to_string(),
        })
}

fn warn_missing_depth(analysis: &str, link: &str, series: &LinkSeries) {
    if series.depth.is_none() {
        warn!(
            analysis,
            link, "continuation link has no depth data; depth return condition always passes"
        );
    }
}

// ---------------------------------------------------------------------------
// Single node
// ---------------------------------------------------------------------------

/// Size the tank of one CSO.
pub fn solve_cso(
    config: &CsoConfig,
    store: &SeriesStore,
    settings: &SolverSettings,
) -> Result<AnalysisResult, AnalysisError> {
    config.validate()?;
    let (timeline, range) = clip(store.timeline(), config.period.as_ref(), &config.name)?;
    let overflow = link(store, &config.name, &config.overflow_link, &range)?;
    let continuation = link(store, &config.name, &config.continuation_link, &range)?;
    warn_missing_depth(&config.name, &config.continuation_link, &continuation);

    let model = CsoModel::new(
        TankSimulator::new(
            &overflow.flow,
            &continuation.flow,
            continuation.depth.as_deref(),
            config.drain,
            &timeline,
        ),
        SpillDetector::new(config.thresholds).with_season(config.targets.season().copied()),
        config.targets,
        &timeline,
    );
    let solution = solve(&model, settings, config.fixed_tank_volume_m3);
    let (run, events) = model.run(solution.storage_m3);

    info!(
        cso = %config.name,
        storage = solution.storage_m3,
        spills = events.len(),
        converged = solution.converged,
        "CSO sized"
    );
    Ok(AnalysisResult::new(
        &config.name,
        solution.converged,
        solution.iterations,
        solution.storage_m3,
        events,
        AnnotatedSeries::new(
            timeline.clone(),
            &overflow.flow,
            &continuation.flow,
            run.spill,
            run.continuation,
            run.tank_volume,
        ),
        solution.log.history(),
    ))
}

/// Size the storm tank of a treatment works inlet.
pub fn solve_wwtw(
    config: &WwtwConfig,
    store: &SeriesStore,
    settings: &SolverSettings,
) -> Result<AnalysisResult, AnalysisError> {
    config.validate()?;
    let (timeline, range) = clip(store.timeline(), config.period.as_ref(), &config.name)?;
    let overflow = link(store, &config.name, &config.overflow_link, &range)?;
    let continuation = link(store, &config.name, &config.continuation_link, &range)?;

    let model = WwtwModel::new(
        WwtwSimulator::new(&overflow.flow, &continuation.flow, config.pump, &timeline),
        SpillDetector::new(config.thresholds).with_season(config.targets.season().copied()),
        config.targets,
        &timeline,
    );
    let solution = solve(&model, settings, config.fixed_tank_volume_m3);
    let (run, events) = model.run(solution.storage_m3);

    info!(
        wwtw = %config.name,
        storage = solution.storage_m3,
        spills = events.len(),
        converged = solution.converged,
        "WWTW sized"
    );
    let mut series = AnnotatedSeries::new(
        timeline.clone(),
        &overflow.flow,
        &continuation.flow,
        run.spill,
        run.continuation,
        run.tank_volume,
    );
    series.recirculated = Some(run.recirculated);
    series.pump_on = Some(run.pump_on);
    Ok(AnalysisResult::new(
        &config.name,
        solution.converged,
        solution.iterations,
        solution.storage_m3,
        events,
        series,
        solution.log.history(),
    ))
}

// ---------------------------------------------------------------------------
// Catchment
// ---------------------------------------------------------------------------

/// Size every tank of a catchment. Each node's own period, if any, is
/// ignored; the catchment runs over the whole store.
pub fn solve_catchment_analysis(
    config: &CatchmentConfig,
    store: &SeriesStore,
    settings: &SolverSettings,
) -> Result<CatchmentResult, AnalysisError> {
    config.validate()?;
    let timeline = store.timeline();
    let range = 0..timeline.len();

    let mut series: Vec<(LinkSeries, LinkSeries)> = Vec::with_capacity(config.nodes.len());
    for node in &config.nodes {
        let cso = &node.cso;
        let overflow = link(store, &config.name, &cso.overflow_link, &range)?;
        let continuation = link(store, &config.name, &cso.continuation_link, &range)?;
        warn_missing_depth(&cso.name, &cso.continuation_link, &continuation);
        series.push((overflow, continuation));
    }
    let inputs = series
        .iter()
        .map(|(overflow, continuation)| NodeInputs {
            inflow: &overflow.flow,
            continuation: &continuation.flow,
            depth: continuation.depth.as_deref(),
        })
        .collect();

    let model = CatchmentModel::new(config, inputs, timeline)?;
    Ok(solve_catchment(&model, settings))
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Solver settings each mode uses unless told otherwise.
pub fn default_settings(config: &AnalysisConfig) -> SolverSettings {
    match config {
        AnalysisConfig::Default(_) => SolverSettings::default(),
        AnalysisConfig::Catchment(_) => SolverSettings::catchment(),
        AnalysisConfig::Wwtw(_) => SolverSettings::wwtw(),
    }
}

/// Run one analysis with its mode's default settings.
pub fn run_analysis(
    config: &AnalysisConfig,
    store: &SeriesStore,
) -> Result<AnalysisOutcome, AnalysisError> {
    run_analysis_with(config, store, &default_settings(config))
}

/// Run one analysis with explicit settings.
pub fn run_analysis_with(
    config: &AnalysisConfig,
    store: &SeriesStore,
    settings: &SolverSettings,
) -> Result<AnalysisOutcome, AnalysisError> {
    match config {
        AnalysisConfig::Default(c) => solve_cso(c, store, settings).map(AnalysisOutcome::Single),
        AnalysisConfig::Wwtw(c) => solve_wwtw(c, store, settings).map(AnalysisOutcome::Single),
        AnalysisConfig::Catchment(c) => {
            solve_catchment_analysis(c, store, settings).map(AnalysisOutcome::Catchment)
        }
    }
}
