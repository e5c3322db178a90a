//! Minimum-storage search for a single tank.
//!
//! The solver treats a tank as a black box that turns a storage volume into a
//! list of spill events ([`StorageModel`]). It then searches for the smallest
//! volume whose event counts meet every target:
//!
//! 1. **Baseline** -- run with no storage. If the targets are already met the
//!    answer is zero; otherwise the baseline events give a first guess.
//! 2. **Search** -- narrow a `[min, max]` bracket by interpolating the
//!    constraint excess between the nearest infeasible and feasible probes,
//!    falling back to the midpoint. If `min` runs into an unproven `max`, the
//!    bracket is stretched with the growth heuristics.
//! 3. **Refinement** -- once a probe hits a target exactly, bisect between
//!    the best known infeasible and feasible volumes to the requested
//!    precision.
//!
//! Every cap degrades to a best estimate with `converged = false` rather
//! than an error.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::SpillTargets;
use crate::growth::{GradientPoint, GrowthContext, GrowthHeuristic, grow};
use crate::spill::{SpillCounts, SpillEvent};

/// Two probes closer than this are the same probe, m³.
pub const REPEAT_TOLERANCE_M3: f64 = 0.5;

/// Anything that maps a storage volume to the spill events it would leave.
pub trait StorageModel {
    /// Simulate with `volume_m3` of storage and detect spills.
    fn evaluate(&self, volume_m3: f64) -> Vec<SpillEvent>;

    /// The targets the events are judged against.
    fn targets(&self) -> &SpillTargets;
}

/// Search caps and tolerances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverSettings {
    pub max_iterations: u32,
    pub max_refinement_iterations: u32,
    /// Bracket width at which the search stops, m³.
    pub precision_m3: f64,
    /// Bracket width below which an unproven upper bound is stretched, m³.
    pub expansion_threshold_m3: f64,
    /// Heuristics tried, in order, when stretching the bracket.
    pub growth: Vec<GrowthHeuristic>,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            max_refinement_iterations: 10,
            precision_m3: 1.0,
            expansion_threshold_m3: 10.0,
            growth: vec![GrowthHeuristic::Gradient, GrowthHeuristic::Doubling],
        }
    }
}

impl SolverSettings {
    /// Settings for a WWTW inlet, whose spill counts respond less smoothly to
    /// storage than a CSO tank's.
    pub fn wwtw() -> Self {
        Self {
            growth: vec![
                GrowthHeuristic::Gradient,
                GrowthHeuristic::NthLargestSpill,
                GrowthHeuristic::ExcessPercentile,
                GrowthHeuristic::MinimumProgress,
            ],
            ..Self::default()
        }
    }

    /// Settings for the per-node catchment search.
    pub fn catchment() -> Self {
        Self {
            growth: vec![
                GrowthHeuristic::Gradient,
                GrowthHeuristic::ExcessPercentile,
                GrowthHeuristic::MinimumProgress,
            ],
            ..Self::default()
        }
    }

    /// Widest bracket the refinement phase can close within its cap.
    pub fn refine_span_m3(&self) -> f64 {
        self.precision_m3 * 2f64.powi(self.max_refinement_iterations as i32)
    }
}

// ---------------------------------------------------------------------------
// Search record
// ---------------------------------------------------------------------------

/// One tested volume.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Probe {
    pub volume_m3: f64,
    pub counts: SpillCounts,
    /// Constraint excess; zero or negative means feasible.
    pub excess: i64,
}

impl Probe {
    pub fn is_feasible(&self) -> bool {
        self.excess <= 0
    }

    fn point(&self) -> GradientPoint {
        GradientPoint {
            volume_m3: self.volume_m3,
            excess: self.excess,
        }
    }
}

/// Every probe of one search, in order, with the volumes split by outcome.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchLog {
    pub probes: Vec<Probe>,
    pub insufficient_volumes: Vec<f64>,
    pub excessive_volumes: Vec<f64>,
}

impl SearchLog {
    fn record(&mut self, probe: Probe) {
        if probe.is_feasible() {
            self.excessive_volumes.push(probe.volume_m3);
        } else {
            self.insufficient_volumes.push(probe.volume_m3);
        }
        self.probes.push(probe);
    }

    fn repeats(&self, volume_m3: f64) -> bool {
        self.probes
            .iter()
            .any(|p| (p.volume_m3 - volume_m3).abs() < REPEAT_TOLERANCE_M3)
    }

    /// Largest volume known to fail.
    pub fn best_infeasible(&self) -> Option<&Probe> {
        self.best_infeasible_below(f64::INFINITY)
    }

    /// Largest failing volume under `limit`.
    pub fn best_infeasible_below(&self, limit: f64) -> Option<&Probe> {
        self.probes
            .iter()
            .filter(|p| !p.is_feasible() && p.volume_m3 < limit)
            .max_by(|a, b| a.volume_m3.total_cmp(&b.volume_m3))
    }

    /// Smallest volume known to pass.
    pub fn best_feasible(&self) -> Option<&Probe> {
        self.probes
            .iter()
            .filter(|p| p.is_feasible())
            .min_by(|a, b| a.volume_m3.total_cmp(&b.volume_m3))
    }

    /// `(volume, entire-period spill count)` per probe, in test order.
    pub fn history(&self) -> Vec<(f64, u32)> {
        self.probes
            .iter()
            .map(|p| (p.volume_m3, p.counts.entire))
            .collect()
    }

    /// The two highest tested volumes, lower first.
    fn top_two(&self) -> Option<(GradientPoint, GradientPoint)> {
        let mut sorted: Vec<&Probe> = self.probes.iter().collect();
        sorted.sort_by(|a, b| b.volume_m3.total_cmp(&a.volume_m3));
        match sorted.as_slice() {
            [hi, lo, ..] => Some((lo.point(), hi.point())),
            _ => None,
        }
    }
}

/// Outcome of a search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Solution {
    pub storage_m3: f64,
    /// Probes run after the baseline.
    pub iterations: u32,
    pub converged: bool,
    pub log: SearchLog,
}

// ---------------------------------------------------------------------------
// Solver
// ---------------------------------------------------------------------------

fn probe<M: StorageModel + ?Sized>(model: &M, volume_m3: f64) -> (Probe, Vec<SpillEvent>) {
    let events = model.evaluate(volume_m3);
    let counts = SpillCounts::of(&events);
    let probe = Probe {
        volume_m3,
        counts,
        excess: counts.excess(model.targets()),
    };
    (probe, events)
}

/// First guess for the storage: the baseline volume of the event that must
/// disappear for each target to be met, whichever is larger.
fn baseline_centre(events: &[SpillEvent], targets: &SpillTargets) -> f64 {
    let cutoff = |mut volumes: Vec<f64>, target: u32| -> Option<f64> {
        volumes.sort_by(|a, b| b.total_cmp(a));
        volumes.get(target as usize).copied()
    };
    let entire = cutoff(
        events.iter().map(|e| e.volume_m3).collect(),
        targets.entire_period,
    );
    let bathing = targets.bathing.as_ref().and_then(|b| {
        cutoff(
            events
                .iter()
                .filter(|e| e.in_bathing_season)
                .map(|e| e.volume_m3)
                .collect(),
            b.spill_target,
        )
    });
    entire
        .into_iter()
        .chain(bathing)
        .fold(1.0, f64::max)
}

/// Interpolate the excess to zero between the nearest infeasible and feasible
/// probes.
fn interpolate(log: &SearchLog) -> Option<f64> {
    let lo = log.best_infeasible()?;
    let hi = log.best_feasible()?;
    if hi.volume_m3 <= lo.volume_m3 {
        return None;
    }
    let drop = (lo.excess - hi.excess) as f64;
    let v = lo.volume_m3 + lo.excess as f64 * (hi.volume_m3 - lo.volume_m3) / drop;
    v.is_finite().then_some(v)
}

/// Find the smallest storage meeting `model`'s targets. A `fixed_volume_m3`
/// skips the search.
pub fn solve<M: StorageModel + ?Sized>(
    model: &M,
    settings: &SolverSettings,
    fixed_volume_m3: Option<f64>,
) -> Solution {
    if let Some(volume) = fixed_volume_m3 {
        debug!(volume, "fixed tank volume, skipping search");
        return Solution {
            storage_m3: volume,
            iterations: 0,
            converged: true,
            log: SearchLog::default(),
        };
    }

    let mut log = SearchLog::default();
    let (baseline, baseline_events) = probe(model, 0.0);
    log.record(baseline);
    if baseline.is_feasible() {
        debug!(spills = baseline.counts.entire, "targets met without storage");
        return Solution {
            storage_m3: 0.0,
            iterations: 0,
            converged: true,
            log,
        };
    }

    let centre = baseline_centre(&baseline_events, model.targets());
    let mut min = 0.5 * centre;
    let mut max = 2.0 * centre;
    let mut max_proven = false;
    let mut iterations = 0;
    debug!(centre, min, max, "initial bracket");

    while iterations < settings.max_iterations {
        let midpoint = 0.5 * (min + max);
        let volume = interpolate(&log)
            .filter(|v| *v > min && *v < max && !log.repeats(*v))
            .unwrap_or(midpoint);

        let (p, events) = probe(model, volume);
        log.record(p);
        iterations += 1;
        debug!(
            iteration = iterations,
            volume,
            spills = p.counts.entire,
            bathing_spills = p.counts.bathing,
            excess = p.excess,
            "probe"
        );

        if p.is_feasible() {
            max = volume;
            max_proven = true;
            let lower = log.best_infeasible_below(max).map_or(0.0, |b| b.volume_m3);
            if p.counts.hits_exactly(model.targets()) && max - lower <= settings.refine_span_m3() {
                return refine(model, settings, lower, max, iterations, log);
            }
            if min > lower && max - min < settings.expansion_threshold_m3 {
                // The lower bound was only ever a guess.
                min = lower;
            }
            if max - min < settings.precision_m3 {
                info!(storage = max, iterations, "storage search converged");
                return Solution {
                    storage_m3: max,
                    iterations,
                    converged: true,
                    log,
                };
            }
        } else {
            min = volume;
            if !max_proven && max - min < settings.expansion_threshold_m3 {
                let ctx = GrowthContext {
                    current_m3: volume,
                    excess: p.excess,
                    target: model.targets().entire_period,
                    events: &events,
                    gradient: log.top_two(),
                };
                let (stretched, heuristic) = grow(&settings.growth, &ctx);
                debug!(from = max, to = stretched, ?heuristic, "stretching bracket");
                max = stretched;
            }
        }
    }

    warn!(
        storage = max,
        iterations, "storage search hit the iteration cap"
    );
    Solution {
        storage_m3: max,
        iterations,
        converged: false,
        log,
    }
}

fn refine<M: StorageModel + ?Sized>(
    model: &M,
    settings: &SolverSettings,
    mut lo: f64,
    mut hi: f64,
    mut iterations: u32,
    mut log: SearchLog,
) -> Solution {
    debug!(lo, hi, "refining");
    for _ in 0..settings.max_refinement_iterations {
        if hi - lo < settings.precision_m3 {
            break;
        }
        let mid = 0.5 * (lo + hi);
        let (p, _) = probe(model, mid);
        log.record(p);
        iterations += 1;
        if p.is_feasible() {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    let converged = hi - lo < settings.precision_m3;
    if converged {
        info!(storage = hi, iterations, "storage search converged");
    } else {
        warn!(storage = hi, iterations, "refinement hit its cap");
    }
    Solution {
        storage_m3: hi,
        iterations,
        converged,
        log,
    }
}
