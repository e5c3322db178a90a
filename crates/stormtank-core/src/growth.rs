//! Heuristics for growing a storage guess that is still too small.
//!
//! Both the single-node solver and the catchment search need a new, larger
//! volume whenever a guess fails its spill target and there is no feasible
//! bound to bisect towards. Each search lists the heuristics it trusts in
//! order of preference; the first one producing a sane proposal wins.

use serde::{Deserialize, Serialize};

use crate::spill::SpillEvent;

/// Smallest growth step, m³.
pub const MIN_GROWTH_M3: f64 = 10.0;

/// Smallest growth step as a fraction of the current volume.
pub const MIN_GROWTH_FRACTION: f64 = 0.05;

/// A gradient proposal further than this many times the current volume (or
/// [`MIN_GROWTH_M3`], whichever is larger) is treated as noise.
pub const MAX_GRADIENT_STRETCH: f64 = 10.0;

/// One way of proposing a larger volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GrowthHeuristic {
    /// Extrapolate the spill-count gradient between two probes to the target.
    Gradient,
    /// Add the volume of the event that must disappear for the count to reach
    /// the target.
    NthLargestSpill,
    /// Add the 75th-percentile volume of the excess events, scaled by how far
    /// the count is from target.
    ExcessPercentile,
    /// Grow by 5% or 10 m³, whichever is larger.
    MinimumProgress,
    /// Double the volume.
    Doubling,
}

/// A volume tested by a search and how far it missed the target.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GradientPoint {
    pub volume_m3: f64,
    /// Spill count minus target; positive when too many spills.
    pub excess: i64,
}

/// What the heuristics may look at.
#[derive(Debug, Clone, Copy)]
pub struct GrowthContext<'a> {
    /// The failing volume to grow from.
    pub current_m3: f64,
    /// Spill count minus target at `current_m3`.
    pub excess: i64,
    /// Permitted spill count.
    pub target: u32,
    /// Events observed at `current_m3`.
    pub events: &'a [SpillEvent],
    /// Two earlier probes for gradient extrapolation, lower volume first.
    pub gradient: Option<(GradientPoint, GradientPoint)>,
}

/// Propose a volume larger than `ctx.current_m3`. Falls back to
/// [`GrowthHeuristic::MinimumProgress`] when nothing in `order` applies.
pub fn grow(order: &[GrowthHeuristic], ctx: &GrowthContext<'_>) -> (f64, GrowthHeuristic) {
    order
        .iter()
        .find_map(|&h| propose(h, ctx).map(|v| (v, h)))
        .unwrap_or_else(|| (minimum_progress(ctx.current_m3), GrowthHeuristic::MinimumProgress))
}

/// The proposal of a single heuristic, or `None` when it does not apply or
/// its answer is out of range.
pub fn propose(heuristic: GrowthHeuristic, ctx: &GrowthContext<'_>) -> Option<f64> {
    let current = ctx.current_m3;
    let proposal = match heuristic {
        GrowthHeuristic::Gradient => gradient(ctx)?,
        GrowthHeuristic::NthLargestSpill => {
            let volumes = descending_volumes(ctx.events);
            current + *volumes.get(ctx.target as usize)?
        }
        GrowthHeuristic::ExcessPercentile => {
            let volumes = descending_volumes(ctx.events);
            let mut excess: Vec<f64> = volumes.into_iter().skip(ctx.target as usize).collect();
            if excess.is_empty() {
                return None;
            }
            excess.reverse();
            let p75 = percentile(&excess, 75.0)?;
            let proximity = excess.len() as f64 / ctx.events.len() as f64;
            current + p75 * proximity
        }
        GrowthHeuristic::MinimumProgress => minimum_progress(current),
        GrowthHeuristic::Doubling => (2.0 * current).max(current + MIN_GROWTH_M3),
    };
    (proposal.is_finite() && proposal > current).then_some(proposal)
}

fn minimum_progress(current: f64) -> f64 {
    current + (current * MIN_GROWTH_FRACTION).max(MIN_GROWTH_M3)
}

fn gradient(ctx: &GrowthContext<'_>) -> Option<f64> {
    let (a, b) = ctx.gradient?;
    let run = b.volume_m3 - a.volume_m3;
    if run.abs() < f64::EPSILON {
        return None;
    }
    let slope = (b.excess - a.excess) as f64 / run;
    if !(slope < 0.0) || ctx.excess <= 0 {
        return None;
    }
    let proposal = ctx.current_m3 + ctx.excess as f64 / -slope;
    let limit = ctx.current_m3 + MAX_GRADIENT_STRETCH * ctx.current_m3.max(MIN_GROWTH_M3);
    (proposal <= limit).then_some(proposal)
}

fn descending_volumes(events: &[SpillEvent]) -> Vec<f64> {
    let mut volumes: Vec<f64> = events.iter().map(|e| e.volume_m3).collect();
    volumes.sort_by(|a, b| b.total_cmp(a));
    volumes
}

/// Linearly interpolated percentile of ascending `sorted` values.
pub fn percentile(sorted: &[f64], pct: f64) -> Option<f64> {
    match sorted.len() {
        0 => None,
        1 => Some(sorted[0]),
        n => {
            let rank = (pct / 100.0).clamp(0.0, 1.0) * (n - 1) as f64;
            let lower = rank.floor() as usize;
            let upper = rank.ceil() as usize;
            let frac = rank - lower as f64;
            Some(sorted[lower] + (sorted[upper] - sorted[lower]) * frac)
        }
    }
}
