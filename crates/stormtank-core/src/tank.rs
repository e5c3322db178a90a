//! Single-node storage tank simulation.
//!
//! Each timestep runs three phases against the tank's stored volume:
//!
//! 1. **Draindown** -- if nothing is arriving and the continuation link has
//!    been quiet for the configured time delay, pump stored water back into
//!    the continuation flow.
//! 2. **Fill** -- capture the overflow into the tank; anything beyond
//!    capacity is still spilled.
//! 3. **Record** -- store the tank volume for this timestep.
//!
//! Every timestep conserves volume:
//! `inflow·Δt = Δstored + spill·Δt + Δcontinuation·Δt`.

use serde::{Deserialize, Serialize};

use crate::config::{DrainConfig, PumpMode, SpillTargets};
use crate::series::{Timeline, rolling_max_preceding};
use crate::solver::StorageModel;
use crate::spill::{SpillDetector, SpillEvent};

// ---------------------------------------------------------------------------
// Tank state
// ---------------------------------------------------------------------------

/// Mutable per-node state for one simulation run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TankState {
    /// Volume currently held, m³. Never negative.
    pub stored_m3: f64,
    /// Capacity being tested, m³.
    pub storage_volume_m3: f64,
    /// The tank holds any water.
    pub tank_full: bool,
    /// Some tank further downstream holds water.
    pub full_downstream: bool,
}

impl TankState {
    pub fn new(storage_volume_m3: f64) -> Self {
        Self {
            storage_volume_m3,
            ..Self::default()
        }
    }

    /// Empty the tank and clear coordination flags, keeping the capacity.
    pub fn reset(&mut self) {
        self.stored_m3 = 0.0;
        self.tank_full = false;
        self.full_downstream = false;
    }
}

/// Flows leaving a node after one timestep, m³/s.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepFlows {
    pub spill: f64,
    pub continuation: f64,
}

/// Observations the draindown decision is based on at one timestep.
#[derive(Debug, Clone, Copy)]
pub struct DrainConditions {
    pub continuation: f64,
    pub depth: Option<f64>,
    /// Largest continuation flow over the time-delay window, `None` when the
    /// window is empty.
    pub recent_max: Option<f64>,
    /// External gate, closed by coordinated catchment draindown.
    pub allowed: bool,
}

/// Drain the tank into the continuation link if every draindown condition
/// holds. Returns the continuation flow after draining.
pub(crate) fn drain(
    state: &mut TankState,
    config: &DrainConfig,
    dt: f64,
    inflow: f64,
    conditions: DrainConditions,
) -> f64 {
    let threshold = config.flow_return_threshold_m3s;
    let quiet = inflow <= 0.0
        && state.stored_m3 > 0.0
        && conditions.continuation < threshold
        && conditions
            .depth
            .is_none_or(|d| d < config.depth_return_threshold_m)
        && conditions.recent_max.is_none_or(|m| m < threshold)
        && conditions.allowed;
    if !quiet {
        return conditions.continuation;
    }

    let requested = match config.pump_mode {
        PumpMode::Fixed => config.pump_rate_m3s * dt,
        PumpMode::Variable => (threshold - conditions.continuation) * dt,
    };
    let drained = requested.clamp(0.0, state.stored_m3);
    state.stored_m3 -= drained;
    conditions.continuation + drained / dt
}

/// Capture `inflow` into the tank. Returns the flow still spilled.
pub(crate) fn fill(state: &mut TankState, dt: f64, inflow: f64) -> f64 {
    let capacity = state.storage_volume_m3;
    if inflow <= 0.0 || state.stored_m3 >= capacity {
        return inflow;
    }
    state.stored_m3 += inflow * dt;
    if state.stored_m3 <= capacity {
        0.0
    } else {
        let overflow = (state.stored_m3 - capacity) / dt;
        state.stored_m3 = capacity;
        overflow
    }
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

/// Series produced by one tank simulation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TankRun {
    pub tank_volume: Vec<f64>,
    pub continuation: Vec<f64>,
    pub spill: Vec<f64>,
}

/// Borrowed inputs for one CSO tank: the overflow it intercepts and the
/// continuation link it drains into.
#[derive(Debug, Clone)]
pub struct TankSimulator<'a> {
    inflow: &'a [f64],
    continuation: &'a [f64],
    depth: Option<&'a [f64]>,
    drain: DrainConfig,
    dt: f64,
    recent_max: Vec<Option<f64>>,
}

impl<'a> TankSimulator<'a> {
    /// Prepare a simulator. The time-delay window maximum is computed here,
    /// once, and reused by every run.
    pub fn new(
        inflow: &'a [f64],
        continuation: &'a [f64],
        depth: Option<&'a [f64]>,
        drain: DrainConfig,
        timeline: &Timeline,
    ) -> Self {
        let window = timeline.steps_for_hours(drain.time_delay_hours);
        Self {
            inflow,
            continuation,
            depth,
            drain,
            dt: timeline.dt(),
            recent_max: rolling_max_preceding(continuation, window),
        }
    }

    pub fn len(&self) -> usize {
        self.inflow.len().min(self.continuation.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Simulate the whole series with `storage_volume_m3` of storage.
    pub fn run(&self, storage_volume_m3: f64) -> TankRun {
        let n = self.len();
        let mut state = TankState::new(storage_volume_m3);
        let mut out = TankRun {
            tank_volume: Vec::with_capacity(n),
            continuation: Vec::with_capacity(n),
            spill: Vec::with_capacity(n),
        };
        for t in 0..n {
            let flows = self.step(&mut state, t);
            out.tank_volume.push(state.stored_m3);
            out.continuation.push(flows.continuation);
            out.spill.push(flows.spill);
        }
        out
    }

    fn step(&self, state: &mut TankState, t: usize) -> StepFlows {
        let inflow = self.inflow[t];
        let continuation = drain(
            state,
            &self.drain,
            self.dt,
            inflow,
            DrainConditions {
                continuation: self.continuation[t],
                depth: self.depth.and_then(|d| d.get(t).copied()),
                recent_max: self.recent_max[t],
                allowed: true,
            },
        );
        let spill = fill(state, self.dt, inflow);
        state.tank_full = state.stored_m3 > 0.0;
        StepFlows {
            spill,
            continuation,
        }
    }
}

// ---------------------------------------------------------------------------
// Storage model
// ---------------------------------------------------------------------------

/// A CSO tank paired with its spill detector, ready to be searched.
#[derive(Debug, Clone)]
pub struct CsoModel<'a> {
    simulator: TankSimulator<'a>,
    detector: SpillDetector,
    targets: SpillTargets,
    timeline: &'a Timeline,
}

impl<'a> CsoModel<'a> {
    pub fn new(
        simulator: TankSimulator<'a>,
        detector: SpillDetector,
        targets: SpillTargets,
        timeline: &'a Timeline,
    ) -> Self {
        Self {
            simulator,
            detector,
            targets,
            timeline,
        }
    }

    pub fn simulator(&self) -> &TankSimulator<'a> {
        &self.simulator
    }

    /// Simulate and detect in one go, keeping the simulated series.
    pub fn run(&self, volume_m3: f64) -> (TankRun, Vec<SpillEvent>) {
        let run = self.simulator.run(volume_m3);
        let events = self.detector.detect(&run.spill, self.timeline);
        (run, events)
    }
}

impl StorageModel for CsoModel<'_> {
    fn evaluate(&self, volume_m3: f64) -> Vec<SpillEvent> {
        self.run(volume_m3).1
    }

    fn targets(&self) -> &SpillTargets {
        &self.targets
    }
}
