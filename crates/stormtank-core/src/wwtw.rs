//! Storm tank at a treatment works inlet.
//!
//! Fills like a CSO tank, but empties through a pump with on/off hysteresis
//! keyed on the works' pass-forward flow. Pumped water the works cannot
//! accept because of its flow to full treatment (FFT) limit goes straight
//! back into the tank.
//!
//! The pump switches off when the pass-forward flow rises above the off
//! threshold, or when the pass-forward flow over the time-delay window has
//! stayed below the on threshold. The second condition also satisfies the
//! switch-on test, so a quiet inlet can see the pump drop out and restart in
//! the same timestep. The logged state is the one after both tests.

use serde::{Deserialize, Serialize};

use crate::config::{SpillTargets, WwtwPumpConfig};
use crate::series::{Timeline, rolling_max_preceding};
use crate::solver::StorageModel;
use crate::spill::{SpillDetector, SpillEvent};
use crate::tank::{TankState, fill};

/// Series produced by one WWTW simulation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WwtwRun {
    pub tank_volume: Vec<f64>,
    pub continuation: Vec<f64>,
    pub spill: Vec<f64>,
    /// Pumped volume returned to storage each step, m³.
    pub recirculated: Vec<f64>,
    pub pump_on: Vec<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct Pump {
    on: bool,
}

impl Pump {
    /// Apply the off test, then the on test.
    fn update(&mut self, config: &WwtwPumpConfig, continuation: f64, recent_max: Option<f64>) {
        let quiet = recent_max.is_none_or(|m| m < config.pump_on_threshold_m3s);
        if self.on && (continuation > config.pump_off_threshold_m3s || quiet) {
            self.on = false;
        }
        if !self.on && continuation < config.pump_on_threshold_m3s && quiet {
            self.on = true;
        }
    }
}

/// Borrowed inputs for one treatment works inlet.
#[derive(Debug, Clone)]
pub struct WwtwSimulator<'a> {
    inflow: &'a [f64],
    continuation: &'a [f64],
    pump: WwtwPumpConfig,
    dt: f64,
    recent_max: Vec<Option<f64>>,
}

impl<'a> WwtwSimulator<'a> {
    pub fn new(
        inflow: &'a [f64],
        continuation: &'a [f64],
        pump: WwtwPumpConfig,
        timeline: &Timeline,
    ) -> Self {
        let window = timeline.steps_for_hours(pump.time_delay_hours);
        Self {
            inflow,
            continuation,
            pump,
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

    pub fn run(&self, storage_volume_m3: f64) -> WwtwRun {
        let n = self.len();
        let mut state = TankState::new(storage_volume_m3);
        let mut pump = Pump::default();
        let mut out = WwtwRun {
            tank_volume: Vec::with_capacity(n),
            continuation: Vec::with_capacity(n),
            spill: Vec::with_capacity(n),
            recirculated: Vec::with_capacity(n),
            pump_on: Vec::with_capacity(n),
        };

        for t in 0..n {
            let inflow = self.inflow[t];
            let original = self.continuation[t];
            pump.update(&self.pump, original, self.recent_max[t]);

            let mut continuation = original;
            let mut recirculated = 0.0;
            if pump.on && inflow <= 0.0 && state.stored_m3 > 0.0 {
                let pumped = (self.pump.pump_rate_m3s * self.dt).min(state.stored_m3);
                let discharged = match self.pump.fft_capacity_m3s {
                    Some(fft) => pumped.min((fft - original).max(0.0) * self.dt),
                    None => pumped,
                };
                recirculated = pumped - discharged;
                state.stored_m3 -= discharged;
                continuation += discharged / self.dt;
            }

            let spill = fill(&mut state, self.dt, inflow);
            state.tank_full = state.stored_m3 > 0.0;

            out.tank_volume.push(state.stored_m3);
            out.continuation.push(continuation);
            out.spill.push(spill);
            out.recirculated.push(recirculated);
            out.pump_on.push(pump.on);
        }
        out
    }
}

/// A treatment works inlet paired with its spill detector.
#[derive(Debug, Clone)]
pub struct WwtwModel<'a> {
    simulator: WwtwSimulator<'a>,
    detector: SpillDetector,
    targets: SpillTargets,
    timeline: &'a Timeline,
}

impl<'a> WwtwModel<'a> {
    pub fn new(
        simulator: WwtwSimulator<'a>,
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

    pub fn run(&self, volume_m3: f64) -> (WwtwRun, Vec<SpillEvent>) {
        let run = self.simulator.run(volume_m3);
        let events = self.detector.detect(&run.spill, self.timeline);
        (run, events)
    }
}

impl StorageModel for WwtwModel<'_> {
    fn evaluate(&self, volume_m3: f64) -> Vec<SpillEvent> {
        self.run(volume_m3).1
    }

    fn targets(&self) -> &SpillTargets {
        &self.targets
    }
}
