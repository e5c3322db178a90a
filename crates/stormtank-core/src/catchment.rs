//! Sizing several connected CSO tanks together.
//!
//! Every timestep visits the nodes most-upstream first. Each node:
//!
//! 1. **Delta intake** -- sums the extra continuation flow its upstream
//!    nodes produced, each shifted by that pipe's travel time. A node that is
//!    spilling takes the delta into its spill; otherwise the continuation link
//!    takes what fits under the node's maximum pass-forward flow and the rest
//!    spills. With no pass-forward limit, all of it spills.
//! 2. **Tank step** -- drains and fills like a single CSO tank. Under
//!    [`DraindownModel::Coordinated`], draining waits while any tank
//!    downstream holds water.
//! 3. **Delta out** -- records how far the continuation flow now sits above
//!    the observed one.
//!
//! Downstream flags read during step 2 were written in the previous
//! timestep, because downstream nodes are visited later.
//!
//! The outer search runs the whole catchment at the current per-node
//! volumes, then moves each unfinished node on its own: growing while it
//! spills too often and bisecting once a guess has overshot. A settled node
//! whose spills climb back over target as its upstream volumes move is
//! searched again from its current volume.

use serde::{Deserialize, Serialize};
use slotmap::SecondaryMap;
use tracing::{debug, info, warn};

use crate::config::{CatchmentConfig, CatchmentNodeConfig, DraindownModel};
use crate::error::AnalysisError;
use crate::growth::{GradientPoint, GrowthContext, grow};
use crate::id::{NodeId, PositionLevel};
use crate::result::{AnalysisResult, AnnotatedSeries};
use crate::series::{Timeline, rolling_max_preceding};
use crate::solver::SolverSettings;
use crate::spill::{SpillCounts, SpillDetector, SpillEvent};
use crate::tank::{DrainConditions, TankState, drain, fill};
use crate::topology::CatchmentTopology;

/// Observed series for one catchment node.
#[derive(Debug, Clone, Copy)]
pub struct NodeInputs<'a> {
    pub inflow: &'a [f64],
    pub continuation: &'a [f64],
    pub depth: Option<&'a [f64]>,
}

/// Series produced for one node by a catchment simulation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeRun {
    pub tank_volume: Vec<f64>,
    pub continuation: Vec<f64>,
    pub spill: Vec<f64>,
    pub incoming_delta: Vec<f64>,
    pub outgoing_delta: Vec<f64>,
}

impl NodeRun {
    fn with_capacity(n: usize) -> Self {
        Self {
            tank_volume: Vec::with_capacity(n),
            continuation: Vec::with_capacity(n),
            spill: Vec::with_capacity(n),
            incoming_delta: Vec::with_capacity(n),
            outgoing_delta: Vec::with_capacity(n),
        }
    }
}

/// Split delta arriving from upstream between spill and continuation.
/// Returns `(spill, continuation)`.
pub fn route_delta(
    delta: f64,
    inflow: f64,
    continuation: f64,
    max_pass_forward_flow: Option<f64>,
) -> (f64, f64) {
    if delta <= 0.0 {
        return (inflow, continuation);
    }
    match max_pass_forward_flow {
        Some(pff) if inflow <= 0.0 => {
            let to_continuation = delta.min((pff - continuation).max(0.0));
            (inflow + delta - to_continuation, continuation + to_continuation)
        }
        _ => (inflow + delta, continuation),
    }
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct NodeModel<'a> {
    config: &'a CatchmentNodeConfig,
    inputs: NodeInputs<'a>,
    detector: SpillDetector,
    recent_max: Vec<Option<f64>>,
    /// Steps for this node's outflow to reach its downstream node.
    shift: usize,
}

/// A catchment with its observed series, ready to simulate.
#[derive(Debug, Clone)]
pub struct CatchmentModel<'a> {
    config: &'a CatchmentConfig,
    topology: CatchmentTopology,
    timeline: &'a Timeline,
    nodes: SecondaryMap<NodeId, NodeModel<'a>>,
}

impl<'a> CatchmentModel<'a> {
    /// Pair each configured node with its inputs, given in the same order
    /// as `config.nodes`.
    pub fn new(
        config: &'a CatchmentConfig,
        inputs: Vec<NodeInputs<'a>>,
        timeline: &'a Timeline,
    ) -> Result<Self, AnalysisError> {
        config.validate()?;
        if inputs.len() != config.nodes.len() {
            return Err(AnalysisError::InputMismatch {
                catchment: config.name.clone(),
                nodes: config.nodes.len(),
                inputs: inputs.len(),
            });
        }
        let topology = CatchmentTopology::from_config(config)?;

        let mut nodes = SecondaryMap::new();
        for ((&id, node), inputs) in topology.declared().iter().zip(&config.nodes).zip(inputs) {
            let name = &node.cso.name;
            timeline.check_channel(&format!("{name}.inflow"), inputs.inflow)?;
            timeline.check_channel(&format!("{name}.continuation"), inputs.continuation)?;
            if let Some(depth) = inputs.depth {
                timeline.check_channel(&format!("{name}.depth"), depth)?;
            }
            let window = timeline.steps_for_hours(node.cso.drain.time_delay_hours);
            nodes.insert(
                id,
                NodeModel {
                    config: node,
                    inputs,
                    detector: SpillDetector::new(node.cso.thresholds)
                        .with_season(node.cso.targets.season().copied()),
                    recent_max: rolling_max_preceding(inputs.continuation, window),
                    shift: timeline.steps_for_seconds(node.travel_seconds()),
                },
            );
        }

        Ok(Self {
            config,
            topology,
            timeline,
            nodes,
        })
    }

    pub fn topology(&self) -> &CatchmentTopology {
        &self.topology
    }

    /// Simulate every node with the given storage volumes (missing entries
    /// count as zero).
    pub fn simulate(&self, volumes: &SecondaryMap<NodeId, f64>) -> SecondaryMap<NodeId, NodeRun> {
        let n = self.timeline.len();
        let dt = self.timeline.dt();
        let coordinated = self.config.draindown_model == DraindownModel::Coordinated;

        let mut states: SecondaryMap<NodeId, TankState> = SecondaryMap::new();
        let mut runs: SecondaryMap<NodeId, NodeRun> = SecondaryMap::new();
        for &id in self.topology.declared() {
            states.insert(id, TankState::new(volumes.get(id).copied().unwrap_or(0.0)));
            runs.insert(id, NodeRun::with_capacity(n));
        }

        for t in 0..n {
            for &id in self.topology.processing_order() {
                let Some(node) = self.nodes.get(id) else {
                    continue;
                };
                let delta_in: f64 = self
                    .topology
                    .upstream(id)
                    .iter()
                    .filter_map(|&up| {
                        let shift = self.nodes.get(up)?.shift;
                        let lagged = t.checked_sub(shift)?;
                        runs.get(up)?.outgoing_delta.get(lagged).copied()
                    })
                    .sum();

                let inflow = node.inputs.inflow[t];
                let original = node.inputs.continuation[t];
                let (spill_in, continuation_in) = route_delta(
                    delta_in,
                    inflow,
                    original,
                    node.config.max_pass_forward_flow_m3s,
                );

                let (allowed, full_downstream) = match self
                    .topology
                    .downstream(id)
                    .and_then(|d| states.get(d))
                {
                    Some(down) => {
                        let busy = down.full_downstream || down.tank_full;
                        (!coordinated || !busy, busy)
                    }
                    None => (true, false),
                };

                let Some(state) = states.get_mut(id) else {
                    continue;
                };
                let continuation = drain(
                    state,
                    &node.config.cso.drain,
                    dt,
                    spill_in,
                    DrainConditions {
                        continuation: continuation_in,
                        depth: node.inputs.depth.map(|d| d[t]),
                        recent_max: node.recent_max[t],
                        allowed,
                    },
                );
                let spill = fill(state, dt, spill_in);
                state.tank_full = state.stored_m3 > 0.0;
                state.full_downstream = full_downstream;
                let stored = state.stored_m3;

                if let Some(run) = runs.get_mut(id) {
                    run.tank_volume.push(stored);
                    run.continuation.push(continuation);
                    run.spill.push(spill);
                    run.incoming_delta.push(delta_in);
                    run.outgoing_delta.push(continuation - original);
                }
            }
        }
        runs
    }

    fn detect(&self, id: NodeId, run: &NodeRun) -> Vec<SpillEvent> {
        self.nodes
            .get(id)
            .map(|node| node.detector.detect(&run.spill, self.timeline))
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeStatus {
    Searching,
    /// The smallest passing volume sits within the precision of a failing one.
    Settled,
    /// Volume configured, never searched.
    Fixed,
}

#[derive(Debug, Clone)]
struct NodeSearch {
    volume: f64,
    /// Largest volume seen to spill too often.
    lower: Option<f64>,
    /// Smallest volume seen to meet the target.
    upper: Option<f64>,
    status: NodeStatus,
    iterations: u32,
    points: Vec<GradientPoint>,
    history: Vec<(f64, u32)>,
}

impl NodeSearch {
    fn new(fixed: Option<f64>) -> Self {
        Self {
            volume: fixed.unwrap_or(0.0),
            lower: None,
            upper: None,
            status: if fixed.is_some() {
                NodeStatus::Fixed
            } else {
                NodeStatus::Searching
            },
            iterations: 0,
            points: Vec::new(),
            history: Vec::new(),
        }
    }

    fn searching(&self) -> bool {
        self.status == NodeStatus::Searching
    }

    /// Upstream volumes moved and the settled volume fails again. Bounds found
    /// under the old upstream volumes no longer apply.
    fn reopen(&mut self) {
        self.lower = None;
        self.upper = None;
        self.status = NodeStatus::Searching;
    }

    /// Record the outcome at the current volume and pick the next one: grow
    /// until a volume passes, then bisect between the bounds.
    fn advance(
        &mut self,
        events: &[SpillEvent],
        excess: i64,
        target: u32,
        settings: &SolverSettings,
    ) {
        let v = self.volume;
        self.iterations += 1;
        self.points.push(GradientPoint {
            volume_m3: v,
            excess,
        });
        self.history.push((v, events.len() as u32));

        if excess > 0 {
            self.lower = Some(self.lower.map_or(v, |l| l.max(v)));
        } else {
            self.upper = Some(self.upper.map_or(v, |u| u.min(v)));
        }

        let floor = self.lower.unwrap_or(0.0);
        self.volume = match self.upper {
            Some(upper) if upper - floor < settings.precision_m3 => {
                self.status = NodeStatus::Settled;
                upper
            }
            Some(upper) => 0.5 * (floor + upper),
            None => {
                let gradient = match self.points.as_slice() {
                    [.., a, b] => Some((*a, *b)),
                    _ => None,
                };
                let ctx = GrowthContext {
                    current_m3: v,
                    excess,
                    target,
                    events,
                    gradient,
                };
                grow(&settings.growth, &ctx).0
            }
        };
    }

    /// Volume to report: the settled one, otherwise the smallest volume seen
    /// to meet the target, if any.
    fn final_volume(&self) -> f64 {
        match self.status {
            NodeStatus::Searching => self.upper.unwrap_or(self.volume),
            _ => self.volume,
        }
    }
}

/// Outcome for one node of a catchment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatchmentNodeResult {
    pub level: PositionLevel,
    pub downstream: Option<String>,
    pub result: AnalysisResult,
}

/// Outcome for a whole catchment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatchmentResult {
    pub name: String,
    pub converged: bool,
    /// Whole-catchment simulations run by the search.
    pub iterations: u32,
    /// One entry per node, in declaration order.
    pub nodes: Vec<CatchmentNodeResult>,
}

impl CatchmentResult {
    pub fn node(&self, name: &str) -> Option<&CatchmentNodeResult> {
        self.nodes.iter().find(|n| n.result.name == name)
    }
}

/// Size every node of the catchment.
pub fn solve_catchment(model: &CatchmentModel<'_>, settings: &SolverSettings) -> CatchmentResult {
    let topology = &model.topology;
    let mut searches: SecondaryMap<NodeId, NodeSearch> = SecondaryMap::new();
    for (&id, node) in topology.declared().iter().zip(&model.config.nodes) {
        searches.insert(id, NodeSearch::new(node.cso.fixed_tank_volume_m3));
    }

    // Keep going while a node is searching or a volume moved since the last
    // simulation: settled nodes are only final once checked against the
    // volumes their upstream nodes ended on.
    let mut iterations = 0;
    let mut pending = searches.values().any(NodeSearch::searching);
    while pending && iterations < settings.max_iterations {
        let volumes: SecondaryMap<NodeId, f64> =
            searches.iter().map(|(id, s)| (id, s.volume)).collect();
        let runs = model.simulate(&volumes);
        iterations += 1;
        pending = false;

        for (&id, node) in topology.declared().iter().zip(&model.config.nodes) {
            let (Some(search), Some(run)) = (searches.get_mut(id), runs.get(id)) else {
                continue;
            };
            if search.status == NodeStatus::Fixed {
                continue;
            }
            let events = model.detect(id, run);
            let excess = SpillCounts::of(&events).excess(&node.cso.targets);
            if !search.searching() {
                if excess <= 0 {
                    continue;
                }
                debug!(
                    catchment = %model.config.name,
                    node = %node.cso.name,
                    volume = search.volume,
                    excess,
                    "settled node fails after upstream change"
                );
                search.reopen();
            }
            let tested = search.volume;
            search.advance(&events, excess, node.cso.targets.entire_period, settings);
            pending |= search.searching() || search.volume != tested;
            debug!(
                catchment = %model.config.name,
                node = %node.cso.name,
                iteration = iterations,
                spills = events.len(),
                excess,
                next = search.volume,
                "catchment node probe"
            );
        }
    }

    let volumes: SecondaryMap<NodeId, f64> =
        searches.iter().map(|(id, s)| (id, s.final_volume())).collect();
    let runs = model.simulate(&volumes);

    let mut nodes = Vec::with_capacity(topology.len());
    for (&id, node) in topology.declared().iter().zip(&model.config.nodes) {
        let (Some(search), Some(run), Some(inputs)) =
            (searches.get(id), runs.get(id), model.nodes.get(id))
        else {
            continue;
        };
        let events = model.detect(id, run);
        let converged = match search.status {
            NodeStatus::Fixed => true,
            NodeStatus::Settled => SpillCounts::of(&events).meets(&node.cso.targets),
            NodeStatus::Searching => false,
        };
        let run = run.clone();
        let mut series = AnnotatedSeries::new(
            model.timeline.clone(),
            inputs.inputs.inflow,
            inputs.inputs.continuation,
            run.spill,
            run.continuation,
            run.tank_volume,
        );
        series.incoming_delta = Some(run.incoming_delta);
        series.outgoing_delta = Some(run.outgoing_delta);
        nodes.push(CatchmentNodeResult {
            level: topology.level(id).unwrap_or(PositionLevel(0)),
            downstream: topology
                .downstream(id)
                .map(|d| topology.name(d).to_string()),
            result: AnalysisResult::new(
                &node.cso.name,
                converged,
                search.iterations,
                volumes.get(id).copied().unwrap_or(0.0),
                events,
                series,
                search.history.clone(),
            ),
        });
    }

    let converged = nodes.iter().all(|n| n.result.converged);
    if converged {
        info!(catchment = %model.config.name, iterations, "catchment search converged");
    } else {
        warn!(catchment = %model.config.name, iterations, "catchment search hit the iteration cap");
    }
    CatchmentResult {
        name: model.config.name.clone(),
        converged,
        iterations,
        nodes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CatchmentNodeConfig;
    use crate::test_utils::*;

    #[test]
    fn delta_routing() {
        // Spilling node: everything to spill.
        assert_eq!(route_delta(0.5, 1.0, 0.2, Some(10.0)), (1.5, 0.2));
        // Not spilling: continuation takes what fits under the limit.
        assert_eq!(route_delta(0.5, 0.0, 0.2, Some(0.5)), (0.2, 0.5));
        assert_eq!(route_delta(0.5, 0.0, 0.2, Some(10.0)), (0.0, 0.7));
        // Already above the limit.
        assert_eq!(route_delta(0.5, 0.0, 0.8, Some(0.5)), (0.5, 0.8));
        // No limit: all spills.
        assert_eq!(route_delta(0.5, 0.0, 0.2, None), (0.5, 0.2));
        assert_eq!(route_delta(0.0, 0.3, 0.2, None), (0.3, 0.2));
    }

    #[test]
    fn upstream_delta_arrives_after_travel_time() {
        // 10 s steps; 100 m at 1 m/s is ten steps.
        let timeline = timeline_with_step(60, 10);
        let mut up = CatchmentNodeConfig::new(cso_config("a"));
        up.downstream = Some("b".into());
        up.distance_m = Some(100.0);
        up.velocity_ms = Some(1.0);
        up.cso.drain.time_delay_hours = 0.0;
        let mut down = CatchmentNodeConfig::new(cso_config("b"));
        down.max_pass_forward_flow_m3s = Some(100.0);
        let config = catchment_config("pair", vec![up, down]);

        // a fills during the first two steps, then drains.
        let mut a_inflow = vec![0.0; 60];
        a_inflow[0] = 1.0;
        a_inflow[1] = 1.0;
        let zeros = vec![0.0; 60];
        let model = CatchmentModel::new(
            &config,
            vec![
                NodeInputs {
                    inflow: &a_inflow,
                    continuation: &zeros,
                    depth: None,
                },
                NodeInputs {
                    inflow: &zeros,
                    continuation: &zeros,
                    depth: None,
                },
            ],
            &timeline,
        )
        .unwrap();

        let a = model.topology().id("a").unwrap();
        let b = model.topology().id("b").unwrap();
        let mut volumes = SecondaryMap::new();
        volumes.insert(a, 1000.0);
        volumes.insert(b, 1000.0);
        let runs = model.simulate(&volumes);

        let out = &runs[a].outgoing_delta;
        let first = out.iter().position(|&d| d > 0.0).unwrap();
        assert_eq!(first, 2);
        for t in 0..50 {
            assert_eq!(runs[b].incoming_delta[t + 10], out[t], "t = {t}");
        }
        assert!(runs[b].incoming_delta[..12].iter().all(|&d| d == 0.0));
        // b is not spilling and has room, so the delta passes forward.
        assert_eq!(runs[b].continuation[12], out[2]);
        assert_eq!(runs[b].spill[12], 0.0);
    }

    #[test]
    fn coordinated_draindown_waits_for_downstream() {
        let timeline = minute_timeline(30);
        let mut up = CatchmentNodeConfig::new(cso_config("up"));
        up.downstream = Some("down".into());
        let down = CatchmentNodeConfig::new(cso_config("down"));
        let mut config = catchment_config("c", vec![up, down]);

        let mut up_inflow = vec![0.0; 30];
        up_inflow[0] = 1.0;
        let mut down_inflow = vec![0.0; 30];
        down_inflow[..10].fill(1.0);
        let zeros = vec![0.0; 30];
        let inputs = [
            NodeInputs {
                inflow: &up_inflow,
                continuation: &zeros,
                depth: None,
            },
            NodeInputs {
                inflow: &down_inflow,
                continuation: &zeros,
                depth: None,
            },
        ];

        let volumes = |model: &CatchmentModel<'_>| {
            let mut v = SecondaryMap::new();
            for &id in model.topology().declared() {
                v.insert(id, 10_000.0);
            }
            v
        };

        let independent = CatchmentModel::new(&config, inputs.to_vec(), &timeline).unwrap();
        let up_id = independent.topology().id("up").unwrap();
        let runs = independent.simulate(&volumes(&independent));
        assert!(runs[up_id].tank_volume[1] < 60.0);

        config.draindown_model = DraindownModel::Coordinated;
        let coordinated = CatchmentModel::new(&config, inputs.to_vec(), &timeline).unwrap();
        let up_id = coordinated.topology().id("up").unwrap();
        let runs = coordinated.simulate(&volumes(&coordinated));
        // Downstream tank holds water throughout, so nothing drains.
        assert!(runs[up_id].tank_volume.iter().skip(1).all(|&v| v == 60.0));
    }

    #[test]
    fn catchment_search_meets_every_target() {
        let timeline = minute_timeline(1000);
        let mut up = CatchmentNodeConfig::new(cso_config("up"));
        up.downstream = Some("down".into());
        let down = CatchmentNodeConfig::new(cso_config("down"));
        let config = catchment_config("c", vec![up, down]);

        let up_inflow = spike_series(1000, 100, 30, 1.0);
        let down_inflow = spike_series(1000, 400, 20, 0.5);
        let zeros = vec![0.0; 1000];
        let model = CatchmentModel::new(
            &config,
            vec![
                NodeInputs {
                    inflow: &up_inflow,
                    continuation: &zeros,
                    depth: None,
                },
                NodeInputs {
                    inflow: &down_inflow,
                    continuation: &zeros,
                    depth: None,
                },
            ],
            &timeline,
        )
        .unwrap();
        let result = solve_catchment(&model, &SolverSettings::catchment());
        assert!(result.converged);
        for node in &result.nodes {
            assert!(node.result.converged, "{}", node.result.name);
            assert_eq!(node.result.spill_count, 0, "{}", node.result.name);
        }
        let up = result.node("up").unwrap();
        assert_eq!(up.level, PositionLevel(1));
        assert_eq!(up.downstream.as_deref(), Some("down"));
        assert!(up.result.final_storage_m3 >= 1799.0);

        // Down has no pass-forward limit, so it has to hold everything up
        // drains as well as its own storm.
        let down = &result.node("down").unwrap().result;
        assert!(
            (down.final_storage_m3 - 2400.0).abs() <= 2.0,
            "{}",
            down.final_storage_m3
        );
        // Down met its target at 0 m³ before up held any water, so it had to
        // be searched again.
        assert_eq!(down.iteration_history[0], (0.0, 0));
        assert!(down.iterations > 1);
    }

    #[test]
    fn catchment_search_bisects_past_an_overshoot() {
        // Storms of 1800 m³ and 600 m³ on different days.
        let len = 3 * 24 * 60;
        let timeline = minute_timeline(len);
        let config = catchment_config("c", vec![CatchmentNodeConfig::new(cso_config("solo"))]);
        let mut inflow = spike_series(len, 100, 30, 1.0);
        inflow[2000..2020].fill(0.5);
        let zeros = vec![0.0; len];
        let model = CatchmentModel::new(
            &config,
            vec![NodeInputs {
                inflow: &inflow,
                continuation: &zeros,
                depth: None,
            }],
            &timeline,
        )
        .unwrap();

        let result = solve_catchment(&model, &SolverSettings::catchment());
        assert!(result.converged);
        let solo = &result.nodes[0].result;
        assert!(solo.converged);
        assert_eq!(solo.spill_count, 0);
        assert!(
            (solo.final_storage_m3 - 1800.0).abs() < 1.0,
            "{}",
            solo.final_storage_m3
        );
        // The gradient step overshoots to about 3000 m³ before bisecting back down.
        assert!(solo.iteration_history.iter().any(|&(v, n)| v > 2900.0 && n == 0));
    }

    #[test]
    fn fixed_node_is_not_searched() {
        let timeline = minute_timeline(100);
        let mut node = CatchmentNodeConfig::new(cso_config("solo"));
        node.cso.fixed_tank_volume_m3 = Some(42.0);
        let config = catchment_config("c", vec![node]);
        let inflow = spike_series(100, 10, 5, 1.0);
        let zeros = vec![0.0; 100];
        let model = CatchmentModel::new(
            &config,
            vec![NodeInputs {
                inflow: &inflow,
                continuation: &zeros,
                depth: None,
            }],
            &timeline,
        )
        .unwrap();
        let result = solve_catchment(&model, &SolverSettings::catchment());
        assert_eq!(result.iterations, 0);
        let solo = &result.nodes[0].result;
        assert_eq!(solo.final_storage_m3, 42.0);
        assert_eq!(solo.iterations, 0);
        assert!(solo.converged);
    }

    #[test]
    fn mismatched_inputs_rejected() {
        let timeline = minute_timeline(10);
        let config = catchment_config("c", vec![CatchmentNodeConfig::new(cso_config("a"))]);
        let err = CatchmentModel::new(&config, Vec::new(), &timeline).unwrap_err();
        assert!(matches!(err, AnalysisError::InputMismatch { nodes: 1, inputs: 0, .. }));
    }
}
