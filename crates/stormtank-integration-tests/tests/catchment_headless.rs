//! Cross-crate catchment tests: a four-node catchment read from a project
//! file and sized end to end.
//!
//! ```text
//!   north ──┐
//!           ├──> junction ──> outlet
//!   south ──┘
//! ```
//!
//! Every node sees one half-hour storm at the same time. Nodes with upstream
//! neighbours have ample pass-forward capacity, so upstream draindown reaches
//! their continuation link rather than their overflow and each tank only has
//! to hold its own storm.

use std::fs;
use std::path::{Path, PathBuf};

use stormtank_core::analysis::AnalysisOutcome;
use stormtank_core::catchment::CatchmentResult;
use stormtank_core::id::PositionLevel;
use stormtank_core::series::{LinkSeries, SeriesStore};
use stormtank_core::test_utils::*;
use stormtank_data::load_project_file;

const LEN: usize = 1500;

/// (name, storm flow m³/s, storm minutes, downstream)
const NODES: [(&str, f64, usize, Option<&str>); 4] = [
    ("north", 1.0, 30, Some("junction")),
    ("south", 0.5, 30, Some("junction")),
    ("junction", 0.2, 30, Some("outlet")),
    ("outlet", 0.4, 20, None),
];

fn make_test_dir(suffix: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "stormtank_catchment_{suffix}_{}",
        std::process::id()
    ));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn cleanup(dir: &Path) {
    let _ = fs::remove_dir_all(dir);
}

fn store() -> SeriesStore {
    let mut store = SeriesStore::new(minute_timeline(LEN));
    for (name, q, minutes, _) in NODES {
        store
            .insert(
                format!("{name}_overflow"),
                LinkSeries::from_flow(spike_series(LEN, 100, minutes, q)),
            )
            .unwrap();
        store
            .insert(
                format!("{name}_cont"),
                LinkSeries::with_depth(vec![0.0; LEN], vec![0.1; LEN]),
            )
            .unwrap();
    }
    store
}

fn node_json(name: &str, downstream: Option<&str>, fixed: Option<f64>) -> String {
    let downstream = downstream.map_or(String::new(), |d| {
        format!(r#", "downstream": "{d}", "distance_m": 600.0, "velocity_ms": 1.0"#)
    });
    let fixed = fixed.map_or(String::new(), |v| format!(r#", "fixed_tank_volume_m3": {v:?}"#));
    format!(
        r#"{{
            "cso": {{
                "name": "{name}",
                "overflow_link": "{name}_overflow",
                "continuation_link": "{name}_cont",
                "thresholds": {{"flow_m3s": 0.001}},
                "targets": {{"entire_period": 0}},
                "drain": {{
                    "pump_mode": "fixed",
                    "pump_rate_m3s": 0.1,
                    "flow_return_threshold_m3s": 0.5,
                    "depth_return_threshold_m": 1.0
                }}{fixed}
            }},
            "max_pass_forward_flow_m3s": 10.0{downstream}
        }}"#
    )
}

fn solve(model: &str, fixed_outlet: Option<f64>, suffix: &str) -> CatchmentResult {
    let nodes: Vec<String> = NODES
        .iter()
        .map(|&(name, _, _, downstream)| {
            let fixed = if name == "outlet" { fixed_outlet } else { None };
            node_json(name, downstream, fixed)
        })
        .collect();
    let project = format!(
        r#"{{"analyses": [{{
            "mode": "catchment",
            "name": "valley",
            "draindown_model": "{model}",
            "nodes": [{}]
        }}]}}"#,
        nodes.join(", ")
    );

    let dir = make_test_dir(suffix);
    let path = dir.join("project.json");
    fs::write(&path, project).unwrap();
    let project = load_project_file(&path, store()).unwrap();
    cleanup(&dir);

    let mut outcomes = project.run_all();
    assert_eq!(outcomes.len(), 1);
    match outcomes.remove(0).unwrap() {
        AnalysisOutcome::Catchment(result) => result,
        other => panic!("expected a catchment outcome, got {other:?}"),
    }
}

fn assert_holds_own_storm(result: &CatchmentResult) {
    for (name, q, minutes, _) in NODES {
        let node = result.node(name).unwrap();
        let storm = q * minutes as f64 * 60.0;
        assert_eq!(node.result.spill_count, 0, "{name}");
        assert!(
            (node.result.final_storage_m3 - storm).abs() <= 2.0,
            "{name}: {} for a {storm} m³ storm",
            node.result.final_storage_m3
        );
    }
}

#[test]
fn levels_follow_the_tree() {
    let result = solve("independent", None, "levels");
    let level = |name: &str| result.node(name).unwrap().level;
    assert_eq!(level("outlet"), PositionLevel(0));
    assert_eq!(level("junction"), PositionLevel(1));
    assert_eq!(level("north"), PositionLevel(2));
    assert_eq!(level("south"), PositionLevel(2));
    assert_eq!(
        result.node("north").unwrap().downstream.as_deref(),
        Some("junction")
    );
    assert_eq!(result.node("outlet").unwrap().downstream, None);

    // Declaration order is kept in the output.
    let names: Vec<&str> = result.nodes.iter().map(|n| n.result.name.as_str()).collect();
    assert_eq!(names, ["north", "south", "junction", "outlet"]);
}

#[test]
fn independent_draindown_sizes_each_storm() {
    let result = solve("independent", None, "independent");
    assert!(result.converged);
    assert_holds_own_storm(&result);
}

#[test]
fn coordinated_draindown_sizes_each_storm() {
    let result = solve("coordinated", None, "coordinated");
    assert!(result.converged);
    assert_holds_own_storm(&result);

    // North may not drain while the junction still holds water, so its tank
    // stays full for longer than under independent draindown.
    let independent = solve("independent", None, "coordinated_baseline");
    let full_steps = |r: &CatchmentResult| {
        let series = &r.node("north").unwrap().result.annotated_time_series;
        series.tank_volume.iter().filter(|&&v| v > 0.0).count()
    };
    assert!(full_steps(&result) > full_steps(&independent));
}

#[test]
fn upstream_draindown_arrives_ten_minutes_later() {
    let result = solve("independent", None, "delay");
    let junction = &result.node("junction").unwrap().result.annotated_time_series;
    let north = &result.node("north").unwrap().result.annotated_time_series;
    let south = &result.node("south").unwrap().result.annotated_time_series;
    let sent_north = north.outgoing_delta.as_ref().unwrap();
    let sent_south = south.outgoing_delta.as_ref().unwrap();
    let received = junction.incoming_delta.as_ref().unwrap();

    // 600 m at 1 m/s on a one-minute timeline.
    for t in 10..LEN {
        let expected = sent_north[t - 10] + sent_south[t - 10];
        assert!((received[t] - expected).abs() < 1e-12, "step {t}");
    }
    assert!(received[..10].iter().all(|&d| d == 0.0));
}

#[test]
fn fixed_outlet_is_not_searched() {
    let result = solve("independent", Some(1000.0), "fixed");
    let outlet = &result.node("outlet").unwrap().result;
    assert_eq!(outlet.final_storage_m3, 1000.0);
    assert_eq!(outlet.iterations, 0);
    assert_eq!(outlet.spill_count, 0);
    assert!(result.converged);
}

#[test]
fn catchment_result_serializes_for_reporting() {
    let result = solve("coordinated", None, "json");
    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["name"], "valley");
    assert_eq!(json["nodes"].as_array().unwrap().len(), 4);
    assert_eq!(json["nodes"][0]["result"]["name"], "north");
}
