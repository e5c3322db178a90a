//! Cross-crate batch tests: many independent analyses solved together with
//! the `parallel` feature on.

use chrono::Datelike;

use stormtank_core::analysis::{AnalysisOutcome, run_analysis};
use stormtank_core::batch::{Analysis, solve_all};
use stormtank_core::config::{AnalysisConfig, SpillTargets};
use stormtank_core::error::AnalysisError;
use stormtank_core::series::{LinkSeries, SeriesStore};
use stormtank_core::solver::SolverSettings;
use stormtank_core::test_utils::*;

/// Two weeks at one-minute steps. CSO `cso_i` gets two storms of
/// `(i + 1) * 300` m³ and `(i + 1) * 600` m³ a week apart.
fn store(count: usize) -> SeriesStore {
    let len = 14 * 24 * 60;
    let mut store = SeriesStore::new(minute_timeline(len));
    for i in 0..count {
        let q = (i + 1) as f64 * 0.5;
        let mut flow = spike_series(len, 600, 10, q);
        for f in &mut flow[7 * 24 * 60..7 * 24 * 60 + 20] {
            *f = q;
        }
        store
            .insert(format!("cso_{i}_overflow"), LinkSeries::from_flow(flow))
            .unwrap();
        store
            .insert(format!("cso_{i}_cont"), LinkSeries::from_flow(vec![0.0; len]))
            .unwrap();
    }
    store
}

fn configs(count: usize) -> Vec<AnalysisConfig> {
    (0..count)
        .map(|i| {
            let name = format!("cso_{i}");
            if i % 2 == 0 {
                let mut cso = cso_config(&name);
                cso.targets = SpillTargets::entire(1);
                AnalysisConfig::Default(cso)
            } else {
                AnalysisConfig::Wwtw(wwtw_config(&name))
            }
        })
        .collect()
}

#[test]
fn batch_matches_one_at_a_time() {
    let store = store(6);
    let configs = configs(6);
    let batch: Vec<Analysis<'_>> = configs
        .iter()
        .map(|c| Analysis::new(c.clone(), &store))
        .collect();

    let together = solve_all(&batch);
    assert_eq!(together.len(), configs.len());
    for (config, outcome) in configs.iter().zip(&together) {
        let alone = run_analysis(config, &store);
        assert_eq!(outcome, &alone, "{}", config.name());
    }
}

#[test]
fn batch_results_line_up_with_inputs() {
    let store = store(6);
    let configs = configs(6);
    let batch: Vec<Analysis<'_>> = configs
        .iter()
        .map(|c| Analysis::new(c.clone(), &store))
        .collect();

    for (i, outcome) in solve_all(&batch).into_iter().enumerate() {
        let outcome = outcome.unwrap();
        let AnalysisOutcome::Single(result) = outcome else {
            panic!("single-node analyses give single results");
        };
        assert_eq!(result.name, format!("cso_{i}"));
        assert!(result.converged);

        let small = (i + 1) as f64 * 300.0;
        let large = (i + 1) as f64 * 600.0;
        if i % 2 == 0 {
            // One spill allowed: only the small storm has to fit.
            assert!(result.final_storage_m3 < large - 1.0, "{i}");
            assert!(result.final_storage_m3 >= small - 1.0, "{i}");
            assert_eq!(result.spill_count, 1);
        } else {
            assert!((result.final_storage_m3 - large).abs() <= 1.0, "{i}");
            assert_eq!(result.spill_count, 0);
        }
    }
}

#[test]
fn one_bad_analysis_does_not_spoil_the_batch() {
    let store = store(2);
    let mut configs = configs(2);
    if let AnalysisConfig::Default(cso) = &mut configs[0] {
        cso.continuation_link = "missing".into();
    }
    let batch: Vec<Analysis<'_>> = configs
        .iter()
        .map(|c| Analysis::new(c.clone(), &store))
        .collect();

    let results = solve_all(&batch);
    assert!(matches!(
        results[0],
        Err(AnalysisError::MissingLink { ref link, .. }) if link == "missing"
    ));
    assert!(results[1].as_ref().is_ok_and(AnalysisOutcome::converged));
}

#[test]
fn settings_override_caps_iterations() {
    let store = store(1);
    let configs = configs(1);
    let settings = SolverSettings {
        max_iterations: 1,
        max_refinement_iterations: 0,
        ..SolverSettings::default()
    };
    let batch = [Analysis::new(configs[0].clone(), &store).with_settings(settings)];

    let outcome = solve_all(&batch).remove(0).unwrap();
    let result = outcome.results()[0];
    assert!(!result.converged);
    assert_eq!(result.iterations, 1);
}

#[test]
fn summaries_group_spills_by_year() {
    let store = store(1);
    let mut config = cso_config("cso_0");
    config.targets = SpillTargets::entire(2);
    config.fixed_tank_volume_m3 = Some(0.0);
    let outcome = run_analysis(&AnalysisConfig::Default(config), &store).unwrap();
    let result = outcome.results()[0];

    let summary = result.summary();
    assert_eq!(summary.spills_per_year.get(&2021), Some(&2));
    assert!((summary.total_spill_volume_m3 - 900.0).abs() < 1e-6);
    assert_eq!(summary.largest_event_m3.map(f64::round), Some(600.0));
    assert!(
        result
            .spill_events
            .iter()
            .all(|e| e.start_time.year() == 2021)
    );
}
