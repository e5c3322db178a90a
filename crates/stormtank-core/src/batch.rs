//! Solving many independent analyses at once.
//!
//! With the `parallel` feature the analyses are spread over the rayon
//! thread pool; without it they run one after another. Either way the
//! results come back in input order and each analysis owns its own state.

use crate::analysis::{AnalysisOutcome, default_settings, run_analysis_with};
use crate::config::AnalysisConfig;
use crate::error::AnalysisError;
use crate::series::SeriesStore;
use crate::solver::SolverSettings;

/// One queued analysis.
#[derive(Debug, Clone)]
pub struct Analysis<'a> {
    pub config: AnalysisConfig,
    pub store: &'a SeriesStore,
    /// Overrides the mode's default settings.
    pub settings: Option<SolverSettings>,
}

impl<'a> Analysis<'a> {
    pub fn new(config: AnalysisConfig, store: &'a SeriesStore) -> Self {
        Self {
            config,
            store,
            settings: None,
        }
    }

    pub fn with_settings(mut self, settings: SolverSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn run(&self) -> Result<AnalysisOutcome, AnalysisError> {
        match &self.settings {
            Some(settings) => run_analysis_with(&self.config, self.store, settings),
            None => run_analysis_with(&self.config, self.store, &default_settings(&self.config)),
        }
    }
}

/// Run every analysis; results line up with `analyses`.
pub fn solve_all(analyses: &[Analysis<'_>]) -> Vec<Result<AnalysisOutcome, AnalysisError>> {
    tracing::debug!(count = analyses.len(), "solving batch");

    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        analyses.par_iter().map(Analysis::run).collect()
    }

    #[cfg(not(feature = "parallel"))]
    {
        analyses.iter().map(Analysis::run).collect()
    }
}
