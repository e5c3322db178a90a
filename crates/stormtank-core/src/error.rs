use crate::config::ConfigError;
use crate::series::SeriesError;
use crate::topology::TopologyError;

/// Any failure that stops an analysis before it can produce a result.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Series(#[from] SeriesError),
    #[error(transparent)]
    Topology(#[from] TopologyError),
    #[error("analysis '{analysis}' needs link '{link}', which has no data")]
    MissingLink { analysis: String, link: String },
    #[error("catchment '{catchment}' has {nodes} nodes but {inputs} input sets")]
    InputMismatch {
        catchment: String,
        nodes: usize,
        inputs: usize,
    },
    #[error("analysis period leaves no samples for '{0}'")]
    EmptyPeriod(String),
}
