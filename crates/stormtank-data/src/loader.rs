//! Loading pipeline: reads project and series files, builds effective links,
//! resolves link references and produces engine configurations.
//!
//! Provides format detection (RON/JSON/TOML), file discovery, and
//! deserialization helpers used by [`load_project`].

use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use stormtank_core::config::{AnalysisConfig, ConfigError};
use stormtank_core::series::{SeriesError, SeriesStore};
use stormtank_core::topology::TopologyError;

use crate::links::apply_effective_links;
use crate::project::{Project, resolve_analysis, resolve_series};
use crate::schema::{ProjectData, SeriesData};

/// Base name of the project file inside a project directory.
pub const PROJECT_FILE: &str = "project";

/// Base name of the series file inside a project directory.
pub const SERIES_FILE: &str = "series";

// ===========================================================================
// Errors
// ===========================================================================

/// Errors that can occur during data loading.
#[derive(Debug, thiserror::Error)]
pub enum DataLoadError {
    /// A required data file was not found in the given directory.
    #[error("required file '{file}' not found in {dir}")]
    MissingRequired { file: String, dir: PathBuf },

    /// The file has an extension we don't support.
    #[error("unsupported format for file: {file}")]
    UnsupportedFormat { file: PathBuf },

    /// Two files with the same base name but different formats exist.
    #[error("conflicting formats: {a} and {b}")]
    ConflictingFormats { a: PathBuf, b: PathBuf },

    /// A deserialization error occurred.
    #[error("parse error in {file}: {detail}")]
    Parse { file: PathBuf, detail: String },

    /// A link name could not be found in the series data.
    #[error("unresolved {expected_kind} reference '{name}' in {file}")]
    UnresolvedRef {
        file: PathBuf,
        name: String,
        expected_kind: &'static str,
    },

    /// A duplicate name was found.
    #[error("duplicate name '{name}' in {file}")]
    DuplicateName { file: PathBuf, name: String },

    /// An effective link lists a component with no series data.
    #[error("effective link '{link}' needs component '{component}', which has no data")]
    MissingComponent { link: String, component: String },

    /// An effective link reuses the name of a link that already has data.
    #[error("effective link '{0}' shadows an existing link")]
    ShadowedLink(String),

    /// An effective link lists no components at all.
    #[error("effective link '{0}' has no components")]
    EmptyEffectiveLink(String),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid catchment: {0}")]
    Topology(#[from] TopologyError),

    #[error("invalid series: {0}")]
    Series(#[from] SeriesError),

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ===========================================================================
// Format detection
// ===========================================================================

/// Supported data file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Ron,
    Toml,
    Json,
}

/// Detect the format of a file based on its extension.
pub fn detect_format(path: &Path) -> Result<Format, DataLoadError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("ron") => Ok(Format::Ron),
        Some("toml") => Ok(Format::Toml),
        Some("json") => Ok(Format::Json),
        _ => Err(DataLoadError::UnsupportedFormat {
            file: path.to_path_buf(),
        }),
    }
}

// ===========================================================================
// File discovery
// ===========================================================================

/// Scan a directory for a data file with the given base name (without extension).
///
/// Looks for `{base_name}.ron`, `{base_name}.toml`, and `{base_name}.json`.
/// Returns `Ok(None)` if no file is found, or `Err(ConflictingFormats)` if
/// multiple formats exist for the same base name.
pub fn find_data_file(dir: &Path, base_name: &str) -> Result<Option<PathBuf>, DataLoadError> {
    let mut found: Option<PathBuf> = None;

    for ext in ["ron", "toml", "json"] {
        let candidate = dir.join(format!("{base_name}.{ext}"));
        if candidate.exists() {
            if let Some(existing) = found {
                return Err(DataLoadError::ConflictingFormats {
                    a: existing,
                    b: candidate,
                });
            }
            found = Some(candidate);
        }
    }

    Ok(found)
}

/// Like [`find_data_file`], but returns an error if no file is found.
pub fn require_data_file(dir: &Path, base_name: &str) -> Result<PathBuf, DataLoadError> {
    find_data_file(dir, base_name)?.ok_or_else(|| DataLoadError::MissingRequired {
        file: base_name.to_string(),
        dir: dir.to_path_buf(),
    })
}

// ===========================================================================
// Deserialization
// ===========================================================================

/// Parse `content` in the given format. `path` only labels errors.
pub fn deserialize_str<T: DeserializeOwned>(
    content: &str,
    format: Format,
    path: &Path,
) -> Result<T, DataLoadError> {
    let parse_error = |detail: String| DataLoadError::Parse {
        file: path.to_path_buf(),
        detail,
    };
    match format {
        Format::Ron => ron::from_str(content).map_err(|e| parse_error(e.to_string())),
        Format::Json => serde_json::from_str(content).map_err(|e| parse_error(e.to_string())),
        Format::Toml => toml::from_str(content).map_err(|e| parse_error(e.to_string())),
    }
}

/// Read a file and deserialize it according to its format (detected from extension).
pub fn deserialize_file<T: DeserializeOwned>(path: &Path) -> Result<T, DataLoadError> {
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    deserialize_str(&content, format, path)
}

// ===========================================================================
// Pipeline
// ===========================================================================

/// Load the series file at `path`.
pub fn load_series(path: &Path) -> Result<SeriesStore, DataLoadError> {
    let data: SeriesData = deserialize_file(path)?;
    resolve_series(data, path)
}

/// Load a project from `project_path`, resolving its links against `store`.
///
/// Effective links declared in the project are added to the store first, so
/// analyses may refer to them like any monitored link.
pub fn load_project_file(
    project_path: &Path,
    mut store: SeriesStore,
) -> Result<Project, DataLoadError> {
    let data: ProjectData = deserialize_file(project_path)?;
    apply_effective_links(&mut store, &data.effective_links)?;
    debug!(
        file = %project_path.display(),
        effective_links = data.effective_links.len(),
        links = store.len(),
        "series links ready"
    );

    let mut analyses: Vec<AnalysisConfig> = Vec::with_capacity(data.analyses.len());
    for analysis in data.analyses {
        let config = resolve_analysis(analysis, &store, project_path)?;
        if analyses.iter().any(|a| a.name() == config.name()) {
            return Err(DataLoadError::DuplicateName {
                file: project_path.to_path_buf(),
                name: config.name().to_string(),
            });
        }
        analyses.push(config);
    }

    info!(
        file = %project_path.display(),
        analyses = analyses.len(),
        "project loaded"
    );
    Ok(Project { analyses, store })
}

/// Load `project.{ron,toml,json}` and `series.{ron,toml,json}` from `dir`.
pub fn load_project(dir: &Path) -> Result<Project, DataLoadError> {
    let series_path = require_data_file(dir, SERIES_FILE)?;
    let project_path = require_data_file(dir, PROJECT_FILE)?;
    let store = load_series(&series_path)?;
    load_project_file(&project_path, store)
}

// ===========================================================================
// Tests
// ===========================================================================
