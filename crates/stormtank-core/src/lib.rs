//! Stormtank Core -- the storage-sizing engine for storm overflow tanks.
//!
//! Given observed flow (and optionally depth) series for the links around a
//! combined sewer overflow (CSO), this crate finds the smallest storage tank
//! that keeps the number of counted spill events within a target.
//!
//! # Pipeline
//!
//! Every analysis is a pure function of (series, configuration):
//!
//! 1. **Resolve** -- look up the configured links in a
//!    [`series::SeriesStore`] and clip them to the analysis period.
//! 2. **Simulate** -- step a tank through the series at a candidate volume:
//!    drain when the continuation link is quiet, then capture the overflow.
//! 3. **Detect** -- count spill events on the remaining overflow with the
//!    12/24-hour rule.
//! 4. **Search** -- repeat 2 and 3 at new volumes until the smallest volume
//!    meeting every target is bracketed to within 1 m³.
//!
//! # Analysis modes
//!
//! - [`tank`] -- a single CSO tank draining into its continuation link.
//! - [`wwtw`] -- a treatment works inlet tank emptied by a pump with on/off
//!   hysteresis and a flow-to-full-treatment limit.
//! - [`catchment`] -- several CSO tanks connected upstream to downstream,
//!   passing extra continuation flow along with a travel delay.
//!
//! # Key Types
//!
//! - [`series::Timeline`] -- the shared time axis of a run.
//! - [`spill::SpillDetector`] -- turns a flow series into [`spill::SpillEvent`]s.
//! - [`solver::StorageModel`] -- anything the solver can search over.
//! - [`topology::CatchmentTopology`] -- slotmap-backed CSO forest with levels.
//! - [`config::AnalysisConfig`] -- one tagged configuration per mode.
//! - [`result::AnalysisResult`] -- storage, spill statistics and the annotated
//!   series of one solved node.
//!
//! ```rust,ignore
//! let outcome = analysis::run_analysis(&config, &store)?;
//! for result in outcome.results() {
//!     println!("{}: {:.0} m³", result.name, result.final_storage_m3);
//! }
//! ```

pub mod analysis;
pub mod batch;
pub mod catchment;
pub mod config;
pub mod error;
pub mod growth;
pub mod id;
pub mod result;
pub mod series;
pub mod solver;
pub mod spill;
pub mod tank;
pub mod topology;
pub mod wwtw;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
