//! Project files for the stormtank engine.
//!
//! A project directory holds `series.{ron,toml,json}` with the monitored
//! link data and `project.{ron,toml,json}` with the analyses to run and any
//! effective links they need. [`load_project`] reads both and returns
//! validated engine configurations ready for [`stormtank_core::batch`].

pub mod links;
pub mod loader;
pub mod project;
pub mod schema;

pub use loader::{DataLoadError, load_project, load_project_file, load_series};
pub use project::Project;
