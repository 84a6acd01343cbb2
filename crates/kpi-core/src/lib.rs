//! Shared model layer for the benefit KPI engine.
//!
//! Holds the source entities and derived KPI rows, month truncation,
//! the error taxonomy and the CLI/environment settings that resolve into
//! an explicit [`settings::PipelineConfig`].

pub mod error;
pub mod models;
pub mod month;
pub mod settings;
