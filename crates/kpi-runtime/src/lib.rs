//! Runtime orchestration layer for the benefit KPI engine.
//!
//! Loads the source tables once per run, drives each KPI chain through the
//! data layer, and hands the results to an output sink while keeping every
//! KPI's failure to itself.

pub mod orchestrator;

pub use kpi_core as core;
pub use kpi_data as data;
