//! Data layer of the benefit KPI engine.
//!
//! Reads the four source tables through a [`source::SourceProvider`]
//! (local delimited files or a remote warehouse), types and validates them,
//! joins reference context onto transactions and computes the three KPI
//! tables, which are finally handed to an [`sink::OutputSink`].

pub mod aggregator;
pub mod join;
pub mod loader;
pub mod moving_average;
pub mod ranking;
pub mod remote;
pub mod sink;
pub mod source;

pub use kpi_core as core;
