use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::models::{KpiKind, SourceTable};

/// All errors produced by the KPI engine.
///
/// Every variant is `Clone`: a single failed source load is reported by each
/// KPI that depended on that table.
#[derive(Error, Debug, Clone)]
pub enum KpiError {
    /// The source table could not be located (missing file, missing remote table).
    #[error("Source table {table} not found at {location}")]
    MissingSource { table: SourceTable, location: String },

    /// One or more required columns are absent from a source table.
    #[error("Source table {table} is missing required columns: {}", .missing.join(", "))]
    Schema {
        table: SourceTable,
        missing: Vec<String>,
    },

    /// A reference table used on the right side of a join has a repeated key.
    #[error("Duplicate join key {key:?} in {table}")]
    DuplicateKey { table: SourceTable, key: String },

    /// A record could not be converted into its typed row.
    #[error("Failed to parse {table} row {row}: {message}")]
    Parse {
        table: SourceTable,
        row: usize,
        message: String,
    },

    /// The delimited reader failed while reading a source table.
    #[error("Failed to read {table}: {source}")]
    Csv {
        table: SourceTable,
        #[source]
        source: Arc<csv::Error>,
    },

    /// A remote query could not be built, validated or executed.
    #[error("Query error: {0}")]
    Query(String),

    /// Transport-level failure talking to the remote warehouse.
    #[error("HTTP error: {0}")]
    Http(String),

    /// A result table could not be written to its sink.
    #[error("Failed to write {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A KPI could not run because the KPI it is derived from failed.
    #[error("Upstream KPI {kpi} failed: {message}")]
    Upstream { kpi: KpiKind, message: String },
}

impl KpiError {
    /// Wrap a `csv` error raised while reading `table`.
    pub fn csv(table: SourceTable, source: csv::Error) -> Self {
        KpiError::Csv {
            table,
            source: Arc::new(source),
        }
    }

    /// Wrap an I/O error raised while writing `path`.
    pub fn output(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        KpiError::Output {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    /// Source table involved in the failure, when there is one.
    pub fn table(&self) -> Option<SourceTable> {
        match self {
            KpiError::MissingSource { table, .. }
            | KpiError::Schema { table, .. }
            | KpiError::DuplicateKey { table, .. }
            | KpiError::Parse { table, .. }
            | KpiError::Csv { table, .. } => Some(*table),
            _ => None,
        }
    }
}

/// Convenience alias used throughout the KPI crates.
pub type Result<T> = std::result::Result<T, KpiError>;
