//! Output sinks for computed KPI tables.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use kpi_core::error::{KpiError, Result};
use kpi_core::models::KpiTable;
use tracing::info;

/// Destination for result tables.
pub trait OutputSink: Send + Sync {
    /// Persist `table`, returning where it was written (if anywhere).
    fn persist(&self, table: &KpiTable) -> Result<Option<PathBuf>>;

    /// One-line description for logs.
    fn describe(&self) -> String;
}

impl<S: OutputSink + ?Sized> OutputSink for Arc<S> {
    fn persist(&self, table: &KpiTable) -> Result<Option<PathBuf>> {
        (**self).persist(table)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Pick the sink for a resolved output directory: files when set, nothing otherwise.
pub fn from_config(output_dir: Option<PathBuf>) -> Box<dyn OutputSink> {
    match output_dir {
        Some(dir) => Box::new(CsvDirectorySink::new(dir)),
        None => Box::new(NullSink),
    }
}

// ── CsvDirectorySink ──────────────────────────────────────────────────────────

/// Writes each KPI to `<dir>/<kpi file name>`.
#[derive(Debug, Clone)]
pub struct CsvDirectorySink {
    dir: PathBuf,
}

impl CsvDirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl OutputSink for CsvDirectorySink {
    fn persist(&self, table: &KpiTable) -> Result<Option<PathBuf>> {
        std::fs::create_dir_all(&self.dir).map_err(|e| KpiError::output(&self.dir, e))?;

        let path = self.dir.join(table.kind().file_name());
        let mut buf = Vec::new();
        table
            .write_csv(&mut buf)
            .map_err(|e| KpiError::output(&path, e.into()))?;

        // Write to a temp file then rename so readers never see a partial table.
        let tmp = path.with_extension("csv.tmp");
        std::fs::write(&tmp, &buf).map_err(|e| KpiError::output(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| KpiError::output(&path, e))?;

        info!("Wrote {} rows to {}", table.len(), path.display());
        Ok(Some(path))
    }

    fn describe(&self) -> String {
        format!("csv directory {}", self.dir.display())
    }
}

// ── NullSink ──────────────────────────────────────────────────────────────────

/// Discards every table.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl OutputSink for NullSink {
    fn persist(&self, table: &KpiTable) -> Result<Option<PathBuf>> {
        info!("Discarding {} rows of {}", table.len(), table.kind());
        Ok(None)
    }

    fn describe(&self) -> String {
        "none".to_string()
    }
}

// ── MemorySink ────────────────────────────────────────────────────────────────

/// Keeps every persisted table in memory. Used by embedders and tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    tables: Mutex<Vec<KpiTable>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the tables persisted so far, in persist order.
    pub fn tables(&self) -> Vec<KpiTable> {
        match self.tables.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl OutputSink for MemorySink {
    fn persist(&self, table: &KpiTable) -> Result<Option<PathBuf>> {
        match self.tables.lock() {
            Ok(mut guard) => guard.push(table.clone()),
            Err(poisoned) => poisoned.into_inner().push(table.clone()),
        }
        Ok(None)
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
