//! Source providers for the four raw tables.
//!
//! A provider only knows how to fetch a named table as untyped text
//! ([`RawTable`]); typing and schema checks happen in [`crate::loader`], so
//! local files and remote query results go through the same validation.

use std::io::Read;
use std::path::{Path, PathBuf};

use csv::StringRecord;
use kpi_core::error::{KpiError, Result};
use kpi_core::models::SourceTable;
use kpi_core::settings::{PipelineConfig, SourceConfig, TableNames};
use tracing::debug;

use crate::remote::{BigQueryClient, RemoteProvider};

// ── RawTable ──────────────────────────────────────────────────────────────────

/// Header row plus untyped records of one source table.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawTable {
    pub headers: StringRecord,
    pub records: Vec<StringRecord>,
}

impl RawTable {
    /// Build a table from already split cells. Missing cells are empty.
    pub fn from_rows<H, R, C>(headers: H, rows: R) -> Self
    where
        H: IntoIterator,
        H::Item: AsRef<str>,
        R: IntoIterator<Item = C>,
        C: IntoIterator,
        C::Item: AsRef<str>,
    {
        let headers: StringRecord = headers.into_iter().collect();
        let records = rows
            .into_iter()
            .map(|cells| cells.into_iter().collect::<StringRecord>())
            .collect();
        Self { headers, records }
    }

    /// Read a delimited document whose first record is the header.
    pub fn from_reader<R: Read>(table: SourceTable, reader: R, delimiter: u8) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = rdr
            .headers()
            .map_err(|e| KpiError::csv(table, e))?
            .clone();

        let mut records = Vec::new();
        for record in rdr.records() {
            records.push(record.map_err(|e| KpiError::csv(table, e))?);
        }

        Ok(Self { headers, records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// ── LocalFileProvider ─────────────────────────────────────────────────────────

/// Reads each source table from a delimited file inside `raw_dir`.
#[derive(Debug, Clone)]
pub struct LocalFileProvider {
    raw_dir: PathBuf,
    delimiter: u8,
    tables: TableNames,
}

impl LocalFileProvider {
    pub fn new(raw_dir: impl Into<PathBuf>, delimiter: u8, tables: TableNames) -> Self {
        Self {
            raw_dir: raw_dir.into(),
            delimiter,
            tables,
        }
    }

    /// Path of the file backing `table`.
    pub fn path_for(&self, table: SourceTable) -> PathBuf {
        self.raw_dir.join(self.tables.get(table))
    }

    pub fn raw_dir(&self) -> &Path {
        &self.raw_dir
    }

    pub fn load(&self, table: SourceTable) -> Result<RawTable> {
        let path = self.path_for(table);
        let file = std::fs::File::open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                KpiError::MissingSource {
                    table,
                    location: path.display().to_string(),
                }
            } else {
                KpiError::csv(table, csv::Error::from(e))
            }
        })?;

        let raw = RawTable::from_reader(table, std::io::BufReader::new(file), self.delimiter)?;
        debug!(
            "Read {} records from {} ({})",
            raw.len(),
            path.display(),
            table
        );
        Ok(raw)
    }
}

// ── SourceProvider ────────────────────────────────────────────────────────────

/// The capability of fetching source tables, selected once by the caller.
pub enum SourceProvider {
    Local(LocalFileProvider),
    Remote(RemoteProvider),
}

impl SourceProvider {
    /// Build the provider named by the resolved configuration.
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        match &config.source {
            SourceConfig::Local { raw_dir, delimiter } => Ok(SourceProvider::Local(
                LocalFileProvider::new(raw_dir.clone(), *delimiter, config.tables.clone()),
            )),
            SourceConfig::Remote(remote) => {
                let client = BigQueryClient::new(remote)?;
                let provider = RemoteProvider::new(
                    Box::new(client),
                    &remote.project_id,
                    &remote.dataset,
                    config.tables.clone(),
                )?;
                Ok(SourceProvider::Remote(provider))
            }
        }
    }

    /// Short human-readable description for logs.
    pub fn describe(&self) -> String {
        match self {
            SourceProvider::Local(p) => format!("local files in {}", p.raw_dir().display()),
            SourceProvider::Remote(p) => format!("remote dataset {}", p.dataset_path()),
        }
    }

    /// Fetch one source table.
    pub async fn load(&self, table: SourceTable) -> Result<RawTable> {
        match self {
            SourceProvider::Local(p) => p.load(table),
            SourceProvider::Remote(p) => p.load(table).await,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
