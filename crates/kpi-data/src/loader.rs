//! Typed loading of the four source tables.

use csv::StringRecord;
use kpi_core::error::{KpiError, Result};
use kpi_core::models::{canonical_column, Benefit, Department, Employee, SourceTable, Transaction};
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use crate::source::{RawTable, SourceProvider};

// ── Typed parsing ─────────────────────────────────────────────────────────────

/// Validate the schema of `raw` and deserialize every record into `T`.
///
/// Headers are mapped through [`canonical_column`] first. Extra columns are
/// ignored; any required column that is still absent fails the whole table.
pub fn parse_table<T: DeserializeOwned>(table: SourceTable, raw: &RawTable) -> Result<Vec<T>> {
    let headers: StringRecord = raw.headers.iter().map(canonical_column).collect();

    let missing: Vec<String> = table
        .required_columns()
        .iter()
        .filter(|col| !headers.iter().any(|h| h == **col))
        .map(|col| col.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(KpiError::Schema { table, missing });
    }

    raw.records
        .iter()
        .enumerate()
        .map(|(i, record)| {
            let mut record = record.clone();
            record.trim();
            record
                .deserialize::<T>(Some(&headers))
                .map_err(|e| KpiError::Parse {
                    table,
                    row: i + 1,
                    message: e.to_string(),
                })
        })
        .collect()
}

// ── SourceTables ──────────────────────────────────────────────────────────────

/// Outcome of loading every source table for one run.
///
/// Each table keeps its own result so that a failure only affects the KPIs
/// that read that table.
#[derive(Debug, Clone)]
pub struct SourceTables {
    pub transactions: Result<Vec<Transaction>>,
    pub employees: Result<Vec<Employee>>,
    pub departments: Result<Vec<Department>>,
    pub benefits: Result<Vec<Benefit>>,
}

// ── TableLoader ───────────────────────────────────────────────────────────────

/// Fetches source tables through a provider and types them.
pub struct TableLoader<'a> {
    provider: &'a SourceProvider,
}

impl<'a> TableLoader<'a> {
    pub fn new(provider: &'a SourceProvider) -> Self {
        Self { provider }
    }

    /// Fetch and type a single table.
    pub async fn load<T: DeserializeOwned>(&self, table: SourceTable) -> Result<Vec<T>> {
        let raw = self.provider.load(table).await?;
        let rows = parse_table::<T>(table, &raw)?;
        info!("Loaded {} rows from {}", rows.len(), table);
        Ok(rows)
    }

    /// Fetch all four tables concurrently.
    pub async fn load_all(&self) -> SourceTables {
        let (transactions, employees, departments, benefits) = tokio::join!(
            self.load::<Transaction>(SourceTable::Transactions),
            self.load::<Employee>(SourceTable::Employees),
            self.load::<Department>(SourceTable::Departments),
            self.load::<Benefit>(SourceTable::Benefits),
        );

        let sources = SourceTables {
            transactions,
            employees,
            departments,
            benefits,
        };
        for (table, err) in [
            (SourceTable::Transactions, sources.transactions.as_ref().err()),
            (SourceTable::Employees, sources.employees.as_ref().err()),
            (SourceTable::Departments, sources.departments.as_ref().err()),
            (SourceTable::Benefits, sources.benefits.as_ref().err()),
        ] {
            if let Some(e) = err {
                warn!(table = %table, stage = "load", error = %e, "source table unavailable");
            }
        }
        sources
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
