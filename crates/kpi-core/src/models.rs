use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::month::Month;

// ── Source tables ─────────────────────────────────────────────────────────────

/// The four raw inputs of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SourceTable {
    Transactions,
    Employees,
    Departments,
    Benefits,
}

impl SourceTable {
    /// Every source table, in load order.
    pub const ALL: [SourceTable; 4] = [
        SourceTable::Transactions,
        SourceTable::Employees,
        SourceTable::Departments,
        SourceTable::Benefits,
    ];

    /// Canonical lowercase name used in logs and errors.
    pub fn name(self) -> &'static str {
        match self {
            SourceTable::Transactions => "transactions",
            SourceTable::Employees => "employees",
            SourceTable::Departments => "departments",
            SourceTable::Benefits => "benefits",
        }
    }

    /// Columns that must be present (after alias resolution) for the table
    /// to load.
    pub fn required_columns(self) -> &'static [&'static str] {
        match self {
            SourceTable::Transactions => &["employee_id", "benefit_id", "date", "amount"],
            SourceTable::Employees => &["employee_id", "name", "department_id"],
            SourceTable::Departments => &["department_id", "department_name"],
            SourceTable::Benefits => &["benefit_id", "benefit_name"],
        }
    }
}

impl fmt::Display for SourceTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Map a source column header onto its canonical name.
///
/// The raw exports of the benefits system carry Portuguese headers; both
/// spellings are accepted. Unknown headers are returned trimmed and
/// otherwise unchanged.
pub fn canonical_column(header: &str) -> &str {
    let trimmed = header.trim();
    match trimmed {
        "id_colaborador" => "employee_id",
        "id_beneficio" => "benefit_id",
        "data" => "date",
        "valor" => "amount",
        "nome" => "name",
        "id_departamento" => "department_id",
        "nome_departamento" => "department_name",
        "nome_beneficio" => "benefit_name",
        other => other,
    }
}

// ── Source entities ───────────────────────────────────────────────────────────

/// One benefit spend event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub employee_id: Option<String>,
    pub benefit_id: Option<String>,
    /// Raw date text; truncated to a [`Month`] during aggregation.
    pub date: Option<String>,
    pub amount: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Employee {
    pub employee_id: String,
    pub name: Option<String>,
    pub department_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Department {
    pub department_id: String,
    pub department_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Benefit {
    pub benefit_id: String,
    pub benefit_name: Option<String>,
}

// ── Derived KPI rows ──────────────────────────────────────────────────────────

/// Total benefit expense of one department in one month.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyDepartmentExpense {
    pub month: Month,
    pub department_name: Option<String>,
    pub total_expense: f64,
}

/// [`MonthlyDepartmentExpense`] extended with its 3-month trailing mean.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MovingAvgDepartmentExpense {
    pub month: Month,
    pub department_name: Option<String>,
    pub total_expense: f64,
    pub moving_avg_3m: f64,
}

/// One ranked employee within a benefit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopEmployeeByBenefit {
    pub benefit_name: Option<String>,
    pub employee_id: Option<String>,
    pub employee_name: Option<String>,
    pub total_amount: f64,
    pub rank: u32,
}

// ── KPI identity ──────────────────────────────────────────────────────────────

/// The three derived tables a run produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KpiKind {
    MonthlyDepartmentExpense,
    MovingAvgDepartmentExpense,
    TopEmployeeByBenefit,
}

impl KpiKind {
    pub const ALL: [KpiKind; 3] = [
        KpiKind::MonthlyDepartmentExpense,
        KpiKind::MovingAvgDepartmentExpense,
        KpiKind::TopEmployeeByBenefit,
    ];

    pub fn name(self) -> &'static str {
        match self {
            KpiKind::MonthlyDepartmentExpense => "monthly_department_expense",
            KpiKind::MovingAvgDepartmentExpense => "moving_avg_department_expense",
            KpiKind::TopEmployeeByBenefit => "top_employee_by_benefit",
        }
    }

    /// File name used by file-backed sinks.
    pub fn file_name(self) -> &'static str {
        match self {
            KpiKind::MonthlyDepartmentExpense => "kpi_monthly_department_expense.csv",
            KpiKind::MovingAvgDepartmentExpense => "kpi_3month_moving_avg_department.csv",
            KpiKind::TopEmployeeByBenefit => "kpi_top10_employee_by_benefit.csv",
        }
    }

    /// Output column names, in order.
    pub fn columns(self) -> &'static [&'static str] {
        match self {
            KpiKind::MonthlyDepartmentExpense => &["month", "department_name", "total_expense"],
            KpiKind::MovingAvgDepartmentExpense => {
                &["month", "department_name", "total_expense", "moving_avg_3m"]
            }
            KpiKind::TopEmployeeByBenefit => &[
                "benefit_name",
                "employee_id",
                "employee_name",
                "total_amount",
                "rank",
            ],
        }
    }
}

impl fmt::Display for KpiKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A computed result table ready to be handed to a sink.
#[derive(Debug, Clone, PartialEq)]
pub enum KpiTable {
    MonthlyDepartmentExpense(Vec<MonthlyDepartmentExpense>),
    MovingAvgDepartmentExpense(Vec<MovingAvgDepartmentExpense>),
    TopEmployeeByBenefit(Vec<TopEmployeeByBenefit>),
}

impl KpiTable {
    pub fn kind(&self) -> KpiKind {
        match self {
            KpiTable::MonthlyDepartmentExpense(_) => KpiKind::MonthlyDepartmentExpense,
            KpiTable::MovingAvgDepartmentExpense(_) => KpiKind::MovingAvgDepartmentExpense,
            KpiTable::TopEmployeeByBenefit(_) => KpiKind::TopEmployeeByBenefit,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            KpiTable::MonthlyDepartmentExpense(rows) => rows.len(),
            KpiTable::MovingAvgDepartmentExpense(rows) => rows.len(),
            KpiTable::TopEmployeeByBenefit(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serialise the table as delimited text with a header row.
    ///
    /// The header is written explicitly so that empty tables still carry
    /// their column names.
    pub fn write_csv<W: std::io::Write>(&self, writer: W) -> Result<(), csv::Error> {
        let mut wtr = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(writer);
        wtr.write_record(self.kind().columns())?;
        match self {
            KpiTable::MonthlyDepartmentExpense(rows) => {
                for row in rows {
                    wtr.serialize(row)?;
                }
            }
            KpiTable::MovingAvgDepartmentExpense(rows) => {
                for row in rows {
                    wtr.serialize(row)?;
                }
            }
            KpiTable::TopEmployeeByBenefit(rows) => {
                for row in rows {
                    wtr.serialize(row)?;
                }
            }
        }
        wtr.flush()?;
        Ok(())
    }
}

// ── Ordering helpers ──────────────────────────────────────────────────────────

/// Compare two optional values, placing `None` after every `Some`.
pub fn cmp_nulls_last<T: Ord + ?Sized>(a: Option<&T>, b: Option<&T>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Optional key that orders `None` after every `Some`, for use in ordered maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NullsLast<T>(pub Option<T>);

impl<T: Ord> Ord for NullsLast<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        cmp_nulls_last(self.0.as_ref(), other.0.as_ref())
    }
}

impl<T: Ord> PartialOrd for NullsLast<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
