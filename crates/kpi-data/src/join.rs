//! Left-outer joins that attach reference context to transactions.

use std::collections::HashMap;

use kpi_core::error::{KpiError, Result};
use kpi_core::models::{Benefit, Department, Employee, SourceTable, Transaction};
use tracing::debug;

// ── Generic join ──────────────────────────────────────────────────────────────

/// Index `rows` by `key`, failing on the first repeated key.
pub fn index_unique<'a, R>(
    table: SourceTable,
    rows: &'a [R],
    key: impl Fn(&'a R) -> &'a str,
) -> Result<HashMap<&'a str, &'a R>> {
    let mut index = HashMap::with_capacity(rows.len());
    for row in rows {
        let k = key(row);
        if index.insert(k, row).is_some() {
            return Err(KpiError::DuplicateKey {
                table,
                key: k.to_string(),
            });
        }
    }
    Ok(index)
}

/// Left-outer join of `left` with the uniquely keyed `right` table.
///
/// The output has exactly one entry per `left` row, in `left` order. A left
/// row whose key is `None` or absent from `right` is paired with `None`.
pub fn join_left<'l, 'r, L, R>(
    left: &'l [L],
    right: &'r [R],
    right_table: SourceTable,
    left_key: impl Fn(&'l L) -> Option<&'l str>,
    right_key: impl Fn(&'r R) -> &'r str,
) -> Result<Vec<(&'l L, Option<&'r R>)>> {
    let index = index_unique(right_table, right, right_key)?;

    let joined: Vec<(&L, Option<&R>)> = left
        .iter()
        .map(|row| {
            let matched = left_key(row).and_then(|k| index.get(k).copied());
            (row, matched)
        })
        .collect();

    let unmatched = joined.iter().filter(|(_, r)| r.is_none()).count();
    if unmatched > 0 {
        debug!(
            "{} of {} rows found no match in {}",
            unmatched,
            joined.len(),
            right_table
        );
    }
    Ok(joined)
}

// ── Joined row shapes ─────────────────────────────────────────────────────────

/// A transaction with its department context.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepartmentSpend<'a> {
    pub transaction: &'a Transaction,
    pub department_name: Option<&'a str>,
}

/// A transaction with its employee and benefit context.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BenefitSpend<'a> {
    pub transaction: &'a Transaction,
    pub employee_name: Option<&'a str>,
    pub benefit_name: Option<&'a str>,
}

/// transaction ⋈ employee ⋈ department.
pub fn join_departments<'a>(
    transactions: &'a [Transaction],
    employees: &'a [Employee],
    departments: &'a [Department],
) -> Result<Vec<DepartmentSpend<'a>>> {
    let with_employee = join_left(
        transactions,
        employees,
        SourceTable::Employees,
        |t| t.employee_id.as_deref(),
        |e| e.employee_id.as_str(),
    )?;
    let department_index = index_unique(SourceTable::Departments, departments, |d| {
        d.department_id.as_str()
    })?;

    Ok(with_employee
        .into_iter()
        .map(|(transaction, employee)| {
            let department = employee
                .and_then(|e| e.department_id.as_deref())
                .and_then(|id| department_index.get(id).copied());
            DepartmentSpend {
                transaction,
                department_name: department.and_then(|d| d.department_name.as_deref()),
            }
        })
        .collect())
}

/// transaction ⋈ employee ⋈ benefit.
pub fn join_benefits<'a>(
    transactions: &'a [Transaction],
    employees: &'a [Employee],
    benefits: &'a [Benefit],
) -> Result<Vec<BenefitSpend<'a>>> {
    let with_employee = join_left(
        transactions,
        employees,
        SourceTable::Employees,
        |t| t.employee_id.as_deref(),
        |e| e.employee_id.as_str(),
    )?;
    let with_benefit = join_left(
        transactions,
        benefits,
        SourceTable::Benefits,
        |t| t.benefit_id.as_deref(),
        |b| b.benefit_id.as_str(),
    )?;

    Ok(with_employee
        .into_iter()
        .zip(with_benefit)
        .map(|((transaction, employee), (_, benefit))| BenefitSpend {
            transaction,
            employee_name: employee.and_then(|e| e.name.as_deref()),
            benefit_name: benefit.and_then(|b| b.benefit_name.as_deref()),
        })
        .collect())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
