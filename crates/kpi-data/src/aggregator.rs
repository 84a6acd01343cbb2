//! Monthly expense aggregation per department.

use std::collections::BTreeMap;

use kpi_core::models::{MonthlyDepartmentExpense, NullsLast};
use kpi_core::month::{truncate_to_month, Month};
use tracing::{debug, warn};

use crate::join::DepartmentSpend;

/// Group joined transactions by (month, department) and sum their amounts.
///
/// Null amounts count as zero. Rows whose date does not parse land in
/// [`Month::Unknown`]. Output is ordered by month, then department name,
/// with unknown months and unnamed departments last.
pub fn aggregate_monthly(rows: &[DepartmentSpend<'_>]) -> Vec<MonthlyDepartmentExpense> {
    let mut totals: BTreeMap<(Month, NullsLast<&str>), f64> = BTreeMap::new();
    let mut unknown_dates = 0usize;

    for row in rows {
        let month = truncate_to_month(row.transaction.date.as_deref());
        if !month.is_known() {
            unknown_dates += 1;
            debug!(
                "Unparseable date {:?} for employee {:?}",
                row.transaction.date, row.transaction.employee_id
            );
        }
        *totals
            .entry((month, NullsLast(row.department_name)))
            .or_insert(0.0) += row.transaction.amount.unwrap_or(0.0);
    }

    if unknown_dates > 0 {
        warn!(
            "{} transactions have an unparseable date and were grouped under the unknown month",
            unknown_dates
        );
    }

    totals
        .into_iter()
        .map(
            |((month, NullsLast(department)), total)| MonthlyDepartmentExpense {
                month,
                department_name: department.map(str::to_string),
                total_expense: total,
            },
        )
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
