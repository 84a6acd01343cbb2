//! Per-benefit ranking of employees by total spend.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use kpi_core::models::{cmp_nulls_last, NullsLast, TopEmployeeByBenefit};

use crate::join::BenefitSpend;

type GroupKey<'a> = (Option<&'a str>, Option<&'a str>, Option<&'a str>);

struct EmployeeTotal<'a> {
    employee_id: Option<&'a str>,
    employee_name: Option<&'a str>,
    total: f64,
}

/// Keep the `limit` highest-spending employees of every benefit.
///
/// Amounts are summed per (benefit, employee id, employee name); null amounts
/// count as zero. Within a benefit, employees are ordered by total descending;
/// equal totals fall back to employee id and then employee name. Ranks are
/// dense and start at 1. Benefits are emitted in name order with the unnamed
/// benefit last.
pub fn rank_top_employees(rows: &[BenefitSpend<'_>], limit: usize) -> Vec<TopEmployeeByBenefit> {
    // Group in first-encounter order.
    let mut slots: HashMap<GroupKey<'_>, usize> = HashMap::new();
    let mut groups: Vec<(Option<&str>, EmployeeTotal<'_>)> = Vec::new();
    for row in rows {
        let key = (
            row.benefit_name,
            row.transaction.employee_id.as_deref(),
            row.employee_name,
        );
        let amount = row.transaction.amount.unwrap_or(0.0);
        match slots.get(&key) {
            Some(&i) => groups[i].1.total += amount,
            None => {
                slots.insert(key, groups.len());
                groups.push((
                    row.benefit_name,
                    EmployeeTotal {
                        employee_id: key.1,
                        employee_name: key.2,
                        total: amount,
                    },
                ));
            }
        }
    }

    let mut partitions: BTreeMap<NullsLast<&str>, Vec<EmployeeTotal<'_>>> = BTreeMap::new();
    for (benefit, total) in groups {
        partitions.entry(NullsLast(benefit)).or_default().push(total);
    }

    let mut out = Vec::new();
    for (NullsLast(benefit), mut employees) in partitions {
        employees.sort_by(|a, b| {
            cmp_employee_id(a.employee_id, b.employee_id)
                .then_with(|| cmp_nulls_last(a.employee_name, b.employee_name))
        });
        // Stable: equal totals keep the id order established above.
        employees.sort_by(|a, b| b.total.total_cmp(&a.total));
        out.extend(
            employees
                .into_iter()
                .take(limit)
                .enumerate()
                .map(|(i, e)| TopEmployeeByBenefit {
                    benefit_name: benefit.map(str::to_string),
                    employee_id: e.employee_id.map(str::to_string),
                    employee_name: e.employee_name.map(str::to_string),
                    total_amount: e.total,
                    rank: (i + 1) as u32,
                }),
        );
    }
    out
}

/// Integer ids first in numeric order, then other ids in text order, then
/// missing ids.
fn cmp_employee_id(a: Option<&str>, b: Option<&str>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => match (a.parse::<i64>(), b.parse::<i64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            (Ok(_), Err(_)) => Ordering::Less,
            (Err(_), Ok(_)) => Ordering::Greater,
            (Err(_), Err(_)) => a.cmp(b),
        },
        _ => cmp_nulls_last(a, b),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
