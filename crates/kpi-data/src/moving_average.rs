//! Trailing moving average of monthly department expense.

use kpi_core::models::{cmp_nulls_last, MonthlyDepartmentExpense, MovingAvgDepartmentExpense};

/// Number of months in the trailing window.
pub const WINDOW_MONTHS: usize = 3;

/// Mean of each value with up to `window - 1` predecessors.
///
/// The window grows until it reaches `window` values and then slides, so the
/// first entries are averaged over fewer values instead of being undefined.
pub fn trailing_mean(values: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);
    (0..values.len())
        .map(|i| {
            let start = (i + 1).saturating_sub(window);
            let slice = &values[start..=i];
            slice.iter().sum::<f64>() / slice.len() as f64
        })
        .collect()
}

/// Attach the 3-month trailing mean to every monthly row.
///
/// Rows are ordered by department name (unnamed last) and then by month; each
/// department's series is averaged on its own.
pub fn moving_average(rows: &[MonthlyDepartmentExpense]) -> Vec<MovingAvgDepartmentExpense> {
    let mut sorted: Vec<&MonthlyDepartmentExpense> = rows.iter().collect();
    sorted.sort_by(|a, b| {
        cmp_nulls_last(a.department_name.as_ref(), b.department_name.as_ref())
            .then_with(|| a.month.cmp(&b.month))
    });

    let mut out = Vec::with_capacity(sorted.len());
    let mut start = 0;
    while start < sorted.len() {
        let department = &sorted[start].department_name;
        let end = sorted[start..]
            .iter()
            .position(|r| &r.department_name != department)
            .map_or(sorted.len(), |offset| start + offset);

        let series = &sorted[start..end];
        let totals: Vec<f64> = series.iter().map(|r| r.total_expense).collect();
        let means = trailing_mean(&totals, WINDOW_MONTHS);

        out.extend(
            series
                .iter()
                .zip(means)
                .map(|(row, mean)| MovingAvgDepartmentExpense {
                    month: row.month,
                    department_name: row.department_name.clone(),
                    total_expense: row.total_expense,
                    moving_avg_3m: mean,
                }),
        );
        start = end;
    }
    out
}

// ── Tests ─────────────────────────────────────────────────────────────────────
