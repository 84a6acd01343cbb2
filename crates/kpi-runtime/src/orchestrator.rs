//! KPI pipeline orchestrator.
//!
//! A [`KpiPipeline`] loads the four source tables concurrently, runs the three
//! KPI chains over them and hands every result to its [`OutputSink`]. A failing
//! KPI is logged and reported in the [`RunReport`]; the other KPIs still run.

use std::fmt;
use std::path::PathBuf;

use kpi_core::error::KpiError;
use kpi_core::models::{
    KpiKind, KpiTable, MonthlyDepartmentExpense, MovingAvgDepartmentExpense, TopEmployeeByBenefit,
};
use kpi_core::settings::PipelineConfig;
use kpi_data::aggregator::aggregate_monthly;
use kpi_data::join::{join_benefits, join_departments};
use kpi_data::loader::{SourceTables, TableLoader};
use kpi_data::moving_average::moving_average;
use kpi_data::ranking::rank_top_employees;
use kpi_data::sink::OutputSink;
use kpi_data::source::SourceProvider;
use tracing::{error, info};

// ── Public types ──────────────────────────────────────────────────────────────

/// Pipeline step at which a KPI failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Load,
    Join,
    Persist,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::Load => "load",
            Stage::Join => "join",
            Stage::Persist => "persist",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why a KPI produced no output.
#[derive(Debug, Clone)]
pub struct KpiFailure {
    pub stage: Stage,
    pub error: KpiError,
}

impl KpiFailure {
    pub fn new(stage: Stage, error: KpiError) -> Self {
        Self { stage, error }
    }
}

impl fmt::Display for KpiFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} stage: {}", self.stage, self.error)
    }
}

/// A KPI that was computed and persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct KpiSummary {
    pub rows: usize,
    /// Where the sink put the table; `None` for sinks without a location.
    pub location: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct KpiOutcome {
    pub kind: KpiKind,
    pub result: Result<KpiSummary, KpiFailure>,
}

/// Per-KPI outcome of one pipeline run, in execution order.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub outcomes: Vec<KpiOutcome>,
}

impl RunReport {
    /// `true` when every KPI was persisted.
    pub fn succeeded(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = (KpiKind, &KpiFailure)> + '_ {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|f| (o.kind, f)))
    }

    pub fn outcome(&self, kind: KpiKind) -> Option<&KpiOutcome> {
        self.outcomes.iter().find(|o| o.kind == kind)
    }
}

// ── KPI chains ────────────────────────────────────────────────────────────────

fn loaded<T>(table: &kpi_core::error::Result<Vec<T>>) -> Result<&[T], KpiFailure> {
    table
        .as_ref()
        .map(Vec::as_slice)
        .map_err(|e| KpiFailure::new(Stage::Load, e.clone()))
}

/// transactions ⋈ employees ⋈ departments, summed per month and department.
pub fn compute_monthly(sources: &SourceTables) -> Result<Vec<MonthlyDepartmentExpense>, KpiFailure> {
    let transactions = loaded(&sources.transactions)?;
    let employees = loaded(&sources.employees)?;
    let departments = loaded(&sources.departments)?;

    let joined = join_departments(transactions, employees, departments)
        .map_err(|e| KpiFailure::new(Stage::Join, e))?;
    Ok(aggregate_monthly(&joined))
}

/// Trailing average over an already computed monthly result.
pub fn compute_moving_average(
    monthly: &Result<Vec<MonthlyDepartmentExpense>, KpiFailure>,
) -> Result<Vec<MovingAvgDepartmentExpense>, KpiFailure> {
    match monthly {
        Ok(rows) => Ok(moving_average(rows)),
        Err(upstream) => Err(KpiFailure::new(
            upstream.stage,
            KpiError::Upstream {
                kpi: KpiKind::MonthlyDepartmentExpense,
                message: upstream.error.to_string(),
            },
        )),
    }
}

/// transactions ⋈ employees ⋈ benefits, ranked per benefit.
pub fn compute_top_employees(
    sources: &SourceTables,
    limit: usize,
) -> Result<Vec<TopEmployeeByBenefit>, KpiFailure> {
    let transactions = loaded(&sources.transactions)?;
    let employees = loaded(&sources.employees)?;
    let benefits = loaded(&sources.benefits)?;

    let joined = join_benefits(transactions, employees, benefits)
        .map_err(|e| KpiFailure::new(Stage::Join, e))?;
    Ok(rank_top_employees(&joined, limit))
}

// ── KpiPipeline ───────────────────────────────────────────────────────────────

/// One configured KPI run: where to read, how many to rank, where to write.
pub struct KpiPipeline {
    config: PipelineConfig,
    provider: SourceProvider,
    sink: Box<dyn OutputSink>,
}

impl KpiPipeline {
    pub fn new(config: PipelineConfig, provider: SourceProvider, sink: Box<dyn OutputSink>) -> Self {
        Self {
            config,
            provider,
            sink,
        }
    }

    /// Execute every KPI once and report each outcome.
    ///
    /// Never fails as a whole; inspect [`RunReport::succeeded`].
    pub async fn run(&self) -> RunReport {
        info!(
            "Starting KPI run: source={}, sink={}, top_n={}",
            self.provider.describe(),
            self.sink.describe(),
            self.config.top_n
        );

        let sources = TableLoader::new(&self.provider).load_all().await;
        let mut report = RunReport::default();

        let monthly = compute_monthly(&sources);
        report.outcomes.push(self.finish(
            KpiKind::MonthlyDepartmentExpense,
            monthly.clone().map(KpiTable::MonthlyDepartmentExpense),
        ));

        let averaged = compute_moving_average(&monthly);
        report.outcomes.push(self.finish(
            KpiKind::MovingAvgDepartmentExpense,
            averaged.map(KpiTable::MovingAvgDepartmentExpense),
        ));

        let top = compute_top_employees(&sources, self.config.top_n);
        report.outcomes.push(self.finish(
            KpiKind::TopEmployeeByBenefit,
            top.map(KpiTable::TopEmployeeByBenefit),
        ));

        let failed = report.failures().count();
        info!(
            "KPI run finished: {} succeeded, {} failed",
            report.outcomes.len() - failed,
            failed
        );
        report
    }

    /// Persist a computed table and log the outcome.
    fn finish(&self, kind: KpiKind, computed: Result<KpiTable, KpiFailure>) -> KpiOutcome {
        let result = computed.and_then(|table| {
            let rows = table.len();
            self.sink
                .persist(&table)
                .map(|location| KpiSummary { rows, location })
                .map_err(|e| KpiFailure::new(Stage::Persist, e))
        });

        match &result {
            Ok(summary) => info!("KPI {} ready with {} rows", kind, summary.rows),
            Err(failure) => error!(
                kpi = %kind,
                stage = %failure.stage,
                table = failure.error.table().map(|t| t.name()).unwrap_or("-"),
                error = %failure.error,
                "KPI failed"
            ),
        }
        KpiOutcome { kind, result }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
