mod bootstrap;

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use kpi_core::settings::Settings;
use kpi_data::sink;
use kpi_data::source::SourceProvider;
use kpi_runtime::orchestrator::KpiPipeline;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // A missing .env file is not an error; the environment may already be set.
    dotenv::dotenv().ok();
    let settings = Settings::parse();

    let _log_guard =
        bootstrap::setup_logging(settings.effective_log_level(), settings.effective_log_file())?;

    tracing::info!("Benefit KPIs v{} starting", env!("CARGO_PKG_VERSION"));

    let config = settings
        .pipeline_config()
        .context("invalid configuration")?;
    bootstrap::ensure_output_dir(config.output_dir.as_deref())?;

    let provider =
        SourceProvider::from_config(&config).context("failed to set up the source provider")?;
    let sink = sink::from_config(config.output_dir.clone());

    let report = KpiPipeline::new(config, provider, sink).run().await;

    for outcome in &report.outcomes {
        match &outcome.result {
            Ok(summary) => match &summary.location {
                Some(path) => println!("{}: {} rows -> {}", outcome.kind, summary.rows, path.display()),
                None => println!("{}: {} rows", outcome.kind, summary.rows),
            },
            Err(failure) => eprintln!("{}: FAILED ({})", outcome.kind, failure),
        }
    }

    if report.succeeded() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
