use std::path::{Path, PathBuf};

use clap::builder::PossibleValuesParser;
use clap::{Parser, ValueEnum};

use crate::error::{KpiError, Result};
use crate::models::SourceTable;

/// Default number of employees kept per benefit.
pub const DEFAULT_TOP_N: usize = 10;

/// Log file written unless `--no-log-file` is given.
pub const DEFAULT_LOG_FILE: &str = "logs/run.log";

/// Accepted `--log-level` names, matched case-insensitively.
pub const LOG_LEVELS: [&str; 6] = ["DEBUG", "INFO", "WARNING", "WARN", "ERROR", "CRITICAL"];

// ── Settings (CLI) ─────────────────────────────────────────────────────────────

/// Where the four source tables are read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceMode {
    /// Delimited files under `--raw-dir`.
    Local,
    /// Tables queried from the configured warehouse dataset.
    Remote,
    /// Remote when a project id is configured, local otherwise.
    Auto,
}

/// Compute the benefit expense KPIs from transactional exports
#[derive(Parser, Debug, Clone)]
#[command(
    name = "benefit-kpis",
    about = "Compute monthly, moving-average and top-employee benefit KPIs",
    version
)]
pub struct Settings {
    /// Where source tables are read from
    #[arg(long, value_enum, default_value = "auto", env = "KPI_SOURCE")]
    pub source: SourceMode,

    /// Directory holding the raw delimited source files
    #[arg(long, default_value = "data/raw", env = "KPI_RAW_DIR")]
    pub raw_dir: PathBuf,

    /// Directory that receives the KPI CSV files
    #[arg(long, default_value = "data/processed", env = "KPI_OUTPUT_DIR")]
    pub output_dir: PathBuf,

    /// Compute the KPIs without writing any output
    #[arg(long)]
    pub no_output: bool,

    /// Field delimiter of the raw source files
    #[arg(long, default_value = ";", env = "KPI_DELIMITER")]
    pub delimiter: String,

    /// Employees kept per benefit in the ranking
    #[arg(long, default_value_t = DEFAULT_TOP_N, env = "KPI_TOP_N")]
    pub top_n: usize,

    /// Warehouse project id
    #[arg(long, default_value = "", env = "PROJECT_ID")]
    pub project_id: String,

    /// Warehouse dataset holding the source tables
    #[arg(long, default_value = "", env = "DATASET")]
    pub dataset: String,

    /// Warehouse processing location
    #[arg(long, default_value = "US", env = "BQ_LOCATION")]
    pub location: String,

    /// OAuth bearer token for the warehouse API
    #[arg(long, env = "BQ_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    /// Transactions file (local) or table (remote)
    #[arg(long)]
    pub transactions_table: Option<String>,

    /// Employees file (local) or table (remote)
    #[arg(long)]
    pub employees_table: Option<String>,

    /// Departments file (local) or table (remote)
    #[arg(long)]
    pub departments_table: Option<String>,

    /// Benefits file (local) or table (remote)
    #[arg(long)]
    pub benefits_table: Option<String>,

    /// Logging level
    #[arg(
        long,
        default_value = "INFO",
        env = "KPI_LOG_LEVEL",
        ignore_case = true,
        value_parser = PossibleValuesParser::new(LOG_LEVELS)
    )]
    pub log_level: String,

    /// Log file path
    #[arg(long, default_value = DEFAULT_LOG_FILE, env = "KPI_LOG_FILE")]
    pub log_file: PathBuf,

    /// Log to stderr only
    #[arg(long)]
    pub no_log_file: bool,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

// ── Resolved configuration ─────────────────────────────────────────────────────

/// Names of the four source tables, as file names or warehouse table ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    pub transactions: String,
    pub employees: String,
    pub departments: String,
    pub benefits: String,
}

impl TableNames {
    /// File names of the raw exports.
    pub fn local_defaults() -> Self {
        Self {
            transactions: "transacoes_beneficios.csv".to_string(),
            employees: "colaboradores.csv".to_string(),
            departments: "departamentos.csv".to_string(),
            benefits: "beneficios.csv".to_string(),
        }
    }

    /// Table ids in the warehouse dataset.
    pub fn remote_defaults() -> Self {
        Self {
            transactions: "transactions".to_string(),
            employees: "employees".to_string(),
            departments: "departments".to_string(),
            benefits: "benefits".to_string(),
        }
    }

    pub fn get(&self, table: SourceTable) -> &str {
        match table {
            SourceTable::Transactions => &self.transactions,
            SourceTable::Employees => &self.employees,
            SourceTable::Departments => &self.departments,
            SourceTable::Benefits => &self.benefits,
        }
    }
}

/// Connection details for the remote warehouse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    pub project_id: String,
    pub dataset: String,
    pub location: String,
    pub access_token: Option<String>,
}

/// Resolved source selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceConfig {
    Local { raw_dir: PathBuf, delimiter: u8 },
    Remote(RemoteConfig),
}

/// Everything a pipeline run needs, resolved once at start-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub source: SourceConfig,
    pub tables: TableNames,
    /// `None` disables output.
    pub output_dir: Option<PathBuf>,
    pub top_n: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig::Local {
                raw_dir: PathBuf::from("data/raw"),
                delimiter: b';',
            },
            tables: TableNames::local_defaults(),
            output_dir: Some(PathBuf::from("data/processed")),
            top_n: DEFAULT_TOP_N,
        }
    }
}

// ── Settings impl ──────────────────────────────────────────────────────────────

impl Settings {
    /// Effective log level after applying `--debug`.
    pub fn effective_log_level(&self) -> &str {
        if self.debug {
            "DEBUG"
        } else {
            &self.log_level
        }
    }

    /// Log file to write, if file logging is enabled.
    pub fn effective_log_file(&self) -> Option<&Path> {
        (!self.no_log_file).then_some(self.log_file.as_path())
    }

    /// Resolve `--source auto` against the configured project id.
    pub fn resolved_source_mode(&self) -> SourceMode {
        match self.source {
            SourceMode::Auto if self.project_id.trim().is_empty() => SourceMode::Local,
            SourceMode::Auto => SourceMode::Remote,
            explicit => explicit,
        }
    }

    /// Validate the settings and convert them into a [`PipelineConfig`].
    pub fn pipeline_config(&self) -> Result<PipelineConfig> {
        if self.top_n == 0 {
            return Err(KpiError::Config("--top-n must be at least 1".to_string()));
        }

        let mode = self.resolved_source_mode();
        let (source, defaults) = match mode {
            SourceMode::Remote => {
                let project_id = self.project_id.trim().to_string();
                let dataset = self.dataset.trim().to_string();
                if project_id.is_empty() || dataset.is_empty() {
                    return Err(KpiError::Config(
                        "remote source requires PROJECT_ID and DATASET".to_string(),
                    ));
                }
                let remote = RemoteConfig {
                    project_id,
                    dataset,
                    location: self.location.trim().to_string(),
                    access_token: self.access_token.clone(),
                };
                (SourceConfig::Remote(remote), TableNames::remote_defaults())
            }
            _ => {
                let delimiter = parse_delimiter(&self.delimiter)?;
                let local = SourceConfig::Local {
                    raw_dir: self.raw_dir.clone(),
                    delimiter,
                };
                (local, TableNames::local_defaults())
            }
        };

        let pick = |custom: &Option<String>, default: String| {
            custom
                .as_ref()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or(default)
        };
        let tables = TableNames {
            transactions: pick(&self.transactions_table, defaults.transactions),
            employees: pick(&self.employees_table, defaults.employees),
            departments: pick(&self.departments_table, defaults.departments),
            benefits: pick(&self.benefits_table, defaults.benefits),
        };

        Ok(PipelineConfig {
            source,
            tables,
            output_dir: (!self.no_output).then(|| self.output_dir.clone()),
            top_n: self.top_n,
        })
    }
}

/// Accept a single-byte delimiter; `\t` and `tab` select a tab.
fn parse_delimiter(raw: &str) -> Result<u8> {
    match raw {
        "\\t" | "tab" => return Ok(b'\t'),
        _ => {}
    }
    match raw.as_bytes() {
        [b] => Ok(*b),
        _ => Err(KpiError::Config(format!(
            "delimiter must be a single byte, got {:?}",
            raw
        ))),
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Settings {
        let mut full = vec!["benefit-kpis"];
        full.extend_from_slice(args);
        Settings::parse_from(full)
    }

    // ── defaults ──────────────────────────────────────────────────────────────

    #[test]
    fn test_settings_default_values() {
        let settings = parse(&["--source", "local", "--project-id", ""]);
        assert_eq!(settings.raw_dir, PathBuf::from("data/raw"));
        assert_eq!(settings.top_n, 10);
        assert!(!settings.no_output);
        assert!(!settings.debug);
    }

    #[test]
    fn test_default_pipeline_config_is_local() {
        let config = PipelineConfig::default();
        assert_eq!(config.top_n, DEFAULT_TOP_N);
        assert_eq!(config.tables, TableNames::local_defaults());
        assert!(matches!(config.source, SourceConfig::Local { delimiter: b';', .. }));
    }

    // ── source selection ──────────────────────────────────────────────────────

    #[test]
    fn test_auto_without_project_is_local() {
        let settings = parse(&["--source", "auto", "--project-id", "  "]);
        assert_eq!(settings.resolved_source_mode(), SourceMode::Local);
    }

    #[test]
    fn test_auto_with_project_is_remote() {
        let settings = parse(&["--source", "auto", "--project-id", "acme"]);
        assert_eq!(settings.resolved_source_mode(), SourceMode::Remote);
    }

    #[test]
    fn test_explicit_local_wins_over_project() {
        let settings = parse(&["--source", "local", "--project-id", "acme"]);
        assert_eq!(settings.resolved_source_mode(), SourceMode::Local);
    }

    // ── pipeline_config ───────────────────────────────────────────────────────

    #[test]
    fn test_pipeline_config_local() {
        let settings = parse(&[
            "--source",
            "local",
            "--raw-dir",
            "/in",
            "--delimiter",
            ",",
            "--benefits-table",
            "benefits.csv",
        ]);
        let config = settings.pipeline_config().unwrap();
        assert_eq!(
            config.source,
            SourceConfig::Local {
                raw_dir: PathBuf::from("/in"),
                delimiter: b','
            }
        );
        assert_eq!(config.tables.benefits, "benefits.csv");
        assert_eq!(config.tables.transactions, "transacoes_beneficios.csv");
        assert_eq!(config.output_dir, Some(PathBuf::from("data/processed")));
    }

    #[test]
    fn test_pipeline_config_remote() {
        let settings = parse(&[
            "--source",
            "remote",
            "--project-id",
            "acme",
            "--dataset",
            "hr",
            "--location",
            "southamerica-east1",
        ]);
        let config = settings.pipeline_config().unwrap();
        match config.source {
            SourceConfig::Remote(remote) => {
                assert_eq!(remote.project_id, "acme");
                assert_eq!(remote.dataset, "hr");
                assert_eq!(remote.location, "southamerica-east1");
            }
            other => panic!("expected remote source, got {:?}", other),
        }
        assert_eq!(config.tables, TableNames::remote_defaults());
    }

    #[test]
    fn test_pipeline_config_remote_requires_dataset() {
        let settings = parse(&["--source", "remote", "--project-id", "acme", "--dataset", ""]);
        assert!(matches!(
            settings.pipeline_config(),
            Err(KpiError::Config(_))
        ));
    }

    #[test]
    fn test_pipeline_config_rejects_zero_top_n() {
        let settings = parse(&["--source", "local", "--top-n", "0"]);
        assert!(matches!(
            settings.pipeline_config(),
            Err(KpiError::Config(_))
        ));
    }

    #[test]
    fn test_no_output_disables_sink_dir() {
        let settings = parse(&["--source", "local", "--no-output"]);
        assert_eq!(settings.pipeline_config().unwrap().output_dir, None);
    }

    #[test]
    fn test_debug_overrides_log_level() {
        let settings = parse(&["--source", "local", "--debug"]);
        assert_eq!(settings.effective_log_level(), "DEBUG");
    }

    #[test]
    fn test_log_level_accepts_any_case_and_aliases() {
        for level in ["info", "Warning", "WARN", "critical", "DEBUG"] {
            let settings = parse(&["--source", "local", "--log-level", level]);
            assert_eq!(settings.effective_log_level(), level);
        }
        assert!(Settings::try_parse_from(["benefit-kpis", "--log-level", "verbose"]).is_err());
    }

    #[test]
    fn test_log_file_defaults_on_and_can_be_disabled() {
        let settings = parse(&["--source", "local"]);
        if std::env::var_os("KPI_LOG_FILE").is_none() {
            assert_eq!(settings.effective_log_file(), Some(Path::new(DEFAULT_LOG_FILE)));
        }

        let settings = parse(&["--source", "local", "--log-file", "/tmp/kpis.log"]);
        assert_eq!(settings.effective_log_file(), Some(Path::new("/tmp/kpis.log")));

        let settings = parse(&["--source", "local", "--no-log-file"]);
        assert_eq!(settings.effective_log_file(), None);
    }

    // ── parse_delimiter ───────────────────────────────────────────────────────

    #[test]
    fn test_parse_delimiter() {
        assert_eq!(parse_delimiter(";").unwrap(), b';');
        assert_eq!(parse_delimiter("tab").unwrap(), b'\t');
        assert!(parse_delimiter(";;").is_err());
        assert!(parse_delimiter("").is_err());
    }
}
