//! Remote warehouse source.
//!
//! Source tables are fetched by running a [`QueryTemplate`] whose
//! placeholders only accept validated [`Identifier`]s, so no caller-supplied
//! text is ever spliced into the query unchecked. Execution goes through the
//! [`QueryExecutor`] seam; [`BigQueryClient`] implements it against the
//! BigQuery REST API.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use kpi_core::error::{KpiError, Result};
use kpi_core::models::SourceTable;
use kpi_core::settings::{RemoteConfig, TableNames};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::source::RawTable;

/// Query used to fetch one source table.
pub const SOURCE_TABLE_QUERY: &str = "SELECT * FROM `{project}.{dataset}.{table}`";

const BIGQUERY_BASE_URL: &str = "https://bigquery.googleapis.com/bigquery/v2";

/// Server-side wait per request while a job is still running.
const QUERY_TIMEOUT_MS: u64 = 10_000;

/// Upper bound on follow-up `getQueryResults` calls for one query.
const MAX_RESULT_REQUESTS: u32 = 1_000;

// ── Identifier ────────────────────────────────────────────────────────────────

/// A project, dataset or table name that is safe to place in query text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier(String);

impl Identifier {
    pub fn new(raw: &str) -> Result<Self> {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let pattern = PATTERN.get_or_init(|| {
            Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]{0,1023}$").expect("identifier pattern is valid")
        });

        if pattern.is_match(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(KpiError::Query(format!("invalid identifier {:?}", raw)))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── QueryTemplate ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Placeholder(String),
}

/// Query text with named `{placeholder}` slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTemplate {
    segments: Vec<Segment>,
}

/// Rendered query text ready for execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundQuery {
    pub sql: String,
}

impl QueryTemplate {
    /// Parse `text`, rejecting unbalanced braces and malformed slot names.
    pub fn parse(text: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut rest = text;

        while let Some(open) = rest.find(['{', '}']) {
            if rest.as_bytes()[open] == b'}' {
                return Err(KpiError::Query(format!(
                    "unmatched '}}' in query template at byte {}",
                    text.len() - rest.len() + open
                )));
            }
            if open > 0 {
                segments.push(Segment::Text(rest[..open].to_string()));
            }
            let after = &rest[open + 1..];
            let close = after.find('}').ok_or_else(|| {
                KpiError::Query("unterminated placeholder in query template".to_string())
            })?;
            let name = &after[..close];
            if name.is_empty() || !name.chars().all(|c| c.is_ascii_lowercase() || c == '_') {
                return Err(KpiError::Query(format!(
                    "invalid placeholder name {:?}",
                    name
                )));
            }
            segments.push(Segment::Placeholder(name.to_string()));
            rest = &after[close + 1..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Text(rest.to_string()));
        }

        Ok(Self { segments })
    }

    /// Names of all slots, sorted and de-duplicated.
    pub fn placeholders(&self) -> BTreeSet<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Placeholder(name) => Some(name.as_str()),
                Segment::Text(_) => None,
            })
            .collect()
    }

    /// Fill every slot. Missing and unexpected parameters are both errors.
    pub fn bind(&self, params: &[(&str, &Identifier)]) -> Result<BoundQuery> {
        let wanted = self.placeholders();
        for (name, _) in params {
            if !wanted.contains(name) {
                return Err(KpiError::Query(format!(
                    "parameter {:?} does not appear in the query template",
                    name
                )));
            }
        }

        let mut sql = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => sql.push_str(text),
                Segment::Placeholder(name) => {
                    let value = params
                        .iter()
                        .find(|(n, _)| *n == name.as_str())
                        .map(|(_, v)| *v)
                        .ok_or_else(|| {
                            KpiError::Query(format!("no value bound for placeholder {:?}", name))
                        })?;
                    sql.push_str(value.as_str());
                }
            }
        }

        Ok(BoundQuery { sql })
    }
}

// ── QueryExecutor ─────────────────────────────────────────────────────────────

/// Failure reported by a [`QueryExecutor`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryFailure {
    /// The queried table (or dataset) does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The warehouse refused the query (syntax, permissions, quota).
    #[error("rejected: {0}")]
    Rejected(String),
    /// The warehouse could not be reached or answered unintelligibly.
    #[error("transport: {0}")]
    Transport(String),
}

/// Executes a bound query and returns its result as a raw table.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, query: &BoundQuery) -> std::result::Result<RawTable, QueryFailure>;
}

// ── RemoteProvider ────────────────────────────────────────────────────────────

/// Reads each source table with `SELECT *` from one warehouse dataset.
pub struct RemoteProvider {
    executor: Box<dyn QueryExecutor>,
    template: QueryTemplate,
    project: Identifier,
    dataset: Identifier,
    tables: TableNames,
}

impl RemoteProvider {
    pub fn new(
        executor: Box<dyn QueryExecutor>,
        project_id: &str,
        dataset: &str,
        tables: TableNames,
    ) -> Result<Self> {
        let provider = Self {
            executor,
            template: QueryTemplate::parse(SOURCE_TABLE_QUERY)?,
            project: Identifier::new(project_id)?,
            dataset: Identifier::new(dataset)?,
            tables,
        };
        // Validate every table name up front rather than at first load.
        for table in SourceTable::ALL {
            provider.query_for(table)?;
        }
        Ok(provider)
    }

    /// `project.dataset`, for logs.
    pub fn dataset_path(&self) -> String {
        format!("{}.{}", self.project, self.dataset)
    }

    /// Build the query that fetches `table`.
    pub fn query_for(&self, table: SourceTable) -> Result<BoundQuery> {
        let table_id = Identifier::new(self.tables.get(table))?;
        self.template.bind(&[
            ("project", &self.project),
            ("dataset", &self.dataset),
            ("table", &table_id),
        ])
    }

    pub async fn load(&self, table: SourceTable) -> Result<RawTable> {
        let query = self.query_for(table)?;
        debug!("Running remote query for {}: {}", table, query.sql);

        let raw = self.executor.execute(&query).await.map_err(|e| match e {
            QueryFailure::NotFound(_) => KpiError::MissingSource {
                table,
                location: format!("{}.{}", self.dataset_path(), self.tables.get(table)),
            },
            QueryFailure::Rejected(msg) => KpiError::Query(format!("{}: {}", table, msg)),
            QueryFailure::Transport(msg) => KpiError::Http(format!("{}: {}", table, msg)),
        })?;

        info!("Remote query for {} returned {} rows", table, raw.len());
        Ok(raw)
    }
}

// ── BigQueryClient ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: bool,
    job_reference: Option<JobReference>,
    schema: Option<TableSchema>,
    #[serde(default)]
    rows: Vec<TableRow>,
    page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TableSchema {
    #[serde(default)]
    fields: Vec<FieldSchema>,
}

#[derive(Debug, Deserialize)]
struct FieldSchema {
    name: String,
    #[serde(rename = "type", default)]
    field_type: String,
}

#[derive(Debug, Deserialize)]
struct TableRow {
    #[serde(default)]
    f: Vec<TableCell>,
}

#[derive(Debug, Deserialize)]
struct TableCell {
    #[serde(default)]
    v: Value,
}

/// [`QueryExecutor`] backed by the BigQuery `jobs.query` REST endpoint.
pub struct BigQueryClient {
    http: reqwest::Client,
    base_url: String,
    project_id: String,
    location: String,
    access_token: String,
}

impl BigQueryClient {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let access_token = config
            .access_token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                KpiError::Config("remote source requires BQ_ACCESS_TOKEN".to_string())
            })?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(QUERY_TIMEOUT_MS) + Duration::from_secs(30))
            .build()
            .map_err(|e| KpiError::Http(e.to_string()))?;

        Ok(Self {
            http,
            base_url: BIGQUERY_BASE_URL.to_string(),
            project_id: config.project_id.clone(),
            location: config.location.clone(),
            access_token,
        })
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
    ) -> std::result::Result<QueryResponse, QueryFailure> {
        let response = request
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| QueryFailure::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = error_message(&body).unwrap_or_else(|| status.to_string());
            return Err(if status == reqwest::StatusCode::NOT_FOUND {
                QueryFailure::NotFound(message)
            } else if status.is_client_error() {
                QueryFailure::Rejected(message)
            } else {
                QueryFailure::Transport(message)
            });
        }

        response
            .json::<QueryResponse>()
            .await
            .map_err(|e| QueryFailure::Transport(format!("invalid response body: {}", e)))
    }
}

#[async_trait]
impl ResultPages for BigQueryClient {
    async fn start(&self, query: &BoundQuery) -> std::result::Result<QueryResponse, QueryFailure> {
        let url = format!("{}/projects/{}/queries", self.base_url, self.project_id);
        let body = serde_json::json!({
            "query": query.sql,
            "useLegacySql": false,
            "location": self.location,
            "timeoutMs": QUERY_TIMEOUT_MS,
        });
        self.send(self.http.post(&url).json(&body)).await
    }

    async fn fetch(
        &self,
        job: &JobReference,
        page_token: Option<&str>,
    ) -> std::result::Result<QueryResponse, QueryFailure> {
        let url = format!(
            "{}/projects/{}/queries/{}",
            self.base_url, self.project_id, job.job_id
        );
        let location = job.location.clone().unwrap_or_else(|| self.location.clone());
        let mut params = vec![
            ("location", location),
            ("timeoutMs", QUERY_TIMEOUT_MS.to_string()),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken", token.to_string()));
        }
        self.send(self.http.get(&url).query(&params)).await
    }
}

#[async_trait]
impl QueryExecutor for BigQueryClient {
    async fn execute(&self, query: &BoundQuery) -> std::result::Result<RawTable, QueryFailure> {
        collect_results(self, query, MAX_RESULT_REQUESTS).await
    }
}

// ── Result paging ─────────────────────────────────────────────────────────────

/// The two calls of the jobs API a query needs: start it, then read results.
#[async_trait]
trait ResultPages: Send + Sync {
    async fn start(&self, query: &BoundQuery) -> std::result::Result<QueryResponse, QueryFailure>;

    async fn fetch(
        &self,
        job: &JobReference,
        page_token: Option<&str>,
    ) -> std::result::Result<QueryResponse, QueryFailure>;
}

/// Run `query` to completion and gather every result page.
///
/// Incomplete responses are polled until the job completes; complete ones
/// are followed through `pageToken`. The schema comes from the first
/// complete response. More than `max_requests` follow-up calls is a failure.
async fn collect_results(
    pages: &dyn ResultPages,
    query: &BoundQuery,
    max_requests: u32,
) -> std::result::Result<RawTable, QueryFailure> {
    let mut response = pages.start(query).await?;
    let mut schema: Option<Vec<FieldSchema>> = None;
    let mut rows: Vec<TableRow> = Vec::new();
    let mut requests = 0u32;

    loop {
        if response.job_complete {
            if schema.is_none() {
                schema = response.schema.take().map(|s| s.fields);
            }
            rows.append(&mut response.rows);
            if response.page_token.is_none() {
                break;
            }
        }

        requests += 1;
        if requests > max_requests {
            return Err(QueryFailure::Transport(
                "query results did not complete".to_string(),
            ));
        }

        let job = response.job_reference.as_ref().ok_or_else(|| {
            QueryFailure::Transport("response is missing its job reference".to_string())
        })?;
        let token = if response.job_complete {
            response.page_token.as_deref()
        } else {
            None
        };
        let next = pages.fetch(job, token).await?;
        debug!(
            "Fetched result page for job {} ({} rows, complete={})",
            job.job_id,
            next.rows.len(),
            next.job_complete
        );
        // Keep the job reference when a page response omits it.
        let job_reference = next.job_reference.or(response.job_reference);
        response = QueryResponse {
            job_reference,
            ..next
        };
    }

    let fields = schema.unwrap_or_default();
    Ok(rows_to_table(&fields, &rows))
}

/// Convert BigQuery rows into a [`RawTable`].
///
/// Nulls become empty cells. `TIMESTAMP` cells arrive as epoch seconds and
/// are rewritten as RFC 3339 so that month truncation can read them.
fn rows_to_table(fields: &[FieldSchema], rows: &[TableRow]) -> RawTable {
    let headers = fields.iter().map(|f| f.name.as_str());
    let records = rows.iter().map(|row| {
        fields
            .iter()
            .enumerate()
            .map(|(i, field)| {
                let value = row.f.get(i).map(|c| &c.v).unwrap_or(&Value::Null);
                cell_text(value, &field.field_type)
            })
            .collect::<Vec<String>>()
    });
    RawTable::from_rows(headers, records)
}

fn cell_text(value: &Value, field_type: &str) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) if field_type.eq_ignore_ascii_case("TIMESTAMP") => s
            .parse::<f64>()
            .ok()
            .and_then(|secs| DateTime::from_timestamp_millis((secs * 1000.0).round() as i64))
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| s.clone()),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Pull `error.message` out of a BigQuery error body.
fn error_message(body: &str) -> Option<String> {
    let parsed: Value = serde_json::from_str(body).ok()?;
    parsed
        .get("error")?
        .get("message")?
        .as_str()
        .map(|s| s.to_string())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Records every query and answers with a fixed result.
    struct FakeExecutor {
        seen: Mutex<Vec<String>>,
        answer: std::result::Result<RawTable, QueryFailure>,
    }

    impl FakeExecutor {
        fn answering(answer: std::result::Result<RawTable, QueryFailure>) -> Self {
            Self {
                seen: Mutex::new(Vec::new()),
                answer,
            }
        }
    }

    #[async_trait]
    impl QueryExecutor for FakeExecutor {
        async fn execute(
            &self,
            query: &BoundQuery,
        ) -> std::result::Result<RawTable, QueryFailure> {
            self.seen.lock().unwrap().push(query.sql.clone());
            self.answer.clone()
        }
    }

    fn provider(answer: std::result::Result<RawTable, QueryFailure>) -> RemoteProvider {
        RemoteProvider::new(
            Box::new(FakeExecutor::answering(answer)),
            "acme-analytics",
            "hr_benefits",
            TableNames::remote_defaults(),
        )
        .unwrap()
    }

    // ── Identifier ────────────────────────────────────────────────────────────

    #[test]
    fn test_identifier_accepts_warehouse_names() {
        assert!(Identifier::new("acme-analytics").is_ok());
        assert!(Identifier::new("hr_benefits_2024").is_ok());
        assert!(Identifier::new("_staging").is_ok());
    }

    #[test]
    fn test_identifier_rejects_injection() {
        assert!(Identifier::new("").is_err());
        assert!(Identifier::new("a`; DROP TABLE x; --").is_err());
        assert!(Identifier::new("a.b").is_err());
        assert!(Identifier::new("9lives").is_err());
        assert!(Identifier::new("name with space").is_err());
    }

    // ── QueryTemplate ─────────────────────────────────────────────────────────

    #[test]
    fn test_template_placeholders() {
        let template = QueryTemplate::parse(SOURCE_TABLE_QUERY).unwrap();
        let names: Vec<&str> = template.placeholders().into_iter().collect();
        assert_eq!(names, vec!["dataset", "project", "table"]);
    }

    #[test]
    fn test_template_bind_renders() {
        let template = QueryTemplate::parse("SELECT * FROM `{project}.{table}` -- {table}").unwrap();
        let project = Identifier::new("p").unwrap();
        let table = Identifier::new("t").unwrap();
        let bound = template
            .bind(&[("project", &project), ("table", &table)])
            .unwrap();
        assert_eq!(bound.sql, "SELECT * FROM `p.t` -- t");
    }

    #[test]
    fn test_template_bind_missing_parameter() {
        let template = QueryTemplate::parse("SELECT {a}, {b}").unwrap();
        let a = Identifier::new("x").unwrap();
        assert!(template.bind(&[("a", &a)]).is_err());
    }

    #[test]
    fn test_template_bind_unknown_parameter() {
        let template = QueryTemplate::parse("SELECT {a}").unwrap();
        let a = Identifier::new("x").unwrap();
        assert!(template.bind(&[("a", &a), ("zzz", &a)]).is_err());
    }

    #[test]
    fn test_template_parse_errors() {
        assert!(QueryTemplate::parse("SELECT {a").is_err());
        assert!(QueryTemplate::parse("SELECT a}").is_err());
        assert!(QueryTemplate::parse("SELECT {}").is_err());
        assert!(QueryTemplate::parse("SELECT {Bad-Name}").is_err());
    }

    // ── RemoteProvider ────────────────────────────────────────────────────────

    #[test]
    fn test_remote_provider_rejects_bad_dataset() {
        let result = RemoteProvider::new(
            Box::new(FakeExecutor::answering(Ok(RawTable::default()))),
            "acme",
            "hr.benefits",
            TableNames::remote_defaults(),
        );
        assert!(matches!(result, Err(KpiError::Query(_))));
    }

    #[test]
    fn test_remote_provider_rejects_bad_table_name() {
        let mut tables = TableNames::remote_defaults();
        tables.benefits = "benefits.csv".to_string();
        let result = RemoteProvider::new(
            Box::new(FakeExecutor::answering(Ok(RawTable::default()))),
            "acme",
            "hr",
            tables,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_query_for_table() {
        let p = provider(Ok(RawTable::default()));
        let query = p.query_for(SourceTable::Employees).unwrap();
        assert_eq!(
            query.sql,
            "SELECT * FROM `acme-analytics.hr_benefits.employees`"
        );
        assert_eq!(p.dataset_path(), "acme-analytics.hr_benefits");
    }

    #[tokio::test]
    async fn test_remote_load_returns_executor_rows() {
        let raw = RawTable::from_rows(["benefit_id", "benefit_name"], vec![vec!["1", "Meal"]]);
        let p = provider(Ok(raw.clone()));
        let loaded = p.load(SourceTable::Benefits).await.unwrap();
        assert_eq!(loaded, raw);
    }

    #[tokio::test]
    async fn test_remote_not_found_is_missing_source() {
        let p = provider(Err(QueryFailure::NotFound("Table not found".to_string())));
        match p.load(SourceTable::Departments).await {
            Err(KpiError::MissingSource { table, location }) => {
                assert_eq!(table, SourceTable::Departments);
                assert_eq!(location, "acme-analytics.hr_benefits.departments");
            }
            other => panic!("expected MissingSource, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_remote_failures_map_to_query_and_http() {
        let p = provider(Err(QueryFailure::Rejected("Access Denied".to_string())));
        assert!(matches!(
            p.load(SourceTable::Benefits).await,
            Err(KpiError::Query(_))
        ));

        let p = provider(Err(QueryFailure::Transport("timeout".to_string())));
        assert!(matches!(
            p.load(SourceTable::Benefits).await,
            Err(KpiError::Http(_))
        ));
    }

    // ── BigQuery response decoding ────────────────────────────────────────────

    #[test]
    fn test_rows_to_table_decodes_cells() {
        let body = serde_json::json!({
            "jobComplete": true,
            "schema": { "fields": [
                { "name": "employee_id", "type": "STRING" },
                { "name": "amount", "type": "FLOAT" },
                { "name": "date", "type": "TIMESTAMP" }
            ]},
            "rows": [
                { "f": [ { "v": "1" }, { "v": "50.5" }, { "v": "1705276800" } ] },
                { "f": [ { "v": "2" }, { "v": null }, { "v": null } ] }
            ]
        });
        let response: QueryResponse = serde_json::from_value(body).unwrap();
        let fields = response.schema.unwrap().fields;
        let table = rows_to_table(&fields, &response.rows);

        assert_eq!(table.headers, csv::StringRecord::from(vec!["employee_id", "amount", "date"]));
        assert_eq!(&table.records[0][1], "50.5");
        assert!(table.records[0][2].starts_with("2024-01-15T00:00:00"));
        assert_eq!(&table.records[1][1], "");
        assert_eq!(&table.records[1][2], "");
    }

    // ── Result paging ─────────────────────────────────────────────────────────

    /// Replays canned responses and records every follow-up call.
    struct ScriptedPages {
        first: Mutex<Option<serde_json::Value>>,
        pages: Mutex<VecDeque<serde_json::Value>>,
        /// When the script runs out, keep answering with this.
        repeat: Option<serde_json::Value>,
        calls: Mutex<Vec<(String, Option<String>)>>,
    }

    impl ScriptedPages {
        fn new(first: serde_json::Value, pages: Vec<serde_json::Value>) -> Self {
            Self {
                first: Mutex::new(Some(first)),
                pages: Mutex::new(pages.into()),
                repeat: None,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<(String, Option<String>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    fn decode(value: serde_json::Value) -> std::result::Result<QueryResponse, QueryFailure> {
        serde_json::from_value(value).map_err(|e| QueryFailure::Transport(e.to_string()))
    }

    #[async_trait]
    impl ResultPages for ScriptedPages {
        async fn start(
            &self,
            _query: &BoundQuery,
        ) -> std::result::Result<QueryResponse, QueryFailure> {
            let first = self.first.lock().unwrap().take();
            decode(first.unwrap())
        }

        async fn fetch(
            &self,
            job: &JobReference,
            page_token: Option<&str>,
        ) -> std::result::Result<QueryResponse, QueryFailure> {
            self.calls
                .lock()
                .unwrap()
                .push((job.job_id.clone(), page_token.map(str::to_string)));
            let next = self.pages.lock().unwrap().pop_front();
            decode(next.or_else(|| self.repeat.clone()).unwrap())
        }
    }

    fn query() -> BoundQuery {
        BoundQuery {
            sql: "SELECT * FROM `acme.hr.benefits`".to_string(),
        }
    }

    fn benefit_schema() -> serde_json::Value {
        serde_json::json!({ "fields": [
            { "name": "benefit_id", "type": "STRING" },
            { "name": "benefit_name", "type": "STRING" }
        ]})
    }

    fn row(id: &str, name: &str) -> serde_json::Value {
        serde_json::json!({ "f": [ { "v": id }, { "v": name } ] })
    }

    #[tokio::test]
    async fn test_collect_polls_incomplete_job() {
        let pages = ScriptedPages::new(
            serde_json::json!({
                "jobComplete": false,
                "jobReference": { "jobId": "job-1", "location": "EU" }
            }),
            vec![
                serde_json::json!({ "jobComplete": false }),
                serde_json::json!({
                    "jobComplete": true,
                    "schema": benefit_schema(),
                    "rows": [ row("1", "Meal") ]
                }),
            ],
        );

        let table = collect_results(&pages, &query(), 10).await.unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(&table.records[0][1], "Meal");
        // Polling sends no page token, and the job id survives a response
        // that omits it.
        assert_eq!(
            pages.calls(),
            vec![("job-1".to_string(), None), ("job-1".to_string(), None)]
        );
    }

    #[tokio::test]
    async fn test_collect_follows_page_tokens() {
        let pages = ScriptedPages::new(
            serde_json::json!({
                "jobComplete": true,
                "jobReference": { "jobId": "job-2" },
                "schema": benefit_schema(),
                "rows": [ row("1", "Meal") ],
                "pageToken": "p2"
            }),
            vec![
                serde_json::json!({
                    "jobComplete": true,
                    "rows": [ row("2", "Health") ],
                    "pageToken": "p3"
                }),
                serde_json::json!({
                    "jobComplete": true,
                    "schema": { "fields": [ { "name": "ignored", "type": "STRING" } ] },
                    "rows": [ row("3", "Gym") ]
                }),
            ],
        );

        let table = collect_results(&pages, &query(), 10).await.unwrap();
        assert_eq!(
            table.headers,
            csv::StringRecord::from(vec!["benefit_id", "benefit_name"])
        );
        let names: Vec<&str> = table.records.iter().map(|r| &r[1]).collect();
        assert_eq!(names, vec!["Meal", "Health", "Gym"]);
        assert_eq!(
            pages.calls(),
            vec![
                ("job-2".to_string(), Some("p2".to_string())),
                ("job-2".to_string(), Some("p3".to_string())),
            ]
        );
    }

    #[tokio::test]
    async fn test_collect_gives_up_after_request_cap() {
        let mut pages = ScriptedPages::new(
            serde_json::json!({
                "jobComplete": false,
                "jobReference": { "jobId": "job-3" }
            }),
            Vec::new(),
        );
        pages.repeat = Some(serde_json::json!({ "jobComplete": false }));

        let result = collect_results(&pages, &query(), 3).await;
        assert!(matches!(result, Err(QueryFailure::Transport(_))));
        assert_eq!(pages.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_collect_incomplete_without_job_reference() {
        let pages = ScriptedPages::new(serde_json::json!({ "jobComplete": false }), Vec::new());
        let result = collect_results(&pages, &query(), 10).await;
        assert!(matches!(result, Err(QueryFailure::Transport(_))));
        assert!(pages.calls().is_empty());
    }

    #[test]
    fn test_error_message_extraction() {
        let body = r#"{"error": {"code": 404, "message": "Not found: Table acme:hr.x"}}"#;
        assert_eq!(
            error_message(body).as_deref(),
            Some("Not found: Table acme:hr.x")
        );
        assert_eq!(error_message("<html>"), None);
    }

    #[test]
    fn test_client_requires_token() {
        let config = RemoteConfig {
            project_id: "acme".to_string(),
            dataset: "hr".to_string(),
            location: "US".to_string(),
            access_token: None,
        };
        assert!(matches!(
            BigQueryClient::new(&config),
            Err(KpiError::Config(_))
        ));
    }
}
