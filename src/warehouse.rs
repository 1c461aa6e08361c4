use crate::auth::{CredentialSource, TokenProvider};
use crate::error::LoadError;
use crate::query::Query;
use crate::table::{Cell, Column, FieldType, Table};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const BIGQUERY_API: &str = "https://bigquery.googleapis.com/bigquery/v2";

const QUERY_TIMEOUT_MS: u64 = 10_000;
const PAGE_SIZE: u64 = 10_000;

/// Anything that can run a [`Query`] and hand back a [`Table`].
#[async_trait]
pub trait Warehouse: Send + Sync {
    async fn run_query(&self, query: &Query) -> Result<Table, LoadError>;
}

pub struct BigQueryClient {
    http: reqwest::Client,
    base_url: String,
    billing_project: String,
    tokens: TokenProvider,
}

impl BigQueryClient {
    pub fn new(billing_project: &str, source: CredentialSource) -> Self {
        let http = reqwest::Client::new();
        Self {
            tokens: TokenProvider::new(http.clone(), source),
            http,
            base_url: BIGQUERY_API.to_string(),
            billing_project: billing_project.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<QueryResponse, LoadError> {
        let token = self.tokens.access_token().await?;
        let resp = request.bearer_auth(token).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LoadError::Warehouse {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }
        resp.json::<QueryResponse>()
            .await
            .map_err(|err| LoadError::Decode(err.to_string()))
    }
}

#[async_trait]
impl Warehouse for BigQueryClient {
    async fn run_query(&self, query: &Query) -> Result<Table, LoadError> {
        log::debug!(
            "running query on {} ({}): {}",
            self.billing_project,
            credential_kind(self.tokens.source()),
            query.sql
        );
        let url = format!("{}/projects/{}/queries", self.base_url, self.billing_project);
        let mut page = self
            .send(self.http.post(&url).json(&QueryRequest::new(query)))
            .await?;

        let mut table: Option<Table> = None;
        loop {
            if page.job_complete {
                let decoded = decode_page(&page)?;
                table = Some(match table.take() {
                    Some(mut acc) => {
                        acc.rows.extend(decoded.rows);
                        acc
                    }
                    None => decoded,
                });
                if page.page_token.is_none() {
                    break;
                }
            }

            let job = page
                .job_reference
                .as_ref()
                .ok_or_else(|| LoadError::Decode("incomplete job without jobReference".to_string()))?;
            let mut params: Vec<(&str, String)> = vec![
                ("timeoutMs", QUERY_TIMEOUT_MS.to_string()),
                ("maxResults", PAGE_SIZE.to_string()),
            ];
            if let Some(location) = &job.location {
                params.push(("location", location.clone()));
            }
            if let (true, Some(token)) = (page.job_complete, &page.page_token) {
                params.push(("pageToken", token.clone()));
            }
            let url = format!(
                "{}/projects/{}/queries/{}",
                self.base_url, job.project_id, job.job_id
            );
            page = self.send(self.http.get(&url).query(&params)).await?;
        }

        let table = table.unwrap_or_default();
        log::info!("query returned {} rows", table.len());
        Ok(table)
    }
}

fn credential_kind(source: &CredentialSource) -> &'static str {
    match source {
        CredentialSource::Profile { .. } => "profile",
        CredentialSource::File { .. } => "credential file",
        CredentialSource::ServiceAccount(_) => "service account",
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    query: &'a str,
    use_legacy_sql: bool,
    parameter_mode: &'static str,
    query_parameters: Vec<QueryParameter<'a>>,
    timeout_ms: u64,
    max_results: u64,
}

impl<'a> QueryRequest<'a> {
    fn new(query: &'a Query) -> Self {
        Self {
            query: &query.sql,
            use_legacy_sql: false,
            parameter_mode: "NAMED",
            query_parameters: query
                .params
                .iter()
                .map(|p| QueryParameter {
                    name: p.name,
                    parameter_type: ParameterType { r#type: p.kind.as_str() },
                    parameter_value: ParameterValue { value: &p.value },
                })
                .collect(),
            timeout_ms: QUERY_TIMEOUT_MS,
            max_results: PAGE_SIZE,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryParameter<'a> {
    name: &'a str,
    parameter_type: ParameterType,
    parameter_value: ParameterValue<'a>,
}

#[derive(Debug, Serialize)]
struct ParameterType {
    r#type: &'static str,
}

#[derive(Debug, Serialize)]
struct ParameterValue<'a> {
    value: &'a str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: bool,
    job_reference: Option<JobReference>,
    schema: Option<Schema>,
    #[serde(default)]
    rows: Vec<Row>,
    page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    project_id: String,
    job_id: String,
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Schema {
    #[serde(default)]
    fields: Vec<Field>,
}

#[derive(Debug, Deserialize)]
struct Field {
    name: String,
    r#type: String,
    #[serde(default)]
    mode: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Row {
    #[serde(default)]
    f: Vec<RowValue>,
}

#[derive(Debug, Deserialize)]
struct RowValue {
    #[serde(default)]
    v: Value,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error.message)
        .unwrap_or_else(|_| body.to_string())
}

fn decode_page(page: &QueryResponse) -> Result<Table, LoadError> {
    let fields = page
        .schema
        .as_ref()
        .map(|s| s.fields.as_slice())
        .unwrap_or_default();
    let columns: Vec<Column> = fields
        .iter()
        .map(|f| Column {
            name: f.name.clone(),
            field_type: if f.mode.as_deref() == Some("REPEATED") {
                FieldType::Other("REPEATED".to_string())
            } else {
                FieldType::from_warehouse(&f.r#type)
            },
        })
        .collect();

    let mut table = Table::new(columns);
    for row in &page.rows {
        if row.f.len() != table.columns.len() {
            return Err(LoadError::Decode(format!(
                "row has {} values for {} columns",
                row.f.len(),
                table.columns.len()
            )));
        }
        let cells = row
            .f
            .iter()
            .zip(&table.columns)
            .map(|(value, column)| decode_cell(&value.v, column))
            .collect::<Result<Vec<_>, _>>()?;
        table.rows.push(cells);
    }
    Ok(table)
}

fn decode_cell(value: &Value, column: &Column) -> Result<Cell, LoadError> {
    let raw = match value {
        Value::Null => return Ok(Cell::Null),
        Value::String(s) => s.as_str(),
        other => return Ok(Cell::Text(other.to_string())),
    };
    let bad = || LoadError::Decode(format!("column {}: unexpected value {:?}", column.name, raw));
    let cell = match column.field_type {
        FieldType::Integer => Cell::Int(raw.parse().map_err(|_| bad())?),
        FieldType::Float | FieldType::Numeric => Cell::Float(raw.parse().map_err(|_| bad())?),
        FieldType::Boolean => Cell::Bool(raw.eq_ignore_ascii_case("true")),
        FieldType::WarehouseDate => Cell::WarehouseDate(raw.to_string()),
        FieldType::Timestamp => {
            let secs: f64 = raw.parse().map_err(|_| bad())?;
            let micros = (secs * 1_000_000.0).round() as i64;
            let ts = DateTime::from_timestamp_micros(micros).ok_or_else(bad)?;
            Cell::Timestamp(ts.naive_utc())
        }
        FieldType::Datetime => Cell::Timestamp(
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").map_err(|_| bad())?,
        ),
        FieldType::Date
        | FieldType::String
        | FieldType::Geography
        | FieldType::Other(_) => Cell::Text(raw.to_string()),
    };
    Ok(cell)
}
