use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use crate::{config::Config, db::credential::CredentialResolver, error::AppError};

const CLIENT_APP_NAME: &str = "tick-dashboard";

#[derive(Clone)]
pub struct KustoDb {
    http: Client,
    cluster: String,
    database: String,
    credential: Arc<CredentialResolver>,
}

pub fn connect(config: &Config) -> Result<KustoDb, AppError> {
    let timeout = config
        .kusto_timeout
        .to_std()
        .map_err(|_| AppError::ConfigError("KUSTO_TIMEOUT must be positive".into()))?;

    let http = Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| AppError::DatabaseError(format!("Failed to create HTTP client: {}", e)))?;

    let credential =
        CredentialResolver::for_cluster(&config.kusto_cluster, &config.azure, http.clone(), timeout);

    Ok(KustoDb::new(
        http,
        &config.kusto_cluster,
        &config.kusto_database,
        Arc::new(credential),
    ))
}

impl KustoDb {
    pub fn new(
        http: Client,
        cluster: &str,
        database: &str,
        credential: Arc<CredentialResolver>,
    ) -> Self {
        Self {
            http,
            cluster: cluster.trim_end_matches('/').to_string(),
            database: database.to_string(),
            credential,
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub async fn execute(&self, query: &KustoQuery) -> Result<KustoTable, AppError> {
        let token = self.credential.token().await?;
        let request_id = format!("{};{}", CLIENT_APP_NAME, Uuid::new_v4());

        let body = json!({
            "db": self.database,
            "csl": query.csl(),
            "properties": query.properties().to_string(),
        });

        debug!(request_id = %request_id, database = %self.database, "executing Kusto query");

        let response = self
            .http
            .post(format!("{}/v1/rest/query", self.cluster))
            .bearer_auth(token)
            .header("Accept", "application/json")
            .header("x-ms-client-request-id", &request_id)
            .header("x-ms-app", CLIENT_APP_NAME)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(AppError::DatabaseError(format!(
                "Kusto returned {}: {}",
                status,
                service_error_message(&text)
            )));
        }

        let table = KustoTable::from_response(&text)?;
        debug!(request_id = %request_id, rows = table.len(), "Kusto query completed");
        Ok(table)
    }
}

fn service_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            let error = v.get("error")?;
            error
                .get("@message")
                .or_else(|| error.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.chars().take(512).collect())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamKind {
    String,
    Long,
}

impl ParamKind {
    fn kusto_type(self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Long => "long",
        }
    }
}

#[derive(Debug, Clone)]
struct QueryParameter {
    name: &'static str,
    kind: ParamKind,
    value: String,
}

// Bound values travel in the request `Parameters` property, never in the text
#[derive(Debug, Clone)]
pub struct KustoQuery {
    body: String,
    parameters: Vec<QueryParameter>,
}

impl KustoQuery {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            parameters: Vec::new(),
        }
    }

    pub fn string_param(mut self, name: &'static str, value: &str) -> Self {
        self.parameters.push(QueryParameter {
            name,
            kind: ParamKind::String,
            value: value.to_string(),
        });
        self
    }

    pub fn long_param(mut self, name: &'static str, value: i64) -> Self {
        self.parameters.push(QueryParameter {
            name,
            kind: ParamKind::Long,
            value: value.to_string(),
        });
        self
    }

    pub fn csl(&self) -> String {
        if self.parameters.is_empty() {
            return self.body.clone();
        }

        let declared = self
            .parameters
            .iter()
            .map(|p| format!("{}:{}", p.name, p.kind.kusto_type()))
            .collect::<Vec<_>>()
            .join(", ");
        format!("declare query_parameters({});\n{}", declared, self.body)
    }

    pub fn properties(&self) -> Value {
        let parameters: serde_json::Map<String, Value> = self
            .parameters
            .iter()
            .map(|p| (p.name.to_string(), Value::String(p.value.clone())))
            .collect();

        json!({ "Parameters": parameters })
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(rename = "Tables")]
    tables: Vec<RawTable>,
}

#[derive(Debug, Deserialize)]
struct RawTable {
    #[serde(rename = "Columns")]
    columns: Vec<KustoColumn>,
    #[serde(rename = "Rows")]
    rows: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KustoColumn {
    #[serde(rename = "ColumnName")]
    pub name: String,
    #[serde(rename = "ColumnType", default)]
    pub column_type: Option<String>,
    #[serde(rename = "DataType", default)]
    pub data_type: Option<String>,
}

#[derive(Debug, Clone)]
pub struct KustoTable {
    columns: Vec<KustoColumn>,
    rows: Vec<Vec<Value>>,
}

impl KustoTable {
    // v1 REST response; the primary result is the first table
    pub fn from_response(body: &str) -> Result<Self, AppError> {
        let response: QueryResponse = serde_json::from_str(body)
            .map_err(|e| AppError::DecodeError(format!("invalid Kusto response: {}", e)))?;

        let primary = response
            .tables
            .into_iter()
            .next()
            .ok_or_else(|| AppError::DecodeError("Kusto response has no result tables".into()))?;

        let rows = primary
            .rows
            .into_iter()
            .map(|row| match row {
                Value::Array(values) => Ok(values),
                other => Err(AppError::DatabaseError(format!(
                    "query returned a partial failure: {}",
                    other
                ))),
            })
            .collect::<Result<Vec<_>, AppError>>()?;

        Ok(Self {
            columns: primary.columns,
            rows,
        })
    }

    pub fn columns(&self) -> &[KustoColumn] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = KustoRow<'_>> {
        self.rows.iter().map(move |values| KustoRow {
            columns: &self.columns,
            values,
        })
    }
}

pub struct KustoRow<'a> {
    columns: &'a [KustoColumn],
    values: &'a [Value],
}

impl<'a> KustoRow<'a> {
    pub fn value(&self, column: &str) -> Result<&'a Value, AppError> {
        let index = self
            .columns
            .iter()
            .position(|c| c.name == column)
            .ok_or_else(|| AppError::DecodeError(format!("missing column '{}'", column)))?;

        self.values
            .get(index)
            .ok_or_else(|| AppError::DecodeError(format!("row is missing column '{}'", column)))
    }

    pub fn string(&self, column: &str) -> Result<String, AppError> {
        match self.value(column)? {
            Value::String(s) => Ok(s.clone()),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(type_mismatch(column, "string", other)),
        }
    }

    pub fn f64(&self, column: &str) -> Result<f64, AppError> {
        match self.value(column)? {
            Value::Number(n) => n
                .as_f64()
                .ok_or_else(|| type_mismatch(column, "number", &Value::Number(n.clone()))),
            // decimal columns are serialized as strings
            Value::String(s) => s
                .parse::<f64>()
                .map_err(|_| type_mismatch(column, "number", &Value::String(s.clone()))),
            other => Err(type_mismatch(column, "number", other)),
        }
    }

    pub fn i64(&self, column: &str) -> Result<i64, AppError> {
        match self.value(column)? {
            Value::Number(n) => n
                .as_i64()
                .ok_or_else(|| type_mismatch(column, "integer", &Value::Number(n.clone()))),
            Value::String(s) => s
                .parse::<i64>()
                .map_err(|_| type_mismatch(column, "integer", &Value::String(s.clone()))),
            other => Err(type_mismatch(column, "integer", other)),
        }
    }

    pub fn bool(&self, column: &str) -> Result<bool, AppError> {
        match self.value(column)? {
            Value::Bool(b) => Ok(*b),
            Value::Number(n) if n.as_i64() == Some(0) => Ok(false),
            Value::Number(n) if n.as_i64() == Some(1) => Ok(true),
            Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(true),
            Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(false),
            other => Err(type_mismatch(column, "bool", other)),
        }
    }

    pub fn opt_datetime(&self, column: &str) -> Result<Option<DateTime<Utc>>, AppError> {
        match self.value(column)? {
            Value::Null => Ok(None),
            Value::String(s) if s.is_empty() => Ok(None),
            Value::String(s) => DateTime::parse_from_rfc3339(s)
                .map(|dt| Some(dt.with_timezone(&Utc)))
                .map_err(|_| type_mismatch(column, "datetime", &Value::String(s.clone()))),
            other => Err(type_mismatch(column, "datetime", other)),
        }
    }

    pub fn datetime(&self, column: &str) -> Result<DateTime<Utc>, AppError> {
        self.opt_datetime(column)?
            .ok_or_else(|| AppError::DecodeError(format!("column '{}' is null", column)))
    }
}

fn type_mismatch(column: &str, expected: &str, got: &Value) -> AppError {
    AppError::DecodeError(format!("column '{}': expected {}, got {}", column, expected, got))
}
