// Apache Druid driver using the SQL HTTP API
// Druid runs one read-only statement per request: no transactions, no bulk insert
use crate::error::{BridgeError, DriverError, Result};
use crate::models::{ColumnDescriptor, NativeCell, PortableValue};
use crate::services::database::adapter::{
    BatchFailure, Connection, ExecuteError, ExecuteRequest, ResultSink, SinkControl,
};
use crate::services::database::{Credentials, Engine};
use crate::services::parameters::{self, PlaceholderStyle};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use url::Url;

pub struct DruidConnection {
    base_url: String,
    client: Client,
    credentials: Credentials,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DruidSqlRequest {
    query: String,
    result_format: &'static str,
    header: bool,
    types_header: bool,
    sql_types_header: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    parameters: Vec<DruidParameter>,
    context: Value,
}

#[derive(Debug, Serialize, PartialEq)]
struct DruidParameter {
    #[serde(rename = "type")]
    sql_type: &'static str,
    value: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DruidErrorResponse {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    error_code: Option<String>,
}

impl DruidConnection {
    pub fn new(connection_url: &str, credentials: &Credentials) -> Result<Self> {
        let url = Url::parse(connection_url.trim_start_matches("jdbc:"))
            .map_err(|e| BridgeError::Connection(format!("Invalid Druid URL: {}", e)))?;

        // druid://host:port -> http://host:port
        let base_url = match url.scheme() {
            "druid" => format!(
                "http://{}:{}",
                url.host_str().unwrap_or("localhost"),
                url.port().unwrap_or(8888)
            ),
            "http" | "https" => format!(
                "{}://{}{}",
                url.scheme(),
                url.host_str().unwrap_or("localhost"),
                url.port().map(|p| format!(":{}", p)).unwrap_or_default()
            ),
            _ => {
                return Err(BridgeError::Connection(
                    "URL must use druid://, http://, or https:// scheme for Druid".to_string(),
                ))
            }
        };

        let client = Client::builder()
            .build()
            .map_err(|e| BridgeError::Connection(format!("Failed to create HTTP client: {}", e)))?;

        let credentials = Credentials {
            username: credentials.username.clone().or_else(|| non_empty(url.username())),
            password: credentials
                .password
                .clone()
                .or_else(|| url.password().map(str::to_string)),
        };

        Ok(Self {
            base_url,
            client,
            credentials,
        })
    }

    async fn post_sql(&self, request: &DruidSqlRequest) -> std::result::Result<Vec<Vec<Value>>, DriverError> {
        let sql_endpoint = format!("{}/druid/v2/sql", self.base_url);
        let mut builder = self.client.post(&sql_endpoint).json(request);
        if let Some(username) = &self.credentials.username {
            builder = builder.basic_auth(username, self.credentials.password.as_deref());
        }
        let response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(druid_error(status.as_u16(), &error_body));
        }

        response
            .json::<Vec<Vec<Value>>>()
            .await
            .map_err(|e| DriverError::new(format!("Failed to parse Druid response: {}", e)))
    }
}

fn non_empty(text: &str) -> Option<String> {
    (!text.is_empty()).then(|| text.to_string())
}

fn druid_error(status: u16, body: &str) -> DriverError {
    match serde_json::from_str::<DruidErrorResponse>(body) {
        Ok(parsed) => {
            let message = parsed
                .error_message
                .or(parsed.error.clone())
                .unwrap_or_else(|| body.to_string());
            match parsed.error_code.or(parsed.error) {
                Some(code) => DriverError::with_code(code, message),
                None => DriverError::new(message),
            }
        }
        Err(_) => DriverError::with_code(status.to_string(), format!("Druid SQL query failed: {}", body)),
    }
}

fn to_parameter(value: &PortableValue) -> DruidParameter {
    let sql_type = match value {
        PortableValue::Null | PortableValue::String(_) | PortableValue::Opaque(_) => "VARCHAR",
        PortableValue::Boolean(_) => "BOOLEAN",
        PortableValue::Int8(_) | PortableValue::Int16(_) | PortableValue::Int32(_) => "INTEGER",
        PortableValue::Int64(_) => "BIGINT",
        PortableValue::Float32(_) => "FLOAT",
        PortableValue::Float64(_) => "DOUBLE",
        PortableValue::Decimal(_) => "DECIMAL",
        PortableValue::Date(_) => "DATE",
        PortableValue::Timestamp(_) | PortableValue::TimestampTz(_) => "TIMESTAMP",
        PortableValue::Array(_) => "ARRAY",
        _ => "VARCHAR",
    };
    let value = match value {
        // Druid expects "yyyy-MM-dd HH:mm:ss" timestamps in the query time zone (UTC)
        PortableValue::Timestamp(ts) => json!(ts.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
        PortableValue::TimestampTz(ts) => json!(ts.naive_utc().format("%Y-%m-%d %H:%M:%S%.f").to_string()),
        PortableValue::Bytes(_) | PortableValue::Map(_) | PortableValue::TimeTz(_, _) => {
            json!(value.to_text())
        }
        other => other.to_json(),
    };
    DruidParameter { sql_type, value }
}

/// Splits an array-format response into column descriptors and data rows.
/// The first three rows are the names, Druid types and SQL types headers.
fn split_headers(mut rows: Vec<Vec<Value>>) -> std::result::Result<(Vec<ColumnDescriptor>, Vec<Vec<Value>>), DriverError> {
    if rows.len() < 3 {
        return Err(DriverError::new("Druid response is missing its header rows"));
    }
    let data = rows.split_off(3);
    let sql_types = &rows[2];
    let columns = rows[0]
        .iter()
        .enumerate()
        .map(|(ordinal, name)| {
            let type_name = sql_types.get(ordinal).and_then(Value::as_str).unwrap_or("OTHER");
            ColumnDescriptor::new(name.as_str().unwrap_or_default(), ordinal, type_name)
        })
        .collect();
    Ok((columns, data))
}

#[async_trait::async_trait]
impl Connection for DruidConnection {
    fn engine(&self) -> Engine {
        Engine::Druid
    }

    async fn execute(
        &mut self,
        request: &ExecuteRequest<'_>,
        sink: &mut (dyn ResultSink + Send),
    ) -> std::result::Result<(), ExecuteError> {
        let statements = parameters::split_statements(request.sql, Engine::Druid);
        if statements.len() > 1 {
            return Err(DriverError::unsupported("druid", "multiple statements per request").into());
        }
        let Some(statement) = statements.into_iter().next() else {
            return Ok(());
        };

        let (query, values) = parameters::rewrite(&statement, request.parameters, PlaceholderStyle::Question, Engine::Druid)?;
        let body = DruidSqlRequest {
            query,
            result_format: "array",
            header: true,
            types_header: true,
            sql_types_header: true,
            parameters: values.iter().map(to_parameter).collect(),
            context: json!({ "sqlTimeZone": "UTC" }),
        };

        let (columns, rows) = split_headers(self.post_sql(&body).await?)?;
        sink.begin_result(columns)?;
        for row in rows {
            let cells = row.into_iter().map(NativeCell::from_json).collect();
            if sink.push_row(cells)? == SinkControl::Stop {
                break;
            }
        }
        sink.end_result(None)?;
        Ok(())
    }

    async fn begin(&mut self) -> std::result::Result<(), DriverError> {
        Err(DriverError::unsupported("druid", "transactions"))
    }

    async fn commit(&mut self) -> std::result::Result<(), DriverError> {
        Err(DriverError::unsupported("druid", "transactions"))
    }

    async fn rollback(&mut self) -> std::result::Result<(), DriverError> {
        Err(DriverError::unsupported("druid", "transactions"))
    }

    async fn execute_batch(
        &mut self,
        _sql: &str,
        _rows: &[Vec<PortableValue>],
    ) -> std::result::Result<u64, BatchFailure> {
        Err(BatchFailure {
            offset: 0,
            error: DriverError::unsupported("druid", "bulk inserts"),
        })
    }

    async fn close(self: Box<Self>) -> std::result::Result<(), DriverError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_from_druid_scheme() {
        let conn = DruidConnection::new("druid://broker:8082", &Credentials::default()).unwrap();
        assert_eq!(conn.base_url, "http://broker:8082");
        let conn = DruidConnection::new("https://u:p@router.example.com/druid", &Credentials::default()).unwrap();
        assert_eq!(conn.base_url, "https://router.example.com");
        assert_eq!(conn.credentials.username.as_deref(), Some("u"));
        assert!(DruidConnection::new("ftp://x", &Credentials::default()).is_err());
    }

    #[test]
    fn test_split_headers() {
        let response = vec![
            vec![json!("__time"), json!("page"), json!("cnt")],
            vec![json!("LONG"), json!("STRING"), json!("LONG")],
            vec![json!("TIMESTAMP"), json!("VARCHAR"), json!("BIGINT")],
            vec![json!("2024-01-01T00:00:00.000Z"), json!("Main"), json!(3)],
        ];
        let (columns, rows) = split_headers(response).unwrap();
        assert_eq!(columns[0].type_name, "TIMESTAMP");
        assert_eq!(columns[2].name, "cnt");
        assert_eq!(rows.len(), 1);
        assert!(split_headers(vec![]).is_err());
    }

    #[test]
    fn test_parameters_are_typed() {
        assert_eq!(
            to_parameter(&PortableValue::Int64(5)),
            DruidParameter { sql_type: "BIGINT", value: json!(5) }
        );
        assert_eq!(to_parameter(&PortableValue::Null).value, Value::Null);
    }

    #[test]
    fn test_error_body_is_parsed() {
        let error = druid_error(400, r#"{"error":"Plan validation failed","errorMessage":"Column 'x' not found"}"#);
        assert_eq!(error.code.as_deref(), Some("Plan validation failed"));
        assert_eq!(error.message, "Column 'x' not found");
        let error = druid_error(502, "Bad Gateway");
        assert_eq!(error.code.as_deref(), Some("502"));
    }
}
