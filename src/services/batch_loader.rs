// Bulk loading of external row sources through parameterised inserts
use crate::error::{BridgeError, Result};
use crate::models::PortableValue;
use crate::services::database::Connection;
use crate::services::parameters;
use crate::storage::{StagedReader, Staging};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use tokio::io::{AsyncBufReadExt, Lines};

pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// One input row: values in placeholder order, or values by column name
#[derive(Debug, Clone, PartialEq)]
pub enum SourceRow {
    Positional(Vec<PortableValue>),
    Named(BTreeMap<String, PortableValue>),
}

impl SourceRow {
    pub fn from_json(value: Value) -> Option<Self> {
        match value {
            Value::Array(items) => Some(SourceRow::Positional(
                items.iter().map(PortableValue::from_json).collect(),
            )),
            Value::Object(fields) => Some(SourceRow::Named(
                fields
                    .iter()
                    .map(|(key, value)| (key.clone(), PortableValue::from_json(value)))
                    .collect(),
            )),
            _ => None,
        }
    }
}

#[async_trait::async_trait]
pub trait RowSource: Send {
    async fn next_row(&mut self) -> Result<Option<SourceRow>>;
}

/// Rows held in memory
#[derive(Debug, Default)]
pub struct VecRowSource {
    rows: VecDeque<SourceRow>,
}

impl VecRowSource {
    pub fn new(rows: Vec<SourceRow>) -> Self {
        Self { rows: rows.into() }
    }
}

#[async_trait::async_trait]
impl RowSource for VecRowSource {
    async fn next_row(&mut self) -> Result<Option<SourceRow>> {
        Ok(self.rows.pop_front())
    }
}

/// Newline-delimited JSON, one array or object per line. Blank lines are skipped.
pub struct JsonLinesRowSource {
    lines: Lines<StagedReader>,
    row: usize,
}

impl JsonLinesRowSource {
    pub fn new(reader: StagedReader) -> Self {
        Self {
            lines: reader.lines(),
            row: 0,
        }
    }

    pub async fn open(staging: &dyn Staging, uri: &str) -> Result<Self> {
        Ok(Self::new(staging.open(uri).await?))
    }
}

#[async_trait::async_trait]
impl RowSource for JsonLinesRowSource {
    async fn next_row(&mut self) -> Result<Option<SourceRow>> {
        while let Some(line) = self.lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let row = self.row;
            self.row += 1;
            let value: Value = serde_json::from_str(&line).map_err(|e| BridgeError::Batch {
                row,
                message: format!("invalid JSON: {}", e),
            })?;
            return SourceRow::from_json(value).map(Some).ok_or(BridgeError::Batch {
                row,
                message: "expected a JSON array or object".to_string(),
            });
        }
        Ok(None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutput {
    pub row_count: u64,
}

/// Feeds a row source into one parameterised statement, chunk by chunk
#[derive(Debug, Clone, Copy)]
pub struct BatchLoader {
    batch_size: usize,
}

impl Default for BatchLoader {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE)
    }
}

impl BatchLoader {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    /// Loads every row of `source` through `sql` (`?` placeholders).
    ///
    /// With `columns`, map rows are bound in column order. Fails on the first
    /// offending row; chunks already sent stay written.
    pub async fn load(
        &self,
        connection: &mut dyn Connection,
        sql: &str,
        columns: Option<&[String]>,
        source: &mut dyn RowSource,
    ) -> Result<BatchOutput> {
        let arity = parameters::count_positional(sql, connection.engine());
        if let Some(columns) = columns {
            // nothing is read or sent, the first row is the one that cannot bind
            if columns.len() != arity {
                return Err(BridgeError::Batch {
                    row: 0,
                    message: format!("{} column(s) given for {} placeholder(s)", columns.len(), arity),
                });
            }
        }

        tracing::info!("Loading rows into {} in chunks of {}", connection.engine(), self.batch_size);

        let mut chunk: Vec<Vec<PortableValue>> = Vec::with_capacity(self.batch_size);
        let mut chunk_start = 0usize;
        let mut row_index = 0usize;
        while let Some(row) = source.next_row().await? {
            chunk.push(bind_row(row, row_index, arity, columns)?);
            row_index += 1;
            if chunk.len() == self.batch_size {
                self.flush(connection, sql, &chunk, chunk_start).await?;
                chunk_start = row_index;
                chunk.clear();
            }
        }
        if !chunk.is_empty() {
            self.flush(connection, sql, &chunk, chunk_start).await?;
        }

        tracing::info!("Loaded {} row(s)", row_index);
        Ok(BatchOutput {
            row_count: row_index as u64,
        })
    }

    async fn flush(
        &self,
        connection: &mut dyn Connection,
        sql: &str,
        chunk: &[Vec<PortableValue>],
        chunk_start: usize,
    ) -> Result<()> {
        tracing::debug!("Sending rows {}..{}", chunk_start, chunk_start + chunk.len());
        connection
            .execute_batch(sql, chunk)
            .await
            .map(|_| ())
            .map_err(|failure| BridgeError::Batch {
                row: chunk_start + failure.offset,
                message: failure.error.message,
            })
    }
}

fn bind_row(row: SourceRow, index: usize, arity: usize, columns: Option<&[String]>) -> Result<Vec<PortableValue>> {
    let batch_error = |message: String| BridgeError::Batch { row: index, message };
    match (row, columns) {
        (SourceRow::Positional(values), _) => {
            if values.len() != arity {
                return Err(batch_error(format!(
                    "expected {} value(s), found {}",
                    arity,
                    values.len()
                )));
            }
            Ok(values)
        }
        (SourceRow::Named(mut fields), Some(columns)) => columns
            .iter()
            .map(|column| {
                fields
                    .remove(column)
                    .ok_or_else(|| batch_error(format!("missing value for column '{}'", column)))
            })
            .collect(),
        (SourceRow::Named(_), None) => Err(batch_error(
            "named row requires a column list".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FetchMode, QueryRequest};
    use crate::services::database::SqliteConnection;
    use crate::services::statement_runner::StatementRunner;
    use crate::storage::LocalStaging;
    use std::sync::Arc;

    fn named(pairs: &[(&str, PortableValue)]) -> SourceRow {
        SourceRow::Named(pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect())
    }

    fn people() -> SqliteConnection {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE people (name TEXT NOT NULL, age INTEGER)").unwrap();
        SqliteConnection::from_connection(conn)
    }

    async fn count(conn: &mut SqliteConnection) -> u64 {
        let dir = tempfile::tempdir().unwrap();
        let runner = StatementRunner::new(Arc::new(LocalStaging::new(dir.path())), dir.path());
        let outcome = runner
            .execute(conn, &QueryRequest::new("SELECT name FROM people").with_fetch_mode(FetchMode::Fetch))
            .await
            .unwrap();
        outcome.total_rows()
    }

    #[tokio::test]
    async fn test_named_rows() {
        let mut conn = people();
        let columns = vec!["name".to_string(), "age".to_string()];
        let mut source = VecRowSource::new(vec![
            named(&[("name", "ada".into()), ("age", 36i64.into())]),
            named(&[("age", 41i64.into()), ("name", "alan".into())]),
        ]);
        let output = BatchLoader::default()
            .load(&mut conn, "INSERT INTO people (name, age) VALUES (?, ?)", Some(columns.as_slice()), &mut source)
            .await
            .unwrap();
        assert_eq!(serde_json::to_value(output).unwrap(), serde_json::json!({"rowCount": 2}));
        assert_eq!(count(&mut conn).await, 2);
    }

    #[tokio::test]
    async fn test_positional_rows_in_chunks() {
        let mut conn = people();
        let rows = (0..7)
            .map(|i| SourceRow::Positional(vec![format!("p{}", i).into(), (i as i64).into()]))
            .collect();
        let output = BatchLoader::new(3)
            .load(&mut conn, "INSERT INTO people VALUES (?, ?)", None, &mut VecRowSource::new(rows))
            .await
            .unwrap();
        assert_eq!(output.row_count, 7);
        assert_eq!(count(&mut conn).await, 7);
    }

    #[tokio::test]
    async fn test_errors_name_the_row() {
        let mut conn = people();
        let sql = "INSERT INTO people VALUES (?, ?)";
        let loader = BatchLoader::new(2);

        let mut source = VecRowSource::new(vec![
            SourceRow::Positional(vec!["a".into(), 1i64.into()]),
            SourceRow::Positional(vec!["b".into()]),
        ]);
        match loader.load(&mut conn, sql, None, &mut source).await.unwrap_err() {
            BridgeError::Batch { row, message } => {
                assert_eq!(row, 1);
                assert!(message.contains("expected 2"));
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let mut source = VecRowSource::new(vec![named(&[("name", "x".into())])]);
        let err = loader.load(&mut conn, sql, None, &mut source).await.unwrap_err();
        assert!(matches!(err, BridgeError::Batch { row: 0, .. }));

        let columns = vec!["name".to_string(), "age".to_string()];
        let mut source = VecRowSource::new(vec![named(&[("name", "x".into())])]);
        let err = loader.load(&mut conn, sql, Some(columns.as_slice()), &mut source).await.unwrap_err();
        assert!(err.to_string().contains("'age'"));
    }

    #[tokio::test]
    async fn test_column_list_must_match_placeholders() {
        let mut conn = people();
        let columns = vec!["name".to_string()];
        let mut source = VecRowSource::new(vec![named(&[("name", "x".into())])]);
        let err = BatchLoader::default()
            .load(&mut conn, "INSERT INTO people VALUES (?, ?)", Some(columns.as_slice()), &mut source)
            .await
            .unwrap_err();
        match err {
            BridgeError::Batch { row, message } => {
                assert_eq!(row, 0);
                assert!(message.contains("1 column(s) given for 2 placeholder(s)"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(count(&mut conn).await, 0);
    }

    #[tokio::test]
    async fn test_engine_rejection_names_the_row() {
        let mut conn = people();
        let rows = vec![
            SourceRow::Positional(vec!["a".into(), 1i64.into()]),
            SourceRow::Positional(vec!["b".into(), 2i64.into()]),
            SourceRow::Positional(vec!["c".into(), 3i64.into()]),
            SourceRow::Positional(vec![PortableValue::Null, 4i64.into()]),
        ];
        let err = BatchLoader::new(2)
            .load(&mut conn, "INSERT INTO people VALUES (?, ?)", None, &mut VecRowSource::new(rows))
            .await
            .unwrap_err();
        match err {
            BridgeError::Batch { row, message } => {
                assert_eq!(row, 3);
                assert!(message.contains("NOT NULL"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        // no implicit rollback: the first chunk and the row before the failure stay
        assert_eq!(count(&mut conn).await, 3);
    }

    #[tokio::test]
    async fn test_json_lines_source() {
        let dir = tempfile::tempdir().unwrap();
        let staging = LocalStaging::new(dir.path().join("staged"));
        let file = dir.path().join("rows.jsonl");
        tokio::fs::write(&file, "[\"ada\", 36]\n\n{\"name\": \"alan\", \"age\": 41}\n").await.unwrap();
        let uri = staging.stage_file(&file).await.unwrap();

        let mut source = JsonLinesRowSource::open(&staging, &uri).await.unwrap();
        assert_eq!(
            source.next_row().await.unwrap(),
            Some(SourceRow::Positional(vec!["ada".into(), 36i64.into()]))
        );
        assert_eq!(
            source.next_row().await.unwrap(),
            Some(named(&[("age", 41i64.into()), ("name", "alan".into())]))
        );
        assert_eq!(source.next_row().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_json_lines_rejects_scalars() {
        let reader: StagedReader = Box::new(tokio::io::BufReader::new(&b"42\n"[..]));
        let err = JsonLinesRowSource::new(reader).next_row().await.unwrap_err();
        assert!(matches!(err, BridgeError::Batch { row: 0, .. }));
    }
}
