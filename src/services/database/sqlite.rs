// SQLite driver using rusqlite (in-process engine)
use crate::error::{BridgeError, DriverError, Result};
use crate::models::{ColumnDescriptor, NativeCell, Parameters, PortableValue};
use crate::services::database::adapter::{
    BatchFailure, Connection, ExecuteError, ExecuteRequest, ResultSink, SinkControl,
};
use crate::services::database::Engine;
use rusqlite::fallible_iterator::FallibleIterator;
use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::{Batch, Statement, ToSql};

pub struct SqliteConnection {
    conn: rusqlite::Connection,
}

impl SqliteConnection {
    /// Opens `sqlite:path`, `sqlite://path` or `sqlite::memory:`
    pub fn open(url: &str) -> Result<Self> {
        let path = url.trim_start_matches("jdbc:");
        let path = path.trim_start_matches("sqlite:").trim_start_matches("//");

        let conn = if path.is_empty() || path == ":memory:" {
            rusqlite::Connection::open_in_memory()
        } else {
            rusqlite::Connection::open(path)
        }
        .map_err(|e| BridgeError::Connection(format!("Failed to open SQLite database: {}", e)))?;

        Ok(Self { conn })
    }

    pub fn from_connection(conn: rusqlite::Connection) -> Self {
        Self { conn }
    }

    fn run(
        &self,
        request: &ExecuteRequest<'_>,
        sink: &mut (dyn ResultSink + Send),
    ) -> std::result::Result<(), ExecuteError> {
        let mut batch = Batch::new(&self.conn, request.sql);
        while let Some(mut stmt) = batch.next().map_err(DriverError::from)? {
            bind_named(&mut stmt, request.parameters)?;

            let columns: Vec<ColumnDescriptor> = stmt
                .columns()
                .iter()
                .enumerate()
                .map(|(ordinal, column)| {
                    ColumnDescriptor::new(column.name(), ordinal, column.decl_type().unwrap_or(""))
                })
                .collect();

            if columns.is_empty() {
                let before = self.total_changes()?;
                let changed = stmt.raw_execute().map_err(DriverError::from)?;
                // sqlite3_changes() is stale after DDL, only trust it when DML ran
                let affected = if self.total_changes()? > before { changed as u64 } else { 0 };
                sink.begin_result(columns)?;
                sink.end_result(Some(affected))?;
                continue;
            }

            let width = columns.len();
            sink.begin_result(columns)?;
            let mut rows = stmt.raw_query();
            let mut delivering = true;
            while let Some(row) = rows.next().map_err(DriverError::from)? {
                if !delivering {
                    continue;
                }
                let mut cells = Vec::with_capacity(width);
                for idx in 0..width {
                    cells.push(native_cell(row.get_ref(idx).map_err(DriverError::from)?));
                }
                delivering = sink.push_row(cells)? == SinkControl::Continue;
            }
            sink.end_result(None)?;
        }
        Ok(())
    }

    fn total_changes(&self) -> std::result::Result<i64, DriverError> {
        self.conn
            .query_row("SELECT total_changes()", [], |row| row.get(0))
            .map_err(DriverError::from)
    }

    fn insert_rows(&self, sql: &str, rows: &[Vec<PortableValue>]) -> std::result::Result<u64, BatchFailure> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| BatchFailure { offset: 0, error: e.into() })?;
        let mut written = 0u64;
        for (offset, row) in rows.iter().enumerate() {
            let params = rusqlite::params_from_iter(row.iter().map(SqliteParam));
            written += stmt
                .execute(params)
                .map_err(|e| BatchFailure { offset, error: e.into() })? as u64;
        }
        Ok(written)
    }
}

/// Binds `:name`, `@name` and `$name` parameters by name
fn bind_named(stmt: &mut Statement<'_>, parameters: &Parameters) -> std::result::Result<(), ExecuteError> {
    for index in 1..=stmt.parameter_count() {
        let name = match stmt.parameter_name(index) {
            Some(name) => name.to_string(),
            None => {
                return Err(BridgeError::Parameter(format!(
                    "Positional placeholder at index {} cannot be bound by name",
                    index
                ))
                .into())
            }
        };
        let value = parameters
            .get(&name[1..])
            .ok_or_else(|| BridgeError::Parameter(format!("No value supplied for {}", name)))?;
        stmt.raw_bind_parameter(index, SqliteParam(value))
            .map_err(DriverError::from)?;
    }
    Ok(())
}

fn native_cell(value: ValueRef<'_>) -> NativeCell {
    match value {
        ValueRef::Null => NativeCell::Null,
        ValueRef::Integer(i) => NativeCell::Int(i),
        ValueRef::Real(f) => NativeCell::Double(f),
        // SQLite does not validate TEXT; bad UTF-8 is kept byte for byte
        ValueRef::Text(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => NativeCell::Text(text.to_string()),
            Err(_) => NativeCell::Bytes(bytes.to_vec()),
        },
        ValueRef::Blob(bytes) => NativeCell::Bytes(bytes.to_vec()),
    }
}

/// SQLite storage-class binding of a portable value
struct SqliteParam<'a>(&'a PortableValue);

impl ToSql for SqliteParam<'_> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let value = match self.0 {
            PortableValue::Null => Value::Null,
            PortableValue::Boolean(b) => Value::Integer(*b as i64),
            PortableValue::Int8(v) => Value::Integer(*v as i64),
            PortableValue::Int16(v) => Value::Integer(*v as i64),
            PortableValue::Int32(v) => Value::Integer(*v as i64),
            PortableValue::Int64(v) => Value::Integer(*v),
            PortableValue::Float32(v) => Value::Real(*v as f64),
            PortableValue::Float64(v) => Value::Real(*v),
            PortableValue::Bytes(b) => return Ok(ToSqlOutput::Borrowed(ValueRef::Blob(b))),
            PortableValue::String(s) | PortableValue::Decimal(s) | PortableValue::Opaque(s) => {
                return Ok(ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())))
            }
            other => Value::Text(other.to_text()),
        };
        Ok(ToSqlOutput::Owned(value))
    }
}

#[async_trait::async_trait]
impl Connection for SqliteConnection {
    fn engine(&self) -> Engine {
        Engine::Sqlite
    }

    async fn execute(
        &mut self,
        request: &ExecuteRequest<'_>,
        sink: &mut (dyn ResultSink + Send),
    ) -> std::result::Result<(), ExecuteError> {
        self.run(request, sink)
    }

    async fn begin(&mut self) -> std::result::Result<(), DriverError> {
        Ok(self.conn.execute_batch("BEGIN")?)
    }

    async fn commit(&mut self) -> std::result::Result<(), DriverError> {
        Ok(self.conn.execute_batch("COMMIT")?)
    }

    async fn rollback(&mut self) -> std::result::Result<(), DriverError> {
        if self.conn.is_autocommit() {
            return Ok(());
        }
        Ok(self.conn.execute_batch("ROLLBACK")?)
    }

    async fn execute_batch(
        &mut self,
        sql: &str,
        rows: &[Vec<PortableValue>],
    ) -> std::result::Result<u64, BatchFailure> {
        self.insert_rows(sql, rows)
    }

    async fn close(self: Box<Self>) -> std::result::Result<(), DriverError> {
        self.conn.close().map_err(|(_, e)| DriverError::from(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FetchSize;

    /// Records what the driver delivers, converting nothing
    #[derive(Default)]
    struct Recorder {
        results: Vec<(Vec<ColumnDescriptor>, Vec<Vec<NativeCell>>, Option<u64>)>,
        stop_after_first: bool,
    }

    impl ResultSink for Recorder {
        fn begin_result(&mut self, columns: Vec<ColumnDescriptor>) -> std::result::Result<(), BridgeError> {
            self.results.push((columns, Vec::new(), None));
            Ok(())
        }

        fn push_row(&mut self, cells: Vec<NativeCell>) -> std::result::Result<SinkControl, BridgeError> {
            if let Some(last) = self.results.last_mut() {
                last.1.push(cells);
            }
            Ok(if self.stop_after_first { SinkControl::Stop } else { SinkControl::Continue })
        }

        fn end_result(&mut self, affected_rows: Option<u64>) -> std::result::Result<(), BridgeError> {
            if let Some(last) = self.results.last_mut() {
                last.2 = affected_rows;
            }
            Ok(())
        }
    }

    fn request<'a>(sql: &'a str, parameters: &'a Parameters) -> ExecuteRequest<'a> {
        ExecuteRequest {
            sql,
            parameters,
            fetch_size: FetchSize::Driver,
        }
    }

    #[test]
    fn test_open_url_forms() {
        assert!(SqliteConnection::open("sqlite::memory:").is_ok());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let url = format!("sqlite://{}", path.display());
        assert!(SqliteConnection::open(&url).is_ok());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_multi_statement_results() {
        let mut conn = SqliteConnection::open("sqlite::memory:").unwrap();
        let params = Parameters::new();
        let mut sink = Recorder::default();
        conn.execute(
            &request(
                "CREATE TABLE t (id INTEGER, name TEXT); INSERT INTO t VALUES (1, 'a'), (2, 'b'); SELECT id, name FROM t ORDER BY id",
                &params,
            ),
            &mut sink,
        )
        .await
        .unwrap();

        assert_eq!(sink.results.len(), 3);
        assert_eq!(sink.results[0].2, Some(0));
        assert_eq!(sink.results[1].2, Some(2));
        let (columns, rows, _) = &sink.results[2];
        assert_eq!(columns[0].type_name, "INTEGER");
        assert_eq!(columns[1].name, "name");
        assert_eq!(rows[1], vec![NativeCell::Int(2), NativeCell::Text("b".to_string())]);
    }

    #[tokio::test]
    async fn test_named_binding() {
        let mut conn = SqliteConnection::open("sqlite::memory:").unwrap();
        let mut params = Parameters::new();
        params.insert("age".to_string(), PortableValue::Int64(40));
        params.insert("unused".to_string(), PortableValue::Null);
        let mut sink = Recorder::default();
        conn.execute(&request("SELECT :age + 1 AS next", &params), &mut sink)
            .await
            .unwrap();
        assert_eq!(sink.results[0].1[0], vec![NativeCell::Int(41)]);
        assert_eq!(sink.results[0].0[0].type_name, "");
    }

    #[tokio::test]
    async fn test_stop_consumes_remaining_rows() {
        let mut conn = SqliteConnection::open("sqlite::memory:").unwrap();
        let params = Parameters::new();
        let mut sink = Recorder {
            stop_after_first: true,
            ..Default::default()
        };
        conn.execute(
            &request("SELECT 1 AS a UNION ALL SELECT 2; SELECT 3 AS b", &params),
            &mut sink,
        )
        .await
        .unwrap();
        assert_eq!(sink.results.len(), 2);
        assert_eq!(sink.results[0].1.len(), 1);
        assert_eq!(sink.results[1].1.len(), 1);
    }

    #[tokio::test]
    async fn test_driver_error_keeps_engine_message() {
        let mut conn = SqliteConnection::open("sqlite::memory:").unwrap();
        let params = Parameters::new();
        let mut sink = Recorder::default();
        let err = conn
            .execute(&request("SELECT * FROM missing", &params), &mut sink)
            .await
            .unwrap_err();
        match err {
            ExecuteError::Driver(driver) => assert!(driver.message.contains("no such table")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_utf8_text_is_not_replaced() {
        let mut conn = SqliteConnection::open("sqlite::memory:").unwrap();
        let params = Parameters::new();
        let mut sink = Recorder::default();
        conn.execute(&request("SELECT CAST(X'41FF' AS TEXT) AS t, 'ok' AS u", &params), &mut sink)
            .await
            .unwrap();
        assert_eq!(
            sink.results[0].1[0],
            vec![NativeCell::Bytes(vec![0x41, 0xff]), NativeCell::Text("ok".to_string())]
        );
    }

    #[tokio::test]
    async fn test_bulk_insert_reports_offending_row() {
        let mut conn = SqliteConnection::open("sqlite::memory:").unwrap();
        conn.conn
            .execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT NOT NULL)")
            .unwrap();
        let rows = vec![
            vec![PortableValue::Int64(1), PortableValue::from("a")],
            vec![PortableValue::Int64(2), PortableValue::Null],
        ];
        let failure = conn
            .execute_batch("INSERT INTO t VALUES (?, ?)", &rows)
            .await
            .unwrap_err();
        assert_eq!(failure.offset, 1);
        assert!(failure.error.message.contains("NOT NULL"));
    }
}
