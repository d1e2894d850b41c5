// MySQL / MariaDB driver using mysql_async
use crate::error::{BridgeError, DriverError, Result};
use crate::models::{ColumnDescriptor, NativeCell, PortableValue};
use crate::services::database::adapter::{
    execute_rows_in_order, BatchFailure, Connection, ExecuteError, ExecuteRequest, ResultSink, RowExecutor,
    SinkControl,
};
use crate::services::database::{Credentials, Engine};
use crate::services::parameters::{self, PlaceholderStyle};
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use mysql_async::consts::{ColumnFlags, ColumnType};
use mysql_async::prelude::*;
use mysql_async::{Column, Conn, Opts, OptsBuilder, Params, QueryResult, Statement, Value};

/// Binary collation id, marks BINARY/VARBINARY/BLOB columns
const BINARY_CHARSET: u16 = 63;

pub struct MySqlConnection {
    engine: Engine,
    conn: Conn,
}

impl MySqlConnection {
    pub async fn connect(engine: Engine, url: &str, credentials: &Credentials) -> Result<Self> {
        let opts = Opts::from_url(&normalize_url(url))
            .map_err(|e| BridgeError::Connection(format!("Invalid MySQL URL: {}", e)))?;
        let mut builder = OptsBuilder::from_opts(opts);
        if let Some(user) = &credentials.username {
            builder = builder.user(Some(user.clone()));
        }
        if let Some(password) = &credentials.password {
            builder = builder.pass(Some(password.clone()));
        }

        let mut conn = Conn::new(builder)
            .await
            .map_err(|e| BridgeError::Connection(format!("Failed to connect to {}: {}", engine, e)))?;

        // TIMESTAMP values are read back as UTC instants
        conn.query_drop("SET time_zone = '+00:00'")
            .await
            .map_err(|e| BridgeError::Connection(format!("Failed to initialise session: {}", e)))?;

        Ok(Self { engine, conn })
    }
}

fn normalize_url(url: &str) -> String {
    let url = url.trim().trim_start_matches("jdbc:");
    match url.strip_prefix("mariadb://") {
        Some(rest) => format!("mysql://{}", rest),
        None => url.to_string(),
    }
}

/// Feeds every result set of `result` to the sink
async fn drain<P>(
    mut result: QueryResult<'_, '_, P>,
    sink: &mut (dyn ResultSink + Send),
) -> std::result::Result<(), ExecuteError>
where
    P: Protocol + Send,
{
    while !result.is_empty() {
        let columns = match result.columns() {
            Some(columns) if !columns.is_empty() => columns,
            _ => {
                let affected = result.affected_rows();
                sink.begin_result(Vec::new())?;
                sink.end_result(Some(affected))?;
                result.next().await.map_err(DriverError::from)?;
                continue;
            }
        };

        sink.begin_result(
            columns
                .iter()
                .enumerate()
                .map(|(ordinal, column)| describe(column, ordinal))
                .collect(),
        )?;

        let mut delivering = true;
        while let Some(mut row) = result.next().await.map_err(DriverError::from)? {
            if !delivering {
                continue;
            }
            let cells = columns
                .iter()
                .enumerate()
                .map(|(idx, column)| {
                    let value = row.take::<Value, _>(idx).unwrap_or(Value::NULL);
                    decode_value(value, column)
                })
                .collect();
            delivering = sink.push_row(cells)? == SinkControl::Continue;
        }
        sink.end_result(None)?;
    }
    Ok(())
}

fn describe(column: &Column, ordinal: usize) -> ColumnDescriptor {
    let nullable = !column.flags().contains(ColumnFlags::NOT_NULL_FLAG);
    ColumnDescriptor::new(column.name_str(), ordinal, type_name(column)).with_nullable(nullable)
}

/// Declared type name in the spelling MySQL uses in DDL
fn type_name(column: &Column) -> String {
    let flags = column.flags();
    let unsigned = flags.contains(ColumnFlags::UNSIGNED_FLAG);
    let binary = column.character_set() == BINARY_CHARSET;
    let base = match column.column_type() {
        ColumnType::MYSQL_TYPE_TINY if column.column_length() == 1 && !unsigned => return "TINYINT(1)".to_string(),
        ColumnType::MYSQL_TYPE_TINY => "TINYINT",
        ColumnType::MYSQL_TYPE_SHORT => "SMALLINT",
        ColumnType::MYSQL_TYPE_INT24 => "MEDIUMINT",
        ColumnType::MYSQL_TYPE_LONG => "INT",
        ColumnType::MYSQL_TYPE_LONGLONG => "BIGINT",
        ColumnType::MYSQL_TYPE_FLOAT => "FLOAT",
        ColumnType::MYSQL_TYPE_DOUBLE => "DOUBLE",
        ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => "DECIMAL",
        ColumnType::MYSQL_TYPE_DATE | ColumnType::MYSQL_TYPE_NEWDATE => "DATE",
        ColumnType::MYSQL_TYPE_TIME | ColumnType::MYSQL_TYPE_TIME2 => "TIME",
        ColumnType::MYSQL_TYPE_DATETIME | ColumnType::MYSQL_TYPE_DATETIME2 => "DATETIME",
        ColumnType::MYSQL_TYPE_TIMESTAMP | ColumnType::MYSQL_TYPE_TIMESTAMP2 => "TIMESTAMP",
        ColumnType::MYSQL_TYPE_YEAR => "YEAR",
        ColumnType::MYSQL_TYPE_BIT => "BIT",
        ColumnType::MYSQL_TYPE_JSON => "JSON",
        ColumnType::MYSQL_TYPE_GEOMETRY => "GEOMETRY",
        ColumnType::MYSQL_TYPE_NULL => "NULL",
        ColumnType::MYSQL_TYPE_ENUM => "ENUM",
        ColumnType::MYSQL_TYPE_SET => "SET",
        _ if flags.contains(ColumnFlags::ENUM_FLAG) => "ENUM",
        _ if flags.contains(ColumnFlags::SET_FLAG) => "SET",
        ColumnType::MYSQL_TYPE_VARCHAR | ColumnType::MYSQL_TYPE_VAR_STRING if binary => "VARBINARY",
        ColumnType::MYSQL_TYPE_VARCHAR | ColumnType::MYSQL_TYPE_VAR_STRING => "VARCHAR",
        ColumnType::MYSQL_TYPE_STRING if binary => "BINARY",
        ColumnType::MYSQL_TYPE_STRING => "CHAR",
        ColumnType::MYSQL_TYPE_TINY_BLOB
        | ColumnType::MYSQL_TYPE_MEDIUM_BLOB
        | ColumnType::MYSQL_TYPE_LONG_BLOB
        | ColumnType::MYSQL_TYPE_BLOB
            if binary =>
        {
            "BLOB"
        }
        ColumnType::MYSQL_TYPE_TINY_BLOB
        | ColumnType::MYSQL_TYPE_MEDIUM_BLOB
        | ColumnType::MYSQL_TYPE_LONG_BLOB
        | ColumnType::MYSQL_TYPE_BLOB => "TEXT",
        _ => "UNKNOWN",
    };
    let numeric = matches!(
        base,
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "FLOAT" | "DOUBLE" | "DECIMAL"
    );
    if unsigned && numeric {
        format!("{} UNSIGNED", base)
    } else {
        base.to_string()
    }
}

fn mysql_datetime(y: u16, mo: u8, d: u8, h: u8, mi: u8, s: u8, us: u32) -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(y as i32, mo as u32, d as u32)?.and_hms_micro_opt(h as u32, mi as u32, s as u32, us)
}

/// Normalizes a wire value. Text-protocol results arrive as bytes and are
/// parsed according to the column type; unparsable text is passed through.
fn decode_value(value: Value, column: &Column) -> NativeCell {
    let column_type = column.column_type();
    match value {
        Value::NULL => NativeCell::Null,
        Value::Int(i) => NativeCell::Int(i),
        Value::UInt(u) => NativeCell::UInt(u),
        Value::Float(f) => NativeCell::Float(f),
        Value::Double(d) => NativeCell::Double(d),
        Value::Date(y, mo, d, h, mi, s, us) => match mysql_datetime(y, mo, d, h, mi, s, us) {
            Some(ts) if matches!(column_type, ColumnType::MYSQL_TYPE_DATE | ColumnType::MYSQL_TYPE_NEWDATE) => {
                NativeCell::Date(ts.date())
            }
            Some(ts) => NativeCell::Timestamp(ts),
            None => NativeCell::Text(format!("{:04}-{:02}-{:02} {:02}:{:02}:{:02}", y, mo, d, h, mi, s)),
        },
        Value::Time(negative, days, h, mi, s, us) => time_cell(negative, days, h, mi, s, us),
        Value::Bytes(bytes) => decode_text(bytes, column),
    }
}

fn time_cell(negative: bool, days: u32, h: u8, mi: u8, s: u8, us: u32) -> NativeCell {
    if !negative && days == 0 {
        if let Some(time) = NaiveTime::from_hms_micro_opt(h as u32, mi as u32, s as u32, us) {
            return NativeCell::Time(time);
        }
    }
    // TIME is a duration in MySQL and may exceed a day or be negative
    let micros = ((days as i64 * 24 + h as i64) * 3600 + mi as i64 * 60 + s as i64) * 1_000_000 + us as i64;
    NativeCell::Interval {
        months: 0,
        days: 0,
        micros: if negative { -micros } else { micros },
    }
}

fn parse_time_text(text: &str) -> Option<NativeCell> {
    let (negative, rest) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let (clock, fraction) = rest.split_once('.').unwrap_or((rest, ""));
    let mut parts = clock.split(':');
    let hours: u32 = parts.next()?.parse().ok()?;
    let minutes: u8 = parts.next()?.parse().ok()?;
    let seconds: u8 = parts.next()?.parse().ok()?;
    let micros: u32 = if fraction.is_empty() {
        0
    } else {
        format!("{:0<6}", &fraction[..fraction.len().min(6)]).parse().ok()?
    };
    Some(time_cell(negative, hours / 24, (hours % 24) as u8, minutes, seconds, micros))
}

fn decode_text(bytes: Vec<u8>, column: &Column) -> NativeCell {
    let binary = column.character_set() == BINARY_CHARSET;
    let unsigned = column.flags().contains(ColumnFlags::UNSIGNED_FLAG);
    let text = match column.column_type() {
        ColumnType::MYSQL_TYPE_BIT | ColumnType::MYSQL_TYPE_GEOMETRY => return NativeCell::Bytes(bytes),
        _ if binary && !is_numeric_or_temporal(column.column_type()) => return NativeCell::Bytes(bytes),
        _ => match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(err) => return NativeCell::Bytes(err.into_bytes()),
        },
    };

    let parsed = match column.column_type() {
        ColumnType::MYSQL_TYPE_TINY
        | ColumnType::MYSQL_TYPE_SHORT
        | ColumnType::MYSQL_TYPE_INT24
        | ColumnType::MYSQL_TYPE_LONG
        | ColumnType::MYSQL_TYPE_LONGLONG
        | ColumnType::MYSQL_TYPE_YEAR => {
            if unsigned {
                text.parse().ok().map(NativeCell::UInt)
            } else {
                text.parse().ok().map(NativeCell::Int)
            }
        }
        ColumnType::MYSQL_TYPE_FLOAT => text.parse().ok().map(NativeCell::Float),
        ColumnType::MYSQL_TYPE_DOUBLE => text.parse().ok().map(NativeCell::Double),
        ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => {
            Some(NativeCell::Decimal(text.clone()))
        }
        ColumnType::MYSQL_TYPE_DATE | ColumnType::MYSQL_TYPE_NEWDATE => {
            NaiveDate::parse_from_str(&text, "%Y-%m-%d").ok().map(NativeCell::Date)
        }
        ColumnType::MYSQL_TYPE_DATETIME
        | ColumnType::MYSQL_TYPE_DATETIME2
        | ColumnType::MYSQL_TYPE_TIMESTAMP
        | ColumnType::MYSQL_TYPE_TIMESTAMP2 => NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M:%S%.f")
            .ok()
            .map(NativeCell::Timestamp),
        ColumnType::MYSQL_TYPE_TIME | ColumnType::MYSQL_TYPE_TIME2 => parse_time_text(&text),
        ColumnType::MYSQL_TYPE_JSON => serde_json::from_str(&text).ok().map(NativeCell::Json),
        _ => None,
    };
    parsed.unwrap_or(NativeCell::Text(text))
}

fn is_numeric_or_temporal(column_type: ColumnType) -> bool {
    !matches!(
        column_type,
        ColumnType::MYSQL_TYPE_VARCHAR
            | ColumnType::MYSQL_TYPE_VAR_STRING
            | ColumnType::MYSQL_TYPE_STRING
            | ColumnType::MYSQL_TYPE_TINY_BLOB
            | ColumnType::MYSQL_TYPE_MEDIUM_BLOB
            | ColumnType::MYSQL_TYPE_LONG_BLOB
            | ColumnType::MYSQL_TYPE_BLOB
    )
}

fn naive_value(ts: NaiveDateTime) -> Value {
    Value::Date(
        ts.year() as u16,
        ts.month() as u8,
        ts.day() as u8,
        ts.hour() as u8,
        ts.minute() as u8,
        ts.second() as u8,
        ts.nanosecond() / 1_000,
    )
}

/// Wire value of a bound parameter. The session runs in UTC, so zoned
/// timestamps are sent as UTC wall time.
fn to_value(value: &PortableValue) -> Value {
    match value {
        PortableValue::Null => Value::NULL,
        PortableValue::Boolean(b) => Value::Int(*b as i64),
        PortableValue::Int8(v) => Value::Int(*v as i64),
        PortableValue::Int16(v) => Value::Int(*v as i64),
        PortableValue::Int32(v) => Value::Int(*v as i64),
        PortableValue::Int64(v) => Value::Int(*v),
        PortableValue::Float32(v) => Value::Float(*v),
        PortableValue::Float64(v) => Value::Double(*v),
        PortableValue::Bytes(b) => Value::Bytes(b.clone()),
        PortableValue::Date(d) => Value::Date(d.year() as u16, d.month() as u8, d.day() as u8, 0, 0, 0, 0),
        PortableValue::Time(t) => Value::Time(
            false,
            0,
            t.hour() as u8,
            t.minute() as u8,
            t.second() as u8,
            t.nanosecond() / 1_000,
        ),
        PortableValue::Timestamp(ts) => naive_value(*ts),
        PortableValue::TimestampTz(ts) => naive_value(ts.naive_utc()),
        other => Value::Bytes(other.to_text().into_bytes()),
    }
}

fn positional(values: Vec<PortableValue>) -> Params {
    if values.is_empty() {
        Params::Empty
    } else {
        Params::Positional(values.iter().map(to_value).collect())
    }
}

/// One prepared insert, executed per row
struct MySqlRows<'a> {
    conn: &'a mut Conn,
    statement: Statement,
}

#[async_trait::async_trait]
impl RowExecutor for MySqlRows<'_> {
    async fn execute_row(&mut self, row: &[PortableValue]) -> std::result::Result<u64, DriverError> {
        self.conn
            .exec_drop(self.statement.clone(), positional(row.to_vec()))
            .await?;
        Ok(self.conn.affected_rows())
    }
}

#[async_trait::async_trait]
impl Connection for MySqlConnection {
    fn engine(&self) -> Engine {
        self.engine
    }

    /// Without parameters the whole text goes to the server as one
    /// multi-statement query; with parameters each statement is prepared.
    async fn execute(
        &mut self,
        request: &ExecuteRequest<'_>,
        sink: &mut (dyn ResultSink + Send),
    ) -> std::result::Result<(), ExecuteError> {
        if parameters::placeholders(request.sql, self.engine).is_empty() {
            let result = self.conn.query_iter(request.sql).await.map_err(DriverError::from)?;
            return drain(result, sink).await;
        }

        for text in parameters::split_statements(request.sql, self.engine) {
            let (sql, values) = parameters::rewrite(&text, request.parameters, PlaceholderStyle::Question, self.engine)?;
            let result = self
                .conn
                .exec_iter(sql.as_str(), positional(values))
                .await
                .map_err(DriverError::from)?;
            drain(result, sink).await?;
        }
        Ok(())
    }

    async fn begin(&mut self) -> std::result::Result<(), DriverError> {
        Ok(self.conn.query_drop("START TRANSACTION").await?)
    }

    async fn commit(&mut self) -> std::result::Result<(), DriverError> {
        Ok(self.conn.query_drop("COMMIT").await?)
    }

    async fn rollback(&mut self) -> std::result::Result<(), DriverError> {
        Ok(self.conn.query_drop("ROLLBACK").await?)
    }

    async fn auto_commit(&mut self) -> std::result::Result<Option<bool>, DriverError> {
        let value: Option<i64> = self.conn.query_first("SELECT @@autocommit").await?;
        Ok(value.map(|v| v != 0))
    }

    async fn set_auto_commit(&mut self, enabled: bool) -> std::result::Result<(), DriverError> {
        let sql = if enabled { "SET autocommit = 1" } else { "SET autocommit = 0" };
        Ok(self.conn.query_drop(sql).await?)
    }

    async fn execute_batch(
        &mut self,
        sql: &str,
        rows: &[Vec<PortableValue>],
    ) -> std::result::Result<u64, BatchFailure> {
        let statement = self
            .conn
            .prep(sql)
            .await
            .map_err(|e| BatchFailure { offset: 0, error: e.into() })?;
        let mut executor = MySqlRows {
            conn: &mut self.conn,
            statement,
        };
        execute_rows_in_order(&mut executor, rows).await
    }

    async fn close(self: Box<Self>) -> std::result::Result<(), DriverError> {
        Ok(self.conn.disconnect().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Timelike};

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("mariadb://u:p@h:3306/db"), "mysql://u:p@h:3306/db");
        assert_eq!(normalize_url("jdbc:mysql://h/db"), "mysql://h/db");
    }

    #[test]
    fn test_time_beyond_a_day_is_an_interval() {
        assert_eq!(
            parse_time_text("-25:00:01.5"),
            Some(NativeCell::Interval {
                months: 0,
                days: 0,
                micros: -((25 * 3600 + 1) * 1_000_000 + 500_000)
            })
        );
        match parse_time_text("08:30:00") {
            Some(NativeCell::Time(t)) => assert_eq!((t.hour(), t.minute()), (8, 30)),
            other => panic!("unexpected cell: {:?}", other),
        }
    }

    #[test]
    fn test_parameter_values() {
        assert_eq!(to_value(&PortableValue::Boolean(true)), Value::Int(1));
        assert_eq!(
            to_value(&PortableValue::Decimal("1.50".to_string())),
            Value::Bytes(b"1.50".to_vec())
        );
        let ts = DateTime::parse_from_rfc3339("2024-01-15T12:00:00+02:00").unwrap();
        assert_eq!(
            to_value(&PortableValue::TimestampTz(ts)),
            Value::Date(2024, 1, 15, 10, 0, 0, 0)
        );
        assert!(matches!(positional(Vec::new()), Params::Empty));
    }
}
