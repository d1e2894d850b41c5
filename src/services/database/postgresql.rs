// PostgreSQL (and Redshift) driver using tokio-postgres
use crate::error::{BridgeError, DriverError, Result};
use crate::models::{ColumnDescriptor, FetchSize, NativeCell, PortableValue};
use crate::services::database::adapter::{
    execute_rows_in_order, BatchFailure, Connection, ExecuteError, ExecuteRequest, ResultSink, RowExecutor,
    SinkControl,
};
use crate::services::database::{Credentials, Engine};
use crate::services::parameters::{self, PlaceholderStyle};
use bytes::{BufMut, BytesMut};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use futures::TryStreamExt;
use tokio_postgres::types::{to_sql_checked, FromSql, IsNull, Kind, ToSql, Type};
use tokio_postgres::{Client, NoTls, Row, Statement};

type BoxError = Box<dyn std::error::Error + Sync + Send>;

pub struct PostgresConnection {
    engine: Engine,
    client: Client,
    /// Set between `begin` and `commit`/`rollback`
    in_transaction: bool,
}

impl PostgresConnection {
    pub async fn connect(engine: Engine, url: &str, credentials: &Credentials) -> Result<Self> {
        let mut config: tokio_postgres::Config = normalize_url(url)
            .parse()
            .map_err(|e| BridgeError::Connection(format!("Invalid PostgreSQL URL: {}", e)))?;
        if let Some(user) = &credentials.username {
            config.user(user);
        }
        if let Some(password) = &credentials.password {
            config.password(password);
        }

        let (client, connection) = config
            .connect(NoTls)
            .await
            .map_err(|e| BridgeError::Connection(format!("Failed to connect to {}: {}", engine, e)))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("PostgreSQL connection error: {}", e);
            }
        });

        Ok(Self {
            engine,
            client,
            in_transaction: false,
        })
    }
}

/// Rows per portal fetch, when the fetch size can be honoured.
///
/// Portals need a transaction; inside the invocation's own transaction the
/// bare client exposes none, so rows are streamed instead.
fn portal_page(fetch_size: FetchSize, in_transaction: bool) -> Option<i32> {
    match fetch_size {
        FetchSize::Rows(rows) if !in_transaction => Some(i32::try_from(rows).unwrap_or(i32::MAX)),
        _ => None,
    }
}

fn row_cells(row: &Row) -> std::result::Result<Vec<NativeCell>, DriverError> {
    let mut cells = Vec::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        cells.push(decode_cell(row, idx, column.type_()).map_err(DriverError::from)?);
    }
    Ok(cells)
}

/// One prepared insert, bound and executed per row
struct PgRows<'a> {
    client: &'a Client,
    statement: Statement,
}

#[async_trait::async_trait]
impl RowExecutor for PgRows<'_> {
    async fn execute_row(&mut self, row: &[PortableValue]) -> std::result::Result<u64, DriverError> {
        let params: Vec<PgParam> = row.iter().cloned().map(PgParam).collect();
        Ok(self.client.execute_raw(&self.statement, params.iter()).await?)
    }
}

impl PostgresConnection {
    /// Pulls rows through a portal `page` rows at a time
    async fn fetch_in_pages(
        &mut self,
        statement: &Statement,
        params: &[PgParam],
        page: i32,
        sink: &mut (dyn ResultSink + Send),
    ) -> std::result::Result<(), ExecuteError> {
        let transaction = self.client.transaction().await.map_err(DriverError::from)?;
        let portal = transaction
            .bind_raw(statement, params.iter())
            .await
            .map_err(DriverError::from)?;
        loop {
            let rows = transaction
                .query_portal(&portal, page)
                .await
                .map_err(DriverError::from)?;
            let exhausted = rows.len() < page as usize;
            let mut delivering = true;
            for row in &rows {
                delivering = sink.push_row(row_cells(row)?)? == SinkControl::Continue;
                if !delivering {
                    break;
                }
            }
            if exhausted || !delivering {
                break;
            }
        }
        transaction.commit().await.map_err(DriverError::from)?;
        Ok(())
    }
}

/// `tokio_postgres::Config` only understands the postgres schemes
fn normalize_url(url: &str) -> String {
    let url = url.trim().trim_start_matches("jdbc:");
    match url.strip_prefix("redshift://") {
        Some(rest) => format!("postgresql://{}", rest),
        None => url.to_string(),
    }
}

#[async_trait::async_trait]
impl Connection for PostgresConnection {
    fn engine(&self) -> Engine {
        self.engine
    }

    /// The statements are split client-side and prepared one at a time.
    /// A fetch size pages rows through a portal, otherwise they are streamed.
    async fn execute(
        &mut self,
        request: &ExecuteRequest<'_>,
        sink: &mut (dyn ResultSink + Send),
    ) -> std::result::Result<(), ExecuteError> {
        for text in parameters::split_statements(request.sql, self.engine) {
            let (sql, values) = parameters::rewrite(&text, request.parameters, PlaceholderStyle::Dollar, self.engine)?;
            let params: Vec<PgParam> = values.into_iter().map(PgParam).collect();
            let statement = self.client.prepare(&sql).await.map_err(DriverError::from)?;

            let columns: Vec<ColumnDescriptor> = statement
                .columns()
                .iter()
                .enumerate()
                .map(|(ordinal, column)| ColumnDescriptor::new(column.name(), ordinal, column.type_().name()))
                .collect();

            if columns.is_empty() {
                let affected = self
                    .client
                    .execute_raw(&statement, params.iter())
                    .await
                    .map_err(DriverError::from)?;
                sink.begin_result(columns)?;
                sink.end_result(Some(affected))?;
                continue;
            }

            sink.begin_result(columns)?;
            if let Some(page) = portal_page(request.fetch_size, self.in_transaction) {
                self.fetch_in_pages(&statement, &params, page, sink).await?;
                sink.end_result(None)?;
                continue;
            }

            let stream = self
                .client
                .query_raw(&statement, params.iter())
                .await
                .map_err(DriverError::from)?;
            futures::pin_mut!(stream);

            let mut delivering = true;
            while let Some(row) = stream.try_next().await.map_err(DriverError::from)? {
                if !delivering {
                    continue;
                }
                delivering = sink.push_row(row_cells(&row)?)? == SinkControl::Continue;
            }
            sink.end_result(None)?;
        }
        Ok(())
    }

    async fn begin(&mut self) -> std::result::Result<(), DriverError> {
        self.client.batch_execute("BEGIN").await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> std::result::Result<(), DriverError> {
        self.in_transaction = false;
        Ok(self.client.batch_execute("COMMIT").await?)
    }

    async fn rollback(&mut self) -> std::result::Result<(), DriverError> {
        self.in_transaction = false;
        Ok(self.client.batch_execute("ROLLBACK").await?)
    }

    async fn execute_batch(
        &mut self,
        sql: &str,
        rows: &[Vec<PortableValue>],
    ) -> std::result::Result<u64, BatchFailure> {
        let statement = self
            .client
            .prepare(&parameters::positional_to_dollar(sql, self.engine))
            .await
            .map_err(|e| BatchFailure { offset: 0, error: e.into() })?;
        let mut executor = PgRows {
            client: &self.client,
            statement,
        };
        execute_rows_in_order(&mut executor, rows).await
    }

    async fn close(self: Box<Self>) -> std::result::Result<(), DriverError> {
        drop(self.client);
        Ok(())
    }
}

fn scalar<'a, T: FromSql<'a>>(
    row: &'a Row,
    idx: usize,
    wrap: impl Fn(T) -> NativeCell,
) -> std::result::Result<NativeCell, tokio_postgres::Error> {
    Ok(row.try_get::<_, Option<T>>(idx)?.map(wrap).unwrap_or(NativeCell::Null))
}

fn array<'a, T: FromSql<'a>>(
    row: &'a Row,
    idx: usize,
    wrap: impl Fn(T) -> NativeCell,
) -> std::result::Result<NativeCell, tokio_postgres::Error> {
    Ok(match row.try_get::<_, Option<Vec<Option<T>>>>(idx)? {
        Some(items) => NativeCell::Array(
            items
                .into_iter()
                .map(|item| item.map(&wrap).unwrap_or(NativeCell::Null))
                .collect(),
        ),
        None => NativeCell::Null,
    })
}

fn utc_instant(value: DateTime<Utc>) -> NativeCell {
    NativeCell::TimestampTz(value.fixed_offset())
}

fn decode_cell(row: &Row, idx: usize, ty: &Type) -> std::result::Result<NativeCell, tokio_postgres::Error> {
    match *ty {
        Type::BOOL => scalar(row, idx, NativeCell::Bool),
        Type::CHAR => scalar(row, idx, |v: i8| NativeCell::Int(v as i64)),
        Type::INT2 => scalar(row, idx, |v: i16| NativeCell::Int(v as i64)),
        Type::INT4 => scalar(row, idx, |v: i32| NativeCell::Int(v as i64)),
        Type::INT8 => scalar(row, idx, NativeCell::Int),
        Type::OID => scalar(row, idx, |v: u32| NativeCell::UInt(v as u64)),
        Type::FLOAT4 => scalar(row, idx, NativeCell::Float),
        Type::FLOAT8 => scalar(row, idx, NativeCell::Double),
        Type::NUMERIC => scalar(row, idx, |v: PgNumeric| NativeCell::Decimal(v.0)),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            scalar(row, idx, NativeCell::Text)
        }
        Type::BYTEA => scalar(row, idx, NativeCell::Bytes),
        Type::DATE => scalar(row, idx, NativeCell::Date),
        Type::TIME => scalar(row, idx, NativeCell::Time),
        Type::TIMESTAMP => scalar(row, idx, NativeCell::Timestamp),
        Type::TIMESTAMPTZ => scalar(row, idx, utc_instant),
        Type::INTERVAL => scalar(row, idx, |v: PgInterval| NativeCell::Interval {
            months: v.months,
            days: v.days,
            micros: v.micros,
        }),
        Type::JSON | Type::JSONB => scalar(row, idx, NativeCell::Json),
        Type::UUID => scalar(row, idx, |v: uuid::Uuid| NativeCell::Text(v.to_string())),
        _ => match ty.kind() {
            Kind::Array(member) => decode_array(row, idx, member),
            // binary form of an enum is its label
            Kind::Enum(_) => scalar(row, idx, |v: RawBytes| {
                NativeCell::Text(String::from_utf8_lossy(&v.0).into_owned())
            }),
            _ => scalar(row, idx, |v: RawBytes| NativeCell::Raw(v.0)),
        },
    }
}

fn decode_array(row: &Row, idx: usize, member: &Type) -> std::result::Result<NativeCell, tokio_postgres::Error> {
    match *member {
        Type::BOOL => array(row, idx, NativeCell::Bool),
        Type::INT2 => array(row, idx, |v: i16| NativeCell::Int(v as i64)),
        Type::INT4 => array(row, idx, |v: i32| NativeCell::Int(v as i64)),
        Type::INT8 => array(row, idx, NativeCell::Int),
        Type::FLOAT4 => array(row, idx, NativeCell::Float),
        Type::FLOAT8 => array(row, idx, NativeCell::Double),
        Type::NUMERIC => array(row, idx, |v: PgNumeric| NativeCell::Decimal(v.0)),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => array(row, idx, NativeCell::Text),
        Type::BYTEA => array(row, idx, NativeCell::Bytes),
        Type::DATE => array(row, idx, NativeCell::Date),
        Type::TIME => array(row, idx, NativeCell::Time),
        Type::TIMESTAMP => array(row, idx, NativeCell::Timestamp),
        Type::TIMESTAMPTZ => array(row, idx, utc_instant),
        Type::JSON | Type::JSONB => array(row, idx, NativeCell::Json),
        Type::UUID => array(row, idx, |v: uuid::Uuid| NativeCell::Text(v.to_string())),
        _ => scalar(row, idx, |v: RawBytes| NativeCell::Raw(v.0)),
    }
}

const NUMERIC_POS: u16 = 0x0000;
const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// NUMERIC decoded to its exact decimal text
#[derive(Debug, Clone, PartialEq)]
struct PgNumeric(String);

impl<'a> FromSql<'a> for PgNumeric {
    fn from_sql(_: &Type, raw: &'a [u8]) -> std::result::Result<Self, BoxError> {
        if raw.len() < 8 {
            return Err("numeric value too short".into());
        }
        let ndigits = i16::from_be_bytes([raw[0], raw[1]]) as usize;
        let weight = i16::from_be_bytes([raw[2], raw[3]]) as i32;
        let sign = u16::from_be_bytes([raw[4], raw[5]]);
        let dscale = u16::from_be_bytes([raw[6], raw[7]]) as usize;
        if raw.len() < 8 + ndigits * 2 {
            return Err("numeric value truncated".into());
        }
        let digits: Vec<u16> = (0..ndigits)
            .map(|i| u16::from_be_bytes([raw[8 + i * 2], raw[9 + i * 2]]))
            .collect();

        let special = match sign {
            NUMERIC_NAN => Some("NaN"),
            NUMERIC_PINF => Some("Infinity"),
            NUMERIC_NINF => Some("-Infinity"),
            _ => None,
        };
        if let Some(text) = special {
            return Ok(PgNumeric(text.to_string()));
        }

        let digit = |index: i32| -> u16 {
            if index >= 0 && (index as usize) < digits.len() {
                digits[index as usize]
            } else {
                0
            }
        };

        let mut text = String::new();
        if sign == NUMERIC_NEG {
            text.push('-');
        }
        if weight < 0 {
            text.push('0');
        } else {
            for index in 0..=weight {
                if index == 0 {
                    text.push_str(&digit(index).to_string());
                } else {
                    text.push_str(&format!("{:04}", digit(index)));
                }
            }
        }
        if dscale > 0 {
            let mut fraction = String::new();
            let mut index = weight + 1;
            while fraction.len() < dscale {
                fraction.push_str(&format!("{:04}", digit(index)));
                index += 1;
            }
            fraction.truncate(dscale);
            text.push('.');
            text.push_str(&fraction);
        }
        Ok(PgNumeric(text))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

/// Writes decimal text in the NUMERIC binary format
fn encode_numeric(text: &str, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
    let text = text.trim();
    let special = match text {
        "NaN" => Some(NUMERIC_NAN),
        "Infinity" | "+Infinity" => Some(NUMERIC_PINF),
        "-Infinity" => Some(NUMERIC_NINF),
        _ => None,
    };
    if let Some(sign) = special {
        out.put_i16(0);
        out.put_i16(0);
        out.put_u16(sign);
        out.put_u16(0);
        return Ok(IsNull::No);
    }

    let (negative, unsigned) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let (int_part, frac_part) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    if int_part.is_empty() && frac_part.is_empty()
        || !int_part.chars().chain(frac_part.chars()).all(|c| c.is_ascii_digit())
    {
        return Err(format!("invalid decimal literal: {}", text).into());
    }

    let int_digits = int_part.trim_start_matches('0');
    let int_pad = (4 - int_digits.len() % 4) % 4;
    let frac_pad = (4 - frac_part.len() % 4) % 4;
    let padded = format!(
        "{}{}{}{}",
        "0".repeat(int_pad),
        int_digits,
        frac_part,
        "0".repeat(frac_pad)
    );
    let mut groups: Vec<i16> = padded
        .as_bytes()
        .chunks(4)
        .map(|chunk| chunk.iter().fold(0i16, |acc, b| acc * 10 + (b - b'0') as i16))
        .collect();
    let mut weight = ((int_pad + int_digits.len()) / 4) as i32 - 1;

    while groups.first() == Some(&0) {
        groups.remove(0);
        weight -= 1;
    }
    while groups.last() == Some(&0) {
        groups.pop();
    }
    if groups.is_empty() {
        weight = 0;
    }

    out.put_i16(groups.len() as i16);
    out.put_i16(weight as i16);
    out.put_u16(if negative && !groups.is_empty() { NUMERIC_NEG } else { NUMERIC_POS });
    out.put_u16(frac_part.len() as u16);
    for group in groups {
        out.put_i16(group);
    }
    Ok(IsNull::No)
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PgInterval {
    micros: i64,
    days: i32,
    months: i32,
}

impl<'a> FromSql<'a> for PgInterval {
    fn from_sql(_: &Type, raw: &'a [u8]) -> std::result::Result<Self, BoxError> {
        if raw.len() != 16 {
            return Err("invalid interval length".into());
        }
        let mut micros = [0u8; 8];
        micros.copy_from_slice(&raw[0..8]);
        Ok(PgInterval {
            micros: i64::from_be_bytes(micros),
            days: i32::from_be_bytes([raw[8], raw[9], raw[10], raw[11]]),
            months: i32::from_be_bytes([raw[12], raw[13], raw[14], raw[15]]),
        })
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::INTERVAL
    }
}

/// Wire bytes of a type without a dedicated decoder
struct RawBytes(Vec<u8>);

impl<'a> FromSql<'a> for RawBytes {
    fn from_sql(_: &Type, raw: &'a [u8]) -> std::result::Result<Self, BoxError> {
        Ok(RawBytes(raw.to_vec()))
    }

    fn accepts(_: &Type) -> bool {
        true
    }
}

/// A portable value bound to a parameter, encoded for the type the server inferred
#[derive(Debug)]
struct PgParam(PortableValue);

fn mismatch(value: &PortableValue, ty: &Type) -> BoxError {
    format!("cannot bind {} value to parameter of type {}", value.kind(), ty).into()
}

fn parse_naive_datetime(text: &str) -> Option<NaiveDateTime> {
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
}

fn encode(value: &PortableValue, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
    if let Kind::Array(_) = ty.kind() {
        return match value {
            PortableValue::Array(items) => {
                let elements: Vec<PgParam> = items.iter().cloned().map(PgParam).collect();
                elements.to_sql(ty, out)
            }
            other => Err(mismatch(other, ty)),
        };
    }

    let integer = || value.as_i64().ok_or_else(|| mismatch(value, ty));
    let float = || value.as_f64().ok_or_else(|| mismatch(value, ty));

    match *ty {
        Type::BOOL => value.as_bool().ok_or_else(|| mismatch(value, ty))?.to_sql(ty, out),
        Type::CHAR => i8::try_from(integer()?)?.to_sql(ty, out),
        Type::INT2 => i16::try_from(integer()?)?.to_sql(ty, out),
        Type::INT4 => i32::try_from(integer()?)?.to_sql(ty, out),
        Type::INT8 => integer()?.to_sql(ty, out),
        Type::OID => u32::try_from(integer()?)?.to_sql(ty, out),
        Type::FLOAT4 => (float()? as f32).to_sql(ty, out),
        Type::FLOAT8 => float()?.to_sql(ty, out),
        Type::NUMERIC => match value {
            PortableValue::Float32(_) | PortableValue::Float64(_) => {
                encode_numeric(&value.to_text(), out)
            }
            PortableValue::Decimal(s) | PortableValue::String(s) => encode_numeric(s, out),
            other => encode_numeric(&integer().map_err(|_| mismatch(other, ty))?.to_string(), out),
        },
        Type::BYTEA => match value {
            PortableValue::Bytes(b) => b.as_slice().to_sql(ty, out),
            PortableValue::String(s) => s.as_bytes().to_sql(ty, out),
            other => Err(mismatch(other, ty)),
        },
        Type::DATE => match value {
            PortableValue::Date(d) => d.to_sql(ty, out),
            PortableValue::Timestamp(ts) => ts.date().to_sql(ty, out),
            PortableValue::String(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")?.to_sql(ty, out),
            other => Err(mismatch(other, ty)),
        },
        Type::TIME => match value {
            PortableValue::Time(t) => t.to_sql(ty, out),
            PortableValue::String(s) => NaiveTime::parse_from_str(s, "%H:%M:%S%.f")?.to_sql(ty, out),
            other => Err(mismatch(other, ty)),
        },
        Type::TIMESTAMP => match value {
            PortableValue::Timestamp(ts) => ts.to_sql(ty, out),
            PortableValue::TimestampTz(ts) => ts.naive_local().to_sql(ty, out),
            PortableValue::Date(d) => d.and_time(NaiveTime::MIN).to_sql(ty, out),
            PortableValue::String(s) => parse_naive_datetime(s)
                .ok_or_else(|| mismatch(value, ty))?
                .to_sql(ty, out),
            other => Err(mismatch(other, ty)),
        },
        Type::TIMESTAMPTZ => match value {
            PortableValue::TimestampTz(ts) => ts.to_sql(ty, out),
            PortableValue::Timestamp(ts) => ts.and_utc().to_sql(ty, out),
            PortableValue::String(s) => DateTime::<FixedOffset>::parse_from_rfc3339(s)?.to_sql(ty, out),
            other => Err(mismatch(other, ty)),
        },
        Type::JSON | Type::JSONB => value.to_json().to_sql(ty, out),
        Type::UUID => uuid::Uuid::parse_str(&value.to_text())?.to_sql(ty, out),
        _ => {
            // text types, enums and unknown: the binary form is the text itself
            out.extend_from_slice(value.to_text().as_bytes());
            Ok(IsNull::No)
        }
    }
}

impl ToSql for PgParam {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
        match &self.0 {
            PortableValue::Null => Ok(IsNull::Yes),
            value => encode(value, ty, out),
        }
    }

    fn accepts(_: &Type) -> bool {
        true
    }

    to_sql_checked!();
}
