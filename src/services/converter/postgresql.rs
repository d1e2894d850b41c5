// PostgreSQL and Redshift type names (pg_type spellings and SQL spellings)
use crate::error::ConversionError;
use crate::models::{ColumnDescriptor, NativeCell, PortableValue};
use crate::services::converter::common::*;
use crate::services::converter::{CellConverter, ConversionContext};
use crate::services::database::Engine;
use chrono::{FixedOffset, NaiveTime};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

pub struct PostgresConverter {
    engine: Engine,
}

pub static POSTGRESQL: PostgresConverter = PostgresConverter { engine: Engine::PostgreSql };

/// Redshift adds the semi-structured `super` type
pub static REDSHIFT: PostgresConverter = PostgresConverter { engine: Engine::Redshift };

impl CellConverter for PostgresConverter {
    fn engine(&self) -> Engine {
        self.engine
    }

    fn convert_native(
        &self,
        column: &ColumnDescriptor,
        cell: &NativeCell,
        ctx: &ConversionContext,
    ) -> Result<Option<PortableValue>, ConversionError> {
        let ty = TypeName::parse(&column.type_name);
        // pg_type names array types after their element with a leading underscore
        if let Some(element) = ty.base.strip_prefix('_') {
            return array(column, cell, element, |c, v| self.convert(c, v, ctx)).map(Some);
        }

        let value = match ty.base.as_str() {
            "bool" | "boolean" => boolean(column, cell)?,
            "char" if matches!(cell, NativeCell::Int(_)) => integer(column, cell, IntWidth::W8)?,
            "int2" | "smallint" | "smallserial" => integer(column, cell, IntWidth::W16)?,
            "int4" | "integer" | "int" | "serial" => integer(column, cell, IntWidth::W32)?,
            "int8" | "bigint" | "bigserial" | "oid" => integer(column, cell, IntWidth::W64)?,
            "float4" | "real" => float32(column, cell)?,
            "float8" | "double precision" | "float" => float64(column, cell)?,
            "numeric" | "decimal" => decimal(column, cell)?,
            "money" => money(column, cell)?,
            "text" | "varchar" | "character varying" | "bpchar" | "character" | "char" | "name" | "citext"
            | "uuid" | "xml" => text(column, cell)?,
            "inet" | "cidr" => inet(column, cell)?,
            "macaddr" => macaddr(column, cell)?,
            "bytea" => bytes(column, cell)?,
            "date" => date(column, cell)?,
            "time" | "time without time zone" => time(column, cell)?,
            "timetz" | "time with time zone" => timetz(column, cell)?,
            "timestamp" | "timestamp without time zone" => timestamp_local(column, cell, ctx)?,
            "timestamptz" | "timestamp with time zone" => timestamp_zoned(column, cell, ctx)?,
            "interval" => interval(column, cell)?,
            "json" | "jsonb" => json(column, cell)?,
            "super" if self.engine == Engine::Redshift => json(column, cell)?,
            "array" => {
                let element = ty.args.unwrap_or_default();
                array(column, cell, &element, |c, v| self.convert(c, v, ctx))?
            }
            "point" | "line" | "lseg" | "box" | "path" | "polygon" | "circle" | "geometry" | "geography" => {
                return Err(unsupported(column))
            }
            _ => return Ok(None),
        };
        Ok(Some(value))
    }
}

/// Binary money is a count of cents
fn money(column: &ColumnDescriptor, cell: &NativeCell) -> Result<PortableValue, ConversionError> {
    match cell {
        NativeCell::Raw(raw) if raw.len() == 8 => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(raw);
            let cents = i64::from_be_bytes(buf);
            let sign = if cents < 0 { "-" } else { "" };
            let abs = cents.unsigned_abs();
            Ok(PortableValue::Decimal(format!("{}{}.{:02}", sign, abs / 100, abs % 100)))
        }
        other => decimal(column, other),
    }
}

/// Binary timetz: microseconds since midnight, then seconds west of UTC
fn timetz(column: &ColumnDescriptor, cell: &NativeCell) -> Result<PortableValue, ConversionError> {
    match cell {
        NativeCell::Raw(raw) if raw.len() == 12 => {
            let mut micros = [0u8; 8];
            micros.copy_from_slice(&raw[..8]);
            let micros = i64::from_be_bytes(micros);
            let west = i32::from_be_bytes([raw[8], raw[9], raw[10], raw[11]]);
            let time = NaiveTime::from_num_seconds_from_midnight_opt(
                (micros / 1_000_000) as u32,
                ((micros % 1_000_000) * 1_000) as u32,
            );
            match (time, FixedOffset::west_opt(west)) {
                (Some(time), Some(offset)) => Ok(PortableValue::TimeTz(time, offset)),
                _ => Err(mismatch(column, cell)),
            }
        }
        other => time_tz(column, other),
    }
}

/// Binary inet/cidr: family, netmask bits, is_cidr flag, address length, address
fn inet(column: &ColumnDescriptor, cell: &NativeCell) -> Result<PortableValue, ConversionError> {
    let NativeCell::Raw(raw) = cell else {
        return text(column, cell);
    };
    if raw.len() < 4 || raw.len() != 4 + raw[3] as usize {
        return Err(mismatch(column, cell));
    }
    let (bits, is_cidr, address) = (raw[1], raw[2] != 0, &raw[4..]);
    let (address, full) = match address.len() {
        4 => (IpAddr::V4(Ipv4Addr::new(address[0], address[1], address[2], address[3])), 32),
        16 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(address);
            (IpAddr::V6(Ipv6Addr::from(octets)), 128)
        }
        _ => return Err(mismatch(column, cell)),
    };
    Ok(PortableValue::String(if is_cidr || bits != full {
        format!("{}/{}", address, bits)
    } else {
        address.to_string()
    }))
}

fn macaddr(column: &ColumnDescriptor, cell: &NativeCell) -> Result<PortableValue, ConversionError> {
    match cell {
        NativeCell::Raw(raw) if raw.len() == 6 => Ok(PortableValue::String(
            raw.iter().map(|b| format!("{:02x}", b)).collect::<Vec<_>>().join(":"),
        )),
        other => text(column, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ZoneId;
    use chrono::{DateTime, NaiveDate};
    use serde_json::json;

    fn convert(type_name: &str, cell: NativeCell) -> Result<PortableValue, ConversionError> {
        let ctx = ConversionContext { zone: "+02:00".parse::<ZoneId>().unwrap() };
        POSTGRESQL.convert(&ColumnDescriptor::new("c", 0, type_name), &cell, &ctx)
    }

    #[test]
    fn test_golden_scalars() {
        assert_eq!(convert("int2", NativeCell::Int(5)).unwrap(), PortableValue::Int16(5));
        assert_eq!(convert("int4", NativeCell::Int(-5)).unwrap(), PortableValue::Int32(-5));
        assert_eq!(convert("int8", NativeCell::Int(1 << 40)).unwrap(), PortableValue::Int64(1 << 40));
        assert_eq!(convert("float4", NativeCell::Float(1.5)).unwrap(), PortableValue::Float32(1.5));
        assert_eq!(
            convert("numeric", NativeCell::Decimal("99999999999999999999.01".into())).unwrap(),
            PortableValue::Decimal("99999999999999999999.01".into())
        );
        assert_eq!(convert("bool", NativeCell::Bool(true)).unwrap(), PortableValue::Boolean(true));
        assert_eq!(convert("bytea", NativeCell::Bytes(vec![1, 2])).unwrap(), PortableValue::Bytes(vec![1, 2]));
        assert_eq!(convert("uuid", NativeCell::Text("a-b".into())).unwrap(), PortableValue::from("a-b"));
        assert_eq!(convert("mood", NativeCell::Text("happy".into())).unwrap(), PortableValue::from("happy"));
    }

    #[test]
    fn test_golden_temporal() {
        let wall = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap().and_hms_opt(12, 0, 0).unwrap();
        assert_eq!(
            convert("timestamp", NativeCell::Timestamp(wall)).unwrap().to_json(),
            json!("2024-06-01T12:00:00+02:00")
        );
        let instant = DateTime::parse_from_rfc3339("2024-06-01T12:00:00Z").unwrap();
        assert_eq!(
            convert("timestamptz", NativeCell::TimestampTz(instant)).unwrap().to_json(),
            json!("2024-06-01T14:00:00+02:00")
        );
        assert_eq!(
            convert("interval", NativeCell::Interval { months: 0, days: 1, micros: 7_200_000_000 }).unwrap(),
            PortableValue::from("P1DT2H")
        );
        assert_eq!(
            convert("date", NativeCell::Date(wall.date())).unwrap(),
            PortableValue::Date(wall.date())
        );
    }

    #[test]
    fn test_golden_structured() {
        assert_eq!(
            convert("jsonb", NativeCell::Json(json!({"a": [1, 2]}))).unwrap().to_json(),
            json!({"a": [1, 2]})
        );
        let cell = NativeCell::Array(vec![NativeCell::Text("x".into()), NativeCell::Null]);
        assert_eq!(
            convert("_text", cell).unwrap(),
            PortableValue::Array(vec![PortableValue::from("x"), PortableValue::Null])
        );
    }

    #[test]
    fn test_binary_fallbacks() {
        let cents = (-1234i64).to_be_bytes().to_vec();
        assert_eq!(convert("money", NativeCell::Raw(cents)).unwrap(), PortableValue::Decimal("-12.34".into()));
        assert_eq!(
            convert("inet", NativeCell::Raw(vec![2, 32, 0, 4, 10, 0, 0, 1])).unwrap(),
            PortableValue::from("10.0.0.1")
        );
        assert_eq!(
            convert("cidr", NativeCell::Raw(vec![2, 8, 1, 4, 10, 0, 0, 0])).unwrap(),
            PortableValue::from("10.0.0.0/8")
        );
        let mut timetz = (3_600_000_000i64).to_be_bytes().to_vec();
        timetz.extend_from_slice(&(-7200i32).to_be_bytes());
        assert_eq!(convert("timetz", NativeCell::Raw(timetz)).unwrap().to_json(), json!("01:00:00+02:00"));
    }

    #[test]
    fn test_geometric_types_fail() {
        let err = convert("point", NativeCell::Raw(vec![0; 16])).unwrap_err();
        assert_eq!(err.reason, "type point is not supported");
        assert!(convert("tsvector", NativeCell::Raw(vec![0])).is_err());
    }

    #[test]
    fn test_redshift_super() {
        let column = ColumnDescriptor::new("s", 0, "super");
        let cell = NativeCell::Raw(br#"{"k":1}"#.to_vec());
        let value = REDSHIFT.convert(&column, &cell, &ConversionContext::default()).unwrap();
        assert_eq!(value.to_json(), json!({"k": 1}));
        assert!(POSTGRESQL.convert(&column, &cell, &ConversionContext::default()).is_err());
    }
}
