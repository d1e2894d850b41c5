// Portable value model shared by every engine, and the raw cells drivers deliver
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Normalized value produced by a CellConverter.
#[derive(Debug, Clone, PartialEq)]
pub enum PortableValue {
    Null,
    Boolean(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    /// Exact decimal text, never routed through binary floating point
    Decimal(String),
    String(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    TimeTz(NaiveTime, FixedOffset),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<FixedOffset>),
    Array(Vec<PortableValue>),
    Map(BTreeMap<String, PortableValue>),
    /// Engine-specific value with no portable equivalent, kept as its text form
    Opaque(String),
}

impl PortableValue {
    pub fn kind(&self) -> &'static str {
        match self {
            PortableValue::Null => "null",
            PortableValue::Boolean(_) => "boolean",
            PortableValue::Int8(_) => "int8",
            PortableValue::Int16(_) => "int16",
            PortableValue::Int32(_) => "int32",
            PortableValue::Int64(_) => "int64",
            PortableValue::Float32(_) => "float32",
            PortableValue::Float64(_) => "float64",
            PortableValue::Decimal(_) => "decimal",
            PortableValue::String(_) => "string",
            PortableValue::Bytes(_) => "bytes",
            PortableValue::Date(_) => "date",
            PortableValue::Time(_) => "time",
            PortableValue::TimeTz(_, _) => "timetz",
            PortableValue::Timestamp(_) => "timestamp",
            PortableValue::TimestampTz(_) => "timestamptz",
            PortableValue::Array(_) => "array",
            PortableValue::Map(_) => "map",
            PortableValue::Opaque(_) => "opaque",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, PortableValue::Null)
    }

    /// Integer view of the value, for binding into integer parameters
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PortableValue::Boolean(b) => Some(*b as i64),
            PortableValue::Int8(v) => Some(*v as i64),
            PortableValue::Int16(v) => Some(*v as i64),
            PortableValue::Int32(v) => Some(*v as i64),
            PortableValue::Int64(v) => Some(*v),
            PortableValue::Decimal(s) | PortableValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PortableValue::Float32(v) => Some(*v as f64),
            PortableValue::Float64(v) => Some(*v),
            PortableValue::Decimal(s) | PortableValue::String(s) => s.trim().parse().ok(),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PortableValue::Boolean(b) => Some(*b),
            PortableValue::String(s) => match s.to_ascii_lowercase().as_str() {
                "true" | "t" | "1" => Some(true),
                "false" | "f" | "0" => Some(false),
                _ => None,
            },
            other => other.as_i64().map(|v| v != 0),
        }
    }

    /// Textual form used when an engine binds the value as text
    pub fn to_text(&self) -> String {
        match self {
            PortableValue::Null => String::new(),
            PortableValue::Decimal(s) | PortableValue::String(s) | PortableValue::Opaque(s) => {
                s.clone()
            }
            PortableValue::Bytes(b) => STANDARD.encode(b),
            other => match other.to_json() {
                JsonValue::String(s) => s,
                json => json.to_string(),
            },
        }
    }

    /// JSON projection used for inline outputs and staged records.
    ///
    /// Decimals and opaque values become strings, bytes become base64,
    /// temporal values become ISO-8601 text.
    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }

    /// Maps a JSON document onto portable values (numbers keep integer-ness).
    pub fn from_json(value: &JsonValue) -> PortableValue {
        match value {
            JsonValue::Null => PortableValue::Null,
            JsonValue::Bool(b) => PortableValue::Boolean(*b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    PortableValue::Int64(i)
                } else if n.is_u64() {
                    PortableValue::Decimal(n.to_string())
                } else {
                    PortableValue::Float64(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            JsonValue::String(s) => PortableValue::String(s.clone()),
            JsonValue::Array(items) => {
                PortableValue::Array(items.iter().map(PortableValue::from_json).collect())
            }
            JsonValue::Object(map) => PortableValue::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), PortableValue::from_json(v)))
                    .collect(),
            ),
        }
    }
}

impl Serialize for PortableValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            PortableValue::Null => serializer.serialize_unit(),
            PortableValue::Boolean(b) => serializer.serialize_bool(*b),
            PortableValue::Int8(v) => serializer.serialize_i8(*v),
            PortableValue::Int16(v) => serializer.serialize_i16(*v),
            PortableValue::Int32(v) => serializer.serialize_i32(*v),
            PortableValue::Int64(v) => serializer.serialize_i64(*v),
            PortableValue::Float32(v) if v.is_finite() => serializer.serialize_f32(*v),
            PortableValue::Float64(v) if v.is_finite() => serializer.serialize_f64(*v),
            PortableValue::Float32(v) => serializer.serialize_str(non_finite(*v as f64)),
            PortableValue::Float64(v) => serializer.serialize_str(non_finite(*v)),
            PortableValue::Decimal(s) | PortableValue::String(s) | PortableValue::Opaque(s) => {
                serializer.serialize_str(s)
            }
            PortableValue::Bytes(b) => serializer.serialize_str(&STANDARD.encode(b)),
            PortableValue::Date(d) => serializer.serialize_str(&d.format("%Y-%m-%d").to_string()),
            PortableValue::Time(t) => serializer.serialize_str(&t.format("%H:%M:%S%.f").to_string()),
            PortableValue::TimeTz(t, offset) => {
                serializer.serialize_str(&format!("{}{}", t.format("%H:%M:%S%.f"), offset))
            }
            PortableValue::Timestamp(ts) => {
                serializer.serialize_str(&ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
            }
            PortableValue::TimestampTz(ts) => {
                serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            PortableValue::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            PortableValue::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
        }
    }
}

/// JSON has no NaN or infinities, and `null` would read as SQL NULL
fn non_finite(v: f64) -> &'static str {
    if v.is_nan() {
        "NaN"
    } else if v.is_sign_positive() {
        "Infinity"
    } else {
        "-Infinity"
    }
}

impl From<bool> for PortableValue {
    fn from(v: bool) -> Self {
        PortableValue::Boolean(v)
    }
}

impl From<i32> for PortableValue {
    fn from(v: i32) -> Self {
        PortableValue::Int32(v)
    }
}

impl From<i64> for PortableValue {
    fn from(v: i64) -> Self {
        PortableValue::Int64(v)
    }
}

impl From<f64> for PortableValue {
    fn from(v: f64) -> Self {
        PortableValue::Float64(v)
    }
}

impl From<&str> for PortableValue {
    fn from(v: &str) -> Self {
        PortableValue::String(v.to_string())
    }
}

impl From<String> for PortableValue {
    fn from(v: String) -> Self {
        PortableValue::String(v)
    }
}

impl From<NaiveDate> for PortableValue {
    fn from(v: NaiveDate) -> Self {
        PortableValue::Date(v)
    }
}

impl<T: Into<PortableValue>> From<Option<T>> for PortableValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(PortableValue::Null)
    }
}

/// A single cell exactly as an engine driver delivered it.
///
/// Drivers never interpret declared types beyond what their wire protocol
/// already decodes; the converter of the engine decides the portable value.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeCell {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f32),
    Double(f64),
    /// Exact decimal digits as delivered (e.g. decoded PostgreSQL NUMERIC)
    Decimal(String),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<FixedOffset>),
    Interval { months: i32, days: i32, micros: i64 },
    Json(JsonValue),
    Array(Vec<NativeCell>),
    /// Undecoded wire bytes of a type the driver has no decoder for
    Raw(Vec<u8>),
}

impl NativeCell {
    pub fn kind(&self) -> &'static str {
        match self {
            NativeCell::Null => "null",
            NativeCell::Bool(_) => "bool",
            NativeCell::Int(_) => "int",
            NativeCell::UInt(_) => "uint",
            NativeCell::Float(_) => "float",
            NativeCell::Double(_) => "double",
            NativeCell::Decimal(_) => "decimal",
            NativeCell::Text(_) => "text",
            NativeCell::Bytes(_) => "bytes",
            NativeCell::Date(_) => "date",
            NativeCell::Time(_) => "time",
            NativeCell::Timestamp(_) => "timestamp",
            NativeCell::TimestampTz(_) => "timestamptz",
            NativeCell::Interval { .. } => "interval",
            NativeCell::Json(_) => "json",
            NativeCell::Array(_) => "array",
            NativeCell::Raw(_) => "raw",
        }
    }

    /// Cell decoded from a JSON wire format (HTTP engines)
    pub fn from_json(value: JsonValue) -> NativeCell {
        match value {
            JsonValue::Null => NativeCell::Null,
            JsonValue::Bool(b) => NativeCell::Bool(b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    NativeCell::Int(i)
                } else if let Some(u) = n.as_u64() {
                    NativeCell::UInt(u)
                } else {
                    NativeCell::Double(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            JsonValue::String(s) => NativeCell::Text(s),
            other => NativeCell::Json(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_projection() {
        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        let ts = DateTime::parse_from_rfc3339("2024-02-29T10:11:12.5+01:00").unwrap();
        let value = PortableValue::Array(vec![
            PortableValue::Int16(7),
            PortableValue::Decimal("12345678901234567890.000001".to_string()),
            PortableValue::Bytes(vec![0xde, 0xad, 0xbe, 0xef]),
            PortableValue::Date(date),
            PortableValue::TimestampTz(ts),
            PortableValue::Null,
        ]);
        assert_eq!(
            value.to_json(),
            json!([7, "12345678901234567890.000001", "3q2+7w==", "2024-02-29", "2024-02-29T10:11:12.500+01:00", null])
        );
    }

    #[test]
    fn test_utc_timestamp_uses_z_suffix() {
        let ts = DateTime::parse_from_rfc3339("2024-01-01T00:00:00+00:00").unwrap();
        assert_eq!(PortableValue::TimestampTz(ts).to_json(), json!("2024-01-01T00:00:00Z"));
    }

    #[test]
    fn test_from_json_keeps_integers() {
        let value = PortableValue::from_json(&json!({"id": 1, "score": 1.5, "big": 18446744073709551615u64}));
        let PortableValue::Map(map) = value else {
            panic!("expected a map");
        };
        assert_eq!(map["id"], PortableValue::Int64(1));
        assert_eq!(map["score"], PortableValue::Float64(1.5));
        assert_eq!(map["big"], PortableValue::Decimal("18446744073709551615".to_string()));
    }

    #[test]
    fn test_scalar_views() {
        assert_eq!(PortableValue::String("42".into()).as_i64(), Some(42));
        assert_eq!(PortableValue::String("t".into()).as_bool(), Some(true));
        assert_eq!(PortableValue::Int32(3).as_f64(), Some(3.0));
        assert_eq!(PortableValue::Float64(1.25).to_text(), "1.25");
    }

    #[test]
    fn test_non_finite_floats_are_not_null() {
        let value = PortableValue::Array(vec![
            PortableValue::Float64(f64::INFINITY),
            PortableValue::Float64(f64::NEG_INFINITY),
            PortableValue::Float32(f32::NAN),
            PortableValue::Float64(-0.5),
        ]);
        assert_eq!(value.to_json(), json!(["Infinity", "-Infinity", "NaN", -0.5]));
        assert_eq!(PortableValue::Float64(f64::NAN).to_text(), "NaN");
    }

    #[test]
    fn test_native_cell_from_json() {
        assert_eq!(NativeCell::from_json(json!(5)), NativeCell::Int(5));
        assert_eq!(NativeCell::from_json(json!("x")), NativeCell::Text("x".into()));
        assert!(matches!(NativeCell::from_json(json!([1, 2])), NativeCell::Json(_)));
    }
}
