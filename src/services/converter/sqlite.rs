// SQLite columns carry whatever the declared type suggests; storage classes win
// when a value does not fit its column affinity.
use crate::error::ConversionError;
use crate::models::{ColumnDescriptor, NativeCell, PortableValue};
use crate::services::converter::common::*;
use crate::services::converter::{CellConverter, ConversionContext};
use crate::services::database::Engine;

pub struct SqliteConverter;

impl CellConverter for SqliteConverter {
    fn engine(&self) -> Engine {
        Engine::Sqlite
    }

    fn convert_native(
        &self,
        column: &ColumnDescriptor,
        cell: &NativeCell,
        ctx: &ConversionContext,
    ) -> Result<Option<PortableValue>, ConversionError> {
        let ty = TypeName::parse(&column.type_name);
        let base = ty.base.as_str();

        let value = match (base, cell) {
            ("boolean" | "bool", NativeCell::Int(_) | NativeCell::Text(_)) => boolean(column, cell)?,
            ("date", NativeCell::Text(_)) => date(column, cell)?,
            ("datetime" | "timestamp", NativeCell::Text(_) | NativeCell::Int(_)) => {
                timestamp_local(column, cell, ctx)?
            }
            ("json", NativeCell::Text(_)) => json(column, cell)?,
            ("decimal" | "numeric", NativeCell::Int(_) | NativeCell::Double(_) | NativeCell::Text(_)) => {
                match decimal(column, cell) {
                    Ok(value) => value,
                    Err(_) => return Ok(None),
                }
            }
            // affinity rules, in SQLite's own precedence
            (base, NativeCell::Int(_)) if base.contains("int") => integer(column, cell, IntWidth::W64)?,
            (base, NativeCell::Text(_)) if ["char", "clob", "text"].iter().any(|t| base.contains(t)) => {
                text(column, cell)?
            }
            (base, NativeCell::Bytes(_)) if base.contains("blob") => bytes(column, cell)?,
            (base, NativeCell::Double(_) | NativeCell::Int(_))
                if ["real", "floa", "doub"].iter().any(|t| base.contains(t)) =>
            {
                float64(column, cell)?
            }
            _ => return Ok(None),
        };
        Ok(Some(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn convert(type_name: &str, cell: NativeCell) -> Result<PortableValue, ConversionError> {
        SqliteConverter.convert(
            &ColumnDescriptor::new("c", 0, type_name),
            &cell,
            &ConversionContext::default(),
        )
    }

    #[test]
    fn test_golden_affinity() {
        assert_eq!(convert("INTEGER", NativeCell::Int(42)).unwrap(), PortableValue::Int64(42));
        assert_eq!(convert("VARCHAR(20)", NativeCell::Text("x".into())).unwrap(), PortableValue::from("x"));
        assert_eq!(convert("REAL", NativeCell::Int(2)).unwrap(), PortableValue::Float64(2.0));
        assert_eq!(convert("BLOB", NativeCell::Bytes(vec![7])).unwrap(), PortableValue::Bytes(vec![7]));
        // expression columns have no declared type
        assert_eq!(convert("", NativeCell::Int(1)).unwrap(), PortableValue::Int64(1));
        assert_eq!(convert("", NativeCell::Double(0.5)).unwrap(), PortableValue::Float64(0.5));
    }

    #[test]
    fn test_storage_class_wins_over_affinity() {
        assert_eq!(convert("INTEGER", NativeCell::Text("abc".into())).unwrap(), PortableValue::from("abc"));
        assert_eq!(convert("TEXT", NativeCell::Int(3)).unwrap(), PortableValue::Int64(3));
    }

    #[test]
    fn test_golden_declared_types() {
        assert_eq!(convert("BOOLEAN", NativeCell::Int(0)).unwrap(), PortableValue::Boolean(false));
        assert_eq!(
            convert("DATE", NativeCell::Text("2024-02-29".into())).unwrap(),
            PortableValue::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap())
        );
        assert_eq!(
            convert("DATETIME", NativeCell::Text("2024-02-29 13:00:00".into())).unwrap().to_json(),
            json!("2024-02-29T13:00:00Z")
        );
        assert_eq!(
            convert("JSON", NativeCell::Text(r#"{"a":1}"#.into())).unwrap().to_json(),
            json!({"a": 1})
        );
        assert_eq!(
            convert("NUMERIC(10,2)", NativeCell::Text("10.25".into())).unwrap(),
            PortableValue::Decimal("10.25".into())
        );
        assert_eq!(convert("NUMERIC", NativeCell::Text("n/a".into())).unwrap(), PortableValue::from("n/a"));
    }
}
