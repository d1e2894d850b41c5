// Druid reports SQL type names in its sqlTypesHeader; values arrive as JSON
use crate::error::ConversionError;
use crate::models::{ColumnDescriptor, NativeCell, PortableValue, ZoneId};
use crate::services::converter::common::*;
use crate::services::converter::{CellConverter, ConversionContext};
use crate::services::database::Engine;

pub struct DruidConverter;

impl CellConverter for DruidConverter {
    fn engine(&self) -> Engine {
        Engine::Druid
    }

    fn convert_native(
        &self,
        column: &ColumnDescriptor,
        cell: &NativeCell,
        ctx: &ConversionContext,
    ) -> Result<Option<PortableValue>, ConversionError> {
        let ty = TypeName::parse(&column.type_name);
        if let Some(element) = ty.base.strip_suffix(" array") {
            return array(column, cell, element, |c, v| self.convert(c, v, ctx)).map(Some);
        }

        let value = match ty.base.as_str() {
            // queries run with sqlTimeZone UTC
            "timestamp" => timestamp_zoned(column, cell, ctx)?,
            "date" => druid_date(column, cell)?,
            "tinyint" => integer(column, cell, IntWidth::W8)?,
            "smallint" => integer(column, cell, IntWidth::W16)?,
            "integer" | "int" => integer(column, cell, IntWidth::W32)?,
            "bigint" => integer(column, cell, IntWidth::W64)?,
            "float" | "real" => float32(column, cell)?,
            "double" => float64(column, cell)?,
            "decimal" => decimal(column, cell)?,
            "boolean" => boolean(column, cell)?,
            "varchar" | "char" => text(column, cell)?,
            "other" | "complex" => match cell {
                NativeCell::Text(s) if serde_json::from_str::<serde_json::Value>(s).is_err() => {
                    PortableValue::String(s.clone())
                }
                _ => json(column, cell)?,
            },
            _ => return Ok(None),
        };
        Ok(Some(value))
    }
}

/// Druid renders DATE values as midnight UTC timestamps
fn druid_date(column: &ColumnDescriptor, cell: &NativeCell) -> Converted {
    let utc = ConversionContext { zone: ZoneId::utc() };
    match cell {
        NativeCell::Int(_) | NativeCell::Text(_) => match timestamp_zoned(column, cell, &utc)? {
            PortableValue::TimestampTz(dt) => Ok(PortableValue::Date(dt.date_naive())),
            other => Ok(other),
        },
        other => date(column, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn convert(type_name: &str, cell: NativeCell) -> Result<PortableValue, ConversionError> {
        let ctx = ConversionContext { zone: "America/New_York".parse().unwrap() };
        DruidConverter.convert(&ColumnDescriptor::new("c", 0, type_name), &cell, &ctx)
    }

    #[test]
    fn test_golden_time_columns() {
        assert_eq!(
            convert("TIMESTAMP", NativeCell::Text("2024-07-01T16:00:00.000Z".into())).unwrap().to_json(),
            json!("2024-07-01T12:00:00-04:00")
        );
        assert_eq!(
            convert("TIMESTAMP", NativeCell::Int(0)).unwrap().to_json(),
            json!("1969-12-31T19:00:00-05:00")
        );
        assert_eq!(
            convert("DATE", NativeCell::Text("2024-07-01T00:00:00.000Z".into())).unwrap(),
            PortableValue::Date(NaiveDate::from_ymd_opt(2024, 7, 1).unwrap())
        );
    }

    #[test]
    fn test_golden_scalars() {
        assert_eq!(convert("BIGINT", NativeCell::Int(12)).unwrap(), PortableValue::Int64(12));
        assert_eq!(convert("FLOAT", NativeCell::Double(0.5)).unwrap(), PortableValue::Float32(0.5));
        assert_eq!(convert("DOUBLE", NativeCell::Int(3)).unwrap(), PortableValue::Float64(3.0));
        assert_eq!(convert("VARCHAR", NativeCell::Text("Main".into())).unwrap(), PortableValue::from("Main"));
        assert_eq!(convert("BOOLEAN", NativeCell::Bool(false)).unwrap(), PortableValue::Boolean(false));
    }

    #[test]
    fn test_golden_arrays_and_complex() {
        assert_eq!(
            convert("BIGINT ARRAY", NativeCell::Json(json!([1, 2]))).unwrap(),
            PortableValue::Array(vec![PortableValue::Int64(1), PortableValue::Int64(2)])
        );
        assert_eq!(
            convert("OTHER", NativeCell::Json(json!({"sketch": "AQ=="}))).unwrap().to_json(),
            json!({"sketch": "AQ=="})
        );
        assert_eq!(convert("OTHER", NativeCell::Text("AgEHDA==".into())).unwrap(), PortableValue::from("AgEHDA=="));
    }
}
