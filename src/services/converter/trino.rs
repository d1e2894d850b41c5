// Trino (and Presto) type signatures as reported by the client protocol
use crate::error::ConversionError;
use crate::models::{ColumnDescriptor, NativeCell, PortableValue};
use crate::services::converter::common::*;
use crate::services::converter::{CellConverter, ConversionContext};
use crate::services::database::Engine;
use base64::{engine::general_purpose::STANDARD, Engine as _};

pub struct TrinoConverter;

impl CellConverter for TrinoConverter {
    fn engine(&self) -> Engine {
        Engine::Trino
    }

    fn convert_native(
        &self,
        column: &ColumnDescriptor,
        cell: &NativeCell,
        ctx: &ConversionContext,
    ) -> Result<Option<PortableValue>, ConversionError> {
        let ty = TypeName::parse(&column.type_name);
        let value = match ty.base.as_str() {
            "boolean" => boolean(column, cell)?,
            "tinyint" => integer(column, cell, IntWidth::W8)?,
            "smallint" => integer(column, cell, IntWidth::W16)?,
            "integer" => integer(column, cell, IntWidth::W32)?,
            "bigint" => integer(column, cell, IntWidth::W64)?,
            "real" => float32(column, cell)?,
            "double" => float64(column, cell)?,
            "decimal" => decimal(column, cell)?,
            "varchar" | "char" | "uuid" | "ipaddress" => text(column, cell)?,
            "varbinary" => match cell {
                NativeCell::Text(encoded) => STANDARD
                    .decode(encoded.trim())
                    .map(PortableValue::Bytes)
                    .map_err(|_| mismatch(column, cell))?,
                other => bytes(column, other)?,
            },
            "date" => date(column, cell)?,
            "time" => time(column, cell)?,
            "time with time zone" => time_tz(column, cell)?,
            "timestamp" => timestamp_local(column, cell, ctx)?,
            "timestamp with time zone" => timestamp_zoned(column, cell, ctx)?,
            "interval day to second" | "interval year to month" => interval(column, cell)?,
            "json" => json(column, cell)?,
            "array" => {
                let element = ty.args.clone().unwrap_or_default();
                array(column, cell, &element, |c, v| self.convert(c, v, ctx))?
            }
            "map" | "row" => match cell {
                NativeCell::Json(_) => json(column, cell)?,
                _ => return Err(mismatch(column, cell)),
            },
            "geometry" | "sphericalgeography" | "hyperloglog" | "qdigest" => return Err(unsupported(column)),
            _ => return Ok(None),
        };
        Ok(Some(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn convert(type_name: &str, cell: NativeCell) -> Result<PortableValue, ConversionError> {
        TrinoConverter.convert(&ColumnDescriptor::new("c", 0, type_name), &cell, &ConversionContext::default())
    }

    #[test]
    fn test_golden_trino() {
        assert_eq!(convert("tinyint", NativeCell::Int(-8)).unwrap(), PortableValue::Int8(-8));
        assert_eq!(convert("varbinary", NativeCell::Text("AQI=".into())).unwrap(), PortableValue::Bytes(vec![1, 2]));
        assert_eq!(
            convert("timestamp(3) with time zone", NativeCell::Text("2024-01-01 01:00:00.000 Europe/Paris".into()))
                .unwrap()
                .to_json(),
            json!("2024-01-01T00:00:00Z")
        );
        assert_eq!(
            convert("time(3) with time zone", NativeCell::Text("10:00:00.000+05:00".into())).unwrap().to_json(),
            json!("10:00:00+05:00")
        );
        assert_eq!(
            convert("interval day to second", NativeCell::Text("1 00:00:00.000".into())).unwrap(),
            PortableValue::from("P1D")
        );
        assert_eq!(
            convert("array(bigint)", NativeCell::Json(json!([1, null]))).unwrap(),
            PortableValue::Array(vec![PortableValue::Int64(1), PortableValue::Null])
        );
        assert_eq!(
            convert("row(a integer, b varchar)", NativeCell::Json(json!([1, "x"]))).unwrap().to_json(),
            json!([1, "x"])
        );
        assert!(convert("geometry", NativeCell::Text("POINT (1 2)".into())).is_err());
    }
}
