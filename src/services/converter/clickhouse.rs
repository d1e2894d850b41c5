// ClickHouse type names, including Nullable/LowCardinality wrappers and
// parameterised DateTime zones
use crate::error::ConversionError;
use crate::models::{ColumnDescriptor, NativeCell, PortableValue, ZoneId};
use crate::services::converter::common::*;
use crate::services::converter::{CellConverter, ConversionContext};
use crate::services::database::Engine;

pub struct ClickHouseConverter;

impl CellConverter for ClickHouseConverter {
    fn engine(&self) -> Engine {
        Engine::ClickHouse
    }

    fn convert_native(
        &self,
        column: &ColumnDescriptor,
        cell: &NativeCell,
        ctx: &ConversionContext,
    ) -> Result<Option<PortableValue>, ConversionError> {
        let ty = TypeName::parse(&column.type_name);
        let value = match ty.base.as_str() {
            "int8" => integer(column, cell, IntWidth::W8)?,
            "int16" | "uint8" => integer(column, cell, IntWidth::W16)?,
            "int32" | "uint16" => integer(column, cell, IntWidth::W32)?,
            // 64-bit unsigned and wider integers fall back to exact decimal text
            "int64" | "uint32" | "uint64" | "int128" | "uint128" | "int256" | "uint256" => {
                integer(column, cell, IntWidth::W64)?
            }
            "float32" => float32(column, cell)?,
            "float64" => float64(column, cell)?,
            "decimal" | "decimal32" | "decimal64" | "decimal128" | "decimal256" => decimal(column, cell)?,
            "bool" | "boolean" => boolean(column, cell)?,
            "string" | "fixedstring" | "uuid" | "enum" | "enum8" | "enum16" | "ipv4" | "ipv6" => {
                text(column, cell)?
            }
            "date" | "date32" => date(column, cell)?,
            "datetime" | "datetime64" => match column_zone(&ty) {
                Some(zone) => timestamp_in_zone(column, cell, &zone, ctx)?,
                None => timestamp_local(column, cell, ctx)?,
            },
            "array" => {
                let element = ty.args.clone().unwrap_or_default();
                array(column, cell, &element, |c, v| self.convert(c, v, ctx))?
            }
            "tuple" => tuple(column, cell, &ty.arg_list(), |c, v| self.convert(c, v, ctx))?,
            "map" | "json" | "object" => json(column, cell)?,
            "nothing" => PortableValue::Null,
            "point" | "ring" | "linestring" | "multilinestring" | "polygon" | "multipolygon" => {
                return Err(unsupported(column))
            }
            _ => return Ok(None),
        };
        Ok(Some(value))
    }
}

/// Zone argument of `DateTime('Zone')` / `DateTime64(p, 'Zone')`
fn column_zone(ty: &TypeName) -> Option<ZoneId> {
    ty.arg_list()
        .iter()
        .find_map(|arg| arg.strip_prefix('\'').and_then(|a| a.strip_suffix('\'')).map(str::to_string))
        .and_then(|zone| zone.parse().ok())
}

/// Tuple elements each carry their own type
fn tuple<F>(column: &ColumnDescriptor, cell: &NativeCell, element_types: &[String], convert: F) -> Converted
where
    F: Fn(&ColumnDescriptor, &NativeCell) -> Converted,
{
    let items: Vec<NativeCell> = match cell {
        NativeCell::Array(items) => items.clone(),
        NativeCell::Json(serde_json::Value::Array(items)) => items.iter().cloned().map(NativeCell::from_json).collect(),
        _ => return Err(mismatch(column, cell)),
    };
    if items.len() != element_types.len() {
        return Err(mismatch(column, cell));
    }
    items
        .iter()
        .zip(element_types)
        .map(|(item, element_type)| match item {
            NativeCell::Null => Ok(PortableValue::Null),
            item => convert(&column.element_of(unnamed(element_type)), item),
        })
        .collect::<Result<Vec<_>, _>>()
        .map(PortableValue::Array)
}

/// Strips the element name of a named tuple: `id UInt32` -> `UInt32`
fn unnamed(declared: &str) -> &str {
    match (declared.find(' '), declared.find('(')) {
        (Some(space), paren) if paren.map_or(true, |p| space < p) => declared[space + 1..].trim(),
        _ => declared,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn convert(type_name: &str, cell: NativeCell) -> Result<PortableValue, ConversionError> {
        ClickHouseConverter.convert(
            &ColumnDescriptor::new("c", 0, type_name),
            &cell,
            &ConversionContext::default(),
        )
    }

    #[test]
    fn test_golden_integers() {
        assert_eq!(convert("UInt8", NativeCell::Int(255)).unwrap(), PortableValue::Int16(255));
        assert_eq!(convert("Nullable(Int32)", NativeCell::Int(-1)).unwrap(), PortableValue::Int32(-1));
        // 64-bit integers arrive quoted in JSON output formats
        assert_eq!(convert("Int64", NativeCell::Text("9000000000".into())).unwrap(), PortableValue::Int64(9_000_000_000));
        assert_eq!(
            convert("UInt64", NativeCell::Text("18446744073709551615".into())).unwrap(),
            PortableValue::Decimal("18446744073709551615".into())
        );
        assert!(convert("Int8", NativeCell::Int(128)).is_err());
    }

    #[test]
    fn test_golden_datetimes() {
        assert_eq!(
            convert("DateTime", NativeCell::Text("2024-03-01 09:00:00".into())).unwrap().to_json(),
            json!("2024-03-01T09:00:00Z")
        );
        assert_eq!(
            convert("DateTime('Asia/Tokyo')", NativeCell::Text("2024-03-01 09:00:00".into())).unwrap().to_json(),
            json!("2024-03-01T00:00:00Z")
        );
        assert_eq!(
            convert("DateTime64(3, 'Asia/Tokyo')", NativeCell::Text("2024-03-01 09:00:00.250".into()))
                .unwrap()
                .to_json(),
            json!("2024-03-01T00:00:00.250Z")
        );
    }

    #[test]
    fn test_golden_composites() {
        assert_eq!(
            convert("Array(Nullable(UInt8))", NativeCell::Json(json!([1, null]))).unwrap(),
            PortableValue::Array(vec![PortableValue::Int16(1), PortableValue::Null])
        );
        assert_eq!(
            convert("Tuple(String, Int8)", NativeCell::Json(json!(["a", 1]))).unwrap(),
            PortableValue::Array(vec![PortableValue::from("a"), PortableValue::Int8(1)])
        );
        assert_eq!(
            convert("Tuple(name String, id UInt32)", NativeCell::Json(json!(["a", 7]))).unwrap(),
            PortableValue::Array(vec![PortableValue::from("a"), PortableValue::Int64(7)])
        );
        assert_eq!(
            convert("Map(String, UInt64)", NativeCell::Json(json!({"k": 1}))).unwrap().to_json(),
            json!({"k": 1})
        );
        assert_eq!(convert("LowCardinality(String)", NativeCell::Text("x".into())).unwrap(), PortableValue::from("x"));
    }

    #[test]
    fn test_geo_types_fail() {
        assert!(convert("Point", NativeCell::Json(json!([1.0, 2.0]))).is_err());
        assert_eq!(convert("Nothing", NativeCell::Text("".into())).unwrap(), PortableValue::Null);
    }
}
