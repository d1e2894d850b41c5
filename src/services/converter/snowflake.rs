use crate::error::ConversionError;
use crate::models::{ColumnDescriptor, NativeCell, PortableValue};
use crate::services::converter::common::*;
use crate::services::converter::{CellConverter, ConversionContext};
use crate::services::database::Engine;

pub struct SnowflakeConverter;

impl CellConverter for SnowflakeConverter {
    fn engine(&self) -> Engine {
        Engine::Snowflake
    }

    fn convert_native(
        &self,
        column: &ColumnDescriptor,
        cell: &NativeCell,
        ctx: &ConversionContext,
    ) -> Result<Option<PortableValue>, ConversionError> {
        let ty = TypeName::parse(&column.type_name);
        let value = match ty.base.as_str() {
            // NUMBER defaults to NUMBER(38, 0)
            "number" | "decimal" | "numeric" => match ty.arg_list().get(1).map(|s| s.trim()) {
                None | Some("0") => integer(column, cell, IntWidth::W64)?,
                Some(_) => decimal(column, cell)?,
            },
            "int" | "integer" | "bigint" | "smallint" | "tinyint" | "byteint" | "fixed" => {
                integer(column, cell, IntWidth::W64)?
            }
            "float" | "float4" | "float8" | "double" | "double precision" | "real" => float64(column, cell)?,
            "varchar" | "string" | "text" | "char" | "character" => text(column, cell)?,
            "binary" | "varbinary" => hex_bytes(column, cell)?,
            "boolean" => boolean(column, cell)?,
            "date" => date(column, cell)?,
            "time" => time(column, cell)?,
            "timestamp" | "timestamp_ntz" | "datetime" => timestamp_local(column, cell, ctx)?,
            "timestamp_ltz" | "timestamp_tz" => timestamp_zoned(column, cell, ctx)?,
            "variant" | "object" | "array" => json(column, cell)?,
            "geography" | "geometry" => return Err(unsupported(column)),
            _ => return Ok(None),
        };
        Ok(Some(value))
    }
}

/// BINARY values are rendered as hex text
fn hex_bytes(column: &ColumnDescriptor, cell: &NativeCell) -> Converted {
    let NativeCell::Text(hex) = cell else {
        return bytes(column, cell);
    };
    let hex = hex.trim();
    if hex.len() % 2 != 0 || !hex.is_ascii() {
        return Err(mismatch(column, cell));
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16))
        .collect::<Result<Vec<_>, _>>()
        .map(PortableValue::Bytes)
        .map_err(|_| mismatch(column, cell))
}
