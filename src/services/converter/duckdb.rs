use crate::error::ConversionError;
use crate::models::{ColumnDescriptor, NativeCell, PortableValue};
use crate::services::converter::common::*;
use crate::services::converter::{CellConverter, ConversionContext};
use crate::services::database::Engine;

pub struct DuckDbConverter;

impl CellConverter for DuckDbConverter {
    fn engine(&self) -> Engine {
        Engine::DuckDb
    }

    fn convert_native(
        &self,
        column: &ColumnDescriptor,
        cell: &NativeCell,
        ctx: &ConversionContext,
    ) -> Result<Option<PortableValue>, ConversionError> {
        let ty = TypeName::parse(&column.type_name);
        let value = match ty.base.as_str() {
            "tinyint" | "int1" => integer(column, cell, IntWidth::W8)?,
            "smallint" | "int2" | "utinyint" => integer(column, cell, IntWidth::W16)?,
            "integer" | "int" | "int4" | "usmallint" => integer(column, cell, IntWidth::W32)?,
            "bigint" | "int8" | "uinteger" | "ubigint" | "hugeint" | "uhugeint" => integer(column, cell, IntWidth::W64)?,
            "float" | "real" | "float4" => float32(column, cell)?,
            "double" | "float8" => float64(column, cell)?,
            "decimal" | "numeric" => decimal(column, cell)?,
            "boolean" | "bool" => boolean(column, cell)?,
            "varchar" | "text" | "string" | "uuid" | "enum" | "bit" => text(column, cell)?,
            "blob" | "bytea" => bytes(column, cell)?,
            "date" => date(column, cell)?,
            "time" => time(column, cell)?,
            "timetz" | "time with time zone" => time_tz(column, cell)?,
            "timestamp" | "datetime" | "timestamp_s" | "timestamp_ms" | "timestamp_ns" => {
                timestamp_local(column, cell, ctx)?
            }
            "timestamptz" | "timestamp with time zone" => timestamp_zoned(column, cell, ctx)?,
            "interval" => interval(column, cell)?,
            "json" => json(column, cell)?,
            "array" | "list" => {
                let element = ty.args.clone().unwrap_or_default();
                array(column, cell, &element, |c, v| self.convert(c, v, ctx))?
            }
            "struct" | "map" | "union" => json(column, cell)?,
            _ => return Ok(None),
        };
        Ok(Some(value))
    }
}
