use crate::error::ConversionError;
use crate::models::{ColumnDescriptor, NativeCell, PortableValue};
use crate::services::converter::common::*;
use crate::services::converter::{CellConverter, ConversionContext};
use crate::services::database::Engine;

pub struct SqlServerConverter;

impl CellConverter for SqlServerConverter {
    fn engine(&self) -> Engine {
        Engine::SqlServer
    }

    fn convert_native(
        &self,
        column: &ColumnDescriptor,
        cell: &NativeCell,
        ctx: &ConversionContext,
    ) -> Result<Option<PortableValue>, ConversionError> {
        let ty = TypeName::parse(&column.type_name);
        let value = match ty.base.as_str() {
            "bit" => boolean(column, cell)?,
            // tinyint is unsigned (0..255)
            "tinyint" | "smallint" => integer(column, cell, IntWidth::W16)?,
            "int" => integer(column, cell, IntWidth::W32)?,
            "bigint" => integer(column, cell, IntWidth::W64)?,
            "real" => float32(column, cell)?,
            "float" => float64(column, cell)?,
            "decimal" | "numeric" | "money" | "smallmoney" => decimal(column, cell)?,
            "char" | "varchar" | "nchar" | "nvarchar" | "text" | "ntext" | "uniqueidentifier" | "xml"
            | "sysname" => text(column, cell)?,
            // timestamp is the legacy name of rowversion, not a point in time
            "binary" | "varbinary" | "image" | "timestamp" | "rowversion" => bytes(column, cell)?,
            "date" => date(column, cell)?,
            "time" => time(column, cell)?,
            "datetime" | "datetime2" | "smalldatetime" => timestamp_local(column, cell, ctx)?,
            "datetimeoffset" => timestamp_zoned(column, cell, ctx)?,
            "geometry" | "geography" | "hierarchyid" => return Err(unsupported(column)),
            _ => return Ok(None),
        };
        Ok(Some(value))
    }
}
