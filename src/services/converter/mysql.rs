use crate::error::ConversionError;
use crate::models::{ColumnDescriptor, NativeCell, PortableValue};
use crate::services::converter::common::*;
use crate::services::converter::{CellConverter, ConversionContext};
use crate::services::database::Engine;

pub struct MySqlConverter {
    engine: Engine,
}

pub static MYSQL: MySqlConverter = MySqlConverter { engine: Engine::MySql };
pub static MARIADB: MySqlConverter = MySqlConverter { engine: Engine::MariaDb };

impl CellConverter for MySqlConverter {
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
        let value = match ty.base.as_str() {
            "tinyint" if ty.args.as_deref() == Some("1") => boolean(column, cell)?,
            "bool" | "boolean" => boolean(column, cell)?,
            // BIT(1) arrives as a single byte
            "bit" if matches!(cell, NativeCell::Bytes(b) if b.len() == 1 && b[0] <= 1) => boolean(column, cell)?,
            "bit" => bytes(column, cell)?,
            "tinyint" => integer(column, cell, IntWidth::W8)?,
            "tinyint unsigned" | "smallint" | "year" => integer(column, cell, IntWidth::W16)?,
            "smallint unsigned" | "mediumint" | "mediumint unsigned" | "int" | "integer" => {
                integer(column, cell, IntWidth::W32)?
            }
            "int unsigned" | "integer unsigned" | "bigint" | "bigint unsigned" => {
                integer(column, cell, IntWidth::W64)?
            }
            "float" | "float unsigned" => float32(column, cell)?,
            "double" | "double unsigned" | "real" | "double precision" => float64(column, cell)?,
            "decimal" | "decimal unsigned" | "numeric" | "dec" | "fixed" => decimal(column, cell)?,
            "char" | "varchar" | "tinytext" | "text" | "mediumtext" | "longtext" | "enum" | "set" => {
                text(column, cell)?
            }
            "binary" | "varbinary" | "tinyblob" | "blob" | "mediumblob" | "longblob" => bytes(column, cell)?,
            "date" => date(column, cell)?,
            // TIME is a signed duration that may exceed 24 hours
            "time" => match cell {
                NativeCell::Interval { .. } => interval(column, cell)?,
                _ => time(column, cell)?,
            },
            "datetime" => timestamp_local(column, cell, ctx)?,
            // the session runs in UTC, so TIMESTAMP values are UTC instants
            "timestamp" => timestamp_zoned(column, cell, ctx)?,
            "json" => json(column, cell)?,
            "geometry" | "point" | "linestring" | "polygon" | "multipoint" | "multilinestring"
            | "multipolygon" | "geometrycollection" => return Err(unsupported(column)),
            "null" => PortableValue::Null,
            _ => return Ok(None),
        };
        Ok(Some(value))
    }
}
