use crate::error::ConversionError;
use crate::models::{ColumnDescriptor, NativeCell, PortableValue};
use crate::services::converter::common::*;
use crate::services::converter::{CellConverter, ConversionContext};
use crate::services::database::Engine;

pub struct OracleConverter;

impl CellConverter for OracleConverter {
    fn engine(&self) -> Engine {
        Engine::Oracle
    }

    fn convert_native(
        &self,
        column: &ColumnDescriptor,
        cell: &NativeCell,
        ctx: &ConversionContext,
    ) -> Result<Option<PortableValue>, ConversionError> {
        let ty = TypeName::parse(&column.type_name);
        let value = match ty.base.as_str() {
            "number" | "integer" | "float" => decimal(column, cell)?,
            "binary_float" => float32(column, cell)?,
            "binary_double" => float64(column, cell)?,
            "varchar2" | "nvarchar2" | "char" | "nchar" | "clob" | "nclob" | "long" | "rowid" | "urowid" => {
                text(column, cell)?
            }
            "blob" | "raw" | "long raw" => bytes(column, cell)?,
            // DATE carries a time of day
            "date" | "timestamp" => timestamp_local(column, cell, ctx)?,
            "timestamp with time zone" | "timestamp with local time zone" => timestamp_zoned(column, cell, ctx)?,
            "interval day to second" | "interval year to month" => interval(column, cell)?,
            "json" => json(column, cell)?,
            "boolean" => boolean(column, cell)?,
            "sdo_geometry" | "mdsys.sdo_geometry" | "bfile" => return Err(unsupported(column)),
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
        OracleConverter.convert(&ColumnDescriptor::new("c", 0, type_name), &cell, &ConversionContext::default())
    }

    #[test]
    fn test_golden_oracle() {
        assert_eq!(
            convert("NUMBER(10,2)", NativeCell::Decimal("12.30".into())).unwrap(),
            PortableValue::Decimal("12.30".into())
        );
        assert_eq!(convert("NUMBER", NativeCell::Int(7)).unwrap(), PortableValue::Decimal("7".into()));
        assert_eq!(convert("BINARY_DOUBLE", NativeCell::Double(1.5)).unwrap(), PortableValue::Float64(1.5));
        assert_eq!(convert("VARCHAR2(30)", NativeCell::Text("x".into())).unwrap(), PortableValue::from("x"));
        let wall = NaiveDate::from_ymd_opt(2023, 12, 31).unwrap().and_hms_opt(23, 59, 59).unwrap();
        assert_eq!(convert("DATE", NativeCell::Timestamp(wall)).unwrap().to_json(), json!("2023-12-31T23:59:59Z"));
        assert_eq!(
            convert("INTERVAL DAY(2) TO SECOND(6)", NativeCell::Text("+02 00:00:10.000000".into())).unwrap(),
            PortableValue::from("P2DT10S")
        );
        assert_eq!(
            convert("INTERVAL YEAR(2) TO MONTH", NativeCell::Text("+01-06".into())).unwrap(),
            PortableValue::from("P1Y6M")
        );
        assert!(convert("SDO_GEOMETRY", NativeCell::Raw(vec![0])).is_err());
    }
}
