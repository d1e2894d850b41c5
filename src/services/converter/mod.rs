// Per-engine cell conversion into portable values
pub mod clickhouse;
pub mod common;
pub mod druid;
pub mod duckdb;
pub mod mysql;
pub mod oracle;
pub mod postgresql;
pub mod snowflake;
pub mod sqlite;
pub mod sqlserver;
pub mod trino;

use crate::error::ConversionError;
use crate::models::{ColumnDescriptor, NativeCell, PortableValue, ZoneId};
use crate::services::database::Engine;

/// Settings fixed for the whole invocation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConversionContext {
    pub zone: ZoneId,
}

/// Turns native cells of one engine into portable values.
///
/// Conversions are selected by declared type name, never by the Rust type a
/// driver happened to decode into. Implementations are pure.
pub trait CellConverter: Send + Sync {
    fn engine(&self) -> Engine;

    /// Engine-specific conversion; `Ok(None)` defers to the shared baseline
    fn convert_native(
        &self,
        column: &ColumnDescriptor,
        cell: &NativeCell,
        ctx: &ConversionContext,
    ) -> Result<Option<PortableValue>, ConversionError>;

    fn convert(
        &self,
        column: &ColumnDescriptor,
        cell: &NativeCell,
        ctx: &ConversionContext,
    ) -> Result<PortableValue, ConversionError> {
        if let NativeCell::Null = cell {
            return Ok(PortableValue::Null);
        }
        match self.convert_native(column, cell, ctx)? {
            Some(value) => Ok(value),
            None => common::baseline(column, cell),
        }
    }
}

/// Converter table, one entry per engine
pub fn converter_for(engine: Engine) -> &'static dyn CellConverter {
    match engine {
        Engine::PostgreSql => &postgresql::POSTGRESQL,
        Engine::Redshift => &postgresql::REDSHIFT,
        Engine::MySql => &mysql::MYSQL,
        Engine::MariaDb => &mysql::MARIADB,
        Engine::Sqlite => &sqlite::SqliteConverter,
        Engine::Druid => &druid::DruidConverter,
        Engine::ClickHouse => &clickhouse::ClickHouseConverter,
        Engine::DuckDb => &duckdb::DuckDbConverter,
        Engine::Oracle => &oracle::OracleConverter,
        Engine::SqlServer => &sqlserver::SqlServerConverter,
        Engine::Snowflake => &snowflake::SnowflakeConverter,
        Engine::Trino => &trino::TrinoConverter,
    }
}
