// Connection trait every engine driver implements
use crate::error::{BridgeError, DriverError};
use crate::models::{ColumnDescriptor, FetchSize, NativeCell, Parameters, PortableValue};
use crate::services::database::Engine;

/// Whether the sink wants further rows of the current result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkControl {
    Continue,
    /// Remaining rows of the current result are consumed without being delivered
    Stop,
}

/// Receives the results of a statement batch, one result at a time.
///
/// For each result the driver calls `begin_result`, then `push_row` per
/// row (unless a row-less statement), then `end_result` with the update
/// count the engine reported, if any.
pub trait ResultSink {
    fn begin_result(&mut self, columns: Vec<ColumnDescriptor>) -> Result<(), BridgeError>;

    fn push_row(&mut self, cells: Vec<NativeCell>) -> Result<SinkControl, BridgeError>;

    fn end_result(&mut self, affected_rows: Option<u64>) -> Result<(), BridgeError>;
}

/// SQL plus the values for its `:name` placeholders
#[derive(Debug, Clone)]
pub struct ExecuteRequest<'a> {
    pub sql: &'a str,
    pub parameters: &'a Parameters,
    pub fetch_size: FetchSize,
}

/// Failure while a batch was executing
#[derive(Debug)]
pub enum ExecuteError {
    /// The engine rejected a statement
    Driver(DriverError),
    /// The sink refused a result (conversion, staging)
    Aborted(BridgeError),
}

impl From<DriverError> for ExecuteError {
    fn from(err: DriverError) -> Self {
        ExecuteError::Driver(err)
    }
}

impl From<BridgeError> for ExecuteError {
    fn from(err: BridgeError) -> Self {
        ExecuteError::Aborted(err)
    }
}

/// Bulk insert failure, `offset` being the row of the chunk the engine rejected
#[derive(Debug)]
pub struct BatchFailure {
    pub offset: usize,
    pub error: DriverError,
}

/// One prepared statement executed row by row
#[async_trait::async_trait]
pub trait RowExecutor: Send {
    async fn execute_row(&mut self, row: &[PortableValue]) -> Result<u64, DriverError>;
}

/// Sends the rows in order and stops at the first one the engine rejects,
/// so no row after it is ever written
pub async fn execute_rows_in_order(
    executor: &mut dyn RowExecutor,
    rows: &[Vec<PortableValue>],
) -> Result<u64, BatchFailure> {
    let mut written = 0;
    for (offset, row) in rows.iter().enumerate() {
        written += executor
            .execute_row(row)
            .await
            .map_err(|error| BatchFailure { offset, error })?;
    }
    Ok(written)
}

/// A live connection owned by one invocation
#[async_trait::async_trait]
pub trait Connection: Send {
    fn engine(&self) -> Engine;

    /// Runs every statement of `request.sql`, feeding each result to `sink`
    async fn execute(
        &mut self,
        request: &ExecuteRequest<'_>,
        sink: &mut (dyn ResultSink + Send),
    ) -> Result<(), ExecuteError>;

    async fn begin(&mut self) -> Result<(), DriverError>;

    async fn commit(&mut self) -> Result<(), DriverError>;

    async fn rollback(&mut self) -> Result<(), DriverError>;

    /// Current autocommit setting, `None` when the engine has no toggle
    async fn auto_commit(&mut self) -> Result<Option<bool>, DriverError> {
        Ok(None)
    }

    async fn set_auto_commit(&mut self, _enabled: bool) -> Result<(), DriverError> {
        Err(DriverError::unsupported(self.engine().as_str(), "autocommit toggling"))
    }

    /// Executes `sql` (with `?` placeholders) once per row, returning the rows written
    async fn execute_batch(
        &mut self,
        sql: &str,
        rows: &[Vec<PortableValue>],
    ) -> Result<u64, BatchFailure>;

    async fn close(self: Box<Self>) -> Result<(), DriverError>;
}
