use std::path::PathBuf;
use thiserror::Error;

/// Error reported by an engine driver, carrying the engine-native text.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct DriverError {
    /// Engine error code when the driver exposes one (SQLSTATE, MySQL error number, ...)
    pub code: Option<String>,
    pub message: String,
}

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    pub fn unsupported(engine: &str, operation: &str) -> Self {
        Self::new(format!("{} does not support {}", engine, operation))
    }
}

impl From<rusqlite::Error> for DriverError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(code) => DriverError::with_code(format!("{:?}", code), err.to_string()),
            None => DriverError::new(err.to_string()),
        }
    }
}

impl From<tokio_postgres::Error> for DriverError {
    fn from(err: tokio_postgres::Error) -> Self {
        if let Some(db_error) = err.as_db_error() {
            DriverError::with_code(db_error.code().code(), db_error.message())
        } else {
            DriverError::new(err.to_string())
        }
    }
}

impl From<mysql_async::Error> for DriverError {
    fn from(err: mysql_async::Error) -> Self {
        match err {
            mysql_async::Error::Server(server) => {
                DriverError::with_code(server.code.to_string(), server.message)
            }
            other => DriverError::new(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for DriverError {
    fn from(err: reqwest::Error) -> Self {
        DriverError::new(format!("HTTP request failed: {}", err))
    }
}

/// A native cell that could not be normalized into a portable value.
#[derive(Debug, Clone, Error)]
#[error("column '{column}' ({type_name}): {reason}")]
pub struct ConversionError {
    pub column: String,
    pub type_name: String,
    pub reason: String,
}

impl ConversionError {
    pub fn new(column: &str, type_name: &str, reason: impl Into<String>) -> Self {
        Self {
            column: column.to_string(),
            type_name: type_name.to_string(),
            reason: reason.into(),
        }
    }

    pub fn unsupported(column: &str, type_name: &str) -> Self {
        Self::new(column, type_name, format!("type {} is not supported", type_name))
    }
}

/// A statement rejected by the engine.
#[derive(Debug, Clone, Error)]
#[error("statement {statement_index} failed: {message}")]
pub struct ExecutionError {
    /// Zero-based position of the failing statement in the submitted SQL
    pub statement_index: usize,
    pub code: Option<String>,
    pub message: String,
    /// Whether statements before `statement_index` were committed and stay visible
    pub committed_prior: bool,
    /// Whether the invocation's transaction was rolled back
    pub rolled_back: bool,
    /// STORE spool files left in the temp directory; removing them is up to the caller
    pub spool_files: Vec<PathBuf>,
}

impl ExecutionError {
    pub fn new(statement_index: usize, error: DriverError) -> Self {
        Self {
            statement_index,
            code: error.code,
            message: error.message,
            committed_prior: false,
            rolled_back: false,
            spool_files: Vec::new(),
        }
    }
}

/// A conversion, parameter or staging failure part-way through an invocation.
///
/// Keeps the kind of the underlying error and adds where the invocation stood.
#[derive(Debug, Error)]
#[error("statement {statement_index} aborted: {source}")]
pub struct AbortedError {
    pub statement_index: usize,
    pub committed_prior: bool,
    pub rolled_back: bool,
    pub spool_files: Vec<PathBuf>,
    #[source]
    pub source: Box<BridgeError>,
}

/// Application error types
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Conversion error in statement {statement_index}: {source}")]
    Conversion {
        statement_index: usize,
        #[source]
        source: ConversionError,
    },

    #[error("Parameter error: {0}")]
    Parameter(String),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Aborted(#[from] AbortedError),

    #[error("Batch error at row {row}: {message}")]
    Batch { row: usize, message: String },

    #[error("Staging error: {0}")]
    Staging(String),

    #[error("Render error: {0}")]
    Render(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl BridgeError {
    /// Stable machine-readable code for the error kind
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::Connection(_) => "CONNECTION_ERROR",
            BridgeError::Conversion { .. } => "CONVERSION_ERROR",
            BridgeError::Parameter(_) => "PARAMETER_ERROR",
            BridgeError::Execution(_) => "EXECUTION_ERROR",
            BridgeError::Batch { .. } => "BATCH_ERROR",
            BridgeError::Staging(_) => "STAGING_ERROR",
            BridgeError::Render(_) => "RENDER_ERROR",
            BridgeError::Config(_) => "CONFIG_ERROR",
            BridgeError::Aborted(err) => err.source.code(),
        }
    }

    /// The error that stopped the invocation, unwrapped from its progress report
    pub fn cause(&self) -> &BridgeError {
        match self {
            BridgeError::Aborted(err) => err.source.cause(),
            other => other,
        }
    }

    /// Whether statements before the failing one were committed, for mid-run failures
    pub fn committed_prior(&self) -> Option<bool> {
        match self {
            BridgeError::Execution(err) => Some(err.committed_prior),
            BridgeError::Aborted(err) => Some(err.committed_prior),
            _ => None,
        }
    }

    /// STORE spool files a failed invocation left behind
    pub fn spool_files(&self) -> &[PathBuf] {
        match self {
            BridgeError::Execution(err) => &err.spool_files,
            BridgeError::Aborted(err) => &err.spool_files,
            _ => &[],
        }
    }

    /// Index of the statement the error belongs to, when it belongs to one
    pub fn statement_index(&self) -> Option<usize> {
        match self {
            BridgeError::Conversion {
                statement_index, ..
            } => Some(*statement_index),
            BridgeError::Execution(err) => Some(err.statement_index),
            BridgeError::Aborted(err) => Some(err.statement_index),
            _ => None,
        }
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Staging(err.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Staging(format!("Failed to serialize record: {}", err))
    }
}

impl From<config::ConfigError> for BridgeError {
    fn from(err: config::ConfigError) -> Self {
        BridgeError::Config(err.to_string())
    }
}

/// Failure of a scheduled trigger tick. Never escapes the tick boundary.
#[derive(Debug, Error)]
#[error("tick of trigger '{trigger_id}' failed: {source}")]
pub struct TriggerTickError {
    pub trigger_id: String,
    #[source]
    pub source: BridgeError,
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let error = BridgeError::Parameter("Missing value for :age".to_string());
        assert_eq!(error.code(), "PARAMETER_ERROR");
        assert!(error.statement_index().is_none());
    }

    #[test]
    fn test_execution_error_carries_statement_index() {
        let mut failure = ExecutionError::new(2, DriverError::with_code("42P01", "relation \"t\" does not exist"));
        failure.committed_prior = true;
        let error = BridgeError::from(failure);
        assert_eq!(error.statement_index(), Some(2));
        assert!(error.to_string().contains("does not exist"));
        match error {
            BridgeError::Execution(inner) => {
                assert_eq!(inner.code.as_deref(), Some("42P01"));
                assert!(inner.committed_prior);
                assert!(!inner.rolled_back);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_aborted_keeps_underlying_kind() {
        let error = BridgeError::from(AbortedError {
            statement_index: 1,
            committed_prior: true,
            rolled_back: false,
            spool_files: vec![PathBuf::from("/tmp/a.jsonl")],
            source: Box::new(BridgeError::Conversion {
                statement_index: 1,
                source: ConversionError::new("v", "DATE", "unexpected text value"),
            }),
        });
        assert_eq!(error.code(), "CONVERSION_ERROR");
        assert_eq!(error.statement_index(), Some(1));
        assert_eq!(error.committed_prior(), Some(true));
        assert_eq!(error.spool_files().len(), 1);
        assert!(matches!(error.cause(), BridgeError::Conversion { .. }));
        assert!(error.to_string().contains("unexpected text value"));
    }

    #[test]
    fn test_unsupported_conversion_message() {
        let error = ConversionError::unsupported("shape", "geometry");
        assert_eq!(error.reason, "type geometry is not supported");
    }
}
