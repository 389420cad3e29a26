use thiserror::Error;

#[cfg(feature = "sqlite")]
use rusqlite;
#[cfg(feature = "mssql")]
use tiberius;

use crate::types::{ConnectionKind, DeclaredType};

#[derive(Debug, Error)]
pub enum TransferError {
    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    SqliteError(#[from] rusqlite::Error),

    #[cfg(feature = "mssql")]
    #[error(transparent)]
    MssqlError(#[from] tiberius::error::Error),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Not connected to a database ({0} connection); connect first")]
    NotConnected(ConnectionKind),

    #[error("Procedure `{procedure}` failed: {reason}")]
    ProcedureError { procedure: String, reason: String },

    #[error("Schema mismatch on `{table}`.`{column}`: {reason}")]
    SchemaMismatch {
        table: String,
        column: String,
        reason: String,
    },

    #[error("Row {row}, column `{column}`: cannot convert {value:?} to {target}")]
    TypeCoercion {
        row: usize,
        column: String,
        value: String,
        target: DeclaredType,
    },

    #[error("Bulk load into `{table}` failed: {source}")]
    BulkLoad {
        table: String,
        #[source]
        source: Box<TransferError>,
    },

    #[error("Failed writing `{target}`: {source}")]
    ExportIo {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Statement returned no result set; send a query that returns rows")]
    NoResultSet,

    #[error("No workbook is open")]
    NoWorkbook,

    #[error("Document host error: {0}")]
    HostError(String),

    #[error("External source error: {0}")]
    SourceError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("SQL execution error: {0}")]
    ExecutionError(String),
}

impl TransferError {
    /// Strip `BulkLoad` wrappers and return the error that actually stopped the copy.
    #[must_use]
    pub fn root_cause(&self) -> &TransferError {
        match self {
            TransferError::BulkLoad { source, .. } => source.root_cause(),
            other => other,
        }
    }

    pub(crate) fn bulk_load(table: &str, cause: TransferError) -> Self {
        TransferError::BulkLoad {
            table: table.to_string(),
            source: Box::new(cause),
        }
    }
}

impl From<serde_json::Error> for TransferError {
    fn from(err: serde_json::Error) -> Self {
        TransferError::ConfigError(err.to_string())
    }
}

impl From<csv::Error> for TransferError {
    fn from(err: csv::Error) -> Self {
        TransferError::SourceError(format!("delimited text: {err}"))
    }
}

impl From<calamine::Error> for TransferError {
    fn from(err: calamine::Error) -> Self {
        TransferError::SourceError(format!("workbook: {err}"))
    }
}

impl From<rust_xlsxwriter::XlsxError> for TransferError {
    fn from(err: rust_xlsxwriter::XlsxError) -> Self {
        TransferError::HostError(err.to_string())
    }
}
