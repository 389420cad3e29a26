//! Convenient imports for common functionality.
//!
//! This module re-exports the most commonly used types and functions
//! to make it easier to get started with the library.

pub use crate::backend::{
    BoxCursor, BulkCopyChannel, BulkCopyOptions, RelationalServer, RowCursor, Session,
    StatementInterrupt,
};
pub use crate::config::{ConnectionProfile, Credentials, EngineConfig, ProfileBuilder};
pub use crate::connection::ConnectionManager;
pub use crate::engine::TransferEngine;
pub use crate::error::TransferError;
pub use crate::executor::StatementExecutor;
pub use crate::export::{
    Delimiter, DelimiterPreset, ExportSink, ExportSummary, TabularExporter, write_delimited,
};
pub use crate::ingest::{
    BulkLoader, DelimitedOptions, DelimitedTextSource, ExternalSource, LoadRequest, LoadSummary,
    ValidatingRowAdapter, WorkbookSource,
};
pub use crate::results::{DbRow, ResultSet, ResultSetCursor};
pub use crate::schema::{ColumnMapping, DestinationTableSchema, MappingMode, TableColumn};
pub use crate::sheets::{
    CellRef, DocumentSession, FileFormat, HeaderStyle, HostFactory, SheetManager, SheetRef,
    Workbook, XlsxHostFactory,
};
pub use crate::types::{ConnectionKind, DeclaredType, Param, RowValues, parse_timestamp};

#[cfg(feature = "mssql")]
pub use crate::backend::mssql::MssqlServer;
#[cfg(feature = "sqlite")]
pub use crate::backend::sqlite::SqliteServer;
