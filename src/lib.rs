//! Move tabular data between a relational database, delimited flat files, and
//! spreadsheet workbooks.
//!
//! A [`TransferEngine`] owns two connections to one logical database (a
//! row-streaming primary connection and a cursor connection that returns whole
//! result sets) plus at most one open workbook. Query results stream into flat
//! files or sheets; external files and sheets bulk-load into tables, optionally
//! validated against the destination column types.
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use tabular_bridge::prelude::*;
//!
//! # async fn demo() -> Result<(), TransferError> {
//! let mut engine = TransferEngine::new(
//!     Arc::new(SqliteServer::new()),
//!     Arc::new(XlsxHostFactory::new()),
//!     EngineConfig::default(),
//! );
//! engine.connect(ConnectionProfile::integrated("/var/data", "sales")).await?;
//! engine
//!     .write_query_to_file("SELECT * FROM orders", &[], Path::new("orders.txt"), Delimiter::PIPE)
//!     .await?;
//! # Ok(()) }
//! ```

pub mod backend;
pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod executor;
pub mod export;
pub mod ingest;
pub mod prelude;
pub mod results;
pub mod schema;
pub mod sheets;
pub mod types;

pub use config::{ConnectionProfile, Credentials, EngineConfig, ProfileBuilder};
pub use connection::ConnectionManager;
pub use engine::TransferEngine;
pub use error::TransferError;
pub use executor::StatementExecutor;
pub use results::{DbRow, ResultSet};
pub use types::{ConnectionKind, DeclaredType, Param, RowValues};

#[cfg(feature = "mssql")]
pub use backend::mssql::MssqlServer;
#[cfg(feature = "sqlite")]
pub use backend::sqlite::SqliteServer;
