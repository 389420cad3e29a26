//! Relational server collaborator.
//!
//! The core talks to a database only through these traits:
//! - [`RelationalServer`]: opens sessions for a profile
//! - [`Session`]: runs statements, fetches schemas, hands out bulk-copy channels
//! - [`RowCursor`]: forward-only row stream bound to the session that produced it
//! - [`BulkCopyChannel`]: destination-bound streaming write path
//! - [`StatementInterrupt`]: stops a session's running statement from outside its borrow

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use crate::config::{ConnectionProfile, EngineConfig};
use crate::error::TransferError;
use crate::results::{DbRow, ResultSet};
use crate::schema::DestinationTableSchema;
use crate::types::{ConnectionKind, Param, RowValues};

#[cfg(feature = "mssql")]
pub mod mssql;
#[cfg(feature = "sqlite")]
pub mod sqlite;

/// Forward-only, single-pass sequence of rows.
#[async_trait]
pub trait RowCursor: Send {
    /// Column names, in row order.
    fn columns(&self) -> &Arc<Vec<String>>;

    /// Next row, or `None` once the cursor is drained.
    async fn next_row(&mut self) -> Result<Option<DbRow>, TransferError>;
}

/// A cursor that borrows whatever produced it.
pub type BoxCursor<'a> = Box<dyn RowCursor + 'a>;

/// Settings for one bulk copy.
#[derive(Debug, Clone)]
pub struct BulkCopyOptions {
    pub table: String,
    /// Destination columns, in the order values are sent.
    pub columns: Vec<String>,
    /// Rows per committed batch; 0 commits once at the end.
    pub batch_size: usize,
    pub timeout: Duration,
}

/// Streaming write path into one destination table.
///
/// Dropping a channel without calling [`BulkCopyChannel::finish`] aborts the copy.
#[async_trait]
pub trait BulkCopyChannel: Send {
    /// Queue one row, shaped like [`BulkCopyOptions::columns`].
    async fn send_row(&mut self, values: Vec<RowValues>) -> Result<(), TransferError>;

    /// Flush, commit, and report the number of rows copied.
    async fn finish(self: Box<Self>) -> Result<u64, TransferError>;

    /// Abandon the in-flight copy. Never fails.
    async fn abort(self: Box<Self>);
}

/// Stops the statement a session is running.
///
/// Obtained before the statement starts, so it stays usable after the future
/// that borrowed the session has been dropped.
#[async_trait]
pub trait StatementInterrupt: Send + Sync {
    /// Abandon the running statement and wait up to `grace` for the session to
    /// go idle. Returns `false` when it did not; the session then reports itself
    /// closed.
    async fn interrupt(&self, grace: Duration) -> bool;
}

/// One open connection of a given kind.
#[async_trait]
pub trait Session: Send {
    fn kind(&self) -> ConnectionKind;

    /// True while the underlying connection is open and usable.
    fn is_open(&self) -> bool;

    /// Handle that stops whatever this session is running.
    fn interrupter(&self) -> Arc<dyn StatementInterrupt>;

    /// Run a statement for effect and return the affected row count.
    async fn run(&mut self, sql: &str, params: &[Param]) -> Result<u64, TransferError>;

    /// Run a statement and stream its rows. The cursor holds the session until dropped.
    async fn run_query<'s>(
        &'s mut self,
        sql: &str,
        params: &[Param],
    ) -> Result<BoxCursor<'s>, TransferError>;

    /// First column of the first row, or `None` when there are no rows.
    async fn run_scalar(
        &mut self,
        sql: &str,
        params: &[Param],
    ) -> Result<Option<RowValues>, TransferError>;

    /// Invoke a stored routine; `None` when it produced no return value.
    async fn run_procedure(
        &mut self,
        name: &str,
        params: &[Param],
    ) -> Result<Option<i64>, TransferError>;

    /// Fetch a whole result into memory (the cursor-connection protocol).
    ///
    /// Backends that can tell a statement returns no columns before running it
    /// fail with `NoResultSet` without executing it.
    async fn fetch_static(
        &mut self,
        sql: &str,
        params: &[Param],
    ) -> Result<ResultSet, TransferError>;

    /// Ordered column contract of `table`.
    async fn table_schema(&mut self, table: &str) -> Result<DestinationTableSchema, TransferError>;

    /// Open a bulk-copy channel bound to this session.
    async fn bulk_copy_channel<'s>(
        &'s mut self,
        options: BulkCopyOptions,
    ) -> Result<Box<dyn BulkCopyChannel + 's>, TransferError>;

    /// Close the connection. Closing twice is a no-op.
    async fn close(&mut self) -> Result<(), TransferError>;
}

/// Factory for sessions against one kind of database server.
#[async_trait]
pub trait RelationalServer: Send + Sync {
    async fn open_session(
        &self,
        profile: &ConnectionProfile,
        kind: ConnectionKind,
        config: &EngineConfig,
    ) -> Result<Box<dyn Session>, TransferError>;
}

/// Quote an identifier, keeping dotted schema prefixes.
pub(crate) fn quote_ident(name: &str, open: char, close: char) -> String {
    name.split('.')
        .map(|part| {
            let trimmed = part
                .trim()
                .trim_start_matches(open)
                .trim_end_matches(close);
            let escaped = trimmed.replace(close, &format!("{close}{close}"));
            format!("{open}{escaped}{close}")
        })
        .collect::<Vec<_>>()
        .join(".")
}

static ROUTINE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$")
        .unwrap_or_else(|_| unreachable!("routine name pattern is valid"))
});

/// Reject routine names that would need quoting; they are spliced into SQL text.
pub(crate) fn check_routine_name(name: &str, allow_schema: bool) -> Result<(), TransferError> {
    let ok = ROUTINE_NAME.is_match(name) && (allow_schema || !name.contains('.'));
    if ok {
        Ok(())
    } else {
        Err(TransferError::ProcedureError {
            procedure: name.to_string(),
            reason: "invalid routine name".into(),
        })
    }
}
