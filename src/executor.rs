use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::backend::{BoxCursor, Session, StatementInterrupt};
use crate::error::TransferError;
use crate::results::ResultSet;
use crate::schema::DestinationTableSchema;
use crate::types::{ConnectionKind, Param, RowValues};

/// Run `fut`, failing with `Timeout` once `limit` elapses.
pub(crate) async fn with_timeout<T>(
    limit: Duration,
    operation: &str,
    fut: impl Future<Output = Result<T, TransferError>>,
) -> Result<T, TransferError> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| timeout_error(operation, limit))?
}

/// Like [`with_timeout`], but a statement that overruns is interrupted on the
/// server before `Timeout` is returned.
///
/// The interrupt gets another `limit` to settle. A session that stays busy
/// reports itself closed afterwards.
pub(crate) async fn interruptible<T>(
    limit: Duration,
    operation: &str,
    interrupt: &dyn StatementInterrupt,
    fut: impl Future<Output = Result<T, TransferError>>,
) -> Result<T, TransferError> {
    match tokio::time::timeout(limit, fut).await {
        Ok(outcome) => outcome,
        Err(_) => {
            let settled = interrupt.interrupt(limit).await;
            warn!(operation, settled, "timed out; statement interrupted");
            Err(timeout_error(operation, limit))
        }
    }
}

fn timeout_error(operation: &str, limit: Duration) -> TransferError {
    TransferError::Timeout {
        operation: operation.to_string(),
        seconds: limit.as_secs(),
    }
}

/// Runs statements over one connection, each bounded by the command timeout.
///
/// Obtained from [`crate::connection::ConnectionManager::executor`].
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use tabular_bridge::prelude::*;
///
/// # async fn demo(manager: &mut ConnectionManager) -> Result<(), TransferError> {
/// let mut exec = manager.executor(ConnectionKind::Primary).await?;
/// exec.execute_command("CREATE TABLE t (id INTEGER)", &[]).await?;
/// let count = exec
///     .execute_scalar("SELECT count(*) FROM t WHERE id > ?1", &[RowValues::Int(0).into()])
///     .await?;
/// assert_eq!(count, Some(RowValues::Int(0)));
/// # Ok(()) }
/// ```
pub struct StatementExecutor<'m> {
    session: &'m mut dyn Session,
    timeout: Duration,
}

impl<'m> StatementExecutor<'m> {
    pub(crate) fn new(session: &'m mut dyn Session, timeout: Duration) -> Self {
        Self { session, timeout }
    }

    #[must_use]
    pub fn kind(&self) -> ConnectionKind {
        self.session.kind()
    }

    fn ensure_open(&self) -> Result<(), TransferError> {
        if self.session.is_open() {
            Ok(())
        } else {
            Err(TransferError::NotConnected(self.session.kind()))
        }
    }

    /// Run a query and return a forward-only cursor over its rows.
    ///
    /// The cursor keeps the connection borrowed until it is dropped.
    ///
    /// # Errors
    /// Returns `NotConnected`, `Timeout`, or the driver error.
    pub async fn execute_query(
        self,
        sql: &str,
        params: &[Param],
    ) -> Result<BoxCursor<'m>, TransferError> {
        self.ensure_open()?;
        debug!(kind = %self.session.kind(), sql, "execute query");
        let StatementExecutor { session, timeout } = self;
        let interrupt = session.interrupter();
        interruptible(
            timeout,
            "query",
            interrupt.as_ref(),
            session.run_query(sql, params),
        )
        .await
    }

    /// First column of the first row, or `None` when the query returns no rows.
    ///
    /// # Errors
    /// Returns `NotConnected`, `Timeout`, or the driver error.
    pub async fn execute_scalar(
        &mut self,
        sql: &str,
        params: &[Param],
    ) -> Result<Option<RowValues>, TransferError> {
        self.ensure_open()?;
        debug!(kind = %self.session.kind(), sql, "execute scalar");
        let interrupt = self.session.interrupter();
        interruptible(
            self.timeout,
            "scalar",
            interrupt.as_ref(),
            self.session.run_scalar(sql, params),
        )
        .await
    }

    /// Run a statement for effect; returns the affected row count.
    ///
    /// # Errors
    /// Returns `NotConnected`, `Timeout`, or the driver error.
    pub async fn execute_command(
        &mut self,
        sql: &str,
        params: &[Param],
    ) -> Result<u64, TransferError> {
        self.ensure_open()?;
        debug!(kind = %self.session.kind(), sql, "execute command");
        let interrupt = self.session.interrupter();
        interruptible(
            self.timeout,
            "command",
            interrupt.as_ref(),
            self.session.run(sql, params),
        )
        .await
    }

    /// Invoke a stored routine and return its integer return code.
    ///
    /// # Errors
    /// Returns `ProcedureError` if the routine fails or produces no return value.
    pub async fn execute_procedure(
        &mut self,
        name: &str,
        params: &[Param],
    ) -> Result<i64, TransferError> {
        self.ensure_open()?;
        debug!(kind = %self.session.kind(), procedure = name, "execute procedure");
        let interrupt = self.session.interrupter();
        let returned = interruptible(
            self.timeout,
            "procedure",
            interrupt.as_ref(),
            self.session.run_procedure(name, params),
        )
        .await?;
        returned.ok_or_else(|| TransferError::ProcedureError {
            procedure: name.to_string(),
            reason: "no return value".into(),
        })
    }

    /// Fetch the whole result of a query into memory.
    ///
    /// # Errors
    /// Returns `NotConnected`, `Timeout`, or the driver error.
    pub async fn fetch_static(
        &mut self,
        sql: &str,
        params: &[Param],
    ) -> Result<ResultSet, TransferError> {
        self.ensure_open()?;
        debug!(kind = %self.session.kind(), sql, "fetch static result set");
        let interrupt = self.session.interrupter();
        interruptible(
            self.timeout,
            "query",
            interrupt.as_ref(),
            self.session.fetch_static(sql, params),
        )
        .await
    }

    /// Column contract of `table`.
    ///
    /// # Errors
    /// Returns `TableNotFound` when the table does not exist.
    pub async fn table_schema(
        &mut self,
        table: &str,
    ) -> Result<DestinationTableSchema, TransferError> {
        self.ensure_open()?;
        let interrupt = self.session.interrupter();
        interruptible(
            self.timeout,
            "table schema",
            interrupt.as_ref(),
            self.session.table_schema(table),
        )
        .await
    }
}
