//! `SQLite` backend: one worker thread per session owns the `rusqlite::Connection`.

mod channel;
mod dispatcher;
mod params;
mod query;
mod worker;

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use self::channel::{BulkMessage, Command};
use self::params::convert_params;
use self::worker::SqliteWorker;
use super::{
    BoxCursor, BulkCopyChannel, BulkCopyOptions, RelationalServer, RowCursor, Session,
    StatementInterrupt, check_routine_name,
};
use crate::config::{ConnectionProfile, EngineConfig};
use crate::error::TransferError;
use crate::results::{DbRow, ResultSet, index_columns};
use crate::schema::DestinationTableSchema;
use crate::types::{ConnectionKind, Param, RowValues};

pub use self::params::{row_value_to_sqlite_value, sqlite_value_to_row_value};
pub use self::query::{build_result_set, sqlite_extract_value_sync};

/// Body of a routine callable through `run_procedure`.
///
/// Returning `Ok(None)` means the routine produced no return value.
pub type ProcedureFn = Arc<dyn Fn(&[RowValues]) -> Result<Option<i64>, String> + Send + Sync>;

#[derive(Clone)]
struct Procedure {
    name: String,
    func: ProcedureFn,
}

#[derive(Debug, Default)]
struct LiveCounters {
    primary: Arc<AtomicUsize>,
    cursor: Arc<AtomicUsize>,
}

impl LiveCounters {
    fn for_kind(&self, kind: ConnectionKind) -> &Arc<AtomicUsize> {
        match kind {
            ConnectionKind::Primary => &self.primary,
            ConnectionKind::Cursor => &self.cursor,
        }
    }
}

/// Opens `SQLite` sessions for a [`ConnectionProfile`].
///
/// `server` names a directory and `catalog` a database file inside it (`.db` is
/// appended when the catalog has no extension). `server = ":memory:"` opens a
/// shared-cache in-memory database named after the catalog, so both connection
/// kinds see the same data. Credentials are accepted and ignored.
#[derive(Clone, Default)]
pub struct SqliteServer {
    procedures: Vec<Procedure>,
    live: Arc<LiveCounters>,
}

impl fmt::Debug for SqliteServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteServer")
            .field(
                "procedures",
                &self.procedures.iter().map(|p| &p.name).collect::<Vec<_>>(),
            )
            .field("live", &self.live)
            .finish()
    }
}

impl SqliteServer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a routine on every session this server opens.
    ///
    /// # Errors
    /// Returns `ProcedureError` if `name` is not a plain identifier.
    pub fn with_procedure<F>(mut self, name: &str, func: F) -> Result<Self, TransferError>
    where
        F: Fn(&[RowValues]) -> Result<Option<i64>, String> + Send + Sync + 'static,
    {
        check_routine_name(name, false)?;
        self.procedures.push(Procedure {
            name: name.to_string(),
            func: Arc::new(func),
        });
        Ok(self)
    }

    /// Number of sessions of `kind` whose connection is still open.
    #[must_use]
    pub fn live_sessions(&self, kind: ConnectionKind) -> usize {
        self.live.for_kind(kind).load(Ordering::SeqCst)
    }
}

enum Target {
    File(PathBuf),
    Memory(String),
}

fn resolve_target(profile: &ConnectionProfile) -> Result<Target, TransferError> {
    if profile.catalog.trim().is_empty() {
        return Err(TransferError::ConnectionError("catalog must not be empty".into()));
    }
    if profile.server == ":memory:" {
        return Ok(Target::Memory(format!(
            "file:{}?mode=memory&cache=shared",
            profile.catalog
        )));
    }
    let dir = Path::new(&profile.server);
    if !dir.is_dir() {
        return Err(TransferError::ConnectionError(format!(
            "database directory `{}` does not exist",
            dir.display()
        )));
    }
    let mut path = dir.join(&profile.catalog);
    if path.extension().is_none() {
        path.set_extension("db");
    }
    Ok(Target::File(path))
}

fn open_connection(
    target: &Target,
    procedures: &[Procedure],
    config: &EngineConfig,
) -> Result<Connection, TransferError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_URI
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let conn = match target {
        Target::File(path) => Connection::open_with_flags(path, flags),
        Target::Memory(uri) => Connection::open_with_flags(uri, flags),
    }
    .map_err(|e| TransferError::ConnectionError(e.to_string()))?;
    conn.busy_timeout(config.command_timeout())?;
    for procedure in procedures {
        register_procedure(&conn, procedure)?;
    }
    Ok(conn)
}

fn register_procedure(conn: &Connection, procedure: &Procedure) -> Result<(), TransferError> {
    let func = AssertUnwindSafe(Arc::clone(&procedure.func));
    conn.create_scalar_function(
        procedure.name.as_str(),
        -1,
        FunctionFlags::SQLITE_UTF8,
        move |ctx| {
            let args = (0..ctx.len())
                .map(|i| ctx.get::<Value>(i).map(sqlite_value_to_row_value))
                .collect::<rusqlite::Result<Vec<_>>>()?;
            (func.0)(&args).map_err(|reason| rusqlite::Error::UserFunctionError(reason.into()))
        },
    )?;
    Ok(())
}

#[async_trait]
impl RelationalServer for SqliteServer {
    async fn open_session(
        &self,
        profile: &ConnectionProfile,
        kind: ConnectionKind,
        config: &EngineConfig,
    ) -> Result<Box<dyn Session>, TransferError> {
        let target = resolve_target(profile)?;
        let procedures = self.procedures.clone();
        let cfg = config.clone();
        let opening = tokio::task::spawn_blocking(move || {
            open_connection(&target, &procedures, &cfg)
        });
        let conn = opening
            .await
            .map_err(|e| TransferError::ConnectionError(format!("sqlite open join error: {e}")))??;
        let worker = SqliteWorker::spawn(
            conn,
            format!("{kind}-{}", profile.catalog),
            Arc::clone(self.live.for_kind(kind)),
        )?;
        debug!(%kind, catalog = %profile.catalog, "sqlite session opened");
        Ok(Box::new(SqliteSession {
            kind,
            worker,
            row_capacity: config.row_channel_capacity.max(1),
        }))
    }
}

/// One open `SQLite` connection.
pub struct SqliteSession {
    kind: ConnectionKind,
    worker: SqliteWorker,
    row_capacity: usize,
}

impl fmt::Debug for SqliteSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteSession")
            .field("kind", &self.kind)
            .field("open", &self.worker.is_open())
            .finish()
    }
}

#[async_trait]
impl Session for SqliteSession {
    fn kind(&self) -> ConnectionKind {
        self.kind
    }

    fn is_open(&self) -> bool {
        self.worker.is_open()
    }

    fn interrupter(&self) -> Arc<dyn StatementInterrupt> {
        self.worker.interrupter()
    }

    async fn run(&mut self, sql: &str, params: &[Param]) -> Result<u64, TransferError> {
        let query = sql.to_string();
        let params = convert_params(params);
        self.worker
            .request(
                |respond_to| Command::Execute {
                    query,
                    params,
                    respond_to,
                },
                "SQLite worker dropped while executing statement",
            )
            .await
    }

    async fn run_query<'s>(
        &'s mut self,
        sql: &str,
        params: &[Param],
    ) -> Result<BoxCursor<'s>, TransferError> {
        let (rows_to, rows) = mpsc::channel(self.row_capacity);
        let query = sql.to_string();
        let params = convert_params(params);
        let columns = self
            .worker
            .request(
                |columns_to| Command::Stream {
                    query,
                    params,
                    columns_to,
                    rows_to,
                },
                "SQLite worker dropped while preparing query",
            )
            .await?;
        let cache = Arc::new(index_columns(&columns));
        Ok(Box::new(SqliteCursor {
            columns,
            cache,
            rows,
            _session: PhantomData,
        }))
    }

    async fn run_scalar(
        &mut self,
        sql: &str,
        params: &[Param],
    ) -> Result<Option<RowValues>, TransferError> {
        let query = sql.to_string();
        let params = convert_params(params);
        self.worker
            .request(
                |respond_to| Command::Scalar {
                    query,
                    params,
                    respond_to,
                },
                "SQLite worker dropped while executing scalar",
            )
            .await
    }

    async fn run_procedure(
        &mut self,
        name: &str,
        params: &[Param],
    ) -> Result<Option<i64>, TransferError> {
        check_routine_name(name, false)?;
        let placeholders = (1..=params.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("SELECT {name}({placeholders})");
        // Routine arguments are positional; names only document intent.
        let positional: Vec<Param> = params
            .iter()
            .map(|p| Param::positional(p.value.clone()))
            .collect();
        let returned = self
            .run_scalar(&sql, &positional)
            .await
            .map_err(|err| match err {
                TransferError::SqliteError(e) => TransferError::ProcedureError {
                    procedure: name.to_string(),
                    reason: e.to_string(),
                },
                other => other,
            })?;
        match returned {
            None | Some(RowValues::Null) => Ok(None),
            Some(RowValues::Int(code)) => Ok(Some(code)),
            Some(other) => Err(TransferError::ProcedureError {
                procedure: name.to_string(),
                reason: format!("returned a non-integer value {other:?}"),
            }),
        }
    }

    async fn fetch_static(
        &mut self,
        sql: &str,
        params: &[Param],
    ) -> Result<ResultSet, TransferError> {
        let query = sql.to_string();
        let params = convert_params(params);
        self.worker
            .request(
                |respond_to| Command::FetchAll {
                    query,
                    params,
                    respond_to,
                },
                "SQLite worker dropped while fetching result set",
            )
            .await
    }

    async fn table_schema(&mut self, table: &str) -> Result<DestinationTableSchema, TransferError> {
        let table = table.to_string();
        self.worker
            .request(
                |respond_to| Command::TableInfo { table, respond_to },
                "SQLite worker dropped while reading table schema",
            )
            .await
    }

    async fn bulk_copy_channel<'s>(
        &'s mut self,
        options: BulkCopyOptions,
    ) -> Result<Box<dyn BulkCopyChannel + 's>, TransferError> {
        let (sender, rows) = mpsc::channel(self.row_capacity);
        let (respond_to, outcome) = oneshot::channel();
        self.worker.send_command(Command::BulkCopy {
            table: options.table,
            columns: options.columns,
            batch_size: options.batch_size,
            rows,
            respond_to,
        })?;
        Ok(Box::new(SqliteBulkChannel {
            sender: Some(sender),
            outcome: Some(outcome),
            _session: PhantomData,
        }))
    }

    async fn close(&mut self) -> Result<(), TransferError> {
        self.worker.shutdown().await;
        debug!(kind = %self.kind, "sqlite session closed");
        Ok(())
    }
}

/// Rows streamed from the session's worker. Holds the session until dropped.
struct SqliteCursor<'s> {
    columns: Arc<Vec<String>>,
    cache: Arc<HashMap<String, usize>>,
    rows: mpsc::Receiver<Result<Vec<RowValues>, TransferError>>,
    _session: PhantomData<&'s mut ()>,
}

#[async_trait]
impl RowCursor for SqliteCursor<'_> {
    fn columns(&self) -> &Arc<Vec<String>> {
        &self.columns
    }

    async fn next_row(&mut self) -> Result<Option<DbRow>, TransferError> {
        match self.rows.recv().await {
            Some(Ok(values)) => Ok(Some(DbRow::with_cache(
                Arc::clone(&self.columns),
                Arc::clone(&self.cache),
                values,
            ))),
            Some(Err(err)) => Err(err),
            None => Ok(None),
        }
    }
}

type Outcome = oneshot::Receiver<Result<u64, TransferError>>;

struct SqliteBulkChannel<'s> {
    sender: Option<mpsc::Sender<BulkMessage>>,
    outcome: Option<Outcome>,
    _session: PhantomData<&'s mut ()>,
}

impl SqliteBulkChannel<'_> {
    /// The worker stopped reading rows; collect the reason.
    async fn failure(&mut self) -> TransferError {
        self.sender = None;
        match self.outcome.take() {
            Some(outcome) => match outcome.await {
                Ok(Err(err)) => err,
                Ok(Ok(_)) => TransferError::ExecutionError("bulk copy ended early".into()),
                Err(_) => TransferError::ConnectionError(
                    "SQLite worker dropped during bulk copy".into(),
                ),
            },
            None => TransferError::ExecutionError("bulk copy already finished".into()),
        }
    }
}

#[async_trait]
impl BulkCopyChannel for SqliteBulkChannel<'_> {
    async fn send_row(&mut self, values: Vec<RowValues>) -> Result<(), TransferError> {
        let sent = match &self.sender {
            Some(sender) => sender.send(BulkMessage::Row(values)).await.is_ok(),
            None => false,
        };
        if sent {
            Ok(())
        } else {
            Err(self.failure().await)
        }
    }

    async fn finish(mut self: Box<Self>) -> Result<u64, TransferError> {
        if let Some(sender) = self.sender.take() {
            if sender.send(BulkMessage::Finish).await.is_err() {
                return Err(self.failure().await);
            }
        }
        match self.outcome.take() {
            Some(outcome) => outcome.await.map_err(|_| {
                TransferError::ConnectionError("SQLite worker dropped during bulk copy".into())
            })?,
            None => Err(TransferError::ExecutionError("bulk copy already finished".into())),
        }
    }

    async fn abort(mut self: Box<Self>) {
        self.sender = None;
        if let Some(outcome) = self.outcome.take() {
            let _ = outcome.await;
        }
    }
}
