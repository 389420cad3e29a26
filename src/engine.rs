//! One-stop facade: a connection manager, a document session, and the
//! transfers between them.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::backend::{BoxCursor, RelationalServer};
use crate::config::{ConnectionProfile, EngineConfig};
use crate::connection::ConnectionManager;
use crate::error::TransferError;
use crate::export::{Delimiter, ExportSink, ExportSummary, TabularExporter};
use crate::ingest::{
    BulkLoader, DelimitedOptions, DelimitedTextSource, ExternalSource, LoadRequest, LoadSummary,
    WorkbookSource,
};
use crate::schema::ColumnMapping;
use crate::sheets::{DocumentSession, FileFormat, HostFactory, Workbook};
use crate::types::{ConnectionKind, Param, RowValues};

/// Owns the database connections and at most one open workbook.
///
/// Operations run one at a time (`&mut self`). Dropping the engine closes the
/// workbook and quits its host; the sessions close as they are dropped.
///
/// ```rust,no_run
/// use std::path::Path;
/// use std::sync::Arc;
/// use tabular_bridge::prelude::*;
///
/// # async fn demo() -> Result<(), TransferError> {
/// let mut engine = TransferEngine::new(
///     Arc::new(SqliteServer::new()),
///     Arc::new(XlsxHostFactory::new()),
///     EngineConfig::default(),
/// );
/// engine.connect(ConnectionProfile::integrated(":memory:", "demo")).await?;
/// engine.new_workbook()?;
/// engine.write_query_to_sheet("SELECT 1 AS one", &[], "Report", false).await?;
/// engine.save_workbook_as(Path::new("report.xlsx"), FileFormat::Xlsx)?;
/// engine.shutdown().await;
/// # Ok(()) }
/// ```
pub struct TransferEngine {
    connections: ConnectionManager,
    hosts: Arc<dyn HostFactory>,
    document: Option<DocumentSession>,
    exporter: TabularExporter,
    loader: BulkLoader,
}

impl std::fmt::Debug for TransferEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferEngine")
            .field("connections", &self.connections)
            .field("workbook_open", &self.has_workbook())
            .finish_non_exhaustive()
    }
}

impl TransferEngine {
    #[must_use]
    pub fn new(
        server: Arc<dyn RelationalServer>,
        hosts: Arc<dyn HostFactory>,
        config: EngineConfig,
    ) -> Self {
        Self {
            exporter: TabularExporter::new(&config),
            loader: BulkLoader::new(&config),
            connections: ConnectionManager::new(server, config),
            hosts,
            document: None,
        }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        self.connections.config()
    }

    pub fn connections(&mut self) -> &mut ConnectionManager {
        &mut self.connections
    }

    /// # Errors
    /// See [`ConnectionManager::connect`].
    pub async fn connect(&mut self, profile: ConnectionProfile) -> Result<(), TransferError> {
        self.connections.connect(profile).await.map(|_| ())
    }

    pub async fn terminate(&mut self) {
        self.connections.terminate().await;
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.connections.is_live()
    }

    /// # Errors
    /// See [`crate::executor::StatementExecutor::execute_query`].
    pub async fn execute_query(
        &mut self,
        sql: &str,
        params: &[Param],
    ) -> Result<BoxCursor<'_>, TransferError> {
        let exec = self.connections.executor(ConnectionKind::Primary).await?;
        exec.execute_query(sql, params).await
    }

    /// # Errors
    /// See [`crate::executor::StatementExecutor::execute_scalar`].
    pub async fn execute_scalar(
        &mut self,
        sql: &str,
        params: &[Param],
    ) -> Result<Option<RowValues>, TransferError> {
        let mut exec = self.connections.executor(ConnectionKind::Primary).await?;
        exec.execute_scalar(sql, params).await
    }

    /// # Errors
    /// See [`crate::executor::StatementExecutor::execute_command`].
    pub async fn execute_command(
        &mut self,
        sql: &str,
        params: &[Param],
    ) -> Result<u64, TransferError> {
        let mut exec = self.connections.executor(ConnectionKind::Primary).await?;
        exec.execute_command(sql, params).await
    }

    /// # Errors
    /// See [`crate::executor::StatementExecutor::execute_procedure`].
    pub async fn execute_procedure(
        &mut self,
        name: &str,
        params: &[Param],
    ) -> Result<i64, TransferError> {
        let mut exec = self.connections.executor(ConnectionKind::Primary).await?;
        exec.execute_procedure(name, params).await
    }

    /// Run `sql` and stream its rows into a delimited file at `path`.
    ///
    /// # Errors
    /// Returns `NotConnected`, the driver error, or `ExportIo`.
    pub async fn write_query_to_file(
        &mut self,
        sql: &str,
        params: &[Param],
        path: &Path,
        delimiter: Delimiter,
    ) -> Result<ExportSummary, TransferError> {
        let exec = self.connections.executor(ConnectionKind::Primary).await?;
        let mut cursor = exec.execute_query(sql, params).await?;
        self.exporter
            .export(cursor.as_mut(), ExportSink::FlatFile { path, delimiter })
            .await
    }

    #[must_use]
    pub fn has_workbook(&self) -> bool {
        self.document.as_ref().is_some_and(DocumentSession::is_open)
    }

    /// The open workbook.
    ///
    /// # Errors
    /// Returns `NoWorkbook` when none is open.
    pub fn workbook(&mut self) -> Result<&mut dyn Workbook, TransferError> {
        match self.document.as_mut() {
            Some(document) => document.workbook(),
            None => Err(TransferError::NoWorkbook),
        }
    }

    /// Start a host with a fresh workbook, closing any workbook already open.
    ///
    /// # Errors
    /// Propagates host start-up failures.
    pub fn new_workbook(&mut self) -> Result<&mut dyn Workbook, TransferError> {
        self.close_workbook();
        let document = DocumentSession::create(self.hosts.as_ref(), self.connections.config())?;
        self.document.insert(document).workbook()
    }

    /// Start a host on an existing document, closing any workbook already open.
    ///
    /// # Errors
    /// Propagates host errors, including `UnsupportedFormat`.
    pub fn open_workbook(&mut self, path: &Path) -> Result<&mut dyn Workbook, TransferError> {
        self.close_workbook();
        let document =
            DocumentSession::open(self.hosts.as_ref(), self.connections.config(), path)?;
        info!(path = %path.display(), "workbook opened");
        self.document.insert(document).workbook()
    }

    /// Create a new workbook and save it to `path` straight away.
    ///
    /// # Errors
    /// Propagates host errors; the new workbook is closed again on failure.
    pub fn create_workbook(&mut self, path: &Path, format: FileFormat) -> Result<(), TransferError> {
        let saved = self
            .new_workbook()
            .and_then(|workbook| workbook.save_as(path, format));
        if saved.is_err() {
            self.close_workbook();
        }
        saved
    }

    /// Run `sql` on the cursor connection and write the result into the sheet
    /// called `sheet` of the open workbook, replacing what was there.
    ///
    /// Any failure closes the workbook before the error is returned. A
    /// statement that returns no columns is refused with `NoResultSet`; on
    /// `SQLite` it is never run, while on SQL Server it has already executed
    /// (and committed) by the time that is known.
    ///
    /// # Errors
    /// Returns `NoWorkbook`, `NoResultSet` for statements that return no
    /// columns, the driver error, or a host error.
    pub async fn write_query_to_sheet(
        &mut self,
        sql: &str,
        params: &[Param],
        sheet: &str,
        save: bool,
    ) -> Result<ExportSummary, TransferError> {
        if !self.has_workbook() {
            return Err(TransferError::NoWorkbook);
        }
        let outcome = self.fill_sheet(sql, params, sheet, save).await;
        if outcome.is_err() {
            debug!(sheet, "sheet export failed; closing workbook");
            self.close_workbook();
        }
        outcome
    }

    async fn fill_sheet(
        &mut self,
        sql: &str,
        params: &[Param],
        sheet: &str,
        save: bool,
    ) -> Result<ExportSummary, TransferError> {
        let mut exec = self.connections.executor(ConnectionKind::Cursor).await?;
        let rows = exec.fetch_static(sql, params).await?;
        if rows.column_names().is_empty() {
            return Err(TransferError::NoResultSet);
        }
        let workbook = match self.document.as_mut() {
            Some(document) => document.workbook()?,
            None => return Err(TransferError::NoWorkbook),
        };
        let summary = self
            .exporter
            .export_result_set_to_sheet(workbook, sheet, &rows)?;
        if save {
            workbook.save()?;
        }
        Ok(summary)
    }

    /// # Errors
    /// Returns `NoWorkbook`, or a host error (including a workbook that was
    /// never given a file name).
    pub fn save_workbook(&mut self) -> Result<(), TransferError> {
        self.workbook()?.save()
    }

    /// # Errors
    /// Returns `NoWorkbook`, `UnsupportedFormat`, or a host error.
    pub fn save_workbook_as(&mut self, path: &Path, format: FileFormat) -> Result<(), TransferError> {
        self.workbook()?.save_as(path, format)?;
        info!(path = %path.display(), ?format, "workbook saved");
        Ok(())
    }

    /// Close the workbook and quit its host. A no-op when none is open.
    pub fn close_workbook(&mut self) {
        if let Some(mut document) = self.document.take() {
            document.close();
        }
    }

    /// Copy rows from `source` into the destination table over the primary
    /// connection.
    ///
    /// # Errors
    /// See [`BulkLoader::load`].
    pub async fn bulk_load(
        &mut self,
        source: &mut dyn ExternalSource,
        request: &LoadRequest,
    ) -> Result<LoadSummary, TransferError> {
        let session = self.connections.live_session(ConnectionKind::Primary).await?;
        self.loader.load(session, source, request).await
    }

    /// Load a delimited text file into `table`, matching columns by position.
    ///
    /// # Errors
    /// See [`BulkLoader::load`].
    pub async fn load_delimited_file(
        &mut self,
        path: &Path,
        table: &str,
        options: DelimitedOptions,
    ) -> Result<LoadSummary, TransferError> {
        let (mut source, file_name) = DelimitedTextSource::for_file(path, options)?;
        let request = LoadRequest::new(table, file_name);
        self.bulk_load(&mut source, &request).await
    }

    /// Load one sheet of a workbook file into `table`, validating every cell
    /// against the table's column types. Columns match by name unless
    /// `mapping` is given.
    ///
    /// # Errors
    /// See [`BulkLoader::load`].
    pub async fn load_workbook_sheet(
        &mut self,
        path: &Path,
        sheet: &str,
        table: &str,
        mapping: Option<ColumnMapping>,
    ) -> Result<LoadSummary, TransferError> {
        let mut source = WorkbookSource::new(path);
        let mut request = LoadRequest::new(table, sheet).validated(true);
        if let Some(mapping) = mapping {
            request = request.with_mapping(mapping);
        }
        self.bulk_load(&mut source, &request).await
    }

    /// Close the workbook and both connections.
    pub async fn shutdown(&mut self) {
        self.close_workbook();
        self.connections.terminate().await;
        debug!("engine shut down");
    }
}

impl Drop for TransferEngine {
    fn drop(&mut self) {
        self.close_workbook();
    }
}
