//! SQL Server backend over tiberius.

mod bulk;
mod config;
mod query;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use futures_util::stream::BoxStream;
use tiberius::Row;
use tracing::{debug, warn};

use self::bulk::{MssqlBulkChannel, Slot};
use self::query::{bind_query_params, extract_row, extract_value, prepare_statement};
use super::{
    BoxCursor, BulkCopyChannel, BulkCopyOptions, RelationalServer, RowCursor, Session,
    StatementInterrupt, check_routine_name, quote_ident,
};
use crate::config::{ConnectionProfile, EngineConfig};
use crate::error::TransferError;
use crate::results::{DbRow, ResultSet, index_columns};
use crate::schema::{DestinationTableSchema, TableColumn, find_name};
use crate::types::{ConnectionKind, Param, RowValues};

pub use self::config::{MssqlClient, create_mssql_client};
pub use self::query::build_result_set;

const TABLE_COLUMNS_SQL: &str = "SELECT COLUMN_NAME, \
     CASE WHEN DATA_TYPE IN ('decimal', 'numeric') \
          THEN DATA_TYPE + '(' + CAST(NUMERIC_PRECISION AS varchar(10)) + ',' \
               + CAST(NUMERIC_SCALE AS varchar(10)) + ')' \
          ELSE DATA_TYPE END, \
     IS_NULLABLE \
     FROM INFORMATION_SCHEMA.COLUMNS \
     WHERE TABLE_NAME = @P1 AND (@P2 IS NULL OR TABLE_SCHEMA = @P2) \
     ORDER BY ORDINAL_POSITION";

/// Opens tiberius sessions against SQL Server.
#[derive(Debug, Clone, Copy, Default)]
pub struct MssqlServer;

#[async_trait]
impl RelationalServer for MssqlServer {
    async fn open_session(
        &self,
        profile: &ConnectionProfile,
        kind: ConnectionKind,
        _config: &EngineConfig,
    ) -> Result<Box<dyn Session>, TransferError> {
        let client = create_mssql_client(profile).await?;
        debug!(%kind, server = %profile.server, catalog = %profile.catalog, "mssql session opened");
        Ok(Box::new(MssqlSession {
            kind,
            client: Some(client),
            poisoned: Arc::new(AtomicBool::new(false)),
        }))
    }
}

/// One open SQL Server connection.
pub struct MssqlSession {
    kind: ConnectionKind,
    client: Option<MssqlClient>,
    poisoned: Arc<AtomicBool>,
}

impl MssqlSession {
    fn client(&mut self) -> Result<&mut MssqlClient, TransferError> {
        self.client
            .as_mut()
            .ok_or(TransferError::NotConnected(self.kind))
    }
}

fn split_table(table: &str) -> (Option<String>, String) {
    match table.rsplit_once('.') {
        Some((schema, name)) => (
            Some(schema.trim_matches(['[', ']']).to_string()),
            name.trim_matches(['[', ']']).to_string(),
        ),
        None => (None, table.trim_matches(['[', ']']).to_string()),
    }
}

#[async_trait]
impl Session for MssqlSession {
    fn kind(&self) -> ConnectionKind {
        self.kind
    }

    fn is_open(&self) -> bool {
        self.client.is_some() && !self.poisoned.load(Ordering::SeqCst)
    }

    fn interrupter(&self) -> Arc<dyn StatementInterrupt> {
        Arc::new(MssqlInterrupt {
            poisoned: Arc::clone(&self.poisoned),
        })
    }

    async fn run(&mut self, sql: &str, params: &[Param]) -> Result<u64, TransferError> {
        let client = self.client()?;
        let result = bind_query_params(prepare_statement(sql, params), params)
            .execute(client)
            .await?;
        Ok(result.total())
    }

    async fn run_query<'s>(
        &'s mut self,
        sql: &str,
        params: &[Param],
    ) -> Result<BoxCursor<'s>, TransferError> {
        let client = self.client()?;
        let mut stream = bind_query_params(prepare_statement(sql, params), params)
            .query(client)
            .await?;
        let columns: Vec<String> = stream
            .columns()
            .await?
            .map(|cols| cols.iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();
        let columns = Arc::new(columns);
        let cache = Arc::new(index_columns(&columns));
        Ok(Box::new(MssqlCursor {
            columns,
            cache,
            rows: stream.into_row_stream(),
        }))
    }

    async fn run_scalar(
        &mut self,
        sql: &str,
        params: &[Param],
    ) -> Result<Option<RowValues>, TransferError> {
        let client = self.client()?;
        let row = bind_query_params(prepare_statement(sql, params), params)
            .query(client)
            .await?
            .into_row()
            .await?;
        match row {
            Some(row) => Ok(row.cells().next().map(|(_, data)| extract_value(data)).transpose()?),
            None => Ok(None),
        }
    }

    async fn run_procedure(
        &mut self,
        name: &str,
        params: &[Param],
    ) -> Result<Option<i64>, TransferError> {
        check_routine_name(name, true)?;
        let args = params
            .iter()
            .enumerate()
            .map(|(i, p)| match &p.name {
                Some(n) => format!("@{} = @P{}", n.trim_start_matches('@'), i + 1),
                None => format!("@P{}", i + 1),
            })
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "DECLARE @return int; EXEC @return = {} {args}; SELECT @return AS return_value;",
            quote_ident(name, '[', ']')
        );
        let client = self.client()?;
        let results = bind_query_params(sql, params)
            .query(client)
            .await
            .map_err(|e| TransferError::ProcedureError {
                procedure: name.to_string(),
                reason: e.to_string(),
            })?
            .into_results()
            .await
            .map_err(|e| TransferError::ProcedureError {
                procedure: name.to_string(),
                reason: e.to_string(),
            })?;
        let returned = results
            .last()
            .and_then(|rows| rows.first())
            .and_then(|row| row.cells().next().map(|(_, data)| extract_value(data)))
            .transpose()?;
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
        let client = self.client()?;
        build_result_set(client, sql, params).await
    }

    async fn table_schema(&mut self, table: &str) -> Result<DestinationTableSchema, TransferError> {
        let (schema, name) = split_table(table);
        let client = self.client()?;
        let mut query = tiberius::Query::new(TABLE_COLUMNS_SQL);
        query.bind(name);
        query.bind(schema);
        let rows = query.query(client).await?.into_first_result().await?;
        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            let column_name: &str = row.try_get(0)?.unwrap_or_default();
            let native: &str = row.try_get(1)?.unwrap_or_default();
            let nullable: &str = row.try_get(2)?.unwrap_or("YES");
            columns.push(TableColumn::new(
                column_name,
                native,
                nullable.eq_ignore_ascii_case("YES"),
            ));
        }
        if columns.is_empty() {
            return Err(TransferError::TableNotFound(table.to_string()));
        }
        Ok(DestinationTableSchema::new(table, columns))
    }

    async fn bulk_copy_channel<'s>(
        &'s mut self,
        options: BulkCopyOptions,
    ) -> Result<Box<dyn BulkCopyChannel + 's>, TransferError> {
        let schema = self.table_schema(&options.table).await?;
        for name in &options.columns {
            if schema.position(name).is_none() {
                return Err(TransferError::SchemaMismatch {
                    table: options.table.clone(),
                    column: name.clone(),
                    reason: "column does not exist in the destination table".into(),
                });
            }
        }
        let layout = schema
            .columns
            .into_iter()
            .map(|column| Slot {
                source: find_name(options.columns.iter().map(String::as_str), &column.name),
                column,
            })
            .collect();
        let MssqlSession {
            kind,
            client,
            poisoned,
        } = self;
        let client = client.as_mut().ok_or(TransferError::NotConnected(*kind))?;
        Ok(Box::new(MssqlBulkChannel {
            client,
            poisoned: &**poisoned,
            table: quote_ident(&options.table, '[', ']'),
            layout,
            batch_size: options.batch_size,
            pending: Vec::new(),
            in_batch: 0,
            sent: 0,
            tx_open: false,
        }))
    }

    async fn close(&mut self) -> Result<(), TransferError> {
        if let Some(client) = self.client.take() {
            client.close().await?;
            debug!(kind = %self.kind, "mssql session closed");
        }
        Ok(())
    }
}

/// tiberius cannot cancel a request in flight; a request abandoned half way
/// leaves the TDS stream unusable, so the session is retired instead.
struct MssqlInterrupt {
    poisoned: Arc<AtomicBool>,
}

#[async_trait]
impl StatementInterrupt for MssqlInterrupt {
    async fn interrupt(&self, _grace: Duration) -> bool {
        self.poisoned.store(true, Ordering::SeqCst);
        warn!("mssql request abandoned; session marked closed");
        false
    }
}

struct MssqlCursor<'s> {
    columns: Arc<Vec<String>>,
    cache: Arc<HashMap<String, usize>>,
    rows: BoxStream<'s, tiberius::Result<Row>>,
}

#[async_trait]
impl RowCursor for MssqlCursor<'_> {
    fn columns(&self) -> &Arc<Vec<String>> {
        &self.columns
    }

    async fn next_row(&mut self) -> Result<Option<DbRow>, TransferError> {
        match self.rows.try_next().await? {
            Some(row) => Ok(Some(DbRow::with_cache(
                Arc::clone(&self.columns),
                Arc::clone(&self.cache),
                extract_row(row)?,
            ))),
            None => Ok(None),
        }
    }
}
