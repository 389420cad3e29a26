use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::mpsc;
use tracing::debug;

use super::channel::{BulkMessage, Command, RowSender};
use super::params::{BoundParam, bind_params, row_value_to_sqlite_value};
use super::query::{build_result_set, column_names, extract_row, sqlite_extract_value_sync};
use super::worker::LiveGuard;
use crate::backend::quote_ident;
use crate::error::TransferError;
use crate::schema::{DestinationTableSchema, TableColumn};
use crate::types::RowValues;

pub(super) fn run_sqlite_worker(
    conn: Connection,
    mut receiver: mpsc::UnboundedReceiver<Command>,
    guard: LiveGuard,
) {
    let mut conn = conn;
    let mut ack = None;
    while let Some(command) = receiver.blocking_recv() {
        if command.abandoned() {
            debug!("skipping statement whose caller gave up");
            continue;
        }
        match command {
            Command::Shutdown { ack: reply } => {
                ack = reply;
                break;
            }
            Command::Ping { ack: idle } => {
                let _ = idle.send(());
            }
            Command::Execute {
                query,
                params,
                respond_to,
            } => {
                let _ = respond_to.send(execute(&conn, &query, &params));
            }
            Command::Stream {
                query,
                params,
                columns_to,
                rows_to,
            } => stream_rows(&conn, &query, &params, columns_to, &rows_to),
            Command::FetchAll {
                query,
                params,
                respond_to,
            } => {
                let result = conn
                    .prepare(&query)
                    .map_err(TransferError::from)
                    .and_then(|mut stmt| {
                        // Statements without a result are refused before they run.
                        if stmt.column_count() == 0 {
                            return Err(TransferError::NoResultSet);
                        }
                        build_result_set(&mut stmt, &params)
                    });
                let _ = respond_to.send(result);
            }
            Command::Scalar {
                query,
                params,
                respond_to,
            } => {
                let _ = respond_to.send(scalar(&conn, &query, &params));
            }
            Command::TableInfo { table, respond_to } => {
                let _ = respond_to.send(table_info(&conn, &table));
            }
            Command::BulkCopy {
                table,
                columns,
                batch_size,
                mut rows,
                respond_to,
            } => {
                let outcome = bulk_copy(&mut conn, &table, &columns, batch_size, &mut rows);
                let _ = respond_to.send(outcome);
            }
        }
    }
    drop(conn);
    drop(guard);
    debug!("sqlite worker stopped");
    if let Some(ack) = ack {
        let _ = ack.send(());
    }
}

fn execute(conn: &Connection, query: &str, params: &[BoundParam]) -> Result<u64, TransferError> {
    let mut stmt = conn.prepare(query)?;
    bind_params(&mut stmt, params)?;
    if stmt.column_count() > 0 {
        // Row-returning statement run for effect: drain and discard.
        let mut rows = stmt.raw_query();
        while rows.next()?.is_some() {}
        return Ok(0);
    }
    let changed = stmt.raw_execute()?;
    Ok(changed as u64)
}

fn scalar(
    conn: &Connection,
    query: &str,
    params: &[BoundParam],
) -> Result<Option<RowValues>, TransferError> {
    let mut stmt = conn.prepare(query)?;
    bind_params(&mut stmt, params)?;
    if stmt.column_count() == 0 {
        stmt.raw_execute()?;
        return Ok(None);
    }
    let mut rows = stmt.raw_query();
    match rows.next()? {
        Some(row) => Ok(Some(sqlite_extract_value_sync(row, 0)?)),
        None => Ok(None),
    }
}

fn stream_rows(
    conn: &Connection,
    query: &str,
    params: &[BoundParam],
    columns_to: super::channel::Reply<Arc<Vec<String>>>,
    rows_to: &RowSender,
) {
    let mut stmt = match conn.prepare(query) {
        Ok(stmt) => stmt,
        Err(err) => {
            let _ = columns_to.send(Err(err.into()));
            return;
        }
    };
    if let Err(err) = bind_params(&mut stmt, params) {
        let _ = columns_to.send(Err(err));
        return;
    }
    let columns = column_names(&stmt);
    let col_count = columns.len();
    if columns_to.send(Ok(columns)).is_err() {
        return;
    }
    let mut rows = stmt.raw_query();
    loop {
        let next = match rows.next() {
            Ok(Some(row)) => extract_row(row, col_count),
            Ok(None) => return,
            Err(err) => Err(err.into()),
        };
        let failed = next.is_err();
        // Consumer gone: the cursor was dropped before it was drained.
        if rows_to.blocking_send(next).is_err() || failed {
            return;
        }
    }
}

fn table_info(conn: &Connection, table: &str) -> Result<DestinationTableSchema, TransferError> {
    let (schema, name) = match table.rsplit_once('.') {
        Some((schema, name)) => (Some(schema), name),
        None => (None, table),
    };
    let pragma = match schema {
        Some(schema) => format!(
            "PRAGMA {}.table_info({})",
            quote_ident(schema, '"', '"'),
            quote_ident(name, '"', '"')
        ),
        None => format!("PRAGMA table_info({})", quote_ident(name, '"', '"')),
    };
    let mut stmt = conn.prepare(&pragma)?;
    let columns = stmt
        .query_map([], |row| {
            let name: String = row.get(1)?;
            let native: String = row.get(2)?;
            let not_null: i64 = row.get(3)?;
            Ok(TableColumn::new(name, native, not_null == 0))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    if columns.is_empty() {
        return Err(TransferError::TableNotFound(table.to_string()));
    }
    Ok(DestinationTableSchema::new(table, columns))
}

pub(super) fn insert_sql(table: &str, columns: &[String]) -> String {
    let names = columns
        .iter()
        .map(|c| quote_ident(c, '"', '"'))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = (1..=columns.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {} ({names}) VALUES ({placeholders})",
        quote_ident(table, '"', '"')
    )
}

/// Insert rows as they arrive, committing every `batch_size` rows.
///
/// A channel that closes without [`BulkMessage::Finish`] rolls back the open batch.
fn bulk_copy(
    conn: &mut Connection,
    table: &str,
    columns: &[String],
    batch_size: usize,
    rows: &mut mpsc::Receiver<BulkMessage>,
) -> Result<u64, TransferError> {
    let sql = insert_sql(table, columns);
    let mut copied: u64 = 0;
    loop {
        let tx = conn.transaction()?;
        let finished = {
            let mut stmt = tx.prepare_cached(&sql)?;
            let mut in_batch = 0usize;
            loop {
                match rows.blocking_recv() {
                    Some(BulkMessage::Row(values)) => {
                        if values.len() != columns.len() {
                            return Err(TransferError::ExecutionError(format!(
                                "row {} has {} values for {} columns",
                                copied + 1,
                                values.len(),
                                columns.len()
                            )));
                        }
                        for (i, value) in values.iter().enumerate() {
                            stmt.raw_bind_parameter(i + 1, row_value_to_sqlite_value(value))?;
                        }
                        stmt.raw_execute()?;
                        copied += 1;
                        in_batch += 1;
                        if batch_size > 0 && in_batch >= batch_size {
                            break false;
                        }
                    }
                    Some(BulkMessage::Finish) => break true,
                    None => {
                        return Err(TransferError::ExecutionError(
                            "bulk copy abandoned before finish".into(),
                        ));
                    }
                }
            }
        };
        tx.commit()?;
        debug!(table, copied, "sqlite bulk batch committed");
        if finished {
            return Ok(copied);
        }
    }
}
