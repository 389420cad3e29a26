use std::sync::Arc;

use rusqlite::Statement;
use rusqlite::types::Value;

use super::params::{BoundParam, bind_params, sqlite_value_to_row_value};
use crate::error::TransferError;
use crate::results::ResultSet;
use crate::types::RowValues;

/// Extract a `RowValues` from a `SQLite` row.
///
/// # Errors
///
/// Returns `TransferError` if the value cannot be read.
pub fn sqlite_extract_value_sync(
    row: &rusqlite::Row,
    idx: usize,
) -> Result<RowValues, TransferError> {
    let value: Value = row.get(idx)?;
    Ok(sqlite_value_to_row_value(value))
}

pub(crate) fn column_names(stmt: &Statement<'_>) -> Arc<Vec<String>> {
    Arc::new(
        stmt.column_names()
            .iter()
            .map(std::string::ToString::to_string)
            .collect(),
    )
}

pub(crate) fn extract_row(
    row: &rusqlite::Row,
    col_count: usize,
) -> Result<Vec<RowValues>, TransferError> {
    let mut values = Vec::with_capacity(col_count);
    for i in 0..col_count {
        values.push(sqlite_extract_value_sync(row, i)?);
    }
    Ok(values)
}

/// Build a fully materialized result set from a `SQLite` statement.
///
/// # Errors
/// Returns `TransferError` if binding, execution, or row extraction fails.
pub fn build_result_set(
    stmt: &mut Statement<'_>,
    params: &[BoundParam],
) -> Result<ResultSet, TransferError> {
    bind_params(stmt, params)?;
    let columns = column_names(stmt);
    let col_count = columns.len();
    let mut result_set = ResultSet::with_capacity(columns, 16);

    let mut rows = stmt.raw_query();
    while let Some(row) = rows.next()? {
        result_set.add_row_values(extract_row(row, col_count)?);
    }
    Ok(result_set)
}
