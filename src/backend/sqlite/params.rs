use std::fmt::Write;

use rusqlite::Statement;
use rusqlite::types::Value;

use crate::error::TransferError;
use crate::types::{Param, RowValues};

// Thread-local buffer for efficient timestamp formatting
thread_local! {
    static TIMESTAMP_BUF: std::cell::RefCell<String> = std::cell::RefCell::new(String::with_capacity(32));
}

/// Convert a single `RowValues` to a rusqlite `Value`.
#[must_use]
pub fn row_value_to_sqlite_value(value: &RowValues) -> Value {
    match value {
        RowValues::Int(i) => Value::Integer(*i),
        RowValues::Float(f) => Value::Real(*f),
        RowValues::Text(s) => Value::Text(s.clone()),
        RowValues::Bool(b) => Value::Integer(i64::from(*b)),
        RowValues::Timestamp(dt) => TIMESTAMP_BUF.with(|buf| {
            let mut borrow = buf.borrow_mut();
            borrow.clear();
            // writing into a String cannot fail
            let _ = write!(borrow, "{}", dt.format("%F %T%.f"));
            Value::Text(borrow.clone())
        }),
        RowValues::Null => Value::Null,
        RowValues::Blob(bytes) => Value::Blob(bytes.clone()),
    }
}

/// Convert a rusqlite `Value` back into `RowValues`.
#[must_use]
pub fn sqlite_value_to_row_value(value: Value) -> RowValues {
    match value {
        Value::Null => RowValues::Null,
        Value::Integer(i) => RowValues::Int(i),
        Value::Real(f) => RowValues::Float(f),
        Value::Text(s) => RowValues::Text(s),
        Value::Blob(b) => RowValues::Blob(b),
    }
}

/// Parameter converted for the worker thread.
#[derive(Debug, Clone)]
pub(crate) struct BoundParam {
    name: Option<String>,
    value: Value,
}

pub(crate) fn convert_params(params: &[Param]) -> Vec<BoundParam> {
    params
        .iter()
        .map(|p| BoundParam {
            name: p.name.clone(),
            value: row_value_to_sqlite_value(&p.value),
        })
        .collect()
}

/// Bind named parameters by name and the rest by position.
pub(crate) fn bind_params(
    stmt: &mut Statement<'_>,
    params: &[BoundParam],
) -> Result<(), TransferError> {
    let expected = stmt.parameter_count();
    if params.len() > expected {
        return Err(TransferError::ExecutionError(format!(
            "statement takes {expected} parameters but {} were supplied",
            params.len()
        )));
    }
    let mut position = 0;
    for param in params {
        let index = match &param.name {
            Some(name) => resolve_named(stmt, name)?,
            None => {
                position += 1;
                position
            }
        };
        stmt.raw_bind_parameter(index, &param.value)?;
    }
    Ok(())
}

fn resolve_named(stmt: &Statement<'_>, name: &str) -> Result<usize, TransferError> {
    let candidates: Vec<String> = if name.starts_with([':', '@', '$', '?']) {
        vec![name.to_string()]
    } else {
        vec![format!(":{name}"), format!("@{name}"), format!("${name}")]
    };
    for candidate in &candidates {
        if let Some(index) = stmt.parameter_index(candidate)? {
            return Ok(index);
        }
    }
    Err(TransferError::ExecutionError(format!(
        "statement has no parameter named `{name}`"
    )))
}
