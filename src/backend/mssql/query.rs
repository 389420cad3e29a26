use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use futures_util::TryStreamExt;
use tiberius::{ColumnData, FromSql, Query, Row};

use super::config::MssqlClient;
use crate::error::TransferError;
use crate::results::ResultSet;
use crate::types::{Param, RowValues};

/// Rewrite named parameters into `@Pn` placeholders tiberius understands.
///
/// Each named parameter becomes a `DECLARE @name <type> = @Pn;` prelude so the
/// statement body can keep referring to `@name`.
pub(super) fn prepare_statement(sql: &str, params: &[Param]) -> String {
    let mut prelude = String::new();
    for (i, param) in params.iter().enumerate() {
        if let Some(name) = &param.name {
            let name = name.trim_start_matches(['@', ':', '$']);
            prelude.push_str(&format!(
                "DECLARE @{name} {} = @P{};\n",
                declared_sql_type(&param.value),
                i + 1
            ));
        }
    }
    if prelude.is_empty() {
        sql.to_string()
    } else {
        prelude + sql
    }
}

fn declared_sql_type(value: &RowValues) -> &'static str {
    match value {
        RowValues::Int(_) => "bigint",
        RowValues::Float(_) => "float",
        RowValues::Bool(_) => "bit",
        RowValues::Timestamp(_) => "datetime2",
        RowValues::Blob(_) => "varbinary(max)",
        RowValues::Text(_) | RowValues::Null => "nvarchar(max)",
    }
}

/// Bind parameters directly to the query for SQL Server
/// Return a query builder with parameters already bound
pub(super) fn bind_query_params(query: String, params: &[Param]) -> Query<'static> {
    let mut query_builder = Query::new(query);
    for param in params {
        match &param.value {
            RowValues::Int(i) => query_builder.bind(*i),
            RowValues::Float(f) => query_builder.bind(*f),
            RowValues::Text(s) => query_builder.bind(s.clone()),
            RowValues::Bool(b) => query_builder.bind(*b),
            RowValues::Timestamp(dt) => query_builder.bind(*dt),
            RowValues::Null => query_builder.bind(Option::<String>::None),
            RowValues::Blob(bytes) => query_builder.bind(bytes.clone()),
        }
    }
    query_builder
}

/// Convert one TDS value into `RowValues`.
pub(super) fn extract_value(data: &ColumnData<'static>) -> Result<RowValues, TransferError> {
    let value = match data {
        ColumnData::U8(v) => v.map_or(RowValues::Null, |v| RowValues::Int(i64::from(v))),
        ColumnData::I16(v) => v.map_or(RowValues::Null, |v| RowValues::Int(i64::from(v))),
        ColumnData::I32(v) => v.map_or(RowValues::Null, |v| RowValues::Int(i64::from(v))),
        ColumnData::I64(v) => v.map_or(RowValues::Null, RowValues::Int),
        ColumnData::F32(v) => v.map_or(RowValues::Null, |v| RowValues::Float(f64::from(v))),
        ColumnData::F64(v) => v.map_or(RowValues::Null, RowValues::Float),
        ColumnData::Bit(v) => v.map_or(RowValues::Null, RowValues::Bool),
        ColumnData::String(v) => v
            .as_ref()
            .map_or(RowValues::Null, |s| RowValues::Text(s.to_string())),
        ColumnData::Binary(v) => v
            .as_ref()
            .map_or(RowValues::Null, |b| RowValues::Blob(b.to_vec())),
        ColumnData::Guid(v) => v.map_or(RowValues::Null, |g| RowValues::Text(g.to_string())),
        ColumnData::Numeric(v) => v.map_or(RowValues::Null, |n| {
            #[allow(clippy::cast_precision_loss)]
            let scaled = n.value() as f64 / 10f64.powi(i32::from(n.scale()));
            RowValues::Float(scaled)
        }),
        ColumnData::Date(_) => NaiveDate::from_sql(data)?
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map_or(RowValues::Null, RowValues::Timestamp),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            NaiveDateTime::from_sql(data)?.map_or(RowValues::Null, RowValues::Timestamp)
        }
        other => RowValues::Text(format!("{other:?}")),
    };
    Ok(value)
}

pub(super) fn extract_row(row: Row) -> Result<Vec<RowValues>, TransferError> {
    row.into_iter().map(|data| extract_value(&data)).collect()
}

/// Build a fully materialized result set from a SQL Server query.
///
/// A statement without a result set yields an empty set with no columns.
///
/// # Errors
/// Returns `TransferError` if execution or row extraction fails.
pub async fn build_result_set(
    client: &mut MssqlClient,
    query: &str,
    params: &[Param],
) -> Result<ResultSet, TransferError> {
    let query_builder = bind_query_params(prepare_statement(query, params), params);
    let mut stream = query_builder.query(client).await?;

    let column_names: Vec<String> = stream
        .columns()
        .await?
        .map(|columns| columns.iter().map(|c| c.name().to_string()).collect())
        .unwrap_or_default();

    let mut result_set = ResultSet::with_capacity(Arc::new(column_names), 16);
    let mut rows = stream.into_row_stream();
    while let Some(row) = rows.try_next().await? {
        result_set.add_row_values(extract_row(row)?);
    }
    Ok(result_set)
}
