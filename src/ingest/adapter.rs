use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::coerce::coerce_cell;
use crate::backend::{BoxCursor, RowCursor};
use crate::error::TransferError;
use crate::results::{DbRow, index_columns};
use crate::schema::{DestinationTableSchema, MappingMode, SourceColumn, find_name};
use crate::types::RowValues;

/// For each destination column, the source field feeding it.
fn resolve_plan(
    source: &[String],
    schema: &DestinationTableSchema,
    mode: &MappingMode,
) -> Result<Vec<Option<usize>>, TransferError> {
    let mismatch = |column: &str, reason: String| TransferError::SchemaMismatch {
        table: schema.table.clone(),
        column: column.to_string(),
        reason,
    };
    let source_names = || source.iter().map(String::as_str);
    match mode {
        MappingMode::ByName => schema
            .columns
            .iter()
            .map(|column| {
                find_name(source_names(), &column.name)
                    .map(Some)
                    .ok_or_else(|| mismatch(&column.name, "no source field with this name".into()))
            })
            .collect(),
        MappingMode::Positional => Ok((0..schema.len())
            .map(|i| (i < source.len()).then_some(i))
            .collect()),
        MappingMode::Explicit(mapping) => {
            let mut plan = vec![None; schema.len()];
            for (from, to) in mapping.pairs() {
                let dest = schema
                    .position(to)
                    .ok_or_else(|| mismatch(to, "not a column of the destination table".into()))?;
                let src = match from {
                    SourceColumn::Name(name) => find_name(source_names(), name).ok_or_else(|| {
                        mismatch(to, format!("mapped source field `{name}` does not exist"))
                    })?,
                    SourceColumn::Ordinal(i) if *i < source.len() => *i,
                    SourceColumn::Ordinal(i) => {
                        return Err(mismatch(
                            to,
                            format!(
                                "mapped source ordinal {i} is out of range ({} fields)",
                                source.len()
                            ),
                        ));
                    }
                };
                plan[dest] = Some(src);
            }
            Ok(plan)
        }
    }
}

/// Reshapes an external cursor to a destination table and validates every value.
///
/// Each emitted row has exactly the destination's columns, in its order. Values
/// are coerced to the declared type of their column; destination columns that
/// nothing maps to are NULL. The first unconvertible value stops the stream
/// with `TypeCoercion` naming its (1-based) data row and column.
pub struct ValidatingRowAdapter<'c> {
    inner: BoxCursor<'c>,
    schema: DestinationTableSchema,
    plan: Vec<Option<usize>>,
    columns: Arc<Vec<String>>,
    cache: Arc<HashMap<String, usize>>,
    row: usize,
}

impl<'c> ValidatingRowAdapter<'c> {
    /// Resolve the mapping up front.
    ///
    /// # Errors
    /// Returns `SchemaMismatch` naming the first destination column that cannot
    /// be matched to a source field.
    pub fn new(
        inner: BoxCursor<'c>,
        schema: DestinationTableSchema,
        mode: &MappingMode,
    ) -> Result<Self, TransferError> {
        let plan = resolve_plan(inner.columns(), &schema, mode)?;
        let columns = Arc::new(schema.column_names());
        Ok(Self {
            cache: Arc::new(index_columns(&columns)),
            columns,
            inner,
            schema,
            plan,
            row: 0,
        })
    }

    #[must_use]
    pub fn schema(&self) -> &DestinationTableSchema {
        &self.schema
    }

    /// Data rows read from the source so far.
    #[must_use]
    pub fn rows_read(&self) -> usize {
        self.row
    }
}

#[async_trait]
impl RowCursor for ValidatingRowAdapter<'_> {
    fn columns(&self) -> &Arc<Vec<String>> {
        &self.columns
    }

    async fn next_row(&mut self) -> Result<Option<DbRow>, TransferError> {
        let Some(source_row) = self.inner.next_row().await? else {
            return Ok(None);
        };
        self.row += 1;
        let mut source_values = source_row.into_values();
        let mut values = Vec::with_capacity(self.plan.len());
        for (column, slot) in self.schema.columns.iter().zip(&self.plan) {
            let value = match slot {
                Some(i) => source_values
                    .get_mut(*i)
                    .map_or(RowValues::Null, |v| std::mem::replace(v, RowValues::Null)),
                None => RowValues::Null,
            };
            values.push(coerce_cell(value, column, self.row)?);
        }
        Ok(Some(DbRow::with_cache(
            Arc::clone(&self.columns),
            Arc::clone(&self.cache),
            values,
        )))
    }
}

/// Reorders raw source rows onto the mapped destination columns without
/// touching the values.
pub(crate) struct RawRowShaper<'c> {
    inner: BoxCursor<'c>,
    picks: Vec<usize>,
    columns: Arc<Vec<String>>,
    cache: Arc<HashMap<String, usize>>,
}

impl<'c> RawRowShaper<'c> {
    pub(crate) fn new(
        inner: BoxCursor<'c>,
        schema: &DestinationTableSchema,
        mode: &MappingMode,
    ) -> Result<Self, TransferError> {
        let plan = resolve_plan(inner.columns(), schema, mode)?;
        let mut names = Vec::new();
        let mut picks = Vec::new();
        for (column, slot) in schema.columns.iter().zip(plan) {
            if let Some(i) = slot {
                names.push(column.name.clone());
                picks.push(i);
            }
        }
        if picks.is_empty() {
            return Err(TransferError::SchemaMismatch {
                table: schema.table.clone(),
                column: schema.column_names().join(", "),
                reason: "no source field maps to any destination column".into(),
            });
        }
        let columns = Arc::new(names);
        Ok(Self {
            cache: Arc::new(index_columns(&columns)),
            columns,
            inner,
            picks,
        })
    }
}

#[async_trait]
impl RowCursor for RawRowShaper<'_> {
    fn columns(&self) -> &Arc<Vec<String>> {
        &self.columns
    }

    async fn next_row(&mut self) -> Result<Option<DbRow>, TransferError> {
        let Some(source_row) = self.inner.next_row().await? else {
            return Ok(None);
        };
        let mut source_values = source_row.into_values();
        let values = self
            .picks
            .iter()
            .map(|i| {
                source_values
                    .get_mut(*i)
                    .map_or(RowValues::Null, |v| std::mem::replace(v, RowValues::Null))
            })
            .collect();
        Ok(Some(DbRow::with_cache(
            Arc::clone(&self.columns),
            Arc::clone(&self.cache),
            values,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::ResultSet;
    use crate::schema::{ColumnMapping, TableColumn};
    use crate::types::DeclaredType;

    fn schema() -> DestinationTableSchema {
        DestinationTableSchema::new(
            "people",
            vec![
                TableColumn::new("id", "INTEGER", false),
                TableColumn::new("name", "TEXT", true),
            ],
        )
    }

    fn source(columns: &[&str], rows: Vec<Vec<RowValues>>) -> BoxCursor<'static> {
        let names = Arc::new(columns.iter().map(|c| (*c).to_string()).collect());
        let mut set = ResultSet::new(names);
        for row in rows {
            set.add_row_values(row);
        }
        Box::new(set.into_cursor())
    }

    fn text(s: &str) -> RowValues {
        RowValues::Text(s.to_string())
    }

    #[test]
    fn coerces_and_reorders_by_name() -> Result<(), Box<dyn std::error::Error>> {
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(async {
            let cursor = source(&["NAME", "id"], vec![vec![text("x"), text("5")]]);
            let mut adapter = ValidatingRowAdapter::new(cursor, schema(), &MappingMode::ByName)?;
            let row = adapter.next_row().await?.expect("one row");
            assert_eq!(row.values, vec![RowValues::Int(5), text("x")]);
            assert!(adapter.next_row().await?.is_none());
            assert_eq!(adapter.rows_read(), 1);
            Ok::<(), TransferError>(())
        })?;
        Ok(())
    }

    #[test]
    fn unconvertible_value_names_row_and_column() -> Result<(), Box<dyn std::error::Error>> {
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(async {
            let cursor = source(
                &["id", "name"],
                vec![vec![text("1"), text("ok")], vec![text("abc"), text("x")]],
            );
            let mut adapter = ValidatingRowAdapter::new(cursor, schema(), &MappingMode::ByName)?;
            assert!(adapter.next_row().await?.is_some());
            match adapter.next_row().await {
                Err(TransferError::TypeCoercion {
                    row,
                    column,
                    value,
                    target,
                }) => {
                    assert_eq!(row, 2);
                    assert_eq!(column, "id");
                    assert_eq!(value, "abc");
                    assert_eq!(target, DeclaredType::Integer);
                }
                other => panic!("expected a coercion error, got {other:?}"),
            }
            Ok::<(), TransferError>(())
        })?;
        Ok(())
    }

    #[test]
    fn missing_source_field_is_a_schema_mismatch() {
        let cursor = source(&["id"], vec![]);
        match ValidatingRowAdapter::new(cursor, schema(), &MappingMode::ByName) {
            Err(TransferError::SchemaMismatch { column, .. }) => assert_eq!(column, "name"),
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("expected a schema mismatch"),
        }
        let cursor = source(&["id"], vec![]);
        assert!(ValidatingRowAdapter::new(cursor, schema(), &MappingMode::Positional).is_ok());
    }

    #[test]
    fn explicit_mapping_replaces_defaults() -> Result<(), Box<dyn std::error::Error>> {
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(async {
            let cursor = source(&["code", "label"], vec![vec![text("7"), text("seven")]]);
            let mapping = ColumnMapping::new().map_ordinal(0, "id");
            let mut adapter =
                ValidatingRowAdapter::new(cursor, schema(), &MappingMode::Explicit(mapping))?;
            let row = adapter.next_row().await?.expect("one row");
            assert_eq!(row.values, vec![RowValues::Int(7), RowValues::Null]);

            let cursor = source(&["code"], vec![]);
            let bad = ColumnMapping::new().map("code", "nope");
            assert!(matches!(
                ValidatingRowAdapter::new(cursor, schema(), &MappingMode::Explicit(bad)),
                Err(TransferError::SchemaMismatch { .. })
            ));
            Ok::<(), TransferError>(())
        })?;
        Ok(())
    }

    #[test]
    fn unmapped_not_null_column_fails_on_the_first_row() -> Result<(), Box<dyn std::error::Error>> {
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(async {
            let cursor = source(&["label"], vec![vec![text("seven")]]);
            let mapping = ColumnMapping::new().map("label", "name");
            let mut adapter =
                ValidatingRowAdapter::new(cursor, schema(), &MappingMode::Explicit(mapping))?;
            match adapter.next_row().await {
                Err(TransferError::TypeCoercion {
                    row, column, value, ..
                }) => {
                    assert_eq!(row, 1);
                    assert_eq!(column, "id");
                    assert_eq!(value, "NULL");
                }
                other => panic!("expected a coercion error, got {other:?}"),
            }
            Ok::<(), TransferError>(())
        })?;
        Ok(())
    }

    #[test]
    fn raw_shaper_keeps_values_untouched() -> Result<(), Box<dyn std::error::Error>> {
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(async {
            let cursor = source(&["a"], vec![vec![text("abc")]]);
            let mut shaper = RawRowShaper::new(cursor, &schema(), &MappingMode::Positional)?;
            assert_eq!(shaper.columns().as_slice(), ["id"]);
            let row = shaper.next_row().await?.expect("one row");
            assert_eq!(row.values, vec![text("abc")]);
            Ok::<(), TransferError>(())
        })?;
        Ok(())
    }
}
