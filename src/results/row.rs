use std::collections::HashMap;
use std::sync::Arc;

use crate::types::RowValues;

/// A row from a query result or an external source.
///
/// Column names are shared across all rows of one result.
#[derive(Debug, Clone)]
pub struct DbRow {
    /// The column names for this row (shared across all rows in a result set)
    pub column_names: Arc<Vec<String>>,
    /// The values for this row, in column order
    pub values: Vec<RowValues>,
    column_index_cache: Arc<HashMap<String, usize>>,
}

impl DbRow {
    /// Create a row, building its own name lookup.
    #[must_use]
    pub fn new(column_names: Arc<Vec<String>>, values: Vec<RowValues>) -> Self {
        let cache = Arc::new(index_columns(&column_names));
        Self {
            column_names,
            values,
            column_index_cache: cache,
        }
    }

    /// Create a row that reuses an existing name lookup.
    pub(crate) fn with_cache(
        column_names: Arc<Vec<String>>,
        cache: Arc<HashMap<String, usize>>,
        values: Vec<RowValues>,
    ) -> Self {
        Self {
            column_names,
            values,
            column_index_cache: cache,
        }
    }

    /// Get the index of a column by name
    #[must_use]
    pub fn get_column_index(&self, column_name: &str) -> Option<usize> {
        if let Some(&idx) = self.column_index_cache.get(column_name) {
            return Some(idx);
        }
        self.column_names.iter().position(|col| col == column_name)
    }

    /// Get a value from the row by column name
    #[must_use]
    pub fn get(&self, column_name: &str) -> Option<&RowValues> {
        self.get_column_index(column_name)
            .and_then(|idx| self.values.get(idx))
    }

    /// Get a value from the row by column index
    #[must_use]
    pub fn get_by_index(&self, index: usize) -> Option<&RowValues> {
        self.values.get(index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn into_values(self) -> Vec<RowValues> {
        self.values
    }
}

pub(crate) fn index_columns(column_names: &[String]) -> HashMap<String, usize> {
    let mut map = HashMap::with_capacity(column_names.len());
    for (i, name) in column_names.iter().enumerate() {
        // first occurrence wins for duplicated names
        map.entry(name.clone()).or_insert(i);
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_name_and_index() {
        let names = Arc::new(vec!["id".to_string(), "name".to_string(), "id".to_string()]);
        let row = DbRow::new(
            names,
            vec![RowValues::Int(1), RowValues::Text("x".into()), RowValues::Int(2)],
        );
        assert_eq!(row.get("id"), Some(&RowValues::Int(1)));
        assert_eq!(row.get("name").and_then(RowValues::as_text), Some("x"));
        assert_eq!(row.get("missing"), None);
        assert_eq!(row.get_by_index(2), Some(&RowValues::Int(2)));
        assert_eq!(row.len(), 3);
    }
}
