use std::collections::HashMap;
use std::sync::Arc;

use super::row::{DbRow, index_columns};
use crate::types::RowValues;

/// A fully materialized, disconnected result set.
///
/// This is what the cursor connection hands back: every row is already on
/// the client, so it can be pasted into a sheet as one block.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    /// The rows returned by the query
    pub results: Vec<DbRow>,
    column_names: Arc<Vec<String>>,
    column_index_cache: Arc<HashMap<String, usize>>,
}

impl ResultSet {
    /// Create an empty result set with the given columns.
    #[must_use]
    pub fn new(column_names: Arc<Vec<String>>) -> Self {
        Self::with_capacity(column_names, 0)
    }

    /// Create an empty result set with preallocated row capacity.
    #[must_use]
    pub fn with_capacity(column_names: Arc<Vec<String>>, capacity: usize) -> Self {
        let cache = Arc::new(index_columns(&column_names));
        ResultSet {
            results: Vec::with_capacity(capacity),
            column_names,
            column_index_cache: cache,
        }
    }

    /// Get the column names for this result set
    #[must_use]
    pub fn column_names(&self) -> &Arc<Vec<String>> {
        &self.column_names
    }

    /// Add a row to the result set
    pub fn add_row_values(&mut self, row_values: Vec<RowValues>) {
        let row = DbRow::with_cache(
            Arc::clone(&self.column_names),
            Arc::clone(&self.column_index_cache),
            row_values,
        );
        self.results.push(row);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Turn the set back into a forward-only cursor.
    #[must_use]
    pub fn into_cursor(self) -> super::ResultSetCursor {
        super::ResultSetCursor::new(self)
    }
}
