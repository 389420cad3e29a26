use std::sync::Arc;
use std::vec::IntoIter;

use async_trait::async_trait;

use super::{DbRow, ResultSet};
use crate::backend::RowCursor;
use crate::error::TransferError;

/// Forward-only cursor over rows that are already in memory.
#[derive(Debug)]
pub struct ResultSetCursor {
    columns: Arc<Vec<String>>,
    rows: IntoIter<DbRow>,
}

impl ResultSetCursor {
    #[must_use]
    pub fn new(result_set: ResultSet) -> Self {
        let columns = Arc::clone(result_set.column_names());
        Self {
            columns,
            rows: result_set.results.into_iter(),
        }
    }
}

#[async_trait]
impl RowCursor for ResultSetCursor {
    fn columns(&self) -> &Arc<Vec<String>> {
        &self.columns
    }

    async fn next_row(&mut self) -> Result<Option<DbRow>, TransferError> {
        Ok(self.rows.next())
    }
}
