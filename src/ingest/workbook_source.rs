use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use calamine::{Data, DataType, Range, Reader, Sheets, open_workbook_auto};
use tracing::debug;

use super::source::{ExternalSource, header_names, parse_selector};
use crate::backend::{BoxCursor, RowCursor};
use crate::error::TransferError;
use crate::results::{DbRow, index_columns};
use crate::types::{RowValues, parse_timestamp};

/// Sheets of a workbook file (xlsx, xlsm, xlsb, xls, ods); each sheet is a table
/// whose first row holds the column names.
pub struct WorkbookSource {
    path: PathBuf,
    workbook: Option<Sheets<BufReader<File>>>,
}

impl std::fmt::Debug for WorkbookSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkbookSource")
            .field("path", &self.path)
            .field("open", &self.workbook.is_some())
            .finish()
    }
}

impl WorkbookSource {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            workbook: None,
        }
    }
}

/// Convert one spreadsheet cell.
pub(crate) fn cell_value(cell: &Data) -> RowValues {
    match cell {
        Data::Empty => RowValues::Null,
        Data::Int(i) => RowValues::Int(*i),
        Data::Float(f) => RowValues::Float(*f),
        Data::String(s) => RowValues::Text(s.clone()),
        Data::Bool(b) => RowValues::Bool(*b),
        Data::DateTime(_) => cell
            .as_datetime()
            .map_or_else(|| RowValues::Text(cell.to_string()), RowValues::Timestamp),
        Data::DateTimeIso(s) => {
            parse_timestamp(s).map_or_else(|| RowValues::Text(s.clone()), RowValues::Timestamp)
        }
        Data::DurationIso(s) => RowValues::Text(s.clone()),
        Data::Error(e) => RowValues::Text(format!("#{e:?}")),
    }
}

#[async_trait]
impl ExternalSource for WorkbookSource {
    fn describe(&self) -> String {
        format!("workbook {}", self.path.display())
    }

    async fn open(&mut self) -> Result<(), TransferError> {
        let path = self.path.clone();
        let workbook = tokio::task::spawn_blocking(move || open_workbook_auto(path))
            .await
            .map_err(|e| TransferError::SourceError(format!("workbook open join error: {e}")))?
            .map_err(|e| TransferError::SourceError(format!("{}: {e}", self.path.display())))?;
        self.workbook = Some(workbook);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.workbook.is_some()
    }

    async fn query<'s>(&'s mut self, selector: &str) -> Result<BoxCursor<'s>, TransferError> {
        let sheet = parse_selector(selector)?;
        let description = self.describe();
        let workbook = self
            .workbook
            .as_mut()
            .ok_or_else(|| TransferError::SourceError(format!("{description} is not open")))?;
        let range = workbook.worksheet_range(&sheet).map_err(|e| {
            TransferError::SourceError(format!("{description}: sheet `{sheet}`: {e}"))
        })?;
        let columns = match range.rows().next() {
            Some(header) => header_names(header.iter().map(|c| c.to_string())),
            None => Vec::new(),
        };
        debug!(sheet = %sheet, columns = columns.len(), rows = range.height(), "workbook sheet opened");
        let columns = Arc::new(columns);
        Ok(Box::new(SheetCursor {
            cache: Arc::new(index_columns(&columns)),
            columns,
            range,
            next: 1,
            _source: PhantomData,
        }))
    }

    fn close(&mut self) {
        self.workbook = None;
    }
}

struct SheetCursor<'s> {
    columns: Arc<Vec<String>>,
    cache: Arc<HashMap<String, usize>>,
    range: Range<Data>,
    /// Next row relative to the range start; row 0 is the header.
    next: usize,
    _source: PhantomData<&'s mut ()>,
}

#[async_trait]
impl RowCursor for SheetCursor<'_> {
    fn columns(&self) -> &Arc<Vec<String>> {
        &self.columns
    }

    async fn next_row(&mut self) -> Result<Option<DbRow>, TransferError> {
        if self.next >= self.range.height() {
            return Ok(None);
        }
        let row = self.next;
        self.next += 1;
        let values = (0..self.columns.len())
            .map(|col| self.range.get((row, col)).map_or(RowValues::Null, cell_value))
            .collect();
        Ok(Some(DbRow::with_cache(
            Arc::clone(&self.columns),
            Arc::clone(&self.cache),
            values,
        )))
    }
}
