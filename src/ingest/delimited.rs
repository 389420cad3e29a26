use std::collections::HashMap;
use std::fs::File;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use csv::{Reader, ReaderBuilder, StringRecord};
use tracing::debug;

use super::source::{ExternalSource, generated_name, header_names, parse_selector};
use crate::backend::{BoxCursor, RowCursor};
use crate::error::TransferError;
use crate::export::Delimiter;
use crate::results::{DbRow, index_columns};
use crate::types::RowValues;

/// Options for reading delimited text files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelimitedOptions {
    pub delimiter: Delimiter,
    /// First line holds column names. Without it, columns are named `F1..Fn`.
    pub has_header: bool,
}

impl Default for DelimitedOptions {
    fn default() -> Self {
        Self {
            delimiter: Delimiter::PIPE,
            has_header: true,
        }
    }
}

/// Delimited text files in one directory; each file is a table.
///
/// Quoting is disabled so files written by the flat-file exporter read back
/// field for field.
#[derive(Debug)]
pub struct DelimitedTextSource {
    directory: PathBuf,
    options: DelimitedOptions,
    open: bool,
}

impl DelimitedTextSource {
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>, options: DelimitedOptions) -> Self {
        Self {
            directory: directory.into(),
            options,
            open: false,
        }
    }

    /// Source for a single file: its parent directory, queried by file name.
    ///
    /// # Errors
    /// Returns `SourceError` if `path` has no file name.
    pub fn for_file(
        path: &Path,
        options: DelimitedOptions,
    ) -> Result<(Self, String), TransferError> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| {
                TransferError::SourceError(format!("`{}` is not a file path", path.display()))
            })?;
        let directory = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Ok((Self::new(directory, options), file_name))
    }
}

#[async_trait]
impl ExternalSource for DelimitedTextSource {
    fn describe(&self) -> String {
        format!("delimited text in {}", self.directory.display())
    }

    async fn open(&mut self) -> Result<(), TransferError> {
        if !self.directory.is_dir() {
            return Err(TransferError::SourceError(format!(
                "directory `{}` does not exist",
                self.directory.display()
            )));
        }
        self.open = true;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn query<'s>(&'s mut self, selector: &str) -> Result<BoxCursor<'s>, TransferError> {
        if !self.open {
            return Err(TransferError::SourceError(format!(
                "{} is not open",
                self.describe()
            )));
        }
        let path = self.directory.join(parse_selector(selector)?);
        let mut reader = ReaderBuilder::new()
            .delimiter(self.options.delimiter.as_byte())
            .has_headers(false)
            .quoting(false)
            .flexible(true)
            .from_path(&path)
            .map_err(|e| TransferError::SourceError(format!("{}: {e}", path.display())))?;
        let mut first = StringRecord::new();
        let has_first = reader.read_record(&mut first)?;
        let (columns, pending) = if self.options.has_header {
            (header_names(first.iter()), None)
        } else {
            let names = (0..first.len()).map(generated_name).collect();
            (names, has_first.then_some(first))
        };
        debug!(file = %path.display(), columns = columns.len(), "delimited source opened");
        let columns = Arc::new(columns);
        Ok(Box::new(DelimitedCursor {
            cache: Arc::new(index_columns(&columns)),
            columns,
            reader,
            pending,
            record: StringRecord::new(),
            _source: PhantomData,
        }))
    }

    fn close(&mut self) {
        self.open = false;
    }
}

struct DelimitedCursor<'s> {
    columns: Arc<Vec<String>>,
    cache: Arc<HashMap<String, usize>>,
    reader: Reader<File>,
    pending: Option<StringRecord>,
    record: StringRecord,
    _source: PhantomData<&'s mut ()>,
}

impl DelimitedCursor<'_> {
    /// Empty fields read as NULL, matching how the exporter writes NULL.
    fn to_row(&self, record: &StringRecord) -> DbRow {
        let width = self.columns.len();
        let mut values: Vec<RowValues> = record
            .iter()
            .take(width)
            .map(|field| {
                if field.is_empty() {
                    RowValues::Null
                } else {
                    RowValues::Text(field.to_string())
                }
            })
            .collect();
        values.resize(width, RowValues::Null);
        DbRow::with_cache(Arc::clone(&self.columns), Arc::clone(&self.cache), values)
    }
}

#[async_trait]
impl RowCursor for DelimitedCursor<'_> {
    fn columns(&self) -> &Arc<Vec<String>> {
        &self.columns
    }

    async fn next_row(&mut self) -> Result<Option<DbRow>, TransferError> {
        if let Some(record) = self.pending.take() {
            return Ok(Some(self.to_row(&record)));
        }
        let mut record = std::mem::take(&mut self.record);
        let more = self.reader.read_record(&mut record)?;
        let row = more.then(|| self.to_row(&record));
        self.record = record;
        Ok(row)
    }
}
