//! Export of row cursors to delimited flat files and workbook sheets.

mod flat_file;
mod sheet;

use std::path::Path;

use tracing::info;

pub use flat_file::{Delimiter, DelimiterPreset, format_line, write_delimited};
pub use sheet::DATA_ORIGIN;

use crate::backend::RowCursor;
use crate::config::EngineConfig;
use crate::error::TransferError;
use crate::results::ResultSet;
use crate::sheets::{HeaderStyle, SheetManager, Workbook};

/// Destination of one export.
pub enum ExportSink<'a> {
    FlatFile {
        path: &'a Path,
        delimiter: Delimiter,
    },
    /// Create-or-replace the sheet called `name`.
    Sheet {
        workbook: &'a mut dyn Workbook,
        name: &'a str,
    },
}

impl ExportSink<'_> {
    fn describe(&self) -> String {
        match self {
            ExportSink::FlatFile { path, .. } => path.display().to_string(),
            ExportSink::Sheet { name, .. } => format!("sheet {name}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub target: String,
    pub rows: u64,
}

/// Streams row cursors into files or sheets, header row first.
#[derive(Debug, Clone, Default)]
pub struct TabularExporter {
    sheets: SheetManager,
    header_style: HeaderStyle,
}

impl TabularExporter {
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            sheets: SheetManager::new(config),
            header_style: HeaderStyle::default(),
        }
    }

    #[must_use]
    pub fn with_header_style(mut self, style: HeaderStyle) -> Self {
        self.header_style = style;
        self
    }

    #[must_use]
    pub fn sheet_manager(&self) -> &SheetManager {
        &self.sheets
    }

    /// Drain `cursor` into `sink`.
    ///
    /// Sheets are overwritten by name, never appended to. Nothing is saved; the
    /// caller decides when the workbook is written out.
    ///
    /// # Errors
    /// Returns `ExportIo` for file failures, host errors for sheet failures, or
    /// the cursor's own error.
    pub async fn export(
        &self,
        cursor: &mut dyn RowCursor,
        sink: ExportSink<'_>,
    ) -> Result<ExportSummary, TransferError> {
        let target = sink.describe();
        let rows = match sink {
            ExportSink::FlatFile { path, delimiter } => {
                write_delimited(cursor, path, delimiter).await?
            }
            ExportSink::Sheet { workbook, name } => {
                let rows = sheet::collect_rows(cursor).await?;
                sheet::write_sheet(&self.sheets, workbook, name, &rows, &self.header_style)?;
                rows.len() as u64
            }
        };
        info!(target = %target, rows, "export finished");
        Ok(ExportSummary { target, rows })
    }

    /// Write an already materialized result set into sheet `name`.
    ///
    /// # Errors
    /// Propagates host errors.
    pub fn export_result_set_to_sheet(
        &self,
        workbook: &mut dyn Workbook,
        name: &str,
        rows: &ResultSet,
    ) -> Result<ExportSummary, TransferError> {
        sheet::write_sheet(&self.sheets, workbook, name, rows, &self.header_style)?;
        info!(sheet = name, rows = rows.len(), "export finished");
        Ok(ExportSummary {
            target: format!("sheet {name}"),
            rows: rows.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;
    use std::sync::Arc;

    use super::*;
    use crate::sheets::{CellRef, HostFactory, XlsxHostFactory};
    use crate::types::RowValues;

    fn two_rows() -> ResultSet {
        let mut rs = ResultSet::new(Arc::new(vec!["a".into(), "b".into()]));
        rs.add_row_values(vec![RowValues::Int(1), RowValues::Int(2)]);
        rs.add_row_values(vec![RowValues::Int(3), RowValues::Int(4)]);
        rs
    }

    #[test]
    fn flat_file_sink_writes_header_and_rows() -> Result<(), Box<dyn Error>> {
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(async {
            let dir = tempfile::tempdir()?;
            let path = dir.path().join("out.txt");
            let exporter = TabularExporter::default();
            let mut cursor = two_rows().into_cursor();
            let summary = exporter
                .export(
                    &mut cursor,
                    ExportSink::FlatFile {
                        path: &path,
                        delimiter: Delimiter::PIPE,
                    },
                )
                .await?;
            assert_eq!(summary.rows, 2);
            assert_eq!(std::fs::read_to_string(&path)?, "a|b\n1|2\n3|4\n");
            Ok(())
        })
    }

    #[test]
    fn sheet_sink_overwrites_by_name() -> Result<(), Box<dyn Error>> {
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(async {
            let factory = XlsxHostFactory::new();
            let mut host = factory.new_application(&EngineConfig::default())?;
            let mut book = host.new_workbook()?;
            let exporter = TabularExporter::default();

            let mut cursor = two_rows().into_cursor();
            exporter
                .export(
                    &mut cursor,
                    ExportSink::Sheet {
                        workbook: book.as_mut(),
                        name: "Report",
                    },
                )
                .await?;

            let mut smaller = ResultSet::new(Arc::new(vec!["z".into()]));
            smaller.add_row_values(vec![RowValues::Int(9)]);
            exporter.export_result_set_to_sheet(book.as_mut(), "Report", &smaller)?;

            let names: Vec<String> = book.sheets().into_iter().map(|s| s.name).collect();
            assert_eq!(names, vec!["Report".to_string()]);
            let id = book.find_sheet("Report").ok_or("missing sheet")?;
            assert_eq!(book.read_cell(id, CellRef::A1), Some(RowValues::Text("z".into())));
            assert_eq!(book.read_cell(id, DATA_ORIGIN), Some(RowValues::Int(9)));
            assert_eq!(book.read_cell(id, CellRef::new(1, 2)), None);
            assert_eq!(book.read_cell(id, CellRef::new(3, 1)), None);
            Ok(())
        })
    }
}
