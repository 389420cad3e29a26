//! Workbooks, sheets, and the document host that owns them.

mod host;
mod xlsx;

pub use host::{
    AutomationHost, CellRef, DocumentSession, FileFormat, HeaderStyle, HostFactory, SheetId,
    SheetInfo, Workbook,
};
pub use xlsx::{XlsxHost, XlsxHostFactory, XlsxWorkbook};

use tracing::debug;

use crate::config::EngineConfig;
use crate::error::TransferError;
use crate::results::ResultSet;

/// A sheet located by [`SheetManager::find_or_create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetRef {
    pub id: SheetId,
    pub name: String,
    /// The sheet already existed and may hold earlier contents.
    pub reused: bool,
}

/// Sheet-level operations over any [`Workbook`].
#[derive(Debug, Clone)]
pub struct SheetManager {
    default_names: Vec<String>,
}

impl Default for SheetManager {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}

impl SheetManager {
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            default_names: config.default_sheet_names.clone(),
        }
    }

    /// Case-sensitive exact match on `name`; adds the sheet when absent.
    ///
    /// # Errors
    /// Propagates host errors, including names the host rejects.
    pub fn find_or_create(
        &self,
        workbook: &mut dyn Workbook,
        name: &str,
    ) -> Result<SheetRef, TransferError> {
        if let Some(id) = workbook.find_sheet(name) {
            return Ok(SheetRef {
                id,
                name: name.to_string(),
                reused: true,
            });
        }
        let id = workbook.add_sheet(name)?;
        Ok(SheetRef {
            id,
            name: name.to_string(),
            reused: false,
        })
    }

    /// # Errors
    /// Propagates host errors.
    pub fn clear(&self, workbook: &mut dyn Workbook, sheet: &SheetRef) -> Result<(), TransferError> {
        workbook.clear_sheet(sheet.id)
    }

    /// Remove the host's auto-generated sheets, leaving user-named ones alone.
    /// The last remaining sheet is never removed. Returns how many were removed.
    ///
    /// # Errors
    /// Propagates host errors.
    pub fn remove_default_sheets(&self, workbook: &mut dyn Workbook) -> Result<usize, TransferError> {
        let mut removed = 0;
        for sheet in workbook.sheets() {
            if !sheet.placeholder || !self.default_names.contains(&sheet.name) {
                continue;
            }
            if workbook.sheets().len() <= 1 {
                break;
            }
            workbook.remove_sheet(sheet.id)?;
            removed += 1;
        }
        if removed > 0 {
            debug!(removed, "default sheets removed");
        }
        Ok(removed)
    }

    /// Paste `rows` as one block with its top-left cell at `origin`.
    ///
    /// # Errors
    /// Propagates host errors.
    pub fn paste(
        &self,
        workbook: &mut dyn Workbook,
        sheet: &SheetRef,
        origin: CellRef,
        rows: &ResultSet,
    ) -> Result<(), TransferError> {
        workbook.paste(sheet.id, origin, rows)
    }

    /// Write `names` across row 1 with `style` applied to each cell.
    ///
    /// # Errors
    /// Propagates host errors.
    pub fn write_header(
        &self,
        workbook: &mut dyn Workbook,
        sheet: &SheetRef,
        names: &[String],
        style: &HeaderStyle,
    ) -> Result<(), TransferError> {
        workbook.write_header(sheet.id, CellRef::A1, names, style)
    }

    /// # Errors
    /// Propagates host errors.
    pub fn autosize_columns(
        &self,
        workbook: &mut dyn Workbook,
        sheet: &SheetRef,
    ) -> Result<(), TransferError> {
        workbook.autofit_columns(sheet.id)
    }

    /// # Errors
    /// Fails when the workbook has never been saved to a path, or on host errors.
    pub fn save(&self, workbook: &mut dyn Workbook) -> Result<(), TransferError> {
        workbook.save()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::types::RowValues;

    fn new_book() -> (XlsxHostFactory, Box<dyn AutomationHost>, Box<dyn Workbook>) {
        let factory = XlsxHostFactory::new();
        let mut host = factory.new_application(&EngineConfig::default()).unwrap();
        let book = host.new_workbook().unwrap();
        (factory, host, book)
    }

    #[test]
    fn find_or_create_returns_the_same_sheet() {
        let (_factory, _host, mut book) = new_book();
        let manager = SheetManager::default();
        let first = manager.find_or_create(book.as_mut(), "Report").unwrap();
        assert!(!first.reused);
        let mut rs = ResultSet::new(Arc::new(vec!["a".into()]));
        rs.add_row_values(vec![RowValues::Int(7)]);
        manager.paste(book.as_mut(), &first, CellRef::A1, &rs).unwrap();

        let second = manager.find_or_create(book.as_mut(), "Report").unwrap();
        assert_eq!(first.id, second.id);
        assert!(second.reused);
        assert_eq!(book.read_cell(second.id, CellRef::A1), Some(RowValues::Int(7)));
        manager.clear(book.as_mut(), &second).unwrap();
        assert_eq!(book.read_cell(second.id, CellRef::A1), None);

        // exact match only
        let other = manager.find_or_create(book.as_mut(), "Report ").unwrap();
        assert_ne!(other.id, first.id);
    }

    #[test]
    fn remove_default_sheets_keeps_user_sheets() {
        let (_factory, _host, mut book) = new_book();
        let manager = SheetManager::default();
        manager.find_or_create(book.as_mut(), "Data").unwrap();
        assert_eq!(manager.remove_default_sheets(book.as_mut()).unwrap(), 3);
        let names: Vec<String> = book.sheets().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["Data".to_string()]);
    }

    #[test]
    fn remove_default_sheets_never_empties_the_workbook() {
        let (_factory, _host, mut book) = new_book();
        let manager = SheetManager::default();
        assert_eq!(manager.remove_default_sheets(book.as_mut()).unwrap(), 2);
        assert_eq!(book.sheets().len(), 1);
    }

    #[test]
    fn user_sheet_named_like_a_default_survives() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("user.xlsx");
        let factory = XlsxHostFactory::new();
        let mut host = factory.new_application(&EngineConfig::default())?;
        let mut book = host.new_workbook()?;
        let manager = SheetManager::default();
        let keep = manager.find_or_create(book.as_mut(), "Keep")?;
        manager.remove_default_sheets(book.as_mut())?;
        book.add_sheet("Sheet1")?;
        book.save_as(&path, FileFormat::Xlsx)?;
        book.close();

        let mut reopened = host.open_workbook(&path)?;
        assert_eq!(manager.remove_default_sheets(reopened.as_mut())?, 0);
        assert_eq!(reopened.sheets().len(), 2);
        assert!(reopened.find_sheet(&keep.name).is_some());
        Ok(())
    }
}
