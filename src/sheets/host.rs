//! Document-automation host collaborator.

use std::path::Path;

use clap::ValueEnum;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::TransferError;
use crate::results::ResultSet;
use crate::types::RowValues;

/// Output document formats, numbered by their historical format codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum FileFormat {
    /// Tab-delimited text.
    Text = 0,
    Csv = 1,
    /// Legacy binary workbook.
    Xls = 2,
    /// XML workbook package.
    Xlsx = 3,
    /// Pipe-delimited flat file; not a workbook format.
    Pipe = 4,
}

impl FileFormat {
    /// # Errors
    /// Returns `UnsupportedFormat` for codes outside 0..=4.
    pub fn from_code(code: i32) -> Result<Self, TransferError> {
        match code {
            0 => Ok(FileFormat::Text),
            1 => Ok(FileFormat::Csv),
            2 => Ok(FileFormat::Xls),
            3 => Ok(FileFormat::Xlsx),
            4 => Ok(FileFormat::Pipe),
            other => Err(TransferError::UnsupportedFormat(format!(
                "unknown format code {other}"
            ))),
        }
    }

    #[must_use]
    pub fn code(self) -> i32 {
        self as i32
    }

    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            FileFormat::Text | FileFormat::Pipe => "txt",
            FileFormat::Csv => "csv",
            FileFormat::Xls => "xls",
            FileFormat::Xlsx => "xlsx",
        }
    }

    /// Guess the format from a file extension.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_string_lossy().to_ascii_lowercase();
        match ext.as_str() {
            "txt" | "tsv" => Some(FileFormat::Text),
            "csv" => Some(FileFormat::Csv),
            "xls" => Some(FileFormat::Xls),
            "xlsx" | "xlsm" => Some(FileFormat::Xlsx),
            _ => None,
        }
    }
}

/// Stable handle to a sheet inside one workbook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SheetId(pub(crate) usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetInfo {
    pub id: SheetId,
    pub name: String,
    /// Auto-generated by the host when the workbook was created.
    pub placeholder: bool,
}

/// 1-based cell coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellRef {
    pub row: u32,
    pub col: u16,
}

impl CellRef {
    pub const A1: CellRef = CellRef { row: 1, col: 1 };

    #[must_use]
    pub fn new(row: u32, col: u16) -> Self {
        Self {
            row: row.max(1),
            col: col.max(1),
        }
    }
}

/// Header-row cell format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderStyle {
    pub bold: bool,
    /// Fill color as `0xRRGGBB`.
    pub fill_rgb: u32,
    pub font_rgb: u32,
}

impl Default for HeaderStyle {
    fn default() -> Self {
        Self {
            bold: true,
            fill_rgb: 0x0036_6092,
            font_rgb: 0x00FF_FFFF,
        }
    }
}

/// An open workbook.
pub trait Workbook: Send {
    fn sheets(&self) -> Vec<SheetInfo>;

    /// Case-sensitive exact match.
    fn find_sheet(&self, name: &str) -> Option<SheetId> {
        self.sheets()
            .into_iter()
            .find(|sheet| sheet.name == name)
            .map(|sheet| sheet.id)
    }

    fn add_sheet(&mut self, name: &str) -> Result<SheetId, TransferError>;

    fn remove_sheet(&mut self, sheet: SheetId) -> Result<(), TransferError>;

    fn clear_sheet(&mut self, sheet: SheetId) -> Result<(), TransferError>;

    fn write_header(
        &mut self,
        sheet: SheetId,
        origin: CellRef,
        names: &[String],
        style: &HeaderStyle,
    ) -> Result<(), TransferError>;

    /// Paste every row of `rows` as one block with its top-left at `origin`.
    fn paste(
        &mut self,
        sheet: SheetId,
        origin: CellRef,
        rows: &ResultSet,
    ) -> Result<(), TransferError>;

    /// Value at `at`, or `None` for an empty cell.
    fn read_cell(&self, sheet: SheetId, at: CellRef) -> Option<RowValues>;

    fn autofit_columns(&mut self, sheet: SheetId) -> Result<(), TransferError>;

    fn activate(&mut self, sheet: SheetId) -> Result<(), TransferError>;

    /// Where the workbook was last opened from or saved to.
    fn path(&self) -> Option<&Path>;

    /// Save to [`Workbook::path`] in the format it was opened or last saved with.
    fn save(&mut self) -> Result<(), TransferError>;

    fn save_as(&mut self, path: &Path, format: FileFormat) -> Result<(), TransferError>;

    /// Discard the in-memory document. Never fails.
    fn close(&mut self);
}

/// A running document-automation application.
pub trait AutomationHost: Send {
    fn new_workbook(&mut self) -> Result<Box<dyn Workbook>, TransferError>;

    fn open_workbook(&mut self, path: &Path) -> Result<Box<dyn Workbook>, TransferError>;

    /// Shut the application down. Never fails.
    fn quit(&mut self);
}

/// Starts document-automation applications.
pub trait HostFactory: Send + Sync {
    fn new_application(
        &self,
        config: &EngineConfig,
    ) -> Result<Box<dyn AutomationHost>, TransferError>;
}

/// One host application and the workbook it has open.
///
/// Closing (explicitly or by drop) closes the workbook and quits the host.
pub struct DocumentSession {
    host: Option<Box<dyn AutomationHost>>,
    workbook: Option<Box<dyn Workbook>>,
}

impl DocumentSession {
    /// Start a host and create a new workbook in it.
    ///
    /// # Errors
    /// Propagates host start-up or workbook creation failures; a host that
    /// started is quit again before returning.
    pub fn create(factory: &dyn HostFactory, config: &EngineConfig) -> Result<Self, TransferError> {
        Self::start(factory, config, |host| host.new_workbook())
    }

    /// Start a host and open `path` in it.
    ///
    /// # Errors
    /// Same as [`DocumentSession::create`].
    pub fn open(
        factory: &dyn HostFactory,
        config: &EngineConfig,
        path: &Path,
    ) -> Result<Self, TransferError> {
        Self::start(factory, config, |host| host.open_workbook(path))
    }

    fn start(
        factory: &dyn HostFactory,
        config: &EngineConfig,
        load: impl FnOnce(&mut dyn AutomationHost) -> Result<Box<dyn Workbook>, TransferError>,
    ) -> Result<Self, TransferError> {
        let mut host = factory.new_application(config)?;
        match load(host.as_mut()) {
            Ok(workbook) => {
                debug!("document session started");
                Ok(Self {
                    host: Some(host),
                    workbook: Some(workbook),
                })
            }
            Err(err) => {
                host.quit();
                Err(err)
            }
        }
    }

    /// # Errors
    /// Returns `NoWorkbook` once the session has been closed.
    pub fn workbook(&mut self) -> Result<&mut dyn Workbook, TransferError> {
        match self.workbook.as_mut() {
            Some(workbook) => Ok(workbook.as_mut()),
            None => Err(TransferError::NoWorkbook),
        }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.workbook.is_some()
    }

    /// Close the workbook and quit the host. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(mut workbook) = self.workbook.take() {
            workbook.close();
        }
        if let Some(mut host) = self.host.take() {
            host.quit();
            debug!("document session closed");
        }
    }
}

impl Drop for DocumentSession {
    fn drop(&mut self) {
        if self.is_open() {
            warn!("document session dropped while open; closing it");
        }
        self.close();
    }
}
