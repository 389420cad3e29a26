//! Reference document host backed by an in-memory workbook model.
//!
//! Existing documents are read with calamine (or the csv crate for text
//! formats); saving writes xlsx through `rust_xlsxwriter`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use calamine::{Reader, open_workbook_auto};
use chrono::NaiveDate;
use rust_xlsxwriter::{Color, Format, Worksheet};
use tracing::debug;

use super::host::{
    AutomationHost, CellRef, FileFormat, HeaderStyle, HostFactory, SheetId, SheetInfo, Workbook,
};
use crate::config::EngineConfig;
use crate::error::TransferError;
use crate::ingest::cell_value;
use crate::results::ResultSet;
use crate::types::RowValues;

const MAX_ROWS: u32 = 1_048_576;
const MAX_COLS: u16 = 16_384;
const MAX_SHEET_NAME: usize = 31;
const DATETIME_FORMAT: &str = "yyyy-mm-dd hh:mm:ss";

/// Starts [`XlsxHost`] instances and counts the ones still running.
#[derive(Debug, Clone, Default)]
pub struct XlsxHostFactory {
    live: Arc<AtomicUsize>,
}

impl XlsxHostFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Hosts started by this factory that have not quit yet.
    #[must_use]
    pub fn live_hosts(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

impl HostFactory for XlsxHostFactory {
    fn new_application(
        &self,
        config: &EngineConfig,
    ) -> Result<Box<dyn AutomationHost>, TransferError> {
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(XlsxHost {
            placeholders: config.new_workbook_sheets.max(1),
            live: Some(Arc::clone(&self.live)),
        }))
    }
}

#[derive(Debug)]
pub struct XlsxHost {
    placeholders: usize,
    live: Option<Arc<AtomicUsize>>,
}

impl XlsxHost {
    fn ensure_running(&self) -> Result<(), TransferError> {
        if self.live.is_some() {
            Ok(())
        } else {
            Err(TransferError::HostError("host has quit".into()))
        }
    }
}

impl AutomationHost for XlsxHost {
    fn new_workbook(&mut self) -> Result<Box<dyn Workbook>, TransferError> {
        self.ensure_running()?;
        let mut book = XlsxWorkbook::empty();
        for n in 1..=self.placeholders {
            book.push_sheet(format!("Sheet{n}"), true);
        }
        book.active = book.sheets.first().map(|s| s.id);
        Ok(Box::new(book))
    }

    fn open_workbook(&mut self, path: &Path) -> Result<Box<dyn Workbook>, TransferError> {
        self.ensure_running()?;
        let format = FileFormat::from_path(path).ok_or_else(|| {
            TransferError::UnsupportedFormat(format!("cannot open {}", path.display()))
        })?;
        let mut book = match format {
            FileFormat::Csv => XlsxWorkbook::read_text(path, b',')?,
            FileFormat::Text | FileFormat::Pipe => XlsxWorkbook::read_text(path, b'\t')?,
            FileFormat::Xls | FileFormat::Xlsx => XlsxWorkbook::read_workbook(path)?,
        };
        book.path = Some(path.to_path_buf());
        book.format = format;
        debug!(path = %path.display(), sheets = book.sheets.len(), "workbook opened");
        Ok(Box::new(book))
    }

    fn quit(&mut self) {
        if let Some(live) = self.live.take() {
            live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for XlsxHost {
    fn drop(&mut self) {
        self.quit();
    }
}

#[derive(Debug, Clone, Copy)]
struct HeaderBand {
    row: u32,
    first_col: u16,
    last_col: u16,
    style: HeaderStyle,
}

impl HeaderBand {
    fn covers(&self, row: u32, col: u16) -> bool {
        row == self.row && (self.first_col..=self.last_col).contains(&col)
    }
}

#[derive(Debug)]
struct SheetData {
    id: SheetId,
    name: String,
    placeholder: bool,
    /// Keyed by 1-based (row, col).
    cells: BTreeMap<(u32, u16), RowValues>,
    header: Option<HeaderBand>,
    autofit: bool,
}

impl SheetData {
    fn clear(&mut self) {
        self.cells.clear();
        self.header = None;
        self.autofit = false;
    }

    fn extent(&self) -> (u32, u16) {
        self.cells
            .keys()
            .fold((0, 0), |(rows, cols), &(r, c)| (rows.max(r), cols.max(c)))
    }
}

/// In-memory workbook owned by an [`XlsxHost`].
#[derive(Debug)]
pub struct XlsxWorkbook {
    sheets: Vec<SheetData>,
    next_id: usize,
    active: Option<SheetId>,
    path: Option<PathBuf>,
    format: FileFormat,
    closed: bool,
}

impl XlsxWorkbook {
    fn empty() -> Self {
        Self {
            sheets: Vec::new(),
            next_id: 0,
            active: None,
            path: None,
            format: FileFormat::Xlsx,
            closed: false,
        }
    }

    fn push_sheet(&mut self, name: String, placeholder: bool) -> SheetId {
        let id = SheetId(self.next_id);
        self.next_id += 1;
        self.sheets.push(SheetData {
            id,
            name,
            placeholder,
            cells: BTreeMap::new(),
            header: None,
            autofit: false,
        });
        id
    }

    fn read_workbook(path: &Path) -> Result<Self, TransferError> {
        let mut source = open_workbook_auto(path)?;
        let mut book = Self::empty();
        for name in source.sheet_names() {
            let range = source.worksheet_range(&name)?;
            let id = book.push_sheet(name, false);
            let (top, left) = range.start().unwrap_or((0, 0));
            let sheet = book.sheet_mut(id)?;
            for (row, col, cell) in range.used_cells() {
                let value = cell_value(cell);
                if value.is_null() {
                    continue;
                }
                let at = cell_key(top as usize + row, left as usize + col)?;
                sheet.cells.insert(at, value);
            }
        }
        if book.sheets.is_empty() {
            book.push_sheet("Sheet1".into(), true);
        }
        book.active = book.sheets.first().map(|s| s.id);
        Ok(book)
    }

    fn read_text(path: &Path, delimiter: u8) -> Result<Self, TransferError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .delimiter(delimiter)
            .flexible(true)
            .from_path(path)?;
        let name = path
            .file_stem()
            .map_or_else(|| "Sheet1".to_string(), |s| s.to_string_lossy().into_owned());
        let mut book = Self::empty();
        let id = book.push_sheet(truncate_name(&name), false);
        let sheet = book.sheet_mut(id)?;
        for (row, record) in reader.records().enumerate() {
            for (col, field) in record?.iter().enumerate() {
                if !field.is_empty() {
                    sheet
                        .cells
                        .insert(cell_key(row, col)?, RowValues::Text(field.to_string()));
                }
            }
        }
        book.active = Some(id);
        Ok(book)
    }

    fn ensure_open(&self) -> Result<(), TransferError> {
        if self.closed {
            Err(TransferError::NoWorkbook)
        } else {
            Ok(())
        }
    }

    fn sheet_mut(&mut self, id: SheetId) -> Result<&mut SheetData, TransferError> {
        self.ensure_open()?;
        self.sheets
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| TransferError::HostError(format!("unknown sheet {id:?}")))
    }

    fn write_xlsx(&self, path: &Path) -> Result<(), TransferError> {
        let mut book = rust_xlsxwriter::Workbook::new();
        let datetime = Format::new().set_num_format(DATETIME_FORMAT);
        for sheet in &self.sheets {
            let worksheet = book.add_worksheet();
            worksheet.set_name(&sheet.name)?;
            let header = sheet.header.map(|band| (band, header_format(&band.style)));
            for (&(row, col), value) in &sheet.cells {
                let format = match &header {
                    Some((band, format)) if band.covers(row, col) => Some(format),
                    _ => None,
                };
                write_cell(worksheet, row - 1, col - 1, value, format, &datetime)?;
            }
            if sheet.autofit {
                worksheet.autofit();
            }
            if self.active == Some(sheet.id) {
                worksheet.set_active(true);
            }
        }
        book.save(path)?;
        Ok(())
    }

    fn write_text(&self, path: &Path, delimiter: u8) -> Result<(), TransferError> {
        let sheet = self
            .active
            .and_then(|id| self.sheets.iter().find(|s| s.id == id))
            .or_else(|| self.sheets.first())
            .ok_or_else(|| TransferError::HostError("workbook has no sheets".into()))?;
        let mut writer = csv::WriterBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .from_path(path)
            .map_err(|e| export_io(path, e.into()))?;
        let (rows, cols) = sheet.extent();
        for row in 1..=rows {
            let record: Vec<String> = (1..=cols)
                .map(|col| {
                    sheet
                        .cells
                        .get(&(row, col))
                        .map(ToString::to_string)
                        .unwrap_or_default()
                })
                .collect();
            writer
                .write_record(&record)
                .map_err(|e| export_io(path, e.into()))?;
        }
        writer.flush().map_err(|e| export_io(path, e))
    }
}

impl Workbook for XlsxWorkbook {
    fn sheets(&self) -> Vec<SheetInfo> {
        if self.closed {
            return Vec::new();
        }
        self.sheets
            .iter()
            .map(|s| SheetInfo {
                id: s.id,
                name: s.name.clone(),
                placeholder: s.placeholder,
            })
            .collect()
    }

    fn add_sheet(&mut self, name: &str) -> Result<SheetId, TransferError> {
        self.ensure_open()?;
        check_sheet_name(name)?;
        if self
            .sheets
            .iter()
            .any(|s| s.name.eq_ignore_ascii_case(name))
        {
            return Err(TransferError::HostError(format!(
                "a sheet named `{name}` already exists"
            )));
        }
        let id = self.push_sheet(name.to_string(), false);
        debug!(sheet = name, "sheet added");
        Ok(id)
    }

    fn remove_sheet(&mut self, sheet: SheetId) -> Result<(), TransferError> {
        self.ensure_open()?;
        if self.sheets.len() <= 1 {
            return Err(TransferError::HostError(
                "a workbook must keep at least one sheet".into(),
            ));
        }
        let index = self
            .sheets
            .iter()
            .position(|s| s.id == sheet)
            .ok_or_else(|| TransferError::HostError(format!("unknown sheet {sheet:?}")))?;
        let removed = self.sheets.remove(index);
        if self.active == Some(removed.id) {
            self.active = self.sheets.first().map(|s| s.id);
        }
        debug!(sheet = %removed.name, "sheet removed");
        Ok(())
    }

    fn clear_sheet(&mut self, sheet: SheetId) -> Result<(), TransferError> {
        self.sheet_mut(sheet)?.clear();
        Ok(())
    }

    fn write_header(
        &mut self,
        sheet: SheetId,
        origin: CellRef,
        names: &[String],
        style: &HeaderStyle,
    ) -> Result<(), TransferError> {
        let data = self.sheet_mut(sheet)?;
        if names.is_empty() {
            return Ok(());
        }
        let top = (origin.row as usize).saturating_sub(1);
        let left = (origin.col as usize).saturating_sub(1);
        let (row, first_col) = cell_key(top, left)?;
        let (_, last_col) = cell_key(top, left + names.len() - 1)?;
        for (offset, name) in names.iter().enumerate() {
            data.cells
                .insert(cell_key(top, left + offset)?, RowValues::Text(name.clone()));
        }
        data.header = Some(HeaderBand {
            row,
            first_col,
            last_col,
            style: *style,
        });
        Ok(())
    }

    fn paste(
        &mut self,
        sheet: SheetId,
        origin: CellRef,
        rows: &ResultSet,
    ) -> Result<(), TransferError> {
        let data = self.sheet_mut(sheet)?;
        let top = (origin.row as usize).saturating_sub(1);
        let left = (origin.col as usize).saturating_sub(1);
        let width = rows.column_names().len().max(1);
        // validate the far corner before touching any cell
        if !rows.is_empty() {
            cell_key(top + rows.len() - 1, left + width - 1)?;
        }
        for (r, row) in rows.results.iter().enumerate() {
            for (c, value) in row.values.iter().enumerate() {
                let key = cell_key(top + r, left + c)?;
                if value.is_null() {
                    data.cells.remove(&key);
                } else {
                    data.cells.insert(key, value.clone());
                }
            }
        }
        Ok(())
    }

    fn read_cell(&self, sheet: SheetId, at: CellRef) -> Option<RowValues> {
        if self.closed {
            return None;
        }
        self.sheets
            .iter()
            .find(|s| s.id == sheet)
            .and_then(|s| s.cells.get(&(at.row, at.col)).cloned())
    }

    fn autofit_columns(&mut self, sheet: SheetId) -> Result<(), TransferError> {
        self.sheet_mut(sheet)?.autofit = true;
        Ok(())
    }

    fn activate(&mut self, sheet: SheetId) -> Result<(), TransferError> {
        self.sheet_mut(sheet)?;
        self.active = Some(sheet);
        Ok(())
    }

    fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn save(&mut self) -> Result<(), TransferError> {
        let path = self
            .path
            .clone()
            .ok_or_else(|| TransferError::HostError("workbook has no file name yet".into()))?;
        self.save_as(&path, self.format)
    }

    fn save_as(&mut self, path: &Path, format: FileFormat) -> Result<(), TransferError> {
        self.ensure_open()?;
        match format {
            FileFormat::Xlsx => self.write_xlsx(path)?,
            FileFormat::Csv => self.write_text(path, b',')?,
            FileFormat::Text => self.write_text(path, b'\t')?,
            FileFormat::Xls | FileFormat::Pipe => {
                return Err(TransferError::UnsupportedFormat(format!(
                    "this host cannot save {format:?} documents"
                )));
            }
        }
        self.path = Some(path.to_path_buf());
        self.format = format;
        debug!(path = %path.display(), ?format, "workbook saved");
        Ok(())
    }

    fn close(&mut self) {
        self.sheets.clear();
        self.active = None;
        self.closed = true;
    }
}

fn export_io(path: &Path, source: std::io::Error) -> TransferError {
    TransferError::ExportIo {
        target: path.display().to_string(),
        source,
    }
}

/// 0-based (row, col) to a 1-based cell key inside the sheet grid.
fn cell_key(row: usize, col: usize) -> Result<(u32, u16), TransferError> {
    let r = u32::try_from(row + 1).ok().filter(|r| *r <= MAX_ROWS);
    let c = u16::try_from(col + 1).ok().filter(|c| *c <= MAX_COLS);
    match (r, c) {
        (Some(r), Some(c)) => Ok((r, c)),
        _ => Err(TransferError::HostError(format!(
            "cell ({}, {}) is outside the sheet grid",
            row + 1,
            col + 1
        ))),
    }
}

fn check_sheet_name(name: &str) -> Result<(), TransferError> {
    let invalid = name.trim().is_empty()
        || name.chars().count() > MAX_SHEET_NAME
        || name.contains(['[', ']', ':', '*', '?', '/', '\\'])
        || name.starts_with('\'')
        || name.ends_with('\'');
    if invalid {
        Err(TransferError::HostError(format!(
            "`{name}` is not a valid sheet name"
        )))
    } else {
        Ok(())
    }
}

fn truncate_name(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '[' | ']' | ':' | '*' | '?' | '/' | '\\'))
        .take(MAX_SHEET_NAME)
        .collect()
}

fn header_format(style: &HeaderStyle) -> Format {
    let mut format = Format::new()
        .set_background_color(Color::RGB(style.fill_rgb))
        .set_font_color(Color::RGB(style.font_rgb));
    if style.bold {
        format = format.set_bold();
    }
    format
}

/// Excel serial day number (1900 date system).
fn excel_serial(value: chrono::NaiveDateTime) -> f64 {
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default();
    let millis = (value - epoch).num_milliseconds();
    millis as f64 / 86_400_000.0
}

fn write_cell(
    worksheet: &mut Worksheet,
    row: u32,
    col: u16,
    value: &RowValues,
    format: Option<&Format>,
    datetime: &Format,
) -> Result<(), TransferError> {
    match (value, format) {
        (RowValues::Null, _) => {}
        (RowValues::Timestamp(ts), _) => {
            worksheet.write_number_with_format(row, col, excel_serial(*ts), datetime)?;
        }
        (RowValues::Int(i), Some(f)) => {
            worksheet.write_number_with_format(row, col, *i as f64, f)?;
        }
        (RowValues::Int(i), None) => {
            worksheet.write_number(row, col, *i as f64)?;
        }
        (RowValues::Float(v), Some(f)) => {
            worksheet.write_number_with_format(row, col, *v, f)?;
        }
        (RowValues::Float(v), None) => {
            worksheet.write_number(row, col, *v)?;
        }
        (RowValues::Bool(b), Some(f)) => {
            worksheet.write_boolean_with_format(row, col, *b, f)?;
        }
        (RowValues::Bool(b), None) => {
            worksheet.write_boolean(row, col, *b)?;
        }
        (other, Some(f)) => {
            worksheet.write_string_with_format(row, col, other.to_string(), f)?;
        }
        (other, None) => {
            worksheet.write_string(row, col, other.to_string())?;
        }
    }
    Ok(())
}
