use std::sync::Arc;

use tracing::debug;

use crate::backend::RowCursor;
use crate::error::TransferError;
use crate::results::ResultSet;
use crate::sheets::{CellRef, HeaderStyle, SheetManager, SheetRef, Workbook};

/// Where data rows start: directly under the header.
pub const DATA_ORIGIN: CellRef = CellRef { row: 2, col: 1 };

/// Drain `cursor` into one block that can be pasted in a single call.
pub(crate) async fn collect_rows(cursor: &mut dyn RowCursor) -> Result<ResultSet, TransferError> {
    let mut rows = ResultSet::new(Arc::clone(cursor.columns()));
    while let Some(row) = cursor.next_row().await? {
        rows.add_row_values(row.into_values());
    }
    Ok(rows)
}

/// Replace the contents of sheet `name` with a styled header and `rows`.
pub(crate) fn write_sheet(
    manager: &SheetManager,
    workbook: &mut dyn Workbook,
    name: &str,
    rows: &ResultSet,
    style: &HeaderStyle,
) -> Result<SheetRef, TransferError> {
    let sheet = manager.find_or_create(workbook, name)?;
    if sheet.reused {
        manager.clear(workbook, &sheet)?;
    }
    manager.write_header(workbook, &sheet, rows.column_names(), style)?;
    if !rows.is_empty() {
        manager.paste(workbook, &sheet, DATA_ORIGIN, rows)?;
    }
    manager.autosize_columns(workbook, &sheet)?;
    manager.remove_default_sheets(workbook)?;
    workbook.activate(sheet.id)?;
    debug!(sheet = name, rows = rows.len(), reused = sheet.reused, "sheet written");
    Ok(sheet)
}
