use async_trait::async_trait;

use crate::backend::BoxCursor;
use crate::error::TransferError;

/// External tabular data opened independently of the database connections.
///
/// A source is opened once, queried for a forward-only cursor, and closed.
/// Closing never fails and is safe to repeat.
#[async_trait]
pub trait ExternalSource: Send {
    /// Human-readable location, used in logs and errors.
    fn describe(&self) -> String;

    /// Acquire whatever the source needs to be queried.
    async fn open(&mut self) -> Result<(), TransferError>;

    fn is_open(&self) -> bool;

    /// Rows selected by `selector` (a file name, a sheet name, or
    /// `select * from [name$]`). The cursor keeps the source borrowed.
    async fn query<'s>(&'s mut self, selector: &str) -> Result<BoxCursor<'s>, TransferError>;

    /// Release the source.
    fn close(&mut self);
}

/// Extract the table, file, or sheet name a selector refers to.
///
/// Accepts `name`, `[name]`, `[name$]`, `name$`, and `select * from <any of those>`.
///
/// # Errors
/// Returns `SourceError` for an empty selector.
pub fn parse_selector(selector: &str) -> Result<String, TransferError> {
    let mut text = selector.trim().trim_end_matches(';').trim();
    let lower = text.to_ascii_lowercase();
    if lower.starts_with("select") {
        if let Some(at) = lower.rfind(" from ") {
            text = text[at + " from ".len()..].trim();
        }
    }
    let name = text
        .trim_start_matches(['[', '`', '"'])
        .trim_end_matches([']', '`', '"'])
        .trim_end_matches('$')
        .trim();
    if name.is_empty() {
        return Err(TransferError::SourceError(format!(
            "selector `{selector}` does not name a table"
        )));
    }
    Ok(name.to_string())
}

/// Column names for a header row; blank headers become `F<n>` (1-based).
pub(crate) fn header_names<I, S>(cells: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    cells
        .into_iter()
        .enumerate()
        .map(|(i, cell)| {
            let cell = cell.as_ref().trim();
            if cell.is_empty() {
                generated_name(i)
            } else {
                cell.to_string()
            }
        })
        .collect()
}

pub(crate) fn generated_name(index: usize) -> String {
    format!("F{}", index + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_forms() -> Result<(), TransferError> {
        assert_eq!(parse_selector("orders.txt")?, "orders.txt");
        assert_eq!(parse_selector("[Data$]")?, "Data");
        assert_eq!(parse_selector("Data$")?, "Data");
        assert_eq!(parse_selector("select * from [Q1 Sales$]")?, "Q1 Sales");
        assert_eq!(parse_selector("SELECT * FROM [orders.txt];")?, "orders.txt");
        assert!(parse_selector("  []  ").is_err());
        Ok(())
    }

    #[test]
    fn blank_headers_get_generated_names() {
        assert_eq!(header_names(["id", "", " name "]), vec!["id", "F2", "name"]);
    }
}
