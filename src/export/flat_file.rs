use std::fmt;
use std::path::Path;

use clap::ValueEnum;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::debug;

use crate::backend::RowCursor;
use crate::error::TransferError;
use crate::types::RowValues;

/// Single-byte field separator for flat files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Delimiter(u8);

impl Delimiter {
    pub const PIPE: Delimiter = Delimiter(b'|');
    pub const TAB: Delimiter = Delimiter(b'\t');
    pub const COMMA: Delimiter = Delimiter(b',');

    /// Custom delimiter.
    ///
    /// # Errors
    /// Returns `ConfigError` unless `c` is a printable ASCII character or tab.
    pub fn new(c: char) -> Result<Self, TransferError> {
        if c == '\t' || (c.is_ascii() && !c.is_ascii_control() && !c.is_ascii_alphanumeric()) {
            Ok(Delimiter(c as u8))
        } else {
            Err(TransferError::ConfigError(format!(
                "{c:?} cannot be used as a field delimiter"
            )))
        }
    }

    #[must_use]
    pub fn as_byte(self) -> u8 {
        self.0
    }

    #[must_use]
    pub fn as_char(self) -> char {
        char::from(self.0)
    }
}

impl Default for Delimiter {
    fn default() -> Self {
        Delimiter::PIPE
    }
}

impl fmt::Display for Delimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// Named delimiters selectable from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum DelimiterPreset {
    #[default]
    Pipe,
    Tab,
    Comma,
}

impl From<DelimiterPreset> for Delimiter {
    fn from(preset: DelimiterPreset) -> Self {
        match preset {
            DelimiterPreset::Pipe => Delimiter::PIPE,
            DelimiterPreset::Tab => Delimiter::TAB,
            DelimiterPreset::Comma => Delimiter::COMMA,
        }
    }
}

/// One output line (without the newline). Values containing the delimiter are
/// written as is.
#[must_use]
pub fn format_line<'a, I>(fields: I, delimiter: Delimiter) -> String
where
    I: IntoIterator<Item = &'a RowValues>,
{
    let mut line = String::new();
    for (i, value) in fields.into_iter().enumerate() {
        if i > 0 {
            line.push(delimiter.as_char());
        }
        line.push_str(&value.to_string());
    }
    line
}

fn io_error(path: &Path, source: std::io::Error) -> TransferError {
    TransferError::ExportIo {
        target: path.display().to_string(),
        source,
    }
}

/// Write a header line and every row of `cursor` to `path`, flushing after each
/// line. Returns the number of data rows written.
///
/// # Errors
/// Returns `ExportIo` on any write failure, or the cursor's own error.
pub async fn write_delimited(
    cursor: &mut dyn RowCursor,
    path: &Path,
    delimiter: Delimiter,
) -> Result<u64, TransferError> {
    let file = File::create(path).await.map_err(|e| io_error(path, e))?;
    let mut out = BufWriter::new(file);

    let header = cursor
        .columns()
        .iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(&delimiter.to_string());
    write_line(&mut out, path, &header).await?;

    let mut rows = 0u64;
    while let Some(row) = cursor.next_row().await? {
        write_line(&mut out, path, &format_line(&row.values, delimiter)).await?;
        rows += 1;
    }
    out.shutdown().await.map_err(|e| io_error(path, e))?;
    debug!(file = %path.display(), rows, "flat file written");
    Ok(rows)
}

async fn write_line(
    out: &mut BufWriter<File>,
    path: &Path,
    line: &str,
) -> Result<(), TransferError> {
    out.write_all(line.as_bytes())
        .await
        .map_err(|e| io_error(path, e))?;
    out.write_all(b"\n").await.map_err(|e| io_error(path, e))?;
    out.flush().await.map_err(|e| io_error(path, e))
}
