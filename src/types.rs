use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Values that can be stored in a database row or used as statement parameters.
///
/// The same enum flows through every surface: database rows, flat-file fields,
/// and spreadsheet cells.
/// ```rust
/// use tabular_bridge::prelude::*;
///
/// let params = vec![
///     Param::positional(RowValues::Int(1)),
///     Param::named("name", RowValues::Text("alice".into())),
/// ];
/// # let _ = params;
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum RowValues {
    /// Integer value (64-bit)
    Int(i64),
    /// Floating point value (64-bit)
    Float(f64),
    /// Text/string value
    Text(String),
    /// Boolean value
    Bool(bool),
    /// Timestamp value
    Timestamp(NaiveDateTime),
    /// NULL value
    Null,
    /// Binary data
    Blob(Vec<u8>),
}

impl RowValues {
    /// Check if this value is NULL
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_int(&self) -> Option<&i64> {
        if let RowValues::Int(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        if let RowValues::Text(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<&bool> {
        if let RowValues::Bool(value) = self {
            return Some(value);
        } else if let Some(i) = self.as_int() {
            if *i == 1 {
                return Some(&true);
            } else if *i == 0 {
                return Some(&false);
            }
        }
        None
    }

    #[must_use]
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        if let RowValues::Timestamp(value) = self {
            return Some(*value);
        } else if let Some(s) = self.as_text() {
            return parse_timestamp(s);
        }
        None
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        if let RowValues::Float(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_blob(&self) -> Option<&[u8]> {
        if let RowValues::Blob(bytes) = self {
            Some(bytes)
        } else {
            None
        }
    }
}

/// Renders the value the way it appears in a delimited flat file.
impl fmt::Display for RowValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowValues::Int(i) => write!(f, "{i}"),
            RowValues::Float(v) => write!(f, "{v}"),
            RowValues::Text(s) => f.write_str(s),
            RowValues::Bool(b) => write!(f, "{b}"),
            RowValues::Timestamp(dt) => write!(f, "{}", dt.format(TIMESTAMP_FORMAT)),
            RowValues::Null => Ok(()),
            RowValues::Blob(bytes) => {
                for byte in bytes {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}

pub(crate) const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Parse the timestamp spellings accepted from text sources.
#[must_use]
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    for fmt in [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y/%m/%d %H:%M:%S",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Declared type family of a destination column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeclaredType {
    Integer,
    Real,
    Text,
    Boolean,
    Timestamp,
    Blob,
}

impl DeclaredType {
    /// Map a native column type name to its family.
    ///
    /// Understands SQL Server type names and falls back to `SQLite` affinity rules
    /// (`INT` → integer, `CHAR`/`CLOB`/`TEXT` → text, `BLOB`/empty → blob,
    /// `REAL`/`FLOA`/`DOUB` → real, anything else numeric → real).
    #[must_use]
    pub fn from_native(type_name: &str) -> Self {
        let upper = type_name.trim().to_ascii_uppercase();
        let base = upper.split('(').next().unwrap_or("").trim();
        match base {
            "BIT" | "BOOL" | "BOOLEAN" => return DeclaredType::Boolean,
            "DATE" | "DATETIME" | "DATETIME2" | "SMALLDATETIME" | "TIMESTAMP"
            | "DATETIMEOFFSET" => return DeclaredType::Timestamp,
            "UNIQUEIDENTIFIER" | "XML" | "JSON" => return DeclaredType::Text,
            "VARBINARY" | "BINARY" | "IMAGE" => return DeclaredType::Blob,
            "MONEY" | "SMALLMONEY" | "DECIMAL" | "NUMERIC" => return DeclaredType::Real,
            _ => {}
        }
        if base.contains("INT") {
            DeclaredType::Integer
        } else if base.contains("CHAR") || base.contains("CLOB") || base.contains("TEXT") {
            DeclaredType::Text
        } else if base.is_empty() || base.contains("BLOB") {
            DeclaredType::Blob
        } else {
            DeclaredType::Real
        }
    }
}

impl fmt::Display for DeclaredType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeclaredType::Integer => "integer",
            DeclaredType::Real => "real",
            DeclaredType::Text => "text",
            DeclaredType::Boolean => "boolean",
            DeclaredType::Timestamp => "timestamp",
            DeclaredType::Blob => "blob",
        };
        f.write_str(name)
    }
}

/// A statement parameter: an optional name plus its value.
///
/// Unnamed parameters bind by position; named ones bind by name where the
/// backend supports it.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: Option<String>,
    pub value: RowValues,
}

impl Param {
    #[must_use]
    pub fn positional(value: RowValues) -> Self {
        Self { name: None, value }
    }

    #[must_use]
    pub fn named(name: impl Into<String>, value: RowValues) -> Self {
        Self {
            name: Some(name.into()),
            value,
        }
    }
}

impl From<RowValues> for Param {
    fn from(value: RowValues) -> Self {
        Param::positional(value)
    }
}

/// Which of the two connection slots an operation binds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionKind {
    /// Row-streaming client connection used for statements and bulk copy.
    Primary,
    /// Server-side-cursor connection used to fetch block-pasteable result sets.
    Cursor,
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionKind::Primary => f.write_str("primary"),
            ConnectionKind::Cursor => f.write_str("cursor"),
        }
    }
}
