//! Destination table contracts and column mappings used by ingestion.

use crate::types::DeclaredType;

/// One destination column as declared by the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableColumn {
    pub name: String,
    pub declared: DeclaredType,
    /// Type name exactly as the database reports it.
    pub native_type: String,
    pub nullable: bool,
}

impl TableColumn {
    #[must_use]
    pub fn new(name: impl Into<String>, native_type: impl Into<String>, nullable: bool) -> Self {
        let native_type = native_type.into();
        Self {
            name: name.into(),
            declared: DeclaredType::from_native(&native_type),
            native_type,
            nullable,
        }
    }
}

/// Ordered column contract of a destination table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationTableSchema {
    pub table: String,
    pub columns: Vec<TableColumn>,
}

impl DestinationTableSchema {
    #[must_use]
    pub fn new(table: impl Into<String>, columns: Vec<TableColumn>) -> Self {
        Self {
            table: table.into(),
            columns,
        }
    }

    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        find_name(self.columns.iter().map(|c| c.name.as_str()), name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Identifies a column of the external source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceColumn {
    Name(String),
    /// Zero-based position.
    Ordinal(usize),
}

/// Ordered (source column, destination column) pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMapping {
    pairs: Vec<(SourceColumn, String)>,
}

impl ColumnMapping {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a source column by name onto a destination column.
    #[must_use]
    pub fn map(mut self, source: impl Into<String>, destination: impl Into<String>) -> Self {
        self.pairs
            .push((SourceColumn::Name(source.into()), destination.into()));
        self
    }

    /// Map a source column by zero-based position onto a destination column.
    #[must_use]
    pub fn map_ordinal(mut self, source: usize, destination: impl Into<String>) -> Self {
        self.pairs
            .push((SourceColumn::Ordinal(source), destination.into()));
        self
    }

    #[must_use]
    pub fn pairs(&self) -> &[(SourceColumn, String)] {
        &self.pairs
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl<S: Into<String>, D: Into<String>> FromIterator<(S, D)> for ColumnMapping {
    fn from_iter<I: IntoIterator<Item = (S, D)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(ColumnMapping::new(), |m, (s, d)| m.map(s, d))
    }
}

/// How source fields are matched to destination columns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MappingMode {
    /// Match by name: exact first, then ASCII case-insensitive.
    #[default]
    ByName,
    /// Destination column `i` reads source field `i`.
    Positional,
    /// Explicit pairs replace the default mapping entirely.
    Explicit(ColumnMapping),
}

/// Exact match first, then ASCII case-insensitive.
pub(crate) fn find_name<'a>(
    mut names: impl Iterator<Item = &'a str> + Clone,
    wanted: &str,
) -> Option<usize> {
    names
        .clone()
        .position(|n| n == wanted)
        .or_else(|| names.position(|n| n.eq_ignore_ascii_case(wanted)))
}
