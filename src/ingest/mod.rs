//! Ingestion: external sources, row validation, and bulk loading.

mod adapter;
mod coerce;
mod delimited;
mod loader;
mod source;
mod workbook_source;

pub use adapter::ValidatingRowAdapter;
pub use coerce::coerce_value;
pub use delimited::{DelimitedOptions, DelimitedTextSource};
pub use loader::{BulkLoader, LoadRequest, LoadSummary};
pub use source::{ExternalSource, parse_selector};
pub use workbook_source::WorkbookSource;

pub(crate) use workbook_source::cell_value;
