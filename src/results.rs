//! Rows and materialized result sets shared by every backend and sink.

mod cursor;
mod result_set;
mod row;

pub use cursor::ResultSetCursor;
pub use result_set::ResultSet;
pub use row::DbRow;

pub(crate) use row::index_columns;
