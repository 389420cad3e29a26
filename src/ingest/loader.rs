use std::time::Duration;

use tracing::{debug, info};

use super::adapter::{RawRowShaper, ValidatingRowAdapter};
use super::source::ExternalSource;
use crate::backend::{BoxCursor, BulkCopyOptions, Session};
use crate::config::EngineConfig;
use crate::error::TransferError;
use crate::executor::interruptible;
use crate::schema::{ColumnMapping, MappingMode};

/// What to load and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    pub table: String,
    /// File name, sheet name, or `select * from [name$]`.
    pub selector: String,
    /// Route rows through [`ValidatingRowAdapter`].
    pub validate: bool,
    /// Replaces the default mapping entirely when set.
    pub mapping: Option<ColumnMapping>,
}

impl LoadRequest {
    /// Raw load of `selector` into `table`, positional mapping.
    #[must_use]
    pub fn new(table: impl Into<String>, selector: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            selector: selector.into(),
            validate: false,
            mapping: None,
        }
    }

    #[must_use]
    pub fn validated(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    #[must_use]
    pub fn with_mapping(mut self, mapping: ColumnMapping) -> Self {
        self.mapping = Some(mapping);
        self
    }

    /// Explicit mapping if given; otherwise by name for validated loads and by
    /// position for raw ones.
    #[must_use]
    pub fn mapping_mode(&self) -> MappingMode {
        match &self.mapping {
            Some(mapping) if !mapping.is_empty() => MappingMode::Explicit(mapping.clone()),
            _ if self.validate => MappingMode::ByName,
            _ => MappingMode::Positional,
        }
    }
}

/// Outcome of a completed load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadSummary {
    pub table: String,
    pub rows: u64,
}

/// Streams an external source into a destination table over a bulk-copy channel.
#[derive(Debug, Clone)]
pub struct BulkLoader {
    batch_size: usize,
    timeout: Duration,
}

impl BulkLoader {
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            batch_size: config.bulk_batch_size,
            timeout: config.bulk_copy_timeout(),
        }
    }

    /// Open `source`, copy the selected rows into `request.table`, and close
    /// `source` again whatever happens.
    ///
    /// Rows are pulled one at a time, so memory use does not grow with the
    /// source. After a failure the destination may hold some committed batches.
    ///
    /// A copy that overruns the bulk-copy timeout is abandoned, and its open
    /// batch rolled back, before `Timeout` (wrapped in `BulkLoad`) is returned.
    ///
    /// # Errors
    /// Returns the source's open error as is; any failure after that is a
    /// `BulkLoad` wrapping the cause.
    pub async fn load(
        &self,
        session: &mut dyn Session,
        source: &mut dyn ExternalSource,
        request: &LoadRequest,
    ) -> Result<LoadSummary, TransferError> {
        if !session.is_open() {
            return Err(TransferError::NotConnected(session.kind()));
        }
        if let Err(err) = source.open().await {
            source.close();
            return Err(err);
        }
        debug!(source = %source.describe(), table = %request.table, "bulk load started");
        let interrupt = session.interrupter();
        let outcome = interruptible(
            self.timeout,
            "bulk copy",
            interrupt.as_ref(),
            self.stream(session, source, request),
        )
        .await;
        source.close();
        match outcome {
            Ok(rows) => {
                info!(table = %request.table, rows, "bulk load finished");
                Ok(LoadSummary {
                    table: request.table.clone(),
                    rows,
                })
            }
            Err(err @ TransferError::BulkLoad { .. }) => Err(err),
            Err(err) => Err(TransferError::bulk_load(&request.table, err)),
        }
    }

    async fn stream(
        &self,
        session: &mut dyn Session,
        source: &mut dyn ExternalSource,
        request: &LoadRequest,
    ) -> Result<u64, TransferError> {
        let schema = session.table_schema(&request.table).await?;
        let mode = request.mapping_mode();
        let cursor = source.query(&request.selector).await?;
        let mut rows: BoxCursor<'_> = if request.validate {
            Box::new(ValidatingRowAdapter::new(cursor, schema, &mode)?)
        } else {
            Box::new(RawRowShaper::new(cursor, &schema, &mode)?)
        };
        let options = BulkCopyOptions {
            table: request.table.clone(),
            columns: rows.columns().to_vec(),
            batch_size: self.batch_size,
            timeout: self.timeout,
        };
        let mut channel = session.bulk_copy_channel(options).await?;
        loop {
            let next = match rows.next_row().await {
                Ok(Some(row)) => channel.send_row(row.into_values()).await,
                Ok(None) => break,
                Err(err) => Err(err),
            };
            if let Err(err) = next {
                channel.abort().await;
                return Err(err);
            }
        }
        channel.finish().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_mapping_depends_on_validation() {
        let raw = LoadRequest::new("t", "f.txt");
        assert_eq!(raw.mapping_mode(), MappingMode::Positional);
        let checked = raw.clone().validated(true);
        assert_eq!(checked.mapping_mode(), MappingMode::ByName);
        let mapping = ColumnMapping::new().map("a", "b");
        let explicit = checked.with_mapping(mapping.clone());
        assert_eq!(explicit.mapping_mode(), MappingMode::Explicit(mapping));
    }
}
