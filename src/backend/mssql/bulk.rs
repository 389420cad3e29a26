use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, Timelike};
use tiberius::numeric::Numeric;
use tiberius::time::{DateTime, SmallDateTime};
use tiberius::{ColumnData, IntoSql, TokenRow};
use tracing::{debug, warn};

use super::config::MssqlClient;
use crate::backend::BulkCopyChannel;
use crate::error::TransferError;
use crate::ingest::coerce_value;
use crate::schema::TableColumn;
use crate::types::RowValues;

/// Rows sent per `INSERT BULK` request when no batch size is configured.
const CHUNK_ROWS: usize = 5000;

/// One destination column and where its value comes from in a sent row.
pub(super) struct Slot {
    pub(super) column: TableColumn,
    pub(super) source: Option<usize>,
}

/// Bulk copy over tiberius `bulk_insert`, wrapped in explicit transactions so a
/// batch commits as a unit.
pub(super) struct MssqlBulkChannel<'s> {
    pub(super) client: &'s mut MssqlClient,
    pub(super) poisoned: &'s AtomicBool,
    pub(super) table: String,
    pub(super) layout: Vec<Slot>,
    pub(super) batch_size: usize,
    pub(super) pending: Vec<TokenRow<'static>>,
    pub(super) in_batch: usize,
    pub(super) sent: u64,
    pub(super) tx_open: bool,
}

impl MssqlBulkChannel<'_> {
    async fn simple(&mut self, sql: &str) -> Result<(), TransferError> {
        self.client.simple_query(sql).await?.into_results().await?;
        Ok(())
    }

    async fn flush_pending(&mut self) -> Result<(), TransferError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        if !self.tx_open {
            self.simple("BEGIN TRANSACTION").await?;
            self.tx_open = true;
        }
        let rows = std::mem::take(&mut self.pending);
        let mut request = self.client.bulk_insert(&self.table).await?;
        for row in rows {
            request.send(row).await?;
        }
        request.finalize().await?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), TransferError> {
        self.flush_pending().await?;
        if self.tx_open {
            self.simple("COMMIT TRANSACTION").await?;
            self.tx_open = false;
            debug!(table = %self.table, rows = self.sent, "mssql bulk batch committed");
        }
        self.in_batch = 0;
        Ok(())
    }

    fn token_row(&self, values: &[RowValues]) -> Result<TokenRow<'static>, TransferError> {
        let row_number = usize::try_from(self.sent).unwrap_or(usize::MAX).saturating_add(1);
        let mut token_row = TokenRow::new();
        for slot in &self.layout {
            let value = match slot.source {
                Some(i) => values.get(i).unwrap_or(&RowValues::Null),
                None => &RowValues::Null,
            };
            token_row.push(to_column_data(value, &slot.column, row_number)?);
        }
        Ok(token_row)
    }
}

#[async_trait]
impl BulkCopyChannel for MssqlBulkChannel<'_> {
    async fn send_row(&mut self, values: Vec<RowValues>) -> Result<(), TransferError> {
        let row = self.token_row(&values)?;
        self.pending.push(row);
        self.sent += 1;
        self.in_batch += 1;
        if self.batch_size > 0 && self.in_batch >= self.batch_size {
            self.commit().await?;
        } else if self.pending.len() >= CHUNK_ROWS {
            self.flush_pending().await?;
        }
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> Result<u64, TransferError> {
        self.commit().await?;
        Ok(self.sent)
    }

    async fn abort(mut self: Box<Self>) {
        self.pending.clear();
        if self.tx_open {
            if let Err(err) = self.simple("IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION").await {
                warn!(table = %self.table, "rollback after failed bulk copy failed: {err}");
                self.poisoned.store(true, Ordering::SeqCst);
            }
        }
    }
}

fn base_type(native: &str) -> String {
    native
        .split('(')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

fn numeric_scale(native: &str) -> u8 {
    native
        .split_once(',')
        .and_then(|(_, rest)| rest.trim_end_matches(')').trim().parse().ok())
        .unwrap_or(0)
}

fn null_for(base: &str) -> ColumnData<'static> {
    match base {
        "tinyint" => ColumnData::U8(None),
        "smallint" => ColumnData::I16(None),
        "int" => ColumnData::I32(None),
        "bigint" => ColumnData::I64(None),
        "bit" => ColumnData::Bit(None),
        "real" => ColumnData::F32(None),
        "float" | "money" | "smallmoney" => ColumnData::F64(None),
        "decimal" | "numeric" => ColumnData::Numeric(None),
        "date" => ColumnData::Date(None),
        "datetime" => ColumnData::DateTime(None),
        "smalldatetime" => ColumnData::SmallDateTime(None),
        "datetime2" => ColumnData::DateTime2(None),
        "binary" | "varbinary" | "image" => ColumnData::Binary(None),
        _ => ColumnData::String(None),
    }
}

/// Convert a value to the TDS representation of the destination column.
pub(super) fn to_column_data(
    value: &RowValues,
    column: &TableColumn,
    row: usize,
) -> Result<ColumnData<'static>, TransferError> {
    let failure = || TransferError::TypeCoercion {
        row,
        column: column.name.clone(),
        value: value.to_string(),
        target: column.declared,
    };
    let base = base_type(&column.native_type);
    let coerced = coerce_value(value, column.declared).ok_or_else(failure)?;
    let data = match coerced {
        RowValues::Null => null_for(&base),
        RowValues::Int(i) => match base.as_str() {
            "tinyint" => ColumnData::U8(Some(u8::try_from(i).map_err(|_| failure())?)),
            "smallint" => ColumnData::I16(Some(i16::try_from(i).map_err(|_| failure())?)),
            "int" => ColumnData::I32(Some(i32::try_from(i).map_err(|_| failure())?)),
            _ => ColumnData::I64(Some(i)),
        },
        #[allow(clippy::cast_possible_truncation)]
        RowValues::Float(f) => match base.as_str() {
            "real" => ColumnData::F32(Some(f as f32)),
            "decimal" | "numeric" => {
                let scale = numeric_scale(&column.native_type);
                let scaled = (f * 10f64.powi(i32::from(scale))).round() as i128;
                ColumnData::Numeric(Some(Numeric::new_with_scale(scaled, scale)))
            }
            _ => ColumnData::F64(Some(f)),
        },
        RowValues::Bool(b) => ColumnData::Bit(Some(b)),
        RowValues::Text(s) => ColumnData::String(Some(Cow::Owned(s))),
        RowValues::Blob(b) => ColumnData::Binary(Some(Cow::Owned(b))),
        RowValues::Timestamp(dt) => match base.as_str() {
            "date" => dt.date().into_sql(),
            "datetime" => legacy_datetime(dt).ok_or_else(failure)?,
            "smalldatetime" => small_datetime(dt).ok_or_else(failure)?,
            _ => dt.into_sql(),
        },
    };
    Ok(data)
}

fn days_since_1900(dt: NaiveDateTime) -> Option<i64> {
    let epoch = NaiveDate::from_ymd_opt(1900, 1, 1)?;
    Some((dt.date() - epoch).num_days())
}

fn legacy_datetime(dt: NaiveDateTime) -> Option<ColumnData<'static>> {
    let days = i32::try_from(days_since_1900(dt)?).ok()?;
    let time = dt.time();
    let millis = u64::from(time.num_seconds_from_midnight()) * 1000
        + u64::from(time.nanosecond() / 1_000_000);
    let fragments = u32::try_from(millis * 300 / 1000).ok()?;
    Some(ColumnData::DateTime(Some(DateTime::new(days, fragments))))
}

fn small_datetime(dt: NaiveDateTime) -> Option<ColumnData<'static>> {
    let days = u16::try_from(days_since_1900(dt)?).ok()?;
    let minutes = u16::try_from(dt.time().num_seconds_from_midnight() / 60).ok()?;
    Some(ColumnData::SmallDateTime(Some(SmallDateTime::new(
        days, minutes,
    ))))
}
