#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tabular_bridge::prelude::*;

static NEXT_CATALOG: AtomicUsize = AtomicUsize::new(0);

/// Shared in-memory database private to one test.
pub fn memory_profile(prefix: &str) -> ConnectionProfile {
    let n = NEXT_CATALOG.fetch_add(1, Ordering::SeqCst);
    ConnectionProfile::integrated(":memory:", format!("{prefix}_{}_{n}", std::process::id()))
}

pub fn engine_with(server: SqliteServer, config: EngineConfig) -> TransferEngine {
    TransferEngine::new(Arc::new(server), Arc::new(XlsxHostFactory::new()), config)
}

pub fn engine() -> TransferEngine {
    engine_with(SqliteServer::new(), EngineConfig::default())
}

/// Every row of `sql`, values only.
pub async fn rows_of(
    engine: &mut TransferEngine,
    sql: &str,
) -> Result<Vec<Vec<RowValues>>, TransferError> {
    let mut cursor = engine.execute_query(sql, &[]).await?;
    let mut rows = Vec::new();
    while let Some(row) = cursor.next_row().await? {
        rows.push(row.into_values());
    }
    Ok(rows)
}

pub fn ints(values: &[i64]) -> Vec<RowValues> {
    values.iter().map(|v| RowValues::Int(*v)).collect()
}
