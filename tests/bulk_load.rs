#![cfg(feature = "sqlite")]

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tabular_bridge::prelude::*;
use tokio::runtime::Runtime;

/// In-memory source that records whether it has been closed.
struct VecSource {
    columns: Vec<String>,
    rows: Vec<Vec<RowValues>>,
    open: bool,
    closed: Arc<AtomicBool>,
}

impl VecSource {
    fn new(columns: &[&str], rows: Vec<Vec<RowValues>>) -> (Self, Arc<AtomicBool>) {
        let closed = Arc::new(AtomicBool::new(false));
        let source = Self {
            columns: columns.iter().map(ToString::to_string).collect(),
            rows,
            open: false,
            closed: Arc::clone(&closed),
        };
        (source, closed)
    }
}

#[async_trait]
impl ExternalSource for VecSource {
    fn describe(&self) -> String {
        "vec source".into()
    }

    async fn open(&mut self) -> Result<(), TransferError> {
        self.open = true;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn query<'s>(&'s mut self, _selector: &str) -> Result<BoxCursor<'s>, TransferError> {
        let mut rows = ResultSet::new(Arc::new(self.columns.clone()));
        for row in &self.rows {
            rows.add_row_values(row.clone());
        }
        Ok(Box::new(rows.into_cursor()))
    }

    fn close(&mut self) {
        self.open = false;
        self.closed.store(true, Ordering::SeqCst);
    }
}

fn text(s: &str) -> RowValues {
    RowValues::Text(s.into())
}

async fn connected(prefix: &str, batch: usize) -> Result<TransferEngine, TransferError> {
    let config = EngineConfig {
        bulk_batch_size: batch,
        ..EngineConfig::default()
    };
    let mut engine = common::engine_with(SqliteServer::new(), config);
    engine.connect(common::memory_profile(prefix)).await?;
    engine
        .execute_command("CREATE TABLE dest (id INTEGER NOT NULL, name TEXT) STRICT", &[])
        .await?;
    Ok(engine)
}

#[test]
fn raw_load_stops_at_the_first_rejected_row() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let mut engine = connected("rawfail", 2).await?;
        let (mut source, closed) = VecSource::new(
            &["id", "name"],
            vec![
                vec![RowValues::Int(1), text("a")],
                vec![RowValues::Int(2), text("b")],
                vec![text("abc"), text("c")],
                vec![RowValues::Int(4), text("d")],
            ],
        );
        let err = engine
            .bulk_load(&mut source, &LoadRequest::new("dest", "rows"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::BulkLoad { ref table, .. } if table == "dest"));
        assert!(matches!(err.root_cause(), TransferError::SqliteError(_)));
        assert!(closed.load(Ordering::SeqCst));

        // the first full batch was committed before the failure
        let count = engine.execute_scalar("SELECT count(*) FROM dest", &[]).await?;
        assert_eq!(count, Some(RowValues::Int(2)));
        Ok(())
    })
}

#[test]
fn validated_load_reports_row_and_column() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let mut engine = connected("validfail", 0).await?;
        let (mut source, closed) = VecSource::new(
            &["name", "ID"],
            vec![vec![text("a"), text("1")], vec![text("b"), text("abc")]],
        );
        let request = LoadRequest::new("dest", "rows").validated(true);
        let err = engine.bulk_load(&mut source, &request).await.unwrap_err();
        match err.root_cause() {
            TransferError::TypeCoercion {
                row,
                column,
                value,
                target,
            } => {
                assert_eq!(*row, 2);
                assert_eq!(column, "id");
                assert_eq!(value, "abc");
                assert_eq!(*target, DeclaredType::Integer);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(closed.load(Ordering::SeqCst));
        // one batch for the whole load: nothing was committed
        let count = engine.execute_scalar("SELECT count(*) FROM dest", &[]).await?;
        assert_eq!(count, Some(RowValues::Int(0)));
        Ok(())
    })
}

#[test]
fn validated_load_coerces_text_values() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let mut engine = connected("validok", 0).await?;
        let (mut source, closed) = VecSource::new(
            &["id", "name", "extra"],
            vec![
                vec![text("5"), text("five"), text("ignored")],
                vec![RowValues::Float(6.0), RowValues::Null, text("ignored")],
            ],
        );
        let request = LoadRequest::new("dest", "rows").validated(true);
        let summary = engine.bulk_load(&mut source, &request).await?;
        assert_eq!(summary.rows, 2);
        assert!(closed.load(Ordering::SeqCst));
        let rows = common::rows_of(&mut engine, "SELECT id, name FROM dest ORDER BY id").await?;
        assert_eq!(
            rows,
            vec![
                vec![RowValues::Int(5), text("five")],
                vec![RowValues::Int(6), RowValues::Null],
            ]
        );
        Ok(())
    })
}

#[test]
fn explicit_mapping_and_schema_mismatch() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let mut engine = connected("mapping", 0).await?;
        let (mut source, _) = VecSource::new(&["code", "label"], vec![vec![text("7"), text("x")]]);
        let mapping = ColumnMapping::new().map("code", "id").map_ordinal(1, "name");
        let request = LoadRequest::new("dest", "rows")
            .validated(true)
            .with_mapping(mapping);
        assert_eq!(engine.bulk_load(&mut source, &request).await?.rows, 1);

        let (mut source, closed) = VecSource::new(&["code"], vec![vec![text("8")]]);
        let request = LoadRequest::new("dest", "rows").validated(true);
        let err = engine.bulk_load(&mut source, &request).await.unwrap_err();
        assert!(matches!(err.root_cause(), TransferError::SchemaMismatch { column, .. } if column == "id"));
        assert!(closed.load(Ordering::SeqCst));

        let (mut source, _) = VecSource::new(&["id"], vec![vec![RowValues::Int(1)]]);
        let err = engine
            .bulk_load(&mut source, &LoadRequest::new("missing_table", "rows"))
            .await
            .unwrap_err();
        assert!(matches!(err.root_cause(), TransferError::TableNotFound(_)));
        Ok(())
    })
}

#[test]
fn loading_requires_a_connection() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let mut engine = common::engine();
        let (mut source, closed) = VecSource::new(&["id"], vec![]);
        let err = engine
            .bulk_load(&mut source, &LoadRequest::new("dest", "rows"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::NotConnected(_)));
        assert!(!closed.load(Ordering::SeqCst));
        Ok(())
    })
}

#[test]
fn delimited_files_without_header_load_by_position() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("people.csv");
        std::fs::write(&path, "1,ann\n2,bob\n")?;
        let mut engine = connected("headerless", 0).await?;
        let options = DelimitedOptions {
            delimiter: Delimiter::COMMA,
            has_header: false,
        };
        let summary = engine.load_delimited_file(&path, "dest", options).await?;
        assert_eq!(summary.rows, 2);
        let rows = common::rows_of(&mut engine, "SELECT id, name FROM dest ORDER BY id").await?;
        assert_eq!(rows[1], vec![RowValues::Int(2), text("bob")]);
        Ok(())
    })
}
