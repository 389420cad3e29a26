#![cfg(feature = "sqlite")]

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tabular_bridge::prelude::*;
use tokio::runtime::Runtime;

fn one_second(config: EngineConfig) -> EngineConfig {
    EngineConfig {
        command_timeout_secs: 1,
        bulk_copy_timeout_secs: 1,
        connect_timeout_secs: 1,
        ..config
    }
}

fn sleepy_server(millis: u64) -> Result<SqliteServer, TransferError> {
    SqliteServer::new().with_procedure("slow", move |_| {
        std::thread::sleep(Duration::from_millis(millis));
        Ok(Some(1))
    })
}

#[test]
fn timed_out_command_is_interrupted_and_leaves_no_rows() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let mut engine = common::engine_with(sleepy_server(1500)?, one_second(EngineConfig::default()));
        engine.connect(common::memory_profile("slowcmd")).await?;
        engine.execute_command("CREATE TABLE src (n INTEGER)", &[]).await?;
        engine.execute_command("INSERT INTO src VALUES (1), (2)", &[]).await?;
        engine.execute_command("CREATE TABLE t (v INTEGER)", &[]).await?;

        let err = engine
            .execute_command("INSERT INTO t SELECT slow() FROM src", &[])
            .await
            .unwrap_err();
        match err {
            TransferError::Timeout { operation, seconds } => {
                assert_eq!(operation, "command");
                assert_eq!(seconds, 1);
            }
            other => panic!("expected a timeout, got {other:?}"),
        }

        assert!(engine.is_live());
        let count = engine.execute_scalar("SELECT count(*) FROM t", &[]).await?;
        assert_eq!(count, Some(RowValues::Int(0)));
        assert_eq!(
            engine.execute_scalar("SELECT 7", &[]).await?,
            Some(RowValues::Int(7))
        );
        Ok::<(), TransferError>(())
    })?;
    Ok(())
}

#[test]
fn busy_session_is_replaced_after_a_timeout() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let server = sleepy_server(2500)?;
        let mut engine = common::engine_with(server.clone(), one_second(EngineConfig::default()));
        engine.connect(common::memory_profile("busy")).await?;

        assert!(matches!(
            engine.execute_scalar("SELECT slow()", &[]).await,
            Err(TransferError::Timeout { .. })
        ));
        // the routine cannot be interrupted, so the next statement runs on a new session
        assert_eq!(
            engine.execute_scalar("SELECT 7", &[]).await?,
            Some(RowValues::Int(7))
        );
        assert!(engine.is_live());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(server.live_sessions(ConnectionKind::Primary), 1);
        Ok::<(), TransferError>(())
    })?;
    Ok(())
}

/// Rows trickle out slower than the bulk-copy timeout allows.
struct TrickleSource {
    rows: usize,
    closed: Arc<AtomicBool>,
    open: bool,
}

struct TrickleCursor {
    inner: ResultSetCursor,
}

#[async_trait]
impl RowCursor for TrickleCursor {
    fn columns(&self) -> &Arc<Vec<String>> {
        self.inner.columns()
    }

    async fn next_row(&mut self) -> Result<Option<DbRow>, TransferError> {
        tokio::time::sleep(Duration::from_millis(300)).await;
        self.inner.next_row().await
    }
}

#[async_trait]
impl ExternalSource for TrickleSource {
    fn describe(&self) -> String {
        "trickle".into()
    }

    async fn open(&mut self) -> Result<(), TransferError> {
        self.open = true;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn query<'s>(&'s mut self, _selector: &str) -> Result<BoxCursor<'s>, TransferError> {
        let mut rows = ResultSet::new(Arc::new(vec!["id".to_string()]));
        for id in 0..self.rows {
            rows.add_row_values(vec![RowValues::Int(i64::try_from(id).unwrap_or(0))]);
        }
        Ok(Box::new(TrickleCursor {
            inner: rows.into_cursor(),
        }))
    }

    fn close(&mut self) {
        self.open = false;
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[test]
fn bulk_copy_timeout_rolls_back_and_closes_the_source() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let mut engine = common::engine_with(SqliteServer::new(), one_second(EngineConfig::default()));
        engine.connect(common::memory_profile("slowbulk")).await?;
        engine.execute_command("CREATE TABLE dest (id INTEGER)", &[]).await?;

        let closed = Arc::new(AtomicBool::new(false));
        let mut source = TrickleSource {
            rows: 10,
            closed: Arc::clone(&closed),
            open: false,
        };
        let err = engine
            .bulk_load(&mut source, &LoadRequest::new("dest", "rows"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::BulkLoad { .. }));
        assert!(matches!(
            err.root_cause(),
            TransferError::Timeout { operation, .. } if operation == "bulk copy"
        ));
        assert!(closed.load(Ordering::SeqCst));

        assert!(engine.is_live());
        let count = engine.execute_scalar("SELECT count(*) FROM dest", &[]).await?;
        assert_eq!(count, Some(RowValues::Int(0)));
        Ok::<(), TransferError>(())
    })?;
    Ok(())
}

/// Hangs in `open_session` while `stall` is set.
struct StallingServer {
    inner: SqliteServer,
    stall: Arc<AtomicBool>,
}

#[async_trait]
impl RelationalServer for StallingServer {
    async fn open_session(
        &self,
        profile: &ConnectionProfile,
        kind: ConnectionKind,
        config: &EngineConfig,
    ) -> Result<Box<dyn Session>, TransferError> {
        if self.stall.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        self.inner.open_session(profile, kind, config).await
    }
}

#[test]
fn connect_timeout_leaves_the_engine_unconnected() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let stall = Arc::new(AtomicBool::new(true));
        let server = StallingServer {
            inner: SqliteServer::new(),
            stall: Arc::clone(&stall),
        };
        let mut engine = TransferEngine::new(
            Arc::new(server),
            Arc::new(XlsxHostFactory::new()),
            one_second(EngineConfig::default()),
        );
        let profile = common::memory_profile("stall");

        assert!(matches!(
            engine.connect(profile.clone()).await,
            Err(TransferError::Timeout { seconds: 1, .. })
        ));
        assert!(!engine.is_live());
        assert!(matches!(
            engine.execute_scalar("SELECT 1", &[]).await,
            Err(TransferError::NotConnected(ConnectionKind::Primary))
        ));

        stall.store(false, Ordering::SeqCst);
        engine.connect(profile).await?;
        assert_eq!(
            engine.execute_scalar("SELECT 1", &[]).await?,
            Some(RowValues::Int(1))
        );
        Ok::<(), TransferError>(())
    })?;
    Ok(())
}
