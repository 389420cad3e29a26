#![cfg(feature = "sqlite")]

mod common;

use tabular_bridge::prelude::*;
use tokio::runtime::Runtime;

#[test]
fn scalar_command_and_query() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let mut engine = common::engine();
        engine.connect(common::memory_profile("statements")).await?;
        engine
            .execute_command("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT, seen TEXT)", &[])
            .await?;
        let inserted = engine
            .execute_command(
                "INSERT INTO t (id, name, seen) VALUES (1, 'a', '2024-01-02 03:04:05'), (2, 'b', NULL), (3, 'c', NULL)",
                &[],
            )
            .await?;
        assert_eq!(inserted, 3);

        let updated = engine
            .execute_command(
                "UPDATE t SET name = :name WHERE id > :min",
                &[
                    Param::named("name", RowValues::Text("z".into())),
                    Param::named("min", RowValues::Int(1)),
                ],
            )
            .await?;
        assert_eq!(updated, 2);

        let count = engine
            .execute_scalar("SELECT count(*) FROM t WHERE name = ?1", &[RowValues::Text("z".into()).into()])
            .await?;
        assert_eq!(count, Some(RowValues::Int(2)));

        let none = engine.execute_scalar("SELECT id FROM t WHERE id > 100", &[]).await?;
        assert_eq!(none, None);

        let rows = common::rows_of(&mut engine, "SELECT id, name FROM t ORDER BY id").await?;
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], vec![RowValues::Int(1), RowValues::Text("a".into())]);
        assert_eq!(rows[2], vec![RowValues::Int(3), RowValues::Text("z".into())]);

        let mut cursor = engine.execute_query("SELECT id, name FROM t ORDER BY id", &[]).await?;
        assert_eq!(cursor.columns().as_slice(), ["id".to_string(), "name".to_string()]);
        let first = cursor.next_row().await?.ok_or("no rows")?;
        assert_eq!(first.get("name"), Some(&RowValues::Text("a".into())));
        drop(cursor);

        engine.shutdown().await;
        Ok(())
    })
}

#[test]
fn bad_sql_reports_the_driver_error() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let mut engine = common::engine();
        engine.connect(common::memory_profile("badsql")).await?;
        assert!(engine.execute_command("SELEC nonsense", &[]).await.is_err());
        assert!(engine.execute_query("SELECT * FROM missing", &[]).await.is_err());
        // the connection survives statement errors
        assert_eq!(engine.execute_scalar("SELECT 7", &[]).await?, Some(RowValues::Int(7)));
        Ok(())
    })
}

#[test]
fn procedures_return_their_code() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let server = SqliteServer::new()
            .with_procedure("add_one", |args| match args.first() {
                Some(RowValues::Int(v)) => Ok(Some(v + 1)),
                _ => Err("add_one needs an integer".to_string()),
            })?
            .with_procedure("fire_and_forget", |_| Ok(None))?;
        let mut engine = common::engine_with(server, EngineConfig::default());
        engine.connect(common::memory_profile("procs")).await?;

        assert_eq!(engine.execute_procedure("add_one", &[RowValues::Int(41).into()]).await?, 42);

        let err = engine.execute_procedure("fire_and_forget", &[]).await.unwrap_err();
        assert!(matches!(err, TransferError::ProcedureError { ref reason, .. } if reason == "no return value"));

        let err = engine
            .execute_procedure("add_one", &[RowValues::Text("x".into()).into()])
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::ProcedureError { .. }));

        assert!(engine.execute_procedure("missing_proc", &[]).await.is_err());
        assert!(matches!(
            engine.execute_procedure("x; DROP TABLE t", &[]).await,
            Err(TransferError::ProcedureError { .. })
        ));
        Ok(())
    })
}

#[test]
fn cursor_connection_fetches_whole_results() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let mut engine = common::engine();
        engine.connect(common::memory_profile("static")).await?;
        engine.execute_command("CREATE TABLE t (id INTEGER)", &[]).await?;
        engine.execute_command("INSERT INTO t VALUES (1), (2)", &[]).await?;

        let connections = engine.connections();
        let mut exec = connections.executor(ConnectionKind::Cursor).await?;
        let rows = exec.fetch_static("SELECT id FROM t ORDER BY id", &[]).await?;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows.column_names().as_slice(), ["id".to_string()]);
        assert_eq!(rows.results[1].get("id"), Some(&RowValues::Int(2)));

        let schema = exec.table_schema("t").await?;
        assert_eq!(schema.column_names(), vec!["id".to_string()]);
        Ok(())
    })
}
