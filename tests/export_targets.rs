#![cfg(feature = "sqlite")]

mod common;

use calamine::{Data, Reader, open_workbook_auto};
use tabular_bridge::prelude::*;
use tokio::runtime::Runtime;

async fn seeded(prefix: &str) -> Result<TransferEngine, TransferError> {
    let mut engine = common::engine();
    engine.connect(common::memory_profile(prefix)).await?;
    engine.execute_command("CREATE TABLE t (a INTEGER, b INTEGER)", &[]).await?;
    engine.execute_command("INSERT INTO t VALUES (1, 2), (3, 4)", &[]).await?;
    Ok(engine)
}

#[test]
fn pipe_file_has_header_and_no_trailing_delimiter() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("t.txt");
        let mut engine = seeded("pipe").await?;
        let summary = engine
            .write_query_to_file("SELECT a, b FROM t ORDER BY a", &[], &path, Delimiter::PIPE)
            .await?;
        assert_eq!(summary.rows, 2);
        let text = std::fs::read_to_string(&path)?;
        assert_eq!(text.lines().collect::<Vec<_>>(), vec!["a|b", "1|2", "3|4"]);
        Ok(())
    })
}

#[test]
fn empty_result_still_writes_the_header() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("empty.txt");
        let mut engine = seeded("emptyfile").await?;
        let summary = engine
            .write_query_to_file("SELECT a, b FROM t WHERE a > 100", &[], &path, Delimiter::TAB)
            .await?;
        assert_eq!(summary.rows, 0);
        assert_eq!(std::fs::read_to_string(&path)?, "a\tb\n");
        Ok(())
    })
}

#[test]
fn flat_file_round_trips_through_bulk_load() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("t.txt");
        let mut engine = seeded("roundtrip").await?;
        engine
            .write_query_to_file("SELECT a, b FROM t ORDER BY a", &[], &path, Delimiter::PIPE)
            .await?;
        engine.execute_command("CREATE TABLE copy (a INTEGER, b INTEGER)", &[]).await?;
        let loaded = engine
            .load_delimited_file(&path, "copy", DelimitedOptions::default())
            .await?;
        assert_eq!(loaded.rows, 2);
        let rows = common::rows_of(&mut engine, "SELECT a, b FROM copy ORDER BY a").await?;
        assert_eq!(rows, vec![common::ints(&[1, 2]), common::ints(&[3, 4])]);
        Ok(())
    })
}

#[test]
fn nulls_survive_the_flat_file_round_trip() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nulls.txt");
        let mut engine = common::engine();
        engine.connect(common::memory_profile("nulls")).await?;
        engine.execute_command("CREATE TABLE t (a INTEGER, b REAL)", &[]).await?;
        engine
            .execute_command("INSERT INTO t VALUES (1, NULL), (NULL, 2.5)", &[])
            .await?;
        engine
            .write_query_to_file("SELECT a, b FROM t ORDER BY b", &[], &path, Delimiter::PIPE)
            .await?;
        assert_eq!(std::fs::read_to_string(&path)?, "a|b\n1|\n|2.5\n");

        engine.execute_command("CREATE TABLE copy (a INTEGER, b REAL)", &[]).await?;
        engine
            .load_delimited_file(&path, "copy", DelimitedOptions::default())
            .await?;
        let original = common::rows_of(&mut engine, "SELECT a, b FROM t ORDER BY b").await?;
        let copied = common::rows_of(&mut engine, "SELECT a, b FROM copy ORDER BY b").await?;
        assert_eq!(
            original,
            vec![
                vec![RowValues::Int(1), RowValues::Null],
                vec![RowValues::Null, RowValues::Float(2.5)],
            ]
        );
        assert_eq!(copied, original);
        Ok(())
    })
}

#[test]
fn report_sheet_is_created_then_overwritten() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("report.xlsx");
        let mut engine = seeded("report").await?;

        engine.new_workbook()?;
        engine
            .write_query_to_sheet("SELECT a, b FROM t ORDER BY a", &[], "Report", false)
            .await?;
        let summary = engine
            .write_query_to_sheet("SELECT b AS only_b FROM t WHERE a = 3", &[], "Report", false)
            .await?;
        assert_eq!(summary.rows, 1);
        engine.save_workbook_as(&path, FileFormat::Xlsx)?;
        engine.close_workbook();

        let mut book = open_workbook_auto(&path)?;
        assert_eq!(book.sheet_names(), vec!["Report".to_string()]);
        let range = book.worksheet_range("Report")?;
        assert_eq!(range.get_size(), (2, 1));
        assert_eq!(range.get((0, 0)), Some(&Data::String("only_b".into())));
        assert!(matches!(range.get((1, 0)), Some(Data::Float(v)) if (*v - 4.0).abs() < f64::EPSILON)
            || range.get((1, 0)) == Some(&Data::Int(4)));
        Ok(())
    })
}

#[test]
fn sheet_export_failures_close_the_workbook() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let mut engine = seeded("sheetfail").await?;
        assert!(matches!(
            engine.write_query_to_sheet("SELECT 1", &[], "S", false).await,
            Err(TransferError::NoWorkbook)
        ));

        engine.new_workbook()?;
        let err = engine
            .write_query_to_sheet("UPDATE t SET a = a + 10", &[], "S", false)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::NoResultSet));
        assert!(!engine.has_workbook());
        // refused before it ran
        let rows = common::rows_of(&mut engine, "SELECT a FROM t ORDER BY a").await?;
        assert_eq!(rows, vec![common::ints(&[1]), common::ints(&[3])]);

        engine.new_workbook()?;
        assert!(engine
            .write_query_to_sheet("SELECT * FROM missing", &[], "S", false)
            .await
            .is_err());
        assert!(!engine.has_workbook());
        Ok(())
    })
}

#[test]
fn created_workbooks_save_where_they_were_created() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("made.xlsx");
        let mut engine = seeded("create").await?;
        engine.create_workbook(&path, FileFormat::Xlsx)?;
        assert!(path.exists());
        engine
            .write_query_to_sheet("SELECT a FROM t ORDER BY a", &[], "Numbers", true)
            .await?;
        engine.close_workbook();

        engine.open_workbook(&path)?;
        let book = engine.workbook()?;
        let names: Vec<String> = book.sheets().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["Numbers".to_string()]);

        assert!(matches!(
            engine.create_workbook(&dir.path().join("old.xls"), FileFormat::Xls),
            Err(TransferError::UnsupportedFormat(_))
        ));
        assert!(!engine.has_workbook());
        Ok(())
    })
}

#[test]
fn sheet_round_trips_through_validated_load() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("t.xlsx");
        let mut engine = seeded("sheetload").await?;
        engine.new_workbook()?;
        engine
            .write_query_to_sheet("SELECT a, b FROM t ORDER BY a", &[], "Data", false)
            .await?;
        engine.save_workbook_as(&path, FileFormat::Xlsx)?;
        engine.close_workbook();

        engine
            .execute_command("CREATE TABLE copy (b INTEGER NOT NULL, a INTEGER NOT NULL)", &[])
            .await?;
        let loaded = engine
            .load_workbook_sheet(&path, "select * from [Data$]", "copy", None)
            .await?;
        assert_eq!(loaded.rows, 2);
        let rows = common::rows_of(&mut engine, "SELECT a, b FROM copy ORDER BY a").await?;
        assert_eq!(rows, vec![common::ints(&[1, 2]), common::ints(&[3, 4])]);
        Ok(())
    })
}

#[test]
fn report_scenario_leaves_exactly_one_sheet() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("scenario.xlsx");
        let mut engine = common::engine();
        engine.connect(common::memory_profile("scenario")).await?;
        engine.execute_command("CREATE TABLE t (id INTEGER, name TEXT)", &[]).await?;
        engine.execute_command("INSERT INTO t VALUES (1, 'ann'), (2, 'bob')", &[]).await?;

        engine.new_workbook()?;
        engine
            .write_query_to_sheet("SELECT id, name FROM t", &[], "Report", false)
            .await?;
        engine.save_workbook_as(&path, FileFormat::Xlsx)?;
        engine.shutdown().await;

        let mut book = open_workbook_auto(&path)?;
        assert_eq!(book.sheet_names(), vec!["Report".to_string()]);
        let range = book.worksheet_range("Report")?;
        assert_eq!(range.get((0, 0)), Some(&Data::String("id".into())));
        assert_eq!(range.get((0, 1)), Some(&Data::String("name".into())));
        assert_eq!(range.get((2, 1)), Some(&Data::String("bob".into())));
        Ok(())
    })
}
