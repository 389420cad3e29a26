use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tabular_bridge::backend::RelationalServer;
use tabular_bridge::export::{Delimiter, DelimiterPreset};
use tabular_bridge::ingest::DelimitedOptions;
use tabular_bridge::sheets::{FileFormat, XlsxHostFactory};
use tabular_bridge::{ConnectionProfile, EngineConfig, TransferEngine, TransferError};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BackendKind {
    #[cfg(feature = "sqlite")]
    Sqlite,
    #[cfg(feature = "mssql")]
    Mssql,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Move tables between databases, flat files, and workbooks")]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct ConnectionArgs {
    #[arg(long, value_enum, global = true)]
    backend: Option<BackendKind>,
    /// Database server (for SQLite: a directory, or `:memory:`).
    #[arg(long, global = true, default_value = ".")]
    server: String,
    #[arg(long, global = true, default_value = "")]
    catalog: String,
    #[arg(long, global = true)]
    user: Option<String>,
    #[arg(long, global = true)]
    password: Option<String>,
    #[arg(long, global = true)]
    port: Option<u16>,
    /// JSON file with engine settings.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a query result to a delimited flat file.
    ExportFile {
        #[arg(long)]
        query: String,
        #[arg(long)]
        out: PathBuf,
        #[arg(long, value_enum, default_value = "pipe")]
        delimiter: DelimiterPreset,
        /// Any other single-character delimiter; overrides `--delimiter`.
        #[arg(long)]
        delimiter_char: Option<char>,
    },
    /// Write a query result into a named sheet of a workbook.
    ExportSheet {
        #[arg(long)]
        query: String,
        #[arg(long)]
        sheet: String,
        #[arg(long)]
        out: PathBuf,
        #[arg(long, value_enum, default_value = "xlsx")]
        format: FileFormat,
        /// Add the sheet to `--out` when it already exists instead of starting over.
        #[arg(long)]
        update: bool,
    },
    /// Bulk-load a delimited text file into a table.
    LoadFile {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        table: String,
        #[arg(long, value_enum, default_value = "pipe")]
        delimiter: DelimiterPreset,
        /// The first line is data, not column names.
        #[arg(long)]
        no_header: bool,
    },
    /// Bulk-load one sheet of a workbook into a table.
    LoadSheet {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        sheet: String,
        #[arg(long)]
        table: String,
    },
}

fn server_for(kind: Option<BackendKind>) -> Result<Arc<dyn RelationalServer>, TransferError> {
    match kind {
        #[cfg(feature = "sqlite")]
        Some(BackendKind::Sqlite) => Ok(Arc::new(tabular_bridge::SqliteServer::new())),
        #[cfg(feature = "mssql")]
        Some(BackendKind::Mssql) => Ok(Arc::new(tabular_bridge::MssqlServer)),
        #[cfg(feature = "sqlite")]
        None => Ok(Arc::new(tabular_bridge::SqliteServer::new())),
        #[cfg(all(feature = "mssql", not(feature = "sqlite")))]
        None => Ok(Arc::new(tabular_bridge::MssqlServer)),
        #[cfg(not(any(feature = "sqlite", feature = "mssql")))]
        None => Err(TransferError::ConfigError(
            "built without any database backend".into(),
        )),
    }
}

async fn run(cli: Cli) -> Result<(), TransferError> {
    let args = cli.connection;
    let config = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    let mut builder = ConnectionProfile::builder(&args.server, &args.catalog).port(args.port);
    if let (Some(user), Some(password)) = (args.user, args.password) {
        builder = builder.login(user, password);
    }
    let profile = builder.finish();

    let mut engine = TransferEngine::new(
        server_for(args.backend)?,
        Arc::new(XlsxHostFactory::new()),
        config,
    );
    engine.connect(profile).await?;

    let outcome = match cli.command {
        Command::ExportFile {
            query,
            out,
            delimiter,
            delimiter_char,
        } => {
            let delimiter = match delimiter_char {
                Some(c) => Delimiter::new(c)?,
                None => delimiter.into(),
            };
            engine
                .write_query_to_file(&query, &[], &out, delimiter)
                .await
                .map(|summary| info!(rows = summary.rows, file = %out.display(), "exported"))
        }
        Command::ExportSheet {
            query,
            sheet,
            out,
            format,
            update,
        } => export_sheet(&mut engine, &query, &sheet, &out, format, update).await,
        Command::LoadFile {
            file,
            table,
            delimiter,
            no_header,
        } => {
            let options = DelimitedOptions {
                delimiter: delimiter.into(),
                has_header: !no_header,
            };
            engine
                .load_delimited_file(&file, &table, options)
                .await
                .map(|summary| info!(rows = summary.rows, table = %summary.table, "loaded"))
        }
        Command::LoadSheet { file, sheet, table } => engine
            .load_workbook_sheet(&file, &sheet, &table, None)
            .await
            .map(|summary| info!(rows = summary.rows, table = %summary.table, "loaded")),
    };
    engine.shutdown().await;
    outcome
}

async fn export_sheet(
    engine: &mut TransferEngine,
    query: &str,
    sheet: &str,
    out: &std::path::Path,
    format: FileFormat,
    update: bool,
) -> Result<(), TransferError> {
    if update && out.exists() {
        engine.open_workbook(out)?;
    } else {
        engine.new_workbook()?;
    }
    let summary = engine.write_query_to_sheet(query, &[], sheet, false).await?;
    engine.save_workbook_as(out, format)?;
    info!(rows = summary.rows, sheet, file = %out.display(), "exported");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}
