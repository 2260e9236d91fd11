//! # ingest-cli
//!
//! Command-line front end for the tabular import engine.
//!
//! `ingest import` loads one delimited text file into one table,
//! `ingest import-dir` runs a directory as a multi-table import,
//! `ingest delete` clears target tables and `ingest job` executes a
//! job definition file.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use ingest_core::{ImportControl, RunSummary, TableIdentifier};
use ingest_db::{
    ConnectionConfig, ConstantColumnValues, DbConnection, DeleteMode, ImportOptions,
    KeyViolationMatcher, TableDeleter,
};
use ingest_pipeline::{FileLister, FileStemResolver, ImportJob, ImportRunner, TableNameResolver};
use ingest_text::TextParserConfig;

#[derive(Parser)]
#[command(name = "ingest")]
#[command(about = "Tabular data import engine CLI")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import one delimited text file into a table
    Import {
        /// Input file path
        file: PathBuf,

        /// Target table, optionally schema-qualified (defaults to the
        /// file name without extension)
        #[arg(short, long)]
        table: Option<String>,

        #[command(flatten)]
        target: TargetArgs,

        #[command(flatten)]
        format: FormatArgs,

        #[command(flatten)]
        options: OptionArgs,
    },

    /// Import every matching file of a directory as one multi-table run
    ImportDir {
        /// Directory holding one source file per table
        directory: PathBuf,

        /// Source file extension
        #[arg(long, default_value = "csv")]
        ext: String,

        /// Import in file name order instead of foreign-key order
        #[arg(long)]
        no_sort: bool,

        #[command(flatten)]
        target: TargetArgs,

        #[command(flatten)]
        format: FormatArgs,

        #[command(flatten)]
        options: OptionArgs,
    },

    /// Delete all rows from the given tables
    Delete {
        /// Tables to clear, children of foreign keys included
        #[arg(required = true)]
        tables: Vec<String>,

        /// Commit after each table instead of one transaction
        #[arg(long)]
        per_table: bool,

        /// Keep the given order instead of deleting children first
        #[arg(long)]
        no_sort: bool,

        #[command(flatten)]
        target: TargetArgs,
    },

    /// Execute an import job definition (YAML or JSON)
    Job {
        /// Job file path
        file: PathBuf,
    },
}

#[derive(Args)]
struct TargetArgs {
    /// Database file path
    #[arg(long, conflicts_with = "url")]
    db: Option<String>,

    /// Remote database URL
    #[arg(long)]
    url: Option<String>,

    /// Auth token for the remote database
    #[arg(long, requires = "url")]
    auth_token: Option<String>,
}

#[derive(Args)]
struct FormatArgs {
    /// Field delimiter
    #[arg(long)]
    delimiter: Option<char>,

    /// Quote character
    #[arg(long)]
    quote_char: Option<char>,

    /// Escape character instead of quote doubling
    #[arg(long)]
    escape_char: Option<char>,

    /// Treat the first line as data, not as a header
    #[arg(long)]
    no_header: bool,

    /// Reject records whose field count differs from the header
    #[arg(long)]
    strict_columns: bool,
}

#[derive(Args)]
struct OptionArgs {
    /// Import mode: insert, insertIgnore, upsert, update, insertUpdate
    /// or updateInsert
    #[arg(short, long, default_value = "insert")]
    mode: String,

    /// Key columns for update modes (comma separated)
    #[arg(long, value_delimiter = ',')]
    key_columns: Vec<String>,

    /// Rows bound per batched statement
    #[arg(long, default_value_t = 1)]
    batch_size: usize,

    /// Commit after this many processed rows
    #[arg(long)]
    commit_every: Option<usize>,

    /// Keep going after row errors
    #[arg(long)]
    continue_on_error: bool,

    /// Abort after this many rejected rows (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    max_errors: u64,

    /// Delete target table contents before importing (insert mode only)
    #[arg(long)]
    delete_target: bool,

    /// Create a missing target table from the file header
    #[arg(long)]
    create_target: bool,

    /// First data row to import (1-based)
    #[arg(long)]
    start_row: Option<u64>,

    /// Last data row to import (inclusive)
    #[arg(long)]
    end_row: Option<u64>,

    /// Write rejected raw records to this file
    #[arg(long)]
    bad_file: Option<PathBuf>,

    /// Constant column value, e.g. source=feed or seq=${line_number}
    #[arg(long = "constant")]
    constants: Vec<String>,

    /// Regex that classifies key violations for the update fallback
    #[arg(long)]
    key_violation: Option<String>,

    /// SQL statement to run before each table
    #[arg(long)]
    pre_statement: Option<String>,

    /// SQL statement to run after each table
    #[arg(long)]
    post_statement: Option<String>,

    /// Align sqlite_sequence with the imported keys after each table
    #[arg(long)]
    adjust_sequences: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let summary = match cli.command {
        Commands::Import {
            file,
            table,
            target,
            format,
            options,
        } => run_import(&file, table.as_deref(), &target, &format, &options).await?,
        Commands::ImportDir {
            directory,
            ext,
            no_sort,
            target,
            format,
            options,
        } => run_import_dir(&directory, &ext, no_sort, &target, &format, &options).await?,
        Commands::Delete {
            tables,
            per_table,
            no_sort,
            target,
        } => {
            run_delete(&tables, per_table, no_sort, &target).await?;
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Job { file } => run_job(&file).await?,
    };

    print_summary(&summary);
    if summary.has_errors() {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

async fn run_import(
    file: &Path,
    table: Option<&str>,
    target: &TargetArgs,
    format: &FormatArgs,
    options: &OptionArgs,
) -> anyhow::Result<RunSummary> {
    let table = match table {
        Some(expression) => TableIdentifier::parse(expression)?,
        None => FileStemResolver.resolve(file)?,
    };
    let runner = ImportRunner::new(connection(target))
        .with_options(build_options(options)?)
        .with_parser_config(build_parser_config(format))
        .with_constants(ConstantColumnValues::parse_list(&options.constants)?);
    cancel_on_ctrl_c(runner.control());
    Ok(runner.run_file(file, table).await?)
}

async fn run_import_dir(
    directory: &Path,
    ext: &str,
    no_sort: bool,
    target: &TargetArgs,
    format: &FormatArgs,
    options: &OptionArgs,
) -> anyhow::Result<RunSummary> {
    let mut import_options = build_options(options)?;
    // The multi-table deleter clears all targets up front, in
    // foreign-key-safe order.
    let delete_first = import_options.delete_target;
    import_options.delete_target = false;

    let runner = ImportRunner::new(connection(target))
        .with_options(import_options)
        .with_parser_config(build_parser_config(format))
        .with_constants(ConstantColumnValues::parse_list(&options.constants)?)
        .sorted_by_dependencies(!no_sort)
        .delete_before_import(delete_first);
    cancel_on_ctrl_c(runner.control());

    let lister = FileLister::new(directory).with_extension(ext);
    Ok(runner.run_directory(&lister, &FileStemResolver).await?)
}

async fn run_delete(
    tables: &[String],
    per_table: bool,
    no_sort: bool,
    target: &TargetArgs,
) -> anyhow::Result<()> {
    let identifiers = tables
        .iter()
        .map(|expression| TableIdentifier::parse(expression))
        .collect::<Result<Vec<_>, _>>()?;

    let connection = connection(target);
    connection.connect().await?;

    let control = ImportControl::new();
    cancel_on_ctrl_c(control.clone());
    let mode = if per_table {
        DeleteMode::PerTable
    } else {
        DeleteMode::SingleTransaction
    };
    let deleter = TableDeleter::new(connection)
        .mode(mode)
        .sorted_by_dependencies(!no_sort)
        .with_control(control);

    let deleted = deleter.delete_tables(&identifiers).await?;
    for (table, rows) in &deleted {
        println!("{table}: {rows} row(s) deleted");
    }
    Ok(())
}

async fn run_job(file: &Path) -> anyhow::Result<RunSummary> {
    let job = ImportJob::from_path(file)?;
    let runner = ImportRunner::from_job(&job)?;
    cancel_on_ctrl_c(runner.control());
    Ok(runner.run(&job).await?)
}

fn connection(target: &TargetArgs) -> DbConnection {
    let config = if let Some(path) = &target.db {
        ConnectionConfig::local(path.as_str())
    } else if let Some(url) = &target.url {
        ConnectionConfig::remote(
            url.as_str(),
            target.auth_token.clone().unwrap_or_default(),
        )
    } else {
        warn!("no --db or --url given, using an in-memory database");
        ConnectionConfig::in_memory()
    };
    DbConnection::with_config(config)
}

fn build_options(args: &OptionArgs) -> anyhow::Result<ImportOptions> {
    let key_violation_matcher = match &args.key_violation {
        Some(pattern) => KeyViolationMatcher::pattern(pattern)?,
        None => KeyViolationMatcher::default(),
    };
    Ok(ImportOptions {
        mode: args.mode.parse()?,
        key_columns: args.key_columns.clone(),
        batch_size: args.batch_size,
        commit_every: args.commit_every,
        continue_on_error: args.continue_on_error,
        max_errors: args.max_errors,
        delete_target: args.delete_target,
        create_target: args.create_target,
        adjust_sequences: args.adjust_sequences,
        start_row: args.start_row,
        end_row: args.end_row,
        bad_file: args.bad_file.clone(),
        pre_table_statement: args.pre_statement.clone(),
        post_table_statement: args.post_statement.clone(),
        key_violation_matcher,
        ..ImportOptions::default()
    })
}

fn build_parser_config(args: &FormatArgs) -> TextParserConfig {
    let mut config = TextParserConfig::new();
    if let Some(delimiter) = args.delimiter {
        config = config.delimiter(delimiter);
    }
    if let Some(quote_char) = args.quote_char {
        config = config.quote_char(quote_char);
    }
    if let Some(escape_char) = args.escape_char {
        config = config.escape_char(escape_char);
    }
    if args.no_header {
        config = config.without_header();
    }
    if args.strict_columns {
        config = config.strict_field_count();
    }
    config
}

/// First Ctrl-C flags the run as cancelled; open work is rolled back
/// on the import path.
fn cancel_on_ctrl_c(control: ImportControl) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("cancellation requested");
            control.cancel();
        }
    });
}

fn print_summary(summary: &RunSummary) {
    for message in &summary.messages {
        println!("{message}");
    }
    for stats in &summary.tables {
        println!(
            "{}: {} inserted, {} updated, {} rejected ({} rows read)",
            stats.table, stats.inserted, stats.updated, stats.rejected, stats.total
        );
    }
    println!(
        "Total: {} inserted, {} updated, {} rejected",
        summary.inserted_rows, summary.updated_rows, summary.rejected_rows
    );
    if summary.cancelled {
        println!("Import cancelled");
    }
}
