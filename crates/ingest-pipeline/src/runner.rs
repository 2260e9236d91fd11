//! Whole-run orchestration for single files and directories.

use std::path::Path;

use tracing::{info, warn};

use ingest_core::{
    ColumnIdentifier, DataReceiver, ImportControl, RowDataProducer, RunSummary, TableIdentifier,
};
use ingest_db::dependency;
use ingest_db::{ConstantColumnValues, DataImporter, DbConnection, ImportOptions};
use ingest_text::{TextFileParser, TextParserConfig};

use crate::job::ImportJob;
use crate::lister::{FileLister, FileStemResolver, ImportSource, TableNameResolver};
use crate::{Error, Result};

/// Drives import runs against one connection: a single file into one
/// table, or a whole directory in multi-table mode.
///
/// Setup failures (file listing, dependency ordering, target deletion)
/// are returned as errors before any row flows. Once rows flow, the
/// outcome lives in the returned [`RunSummary`]; its `has_errors` flag
/// is authoritative, including for runs aborted mid-file.
pub struct ImportRunner {
    connection: DbConnection,
    options: ImportOptions,
    parser_config: TextParserConfig,
    constants: ConstantColumnValues,
    control: ImportControl,
    sort_by_dependencies: bool,
    delete_before_import: bool,
}

impl ImportRunner {
    pub fn new(connection: DbConnection) -> Self {
        Self {
            connection,
            options: ImportOptions::default(),
            parser_config: TextParserConfig::default(),
            constants: ConstantColumnValues::new(),
            control: ImportControl::new(),
            sort_by_dependencies: true,
            delete_before_import: false,
        }
    }

    /// Build a runner from a job definition. Directory jobs move the
    /// `delete_target` flag onto the multi-table deleter so targets are
    /// cleared once, in dependency order, instead of per table.
    pub fn from_job(job: &ImportJob) -> Result<Self> {
        let connection = DbConnection::with_config(job.connection_config());
        let mut options = job.import_options()?;
        let delete_before = job.is_directory() && options.delete_target;
        if delete_before {
            options.delete_target = false;
        }
        Ok(Self::new(connection)
            .with_options(options)
            .with_parser_config(job.parser_config())
            .with_constants(job.constant_columns()?)
            .delete_before_import(delete_before))
    }

    pub fn with_options(mut self, options: ImportOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_parser_config(mut self, config: TextParserConfig) -> Self {
        self.parser_config = config;
        self
    }

    pub fn with_constants(mut self, constants: ConstantColumnValues) -> Self {
        self.constants = constants;
        self
    }

    pub fn with_control(mut self, control: ImportControl) -> Self {
        self.control = control;
        self
    }

    /// Order directory imports by foreign-key dependencies (default).
    pub fn sorted_by_dependencies(mut self, sorted: bool) -> Self {
        self.sort_by_dependencies = sorted;
        self
    }

    /// Delete all target tables, children first, before a directory
    /// import.
    pub fn delete_before_import(mut self, delete: bool) -> Self {
        self.delete_before_import = delete;
        self
    }

    pub fn control(&self) -> ImportControl {
        self.control.clone()
    }

    /// Execute a job definition end to end. Single-file jobs without an
    /// explicit table import into the table named like the file.
    pub async fn run_job(job: &ImportJob) -> Result<RunSummary> {
        Self::from_job(job)?.run(job).await
    }

    /// Execute a job on this runner, keeping its control and options.
    pub async fn run(&self, job: &ImportJob) -> Result<RunSummary> {
        if job.is_directory() {
            let lister = FileLister::new(&job.source);
            self.run_directory(&lister, &FileStemResolver).await
        } else {
            let table = match job.table_identifier()? {
                Some(table) => table,
                None => FileStemResolver.resolve(&job.source)?,
            };
            self.run_file(&job.source, table).await
        }
    }

    /// Import one file into one table.
    pub async fn run_file(&self, path: &Path, table: TableIdentifier) -> Result<RunSummary> {
        self.connection.connect().await.map_err(Error::from)?;
        let columns = self.target_columns(path, &table).await?;
        let mut importer = self.importer()?;
        let mut parser = TextFileParser::new(path)
            .with_config(self.parser_config.clone())
            .target_table(table)
            .target_columns(columns)
            .with_control(self.control.clone());

        info!(file = %path.display(), "starting file import");
        if let Err(err) = parser.start(&mut importer).await {
            warn!(error = %err, "file import ended with a fatal error");
        }
        Ok(importer.into_summary())
    }

    /// Import every matching file of a directory in one multi-table
    /// run: list, resolve tables, order by dependencies, optionally
    /// delete targets, then feed the files through one shared importer.
    pub async fn run_directory(
        &self,
        lister: &FileLister,
        resolver: &dyn TableNameResolver,
    ) -> Result<RunSummary> {
        self.connection.connect().await.map_err(Error::from)?;
        let sources = lister.list(resolver)?;
        if sources.is_empty() {
            return Err(Error::pipeline(
                "list_files",
                lister.directory().display().to_string(),
                "no matching source files",
            ));
        }

        let tables: Vec<TableIdentifier> = sources
            .iter()
            .map(|source| source.table.clone())
            .collect();
        let ordered = if self.sort_by_dependencies {
            let order = dependency::insert_order(&self.connection, &tables).await?;
            reorder(sources, &order)
        } else {
            sources
        };

        let mut importer = self.importer()?;
        importer.begin_multi_table().await?;
        importer.set_table_list(ordered.iter().map(|source| source.table.clone()).collect());

        if self.delete_before_import {
            if let Err(err) = importer.delete_target_tables().await {
                importer.import_finished().await;
                return Err(err.into());
            }
        }

        for source in &ordered {
            if self.control.should_halt() {
                break;
            }
            if let Err(err) = self.import_one(&mut importer, source).await {
                warn!(
                    file = %source.path.display(),
                    error = %err,
                    "table import failed"
                );
                importer.table_import_error().await;
                if !self.options.continue_on_error {
                    break;
                }
            }
        }

        importer.end_multi_table().await;
        if self.control.is_cancelled() {
            importer.import_cancelled().await;
        } else {
            importer.import_finished().await;
        }
        Ok(importer.into_summary())
    }

    fn importer(&self) -> Result<DataImporter> {
        Ok(DataImporter::new(self.connection.clone())
            .with_options(self.options.clone())?
            .with_constants(self.constants.clone())
            .with_control(self.control.clone()))
    }

    async fn import_one(&self, importer: &mut DataImporter, source: &ImportSource) -> Result<()> {
        let columns = self.target_columns(&source.path, &source.table).await?;
        let mut parser = TextFileParser::new(&source.path)
            .with_config(self.parser_config.clone())
            .target_table(source.table.clone())
            .target_columns(columns)
            .with_control(self.control.clone());
        info!(file = %source.path.display(), table = %source.table, "importing file");
        parser.process_file(importer).await?;
        Ok(())
    }

    /// Target columns come from the live table; for a missing table
    /// with `create_target` set, the file header stands in.
    async fn target_columns(
        &self,
        path: &Path,
        table: &TableIdentifier,
    ) -> Result<Vec<ColumnIdentifier>> {
        if self.connection.table_exists(table).await? {
            let columns = self.connection.table_columns(table).await?;
            return Ok(columns.as_ref().clone());
        }
        if self.options.create_target {
            let mut probe = TextFileParser::new(path).with_config(self.parser_config.clone());
            return Ok(probe.source_columns().await?);
        }
        Err(Error::pipeline(
            "resolve_columns",
            path.display().to_string(),
            format!("target table {table} does not exist"),
        ))
    }
}

/// Rearrange sources to follow the dependency-sorted table order.
fn reorder(sources: Vec<ImportSource>, order: &[TableIdentifier]) -> Vec<ImportSource> {
    let mut remaining = sources;
    let mut result = Vec::with_capacity(remaining.len());
    for table in order {
        while let Some(index) = remaining
            .iter()
            .position(|source| source.table == *table)
        {
            result.push(remaining.remove(index));
        }
    }
    result.extend(remaining);
    result
}
