//! The database half of an import run.
//!
//! [`DataImporter`] implements [`DataReceiver`] on top of a
//! [`DbConnection`]. Statements are prepared once per target table;
//! per row it binds parameters and executes, with optional savepoint
//! recovery, batching and interval commits. Outcomes accumulate into a
//! [`RunSummary`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{debug, info, trace, warn};

use ingest_core::{
    CellValue, ColumnIdentifier, DataReceiver, ImportControl, ImportMode, MessageBuffer,
    RejectSink, RunSummary, TableIdentifier, TableStats,
};

use crate::batch::BatchedStatement;
use crate::bind::{DEFAULT_MAX_LOB_SIZE, bind_row};
use crate::connection::{DbConnection, DbTransaction};
use crate::constants::{BoundConstants, ConstantColumnValues};
use crate::deleter::TableDeleter;
use crate::dml::{DmlBuilder, PreparedDml, PreparedImport};
use crate::sequence;
use crate::sql::quote_table;
use crate::{Error, Result};

const ROW_SAVEPOINT: &str = "SAVEPOINT ingest_row";
const ROW_SAVEPOINT_RELEASE: &str = "RELEASE SAVEPOINT ingest_row";
const ROW_SAVEPOINT_ROLLBACK: &str = "ROLLBACK TO SAVEPOINT ingest_row";

/// Rows between low-memory probe checks.
const MEMORY_CHECK_INTERVAL: u64 = 100;

/// Decides whether a failed insert counts as a key violation for the
/// `insertUpdate` fallback.
#[derive(Debug, Clone, Default)]
pub enum KeyViolationMatcher {
    /// Every SQL error triggers the update fallback.
    #[default]
    AllErrors,
    /// Only errors whose message matches the pattern trigger it.
    MessagePattern(Regex),
}

impl KeyViolationMatcher {
    pub fn pattern(pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern)
            .map_err(|err| Error::config(format!("Invalid key violation pattern: {err}")))?;
        Ok(Self::MessagePattern(regex))
    }

    pub fn matches(&self, error: &Error) -> bool {
        match self {
            Self::AllErrors => true,
            Self::MessagePattern(regex) => regex.is_match(&error.to_string()),
        }
    }

    /// The configured pattern, when one is set.
    pub fn pattern_str(&self) -> Option<&str> {
        match self {
            Self::AllErrors => None,
            Self::MessagePattern(regex) => Some(regex.as_str()),
        }
    }
}

/// Hook for callers that can observe process memory. Checked every
/// [`MEMORY_CHECK_INTERVAL`] rows; returning `true` aborts the run.
pub trait MemoryProbe: Send {
    fn low_memory(&mut self) -> bool;
}

/// Everything configurable about one import run.
#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub mode: ImportMode,
    /// Explicit key columns. Empty means primary-key flags decide.
    pub key_columns: Vec<String>,
    /// Rows bound per statement execution round. 1 disables batching.
    pub batch_size: usize,
    /// Commit after this many processed rows. `None` commits once per
    /// table.
    pub commit_every: Option<usize>,
    pub use_transaction: bool,
    pub continue_on_error: bool,
    pub use_savepoints: bool,
    /// DELETE the target before importing. Only honored in insert mode.
    pub delete_target: bool,
    /// Create the target table from the declared columns when missing.
    pub create_target: bool,
    /// Check declared columns against the live table and adopt its
    /// casing, key flags and declared types.
    pub verify_target: bool,
    /// Align `sqlite_sequence` with MAX(pk) after each table.
    pub adjust_sequences: bool,
    pub start_row: Option<u64>,
    pub end_row: Option<u64>,
    /// Abort after this many rejected rows. 0 means unlimited.
    pub max_errors: u64,
    /// Write rejected raw records to this file instead of the message
    /// buffer.
    pub bad_file: Option<PathBuf>,
    pub pre_table_statement: Option<String>,
    pub post_table_statement: Option<String>,
    /// Run the post-table statement even when the table failed.
    pub run_post_after_error: bool,
    pub key_violation_matcher: KeyViolationMatcher,
    /// Extra fragment for the UPDATE WHERE clause.
    pub update_where_addition: Option<String>,
    /// Per-column SQL fragments replacing the plain placeholder.
    pub column_expressions: HashMap<String, String>,
    pub max_lob_size: usize,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            mode: ImportMode::Insert,
            key_columns: Vec::new(),
            batch_size: 1,
            commit_every: None,
            use_transaction: true,
            continue_on_error: false,
            use_savepoints: true,
            delete_target: false,
            create_target: false,
            verify_target: true,
            adjust_sequences: false,
            start_row: None,
            end_row: None,
            max_errors: 0,
            bad_file: None,
            pre_table_statement: None,
            post_table_statement: None,
            run_post_after_error: false,
            key_violation_matcher: KeyViolationMatcher::default(),
            update_where_addition: None,
            column_expressions: HashMap::new(),
            max_lob_size: DEFAULT_MAX_LOB_SIZE,
        }
    }
}

/// State for the table currently receiving rows.
struct ActiveTable {
    table: TableIdentifier,
    columns: Vec<ColumnIdentifier>,
    prepared: PreparedImport,
    constants: BoundConstants,
    batch: Option<BatchedStatement>,
    stats: TableStats,
    /// Source row ordinal maintained by `should_process_next_row`.
    position: u64,
    rows_since_commit: usize,
    use_savepoints: bool,
}

#[derive(Debug, Default, Clone, Copy)]
struct RowOutcome {
    inserted: u64,
    updated: u64,
}

/// Receives rows from any producer and writes them to the database.
pub struct DataImporter {
    connection: DbConnection,
    options: ImportOptions,
    constants: ConstantColumnValues,
    control: ImportControl,
    messages: MessageBuffer,
    reject: RejectSink,
    summary: RunSummary,
    transaction: Option<DbTransaction>,
    current: Option<ActiveTable>,
    table_list: Vec<TableIdentifier>,
    multi_table: bool,
    memory_probe: Option<Box<dyn MemoryProbe>>,
}

impl DataImporter {
    pub fn new(connection: DbConnection) -> Self {
        Self {
            connection,
            options: ImportOptions::default(),
            constants: ConstantColumnValues::new(),
            control: ImportControl::new(),
            messages: MessageBuffer::new(),
            reject: RejectSink::default(),
            summary: RunSummary::new(),
            transaction: None,
            current: None,
            table_list: Vec::new(),
            multi_table: false,
            memory_probe: None,
        }
    }

    /// Apply run options. Fails on contradictory settings and when a
    /// configured bad file cannot be created.
    pub fn with_options(mut self, options: ImportOptions) -> Result<Self> {
        if options.batch_size > 1
            && matches!(
                options.mode,
                ImportMode::InsertUpdate | ImportMode::UpdateInsert
            )
        {
            return Err(Error::config(format!(
                "Batching cannot be combined with import mode {}",
                options.mode
            )));
        }
        self.reject = match &options.bad_file {
            Some(path) => RejectSink::bad_file(path)
                .map_err(|err| Error::config(format!("Cannot create bad file: {err}")))?,
            None => RejectSink::default(),
        };
        self.options = options;
        Ok(self)
    }

    pub fn with_constants(mut self, constants: ConstantColumnValues) -> Self {
        self.constants = constants;
        self
    }

    /// Share a cancellation handle with the producer. Required for the
    /// row window to actually stop the source file.
    pub fn with_control(mut self, control: ImportControl) -> Self {
        self.control = control;
        self
    }

    pub fn with_memory_probe(mut self, probe: Box<dyn MemoryProbe>) -> Self {
        self.memory_probe = Some(probe);
        self
    }

    pub fn control(&self) -> ImportControl {
        self.control.clone()
    }

    /// Abort the run from the outside. The shared control token stops
    /// the producer and any in-progress target delete.
    pub fn cancel_execution(&mut self) {
        self.messages.append("Import cancelled by user");
        self.control.cancel();
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Final run outcome, with the message buffer folded in.
    pub fn into_summary(mut self) -> RunSummary {
        self.refresh_summary_messages();
        self.summary
    }

    fn refresh_summary_messages(&mut self) {
        self.summary.messages = self.messages.to_vec();
        if self.messages.dropped() > 0 {
            self.summary
                .messages
                .push(format!("({} more messages dropped)", self.messages.dropped()));
        }
    }

    async fn activate_table(
        &mut self,
        table: &TableIdentifier,
        columns: &[ColumnIdentifier],
        source: Option<&Path>,
    ) -> Result<()> {
        if columns.is_empty() {
            return Err(Error::config(format!("No columns mapped for {table}")));
        }

        let target = table.clone();
        let mut resolved: Vec<ColumnIdentifier> = columns.to_vec();

        if self.options.create_target && !self.connection.table_exists(&target).await? {
            self.connection.create_table(&target, &resolved).await?;
            self.messages.append(format!("Created target table {target}"));
        }

        if self.options.verify_target {
            let metadata = self.connection.table_columns(&target).await?;
            resolved = verify_columns(&target, &resolved, &metadata)?;
        }

        let capabilities = self.connection.capabilities();
        let constants = self.constants.bind(&self.connection, source).await?;

        let mut builder = DmlBuilder::new(&target, &resolved)
            .mode(self.options.mode)
            .capabilities(capabilities)
            .constants(&constants)
            .key_columns(self.options.key_columns.clone())
            .column_expressions(self.options.column_expressions.clone());
        if let Some(addition) = &self.options.update_where_addition {
            builder = builder.where_addition(addition.clone());
        }
        let prepared = builder.build()?;

        if let Some(transition) = &prepared.transition {
            warn!(from = %transition.from, to = %transition.to, "import mode demoted");
            self.messages.append(transition.to_string());
            self.summary.mark_warnings();
        }
        for warning in &prepared.warnings {
            self.messages.append(warning.as_str());
            self.summary.mark_warnings();
        }

        // A capability demotion can surface the conflict only now.
        if self.options.batch_size > 1
            && matches!(
                prepared.mode,
                ImportMode::InsertUpdate | ImportMode::UpdateInsert
            )
        {
            return Err(Error::config(format!(
                "Batching cannot be combined with import mode {}",
                prepared.mode
            )));
        }

        if self.options.use_transaction {
            self.transaction = Some(self.connection.begin_transaction().await?);
        }

        if self.options.delete_target {
            if self.options.mode == ImportMode::Insert {
                let sql = format!("DELETE FROM {}", quote_table(&target));
                let deleted =
                    execute_dml(self.transaction.as_ref(), &self.connection, &sql, Vec::new())
                        .await?;
                info!(table = %target, deleted, "cleared target table");
                self.messages
                    .append(format!("Deleted {deleted} row(s) from {target}"));
            } else {
                self.messages.append(format!(
                    "Target delete skipped for {target}: not supported in mode {}",
                    self.options.mode
                ));
                self.summary.mark_warnings();
            }
        }

        if let Some(pre) = self.options.pre_table_statement.clone() {
            if let Err(err) =
                execute_dml(self.transaction.as_ref(), &self.connection, &pre, Vec::new()).await
            {
                if self.options.continue_on_error {
                    self.messages
                        .append(format!("Pre-table statement failed: {err}"));
                    self.summary.mark_warnings();
                } else {
                    return Err(err);
                }
            }
        }

        let use_savepoints = self.options.continue_on_error
            && self.options.use_savepoints
            && capabilities.supports_savepoints
            && self.options.batch_size <= 1
            && self.options.use_transaction;

        let batch = if self.options.batch_size > 1 {
            let sql = if prepared.mode.uses_insert() {
                required(&prepared.insert)?.sql.clone()
            } else {
                required(&prepared.update)?.sql.clone()
            };
            Some(BatchedStatement::new(sql, self.options.batch_size))
        } else {
            None
        };

        debug!(table = %target, mode = %prepared.mode, savepoints = use_savepoints, "target table activated");

        self.current = Some(ActiveTable {
            stats: TableStats::new(target.qualified_name()),
            table: target,
            columns: resolved,
            prepared,
            constants,
            batch,
            position: 0,
            rows_since_commit: 0,
            use_savepoints,
        });
        Ok(())
    }

    /// Flush, run the post-table statement, commit and record stats for
    /// the active table. Leaves no table active, also on failure.
    async fn finish_active_table(&mut self) -> Result<()> {
        let Some(mut active) = self.current.take() else {
            return Ok(());
        };

        if let Some(batch) = active.batch.as_mut() {
            if !batch.is_empty() {
                if let Err(err) = flush_batch(
                    self.transaction.as_ref(),
                    &self.connection,
                    batch,
                    &mut active.stats,
                    active.prepared.mode,
                )
                .await
                {
                    self.abort_table(active.stats).await;
                    return Err(err);
                }
            }
        }

        if let Some(post) = self.options.post_table_statement.clone() {
            if let Err(err) =
                execute_dml(self.transaction.as_ref(), &self.connection, &post, Vec::new()).await
            {
                if self.options.continue_on_error {
                    self.messages
                        .append(format!("Post-table statement failed: {err}"));
                    self.summary.mark_warnings();
                } else {
                    self.abort_table(active.stats).await;
                    return Err(err);
                }
            }
        }

        if let Some(tx) = self.transaction.take() {
            if let Err(err) = tx.commit().await {
                let mut stats = active.stats;
                stats.inserted = 0;
                stats.updated = 0;
                self.summary.record_table(stats);
                self.summary.mark_errors();
                return Err(err);
            }
        }

        if self.options.adjust_sequences {
            match sequence::adjust_sequences(&self.connection, &active.table, &active.columns).await
            {
                Ok(Some(value)) => debug!(table = %active.table, value, "sequence adjusted"),
                Ok(None) => {}
                Err(err) => {
                    self.messages.append(format!(
                        "Could not adjust sequence for {}: {err}",
                        active.table
                    ));
                    self.summary.mark_warnings();
                }
            }
        }

        info!(
            table = %active.table,
            inserted = active.stats.inserted,
            updated = active.stats.updated,
            rejected = active.stats.rejected,
            "table import finished"
        );
        self.summary.record_table(active.stats);
        Ok(())
    }

    /// Abandon the active table: discard queued rows, roll back, record
    /// zeroed write counters.
    async fn fail_active_table(&mut self) {
        let Some(mut active) = self.current.take() else {
            if let Some(tx) = self.transaction.take() {
                if let Err(err) = tx.rollback().await {
                    warn!(error = %err, "rollback failed");
                }
            }
            return;
        };
        if let Some(batch) = active.batch.as_mut() {
            batch.clear();
        }
        warn!(table = %active.table, "abandoning table after import error");
        self.abort_table(active.stats).await;
    }

    async fn abort_table(&mut self, mut stats: TableStats) {
        let rolled_back = match self.transaction.take() {
            Some(tx) => match tx.rollback().await {
                Ok(()) => true,
                Err(err) => {
                    warn!(error = %err, "rollback failed");
                    false
                }
            },
            None => false,
        };
        if rolled_back {
            stats.inserted = 0;
            stats.updated = 0;
        }
        if self.options.run_post_after_error {
            if let Some(post) = self.options.post_table_statement.clone() {
                if let Err(err) = self.connection.execute(&post, Vec::new()).await {
                    self.messages
                        .append(format!("Post-table statement failed after error: {err}"));
                    self.summary.mark_warnings();
                }
            }
        }
        self.summary.record_table(stats);
        self.summary.mark_errors();
    }

    async fn fail_low_memory(&mut self) -> ingest_core::Result<()> {
        warn!("low memory reported, aborting import");
        if let Some(mut active) = self.current.take() {
            if let Some(batch) = active.batch.as_mut() {
                batch.clear();
            }
        }
        if let Some(tx) = self.transaction.take() {
            if let Err(err) = tx.rollback().await {
                warn!(error = %err, "rollback during low-memory abort failed");
            }
        }
        self.messages.clear();
        self.messages
            .append("Import cancelled: free memory is running low");
        self.summary.mark_errors();
        self.control.cancel();
        Err(ingest_core::Error::MemoryExhausted {
            details: "import cancelled because free memory is running low".to_string(),
        })
    }

    async fn commit_and_restart(&mut self) -> Result<()> {
        if let Some(tx) = self.transaction.take() {
            tx.commit().await?;
            self.transaction = Some(self.connection.begin_transaction().await?);
            trace!("interval commit");
        }
        Ok(())
    }
}

impl DataReceiver for DataImporter {
    async fn set_target_table(
        &mut self,
        table: &TableIdentifier,
        columns: &[ColumnIdentifier],
        source: Option<&Path>,
    ) -> ingest_core::Result<()> {
        if self.current.is_some() {
            if let Err(err) = self.finish_active_table().await {
                self.messages
                    .append(format!("Failed to finish previous table: {err}"));
                self.summary.mark_errors();
                if !self.options.continue_on_error {
                    return Err(receiver_err("set_target_table", err));
                }
            }
        }

        if let Err(err) = self.activate_table(table, columns, source).await {
            if let Some(tx) = self.transaction.take() {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "rollback after failed activation");
                }
            }
            self.messages
                .append(format!("Cannot import into {table}: {err}"));
            self.summary.mark_errors();
            return Err(receiver_err("set_target_table", err));
        }
        Ok(())
    }

    fn should_process_next_row(&mut self) -> bool {
        let Some(active) = self.current.as_mut() else {
            return true;
        };
        active.position += 1;
        let row = active.position;
        if let Some(start) = self.options.start_row {
            if row < start {
                return false;
            }
        }
        if let Some(end) = self.options.end_row {
            if row > end {
                self.control.request_stop();
                return false;
            }
        }
        true
    }

    fn next_row_skipped(&mut self) {
        if let Some(active) = self.current.as_ref() {
            trace!(row = active.position, "row outside window skipped");
        }
    }

    async fn process_row(&mut self, row: Vec<CellValue>) -> ingest_core::Result<()> {
        let checked = self.current.as_ref().map_or(0, |active| active.stats.total) + 1;
        let mut low_memory = false;
        if checked % MEMORY_CHECK_INTERVAL == 0 {
            if let Some(probe) = self.memory_probe.as_mut() {
                low_memory = probe.low_memory();
            }
        }
        if low_memory {
            return self.fail_low_memory().await;
        }

        let Some(active) = self.current.as_mut() else {
            return Err(ingest_core::Error::receiver(
                "process_row",
                "no active target table",
            ));
        };

        active.stats.total += 1;
        let line = if active.position > 0 {
            active.position
        } else {
            active.stats.total
        };

        let attempt: Result<RowOutcome> = if row.len() != active.columns.len() {
            Err(Error::config(format!(
                "Row has {} value(s) but {} column(s) are mapped",
                row.len(),
                active.columns.len()
            )))
        } else if active.batch.is_some() {
            push_to_batch(active, &row, line, self.options.max_lob_size).await
        } else {
            run_row(
                self.transaction.as_ref(),
                &self.connection,
                &active.prepared,
                &active.constants,
                &row,
                line,
                &self.options,
                active.use_savepoints,
            )
            .await
        };

        let mut fatal: Option<Error> = None;
        let mut flush_fatal: Option<Error> = None;
        let mut needs_commit = false;

        match attempt {
            Ok(outcome) => {
                active.stats.inserted += outcome.inserted;
                active.stats.updated += outcome.updated;
                active.rows_since_commit += 1;
                trace!(line, "row processed");

                if let Some(batch) = active.batch.as_mut() {
                    if batch.is_full() {
                        if let Err(err) = flush_batch(
                            self.transaction.as_ref(),
                            &self.connection,
                            batch,
                            &mut active.stats,
                            active.prepared.mode,
                        )
                        .await
                        {
                            flush_fatal = Some(err);
                        }
                    }
                }

                if flush_fatal.is_none() {
                    if let Some(every) = self.options.commit_every {
                        let batch_pending = active
                            .batch
                            .as_ref()
                            .is_some_and(|batch| !batch.is_empty());
                        if active.rows_since_commit >= every && !batch_pending {
                            active.rows_since_commit = 0;
                            needs_commit = true;
                        }
                    }
                }
            }
            Err(err) => {
                let reason = err.to_string();
                let raw = render_row(&row);
                active.stats.rejected += 1;
                self.summary.mark_errors();
                if let Err(sink_err) = self.reject.record(line, &raw, &reason, &mut self.messages)
                {
                    warn!(error = %sink_err, "failed to record rejected row");
                }
                if !self.options.continue_on_error {
                    fatal = Some(err);
                } else if self.options.max_errors > 0
                    && active.stats.rejected >= self.options.max_errors
                {
                    self.messages.append(format!(
                        "Maximum of {} error(s) reached, import aborted",
                        self.options.max_errors
                    ));
                    fatal = Some(err);
                }
            }
        }

        if let Some(err) = flush_fatal {
            self.messages.append(format!("Batch execution failed: {err}"));
            self.fail_active_table().await;
            return Err(receiver_err("process_row", err));
        }
        if let Some(err) = fatal {
            self.fail_active_table().await;
            return Err(receiver_err("process_row", err));
        }
        if needs_commit {
            if let Err(err) = self.commit_and_restart().await {
                self.fail_active_table().await;
                return Err(receiver_err("process_row", err));
            }
        }
        Ok(())
    }

    fn record_rejected(&mut self, line: u64, raw: &str, reason: &str) {
        if let Some(active) = self.current.as_mut() {
            active.stats.rejected += 1;
            if self.options.max_errors > 0 && active.stats.rejected >= self.options.max_errors {
                self.messages.append(format!(
                    "Maximum of {} error(s) reached, import aborted",
                    self.options.max_errors
                ));
                self.control.cancel();
            }
        }
        self.summary.mark_errors();
        if let Err(err) = self.reject.record(line, raw, reason, &mut self.messages) {
            warn!(error = %err, "failed to record rejected row");
        }
    }

    async fn table_import_finished(&mut self) -> ingest_core::Result<()> {
        if self.current.is_none() {
            return Ok(());
        }
        self.finish_active_table()
            .await
            .map_err(|err| receiver_err("table_import_finished", err))
    }

    async fn table_import_error(&mut self) {
        // The producer may report a failure before any table activated.
        self.summary.mark_errors();
        self.fail_active_table().await;
    }

    async fn begin_multi_table(&mut self) -> ingest_core::Result<()> {
        debug!(tables = self.table_list.len(), "multi-table import starting");
        self.multi_table = true;
        Ok(())
    }

    async fn end_multi_table(&mut self) {
        self.multi_table = false;
    }

    fn set_table_list(&mut self, tables: Vec<TableIdentifier>) {
        self.table_list = tables;
    }

    async fn delete_target_tables(&mut self) -> ingest_core::Result<()> {
        if self.table_list.is_empty() {
            return Ok(());
        }
        let deleter = TableDeleter::new(self.connection.clone())
            .sorted_by_dependencies(true)
            .with_control(self.control.clone());
        let tables = self.table_list.clone();
        match deleter.delete_tables(&tables).await {
            Ok(deleted) => {
                for (table, rows) in deleted {
                    self.messages
                        .append(format!("Deleted {rows} row(s) from {table}"));
                }
                Ok(())
            }
            Err(err) => {
                self.summary.mark_errors();
                self.messages
                    .append(format!("Deleting target tables failed: {err}"));
                Err(receiver_err("delete_target_tables", err))
            }
        }
    }

    async fn import_finished(&mut self) {
        if self.current.is_some() {
            if let Err(err) = self.finish_active_table().await {
                warn!(error = %err, "finishing last table failed");
                self.messages
                    .append(format!("Failed to finish final table: {err}"));
                self.summary.mark_errors();
            }
        }
        if let Some(tx) = self.transaction.take() {
            if let Err(err) = tx.commit().await {
                warn!(error = %err, "final commit failed");
                self.summary.mark_errors();
            }
        }
        if let Err(err) = self.reject.finish() {
            warn!(error = %err, "flushing reject sink failed");
        }
        self.refresh_summary_messages();
        info!(
            tables = self.summary.tables.len(),
            inserted = self.summary.inserted_rows,
            updated = self.summary.updated_rows,
            rejected = self.summary.rejected_rows,
            "import finished"
        );
    }

    async fn import_cancelled(&mut self) {
        let rolled_back = match self.transaction.take() {
            Some(tx) => match tx.rollback().await {
                Ok(()) => true,
                Err(err) => {
                    warn!(error = %err, "rollback on cancel failed");
                    false
                }
            },
            None => false,
        };
        if let Some(active) = self.current.take() {
            let mut stats = active.stats;
            if rolled_back {
                stats.inserted = 0;
                stats.updated = 0;
            }
            self.summary.record_table(stats);
        }
        self.summary.cancelled = true;
        self.messages.append("Import cancelled");
        if let Err(err) = self.reject.finish() {
            warn!(error = %err, "flushing reject sink failed");
        }
        self.refresh_summary_messages();
        info!("import cancelled");
    }
}

/// Route a statement through the open transaction when there is one.
async fn execute_dml(
    transaction: Option<&DbTransaction>,
    connection: &DbConnection,
    sql: &str,
    params: Vec<libsql::Value>,
) -> Result<u64> {
    match transaction {
        Some(tx) => tx.execute(sql, params).await,
        None => connection.execute(sql, params).await,
    }
}

async fn run_row(
    transaction: Option<&DbTransaction>,
    connection: &DbConnection,
    prepared: &PreparedImport,
    constants: &BoundConstants,
    row: &[CellValue],
    line: u64,
    options: &ImportOptions,
    use_savepoint: bool,
) -> Result<RowOutcome> {
    if use_savepoint {
        execute_dml(transaction, connection, ROW_SAVEPOINT, Vec::new()).await?;
    }
    let result = run_statements(
        transaction,
        connection,
        prepared,
        constants,
        row,
        line,
        options,
        use_savepoint,
    )
    .await;
    if use_savepoint {
        match &result {
            Ok(_) => {
                execute_dml(transaction, connection, ROW_SAVEPOINT_RELEASE, Vec::new()).await?;
            }
            Err(_) => {
                execute_dml(transaction, connection, ROW_SAVEPOINT_ROLLBACK, Vec::new()).await?;
                execute_dml(transaction, connection, ROW_SAVEPOINT_RELEASE, Vec::new()).await?;
            }
        }
    }
    result
}

async fn run_statements(
    transaction: Option<&DbTransaction>,
    connection: &DbConnection,
    prepared: &PreparedImport,
    constants: &BoundConstants,
    row: &[CellValue],
    line: u64,
    options: &ImportOptions,
    use_savepoint: bool,
) -> Result<RowOutcome> {
    match prepared.mode {
        ImportMode::Insert | ImportMode::InsertIgnore | ImportMode::Upsert => {
            let insert = required(&prepared.insert)?;
            let params = bind_row(&insert.params, row, constants, line, options.max_lob_size).await?;
            let affected = execute_dml(transaction, connection, &insert.sql, params).await?;
            Ok(RowOutcome {
                inserted: affected,
                updated: 0,
            })
        }
        ImportMode::Update => {
            let update = required(&prepared.update)?;
            let affected =
                run_update(transaction, connection, update, constants, row, line, options).await?;
            Ok(RowOutcome {
                inserted: 0,
                updated: affected,
            })
        }
        ImportMode::InsertUpdate => {
            let insert = required(&prepared.insert)?;
            let params = bind_row(&insert.params, row, constants, line, options.max_lob_size).await?;
            match execute_dml(transaction, connection, &insert.sql, params).await {
                Ok(0) => match prepared.update.as_ref() {
                    Some(update) => {
                        let affected =
                            run_update(transaction, connection, update, constants, row, line, options)
                                .await?;
                        Ok(RowOutcome {
                            inserted: 0,
                            updated: affected,
                        })
                    }
                    None => Ok(RowOutcome::default()),
                },
                Ok(affected) => Ok(RowOutcome {
                    inserted: affected,
                    updated: 0,
                }),
                Err(err) => {
                    let Some(update) = prepared.update.as_ref() else {
                        return Err(err);
                    };
                    if !options.key_violation_matcher.matches(&err) {
                        return Err(err);
                    }
                    // Undo any side effects of the failed insert before
                    // trying the update.
                    if use_savepoint {
                        execute_dml(transaction, connection, ROW_SAVEPOINT_ROLLBACK, Vec::new())
                            .await?;
                    }
                    debug!(line, "insert failed, trying update");
                    let affected =
                        run_update(transaction, connection, update, constants, row, line, options)
                            .await?;
                    if affected == 0 {
                        return Err(err);
                    }
                    Ok(RowOutcome {
                        inserted: 0,
                        updated: affected,
                    })
                }
            }
        }
        ImportMode::UpdateInsert => {
            if let Some(update) = prepared.update.as_ref() {
                let affected =
                    run_update(transaction, connection, update, constants, row, line, options)
                        .await?;
                if affected > 0 {
                    return Ok(RowOutcome {
                        inserted: 0,
                        updated: affected,
                    });
                }
                debug!(line, "update matched no row, inserting");
            }
            let insert = required(&prepared.insert)?;
            let params = bind_row(&insert.params, row, constants, line, options.max_lob_size).await?;
            let affected = execute_dml(transaction, connection, &insert.sql, params).await?;
            Ok(RowOutcome {
                inserted: affected,
                updated: 0,
            })
        }
    }
}

async fn run_update(
    transaction: Option<&DbTransaction>,
    connection: &DbConnection,
    update: &PreparedDml,
    constants: &BoundConstants,
    row: &[CellValue],
    line: u64,
    options: &ImportOptions,
) -> Result<u64> {
    let params = bind_row(&update.params, row, constants, line, options.max_lob_size).await?;
    execute_dml(transaction, connection, &update.sql, params).await
}

async fn push_to_batch(
    active: &mut ActiveTable,
    row: &[CellValue],
    line: u64,
    max_lob_size: usize,
) -> Result<RowOutcome> {
    let statement = if active.prepared.mode.uses_insert() {
        required(&active.prepared.insert)?
    } else {
        required(&active.prepared.update)?
    };
    let params = bind_row(&statement.params, row, &active.constants, line, max_lob_size).await?;
    if let Some(batch) = active.batch.as_mut() {
        batch.push(params);
    }
    Ok(RowOutcome::default())
}

/// Execute all queued batch rows and fold the affected counts into the
/// table stats.
async fn flush_batch(
    transaction: Option<&DbTransaction>,
    connection: &DbConnection,
    batch: &mut BatchedStatement,
    stats: &mut TableStats,
    mode: ImportMode,
) -> Result<()> {
    let rows = batch.drain();
    trace!(rows = rows.len(), "flushing batch");
    for params in rows {
        let affected = execute_dml(transaction, connection, batch.sql(), params).await?;
        if mode.uses_insert() {
            stats.inserted += affected;
        } else {
            stats.updated += affected;
        }
    }
    Ok(())
}

/// Check declared columns against live table metadata, adopting the
/// table's name casing, key flags and declared types.
fn verify_columns(
    table: &TableIdentifier,
    declared: &[ColumnIdentifier],
    metadata: &[ColumnIdentifier],
) -> Result<Vec<ColumnIdentifier>> {
    let mut resolved = Vec::with_capacity(declared.len());
    for column in declared {
        match metadata.iter().find(|meta| meta.matches_name(&column.name)) {
            Some(meta) => {
                let mut column = column.clone();
                column.name = meta.name.clone();
                if meta.primary_key {
                    column.primary_key = true;
                }
                if column.dbms_type.is_none() {
                    column.dbms_type = meta.dbms_type.clone();
                }
                resolved.push(column);
            }
            None => {
                return Err(Error::metadata(
                    table.qualified_name(),
                    format!("Column '{}' not found in the target table", column.name),
                ));
            }
        }
    }
    Ok(resolved)
}

fn required(statement: &Option<PreparedDml>) -> Result<&PreparedDml> {
    statement
        .as_ref()
        .ok_or_else(|| Error::config("No statement prepared for this import mode"))
}

fn render_row(row: &[CellValue]) -> String {
    row.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn receiver_err(operation: &str, err: Error) -> ingest_core::Error {
    ingest_core::Error::receiver(operation, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options() {
        let options = ImportOptions::default();
        assert_eq!(options.mode, ImportMode::Insert);
        assert_eq!(options.batch_size, 1);
        assert!(options.use_transaction);
        assert!(options.verify_target);
        assert!(!options.continue_on_error);
        assert_eq!(options.max_lob_size, DEFAULT_MAX_LOB_SIZE);
    }

    #[test]
    fn batching_rejects_two_statement_modes() {
        let options = ImportOptions {
            mode: ImportMode::InsertUpdate,
            batch_size: 50,
            ..ImportOptions::default()
        };
        let err = DataImporter::new(DbConnection::new())
            .with_options(options)
            .err()
            .map(|err| err.to_string())
            .unwrap_or_default();
        assert!(err.contains("Batching"));
    }

    #[test]
    fn matcher_filters_by_pattern() {
        let matcher = KeyViolationMatcher::pattern("UNIQUE constraint").unwrap();
        let unique = Error::config("UNIQUE constraint failed: orders.id");
        let other = Error::config("no such table: orders");
        assert!(matcher.matches(&unique));
        assert!(!matcher.matches(&other));

        let all = KeyViolationMatcher::default();
        assert!(all.matches(&other));
    }

    #[test]
    fn invalid_matcher_pattern_is_an_error() {
        assert!(KeyViolationMatcher::pattern("(unclosed").is_err());
    }

    #[test]
    fn cancel_execution_flags_control_and_message() {
        let mut importer = DataImporter::new(DbConnection::new());
        let control = importer.control();
        importer.cancel_execution();
        assert!(control.is_cancelled());

        let summary = importer.into_summary();
        assert!(
            summary
                .messages
                .iter()
                .any(|message| message.contains("cancelled by user"))
        );
    }
}
