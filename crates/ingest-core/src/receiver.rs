//! Receiver-side contract and run statistics.

use std::path::Path;

use crate::identifier::{ColumnIdentifier, TableIdentifier};
use crate::value::CellValue;
use crate::Result;

/// The consumer half of an import run.
///
/// Call ordering is part of the contract: `set_target_table` always
/// precedes the first `process_row` for that table, and
/// `table_import_finished` always precedes the next table's
/// `set_target_table` or the final `import_finished` /
/// `import_cancelled`.
#[allow(async_fn_in_trait)]
pub trait DataReceiver {
    /// Activate a target table. Finishes any previously active table
    /// first. `source` names the file the rows come from, when there is
    /// one.
    async fn set_target_table(
        &mut self,
        table: &TableIdentifier,
        columns: &[ColumnIdentifier],
        source: Option<&Path>,
    ) -> Result<()>;

    /// Whether the next source row should be produced at all. Returning
    /// `false` means the row falls outside the configured row window;
    /// the producer must then call [`DataReceiver::next_row_skipped`]
    /// instead of `process_row`.
    fn should_process_next_row(&mut self) -> bool;

    /// Notification that the producer skipped one row on request.
    fn next_row_skipped(&mut self);

    /// Process one row. The row length must equal the column count given
    /// to `set_target_table`.
    async fn process_row(&mut self, row: Vec<CellValue>) -> Result<()>;

    /// A raw record the producer could not convert. The receiver routes
    /// it to the configured bad-record sink.
    fn record_rejected(&mut self, line: u64, raw: &str, reason: &str);

    /// Finish the active table: flush batches, run post-table work,
    /// commit.
    async fn table_import_finished(&mut self) -> Result<()>;

    /// Abandon the active table after a table-level failure: roll back
    /// and reset per-table counters. Never fails; problems are recorded
    /// in the run outcome.
    async fn table_import_error(&mut self);

    /// Announce a multi-table run before the first file.
    async fn begin_multi_table(&mut self) -> Result<()>;

    /// Close a multi-table run after the last file.
    async fn end_multi_table(&mut self);

    /// The full, ordered table list of a multi-table run.
    fn set_table_list(&mut self, tables: Vec<TableIdentifier>);

    /// Delete all tables announced via `set_table_list`, in
    /// dependency-safe order, before the first import.
    async fn delete_target_tables(&mut self) -> Result<()>;

    /// The run completed normally (including deliberate early stop).
    /// Finalizes a still-active table; failures are recorded in the run
    /// outcome rather than raised.
    async fn import_finished(&mut self);

    /// The run was aborted by cancellation. Rolls back open work.
    async fn import_cancelled(&mut self);
}

/// Per-table outcome counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableStats {
    pub table: String,
    pub inserted: u64,
    pub updated: u64,
    pub rejected: u64,
    pub total: u64,
}

impl TableStats {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }
}

/// Machine-readable outcome of one import run. The boolean flags are
/// authoritative; messages are for humans.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub tables: Vec<TableStats>,
    pub inserted_rows: u64,
    pub updated_rows: u64,
    pub rejected_rows: u64,
    pub total_rows: u64,
    pub cancelled: bool,
    pub messages: Vec<String>,
    errors: bool,
    warnings: bool,
}

impl RunSummary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one finished table into the run totals.
    pub fn record_table(&mut self, stats: TableStats) {
        self.inserted_rows += stats.inserted;
        self.updated_rows += stats.updated;
        self.rejected_rows += stats.rejected;
        self.total_rows += stats.total;
        self.tables.push(stats);
    }

    pub fn mark_errors(&mut self) {
        self.errors = true;
    }

    pub fn mark_warnings(&mut self) {
        self.warnings = true;
    }

    pub fn has_errors(&self) -> bool {
        self.errors
    }

    pub fn has_warnings(&self) -> bool {
        self.warnings
    }

    /// Stats for one table by name, case-insensitively.
    pub fn table(&self, name: &str) -> Option<&TableStats> {
        self.tables
            .iter()
            .find(|stats| stats.table.eq_ignore_ascii_case(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_aggregates_tables() {
        let mut summary = RunSummary::new();

        let mut orders = TableStats::new("orders");
        orders.inserted = 10;
        orders.total = 12;
        orders.rejected = 2;
        summary.record_table(orders);

        let mut lines = TableStats::new("order_lines");
        lines.inserted = 5;
        lines.updated = 3;
        lines.total = 8;
        summary.record_table(lines);

        assert_eq!(summary.inserted_rows, 15);
        assert_eq!(summary.updated_rows, 3);
        assert_eq!(summary.rejected_rows, 2);
        assert_eq!(summary.total_rows, 20);
        assert_eq!(summary.table("ORDERS").unwrap().inserted, 10);
        assert!(summary.table("missing").is_none());
    }

    #[test]
    fn flags_default_clear() {
        let mut summary = RunSummary::new();
        assert!(!summary.has_errors());
        assert!(!summary.has_warnings());

        summary.mark_warnings();
        assert!(summary.has_warnings());
        assert!(!summary.has_errors());

        summary.mark_errors();
        assert!(summary.has_errors());
    }
}
