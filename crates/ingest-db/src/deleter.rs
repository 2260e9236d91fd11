//! Bulk delete of target tables ahead of a multi-table import.

use tracing::{debug, info, warn};

use ingest_core::{ImportControl, TableIdentifier};

use crate::Result;
use crate::connection::DbConnection;
use crate::dependency;
use crate::sql::quote_table;

/// Commit granularity for [`TableDeleter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeleteMode {
    /// All deletes in one transaction. Cancellation rolls everything
    /// back.
    #[default]
    SingleTransaction,
    /// Commit after each table. Cancellation keeps completed tables.
    PerTable,
}

/// Clears tables with plain DELETE statements, optionally in
/// foreign-key-safe order.
pub struct TableDeleter {
    connection: DbConnection,
    mode: DeleteMode,
    sorted: bool,
    control: ImportControl,
}

impl TableDeleter {
    pub fn new(connection: DbConnection) -> Self {
        Self {
            connection,
            mode: DeleteMode::default(),
            sorted: false,
            control: ImportControl::new(),
        }
    }

    pub fn mode(mut self, mode: DeleteMode) -> Self {
        self.mode = mode;
        self
    }

    /// Delete referencing tables before the tables they reference.
    pub fn sorted_by_dependencies(mut self, sorted: bool) -> Self {
        self.sorted = sorted;
        self
    }

    pub fn with_control(mut self, control: ImportControl) -> Self {
        self.control = control;
        self
    }

    /// Delete all rows from the given tables. Returns deleted row
    /// counts in execution order; cancellation returns the counts of
    /// the tables that were actually committed.
    pub async fn delete_tables(
        &self,
        tables: &[TableIdentifier],
    ) -> Result<Vec<(TableIdentifier, u64)>> {
        if tables.is_empty() {
            return Ok(Vec::new());
        }

        let ordered = if self.sorted {
            dependency::delete_order(&self.connection, tables).await?
        } else {
            tables.to_vec()
        };

        match self.mode {
            DeleteMode::SingleTransaction => self.delete_in_transaction(&ordered).await,
            DeleteMode::PerTable => self.delete_per_table(&ordered).await,
        }
    }

    async fn delete_in_transaction(
        &self,
        tables: &[TableIdentifier],
    ) -> Result<Vec<(TableIdentifier, u64)>> {
        let transaction = self.connection.begin_transaction().await?;
        let mut deleted = Vec::with_capacity(tables.len());

        for table in tables {
            if self.control.is_cancelled() {
                warn!("delete cancelled, rolling back");
                transaction.rollback().await?;
                return Ok(Vec::new());
            }
            let sql = format!("DELETE FROM {}", quote_table(table));
            let rows = match transaction.execute(&sql, Vec::new()).await {
                Ok(rows) => rows,
                Err(err) => {
                    if let Err(rollback_err) = transaction.rollback().await {
                        warn!(error = %rollback_err, "rollback failed");
                    }
                    return Err(err);
                }
            };
            debug!(table = %table, rows, "table cleared");
            deleted.push((table.clone(), rows));
        }

        transaction.commit().await?;
        info!(tables = deleted.len(), "target tables cleared");
        Ok(deleted)
    }

    async fn delete_per_table(
        &self,
        tables: &[TableIdentifier],
    ) -> Result<Vec<(TableIdentifier, u64)>> {
        let mut deleted = Vec::with_capacity(tables.len());
        for table in tables {
            if self.control.is_cancelled() {
                warn!(completed = deleted.len(), "delete cancelled, keeping completed tables");
                return Ok(deleted);
            }
            let sql = format!("DELETE FROM {}", quote_table(table));
            let rows = self.connection.execute(&sql, Vec::new()).await?;
            debug!(table = %table, rows, "table cleared");
            deleted.push((table.clone(), rows));
        }
        Ok(deleted)
    }
}
