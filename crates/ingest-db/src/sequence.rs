//! `sqlite_sequence` alignment after imports with explicit key values.
//!
//! Rows imported with explicit ids bypass AUTOINCREMENT bookkeeping, so
//! later inserts would reuse imported ids. Aligning the sequence with
//! MAX(key) prevents that.

use tracing::debug;

use ingest_core::{ColumnIdentifier, ColumnType, TableIdentifier};

use crate::Result;
use crate::connection::DbConnection;
use crate::sql::{quote_identifier, quote_table};

/// Set the `sqlite_sequence` entry for `table` to the highest imported
/// key. Returns the new sequence value, or `None` when the table cannot
/// carry one (no single integer key, no `sqlite_sequence` table, or no
/// rows).
pub async fn adjust_sequences(
    connection: &DbConnection,
    table: &TableIdentifier,
    columns: &[ColumnIdentifier],
) -> Result<Option<i64>> {
    // Only a single integer primary key can be AUTOINCREMENT.
    let keys: Vec<&ColumnIdentifier> = columns.iter().filter(|column| column.primary_key).collect();
    let [key] = keys.as_slice() else {
        return Ok(None);
    };
    if key.column_type != ColumnType::Integer {
        return Ok(None);
    }

    let sequence_table = connection
        .query_value(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'sqlite_sequence'",
            Vec::new(),
        )
        .await?;
    if sequence_table.is_none() {
        return Ok(None);
    }

    let sql = format!(
        "SELECT MAX({}) FROM {}",
        quote_identifier(&key.name),
        quote_table(table)
    );
    let max = match connection.query_value(&sql, Vec::new()).await? {
        Some(libsql::Value::Integer(value)) => value,
        // MAX over an empty table is NULL.
        _ => return Ok(None),
    };

    let affected = connection
        .execute(
            "UPDATE sqlite_sequence SET seq = ?1 WHERE name = ?2",
            vec![
                libsql::Value::Integer(max),
                libsql::Value::Text(table.name.clone()),
            ],
        )
        .await?;
    if affected == 0 {
        connection
            .execute(
                "INSERT INTO sqlite_sequence (name, seq) VALUES (?1, ?2)",
                vec![
                    libsql::Value::Text(table.name.clone()),
                    libsql::Value::Integer(max),
                ],
            )
            .await?;
    }

    debug!(table = %table, seq = max, "sequence aligned with imported keys");
    Ok(Some(max))
}
