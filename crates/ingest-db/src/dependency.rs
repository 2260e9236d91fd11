//! Foreign-key ordering for multi-table runs.
//!
//! Edges are read from `PRAGMA foreign_key_list` and only considered
//! between tables of the given set. Self-references are ignored. Ties
//! resolve by table name so the output is deterministic.

use std::collections::{HashMap, HashSet};

use ingest_core::TableIdentifier;

use crate::connection::DbConnection;
use crate::sql::quote_identifier;
use crate::{Error, Result};

/// Order tables so referenced tables come before the tables referencing
/// them, i.e. safe for inserts.
pub async fn insert_order(
    connection: &DbConnection,
    tables: &[TableIdentifier],
) -> Result<Vec<TableIdentifier>> {
    let mut index: HashMap<String, usize> = HashMap::with_capacity(tables.len());
    for (position, table) in tables.iter().enumerate() {
        index.insert(table.name.to_ascii_lowercase(), position);
    }

    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); tables.len()];
    let mut in_degree: Vec<usize> = vec![0; tables.len()];

    for (child, table) in tables.iter().enumerate() {
        let mut seen: HashSet<usize> = HashSet::new();
        for parent_name in referenced_tables(connection, table).await? {
            let Some(&parent) = index.get(&parent_name.to_ascii_lowercase()) else {
                continue;
            };
            if parent == child {
                continue;
            }
            if seen.insert(parent) {
                dependents[parent].push(child);
                in_degree[child] += 1;
            }
        }
    }

    let mut ready: Vec<usize> = (0..tables.len())
        .filter(|&position| in_degree[position] == 0)
        .collect();
    let mut ordered: Vec<usize> = Vec::with_capacity(tables.len());

    while !ready.is_empty() {
        sort_by_name(&mut ready, tables);
        let next = ready.remove(0);
        ordered.push(next);
        for &child in &dependents[next] {
            in_degree[child] -= 1;
            if in_degree[child] == 0 {
                ready.push(child);
            }
        }
    }

    if ordered.len() != tables.len() {
        let mut remaining: Vec<&TableIdentifier> = (0..tables.len())
            .filter(|&position| in_degree[position] > 0)
            .map(|position| &tables[position])
            .collect();
        remaining.sort_by(|a, b| a.name.cmp(&b.name));
        let table = remaining
            .first()
            .map(|table| table.qualified_name())
            .unwrap_or_default();
        return Err(Error::DependencyCycle { table });
    }

    Ok(ordered
        .into_iter()
        .map(|position| tables[position].clone())
        .collect())
}

/// Order tables so referencing tables come first, i.e. safe for
/// deletes.
pub async fn delete_order(
    connection: &DbConnection,
    tables: &[TableIdentifier],
) -> Result<Vec<TableIdentifier>> {
    let mut ordered = insert_order(connection, tables).await?;
    ordered.reverse();
    Ok(ordered)
}

/// Parent tables referenced by foreign keys of `table`. A table without
/// foreign keys (or an unknown table) yields an empty list.
async fn referenced_tables(
    connection: &DbConnection,
    table: &TableIdentifier,
) -> Result<Vec<String>> {
    let sql = format!("PRAGMA foreign_key_list({})", quote_identifier(&table.name));
    let handle = connection.handle().await?;
    let mut rows = handle.query(&sql, ()).await.map_err(|source| Error::Sql {
        statement: sql.clone(),
        source,
    })?;
    // Read each row's values while the cursor is on it: libsql's local
    // rows are live cursor handles, not materialized data.
    let mut parents = Vec::new();
    while let Some(row) = rows.next().await.map_err(|source| Error::Sql {
        statement: sql.clone(),
        source,
    })? {
        // Row layout: id, seq, table, from, to, on_update, on_delete, match.
        let parent: String = row.get(2).map_err(|source| Error::Sql {
            statement: sql.clone(),
            source,
        })?;
        parents.push(parent);
    }
    Ok(parents)
}

fn sort_by_name(positions: &mut [usize], tables: &[TableIdentifier]) {
    positions.sort_by(|&a, &b| {
        tables[a]
            .name
            .to_ascii_lowercase()
            .cmp(&tables[b].name.to_ascii_lowercase())
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_chain() -> DbConnection {
        let conn = DbConnection::new();
        conn.connect().await.unwrap();
        conn.execute(
            "CREATE TABLE customers (id INTEGER PRIMARY KEY, name TEXT)",
            Vec::new(),
        )
        .await
        .unwrap();
        conn.execute(
            "CREATE TABLE orders (id INTEGER PRIMARY KEY, customer_id INTEGER REFERENCES customers (id))",
            Vec::new(),
        )
        .await
        .unwrap();
        conn.execute(
            "CREATE TABLE order_lines (id INTEGER PRIMARY KEY, order_id INTEGER REFERENCES orders (id))",
            Vec::new(),
        )
        .await
        .unwrap();
        conn
    }

    fn names(tables: &[TableIdentifier]) -> Vec<&str> {
        tables.iter().map(|table| table.name.as_str()).collect()
    }

    #[tokio::test]
    async fn test_insert_order_parents_first() {
        let conn = setup_chain().await;
        let tables = vec![
            TableIdentifier::new("order_lines"),
            TableIdentifier::new("customers"),
            TableIdentifier::new("orders"),
        ];

        let ordered = insert_order(&conn, &tables).await.unwrap();
        assert_eq!(names(&ordered), vec!["customers", "orders", "order_lines"]);
    }

    #[tokio::test]
    async fn test_delete_order_children_first() {
        let conn = setup_chain().await;
        let tables = vec![
            TableIdentifier::new("customers"),
            TableIdentifier::new("orders"),
            TableIdentifier::new("order_lines"),
        ];

        let ordered = delete_order(&conn, &tables).await.unwrap();
        assert_eq!(names(&ordered), vec!["order_lines", "orders", "customers"]);
    }

    #[tokio::test]
    async fn test_independent_tables_sort_by_name() {
        let conn = DbConnection::new();
        conn.connect().await.unwrap();
        conn.execute("CREATE TABLE zebra (id INTEGER)", Vec::new())
            .await
            .unwrap();
        conn.execute("CREATE TABLE apple (id INTEGER)", Vec::new())
            .await
            .unwrap();

        let tables = vec![TableIdentifier::new("zebra"), TableIdentifier::new("apple")];
        let ordered = insert_order(&conn, &tables).await.unwrap();
        assert_eq!(names(&ordered), vec!["apple", "zebra"]);
    }

    #[tokio::test]
    async fn test_self_reference_is_ignored() {
        let conn = DbConnection::new();
        conn.connect().await.unwrap();
        conn.execute(
            "CREATE TABLE employees (id INTEGER PRIMARY KEY, manager_id INTEGER REFERENCES employees (id))",
            Vec::new(),
        )
        .await
        .unwrap();

        let tables = vec![TableIdentifier::new("employees")];
        let ordered = insert_order(&conn, &tables).await.unwrap();
        assert_eq!(names(&ordered), vec!["employees"]);
    }

    #[tokio::test]
    async fn test_reference_outside_set_is_ignored() {
        let conn = setup_chain().await;
        // Only the child is part of the run.
        let tables = vec![TableIdentifier::new("orders")];
        let ordered = insert_order(&conn, &tables).await.unwrap();
        assert_eq!(names(&ordered), vec!["orders"]);
    }

    #[tokio::test]
    async fn test_cycle_is_an_error() {
        let conn = DbConnection::new();
        conn.connect().await.unwrap();
        // SQLite accepts forward references at creation time.
        conn.execute(
            "CREATE TABLE alpha (id INTEGER PRIMARY KEY, beta_id INTEGER REFERENCES beta (id))",
            Vec::new(),
        )
        .await
        .unwrap();
        conn.execute(
            "CREATE TABLE beta (id INTEGER PRIMARY KEY, alpha_id INTEGER REFERENCES alpha (id))",
            Vec::new(),
        )
        .await
        .unwrap();

        let tables = vec![TableIdentifier::new("alpha"), TableIdentifier::new("beta")];
        let err = insert_order(&conn, &tables).await.unwrap_err();
        assert!(matches!(err, Error::DependencyCycle { .. }));
        assert!(err.to_string().contains("alpha"));
    }
}
