//! Small SQL text helpers shared by the statement builders.

use ingest_core::TableIdentifier;

/// Double-quote an identifier, doubling embedded quotes.
pub fn quote_identifier(value: &str) -> String {
    let escaped = value.replace('"', "\"\"");
    format!("\"{escaped}\"")
}

/// Quoted, schema-qualified table reference. The catalog part is not
/// rendered; libsql addresses at most `schema.table`.
pub fn quote_table(table: &TableIdentifier) -> String {
    match &table.schema {
        Some(schema) => format!(
            "{}.{}",
            quote_identifier(schema),
            quote_identifier(&table.name)
        ),
        None => quote_identifier(&table.name),
    }
}

/// Escape a string for inclusion in a single-quoted SQL literal.
pub fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}
