//! Constant column values supplied alongside the file columns.
//!
//! Definitions are declared once per import; they are bound against
//! the connection at every target-table activation (queries run once
//! per table, with `%filename%` substituted) and released when the
//! table import finishes.

use std::path::Path;

use tracing::debug;

use ingest_core::CellValue;

use crate::connection::DbConnection;
use crate::sql::escape_literal;
use crate::{Error, Result};

/// One constant value definition.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstantValue {
    /// A fixed value bound as a parameter.
    Literal(CellValue),
    /// A SQL expression inlined into the statement text, no parameter.
    Expression(String),
    /// The current row number, bound per row.
    LineNumber,
    /// A SELECT executed once per target-table activation; its first
    /// value becomes the constant. `%filename%` is replaced with the
    /// source path.
    Query(String),
}

/// Ordered column/definition pairs.
#[derive(Debug, Clone, Default)]
pub struct ConstantColumnValues {
    entries: Vec<(String, ConstantValue)>,
}

impl ConstantColumnValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_literal(mut self, column: impl Into<String>, value: CellValue) -> Self {
        self.entries.push((column.into(), ConstantValue::Literal(value)));
        self
    }

    pub fn add_expression(mut self, column: impl Into<String>, expression: impl Into<String>) -> Self {
        self.entries
            .push((column.into(), ConstantValue::Expression(expression.into())));
        self
    }

    pub fn add_line_number(mut self, column: impl Into<String>) -> Self {
        self.entries.push((column.into(), ConstantValue::LineNumber));
        self
    }

    pub fn add_query(mut self, column: impl Into<String>, query: impl Into<String>) -> Self {
        self.entries
            .push((column.into(), ConstantValue::Query(query.into())));
        self
    }

    /// Parse one `column=value` definition. `${...}` is an inline SQL
    /// expression, `@{...}` a per-table SELECT, `$line` the row number;
    /// anything else is a literal.
    pub fn parse_definition(definition: &str) -> Result<(String, ConstantValue)> {
        let (column, value) = definition.split_once('=').ok_or_else(|| {
            Error::config(format!(
                "Invalid constant definition '{definition}': expected column=value"
            ))
        })?;
        let column = column.trim();
        if column.is_empty() {
            return Err(Error::config(format!(
                "Invalid constant definition '{definition}': empty column name"
            )));
        }

        let value = value.trim();
        let constant = if value == "$line" {
            ConstantValue::LineNumber
        } else if let Some(inner) = enclosed(value, "${", "}") {
            ConstantValue::Expression(inner.to_string())
        } else if let Some(inner) = enclosed(value, "@{", "}") {
            ConstantValue::Query(inner.to_string())
        } else {
            ConstantValue::Literal(CellValue::Text(value.to_string()))
        };
        Ok((column.to_string(), constant))
    }

    /// Parse a list of `column=value` definitions.
    pub fn parse_list<S: AsRef<str>>(definitions: &[S]) -> Result<Self> {
        let mut values = Self::new();
        for definition in definitions {
            let (column, constant) = Self::parse_definition(definition.as_ref())?;
            values.entries.push((column, constant));
        }
        Ok(values)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[(String, ConstantValue)] {
        &self.entries
    }

    /// Resolve the definitions against the connection for one
    /// target-table activation.
    pub async fn bind(
        &self,
        connection: &DbConnection,
        source: Option<&Path>,
    ) -> Result<BoundConstants> {
        let mut columns = Vec::with_capacity(self.entries.len());
        for (column, constant) in &self.entries {
            let kind = match constant {
                ConstantValue::Literal(value) => BoundKind::Value(value.clone()),
                ConstantValue::Expression(expression) => BoundKind::Inline(expression.clone()),
                ConstantValue::LineNumber => BoundKind::LineNumber,
                ConstantValue::Query(query) => {
                    let sql = substitute_filename(query, source);
                    debug!(column, sql = sql.as_str(), "resolving constant query");
                    let value = connection.query_value(&sql, Vec::new()).await?;
                    BoundKind::Value(from_libsql(value))
                }
            };
            columns.push(BoundConstant {
                column: column.clone(),
                kind,
            });
        }
        Ok(BoundConstants { columns })
    }
}

/// A resolved constant for the current table.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundConstant {
    pub column: String,
    pub kind: BoundKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BoundKind {
    Value(CellValue),
    Inline(String),
    LineNumber,
}

/// Constants resolved for one target-table activation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundConstants {
    columns: Vec<BoundConstant>,
}

impl BoundConstants {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_parts(parts: Vec<(String, BoundKind)>) -> Self {
        Self {
            columns: parts
                .into_iter()
                .map(|(column, kind)| BoundConstant { column, kind })
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> &[BoundConstant] {
        &self.columns
    }

    /// The parameter-bindable value at `index`, when that constant is
    /// a plain value.
    pub fn value_at(&self, index: usize) -> Option<&CellValue> {
        match self.columns.get(index).map(|constant| &constant.kind) {
            Some(BoundKind::Value(value)) => Some(value),
            _ => None,
        }
    }
}

fn enclosed<'a>(value: &'a str, prefix: &str, suffix: &str) -> Option<&'a str> {
    value
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_suffix(suffix))
}

fn substitute_filename(query: &str, source: Option<&Path>) -> String {
    match source {
        Some(path) => query.replace("%filename%", &escape_literal(&path.display().to_string())),
        None => query.replace("%filename%", ""),
    }
}

fn from_libsql(value: Option<libsql::Value>) -> CellValue {
    match value {
        None | Some(libsql::Value::Null) => CellValue::Null,
        Some(libsql::Value::Integer(value)) => CellValue::Integer(value),
        Some(libsql::Value::Real(value)) => CellValue::Decimal(value),
        Some(libsql::Value::Text(value)) => CellValue::Text(value),
        Some(libsql::Value::Blob(value)) => CellValue::Blob(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn parse_definition_forms() {
        let (column, value) =
            ConstantColumnValues::parse_definition("source=warehouse").unwrap();
        assert_eq!(column, "source");
        assert_eq!(
            value,
            ConstantValue::Literal(CellValue::Text("warehouse".to_string()))
        );

        let (_, value) =
            ConstantColumnValues::parse_definition("loaded_at=${datetime('now')}").unwrap();
        assert_eq!(value, ConstantValue::Expression("datetime('now')".to_string()));

        let (_, value) = ConstantColumnValues::parse_definition("row_no=$line").unwrap();
        assert_eq!(value, ConstantValue::LineNumber);

        let (_, value) =
            ConstantColumnValues::parse_definition("batch=@{SELECT max(id) FROM batches}").unwrap();
        assert_eq!(
            value,
            ConstantValue::Query("SELECT max(id) FROM batches".to_string())
        );
    }

    #[test]
    fn parse_rejects_malformed_definitions() {
        assert!(ConstantColumnValues::parse_definition("no-equals").is_err());
        assert!(ConstantColumnValues::parse_definition("=value").is_err());
    }

    #[tokio::test]
    async fn bind_resolves_queries_once() {
        let connection = DbConnection::new();
        connection.connect().await.unwrap();

        let constants = ConstantColumnValues::new()
            .add_literal("source", CellValue::Text("feed".to_string()))
            .add_query("answer", "SELECT 41 + 1");

        let bound = constants.bind(&connection, None).await.unwrap();
        assert_eq!(bound.columns().len(), 2);
        assert_eq!(bound.value_at(0), Some(&CellValue::Text("feed".to_string())));
        assert_eq!(bound.value_at(1), Some(&CellValue::Integer(42)));
    }

    #[tokio::test]
    async fn bind_substitutes_filename() {
        let connection = DbConnection::new();
        connection.connect().await.unwrap();

        let constants =
            ConstantColumnValues::new().add_query("origin", "SELECT '%filename%'");
        let source = PathBuf::from("/data/orders.csv");

        let bound = constants.bind(&connection, Some(&source)).await.unwrap();
        assert_eq!(
            bound.value_at(0),
            Some(&CellValue::Text("/data/orders.csv".to_string()))
        );
    }

    #[test]
    fn line_number_and_expression_do_not_bind_values() {
        let bound = BoundConstants::from_parts(vec![
            ("a".to_string(), BoundKind::Inline("upper('x')".to_string())),
            ("b".to_string(), BoundKind::LineNumber),
        ]);
        assert_eq!(bound.value_at(0), None);
        assert_eq!(bound.value_at(1), None);
    }
}
