//! Table and column identity primitives.

use serde::{Deserialize, Serialize};

/// Column data types the importer distinguishes when converting and
/// binding values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Integer,
    Decimal,
    Boolean,
    Text,
    Date,
    Timestamp,
    Blob,
    Clob,
}

impl ColumnType {
    /// Whether the type is a large object (blob or clob).
    pub fn is_lob(self) -> bool {
        matches!(self, ColumnType::Blob | ColumnType::Clob)
    }

    /// SQL type name used when creating target tables.
    pub fn sql_name(self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Decimal => "REAL",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Text | ColumnType::Clob => "TEXT",
            ColumnType::Date => "DATE",
            ColumnType::Timestamp => "TIMESTAMP",
            ColumnType::Blob => "BLOB",
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ColumnType::Integer => "integer",
            ColumnType::Decimal => "decimal",
            ColumnType::Boolean => "boolean",
            ColumnType::Text => "text",
            ColumnType::Date => "date",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Blob => "blob",
            ColumnType::Clob => "clob",
        };
        write!(f, "{name}")
    }
}

/// Fully qualified table reference. Equality ignores case on every part.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
pub struct TableIdentifier {
    pub catalog: Option<String>,
    pub schema: Option<String>,
    pub name: String,
}

impl TableIdentifier {
    /// Table in the default schema.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            catalog: None,
            schema: None,
            name: name.into(),
        }
    }

    /// Attach a schema name.
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Attach a catalog name.
    pub fn with_catalog(mut self, catalog: impl Into<String>) -> Self {
        self.catalog = Some(catalog.into());
        self
    }

    /// Parse a dotted expression: `name`, `schema.name` or
    /// `catalog.schema.name`. Empty parts are rejected.
    pub fn parse(expression: &str) -> crate::Result<Self> {
        let parts: Vec<&str> = expression.split('.').collect();
        if parts.iter().any(|part| part.trim().is_empty()) {
            return Err(crate::Error::config(format!(
                "Invalid table expression '{expression}'"
            )));
        }
        match parts.as_slice() {
            [name] => Ok(Self::new(name.trim())),
            [schema, name] => Ok(Self::new(name.trim()).with_schema(schema.trim())),
            [catalog, schema, name] => Ok(Self::new(name.trim())
                .with_schema(schema.trim())
                .with_catalog(catalog.trim())),
            _ => Err(crate::Error::config(format!(
                "Invalid table expression '{expression}': too many parts"
            ))),
        }
    }

    /// Dotted, unquoted rendering of all present parts.
    pub fn qualified_name(&self) -> String {
        let mut parts = Vec::with_capacity(3);
        if let Some(catalog) = &self.catalog {
            parts.push(catalog.as_str());
        }
        if let Some(schema) = &self.schema {
            parts.push(schema.as_str());
        }
        parts.push(self.name.as_str());
        parts.join(".")
    }
}

impl PartialEq for TableIdentifier {
    fn eq(&self, other: &Self) -> bool {
        fn eq_part(a: Option<&String>, b: Option<&String>) -> bool {
            match (a, b) {
                (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
                (None, None) => true,
                _ => false,
            }
        }
        self.name.eq_ignore_ascii_case(&other.name)
            && eq_part(self.schema.as_ref(), other.schema.as_ref())
            && eq_part(self.catalog.as_ref(), other.catalog.as_ref())
    }
}

impl std::fmt::Display for TableIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.qualified_name())
    }
}

/// A target-table column as the importer sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnIdentifier {
    pub name: String,
    pub column_type: ColumnType,
    pub dbms_type: Option<String>,
    pub primary_key: bool,
    pub auto_generated: bool,
}

impl ColumnIdentifier {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            dbms_type: None,
            primary_key: false,
            auto_generated: false,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn auto_generated(mut self) -> Self {
        self.auto_generated = true;
        self
    }

    pub fn with_dbms_type(mut self, dbms_type: impl Into<String>) -> Self {
        self.dbms_type = Some(dbms_type.into());
        self
    }

    /// Case-insensitive name comparison.
    pub fn matches_name(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

impl std::fmt::Display for ColumnIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_table_expressions() {
        let plain = TableIdentifier::parse("orders").unwrap();
        assert_eq!(plain.name, "orders");
        assert!(plain.schema.is_none());

        let qualified = TableIdentifier::parse("main.orders").unwrap();
        assert_eq!(qualified.schema.as_deref(), Some("main"));
        assert_eq!(qualified.name, "orders");

        let full = TableIdentifier::parse("db.main.orders").unwrap();
        assert_eq!(full.catalog.as_deref(), Some("db"));
        assert_eq!(full.qualified_name(), "db.main.orders");
    }

    #[test]
    fn parse_rejects_empty_parts() {
        assert!(TableIdentifier::parse("main..orders").is_err());
        assert!(TableIdentifier::parse("").is_err());
        assert!(TableIdentifier::parse("a.b.c.d").is_err());
    }

    #[test]
    fn equality_ignores_case() {
        let a = TableIdentifier::new("Orders").with_schema("Main");
        let b = TableIdentifier::new("ORDERS").with_schema("main");
        assert_eq!(a, b);

        let c = TableIdentifier::new("orders");
        assert_ne!(a, c);
    }

    #[test]
    fn column_builders() {
        let column = ColumnIdentifier::new("id", ColumnType::Integer)
            .primary_key()
            .auto_generated()
            .with_dbms_type("INTEGER");
        assert!(column.primary_key);
        assert!(column.auto_generated);
        assert_eq!(column.dbms_type.as_deref(), Some("INTEGER"));
        assert!(column.matches_name("ID"));
    }

    #[test]
    fn lob_types() {
        assert!(ColumnType::Blob.is_lob());
        assert!(ColumnType::Clob.is_lob());
        assert!(!ColumnType::Text.is_lob());
        assert_eq!(ColumnType::Clob.sql_name(), "TEXT");
    }
}
