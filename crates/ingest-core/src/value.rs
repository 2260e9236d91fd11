//! Typed cell values moved between producers and the receiver.

use std::path::PathBuf;

use chrono::{NaiveDate, NaiveDateTime};

/// A single converted cell. File-reference variants are resolved to
/// database values at bind time so large objects are never read during
/// parsing.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Text(String),
    Integer(i64),
    Decimal(f64),
    Boolean(bool),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    Blob(Vec<u8>),
    /// Reference to a file whose bytes become the column value.
    BlobFile(PathBuf),
    /// Reference to a file whose text content becomes the column value.
    ClobFile(PathBuf),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Short type label used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            CellValue::Null => "null",
            CellValue::Text(_) => "text",
            CellValue::Integer(_) => "integer",
            CellValue::Decimal(_) => "decimal",
            CellValue::Boolean(_) => "boolean",
            CellValue::Date(_) => "date",
            CellValue::Timestamp(_) => "timestamp",
            CellValue::Blob(_) => "blob",
            CellValue::BlobFile(_) => "blob file",
            CellValue::ClobFile(_) => "clob file",
        }
    }
}

impl std::fmt::Display for CellValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CellValue::Null => Ok(()),
            CellValue::Text(value) => write!(f, "{value}"),
            CellValue::Integer(value) => write!(f, "{value}"),
            CellValue::Decimal(value) => write!(f, "{value}"),
            CellValue::Boolean(value) => write!(f, "{value}"),
            CellValue::Date(value) => write!(f, "{}", value.format("%Y-%m-%d")),
            CellValue::Timestamp(value) => write!(f, "{}", value.format("%Y-%m-%d %H:%M:%S")),
            CellValue::Blob(bytes) => write!(f, "<blob {} bytes>", bytes.len()),
            CellValue::BlobFile(path) => write!(f, "<blob file {}>", path.display()),
            CellValue::ClobFile(path) => write!(f, "<clob file {}>", path.display()),
        }
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        CellValue::Integer(value)
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Decimal(value)
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        CellValue::Boolean(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats() {
        assert_eq!(CellValue::Null.to_string(), "");
        assert_eq!(CellValue::Text("abc".to_string()).to_string(), "abc");
        assert_eq!(CellValue::Integer(42).to_string(), "42");
        assert_eq!(CellValue::Boolean(true).to_string(), "true");

        let date = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        assert_eq!(CellValue::Date(date).to_string(), "2024-03-15");

        let blob = CellValue::Blob(vec![1, 2, 3]);
        assert_eq!(blob.to_string(), "<blob 3 bytes>");
    }

    #[test]
    fn type_names() {
        assert_eq!(CellValue::Null.type_name(), "null");
        assert_eq!(CellValue::Decimal(1.5).type_name(), "decimal");
        assert_eq!(CellValue::from("x").type_name(), "text");
    }

    #[test]
    fn from_conversions() {
        assert_eq!(CellValue::from(7_i64), CellValue::Integer(7));
        assert_eq!(CellValue::from(false), CellValue::Boolean(false));
        assert!(CellValue::Null.is_null());
        assert!(!CellValue::from("").is_null());
    }
}
