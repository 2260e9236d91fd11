//! Raw text to typed cell conversion.

use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime};

use crate::identifier::{ColumnIdentifier, ColumnType};
use crate::value::CellValue;
use crate::{Error, Result};

/// How blob column values found in textual sources are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobMode {
    /// The cell contains a file name; bytes are read at bind time.
    Filename,
    /// Blob columns cannot be imported from this source.
    Disabled,
}

/// Converts raw source strings into typed [`CellValue`]s for a target
/// column.
#[derive(Debug, Clone)]
pub struct ValueConverter {
    null_strings: Vec<String>,
    empty_is_null: bool,
    trim: bool,
    decimal_char: char,
    date_formats: Vec<String>,
    timestamp_formats: Vec<String>,
    true_literals: Vec<String>,
    false_literals: Vec<String>,
    blob_mode: BlobMode,
    clob_is_filename: bool,
    lob_base_dir: Option<PathBuf>,
}

impl Default for ValueConverter {
    fn default() -> Self {
        Self {
            null_strings: Vec::new(),
            empty_is_null: true,
            trim: false,
            decimal_char: '.',
            date_formats: vec!["%Y-%m-%d".to_string()],
            timestamp_formats: vec![
                "%Y-%m-%d %H:%M:%S".to_string(),
                "%Y-%m-%dT%H:%M:%S".to_string(),
            ],
            true_literals: vec!["true".to_string(), "t".to_string(), "1".to_string()],
            false_literals: vec!["false".to_string(), "f".to_string(), "0".to_string()],
            blob_mode: BlobMode::Filename,
            clob_is_filename: false,
            lob_base_dir: None,
        }
    }
}

impl ValueConverter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a string treated as NULL (compared after trimming).
    pub fn with_null_string(mut self, value: impl Into<String>) -> Self {
        self.null_strings.push(value.into());
        self
    }

    /// Whether empty input becomes NULL (default) or an empty string.
    pub fn empty_is_null(mut self, empty_is_null: bool) -> Self {
        self.empty_is_null = empty_is_null;
        self
    }

    /// Trim surrounding whitespace before conversion.
    pub fn trim(mut self, trim: bool) -> Self {
        self.trim = trim;
        self
    }

    /// Decimal separator used in the source (default `.`).
    pub fn decimal_char(mut self, decimal_char: char) -> Self {
        self.decimal_char = decimal_char;
        self
    }

    /// Prepend a date format tried before the defaults.
    pub fn with_date_format(mut self, format: impl Into<String>) -> Self {
        self.date_formats.insert(0, format.into());
        self
    }

    /// Prepend a timestamp format tried before the defaults.
    pub fn with_timestamp_format(mut self, format: impl Into<String>) -> Self {
        self.timestamp_formats.insert(0, format.into());
        self
    }

    /// Replace the boolean literal sets.
    pub fn boolean_literals(mut self, true_values: Vec<String>, false_values: Vec<String>) -> Self {
        self.true_literals = true_values;
        self.false_literals = false_values;
        self
    }

    pub fn blob_mode(mut self, mode: BlobMode) -> Self {
        self.blob_mode = mode;
        self
    }

    /// Treat clob column values as file names instead of inline text.
    pub fn clob_is_filename(mut self, clob_is_filename: bool) -> Self {
        self.clob_is_filename = clob_is_filename;
        self
    }

    /// Base directory for resolving relative LOB file names.
    pub fn lob_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.lob_base_dir = Some(dir.into());
        self
    }

    /// Whether clob values are treated as file references. Filters use
    /// this to know when to skip clob columns.
    pub fn treats_clob_as_filename(&self) -> bool {
        self.clob_is_filename
    }

    /// Convert one raw cell for the given target column.
    pub fn convert(&self, raw: &str, column: &ColumnIdentifier) -> Result<CellValue> {
        let value = if self.trim { raw.trim() } else { raw };

        if value.is_empty() && self.empty_is_null {
            return Ok(CellValue::Null);
        }
        if self
            .null_strings
            .iter()
            .any(|null_string| null_string == value.trim())
        {
            return Ok(CellValue::Null);
        }

        match column.column_type {
            ColumnType::Text => Ok(CellValue::Text(value.to_string())),
            ColumnType::Integer => self.convert_integer(value, column),
            ColumnType::Decimal => self.convert_decimal(value, column),
            ColumnType::Boolean => self.convert_boolean(value, column),
            ColumnType::Date => self.convert_date(value, column),
            ColumnType::Timestamp => self.convert_timestamp(value, column),
            ColumnType::Blob => match self.blob_mode {
                BlobMode::Filename => Ok(CellValue::BlobFile(self.resolve_lob_path(value))),
                BlobMode::Disabled => Err(Error::conversion(
                    &column.name,
                    value,
                    "blob import is disabled for this source",
                )),
            },
            ColumnType::Clob => {
                if self.clob_is_filename {
                    Ok(CellValue::ClobFile(self.resolve_lob_path(value)))
                } else {
                    Ok(CellValue::Text(value.to_string()))
                }
            }
        }
    }

    fn convert_integer(&self, value: &str, column: &ColumnIdentifier) -> Result<CellValue> {
        value
            .trim()
            .parse::<i64>()
            .map(CellValue::Integer)
            .map_err(|err| Error::conversion(&column.name, value, err.to_string()))
    }

    fn convert_decimal(&self, value: &str, column: &ColumnIdentifier) -> Result<CellValue> {
        let normalized = if self.decimal_char == '.' {
            value.trim().to_string()
        } else {
            value.trim().replace(self.decimal_char, ".")
        };
        normalized
            .parse::<f64>()
            .map(CellValue::Decimal)
            .map_err(|err| Error::conversion(&column.name, value, err.to_string()))
    }

    fn convert_boolean(&self, value: &str, column: &ColumnIdentifier) -> Result<CellValue> {
        let candidate = value.trim();
        if self
            .true_literals
            .iter()
            .any(|literal| literal.eq_ignore_ascii_case(candidate))
        {
            return Ok(CellValue::Boolean(true));
        }
        if self
            .false_literals
            .iter()
            .any(|literal| literal.eq_ignore_ascii_case(candidate))
        {
            return Ok(CellValue::Boolean(false));
        }
        Err(Error::conversion(
            &column.name,
            value,
            "not a recognized boolean literal",
        ))
    }

    fn convert_date(&self, value: &str, column: &ColumnIdentifier) -> Result<CellValue> {
        let candidate = value.trim();
        for format in &self.date_formats {
            if let Ok(date) = NaiveDate::parse_from_str(candidate, format) {
                return Ok(CellValue::Date(date));
            }
        }
        // Some sources put full timestamps into date columns.
        for format in &self.timestamp_formats {
            if let Ok(timestamp) = NaiveDateTime::parse_from_str(candidate, format) {
                return Ok(CellValue::Date(timestamp.date()));
            }
        }
        Err(Error::conversion(
            &column.name,
            value,
            "does not match any configured date format",
        ))
    }

    fn convert_timestamp(&self, value: &str, column: &ColumnIdentifier) -> Result<CellValue> {
        let candidate = value.trim();
        for format in &self.timestamp_formats {
            if let Ok(timestamp) = NaiveDateTime::parse_from_str(candidate, format) {
                return Ok(CellValue::Timestamp(timestamp));
            }
        }
        for format in &self.date_formats {
            if let Ok(date) = NaiveDate::parse_from_str(candidate, format) {
                if let Some(timestamp) = date.and_hms_opt(0, 0, 0) {
                    return Ok(CellValue::Timestamp(timestamp));
                }
            }
        }
        Err(Error::conversion(
            &column.name,
            value,
            "does not match any configured timestamp format",
        ))
    }

    fn resolve_lob_path(&self, value: &str) -> PathBuf {
        let path = Path::new(value.trim());
        match (&self.lob_base_dir, path.is_relative()) {
            (Some(base), true) => base.join(path),
            _ => path.to_path_buf(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str, column_type: ColumnType) -> ColumnIdentifier {
        ColumnIdentifier::new(name, column_type)
    }

    #[test]
    fn converts_integers() {
        let converter = ValueConverter::new();
        let result = converter
            .convert(" 42 ", &column("id", ColumnType::Integer))
            .unwrap();
        assert_eq!(result, CellValue::Integer(42));

        let err = converter
            .convert("abc", &column("id", ColumnType::Integer))
            .unwrap_err();
        assert!(matches!(err, Error::Conversion { .. }));
    }

    #[test]
    fn converts_decimals_with_custom_separator() {
        let converter = ValueConverter::new().decimal_char(',');
        let result = converter
            .convert("12,50", &column("total", ColumnType::Decimal))
            .unwrap();
        assert_eq!(result, CellValue::Decimal(12.5));
    }

    #[test]
    fn converts_booleans() {
        let converter = ValueConverter::new();
        assert_eq!(
            converter
                .convert("TRUE", &column("flag", ColumnType::Boolean))
                .unwrap(),
            CellValue::Boolean(true)
        );
        assert_eq!(
            converter
                .convert("0", &column("flag", ColumnType::Boolean))
                .unwrap(),
            CellValue::Boolean(false)
        );
        assert!(
            converter
                .convert("maybe", &column("flag", ColumnType::Boolean))
                .is_err()
        );
    }

    #[test]
    fn converts_dates_and_timestamps() {
        let converter = ValueConverter::new().with_date_format("%d.%m.%Y");

        let date = converter
            .convert("15.03.2024", &column("created", ColumnType::Date))
            .unwrap();
        assert_eq!(
            date,
            CellValue::Date(NaiveDate::from_ymd_opt(2024, 3, 15).unwrap())
        );

        let timestamp = converter
            .convert(
                "2024-03-15 10:30:00",
                &column("updated", ColumnType::Timestamp),
            )
            .unwrap();
        assert!(matches!(timestamp, CellValue::Timestamp(_)));

        // A plain date fills midnight into a timestamp column.
        let promoted = converter
            .convert("2024-03-15", &column("updated", ColumnType::Timestamp))
            .unwrap();
        assert!(matches!(promoted, CellValue::Timestamp(_)));

        // Timestamps are accepted in date columns, truncated to the day.
        let truncated = converter
            .convert("2024-03-15 10:30:00", &column("created", ColumnType::Date))
            .unwrap();
        assert_eq!(
            truncated,
            CellValue::Date(NaiveDate::from_ymd_opt(2024, 3, 15).unwrap())
        );
    }

    #[test]
    fn null_handling() {
        let converter = ValueConverter::new().with_null_string("NULL");
        assert_eq!(
            converter
                .convert("", &column("name", ColumnType::Text))
                .unwrap(),
            CellValue::Null
        );
        assert_eq!(
            converter
                .convert("NULL", &column("name", ColumnType::Text))
                .unwrap(),
            CellValue::Null
        );

        let keep_empty = ValueConverter::new().empty_is_null(false);
        assert_eq!(
            keep_empty
                .convert("", &column("name", ColumnType::Text))
                .unwrap(),
            CellValue::Text(String::new())
        );
    }

    #[test]
    fn lob_references() {
        let converter = ValueConverter::new().lob_base_dir("/data/lobs");
        let blob = converter
            .convert("image.bin", &column("payload", ColumnType::Blob))
            .unwrap();
        assert_eq!(
            blob,
            CellValue::BlobFile(PathBuf::from("/data/lobs/image.bin"))
        );

        let inline_clob = converter
            .convert("some text", &column("notes", ColumnType::Clob))
            .unwrap();
        assert_eq!(inline_clob, CellValue::Text("some text".to_string()));

        let file_clob = ValueConverter::new()
            .clob_is_filename(true)
            .convert("notes.txt", &column("notes", ColumnType::Clob))
            .unwrap();
        assert_eq!(file_clob, CellValue::ClobFile(PathBuf::from("notes.txt")));
    }

    #[test]
    fn disabled_blob_mode_rejects_value() {
        let converter = ValueConverter::new().blob_mode(BlobMode::Disabled);
        assert!(
            converter
                .convert("x", &column("payload", ColumnType::Blob))
                .is_err()
        );
    }
}
