//! Workbook access behind a narrow trait.
//!
//! Decoding spreadsheet file formats is not this crate's job. A
//! [`SpreadsheetReader`] hands over sheet names, header columns and
//! already-typed row values; the parser never sees the file format.

use ingest_core::{CellValue, Error, Result};

/// Conversion policies a reader applies while producing cell values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReaderOptions {
    /// Text cells equal to this string become NULL.
    pub null_string: Option<String>,
    /// Return date and timestamp cells as formatted text.
    pub dates_as_text: bool,
    /// Return numeric cells as text.
    pub numbers_as_text: bool,
}

impl ReaderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn null_string(mut self, null: impl Into<String>) -> Self {
        self.null_string = Some(null.into());
        self
    }

    pub fn dates_as_text(mut self, as_text: bool) -> Self {
        self.dates_as_text = as_text;
        self
    }

    pub fn numbers_as_text(mut self, as_text: bool) -> Self {
        self.numbers_as_text = as_text;
        self
    }
}

/// Read access to one workbook. One sheet is active at a time; row
/// indices are zero-based and exclude the header row.
pub trait SpreadsheetReader {
    /// Names of all sheets in workbook order.
    fn sheet_names(&self) -> Vec<String>;

    /// Make the sheet at `index` the active one.
    fn select_sheet(&mut self, index: usize) -> Result<()>;

    /// Column names from the active sheet's header row.
    fn header_columns(&mut self) -> Result<Vec<String>>;

    /// Number of data rows in the active sheet.
    fn row_count(&self) -> usize;

    /// Values of one data row, after applying the reader options.
    fn row_values(&mut self, row: usize) -> Result<Vec<CellValue>>;

    /// Replace the conversion policies.
    fn set_options(&mut self, options: ReaderOptions);

    fn sheet_count(&self) -> usize {
        self.sheet_names().len()
    }
}

struct MemorySheet {
    name: String,
    header: Vec<String>,
    rows: Vec<Vec<CellValue>>,
}

/// An already-decoded workbook held in memory. Serves as the reference
/// [`SpreadsheetReader`] implementation and as the test double.
#[derive(Default)]
pub struct MemoryWorkbook {
    sheets: Vec<MemorySheet>,
    active: usize,
    options: ReaderOptions,
}

impl MemoryWorkbook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(mut self, options: ReaderOptions) -> Self {
        self.options = options;
        self
    }

    /// Append a sheet. The first added sheet starts out active.
    pub fn add_sheet(
        mut self,
        name: impl Into<String>,
        header: Vec<String>,
        rows: Vec<Vec<CellValue>>,
    ) -> Self {
        self.sheets.push(MemorySheet {
            name: name.into(),
            header,
            rows,
        });
        self
    }

    fn active_sheet(&self) -> Result<&MemorySheet> {
        self.sheets
            .get(self.active)
            .ok_or_else(|| Error::config("Workbook contains no sheets"))
    }

    fn apply_options(&self, value: &CellValue) -> CellValue {
        match value {
            CellValue::Text(text) => {
                if self
                    .options
                    .null_string
                    .as_deref()
                    .is_some_and(|null| null == text.as_str())
                {
                    CellValue::Null
                } else {
                    value.clone()
                }
            }
            CellValue::Integer(_) | CellValue::Decimal(_) if self.options.numbers_as_text => {
                CellValue::Text(value.to_string())
            }
            CellValue::Date(_) | CellValue::Timestamp(_) if self.options.dates_as_text => {
                CellValue::Text(value.to_string())
            }
            _ => value.clone(),
        }
    }
}

impl SpreadsheetReader for MemoryWorkbook {
    fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|sheet| sheet.name.clone()).collect()
    }

    fn select_sheet(&mut self, index: usize) -> Result<()> {
        if index >= self.sheets.len() {
            return Err(Error::config(format!(
                "Sheet index {index} out of range ({} sheets)",
                self.sheets.len()
            )));
        }
        self.active = index;
        Ok(())
    }

    fn header_columns(&mut self) -> Result<Vec<String>> {
        Ok(self.active_sheet()?.header.clone())
    }

    fn row_count(&self) -> usize {
        self.sheets.get(self.active).map_or(0, |sheet| sheet.rows.len())
    }

    fn row_values(&mut self, row: usize) -> Result<Vec<CellValue>> {
        let sheet = self.active_sheet()?;
        let values = sheet.rows.get(row).ok_or_else(|| {
            Error::parse(row as u64, format!("Row {row} out of range in sheet '{}'", sheet.name))
        })?;
        Ok(values.iter().map(|value| self.apply_options(value)).collect())
    }

    fn set_options(&mut self, options: ReaderOptions) {
        self.options = options;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample_workbook() -> MemoryWorkbook {
        MemoryWorkbook::new().add_sheet(
            "orders",
            vec!["id".to_string(), "name".to_string()],
            vec![
                vec![CellValue::Integer(1), CellValue::Text("Alice".to_string())],
                vec![CellValue::Integer(2), CellValue::Text("<null>".to_string())],
            ],
        )
    }

    #[test]
    fn null_string_policy_applies_to_text_cells() {
        let mut workbook =
            sample_workbook().with_options(ReaderOptions::new().null_string("<null>"));

        let row = workbook.row_values(1).unwrap();
        assert_eq!(row[1], CellValue::Null);
        // Non-matching text is untouched.
        let row = workbook.row_values(0).unwrap();
        assert_eq!(row[1], CellValue::Text("Alice".to_string()));
    }

    #[test]
    fn numbers_and_dates_as_text() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let mut workbook = MemoryWorkbook::new()
            .add_sheet(
                "s1",
                vec!["a".to_string(), "b".to_string()],
                vec![vec![CellValue::Integer(42), CellValue::Date(date)]],
            )
            .with_options(
                ReaderOptions::new()
                    .numbers_as_text(true)
                    .dates_as_text(true),
            );

        let row = workbook.row_values(0).unwrap();
        assert_eq!(row[0], CellValue::Text("42".to_string()));
        assert_eq!(row[1], CellValue::Text("2024-03-01".to_string()));
    }

    #[test]
    fn select_sheet_rejects_out_of_range() {
        let mut workbook = sample_workbook();
        assert!(workbook.select_sheet(0).is_ok());
        let err = workbook.select_sheet(3).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn header_and_row_count_follow_active_sheet() {
        let mut workbook = sample_workbook().add_sheet(
            "items",
            vec!["sku".to_string()],
            vec![vec![CellValue::Text("A-1".to_string())]],
        );

        workbook.select_sheet(1).unwrap();
        assert_eq!(workbook.header_columns().unwrap(), vec!["sku"]);
        assert_eq!(workbook.row_count(), 1);
    }
}
