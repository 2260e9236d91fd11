//! Sheet-driven parsing loop.

use std::collections::HashMap;
use std::path::PathBuf;

use tracing::{debug, trace};

use ingest_core::{
    CellValue, ColumnFilter, ColumnIdentifier, ColumnMapping, ColumnType, DataReceiver, Error,
    ImportControl, Result, RowDataProducer, TableIdentifier, ValueConverter, ValueModifiers,
};

use crate::reader::SpreadsheetReader;

/// Which sheet(s) of the workbook to import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SheetSelection {
    /// A single sheet by zero-based index.
    Index(usize),
    /// A single sheet by name, case-insensitively.
    Name(String),
    /// Every sheet; each sheet name selects the target table.
    All,
}

impl Default for SheetSelection {
    fn default() -> Self {
        Self::Index(0)
    }
}

/// Reads rows from a workbook and pushes them to a receiver.
///
/// In single-sheet mode the target table is configured up front. In
/// all-sheets mode each sheet becomes its own target-table activation
/// framed by `begin_multi_table`/`end_multi_table`, with target columns
/// registered per sheet name.
pub struct SheetFileParser<R> {
    reader: R,
    path: Option<PathBuf>,
    selection: SheetSelection,
    converter: ValueConverter,
    filters: ColumnFilter,
    modifiers: ValueModifiers,
    table: Option<TableIdentifier>,
    target_columns: Vec<ColumnIdentifier>,
    sheet_targets: HashMap<String, Vec<ColumnIdentifier>>,
    ignore_missing_columns: bool,
    abort_on_error: bool,
    delete_targets: bool,
    control: ImportControl,
}

impl<R: SpreadsheetReader> SheetFileParser<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            path: None,
            selection: SheetSelection::default(),
            converter: ValueConverter::default(),
            filters: ColumnFilter::new(),
            modifiers: ValueModifiers::new(),
            table: None,
            target_columns: Vec::new(),
            sheet_targets: HashMap::new(),
            ignore_missing_columns: false,
            abort_on_error: false,
            delete_targets: false,
            control: ImportControl::new(),
        }
    }

    /// Path of the workbook, reported to the receiver as the source.
    pub fn source_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn selection(mut self, selection: SheetSelection) -> Self {
        self.selection = selection;
        self
    }

    pub fn with_converter(mut self, converter: ValueConverter) -> Self {
        self.converter = converter;
        self
    }

    pub fn with_filters(mut self, filters: ColumnFilter) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_modifiers(mut self, modifiers: ValueModifiers) -> Self {
        self.modifiers = modifiers;
        self
    }

    /// The table rows are imported into (single-sheet mode).
    pub fn target_table(mut self, table: TableIdentifier) -> Self {
        self.table = Some(table);
        self
    }

    /// The target table's columns (single-sheet mode).
    pub fn target_columns(mut self, columns: Vec<ColumnIdentifier>) -> Self {
        self.target_columns = columns;
        self
    }

    /// Register the target columns for one sheet (all-sheets mode).
    pub fn sheet_target(mut self, sheet: &str, columns: Vec<ColumnIdentifier>) -> Self {
        self.sheet_targets
            .insert(sheet.to_ascii_lowercase(), columns);
        self
    }

    /// Skip source columns without a target instead of failing.
    pub fn ignore_missing_columns(mut self, ignore: bool) -> Self {
        self.ignore_missing_columns = ignore;
        self
    }

    /// Abort the whole run on the first conversion error instead of
    /// rejecting the row.
    pub fn abort_on_error(mut self, abort: bool) -> Self {
        self.abort_on_error = abort;
        self
    }

    /// Ask the receiver to delete all target tables before the first
    /// sheet (all-sheets mode).
    pub fn delete_target_tables_first(mut self, delete: bool) -> Self {
        self.delete_targets = delete;
        self
    }

    pub fn with_control(mut self, control: ImportControl) -> Self {
        self.control = control;
        self
    }

    async fn run<D: DataReceiver>(&mut self, receiver: &mut D) -> Result<()> {
        match self.selection.clone() {
            SheetSelection::All => self.process_all_sheets(receiver).await,
            selection => {
                let index = self.resolve_selection(&selection)?;
                self.reader.select_sheet(index)?;
                let table = self.table.clone().ok_or_else(|| {
                    Error::config("No target table configured for sheet import")
                })?;
                let columns = self.target_columns.clone();
                self.process_sheet(receiver, table, columns).await
            }
        }
    }

    async fn process_all_sheets<D: DataReceiver>(&mut self, receiver: &mut D) -> Result<()> {
        let names = self.reader.sheet_names();
        if names.is_empty() {
            return Err(Error::config("Workbook contains no sheets"));
        }
        let tables: Vec<TableIdentifier> = names
            .iter()
            .map(|name| TableIdentifier::new(name.clone()))
            .collect();

        receiver.begin_multi_table().await?;
        receiver.set_table_list(tables.clone());
        if self.delete_targets {
            receiver.delete_target_tables().await?;
        }

        for (index, table) in tables.iter().enumerate() {
            if self.control.is_cancelled() {
                break;
            }
            let columns = self
                .sheet_targets
                .get(&names[index].to_ascii_lowercase())
                .cloned()
                .ok_or_else(|| {
                    Error::config(format!(
                        "No target columns registered for sheet '{}'",
                        names[index]
                    ))
                })?;
            self.reader.select_sheet(index)?;
            self.process_sheet(receiver, table.clone(), columns).await?;
        }

        receiver.end_multi_table().await;
        Ok(())
    }

    async fn process_sheet<D: DataReceiver>(
        &mut self,
        receiver: &mut D,
        table: TableIdentifier,
        target_columns: Vec<ColumnIdentifier>,
    ) -> Result<()> {
        self.control.clear_stop();

        let header = self.reader.header_columns()?;
        let mapping =
            ColumnMapping::resolve(&header, &target_columns, self.ignore_missing_columns)?;

        debug!(
            table = %table,
            rows = self.reader.row_count(),
            columns = mapping.mapped_count(),
            "starting sheet import"
        );

        receiver
            .set_target_table(&table, mapping.target_columns(), self.path.as_deref())
            .await?;

        let clob_is_filename = self.converter.treats_clob_as_filename();
        let total = self.reader.row_count();

        for row_index in 0..total {
            if self.control.should_halt() {
                break;
            }
            if !receiver.should_process_next_row() {
                receiver.next_row_skipped();
                continue;
            }
            let cells = self.reader.row_values(row_index)?;
            match self.convert_cells(&cells, &mapping, clob_is_filename) {
                Ok(Some(row)) => receiver.process_row(row).await?,
                Ok(None) => trace!(row = row_index, "row removed by column filter"),
                Err(err) => {
                    if self.abort_on_error {
                        return Err(err);
                    }
                    receiver.record_rejected(sheet_line(row_index), &raw_row(&cells), &err.to_string());
                }
            }
        }

        if self.control.is_cancelled() {
            Ok(())
        } else {
            receiver.table_import_finished().await
        }
    }

    fn resolve_selection(&self, selection: &SheetSelection) -> Result<usize> {
        match selection {
            SheetSelection::Index(index) => Ok(*index),
            SheetSelection::Name(name) => self
                .reader
                .sheet_names()
                .iter()
                .position(|candidate| candidate.eq_ignore_ascii_case(name))
                .ok_or_else(|| Error::config(format!("Workbook has no sheet named '{name}'"))),
            SheetSelection::All => Ok(0),
        }
    }

    /// Convert one row of cells. Text cells run through the value
    /// converter for the target type; typed cells pass through.
    /// `Ok(None)` means a column filter removed the row.
    fn convert_cells(
        &self,
        cells: &[CellValue],
        mapping: &ColumnMapping,
        clob_is_filename: bool,
    ) -> Result<Option<Vec<CellValue>>> {
        let mut row = vec![CellValue::Null; mapping.mapped_count()];

        for column in mapping.columns() {
            let (Some(target), Some(target_index)) = (&column.target, column.target_index) else {
                continue;
            };

            let mut cell = cells
                .get(column.source_index)
                .cloned()
                .unwrap_or(CellValue::Null);

            if !self.modifiers.is_empty() {
                if let CellValue::Text(text) = &cell {
                    cell = CellValue::Text(self.modifiers.apply(&target.name, text));
                }
            }

            if !self.filters.is_empty()
                && ColumnFilter::applies_to(target.column_type, clob_is_filename)
                && !self.filters.retain(&target.name, &cell.to_string())
            {
                return Ok(None);
            }

            row[target_index] = match cell {
                CellValue::Text(text) => self.converter.convert(&text, target)?,
                other => other,
            };
        }

        Ok(Some(row))
    }
}

impl<R: SpreadsheetReader> RowDataProducer for SheetFileParser<R> {
    async fn start<D: DataReceiver>(&mut self, receiver: &mut D) -> Result<()> {
        let outcome = self.run(receiver).await;
        if self.control.is_cancelled() {
            receiver.import_cancelled().await;
        } else {
            receiver.import_finished().await;
        }
        outcome
    }

    async fn source_columns(&mut self) -> Result<Vec<ColumnIdentifier>> {
        let selection = self.selection.clone();
        let index = self.resolve_selection(&selection)?;
        self.reader.select_sheet(index)?;
        let header = self.reader.header_columns()?;
        Ok(header
            .iter()
            .map(|name| ColumnIdentifier::new(name, ColumnType::Text))
            .collect())
    }

    fn control(&self) -> ImportControl {
        self.control.clone()
    }
}

/// One-based spreadsheet line of a data row, counting the header line.
fn sheet_line(row_index: usize) -> u64 {
    row_index as u64 + 2
}

fn raw_row(cells: &[CellValue]) -> String {
    let mut raw = String::new();
    for (index, cell) in cells.iter().enumerate() {
        if index > 0 {
            raw.push(',');
        }
        raw.push_str(&cell.to_string());
    }
    raw
}
