//! Delimited text file parsing loop.

use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, StringRecord};
use tracing::{debug, trace};

use ingest_core::{
    CellValue, ColumnFilter, ColumnIdentifier, ColumnMapping, ColumnType, DataReceiver, Error,
    ImportControl, Result, RowDataProducer, TableIdentifier, ValueConverter, ValueModifiers,
};

use crate::config::TextParserConfig;

/// Reads one delimited text file and pushes its rows to a receiver.
///
/// The parser resolves the file's header against the target table's
/// columns (or uses an explicit mapping), applies modifiers, filters
/// and type conversion per cell, and honors the shared
/// [`ImportControl`] between rows.
pub struct TextFileParser {
    path: PathBuf,
    config: TextParserConfig,
    converter: ValueConverter,
    filters: ColumnFilter,
    modifiers: ValueModifiers,
    table: Option<TableIdentifier>,
    target_columns: Vec<ColumnIdentifier>,
    mapping_override: Option<ColumnMapping>,
    ignore_missing_columns: bool,
    abort_on_error: bool,
    control: ImportControl,
}

impl TextFileParser {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            config: TextParserConfig::default(),
            converter: ValueConverter::default(),
            filters: ColumnFilter::new(),
            modifiers: ValueModifiers::new(),
            table: None,
            target_columns: Vec::new(),
            mapping_override: None,
            ignore_missing_columns: false,
            abort_on_error: false,
            control: ImportControl::new(),
        }
    }

    pub fn with_config(mut self, config: TextParserConfig) -> Self {
        self.config = config;
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

    /// The table rows are imported into.
    pub fn target_table(mut self, table: TableIdentifier) -> Self {
        self.table = Some(table);
        self
    }

    /// The target table's columns, used to resolve the file header.
    pub fn target_columns(mut self, columns: Vec<ColumnIdentifier>) -> Self {
        self.target_columns = columns;
        self
    }

    /// Explicit column mapping, replacing header resolution. Required
    /// for files without a header row.
    pub fn with_mapping(mut self, mapping: ColumnMapping) -> Self {
        self.mapping_override = Some(mapping);
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

    /// Share a control token with the caller (e.g. a multi-file run).
    pub fn with_control(mut self, control: ImportControl) -> Self {
        self.control = control;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse this file against the receiver: target-table activation,
    /// row loop, and the closing `table_import_finished` when the file
    /// ends cleanly. The final `import_finished`/`import_cancelled`
    /// notification is left to the caller, so multi-file runs can reuse
    /// this per file.
    pub async fn process_file<R: DataReceiver>(&mut self, receiver: &mut R) -> Result<()> {
        self.control.clear_stop();

        let table = self
            .table
            .clone()
            .ok_or_else(|| Error::config("No target table configured for text import"))?;

        let mut reader = self.open_reader()?;
        let headers = self.read_headers(&mut reader)?;
        let mapping = self.build_mapping(&headers)?;

        debug!(
            file = %self.path.display(),
            table = %table,
            columns = mapping.mapped_count(),
            "starting text file import"
        );

        receiver
            .set_target_table(&table, mapping.target_columns(), Some(&self.path))
            .await?;

        let clob_is_filename = self.converter.treats_clob_as_filename();
        let expected_fields = mapping.columns().len();
        let mut record = StringRecord::new();

        loop {
            if self.control.should_halt() {
                break;
            }
            let more = reader.read_record(&mut record).map_err(|err| csv_error(&err))?;
            if !more {
                break;
            }
            let line = record.position().map_or(0, |position| position.line());

            if !receiver.should_process_next_row() {
                receiver.next_row_skipped();
                continue;
            }

            if !self.config.flexible && record.len() != expected_fields {
                let raw = raw_record(&record, self.config.delimiter);
                receiver.record_rejected(
                    line,
                    &raw,
                    &format!(
                        "expected {expected_fields} fields, found {}",
                        record.len()
                    ),
                );
                continue;
            }

            match self.convert_record(&record, &mapping, clob_is_filename) {
                Ok(Some(row)) => receiver.process_row(row).await?,
                Ok(None) => trace!(line, "row removed by column filter"),
                Err(err) => {
                    if self.abort_on_error {
                        return Err(err);
                    }
                    let raw = raw_record(&record, self.config.delimiter);
                    receiver.record_rejected(line, &raw, &err.to_string());
                }
            }
        }

        if self.control.is_cancelled() {
            Ok(())
        } else {
            receiver.table_import_finished().await
        }
    }

    fn open_reader(&self) -> Result<csv::Reader<std::fs::File>> {
        let mut builder = ReaderBuilder::new();
        builder
            .delimiter(self.config.delimiter_u8())
            .quote(self.config.quote_char_u8())
            .has_headers(self.config.has_header)
            .flexible(true);
        if let Some(escape) = self.config.escape_char_u8() {
            builder.escape(Some(escape));
            builder.double_quote(false);
        }
        builder.from_path(&self.path).map_err(|err| csv_error(&err))
    }

    fn read_headers(&self, reader: &mut csv::Reader<std::fs::File>) -> Result<Vec<String>> {
        if !self.config.has_header {
            // Headerless files need an explicit mapping; its source
            // names stand in for the header.
            return match &self.mapping_override {
                Some(mapping) => Ok(mapping
                    .columns()
                    .iter()
                    .map(|column| column.source_name.clone())
                    .collect()),
                None => Err(Error::config(format!(
                    "File '{}' has no header line and no explicit column mapping",
                    self.path.display()
                ))),
            };
        }
        let headers = reader.headers().map_err(|err| csv_error(&err))?;
        Ok(headers.iter().map(|name| name.trim().to_string()).collect())
    }

    fn build_mapping(&self, headers: &[String]) -> Result<ColumnMapping> {
        if let Some(mapping) = &self.mapping_override {
            return Ok(mapping.clone());
        }
        if self.target_columns.is_empty() {
            return Err(Error::config(format!(
                "No target columns known for '{}'",
                self.path.display()
            )));
        }
        ColumnMapping::resolve(headers, &self.target_columns, self.ignore_missing_columns)
    }

    /// Convert one record into a receiver row. `Ok(None)` means a column
    /// filter removed the row.
    fn convert_record(
        &self,
        record: &StringRecord,
        mapping: &ColumnMapping,
        clob_is_filename: bool,
    ) -> Result<Option<Vec<CellValue>>> {
        let mut row = vec![CellValue::Null; mapping.mapped_count()];

        for column in mapping.columns() {
            let (Some(target), Some(target_index)) = (&column.target, column.target_index) else {
                continue;
            };

            let raw = record.get(column.source_index).unwrap_or("");
            let modified;
            let raw = if self.modifiers.is_empty() {
                raw
            } else {
                modified = self.modifiers.apply(&target.name, raw);
                modified.as_str()
            };

            if !self.filters.is_empty()
                && ColumnFilter::applies_to(target.column_type, clob_is_filename)
                && !self.filters.retain(&target.name, raw)
            {
                return Ok(None);
            }

            row[target_index] = self.converter.convert(raw, target)?;
        }

        Ok(Some(row))
    }
}

impl RowDataProducer for TextFileParser {
    async fn start<R: DataReceiver>(&mut self, receiver: &mut R) -> Result<()> {
        let outcome = self.process_file(receiver).await;
        if self.control.is_cancelled() {
            receiver.import_cancelled().await;
        } else {
            receiver.import_finished().await;
        }
        outcome
    }

    async fn source_columns(&mut self) -> Result<Vec<ColumnIdentifier>> {
        let mut reader = self.open_reader()?;
        let headers = self.read_headers(&mut reader)?;
        Ok(headers
            .iter()
            .map(|name| ColumnIdentifier::new(name, ColumnType::Text))
            .collect())
    }

    fn control(&self) -> ImportControl {
        self.control.clone()
    }
}

fn csv_error(err: &csv::Error) -> Error {
    let line = err.position().map_or(0, csv::Position::line);
    Error::parse(line, err.to_string())
}

/// Best-effort reconstruction of the raw record for the bad-record
/// sink.
fn raw_record(record: &StringRecord, delimiter: char) -> String {
    let mut raw = String::new();
    for (index, field) in record.iter().enumerate() {
        if index > 0 {
            raw.push(delimiter);
        }
        raw.push_str(field);
    }
    raw
}
