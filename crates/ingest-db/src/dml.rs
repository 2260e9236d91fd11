//! DML statement construction.
//!
//! Consulted once per target-table activation, never per row. The
//! builder produces INSERT / INSERT OR IGNORE / UPSERT and UPDATE text
//! with `?N` placeholders, plus the slot map that says which row cell,
//! constant or line number feeds each placeholder. Key columns occupy
//! the trailing WHERE slots of the UPDATE.

use std::collections::HashMap;

use tracing::debug;

use ingest_core::{ColumnIdentifier, ImportMode, ModeTransition, TableIdentifier};

use crate::connection::DbCapabilities;
use crate::constants::{BoundConstants, BoundKind};
use crate::sql::{quote_identifier, quote_table};
use crate::{Error, Result};

/// What feeds one `?N` parameter slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamSource {
    /// Index into the row array handed to `process_row`.
    Row(usize),
    /// Index into the bound constant values.
    Constant(usize),
    /// The current row number.
    LineNumber,
}

/// One statement text plus its parameter slot map.
#[derive(Debug, Clone)]
pub struct PreparedDml {
    pub sql: String,
    pub params: Vec<ParamSource>,
}

/// Everything prepared for one target-table activation.
#[derive(Debug, Clone)]
pub struct PreparedImport {
    /// Mode actually in effect, after any demotion.
    pub mode: ImportMode,
    pub insert: Option<PreparedDml>,
    pub update: Option<PreparedDml>,
    /// Set when the requested mode was demoted.
    pub transition: Option<ModeTransition>,
    /// Non-fatal findings, e.g. a disabled update path.
    pub warnings: Vec<String>,
}

pub struct DmlBuilder<'a> {
    table: &'a TableIdentifier,
    columns: &'a [ColumnIdentifier],
    mode: ImportMode,
    capabilities: DbCapabilities,
    constants: Option<&'a BoundConstants>,
    key_columns: Vec<String>,
    column_expressions: HashMap<String, String>,
    where_addition: Option<String>,
}

impl<'a> DmlBuilder<'a> {
    pub fn new(table: &'a TableIdentifier, columns: &'a [ColumnIdentifier]) -> Self {
        Self {
            table,
            columns,
            mode: ImportMode::Insert,
            capabilities: DbCapabilities::sqlite(),
            constants: None,
            key_columns: Vec::new(),
            column_expressions: HashMap::new(),
            where_addition: None,
        }
    }

    pub fn mode(mut self, mode: ImportMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn capabilities(mut self, capabilities: DbCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn constants(mut self, constants: &'a BoundConstants) -> Self {
        self.constants = Some(constants);
        self
    }

    /// Explicit key columns. When empty, primary-key flags on the
    /// declared columns decide.
    pub fn key_columns(mut self, keys: Vec<String>) -> Self {
        self.key_columns = keys;
        self
    }

    /// Replace the value placeholder of one column with a SQL fragment
    /// containing exactly one `?`.
    pub fn column_expression(mut self, column: &str, fragment: impl Into<String>) -> Self {
        self.column_expressions
            .insert(column.to_ascii_lowercase(), fragment.into());
        self
    }

    pub fn column_expressions(mut self, expressions: HashMap<String, String>) -> Self {
        for (column, fragment) in expressions {
            self.column_expressions
                .insert(column.to_ascii_lowercase(), fragment);
        }
        self
    }

    /// Extra fragment appended to the UPDATE's WHERE clause.
    pub fn where_addition(mut self, fragment: impl Into<String>) -> Self {
        self.where_addition = Some(fragment.into());
        self
    }

    pub fn build(self) -> Result<PreparedImport> {
        if self.columns.is_empty() {
            return Err(Error::config(format!(
                "No columns to import into {}",
                self.table
            )));
        }

        let empty = BoundConstants::empty();
        let constants = self.constants.unwrap_or(&empty);

        for constant in constants.columns() {
            if self.columns.iter().any(|column| column.matches_name(&constant.column)) {
                return Err(Error::config(format!(
                    "Constant value for '{}' collides with an import file column",
                    constant.column
                )));
            }
        }

        let keys = self.resolve_keys()?;
        let (effective, transition) = self.demote();

        if effective.needs_key_columns() && keys.is_empty() {
            return Err(Error::config(format!(
                "Import mode {effective} requires key columns"
            )));
        }

        let has_non_key = self
            .columns
            .iter()
            .any(|column| !is_key(&keys, column))
            || !constants.is_empty();

        let mut warnings = Vec::new();
        let (insert, update) = match effective {
            ImportMode::Insert => (Some(self.build_insert(false, constants)?), None),
            ImportMode::InsertIgnore => (Some(self.build_insert(true, constants)?), None),
            ImportMode::Upsert => (Some(self.build_upsert(constants, &keys)?), None),
            ImportMode::Update => {
                if !has_non_key {
                    return Err(Error::config(format!(
                        "Update mode needs at least one non-key column for {}",
                        self.table
                    )));
                }
                (None, Some(self.build_update(constants, &keys)?))
            }
            ImportMode::InsertUpdate | ImportMode::UpdateInsert => {
                let insert = self.build_insert(false, constants)?;
                let update = if has_non_key {
                    Some(self.build_update(constants, &keys)?)
                } else {
                    warnings.push(format!(
                        "All import columns of {} are key columns; the update path is disabled",
                        self.table
                    ));
                    None
                };
                (Some(insert), update)
            }
        };

        debug!(table = %self.table, mode = %effective, "prepared import statements");

        Ok(PreparedImport {
            mode: effective,
            insert,
            update,
            transition,
            warnings,
        })
    }

    fn demote(&self) -> (ImportMode, Option<ModeTransition>) {
        match self.mode {
            ImportMode::Upsert if !self.capabilities.supports_upsert => (
                ImportMode::InsertUpdate,
                Some(ModeTransition::new(
                    ImportMode::Upsert,
                    ImportMode::InsertUpdate,
                    "native upsert is not supported by the target",
                )),
            ),
            ImportMode::InsertIgnore if !self.capabilities.supports_insert_ignore => (
                ImportMode::Insert,
                Some(ModeTransition::new(
                    ImportMode::InsertIgnore,
                    ImportMode::Insert,
                    "INSERT OR IGNORE is not supported by the target",
                )),
            ),
            mode => (mode, None),
        }
    }

    fn resolve_keys(&self) -> Result<Vec<String>> {
        if self.key_columns.is_empty() {
            return Ok(self
                .columns
                .iter()
                .filter(|column| column.primary_key)
                .map(|column| column.name.clone())
                .collect());
        }
        for key in &self.key_columns {
            if !self.columns.iter().any(|column| column.matches_name(key)) {
                return Err(Error::config(format!(
                    "Key column '{key}' is not part of the import columns"
                )));
            }
        }
        Ok(self.key_columns.clone())
    }

    fn build_insert(&self, or_ignore: bool, constants: &BoundConstants) -> Result<PreparedDml> {
        let mut names = Vec::with_capacity(self.columns.len() + constants.columns().len());
        let mut values = Vec::with_capacity(names.capacity());
        let mut params = Vec::new();

        for (index, column) in self.columns.iter().enumerate() {
            names.push(quote_identifier(&column.name));
            let slot = params.len() + 1;
            params.push(ParamSource::Row(index));
            values.push(self.value_fragment(column, slot)?);
        }

        for (index, constant) in constants.columns().iter().enumerate() {
            names.push(quote_identifier(&constant.column));
            match &constant.kind {
                BoundKind::Inline(text) => values.push(text.clone()),
                BoundKind::Value(_) => {
                    let slot = params.len() + 1;
                    params.push(ParamSource::Constant(index));
                    values.push(format!("?{slot}"));
                }
                BoundKind::LineNumber => {
                    let slot = params.len() + 1;
                    params.push(ParamSource::LineNumber);
                    values.push(format!("?{slot}"));
                }
            }
        }

        let verb = if or_ignore { "INSERT OR IGNORE" } else { "INSERT" };
        let sql = format!(
            "{verb} INTO {} ({}) VALUES ({})",
            quote_table(self.table),
            names.join(", "),
            values.join(", ")
        );
        Ok(PreparedDml { sql, params })
    }

    fn build_upsert(&self, constants: &BoundConstants, keys: &[String]) -> Result<PreparedDml> {
        let PreparedDml { sql, params } = self.build_insert(false, constants)?;

        let conflict: Vec<String> = keys.iter().map(|key| quote_identifier(key)).collect();
        let mut set: Vec<String> = self
            .columns
            .iter()
            .filter(|column| !is_key(keys, column))
            .map(|column| {
                let quoted = quote_identifier(&column.name);
                format!("{quoted} = excluded.{quoted}")
            })
            .collect();
        set.extend(constants.columns().iter().map(|constant| {
            let quoted = quote_identifier(&constant.column);
            format!("{quoted} = excluded.{quoted}")
        }));

        let sql = if set.is_empty() {
            format!("{sql} ON CONFLICT ({}) DO NOTHING", conflict.join(", "))
        } else {
            format!(
                "{sql} ON CONFLICT ({}) DO UPDATE SET {}",
                conflict.join(", "),
                set.join(", ")
            )
        };
        Ok(PreparedDml { sql, params })
    }

    fn build_update(&self, constants: &BoundConstants, keys: &[String]) -> Result<PreparedDml> {
        let mut assignments = Vec::new();
        let mut params = Vec::new();

        for (index, column) in self.columns.iter().enumerate() {
            if is_key(keys, column) {
                continue;
            }
            let slot = params.len() + 1;
            params.push(ParamSource::Row(index));
            assignments.push(format!(
                "{} = {}",
                quote_identifier(&column.name),
                self.value_fragment(column, slot)?
            ));
        }

        for (index, constant) in constants.columns().iter().enumerate() {
            let quoted = quote_identifier(&constant.column);
            match &constant.kind {
                BoundKind::Inline(text) => assignments.push(format!("{quoted} = {text}")),
                BoundKind::Value(_) => {
                    let slot = params.len() + 1;
                    params.push(ParamSource::Constant(index));
                    assignments.push(format!("{quoted} = ?{slot}"));
                }
                BoundKind::LineNumber => {
                    let slot = params.len() + 1;
                    params.push(ParamSource::LineNumber);
                    assignments.push(format!("{quoted} = ?{slot}"));
                }
            }
        }

        // Key columns take the trailing parameter slots.
        let mut clauses = Vec::with_capacity(keys.len());
        for (index, column) in self.columns.iter().enumerate() {
            if !is_key(keys, column) {
                continue;
            }
            let slot = params.len() + 1;
            params.push(ParamSource::Row(index));
            clauses.push(format!("{} = ?{slot}", quote_identifier(&column.name)));
        }

        let mut sql = format!(
            "UPDATE {} SET {} WHERE {}",
            quote_table(self.table),
            assignments.join(", "),
            clauses.join(" AND ")
        );

        if let Some(addition) = &self.where_addition {
            if addition.contains('?') {
                return Err(Error::config(
                    "Additional WHERE clause must not contain placeholders",
                ));
            }
            sql.push_str(&format!(" AND ({addition})"));
        }

        Ok(PreparedDml { sql, params })
    }

    fn value_fragment(&self, column: &ColumnIdentifier, slot: usize) -> Result<String> {
        match self.column_expressions.get(&column.name.to_ascii_lowercase()) {
            Some(fragment) => {
                if fragment.matches('?').count() != 1 {
                    return Err(Error::config(format!(
                        "Column expression for '{}' must contain exactly one placeholder",
                        column.name
                    )));
                }
                Ok(fragment.replacen('?', &format!("?{slot}"), 1))
            }
            None => Ok(format!("?{slot}")),
        }
    }
}

fn is_key(keys: &[String], column: &ColumnIdentifier) -> bool {
    keys.iter().any(|key| column.matches_name(key))
}
