//! Import jobs as data, loadable from YAML or JSON files.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use ingest_core::{ImportMode, TableIdentifier};
use ingest_db::{ConnectionConfig, ConstantColumnValues, ImportOptions, KeyViolationMatcher};
use ingest_text::TextParserConfig;

use crate::{Error, Result};

/// One import run described as data. Every knob mirrors a field of
/// [`ImportOptions`] or [`TextParserConfig`]; absent fields keep their
/// defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportJob {
    /// File or directory to import.
    pub source: PathBuf,
    /// Target table for single-file jobs. Directory jobs resolve the
    /// table per file instead.
    #[serde(default)]
    pub table: Option<String>,
    /// Database path or URL. Absent means an in-memory database.
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default)]
    pub key_columns: Vec<String>,
    #[serde(default)]
    pub delimiter: Option<char>,
    #[serde(default = "default_header")]
    pub header: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub commit_every: Option<usize>,
    #[serde(default)]
    pub continue_on_error: bool,
    #[serde(default)]
    pub max_errors: u64,
    #[serde(default)]
    pub delete_target: bool,
    #[serde(default)]
    pub create_target: bool,
    #[serde(default)]
    pub start_row: Option<u64>,
    #[serde(default)]
    pub end_row: Option<u64>,
    #[serde(default)]
    pub bad_file: Option<PathBuf>,
    /// Constant column definitions: `column=value`, `column=${expr}`,
    /// `column=@{SELECT ...}` or `column=$line`.
    #[serde(default)]
    pub constants: Vec<String>,
    #[serde(default)]
    pub pre_table_statement: Option<String>,
    #[serde(default)]
    pub post_table_statement: Option<String>,
    /// Regex deciding which SQL errors count as key violations for the
    /// `insertUpdate` fallback. Absent means every error counts.
    #[serde(default)]
    pub key_violation_pattern: Option<String>,
}

fn default_mode() -> String {
    "insert".to_string()
}

fn default_header() -> bool {
    true
}

fn default_batch_size() -> usize {
    1
}

impl ImportJob {
    /// Load a job file, dispatching on the extension: `.yaml`/`.yml`
    /// parse as YAML, everything else as JSON.
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|err| Error::io("read_job", path.display().to_string(), err.to_string()))?;

        let is_yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));
        if is_yaml {
            Self::from_yaml(&content)
        } else {
            Self::from_json(&content)
        }
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|err| Error::pipeline("parse_job", "<yaml>", err.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|err| Error::pipeline("parse_job", "<json>", err.to_string()))
    }

    /// Whether this is a directory (multi-table) job.
    pub fn is_directory(&self) -> bool {
        self.source.is_dir()
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        match &self.database {
            Some(url) => ConnectionConfig::local(url),
            None => ConnectionConfig::in_memory(),
        }
    }

    /// The explicitly configured target table, when one is set.
    pub fn table_identifier(&self) -> Result<Option<TableIdentifier>> {
        match &self.table {
            Some(expression) => Ok(Some(TableIdentifier::parse(expression)?)),
            None => Ok(None),
        }
    }

    /// Translate the job fields into importer options.
    pub fn import_options(&self) -> Result<ImportOptions> {
        let mode: ImportMode = self.mode.parse()?;
        let key_violation_matcher = match &self.key_violation_pattern {
            Some(pattern) => KeyViolationMatcher::pattern(pattern)?,
            None => KeyViolationMatcher::default(),
        };
        Ok(ImportOptions {
            mode,
            key_columns: self.key_columns.clone(),
            batch_size: self.batch_size,
            commit_every: self.commit_every,
            continue_on_error: self.continue_on_error,
            delete_target: self.delete_target,
            create_target: self.create_target,
            start_row: self.start_row,
            end_row: self.end_row,
            max_errors: self.max_errors,
            bad_file: self.bad_file.clone(),
            pre_table_statement: self.pre_table_statement.clone(),
            post_table_statement: self.post_table_statement.clone(),
            key_violation_matcher,
            ..ImportOptions::default()
        })
    }

    pub fn parser_config(&self) -> TextParserConfig {
        let mut config = TextParserConfig::new();
        if let Some(delimiter) = self.delimiter {
            config = config.delimiter(delimiter);
        }
        config.has_header(self.header)
    }

    pub fn constant_columns(&self) -> Result<ConstantColumnValues> {
        Ok(ConstantColumnValues::parse_list(&self.constants)?)
    }
}
