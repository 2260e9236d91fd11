//! Source file discovery for directory imports.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use ingest_core::TableIdentifier;

use crate::{Error, Result};

/// Resolves the target table for one source file.
pub trait TableNameResolver {
    fn resolve(&self, file: &Path) -> Result<TableIdentifier>;
}

/// Default resolver: the file stem is the table expression, so
/// `orders.csv` imports into `orders` and `main.orders.csv` into
/// `main.orders`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileStemResolver;

impl TableNameResolver for FileStemResolver {
    fn resolve(&self, file: &Path) -> Result<TableIdentifier> {
        let stem = file
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or_else(|| {
                Error::pipeline(
                    "resolve_table",
                    file.display().to_string(),
                    "file name is not valid UTF-8",
                )
            })?;
        Ok(TableIdentifier::parse(stem)?)
    }
}

/// One discovered source file and the table it maps to.
#[derive(Debug, Clone)]
pub struct ImportSource {
    pub path: PathBuf,
    pub table: TableIdentifier,
}

/// Enumerates the source files of one directory import.
#[derive(Debug, Clone)]
pub struct FileLister {
    directory: PathBuf,
    extension: String,
}

impl FileLister {
    /// Lister over `directory`, matching `*.csv` by default.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            extension: "csv".to_string(),
        }
    }

    /// Match a different file extension (leading dot optional, case
    /// does not matter).
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        let extension = extension.into();
        self.extension = extension.trim_start_matches('.').to_ascii_lowercase();
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Matching files in name order, each with its resolved target
    /// table. Name order keeps runs deterministic; dependency ordering
    /// happens later against the live database.
    pub fn list(&self, resolver: &dyn TableNameResolver) -> Result<Vec<ImportSource>> {
        let directory = self.directory.display().to_string();
        if !self.directory.is_dir() {
            return Err(Error::pipeline("list_files", directory, "not a directory"));
        }

        let entries = fs::read_dir(&self.directory)
            .map_err(|err| Error::io("list_files", directory.as_str(), err.to_string()))?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry
                .map_err(|err| Error::io("list_files", directory.as_str(), err.to_string()))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let matches = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case(&self.extension));
            if matches {
                files.push(path);
            }
        }
        files.sort();

        let mut sources = Vec::with_capacity(files.len());
        for path in files {
            let table = resolver.resolve(&path)?;
            debug!(file = %path.display(), table = %table, "source file discovered");
            sources.push(ImportSource { path, table });
        }
        Ok(sources)
    }
}
