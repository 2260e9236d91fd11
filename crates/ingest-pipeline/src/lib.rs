#![deny(warnings)]
#![deny(rust_2018_idioms)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

//! # ingest-pipeline
//!
//! Directory enumeration, job definitions and multi-table orchestration.
//!
//! This crate drives whole import runs: it lists source files, resolves
//! the target table per file, orders tables by foreign-key dependencies,
//! and feeds each file through a producer into one shared
//! [`ingest_db::DataImporter`].

pub mod job;
pub mod lister;
pub mod runner;

pub use job::ImportJob;
pub use lister::{FileLister, FileStemResolver, ImportSource, TableNameResolver};
pub use runner::ImportRunner;

use thiserror::Error;

/// Errors raised while orchestrating an import run.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Pipeline error during {operation} for '{path}': {message}")]
    Pipeline {
        operation: String,
        path: String,
        message: String,
    },

    #[error("IO error during {operation} for '{path}': {message}")]
    Io {
        operation: String,
        path: String,
        message: String,
    },

    #[error(transparent)]
    Core(#[from] ingest_core::Error),

    #[error(transparent)]
    Db(#[from] ingest_db::Error),
}

impl Error {
    /// Create a structured pipeline error with operation/path context.
    pub fn pipeline(
        operation: impl Into<String>,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Pipeline {
            operation: operation.into(),
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a structured I/O error with operation/path context.
    pub fn io(
        operation: impl Into<String>,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Io {
            operation: operation.into(),
            path: path.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_error_preserves_operation_and_path_context() {
        let error = Error::pipeline("list_files", "/tmp/imports", "not a directory");
        match error {
            Error::Pipeline {
                operation,
                path,
                message,
            } => {
                assert_eq!(operation, "list_files");
                assert_eq!(path, "/tmp/imports");
                assert_eq!(message, "not a directory");
            }
            _ => panic!("expected pipeline variant"),
        }
    }

    #[test]
    fn core_errors_pass_through() {
        let error = Error::from(ingest_core::Error::config("bad mode"));
        assert_eq!(error.to_string(), "Configuration error: bad mode");
    }
}
