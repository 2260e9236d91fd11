#![deny(warnings)]
#![deny(rust_2018_idioms)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

//! # ingest-core
//!
//! Core data model and callback contract for tabular data imports.
//!
//! This crate provides the table/column identity types, the typed cell
//! values moved between parsers and the database receiver, value
//! conversion and filtering, and the producer/receiver contract that
//! every import run is built on.

/// Cooperative cancellation shared between producer and receiver.
pub mod control;
/// Raw text to typed cell conversion.
pub mod convert;
/// Per-column regex filters and value modifiers.
pub mod filter;
/// Table and column identity primitives.
pub mod identifier;
/// Source-to-target column mapping.
pub mod mapping;
/// Bounded diagnostic message accumulation.
pub mod messages;
/// Import modes and prepare-time mode transitions.
pub mod modes;
/// Producer-side contract for row data sources.
pub mod producer;
/// Receiver-side contract and run statistics.
pub mod receiver;
/// Sink for rejected source records.
pub mod reject;
/// Typed cell values.
pub mod value;

pub use control::ImportControl;
pub use convert::{BlobMode, ValueConverter};
pub use filter::{ColumnFilter, Modifier, ValueModifiers};
pub use identifier::{ColumnIdentifier, ColumnType, TableIdentifier};
pub use mapping::{ColumnMapping, ImportFileColumn};
pub use messages::MessageBuffer;
pub use modes::{ImportMode, ModeTransition};
pub use producer::RowDataProducer;
pub use receiver::{DataReceiver, RunSummary, TableStats};
pub use reject::RejectSink;
pub use value::CellValue;

use thiserror::Error;

/// Errors raised on the producer side of an import and across the
/// producer/receiver boundary.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {details}")]
    Config { details: String },

    #[error("Parse error at line {line}: {message}")]
    Parse { line: u64, message: String },

    #[error("Conversion error for column '{column}' (value '{value}'): {message}")]
    Conversion {
        column: String,
        value: String,
        message: String,
    },

    #[error("Column mapping error: {details}")]
    ColumnMapping { details: String },

    #[error("Receiver error during {operation}: {message}")]
    Receiver { operation: String, message: String },

    #[error("Memory exhausted: {details}")]
    MemoryExhausted { details: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build a configuration error.
    pub fn config(details: impl Into<String>) -> Self {
        Self::Config {
            details: details.into(),
        }
    }

    /// Build a parse error with line context.
    pub fn parse(line: u64, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            message: message.into(),
        }
    }

    /// Build a conversion error with column and offending value.
    pub fn conversion(
        column: impl Into<String>,
        value: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Conversion {
            column: column.into(),
            value: value.into(),
            message: message.into(),
        }
    }

    /// Build a column mapping error.
    pub fn column_mapping(details: impl Into<String>) -> Self {
        Self::ColumnMapping {
            details: details.into(),
        }
    }

    /// Build a receiver-side error with operation context.
    pub fn receiver(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Receiver {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

/// Crate-local result type.
pub type Result<T> = std::result::Result<T, Error>;
